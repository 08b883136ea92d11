//! Bulk PDF export as a streamed zip, with live progress.

pub mod archive;
pub mod coordinator;
pub mod progress;
pub mod selection;

pub use coordinator::{default_concurrency, BulkExportCoordinator, ExportArchive, ERRORS_ENTRY};
pub use progress::{ExportStatus, ProgressEvent, ProgressRegistry, ProgressSnapshot, ProgressTimings};
pub use selection::{ExportSelection, PeriodFilter};
