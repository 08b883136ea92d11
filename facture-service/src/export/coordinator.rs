use crate::error::FactureError;
use crate::export::archive::{ArchiveAppender, ArchiveEntry, ArchiveSink, BodyChunk};
use crate::export::progress::{ExportStatus, ProgressRegistry};
use crate::export::selection::ExportSelection;
use crate::rendering::{DocType, DocumentRenderer};
use crate::services::store::InvoiceStore;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

pub const ERRORS_ENTRY: &str = "errors.txt";

/// Default pool size: one core is left to the rest of the service, and
/// at most three rendering contexts run at once.
pub fn default_concurrency() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    cpus.saturating_sub(1).clamp(1, 3)
}

/// A started export. `body` yields the zip as it is written.
pub struct ExportArchive {
    pub total: usize,
    pub body: mpsc::Receiver<BodyChunk>,
}

#[derive(Debug, Clone)]
struct RenderFailure {
    index: usize,
    reference: String,
    message: String,
}

#[derive(Clone)]
pub struct BulkExportCoordinator {
    invoices: Arc<dyn InvoiceStore>,
    renderer: DocumentRenderer,
    progress: ProgressRegistry,
    concurrency: usize,
}

impl BulkExportCoordinator {
    pub fn new(
        invoices: Arc<dyn InvoiceStore>,
        renderer: DocumentRenderer,
        progress: ProgressRegistry,
        concurrency: usize,
    ) -> Self {
        Self {
            invoices,
            renderer,
            progress,
            concurrency: concurrency.max(1),
        }
    }

    pub fn progress(&self) -> &ProgressRegistry {
        &self.progress
    }

    /// Resolve the selection and start rendering in the background.
    ///
    /// Fails up front with `NoMatch` when nothing is selected; once the
    /// archive is returned, per-item failures end up in `errors.txt`.
    #[tracing::instrument(skip(self, selection))]
    pub async fn export_zip(
        &self,
        selection: &ExportSelection,
        doc_type: DocType,
        progress_id: Option<String>,
    ) -> Result<ExportArchive, FactureError> {
        let references = selection.resolve(self.invoices.as_ref()).await?;
        let total = references.len();

        if let Some(id) = &progress_id {
            self.progress.start(id, total);
        }

        let cancel = CancellationToken::new();
        let (sink, body) = ArchiveSink::spawn(cancel.clone());

        tracing::info!(
            total,
            doc_type = doc_type.file_prefix(),
            workers = self.concurrency,
            "Starting bulk export"
        );
        metrics::counter!("facture_exports_total").increment(1);

        let job = ExportJob {
            references: Arc::new(references),
            doc_type,
            progress_id,
            coordinator: self.clone(),
            cancel,
        };
        tokio::spawn(job.run(sink));

        Ok(ExportArchive { total, body })
    }
}

struct ExportJob {
    references: Arc<Vec<String>>,
    doc_type: DocType,
    progress_id: Option<String>,
    coordinator: BulkExportCoordinator,
    cancel: CancellationToken,
}

impl ExportJob {
    async fn run(self, sink: ArchiveSink) {
        let started = Instant::now();
        let cursor = Arc::new(AtomicUsize::new(0));
        let mut workers = JoinSet::new();

        for id in 0..self.coordinator.concurrency {
            let worker = ExportWorker {
                id,
                references: self.references.clone(),
                cursor: cursor.clone(),
                doc_type: self.doc_type,
                renderer: self.coordinator.renderer.clone(),
                appender: sink.appender(),
                progress: self.coordinator.progress.clone(),
                progress_id: self.progress_id.clone(),
                cancel: self.cancel.clone(),
            };
            workers.spawn(worker.run());
        }

        let mut failures = Vec::new();
        let mut fatal = None;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok(mut worker_failures)) => failures.append(&mut worker_failures),
                Ok(Err(e)) => {
                    self.cancel.cancel();
                    fatal.get_or_insert(e);
                }
                Err(e) => {
                    self.cancel.cancel();
                    fatal.get_or_insert(FactureError::ArchiveFailed(format!(
                        "export worker panicked: {}",
                        e
                    )));
                }
            }
        }

        let outcome = match fatal {
            Some(e) => {
                sink.abort().await;
                Err(e)
            }
            None => self.complete(sink, failures).await,
        };

        match outcome {
            Ok((written, failed)) => {
                tracing::info!(
                    written,
                    failed,
                    duration_ms = started.elapsed().as_millis(),
                    "Bulk export finished"
                );
                self.finish(ExportStatus::Done);
            }
            Err(e) => {
                tracing::error!(error = %e, "Bulk export aborted");
                metrics::counter!("facture_exports_failed_total").increment(1);
                self.finish(ExportStatus::Error);
            }
        }
    }

    async fn complete(
        &self,
        sink: ArchiveSink,
        mut failures: Vec<RenderFailure>,
    ) -> Result<(usize, usize), FactureError> {
        let failed = failures.len();
        if !failures.is_empty() {
            failures.sort_by_key(|f| f.index);
            let report: String = failures
                .iter()
                .map(|f| format!("{}: {}\n", f.reference, f.message))
                .collect();
            sink.append(ArchiveEntry {
                name: ERRORS_ENTRY.to_string(),
                bytes: report.into_bytes(),
            })
            .await?;
        }
        let written = sink.finish().await?;
        Ok((written, failed))
    }

    fn finish(&self, status: ExportStatus) {
        if let Some(id) = &self.progress_id {
            self.coordinator.progress.finish(id, status);
        }
    }
}

struct ExportWorker {
    id: usize,
    references: Arc<Vec<String>>,
    cursor: Arc<AtomicUsize>,
    doc_type: DocType,
    renderer: DocumentRenderer,
    appender: ArchiveAppender,
    progress: ProgressRegistry,
    progress_id: Option<String>,
    cancel: CancellationToken,
}

impl ExportWorker {
    /// Claim items until the cursor runs past the end. Each index is
    /// handed out exactly once across the pool.
    async fn run(self) -> Result<Vec<RenderFailure>, FactureError> {
        let mut failures = Vec::new();

        while !self.cancel.is_cancelled() {
            let index = self.cursor.fetch_add(1, Ordering::SeqCst);
            let Some(reference) = self.references.get(index) else {
                break;
            };

            let failed = match self.renderer.render(reference, self.doc_type).await {
                Ok(bytes) => {
                    self.appender
                        .append(ArchiveEntry {
                            name: self.doc_type.file_name(reference),
                            bytes,
                        })
                        .await?;
                    false
                }
                Err(e) if e.is_fatal() => {
                    tracing::error!(worker_id = self.id, reference = %reference, error = %e, "Fatal export error");
                    self.cancel.cancel();
                    return Err(e);
                }
                Err(e) => {
                    let message = match e {
                        FactureError::RenderFailed { message, .. } => message,
                        other => other.to_string(),
                    };
                    failures.push(RenderFailure {
                        index,
                        reference: reference.clone(),
                        message,
                    });
                    true
                }
            };

            if let Some(id) = &self.progress_id {
                self.progress.advance(id, failed);
            }
        }

        Ok(failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_concurrency_is_bounded() {
        let n = default_concurrency();
        assert!((1..=3).contains(&n));
    }
}
