pub mod creation;
pub mod database;
pub mod memory;
pub mod metrics;
pub mod renumbering;
pub mod sequence;
pub mod store;
pub mod sync;

pub use creation::{CreationOutcome, InvoiceCreationService};
pub use database::MongoDb;
pub use memory::InMemoryStore;
pub use self::metrics::{get_metrics, init_metrics};
pub use renumbering::{DeletionReport, RenumberingEngine, YearRenumbering};
pub use sequence::SequenceAllocator;
pub use store::{
    AppliedDeletion, CounterStore, DeletionPlan, InvoiceFilter, InvoiceStore, IssueFn, OrderStore,
    PartyDirectory, Stores,
};
pub use sync::{OrderInvoiceSync, SyncOutcome};
