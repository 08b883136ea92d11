//! Persistence seams.
//!
//! Every consistency guarantee this service gives is expressed through the
//! primitives below (atomic increment, unique indexes, conditional and
//! set-based updates), never through in-process locks, so several
//! instances may share one database.

use crate::error::FactureError;
use crate::models::{
    ClientProfile, CompanyProfile, Invoice, InvoiceSnapshot, InvoiceStatus, Order,
    SequenceCounter,
};
use crate::services::renumbering::YearRenumbering;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Builds the invoice for an allocated seq.
pub type IssueFn<'a> = &'a (dyn Fn(i64) -> Invoice + Send + Sync);

/// A bulk deletion worked out before anything is written.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeletionPlan {
    pub invoice_ids: Vec<String>,
    pub order_ids: Vec<String>,
    /// Deleted seqs per touched year, sorted ascending.
    pub seqs_by_year: BTreeMap<i32, Vec<i64>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppliedDeletion {
    pub deleted: u64,
    pub orders_updated: u64,
    pub years: Vec<YearRenumbering>,
}

/// Invoice selection by issue date and status. `to` is exclusive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvoiceFilter {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub statuses: Vec<InvoiceStatus>,
}

impl InvoiceFilter {
    pub fn matches(&self, invoice: &Invoice) -> bool {
        self.from.is_none_or(|from| invoice.issued_at >= from)
            && self.to.is_none_or(|to| invoice.issued_at < to)
            && (self.statuses.is_empty() || self.statuses.contains(&invoice.status))
    }
}

#[async_trait]
pub trait InvoiceStore: Send + Sync {
    async fn find_invoice(&self, id: &str) -> Result<Option<Invoice>, FactureError>;

    async fn find_invoice_by_order(&self, order_id: &str)
        -> Result<Option<Invoice>, FactureError>;

    async fn find_invoice_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Invoice>, FactureError>;

    async fn find_invoices(&self, ids: &[String]) -> Result<Vec<Invoice>, FactureError>;

    /// Matching invoices ordered by issue time, then seq.
    async fn list_invoices(&self, filter: &InvoiceFilter) -> Result<Vec<Invoice>, FactureError>;

    /// Fails with `DuplicateKey` when the order, the (year, seq) pair or the
    /// reference is already taken.
    async fn insert_invoice(&self, invoice: &Invoice) -> Result<(), FactureError>;

    /// Overwrite the snapshot of a non-cancelled invoice. Returns whether an
    /// invoice was updated.
    async fn replace_snapshot(
        &self,
        invoice_id: &str,
        snapshot: &InvoiceSnapshot,
    ) -> Result<bool, FactureError>;

    async fn cancel_invoice(&self, invoice_id: &str) -> Result<Option<Invoice>, FactureError>;

    /// Apply a bulk deletion as one unit: delete the invoices, clear
    /// `has_invoice` and cancel their orders, then for each touched year run a
    /// single set-based update over the invoices above the smallest deleted
    /// seq (`seq -= |{d in deleted : d < seq}|`, reference recomputed) and set
    /// the year's counter to its highest surviving seq. Nothing is applied when
    /// any step fails.
    async fn apply_deletion(&self, plan: &DeletionPlan) -> Result<AppliedDeletion, FactureError>;
}

#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomic upsert-and-increment; returns the counter after the increment.
    async fn find_and_increment(&self, year: i32) -> Result<SequenceCounter, FactureError>;

    /// Increment the counter of `year` and insert the invoice built from the
    /// new seq as one unit. When the insert is rejected the counter keeps its
    /// previous value, so no seq is lost.
    async fn issue_numbered(&self, year: i32, issue: IssueFn<'_>) -> Result<Invoice, FactureError>;
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn find_order(&self, id: &str) -> Result<Option<Order>, FactureError>;

    async fn find_order_by_reference(&self, reference: &str)
        -> Result<Option<Order>, FactureError>;

    async fn set_has_invoice(&self, order_id: &str, has_invoice: bool)
        -> Result<bool, FactureError>;
}

#[async_trait]
pub trait PartyDirectory: Send + Sync {
    async fn company(&self) -> Result<CompanyProfile, FactureError>;

    async fn client(&self, client_id: &str) -> Result<Option<ClientProfile>, FactureError>;
}

/// The collaborators a backend provides, bundled for wiring.
#[derive(Clone)]
pub struct Stores {
    pub invoices: Arc<dyn InvoiceStore>,
    pub orders: Arc<dyn OrderStore>,
    pub counters: Arc<dyn CounterStore>,
    pub directory: Arc<dyn PartyDirectory>,
}

impl Stores {
    /// Use one value for every seam.
    pub fn from_backend<B>(backend: B) -> Self
    where
        B: InvoiceStore + OrderStore + CounterStore + PartyDirectory + Clone + 'static,
    {
        Self {
            invoices: Arc::new(backend.clone()),
            orders: Arc::new(backend.clone()),
            counters: Arc::new(backend.clone()),
            directory: Arc::new(backend),
        }
    }
}
