//! In-process backend with the same uniqueness rules as the MongoDB
//! indexes. Backs `STORE_BACKEND=memory` and the test suite.

use crate::error::FactureError;
use crate::models::{
    format_reference, ClientProfile, CompanyProfile, Invoice, InvoiceSnapshot, InvoiceStatus,
    Order, OrderStatus, SequenceCounter,
};
use crate::services::renumbering::shifted_seq;
use crate::services::renumbering::YearRenumbering;
use crate::services::store::{
    AppliedDeletion, CounterStore, DeletionPlan, InvoiceFilter, InvoiceStore, IssueFn,
    OrderStore, PartyDirectory,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Default)]
struct MemoryState {
    invoices: HashMap<String, Invoice>,
    orders: HashMap<String, Order>,
    counters: HashMap<i32, i64>,
    clients: HashMap<String, ClientProfile>,
    company: CompanyProfile,
}

impl MemoryState {
    /// Name of the unique rule `invoice` would break, if any.
    fn clash(&self, invoice: &Invoice) -> Option<&'static str> {
        self.invoices.values().find_map(|existing| {
            if existing.id == invoice.id {
                Some("_id")
            } else if existing.order == invoice.order {
                Some("order")
            } else if existing.year == invoice.year && existing.seq == invoice.seq {
                Some("year_seq")
            } else if existing.reference == invoice.reference {
                Some("reference")
            } else {
                None
            }
        })
    }

    fn insert(&mut self, invoice: &Invoice) -> Result<(), FactureError> {
        if let Some(index) = self.clash(invoice) {
            return Err(FactureError::DuplicateKey(format!(
                "invoices.{} already holds a value for invoice {}",
                index, invoice.reference
            )));
        }
        self.invoices.insert(invoice.id.clone(), invoice.clone());
        Ok(())
    }

    fn renumber_year(&mut self, year: i32, deleted_seqs: &[i64]) -> u64 {
        let Some(min_deleted) = deleted_seqs.iter().min().copied() else {
            return 0;
        };
        let now = Utc::now();
        let mut modified = 0;
        for invoice in self
            .invoices
            .values_mut()
            .filter(|invoice| invoice.year == year && invoice.seq > min_deleted)
        {
            let seq = shifted_seq(invoice.seq, deleted_seqs);
            if seq == invoice.seq {
                continue;
            }
            invoice.seq = seq;
            invoice.reference = format_reference(invoice.seq, invoice.year);
            invoice.updated_at = now;
            modified += 1;
        }
        modified
    }

    fn max_seq(&self, year: i32) -> i64 {
        self.invoices
            .values()
            .filter(|invoice| invoice.year == year)
            .map(|invoice| invoice.seq)
            .max()
            .unwrap_or(0)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an order, the way the order collaborator saves one.
    pub async fn put_order(&self, order: Order) {
        self.state
            .lock()
            .await
            .orders
            .insert(order.id.clone(), order);
    }

    pub async fn put_client(&self, client: ClientProfile) {
        self.state
            .lock()
            .await
            .clients
            .insert(client.id.clone(), client);
    }

    pub async fn set_company(&self, company: CompanyProfile) {
        self.state.lock().await.company = company;
    }

    /// Overwrite a year's counter, for seeding data that bypassed allocation.
    pub async fn set_counter(&self, year: i32, seq: i64) {
        self.state.lock().await.counters.insert(year, seq);
    }

    pub async fn counter(&self, year: i32) -> Option<i64> {
        self.state.lock().await.counters.get(&year).copied()
    }

    pub async fn invoice_count(&self) -> usize {
        self.state.lock().await.invoices.len()
    }
}

#[async_trait]
impl InvoiceStore for InMemoryStore {
    async fn find_invoice(&self, id: &str) -> Result<Option<Invoice>, FactureError> {
        Ok(self.state.lock().await.invoices.get(id).cloned())
    }

    async fn find_invoice_by_order(
        &self,
        order_id: &str,
    ) -> Result<Option<Invoice>, FactureError> {
        let state = self.state.lock().await;
        Ok(state
            .invoices
            .values()
            .find(|invoice| invoice.order == order_id)
            .cloned())
    }

    async fn find_invoice_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Invoice>, FactureError> {
        let state = self.state.lock().await;
        Ok(state
            .invoices
            .values()
            .find(|invoice| invoice.reference == reference)
            .cloned())
    }

    async fn find_invoices(&self, ids: &[String]) -> Result<Vec<Invoice>, FactureError> {
        let state = self.state.lock().await;
        Ok(ids
            .iter()
            .filter_map(|id| state.invoices.get(id).cloned())
            .collect())
    }

    async fn list_invoices(&self, filter: &InvoiceFilter) -> Result<Vec<Invoice>, FactureError> {
        let state = self.state.lock().await;
        let mut invoices: Vec<Invoice> = state
            .invoices
            .values()
            .filter(|invoice| filter.matches(invoice))
            .cloned()
            .collect();
        invoices.sort_by(|a, b| {
            a.issued_at
                .cmp(&b.issued_at)
                .then(a.year.cmp(&b.year))
                .then(a.seq.cmp(&b.seq))
        });
        Ok(invoices)
    }

    async fn insert_invoice(&self, invoice: &Invoice) -> Result<(), FactureError> {
        self.state.lock().await.insert(invoice)
    }

    async fn replace_snapshot(
        &self,
        invoice_id: &str,
        snapshot: &InvoiceSnapshot,
    ) -> Result<bool, FactureError> {
        let mut state = self.state.lock().await;
        match state.invoices.get_mut(invoice_id) {
            Some(invoice) if !invoice.is_frozen() => {
                invoice.snapshot = snapshot.clone();
                invoice.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn cancel_invoice(&self, invoice_id: &str) -> Result<Option<Invoice>, FactureError> {
        let mut state = self.state.lock().await;
        Ok(state.invoices.get_mut(invoice_id).map(|invoice| {
            if invoice.status != InvoiceStatus::Cancelled {
                let now = Utc::now();
                invoice.status = InvoiceStatus::Cancelled;
                invoice.cancelled_at = Some(now);
                invoice.updated_at = now;
            }
            invoice.clone()
        }))
    }

    async fn apply_deletion(&self, plan: &DeletionPlan) -> Result<AppliedDeletion, FactureError> {
        // One lock for the whole plan, so no reader or allocation observes a
        // half-applied deletion.
        let mut state = self.state.lock().await;
        let now = Utc::now();

        let mut applied = AppliedDeletion::default();
        for id in &plan.invoice_ids {
            if state.invoices.remove(id).is_some() {
                applied.deleted += 1;
            }
        }
        for id in &plan.order_ids {
            if let Some(order) = state.orders.get_mut(id) {
                order.has_invoice = false;
                order.order_status = OrderStatus::Cancelled;
                order.updated_at = now;
                applied.orders_updated += 1;
            }
        }
        for (year, deleted_seqs) in &plan.seqs_by_year {
            let modified = state.renumber_year(*year, deleted_seqs);
            let counter_seq = state.max_seq(*year);
            state.counters.insert(*year, counter_seq);
            applied.years.push(YearRenumbering {
                year: *year,
                deleted_seqs: deleted_seqs.clone(),
                modified,
                counter_seq,
            });
        }
        Ok(applied)
    }
}

#[async_trait]
impl CounterStore for InMemoryStore {
    async fn find_and_increment(&self, year: i32) -> Result<SequenceCounter, FactureError> {
        let mut state = self.state.lock().await;
        let seq = state.counters.entry(year).or_insert(0);
        *seq += 1;
        Ok(SequenceCounter { year, seq: *seq })
    }

    async fn issue_numbered(&self, year: i32, issue: IssueFn<'_>) -> Result<Invoice, FactureError> {
        let mut state = self.state.lock().await;
        let previous = state.counters.get(&year).copied().unwrap_or(0);
        let invoice = issue(previous + 1);
        state.insert(&invoice)?;
        state.counters.insert(year, previous + 1);
        Ok(invoice)
    }
}

#[async_trait]
impl OrderStore for InMemoryStore {
    async fn find_order(&self, id: &str) -> Result<Option<Order>, FactureError> {
        Ok(self.state.lock().await.orders.get(id).cloned())
    }

    async fn find_order_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Order>, FactureError> {
        let state = self.state.lock().await;
        Ok(state
            .orders
            .values()
            .find(|order| order.reference == reference)
            .cloned())
    }

    async fn set_has_invoice(
        &self,
        order_id: &str,
        has_invoice: bool,
    ) -> Result<bool, FactureError> {
        let mut state = self.state.lock().await;
        Ok(match state.orders.get_mut(order_id) {
            Some(order) => {
                order.has_invoice = has_invoice;
                order.updated_at = Utc::now();
                true
            }
            None => false,
        })
    }
}

#[async_trait]
impl PartyDirectory for InMemoryStore {
    async fn company(&self) -> Result<CompanyProfile, FactureError> {
        Ok(self.state.lock().await.company.clone())
    }

    async fn client(&self, client_id: &str) -> Result<Option<ClientProfile>, FactureError> {
        Ok(self.state.lock().await.clients.get(client_id).cloned())
    }
}
