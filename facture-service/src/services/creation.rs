//! Issuing an invoice from an eligible order.

use crate::error::FactureError;
use crate::models::Invoice;
use crate::services::sequence::SequenceAllocator;
use crate::services::store::{InvoiceStore, OrderStore};
use crate::services::sync::OrderInvoiceSync;
use chrono::{Datelike, Utc};
use std::sync::Arc;
use tracing::instrument;

#[derive(Debug, Clone)]
pub enum CreationOutcome {
    Created(Invoice),
    /// The order already had an invoice; it is returned unchanged.
    AlreadyExists(Invoice),
}

impl CreationOutcome {
    pub fn invoice(&self) -> &Invoice {
        match self {
            CreationOutcome::Created(invoice) | CreationOutcome::AlreadyExists(invoice) => invoice,
        }
    }

    pub fn into_invoice(self) -> Invoice {
        match self {
            CreationOutcome::Created(invoice) | CreationOutcome::AlreadyExists(invoice) => invoice,
        }
    }

    pub fn was_created(&self) -> bool {
        matches!(self, CreationOutcome::Created(_))
    }
}

#[derive(Clone)]
pub struct InvoiceCreationService {
    orders: Arc<dyn OrderStore>,
    invoices: Arc<dyn InvoiceStore>,
    allocator: SequenceAllocator,
    sync: OrderInvoiceSync,
}

impl InvoiceCreationService {
    pub fn new(
        orders: Arc<dyn OrderStore>,
        invoices: Arc<dyn InvoiceStore>,
        allocator: SequenceAllocator,
        sync: OrderInvoiceSync,
    ) -> Self {
        Self {
            orders,
            invoices,
            allocator,
            sync,
        }
    }

    /// Idempotent: a second call for the same order, including one racing
    /// the first, yields the invoice the first call stored.
    #[instrument(skip(self))]
    pub async fn create_from_order(&self, order_id: &str) -> Result<CreationOutcome, FactureError> {
        let order = self
            .orders
            .find_order(order_id)
            .await?
            .ok_or_else(|| FactureError::OrderNotFound(order_id.to_string()))?;

        if !order.order_status.is_invoice_eligible() {
            return Err(FactureError::NotEligible {
                order_id: order.id.clone(),
                status: order.order_status.as_str(),
            });
        }

        if let Some(existing) = self.invoices.find_invoice_by_order(&order.id).await? {
            tracing::info!(reference = %existing.reference, "Order already invoiced");
            self.sync.on_invoice_created(&existing).await?;
            return Ok(CreationOutcome::AlreadyExists(existing));
        }

        let now = Utc::now();
        let issue = |seq: i64| Invoice::issue(&order, seq, now);

        let invoice = match self.allocator.issue(now.year(), &issue).await {
            Ok(invoice) => invoice,
            // The unique index on `order` settles concurrent creation: the
            // loser adopts the winner's invoice and its seq is handed back.
            Err(FactureError::DuplicateKey(detail)) => {
                match self.invoices.find_invoice_by_order(&order.id).await? {
                    Some(existing) => {
                        tracing::warn!(
                            reference = %existing.reference,
                            "Lost invoice creation race, returning existing invoice"
                        );
                        self.sync.on_invoice_created(&existing).await?;
                        return Ok(CreationOutcome::AlreadyExists(existing));
                    }
                    None => return Err(FactureError::DuplicateKey(detail)),
                }
            }
            Err(e) => return Err(e),
        };

        self.sync.on_invoice_created(&invoice).await?;

        metrics::counter!("facture_invoices_created_total").increment(1);
        tracing::info!(
            invoice_id = %invoice.id,
            reference = %invoice.reference,
            grand_total = %invoice.snapshot.totals.grand_total_incl_tax,
            "Invoice created"
        );

        Ok(CreationOutcome::Created(invoice))
    }
}
