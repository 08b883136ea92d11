//! Keeps an issued invoice's informational content in step with its order.

use crate::error::FactureError;
use crate::models::{Invoice, InvoiceSnapshot, Order};
use crate::services::store::{InvoiceStore, OrderStore};
use std::sync::Arc;
use tracing::instrument;

/// What a sync pass did with an order save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The order is not flagged as invoiced.
    NotInvoiced,
    /// Flagged, but no invoice exists yet.
    NoInvoice,
    /// The invoice is cancelled and may not change.
    Frozen,
    /// The snapshot already matches the order.
    Unchanged,
    Updated,
}

impl SyncOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOutcome::NotInvoiced => "not_invoiced",
            SyncOutcome::NoInvoice => "no_invoice",
            SyncOutcome::Frozen => "frozen",
            SyncOutcome::Unchanged => "unchanged",
            SyncOutcome::Updated => "updated",
        }
    }
}

#[derive(Clone)]
pub struct OrderInvoiceSync {
    invoices: Arc<dyn InvoiceStore>,
    orders: Arc<dyn OrderStore>,
}

impl OrderInvoiceSync {
    pub fn new(invoices: Arc<dyn InvoiceStore>, orders: Arc<dyn OrderStore>) -> Self {
        Self { invoices, orders }
    }

    /// Order save hook. Failures are logged and swallowed so they never
    /// fail the write that triggered them.
    pub async fn on_order_saved(&self, order: &Order) -> Option<SyncOutcome> {
        match self.sync_order(order).await {
            Ok(outcome) => {
                metrics::counter!("facture_sync_total", "outcome" => outcome.as_str())
                    .increment(1);
                Some(outcome)
            }
            Err(e) => {
                metrics::counter!("facture_sync_total", "outcome" => "error").increment(1);
                tracing::error!(
                    order_id = %order.id,
                    error = %e,
                    "Failed to synchronise invoice with order"
                );
                None
            }
        }
    }

    /// Rebuild the snapshot of the order's invoice from the current order
    /// state. Numbering fields are never touched.
    #[instrument(skip(self, order), fields(order_id = %order.id))]
    pub async fn sync_order(&self, order: &Order) -> Result<SyncOutcome, FactureError> {
        if !order.has_invoice {
            return Ok(SyncOutcome::NotInvoiced);
        }

        let Some(invoice) = self.invoices.find_invoice_by_order(&order.id).await? else {
            return Ok(SyncOutcome::NoInvoice);
        };

        if invoice.is_frozen() {
            tracing::debug!(reference = %invoice.reference, "Invoice cancelled, skipping sync");
            return Ok(SyncOutcome::Frozen);
        }

        let snapshot = InvoiceSnapshot::from_order(order);
        if snapshot == invoice.snapshot {
            return Ok(SyncOutcome::Unchanged);
        }

        // The store re-checks the status, so a cancellation that lands
        // between the read and this write still wins.
        if self
            .invoices
            .replace_snapshot(&invoice.id, &snapshot)
            .await?
        {
            tracing::info!(reference = %invoice.reference, "Invoice snapshot updated from order");
            Ok(SyncOutcome::Updated)
        } else {
            Ok(SyncOutcome::Frozen)
        }
    }

    /// Post-create hook: mark the originating order as invoiced.
    #[instrument(skip(self, invoice), fields(order_id = %invoice.order, reference = %invoice.reference))]
    pub async fn on_invoice_created(&self, invoice: &Invoice) -> Result<(), FactureError> {
        if !self.orders.set_has_invoice(&invoice.order, true).await? {
            tracing::warn!("Invoiced order no longer exists");
        }
        Ok(())
    }
}
