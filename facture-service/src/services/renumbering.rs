//! Bulk deletion with dense renumbering of the surviving invoices.

use crate::error::FactureError;
use crate::services::store::{DeletionPlan, InvoiceStore};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// New seq of a surviving invoice: shifted down by the number of deleted
/// seqs below it.
pub fn shifted_seq(seq: i64, deleted_seqs: &[i64]) -> i64 {
    seq - deleted_seqs.iter().filter(|d| **d < seq).count() as i64
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct YearRenumbering {
    pub year: i32,
    pub deleted_seqs: Vec<i64>,
    pub modified: u64,
    pub counter_seq: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeletionReport {
    pub requested: usize,
    pub deleted: u64,
    pub orders_updated: u64,
    pub renumbered: Vec<YearRenumbering>,
    pub invalid_ids: Vec<String>,
    pub not_found_ids: Vec<String>,
}

#[derive(Clone)]
pub struct RenumberingEngine {
    invoices: Arc<dyn InvoiceStore>,
}

impl RenumberingEngine {
    pub fn new(invoices: Arc<dyn InvoiceStore>) -> Self {
        Self { invoices }
    }

    /// Delete the given invoices, release their orders and renumber every
    /// touched year so it stays numbered 1..N in the original order.
    #[instrument(skip(self, ids), fields(requested = ids.len()))]
    pub async fn bulk_delete(&self, ids: &[String]) -> Result<DeletionReport, FactureError> {
        let mut report = DeletionReport {
            requested: ids.len(),
            ..Default::default()
        };

        let mut seen = HashSet::new();
        let mut valid_ids = Vec::new();
        for id in ids {
            let id = id.trim();
            if Uuid::parse_str(id).is_err() {
                report.invalid_ids.push(id.to_string());
            } else if seen.insert(id.to_string()) {
                valid_ids.push(id.to_string());
            }
        }

        let targets = self.invoices.find_invoices(&valid_ids).await?;
        let found: HashSet<&str> = targets.iter().map(|inv| inv.id.as_str()).collect();
        report.not_found_ids = valid_ids
            .iter()
            .filter(|id| !found.contains(id.as_str()))
            .cloned()
            .collect();

        if targets.is_empty() {
            tracing::info!("No invoices matched the deletion request");
            return Ok(report);
        }

        let mut plan = DeletionPlan {
            invoice_ids: targets.iter().map(|inv| inv.id.clone()).collect(),
            order_ids: targets.iter().map(|inv| inv.order.clone()).collect(),
            ..Default::default()
        };
        for invoice in &targets {
            plan.seqs_by_year
                .entry(invoice.year)
                .or_default()
                .push(invoice.seq);
        }
        for seqs in plan.seqs_by_year.values_mut() {
            seqs.sort_unstable();
        }

        let applied = self.invoices.apply_deletion(&plan).await?;
        report.deleted = applied.deleted;
        report.orders_updated = applied.orders_updated;

        for year in &applied.years {
            tracing::info!(
                year = year.year,
                deleted = year.deleted_seqs.len(),
                modified = year.modified,
                counter_seq = year.counter_seq,
                "Renumbered invoices"
            );
            metrics::counter!("facture_invoices_renumbered_total").increment(year.modified);
        }
        report.renumbered = applied.years;

        metrics::counter!("facture_invoices_deleted_total").increment(report.deleted);

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shifted_seq_preserves_relative_order() {
        let deleted = [2, 4];
        assert_eq!(shifted_seq(1, &deleted), 1);
        assert_eq!(shifted_seq(3, &deleted), 2);
        assert_eq!(shifted_seq(5, &deleted), 3);
    }

    #[test]
    fn test_shifted_seq_with_unsorted_input() {
        let deleted = [9, 1, 5];
        assert_eq!(shifted_seq(2, &deleted), 1);
        assert_eq!(shifted_seq(6, &deleted), 4);
        assert_eq!(shifted_seq(10, &deleted), 7);
    }
}
