//! Which invoices an export (or a listing) covers.

use crate::error::FactureError;
use crate::models::InvoiceStatus;
use crate::services::store::{InvoiceFilter, InvoiceStore};
use chrono::{DateTime, Days, Months, NaiveDate, NaiveTime, Utc};
use serde::Deserialize;
use std::collections::HashSet;

/// Issue-date window plus optional statuses. `from` and `to` are inclusive
/// calendar days; `month` (`YYYY-MM`) takes precedence over both.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PeriodFilter {
    #[serde(default)]
    pub from: Option<NaiveDate>,
    #[serde(default)]
    pub to: Option<NaiveDate>,
    #[serde(default)]
    pub month: Option<String>,
    #[serde(default)]
    pub statuses: Vec<InvoiceStatus>,
}

fn start_of(day: NaiveDate) -> DateTime<Utc> {
    day.and_time(NaiveTime::default()).and_utc()
}

fn invalid(message: impl Into<String>) -> FactureError {
    FactureError::InvalidRequest(message.into())
}

impl PeriodFilter {
    pub fn to_invoice_filter(&self) -> Result<InvoiceFilter, FactureError> {
        let (from, to) = match &self.month {
            Some(month) => {
                let first = NaiveDate::parse_from_str(&format!("{}-01", month.trim()), "%Y-%m-%d")
                    .map_err(|_| invalid(format!("Invalid month '{}', expected YYYY-MM", month)))?;
                let next = first
                    .checked_add_months(Months::new(1))
                    .ok_or_else(|| invalid(format!("Month out of range: {}", month)))?;
                (Some(start_of(first)), Some(start_of(next)))
            }
            None => {
                if let (Some(from), Some(to)) = (self.from, self.to) {
                    if from > to {
                        return Err(invalid("'from' must not be after 'to'"));
                    }
                }
                let to = match self.to {
                    Some(day) => Some(start_of(
                        day.checked_add_days(Days::new(1))
                            .ok_or_else(|| invalid("'to' out of range"))?,
                    )),
                    None => None,
                };
                (self.from.map(start_of), to)
            }
        };

        Ok(InvoiceFilter {
            from,
            to,
            statuses: self.statuses.clone(),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportSelection {
    References(Vec<String>),
    Filter(PeriodFilter),
}

impl ExportSelection {
    /// References to export, in archive order. Explicit lists keep the
    /// caller's order without repeats; filters are ordered by issue time.
    pub async fn resolve(&self, invoices: &dyn InvoiceStore) -> Result<Vec<String>, FactureError> {
        let references = match self {
            ExportSelection::References(references) => {
                let mut seen = HashSet::new();
                references
                    .iter()
                    .map(|r| r.trim())
                    .filter(|r| !r.is_empty() && seen.insert(r.to_string()))
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            }
            ExportSelection::Filter(period) => invoices
                .list_invoices(&period.to_invoice_filter()?)
                .await?
                .into_iter()
                .map(|invoice| invoice.reference)
                .collect(),
        };

        if references.is_empty() {
            return Err(FactureError::NoMatch);
        }
        Ok(references)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::memory::InMemoryStore;

    #[test]
    fn test_month_window() {
        let filter = PeriodFilter {
            month: Some("2024-12".into()),
            ..Default::default()
        }
        .to_invoice_filter()
        .unwrap();
        assert_eq!(filter.from.unwrap().to_rfc3339(), "2024-12-01T00:00:00+00:00");
        assert_eq!(filter.to.unwrap().to_rfc3339(), "2025-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_to_is_inclusive() {
        let filter = PeriodFilter {
            from: NaiveDate::from_ymd_opt(2025, 3, 1),
            to: NaiveDate::from_ymd_opt(2025, 3, 31),
            ..Default::default()
        }
        .to_invoice_filter()
        .unwrap();
        assert_eq!(filter.to.unwrap().to_rfc3339(), "2025-04-01T00:00:00+00:00");
    }

    #[test]
    fn test_bad_month_is_rejected() {
        let err = PeriodFilter {
            month: Some("2025-13".into()),
            ..Default::default()
        }
        .to_invoice_filter()
        .unwrap_err();
        assert!(matches!(err, FactureError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_empty_selection_is_no_match() {
        let store = InMemoryStore::new();
        let explicit = ExportSelection::References(vec![" ".into()]);
        assert!(matches!(
            explicit.resolve(&store).await,
            Err(FactureError::NoMatch)
        ));
        let filtered = ExportSelection::Filter(PeriodFilter::default());
        assert!(matches!(
            filtered.resolve(&store).await,
            Err(FactureError::NoMatch)
        ));
    }

    #[tokio::test]
    async fn test_explicit_references_are_deduplicated_in_order() {
        let store = InMemoryStore::new();
        let selection = ExportSelection::References(vec![
            "FC-3-2025".into(),
            "FC-1-2025".into(),
            "FC-3-2025".into(),
        ]);
        assert_eq!(
            selection.resolve(&store).await.unwrap(),
            vec!["FC-3-2025".to_string(), "FC-1-2025".to_string()]
        );
    }
}
