use crate::error::FactureError;
use crate::export::PeriodFilter;
use crate::models::{Invoice, InvoiceSnapshot, InvoiceStatus};
use crate::rendering::DocType;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Serialize, Deserialize)]
pub struct InvoiceResponse {
    pub id: String,
    pub order_id: String,
    pub order_reference: String,
    pub year: i32,
    pub seq: i64,
    pub reference: String,
    pub status: InvoiceStatus,
    pub snapshot: InvoiceSnapshot,
    pub issued_at: String,
    pub paid_at: Option<String>,
    pub cancelled_at: Option<String>,
    pub updated_at: String,
}

impl From<Invoice> for InvoiceResponse {
    fn from(invoice: Invoice) -> Self {
        Self {
            id: invoice.id,
            order_id: invoice.order,
            order_reference: invoice.order_reference,
            year: invoice.year,
            seq: invoice.seq,
            reference: invoice.reference,
            status: invoice.status,
            snapshot: invoice.snapshot,
            issued_at: invoice.issued_at.to_rfc3339(),
            paid_at: invoice.paid_at.map(|d| d.to_rfc3339()),
            cancelled_at: invoice.cancelled_at.map(|d| d.to_rfc3339()),
            updated_at: invoice.updated_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateInvoiceResponse {
    /// False when the order already had an invoice.
    pub created: bool,
    pub invoice: InvoiceResponse,
}

#[derive(Debug, Default, Deserialize)]
pub struct InvoiceListParams {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub month: Option<String>,
    /// Comma separated, e.g. `paid,cancelled`.
    pub status: Option<String>,
}

impl InvoiceListParams {
    pub fn period(&self) -> Result<PeriodFilter, FactureError> {
        let statuses = match &self.status {
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    InvoiceStatus::from_string(s).ok_or_else(|| {
                        FactureError::InvalidRequest(format!("Unknown invoice status: {}", s))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };

        Ok(PeriodFilter {
            from: self.from,
            to: self.to,
            month: self.month.clone(),
            statuses,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InvoiceListResponse {
    pub invoices: Vec<InvoiceResponse>,
    pub total: usize,
}

#[derive(Debug, Deserialize, Validate)]
pub struct BulkDeleteRequest {
    #[validate(length(min = 1, max = 1000, message = "Between 1 and 1000 ids are required"))]
    pub ids: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PdfParams {
    #[serde(default)]
    pub doc_type: DocType,
}
