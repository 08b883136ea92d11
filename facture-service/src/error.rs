//! Domain errors for invoice numbering, synchronisation and export.

use mongodb::error::{ErrorKind, WriteFailure};
use service_core::error::AppError;

const DUPLICATE_KEY_CODE: i32 = 11000;

#[derive(Debug, thiserror::Error)]
pub enum FactureError {
    #[error("Order {order_id} is not eligible for invoicing (status: {status})")]
    NotEligible {
        order_id: String,
        status: &'static str,
    },

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Invoice not found: {0}")]
    InvoiceNotFound(String),

    /// A unique index rejected a write.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    #[error("Rendering failed for {reference}: {message}")]
    RenderFailed { reference: String, message: String },

    #[error("No invoice matches the export selection")]
    NoMatch,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(anyhow::Error),

    #[error("Render engine unavailable: {0}")]
    RenderEngineUnavailable(String),

    #[error("Archive stream failed: {0}")]
    ArchiveFailed(String),
}

impl FactureError {
    pub fn render_failed(reference: impl Into<String>, message: impl ToString) -> Self {
        FactureError::RenderFailed {
            reference: reference.into(),
            message: message.to_string(),
        }
    }

    /// Errors that abort a whole operation rather than a single item.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FactureError::StoreUnavailable(_)
                | FactureError::RenderEngineUnavailable(_)
                | FactureError::ArchiveFailed(_)
        )
    }
}

pub fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(e)) => e.code == DUPLICATE_KEY_CODE,
        ErrorKind::Command(e) => e.code == DUPLICATE_KEY_CODE,
        _ => false,
    }
}

impl From<mongodb::error::Error> for FactureError {
    fn from(err: mongodb::error::Error) -> Self {
        if is_duplicate_key(&err) {
            FactureError::DuplicateKey(err.to_string())
        } else {
            FactureError::StoreUnavailable(anyhow::Error::new(err))
        }
    }
}

impl From<mongodb::bson::ser::Error> for FactureError {
    fn from(err: mongodb::bson::ser::Error) -> Self {
        FactureError::StoreUnavailable(anyhow::anyhow!("Failed to encode document: {}", err))
    }
}

impl From<FactureError> for AppError {
    fn from(err: FactureError) -> Self {
        match err {
            FactureError::NotEligible { .. } => AppError::Unprocessable(anyhow::anyhow!(err)),
            FactureError::OrderNotFound(_)
            | FactureError::InvoiceNotFound(_)
            | FactureError::NoMatch => AppError::NotFound(anyhow::anyhow!(err)),
            FactureError::DuplicateKey(_) => AppError::Conflict(anyhow::anyhow!(err)),
            FactureError::InvalidRequest(_) => AppError::BadRequest(anyhow::anyhow!(err)),
            FactureError::RenderFailed { .. } => AppError::BadGateway(err.to_string()),
            FactureError::StoreUnavailable(e) => AppError::DatabaseError(e),
            FactureError::RenderEngineUnavailable(msg) | FactureError::ArchiveFailed(msg) => {
                AppError::ServiceUnavailable(msg)
            }
        }
    }
}
