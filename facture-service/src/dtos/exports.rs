use crate::error::FactureError;
use crate::export::{ExportSelection, PeriodFilter};
use crate::rendering::DocType;
use serde::Deserialize;
use validator::Validate;

/// Body of `POST /exports/zip`. Exactly one of `references` and `filter`.
#[derive(Debug, Deserialize, Validate)]
pub struct ExportRequest {
    #[serde(default)]
    pub references: Option<Vec<String>>,
    #[serde(default)]
    pub filter: Option<PeriodFilter>,
    #[serde(default)]
    pub doc_type: DocType,
    #[validate(length(min = 1, max = 128, message = "progress_id must be 1 to 128 characters"))]
    pub progress_id: Option<String>,
}

impl ExportRequest {
    pub fn selection(&self) -> Result<ExportSelection, FactureError> {
        match (&self.references, &self.filter) {
            (Some(references), None) => Ok(ExportSelection::References(references.clone())),
            (None, Some(filter)) => Ok(ExportSelection::Filter(filter.clone())),
            (Some(_), Some(_)) => Err(FactureError::InvalidRequest(
                "Provide either references or filter, not both".to_string(),
            )),
            (None, None) => Err(FactureError::InvalidRequest(
                "Provide references or filter".to_string(),
            )),
        }
    }
}
