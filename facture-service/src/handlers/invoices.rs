use crate::dtos::{
    BulkDeleteRequest, CreateInvoiceResponse, InvoiceListParams, InvoiceListResponse,
    InvoiceResponse, PdfParams,
};
use crate::error::FactureError;
use crate::services::DeletionReport;
use crate::startup::AppState;
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use validator::Validate;

/// Issue the invoice for a handed-over order. 201 when created, 200 when the
/// order already had one.
pub async fn create_invoice(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> Result<(StatusCode, Json<CreateInvoiceResponse>), AppError> {
    let outcome = state.creation.create_from_order(&order_id).await?;
    let created = outcome.was_created();
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };

    Ok((
        status,
        Json(CreateInvoiceResponse {
            created,
            invoice: InvoiceResponse::from(outcome.into_invoice()),
        }),
    ))
}

pub async fn list_invoices(
    State(state): State<AppState>,
    Query(params): Query<InvoiceListParams>,
) -> Result<Json<InvoiceListResponse>, AppError> {
    let filter = params.period()?.to_invoice_filter()?;
    let invoices: Vec<InvoiceResponse> = state
        .stores
        .invoices
        .list_invoices(&filter)
        .await?
        .into_iter()
        .map(InvoiceResponse::from)
        .collect();

    Ok(Json(InvoiceListResponse {
        total: invoices.len(),
        invoices,
    }))
}

pub async fn get_invoice(
    State(state): State<AppState>,
    Path(invoice_id): Path<String>,
) -> Result<Json<InvoiceResponse>, AppError> {
    let invoice = state
        .stores
        .invoices
        .find_invoice(&invoice_id)
        .await?
        .ok_or_else(|| FactureError::InvoiceNotFound(invoice_id.clone()))?;

    Ok(Json(InvoiceResponse::from(invoice)))
}

/// Idempotent. A cancelled invoice no longer follows its order.
pub async fn cancel_invoice(
    State(state): State<AppState>,
    Path(invoice_id): Path<String>,
) -> Result<Json<InvoiceResponse>, AppError> {
    let invoice = state
        .stores
        .invoices
        .cancel_invoice(&invoice_id)
        .await?
        .ok_or_else(|| FactureError::InvoiceNotFound(invoice_id.clone()))?;

    tracing::info!(
        invoice_id = %invoice.id,
        reference = %invoice.reference,
        "Invoice cancelled"
    );
    metrics::counter!("facture_invoices_cancelled_total").increment(1);

    Ok(Json(InvoiceResponse::from(invoice)))
}

pub async fn bulk_delete(
    State(state): State<AppState>,
    Json(req): Json<BulkDeleteRequest>,
) -> Result<Json<DeletionReport>, AppError> {
    req.validate()?;
    let report = state.renumbering.bulk_delete(&req.ids).await?;
    Ok(Json(report))
}

pub async fn download_pdf(
    State(state): State<AppState>,
    Path(reference): Path<String>,
    Query(params): Query<PdfParams>,
) -> Result<impl IntoResponse, AppError> {
    state
        .stores
        .invoices
        .find_invoice_by_reference(&reference)
        .await?
        .ok_or_else(|| FactureError::InvoiceNotFound(reference.clone()))?;

    let bytes = state.renderer.render(&reference, params.doc_type).await?;

    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!(
                    "attachment; filename=\"{}\"",
                    params.doc_type.file_name(&reference)
                ),
            ),
        ],
        bytes,
    ))
}
