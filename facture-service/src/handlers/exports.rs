use crate::dtos::ExportRequest;
use crate::export::ProgressEvent;
use crate::startup::AppState;
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderName},
    response::{
        sse::{Event, Sse},
        IntoResponse,
    },
    Json,
};
use chrono::Utc;
use futures::{Stream, StreamExt};
use service_core::error::AppError;
use tokio_stream::wrappers::ReceiverStream;
use validator::Validate;

const EXPORT_TOTAL_HEADER: HeaderName = HeaderName::from_static("x-export-total");

/// Stream a zip of rendered documents. The response starts before the
/// rendering ends.
pub async fn export_zip(
    State(state): State<AppState>,
    Json(req): Json<ExportRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;
    let selection = req.selection()?;

    let archive = state
        .exports
        .export_zip(&selection, req.doc_type, req.progress_id.clone())
        .await?;

    let file_name = format!(
        "{}-{}.zip",
        req.doc_type.file_prefix().to_lowercase(),
        Utc::now().format("%Y%m%d-%H%M%S")
    );

    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", file_name),
            ),
            (EXPORT_TOTAL_HEADER, archive.total.to_string()),
        ],
        Body::from_stream(ReceiverStream::new(archive.body)),
    ))
}

/// Server-sent `progress` and `heartbeat` events for one export job.
pub async fn export_events(
    State(state): State<AppState>,
    Path(progress_id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    tracing::debug!(progress_id = %progress_id, "Progress subscriber attached");

    let events = state
        .exports
        .progress()
        .subscribe(&progress_id)
        .map(|event| match event {
            ProgressEvent::Progress(snapshot) => Event::default().event("progress").json_data(snapshot),
            ProgressEvent::Heartbeat => Ok(Event::default().event("heartbeat").data("{}")),
        });

    Sse::new(events)
}
