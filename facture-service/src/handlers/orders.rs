use crate::startup::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use service_core::error::AppError;

/// Called by the order collaborator after every order save. Sync problems
/// never fail the caller's write: they are logged and reported as `error`.
pub async fn order_saved(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let outcome = match state.stores.orders.find_order(&order_id).await {
        Ok(Some(order)) => state.sync.on_order_saved(&order).await,
        Ok(None) => {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Order not found: {}",
                order_id
            )))
        }
        Err(e) => {
            tracing::error!(order_id = %order_id, error = %e, "Failed to load saved order");
            None
        }
    };

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "order_id": order_id,
            "outcome": outcome.map(|o| o.as_str()).unwrap_or("error"),
        })),
    ))
}
