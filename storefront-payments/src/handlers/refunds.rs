use axum::{extract::State, http::StatusCode, Json};
use service_core::error::AppError;
use validator::Validate;

use crate::dtos::{RefundRequest, RefundResponse};
use crate::middleware::CallerContext;
use crate::startup::AppState;

/// Refund a completed transaction, fully or partially.
///
/// Admin callers may refund any transaction; shoppers only their own.
pub async fn create_refund(
    State(state): State<AppState>,
    caller: CallerContext,
    Json(request): Json<RefundRequest>,
) -> Result<(StatusCode, Json<RefundResponse>), AppError> {
    request.validate()?;

    tracing::info!(
        transaction_id = %request.transaction_id,
        admin = caller.is_admin,
        "Processing refund"
    );

    let result = state
        .orchestrator
        .process_refund(&caller.scope(), request.into())
        .await?;

    Ok((StatusCode::CREATED, Json(result.into())))
}
