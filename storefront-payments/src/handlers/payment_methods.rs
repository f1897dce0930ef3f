use axum::{extract::State, Json};
use service_core::error::AppError;

use crate::dtos::PaymentMethodsResponse;
use crate::startup::AppState;

/// Active payment methods in display order.
pub async fn list_payment_methods(
    State(state): State<AppState>,
) -> Result<Json<PaymentMethodsResponse>, AppError> {
    let methods = state.orchestrator.list_payment_methods().await?;

    Ok(Json(PaymentMethodsResponse {
        success: true,
        payment_methods: methods.into_iter().map(Into::into).collect(),
    }))
}
