//! Checkout payment handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use validator::Validate;

use crate::dtos::{
    ConfirmPaymentRequest, CreatePaymentRequest, CreatePaymentResponse, PaymentStatusResponse,
};
use crate::middleware::CallerContext;
use crate::startup::AppState;

/// Open a payment for an order with the chosen provider.
pub async fn create_payment(
    State(state): State<AppState>,
    caller: CallerContext,
    Json(request): Json<CreatePaymentRequest>,
) -> Result<(StatusCode, Json<CreatePaymentResponse>), AppError> {
    request.validate()?;

    tracing::info!(
        order_id = %request.order_id,
        provider = %request.payment_method,
        guest = caller.user_id.is_none(),
        "Creating payment"
    );

    // Checkout is always scoped to the shopper, admins included.
    let transaction = state
        .orchestrator
        .create_payment(&caller.customer_scope(), request.into())
        .await?;

    Ok((StatusCode::CREATED, Json(transaction.into())))
}

/// Current payment status, reconciled with the gateway while pending.
pub async fn get_payment_status(
    State(state): State<AppState>,
    caller: CallerContext,
    Path(transaction_id): Path<String>,
) -> Result<Json<PaymentStatusResponse>, AppError> {
    let transaction = state
        .orchestrator
        .check_payment_status(&caller.scope(), &transaction_id)
        .await?;

    Ok(Json(transaction.into()))
}

/// Confirm a card payment intent with a tokenized payment method.
pub async fn confirm_payment(
    State(state): State<AppState>,
    caller: CallerContext,
    Path(transaction_id): Path<String>,
    Json(request): Json<ConfirmPaymentRequest>,
) -> Result<Json<PaymentStatusResponse>, AppError> {
    request.validate()?;

    let transaction = state
        .orchestrator
        .confirm_card_payment(
            &caller.customer_scope(),
            &transaction_id,
            &request.payment_method_id,
        )
        .await?;

    Ok(Json(transaction.into()))
}
