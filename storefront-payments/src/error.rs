use rust_decimal::Decimal;
use service_core::error::AppError;
use thiserror::Error;

use crate::models::TransactionStatus;
use crate::providers::GatewayError;

/// Errors surfaced by the payment orchestrator and webhook receiver.
#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("Invalid payment method: {0}")]
    InvalidPaymentMethod(String),

    #[error("Order not found or access denied")]
    OrderNotFound,

    #[error("Order {0} is already paid")]
    OrderAlreadyPaid(String),

    #[error("Amount mismatch: order total is {expected}, received {received}")]
    AmountMismatch { expected: Decimal, received: Decimal },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Transaction not found")]
    TransactionNotFound,

    #[error("Refund not allowed for a transaction in {0} status")]
    RefundNotAllowed(TransactionStatus),

    #[error("Invalid refund amount: {0}")]
    InvalidRefundAmount(String),

    #[error("Payment provider not available: {0}")]
    ProviderUnavailable(String),

    #[error("Operation not supported: {0}")]
    UnsupportedOperation(String),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("Webhook rejected: {0}")]
    WebhookRejected(String),

    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl From<mongodb::error::Error> for PaymentError {
    fn from(err: mongodb::error::Error) -> Self {
        PaymentError::Storage(anyhow::Error::new(err))
    }
}

impl From<PaymentError> for AppError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::OrderNotFound | PaymentError::TransactionNotFound => {
                AppError::NotFound(anyhow::anyhow!(err.to_string()))
            }
            PaymentError::InvalidPaymentMethod(_)
            | PaymentError::OrderAlreadyPaid(_)
            | PaymentError::AmountMismatch { .. }
            | PaymentError::InvalidAmount(_)
            | PaymentError::RefundNotAllowed(_)
            | PaymentError::InvalidRefundAmount(_)
            | PaymentError::ProviderUnavailable(_)
            | PaymentError::UnsupportedOperation(_) => {
                AppError::BadRequest(anyhow::anyhow!(err.to_string()))
            }
            PaymentError::Gateway(gateway) => AppError::BadGateway(gateway.to_string()),
            PaymentError::WebhookRejected(_) => {
                AppError::Unauthorized(anyhow::anyhow!(err.to_string()))
            }
            PaymentError::Storage(source) => AppError::DatabaseError(source),
        }
    }
}
