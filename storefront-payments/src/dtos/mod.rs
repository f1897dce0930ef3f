use mongodb::bson::DateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::{
    PaymentData, PaymentMethod, PaymentRefund, PaymentTransaction, ProviderKind, RefundStatus,
    TransactionStatus,
};
use crate::services::{CreatePayment, RefundPayment, RefundResult};

#[derive(Debug, Deserialize, Validate)]
pub struct CreatePaymentRequest {
    #[validate(length(min = 1, max = 64, message = "order_id is required"))]
    pub order_id: String,
    #[validate(length(min = 1, max = 32, message = "payment_method is required"))]
    pub payment_method: String,
    pub amount: Decimal,
    #[validate(length(equal = 3, message = "currency must be an ISO 4217 code"))]
    pub currency: Option<String>,
    #[validate(url(message = "return_url must be a URL"))]
    pub return_url: Option<String>,
    #[validate(url(message = "cancel_url must be a URL"))]
    pub cancel_url: Option<String>,
}

impl From<CreatePaymentRequest> for CreatePayment {
    fn from(request: CreatePaymentRequest) -> Self {
        Self {
            order_id: request.order_id,
            payment_method: request.payment_method,
            amount: request.amount,
            currency: request.currency,
            return_url: request.return_url,
            cancel_url: request.cancel_url,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CreatePaymentResponse {
    pub success: bool,
    pub transaction_id: String,
    pub status: TransactionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr_code_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_data: Option<PaymentData>,
    pub expires_at: String,
}

impl From<PaymentTransaction> for CreatePaymentResponse {
    fn from(transaction: PaymentTransaction) -> Self {
        Self {
            success: true,
            expires_at: rfc3339(transaction.expires_at),
            transaction_id: transaction.id,
            status: transaction.status,
            payment_url: transaction.payment_url,
            qr_code_url: transaction.qr_code_url,
            payment_data: transaction.payment_data,
        }
    }
}

/// Transaction as exposed to callers.
#[derive(Debug, Serialize)]
pub struct TransactionView {
    pub id: String,
    pub order_id: String,
    pub provider: ProviderKind,
    pub amount: Decimal,
    pub currency: String,
    pub status: TransactionStatus,
    /// Past `expires_at` without reaching a final status.
    pub expired: bool,
    pub provider_transaction_id: Option<String>,
    pub payment_url: Option<String>,
    pub qr_code_url: Option<String>,
    pub payment_data: Option<PaymentData>,
    pub expires_at: String,
    pub paid_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<PaymentTransaction> for TransactionView {
    fn from(transaction: PaymentTransaction) -> Self {
        Self {
            expired: transaction.is_expired(DateTime::now()),
            expires_at: rfc3339(transaction.expires_at),
            paid_at: transaction.paid_at.map(rfc3339),
            created_at: rfc3339(transaction.created_at),
            updated_at: rfc3339(transaction.updated_at),
            id: transaction.id,
            order_id: transaction.order_id,
            provider: transaction.provider,
            amount: transaction.amount,
            currency: transaction.currency,
            status: transaction.status,
            provider_transaction_id: transaction.provider_transaction_id,
            payment_url: transaction.payment_url,
            qr_code_url: transaction.qr_code_url,
            payment_data: transaction.payment_data,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PaymentStatusResponse {
    pub success: bool,
    pub status: TransactionStatus,
    pub transaction: TransactionView,
}

impl From<PaymentTransaction> for PaymentStatusResponse {
    fn from(transaction: PaymentTransaction) -> Self {
        Self {
            success: true,
            status: transaction.status,
            transaction: transaction.into(),
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct ConfirmPaymentRequest {
    /// Tokenized card payment method from the client SDK.
    #[validate(length(min = 1, max = 255, message = "payment_method_id is required"))]
    pub payment_method_id: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RefundRequest {
    #[validate(length(min = 1, max = 64, message = "transaction_id is required"))]
    pub transaction_id: String,
    pub amount: Option<Decimal>,
    #[validate(length(max = 500, message = "reason must be at most 500 characters"))]
    pub reason: Option<String>,
}

impl From<RefundRequest> for RefundPayment {
    fn from(request: RefundRequest) -> Self {
        Self {
            transaction_id: request.transaction_id,
            amount: request.amount,
            reason: request.reason,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RefundView {
    pub id: String,
    pub transaction_id: String,
    pub amount: Decimal,
    pub reason: Option<String>,
    pub status: RefundStatus,
    pub provider_refund_id: Option<String>,
    pub processed_at: Option<String>,
}

impl From<PaymentRefund> for RefundView {
    fn from(refund: PaymentRefund) -> Self {
        Self {
            processed_at: refund.processed_at.map(rfc3339),
            id: refund.id,
            transaction_id: refund.transaction_id,
            amount: refund.amount,
            reason: refund.reason,
            status: refund.status,
            provider_refund_id: refund.provider_refund_id,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RefundResponse {
    pub success: bool,
    pub refund_id: String,
    pub transaction_status: TransactionStatus,
    pub refund: RefundView,
}

impl From<RefundResult> for RefundResponse {
    fn from(result: RefundResult) -> Self {
        Self {
            success: true,
            refund_id: result.refund.id.clone(),
            transaction_status: result.transaction_status,
            refund: result.refund.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PaymentMethodView {
    pub id: String,
    pub name: String,
    pub display_name: String,
    pub sort_order: i32,
}

impl From<PaymentMethod> for PaymentMethodView {
    fn from(method: PaymentMethod) -> Self {
        Self {
            id: method.id,
            name: method.name,
            display_name: method.display_name,
            sort_order: method.sort_order,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PaymentMethodsResponse {
    pub success: bool,
    pub payment_methods: Vec<PaymentMethodView>,
}

fn rfc3339(at: DateTime) -> String {
    at.to_chrono().to_rfc3339()
}
