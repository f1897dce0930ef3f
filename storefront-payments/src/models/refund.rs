use mongodb::bson::DateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefundStatus {
    Pending,
    Completed,
    Failed,
}

impl RefundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RefundStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A refund against a completed transaction. Partial refunds are allowed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRefund {
    #[serde(rename = "_id")]
    pub id: String,
    pub transaction_id: String,
    pub order_id: String,
    pub user_id: Option<String>,
    pub amount: Decimal,
    pub reason: Option<String>,
    pub status: RefundStatus,
    pub provider_refund_id: Option<String>,
    pub processed_at: Option<DateTime>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}
