//! Payment transaction model and its status state machine.

use mongodb::bson::DateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::ProviderKind;

/// Lifecycle of a single payment attempt.
///
/// `pending → processing → completed | failed | cancelled`, with `completed → refunded`
/// as the only move out of a finished payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
    Refunded,
}

impl TransactionStatus {
    pub const ALL: [TransactionStatus; 6] = [
        Self::Pending,
        Self::Processing,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
        Self::Refunded,
    ];

    /// Get string representation for storage filters and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Refunded => "refunded",
        }
    }

    /// Whether the gateway has reached a final answer for this attempt.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Processing)
    }

    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        use TransactionStatus::*;
        matches!(
            (self, next),
            (Pending, Processing | Completed | Failed | Cancelled)
                | (Processing, Completed | Failed | Cancelled)
                | (Completed, Refunded)
        )
    }

    /// States a stored row may be in for a write to `self` to apply.
    pub fn predecessors(&self) -> Vec<TransactionStatus> {
        Self::ALL
            .into_iter()
            .filter(|from| from.can_transition_to(*self))
            .collect()
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("Invalid transaction status: {}", s))
    }
}

/// Provider-specific data the client needs to finish a payment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum PaymentData {
    /// Signed redirect to the hosted cashier page.
    WalletA { page_url: String },
    /// Native QR order.
    WalletB { prepay_id: String, code_url: String },
    /// Payment intent confirmed client-side with `client_secret`.
    Card {
        intent_id: String,
        client_secret: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        publishable_key: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentTransaction {
    #[serde(rename = "_id")]
    pub id: String,
    pub order_id: String,
    /// `None` for guest checkout.
    pub user_id: Option<String>,
    pub payment_method_id: String,
    pub amount: Decimal,
    /// Pending and completed refunds held against `amount`.
    #[serde(default)]
    pub refund_reserved: Decimal,
    pub currency: String,
    pub provider: ProviderKind,
    pub status: TransactionStatus,
    pub provider_transaction_id: Option<String>,
    pub payment_url: Option<String>,
    pub qr_code_url: Option<String>,
    pub payment_data: Option<PaymentData>,
    pub expires_at: DateTime,
    pub paid_at: Option<DateTime>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

impl PaymentTransaction {
    /// Non-terminal and past its checkout window. Advisory only: the stored
    /// status is left untouched.
    pub fn is_expired(&self, now: DateTime) -> bool {
        !self.status.is_terminal() && self.expires_at.timestamp_millis() <= now.timestamp_millis()
    }
}
