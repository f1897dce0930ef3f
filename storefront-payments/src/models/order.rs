use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// `payment_status` value written once a transaction completes.
pub const PAID: &str = "paid";

/// The slice of an externally-owned order that checkout needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderSnapshot {
    #[serde(rename = "_id")]
    pub id: String,
    /// `None` for orders placed by guests.
    pub user_id: Option<String>,
    pub total_amount: Decimal,
    #[serde(default)]
    pub payment_status: Option<String>,
    #[serde(default)]
    pub payment_transaction_id: Option<String>,
}

impl OrderSnapshot {
    pub fn is_paid(&self) -> bool {
        self.payment_status.as_deref() == Some(PAID)
    }
}
