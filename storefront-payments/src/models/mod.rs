pub mod order;
pub mod payment_method;
pub mod refund;
pub mod transaction;

pub use order::OrderSnapshot;
pub use payment_method::{PaymentMethod, ProviderKind};
pub use refund::{PaymentRefund, RefundStatus};
pub use transaction::{PaymentData, PaymentTransaction, TransactionStatus};

/// Ledger access scope derived from the caller.
///
/// Customers only see their own rows and guests only see rows without an
/// owner. `Service` is the elevated scope used by webhook processing and
/// admin tooling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessScope {
    Customer(String),
    Guest,
    Service,
}

impl AccessScope {
    /// Whether a row owned by `owner` is visible in this scope.
    pub fn permits(&self, owner: Option<&str>) -> bool {
        match (self, owner) {
            (AccessScope::Service, _) => true,
            (AccessScope::Customer(user_id), Some(owner)) => user_id == owner,
            (AccessScope::Guest, None) => true,
            _ => false,
        }
    }
}
