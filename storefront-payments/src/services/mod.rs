pub mod ledger;
pub mod memory;
pub mod metrics;
pub mod orchestrator;
pub mod orders;
pub mod webhooks;

pub use ledger::{MongoLedger, RefundReservation, TransactionLedger};
pub use memory::{MemoryLedger, MemoryOrderDirectory};
pub use metrics::{get_metrics, init_metrics};
pub use orchestrator::{CreatePayment, PaymentOrchestrator, RefundPayment, RefundResult};
pub use orders::{MongoOrderDirectory, OrderDirectory};
pub use webhooks::WebhookReceiver;
