//! Payment gateway adapters.
//!
//! Each gateway client translates the uniform request/response types below
//! into its own wire format and signing scheme. [`Provider`] is the closed set
//! of adapters; [`ProviderRegistry`] resolves a provider key to a configured
//! instance.

pub mod card;
pub mod error;
pub mod signing;
pub mod wallet_a;
pub mod wallet_b;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::time::Duration;

use crate::config::ProvidersConfig;
use crate::models::{PaymentData, ProviderKind, TransactionStatus};

pub use card::CardClient;
pub use error::GatewayError;
pub use wallet_a::WalletAClient;
pub use wallet_b::WalletBClient;

/// Request to open a payment with a gateway.
#[derive(Debug, Clone)]
pub struct GatewayPaymentRequest {
    /// Our transaction id; doubles as the gateway idempotency key / merchant order number.
    pub transaction_id: String,
    pub order_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub subject: String,
    pub return_url: String,
    pub cancel_url: String,
}

/// What the gateway handed back when the payment was opened.
#[derive(Debug, Clone, Default)]
pub struct GatewayPayment {
    pub provider_transaction_id: Option<String>,
    pub payment_url: Option<String>,
    pub qr_code_url: Option<String>,
    pub payment_data: Option<PaymentData>,
    /// `Processing` when the gateway already acknowledged the order.
    pub status: Option<TransactionStatus>,
}

/// Identifies a payment at the gateway.
#[derive(Debug, Clone)]
pub struct GatewayLookup {
    pub transaction_id: String,
    pub provider_transaction_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GatewayStatus {
    pub status: TransactionStatus,
    pub provider_transaction_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GatewayRefundRequest {
    pub transaction_id: String,
    pub provider_transaction_id: Option<String>,
    /// Fresh per attempt; used as the refund idempotency token.
    pub refund_id: String,
    pub amount: Decimal,
    pub total_amount: Decimal,
    pub currency: String,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GatewayRefund {
    pub provider_refund_id: String,
}

/// Raw inbound notification as received over HTTP.
#[derive(Debug, Clone)]
pub struct WebhookNotification {
    pub body: String,
    /// Value of the provider's signature header, when it uses one.
    pub signature: Option<String>,
    pub received_at: DateTime<Utc>,
}

/// A verified notification.
///
/// `transaction_id` is `None` for events that carry nothing to reconcile;
/// those are acknowledged without side effects.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WebhookOutcome {
    pub event: String,
    pub transaction_id: Option<String>,
    pub provider_transaction_id: Option<String>,
    pub status: Option<TransactionStatus>,
    pub amount: Option<Decimal>,
}

/// Body the gateway expects back once a notification is accepted.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookAck {
    pub content_type: &'static str,
    pub body: String,
}

/// Capabilities every gateway adapter provides.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn kind(&self) -> ProviderKind;

    async fn create_payment(
        &self,
        request: &GatewayPaymentRequest,
    ) -> Result<GatewayPayment, GatewayError>;

    /// Query the gateway for the current status. Safe to call repeatedly.
    async fn verify_payment(&self, lookup: &GatewayLookup) -> Result<GatewayStatus, GatewayError>;

    async fn process_refund(
        &self,
        request: &GatewayRefundRequest,
    ) -> Result<GatewayRefund, GatewayError>;

    /// Authenticate a notification and extract what it reports. Any
    /// verification failure is an error, never a pass-through.
    fn handle_webhook(&self, notification: &WebhookNotification)
        -> Result<WebhookOutcome, GatewayError>;

    /// HTTP header carrying the notification signature, if the scheme uses one.
    fn signature_header(&self) -> Option<&'static str> {
        None
    }

    fn acknowledgement(&self) -> WebhookAck;
}

/// A configured gateway adapter.
pub enum Provider {
    WalletA(WalletAClient),
    WalletB(WalletBClient),
    Card(CardClient),
}

impl Provider {
    pub fn gateway(&self) -> &dyn PaymentGateway {
        match self {
            Provider::WalletA(client) => client,
            Provider::WalletB(client) => client,
            Provider::Card(client) => client,
        }
    }

    pub fn kind(&self) -> ProviderKind {
        self.gateway().kind()
    }
}

/// Provider key → configured adapter.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<ProviderKind, Provider>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build adapters for every provider that has credentials.
    pub fn from_config(config: &ProvidersConfig, timeout: Duration) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Configuration(format!("HTTP client: {}", e)))?;

        let mut registry = Self::new();

        if let Some(wallet_a) = &config.wallet_a {
            registry.register(Provider::WalletA(WalletAClient::new(
                wallet_a.clone(),
                http.clone(),
            )?));
        }
        if let Some(wallet_b) = &config.wallet_b {
            registry.register(Provider::WalletB(WalletBClient::new(
                wallet_b.clone(),
                http.clone(),
            )));
        }
        if let Some(card) = &config.card {
            registry.register(Provider::Card(CardClient::new(card.clone(), http)));
        }

        for kind in registry.configured() {
            tracing::info!(provider = %kind, "Payment provider registered");
        }

        Ok(registry)
    }

    pub fn register(&mut self, provider: Provider) {
        self.providers.insert(provider.kind(), provider);
    }

    /// Resolve a provider key. Unknown and unconfigured keys both yield `None`.
    pub fn get(&self, name: &str) -> Option<&Provider> {
        let kind: ProviderKind = name.parse().ok()?;
        self.providers.get(&kind)
    }

    pub fn configured(&self) -> Vec<ProviderKind> {
        let mut kinds: Vec<_> = self.providers.keys().copied().collect();
        kinds.sort_by_key(|kind| kind.as_str());
        kinds
    }
}
