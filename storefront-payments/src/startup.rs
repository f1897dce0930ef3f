//! Application startup and lifecycle management.

use axum::{
    middleware::from_fn,
    routing::{get, post},
    Router,
};
use mongodb::{options::ClientOptions, Client};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::middleware::{
    metrics_middleware, request_id_middleware, security_headers_middleware, REQUEST_ID_HEADER,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::config::{LedgerBackend, PaymentsConfig};
use crate::handlers;
use crate::models::{PaymentMethod, ProviderKind};
use crate::providers::ProviderRegistry;
use crate::services::{
    MemoryLedger, MemoryOrderDirectory, MongoLedger, MongoOrderDirectory, OrderDirectory,
    PaymentOrchestrator, TransactionLedger, WebhookReceiver,
};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<PaymentOrchestrator>,
    pub webhooks: WebhookReceiver,
}

impl AppState {
    pub fn new(orchestrator: PaymentOrchestrator) -> Self {
        let orchestrator = Arc::new(orchestrator);
        Self {
            webhooks: WebhookReceiver::new(orchestrator.clone()),
            orchestrator,
        }
    }
}

/// Build the HTTP router with the standard middleware stack.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics))
        .route(
            "/payment-methods",
            get(handlers::payment_methods::list_payment_methods),
        )
        .route("/payments", post(handlers::payments::create_payment))
        .route(
            "/payments/:transaction_id",
            get(handlers::payments::get_payment_status),
        )
        .route(
            "/payments/:transaction_id/confirm",
            post(handlers::payments::confirm_payment),
        )
        .route("/refunds", post(handlers::refunds::create_refund))
        .route(
            "/webhooks/:provider",
            post(handlers::webhooks::receive_webhook),
        )
        .layer(from_fn(security_headers_middleware))
        .layer(from_fn(metrics_middleware))
        .layer(from_fn(request_id_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                    user_id = tracing::field::Empty,
                )
            }),
        )
        .with_state(state)
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: PaymentsConfig) -> Result<Self, AppError> {
        let timeout = Duration::from_secs(config.checkout.gateway_timeout_secs);
        let providers = ProviderRegistry::from_config(&config.providers, timeout).map_err(|e| {
            tracing::error!("Failed to initialize payment providers: {}", e);
            AppError::ConfigError(e.into())
        })?;

        let configured = providers.configured();
        if configured.is_empty() {
            tracing::warn!("No payment provider credentials configured - checkout is disabled");
        } else {
            tracing::info!(providers = ?configured, "Payment providers initialized");
        }

        let (ledger, orders): (Arc<dyn TransactionLedger>, Arc<dyn OrderDirectory>) =
            match config.ledger.backend {
                LedgerBackend::Mongodb => {
                    let mut client_options =
                        ClientOptions::parse(config.ledger.mongodb_uri.expose_secret())
                            .await
                            .map_err(|e| {
                                tracing::error!("Failed to parse MongoDB connection string: {}", e);
                                AppError::DatabaseError(e.into())
                            })?;
                    client_options.app_name = Some(config.service_name.clone());

                    let client = Client::with_options(client_options).map_err(|e| {
                        tracing::error!("Failed to create MongoDB client: {}", e);
                        AppError::DatabaseError(e.into())
                    })?;
                    let db = client.database(&config.ledger.database);

                    let ledger = MongoLedger::new(&db);
                    ledger.init_indexes().await.map_err(|e| {
                        tracing::error!("Failed to initialize database indexes: {}", e);
                        AppError::DatabaseError(e)
                    })?;
                    for method in default_payment_methods(&configured) {
                        if ledger
                            .find_payment_method(&method.name)
                            .await
                            .map_err(AppError::DatabaseError)?
                            .is_none()
                        {
                            ledger
                                .save_payment_method(&method)
                                .await
                                .map_err(AppError::DatabaseError)?;
                        }
                    }

                    (Arc::new(ledger), Arc::new(MongoOrderDirectory::new(&db)))
                }
                LedgerBackend::Memory => {
                    tracing::warn!("Using in-memory ledger - state is lost on restart");
                    let ledger = MemoryLedger::new();
                    for method in default_payment_methods(&configured) {
                        ledger.save_payment_method(method).await;
                    }
                    (Arc::new(ledger), Arc::new(MemoryOrderDirectory::new()))
                }
            };

        let orchestrator = PaymentOrchestrator::new(ledger, orders, providers, config.checkout);

        Self::build_with(config.common.port, AppState::new(orchestrator)).await
    }

    /// Bind a listener for prepared state (port 0 = random port for testing).
    pub async fn build_with(port: u16, state: AppState) -> Result<Self, AppError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind HTTP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!("Storefront payments listening on port {}", port);

        Ok(Self {
            port,
            listener,
            state,
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let router = build_router(self.state);
        axum::serve(self.listener, router).await.map_err(|e| {
            tracing::error!("HTTP server error: {}", e);
            std::io::Error::other(format!("HTTP server error: {}", e))
        })
    }
}

/// One active method per configured provider, in checkout display order.
pub fn default_payment_methods(providers: &[ProviderKind]) -> Vec<PaymentMethod> {
    providers
        .iter()
        .map(|kind| {
            let (display_name, sort_order) = match kind {
                ProviderKind::WalletA => ("Alipay", 1),
                ProviderKind::WalletB => ("WeChat Pay", 2),
                ProviderKind::Card => ("Credit / Debit Card", 3),
            };
            PaymentMethod {
                id: kind.as_str().to_string(),
                name: kind.as_str().to_string(),
                display_name: display_name.to_string(),
                is_active: true,
                sort_order,
            }
        })
        .collect()
}
