#![allow(dead_code)]

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use http_body_util::BodyExt;
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::signature::{SignatureEncoding, Signer};
use rsa::RsaPrivateKey;
use rust_decimal::Decimal;
use secrecy::Secret;
use serde_json::Value;
use sha2::Sha256;
use service_core::utils::hmac_sha256_hex;
use std::sync::Arc;
use std::time::Duration;
use storefront_payments::config::{
    CardConfig, CheckoutConfig, ProvidersConfig, WalletAConfig, WalletBConfig,
};
use storefront_payments::models::{AccessScope, OrderSnapshot};
use storefront_payments::providers::signing::{canonical_string, Params};
use storefront_payments::providers::wallet_b::{md5_sign, to_xml};
use storefront_payments::providers::ProviderRegistry;
use storefront_payments::services::{
    MemoryLedger, MemoryOrderDirectory, PaymentOrchestrator, TransactionLedger,
};
use storefront_payments::startup::default_payment_methods;
use storefront_payments::{build_router, AppState};
use tower::ServiceExt;
use wiremock::MockServer;

pub const MERCHANT_PRIVATE_KEY: &str = include_str!("../fixtures/merchant_private.pem");
pub const GATEWAY_PRIVATE_KEY: &str = include_str!("../fixtures/gateway_private.pem");
pub const GATEWAY_PUBLIC_KEY: &str = include_str!("../fixtures/gateway_public.pem");

pub const WALLET_A_APP_ID: &str = "2021000000000001";
pub const WALLET_B_APP_ID: &str = "wx2421b1c4370ec43b";
pub const WALLET_B_MCH_ID: &str = "10000100";
pub const WALLET_B_API_KEY: &str = "192006250b4c09247ec02edce69f6a2d";
pub const CARD_WEBHOOK_SECRET: &str = "whsec_test_secret";

pub const CUSTOMER: &str = "customer-1";
pub const OTHER_CUSTOMER: &str = "customer-2";

/// Router over in-memory backends with every gateway pointed at a mock server.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub ledger: MemoryLedger,
    pub orders: MemoryOrderDirectory,
    pub wallet_a: MockServer,
    pub wallet_b: MockServer,
    pub card: MockServer,
}

impl TestApp {
    pub async fn spawn() -> Self {
        let wallet_a = MockServer::start().await;
        let wallet_b = MockServer::start().await;
        let card = MockServer::start().await;

        let providers = ProvidersConfig {
            wallet_a: Some(WalletAConfig {
                app_id: WALLET_A_APP_ID.to_string(),
                private_key: Secret::new(MERCHANT_PRIVATE_KEY.to_string()),
                gateway_public_key: GATEWAY_PUBLIC_KEY.to_string(),
                gateway_url: format!("{}/gateway.do", wallet_a.uri()),
                notify_url: "https://pay.example.com/webhooks/wallet_a".to_string(),
            }),
            wallet_b: Some(WalletBConfig {
                app_id: WALLET_B_APP_ID.to_string(),
                mch_id: WALLET_B_MCH_ID.to_string(),
                api_key: Secret::new(WALLET_B_API_KEY.to_string()),
                gateway_url: wallet_b.uri(),
                notify_url: "https://pay.example.com/webhooks/wallet_b".to_string(),
                client_ip: "127.0.0.1".to_string(),
            }),
            card: Some(CardConfig {
                secret_key: Secret::new("sk_test_123".to_string()),
                webhook_secret: Secret::new(CARD_WEBHOOK_SECRET.to_string()),
                api_base_url: format!("{}/v1", card.uri()),
                publishable_key: Some("pk_test_123".to_string()),
            }),
        };

        let registry = ProviderRegistry::from_config(&providers, Duration::from_secs(5))
            .expect("Failed to build provider registry");

        let ledger = MemoryLedger::new();
        for method in default_payment_methods(&registry.configured()) {
            ledger.save_payment_method(method).await;
        }
        let orders = MemoryOrderDirectory::new();

        let orchestrator = PaymentOrchestrator::new(
            Arc::new(ledger.clone()),
            Arc::new(orders.clone()),
            registry,
            CheckoutConfig::default(),
        );
        let state = AppState::new(orchestrator);

        Self {
            router: build_router(state.clone()),
            state,
            ledger,
            orders,
            wallet_a,
            wallet_b,
            card,
        }
    }

    pub async fn add_order(&self, order_id: &str, user_id: Option<&str>, total: Decimal) {
        self.orders
            .insert_order(OrderSnapshot {
                id: order_id.to_string(),
                user_id: user_id.map(str::to_string),
                total_amount: total,
                payment_status: None,
                payment_transaction_id: None,
            })
            .await;
    }

    /// Send a JSON request as `user_id` (guest when `None`).
    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        user_id: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        self.send_as(method, uri, user_id, false, body).await
    }

    pub async fn send_as(
        &self,
        method: Method,
        uri: &str,
        user_id: Option<&str>,
        admin: bool,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user_id) = user_id {
            builder = builder.header("X-User-ID", user_id);
        }
        if admin {
            builder = builder.header("X-Caller-Role", "admin");
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    /// POST a raw gateway notification and return status, content type and body.
    pub async fn notify(
        &self,
        provider: &str,
        headers: &[(&str, &str)],
        body: String,
    ) -> (StatusCode, String, String) {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(format!("/webhooks/{}", provider));
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let response = self
            .router
            .clone()
            .oneshot(builder.body(Body::from(body)).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, content_type, String::from_utf8(bytes.to_vec()).unwrap())
    }

    /// Create a payment through the API and return the response body.
    pub async fn create_payment(
        &self,
        user_id: Option<&str>,
        order_id: &str,
        payment_method: &str,
        amount: &str,
    ) -> Value {
        let (status, body) = self
            .send(
                Method::POST,
                "/payments",
                user_id,
                Some(serde_json::json!({
                    "order_id": order_id,
                    "payment_method": payment_method,
                    "amount": amount,
                    "return_url": "https://shop.example.com/checkout/result"
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "unexpected response: {}", body);
        body
    }

    pub async fn transaction_status(&self, transaction_id: &str) -> String {
        let transaction = self
            .state
            .orchestrator
            .ledger()
            .find_transaction(&AccessScope::Service, transaction_id)
            .await
            .unwrap()
            .expect("transaction exists");
        transaction.status.to_string()
    }
}

/// Signed wallet B XML reply or notification.
pub fn wallet_b_xml(fields: &[(&str, &str)]) -> String {
    let mut params: Params = fields
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    params.insert("sign".into(), md5_sign(&params, WALLET_B_API_KEY));
    to_xml(&params)
}

/// Sign content with the wallet A gateway key.
pub fn wallet_a_gateway_sign(content: &str) -> String {
    let key = RsaPrivateKey::from_pkcs8_pem(GATEWAY_PRIVATE_KEY).unwrap();
    BASE64.encode(SigningKey::<Sha256>::new(key).sign(content.as_bytes()).to_bytes())
}

/// Gateway-signed wallet A API response for `method`.
pub fn wallet_a_response(method: &str, node: &Value) -> String {
    let node = node.to_string();
    format!(
        r#"{{"{}_response":{},"sign":"{}"}}"#,
        method.replace('.', "_"),
        node,
        wallet_a_gateway_sign(&node)
    )
}

/// Gateway-signed wallet A notification as a form body.
pub fn wallet_a_notification(fields: &[(&str, &str)]) -> String {
    let mut params: Params = fields
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let sign = wallet_a_gateway_sign(&canonical_string(&params, &["sign", "sign_type"]));
    params.insert("sign_type".into(), "RSA2".into());
    params.insert("sign".into(), sign);
    serde_urlencoded::to_string(&params).unwrap()
}

/// `Stripe-Signature` header value for a card webhook body.
pub fn card_signature(body: &str) -> String {
    let timestamp = Utc::now().timestamp();
    let v1 = hmac_sha256_hex(CARD_WEBHOOK_SECRET, format!("{}.{}", timestamp, body).as_bytes())
        .unwrap();
    format!("t={},v1={}", timestamp, v1)
}

/// Card webhook event body for a payment intent.
pub fn card_event(kind: &str, intent_id: &str, transaction_id: &str, amount: i64) -> String {
    serde_json::json!({
        "id": "evt_test",
        "type": kind,
        "data": {
            "object": {
                "id": intent_id,
                "object": "payment_intent",
                "amount": amount,
                "status": "succeeded",
                "metadata": { "transaction_id": transaction_id }
            }
        }
    })
    .to_string()
}

/// Card payment intent JSON as returned by the gateway.
pub fn card_intent(intent_id: &str, status: &str) -> Value {
    serde_json::json!({
        "id": intent_id,
        "object": "payment_intent",
        "status": status,
        "client_secret": format!("{}_secret_abc", intent_id)
    })
}
