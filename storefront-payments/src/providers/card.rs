//! Card gateway using tokenized payment intents.
//!
//! Calls authenticate with a bearer secret key; intents are confirmed
//! client-side with the returned `client_secret`. Webhooks carry a
//! `Stripe-Signature: t=<unix>,v1=<hex>` header, an HMAC-SHA256 over
//! `"{t}.{raw body}"` keyed with the endpoint secret.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, StatusCode};
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use service_core::utils::verify_hmac_sha256_hex;

use super::signing::{from_minor_units, to_minor_units};
use super::{
    GatewayError, GatewayLookup, GatewayPayment, GatewayPaymentRequest, GatewayRefund,
    GatewayRefundRequest, GatewayStatus, PaymentGateway, WebhookAck, WebhookNotification,
    WebhookOutcome,
};
use crate::config::CardConfig;
use crate::models::{PaymentData, ProviderKind, TransactionStatus};

pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

/// Maximum age of a signed webhook.
const WEBHOOK_TOLERANCE_SECS: i64 = 300;

pub struct CardClient {
    client: Client,
    config: CardConfig,
}

#[derive(Debug, Deserialize)]
struct PaymentIntent {
    id: String,
    status: String,
    client_secret: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Refund {
    id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorDetail {
    #[serde(rename = "type")]
    kind: Option<String>,
    code: Option<String>,
    decline_code: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    #[serde(rename = "type")]
    kind: String,
    data: WebhookData,
}

#[derive(Debug, Deserialize)]
struct WebhookData {
    object: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct IntentObject {
    id: String,
    amount: Option<i64>,
    #[serde(default)]
    metadata: IntentMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct IntentMetadata {
    transaction_id: Option<String>,
}

impl CardClient {
    pub fn new(config: CardConfig, client: Client) -> Self {
        Self { client, config }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base_url.trim_end_matches('/'), path)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        operation: &str,
        request: RequestBuilder,
    ) -> Result<T, GatewayError> {
        let response = request
            .bearer_auth(self.config.secret_key.expose_secret())
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        tracing::debug!(operation, status = %status, "Card gateway response received");

        if status.is_success() {
            return Ok(serde_json::from_str(&body)?);
        }
        if status == StatusCode::UNAUTHORIZED {
            return Err(GatewayError::Configuration(
                "card gateway rejected the API key".to_string(),
            ));
        }

        let detail = serde_json::from_str::<ErrorEnvelope>(&body)
            .map(|envelope| envelope.error)
            .unwrap_or_else(|_| ErrorDetail {
                message: Some(body.clone()),
                ..Default::default()
            });
        Err(rejection(operation, detail))
    }

    /// Confirm an intent server-side with a tokenized payment method.
    pub async fn confirm_payment(
        &self,
        intent_id: &str,
        payment_method_id: &str,
    ) -> Result<GatewayStatus, GatewayError> {
        let request = self
            .client
            .post(self.url(&format!("/payment_intents/{}/confirm", intent_id)))
            .form(&[("payment_method", payment_method_id)]);
        let intent: PaymentIntent = self.send("confirm_payment", request).await?;

        tracing::info!(intent_id = %intent.id, status = %intent.status, "Card payment intent confirmed");

        Ok(GatewayStatus {
            status: map_intent_status(&intent.status),
            provider_transaction_id: Some(intent.id),
        })
    }

    fn verify_signature(&self, notification: &WebhookNotification) -> Result<(), GatewayError> {
        let header = notification
            .signature
            .as_deref()
            .ok_or_else(|| GatewayError::SignatureMismatch("missing signature header".to_string()))?;

        let mut timestamp = None;
        let mut candidates = Vec::new();
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
                Some(("v1", value)) => candidates.push(value),
                _ => {}
            }
        }

        let timestamp = timestamp
            .ok_or_else(|| GatewayError::SignatureMismatch("signature lacks timestamp".to_string()))?;
        if candidates.is_empty() {
            return Err(GatewayError::SignatureMismatch(
                "signature lacks v1 scheme".to_string(),
            ));
        }
        if !within_tolerance(timestamp, notification.received_at) {
            return Err(GatewayError::SignatureMismatch(
                "signature timestamp outside tolerance".to_string(),
            ));
        }

        let payload = format!("{}.{}", timestamp, notification.body);
        let secret = self.config.webhook_secret.expose_secret();
        for candidate in candidates {
            let matches = verify_hmac_sha256_hex(secret, payload.as_bytes(), candidate)
                .map_err(|e| GatewayError::Configuration(e.to_string()))?;
            if matches {
                return Ok(());
            }
        }

        Err(GatewayError::SignatureMismatch(
            "no v1 signature matches".to_string(),
        ))
    }
}

#[async_trait]
impl PaymentGateway for CardClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Card
    }

    async fn create_payment(
        &self,
        request: &GatewayPaymentRequest,
    ) -> Result<GatewayPayment, GatewayError> {
        let amount = to_minor_units(request.amount)?.to_string();
        let currency = request.currency.to_lowercase();
        let form = [
            ("amount", amount.as_str()),
            ("currency", currency.as_str()),
            ("description", request.subject.as_str()),
            ("automatic_payment_methods[enabled]", "true"),
            ("metadata[transaction_id]", request.transaction_id.as_str()),
            ("metadata[order_id]", request.order_id.as_str()),
        ];

        let http_request = self
            .client
            .post(self.url("/payment_intents"))
            .header("Idempotency-Key", &request.transaction_id)
            .form(&form);
        let intent: PaymentIntent = self.send("create_payment", http_request).await?;

        let client_secret = intent.client_secret.ok_or_else(|| {
            GatewayError::InvalidResponse("payment intent lacks client_secret".to_string())
        })?;

        tracing::info!(
            transaction_id = %request.transaction_id,
            order_id = %request.order_id,
            intent_id = %intent.id,
            "Card payment intent created"
        );

        Ok(GatewayPayment {
            provider_transaction_id: Some(intent.id.clone()),
            payment_data: Some(PaymentData::Card {
                intent_id: intent.id,
                client_secret,
                publishable_key: self.config.publishable_key.clone(),
            }),
            status: Some(map_intent_status(&intent.status)),
            ..Default::default()
        })
    }

    async fn verify_payment(&self, lookup: &GatewayLookup) -> Result<GatewayStatus, GatewayError> {
        // No intent means creation never reached the gateway.
        let Some(intent_id) = &lookup.provider_transaction_id else {
            return Ok(GatewayStatus {
                status: TransactionStatus::Pending,
                provider_transaction_id: None,
            });
        };

        let request = self
            .client
            .get(self.url(&format!("/payment_intents/{}", intent_id)));
        let intent: PaymentIntent = self.send("verify_payment", request).await?;

        Ok(GatewayStatus {
            status: map_intent_status(&intent.status),
            provider_transaction_id: Some(intent.id),
        })
    }

    async fn process_refund(
        &self,
        request: &GatewayRefundRequest,
    ) -> Result<GatewayRefund, GatewayError> {
        let intent_id = request.provider_transaction_id.as_deref().ok_or_else(|| {
            GatewayError::rejected("missing_payment_intent", "Transaction has no payment intent")
        })?;

        let amount = to_minor_units(request.amount)?.to_string();
        let mut form = vec![
            ("payment_intent", intent_id),
            ("amount", amount.as_str()),
            ("metadata[transaction_id]", request.transaction_id.as_str()),
        ];
        if let Some(reason) = &request.reason {
            form.push(("metadata[reason]", reason.as_str()));
        }

        let http_request = self
            .client
            .post(self.url("/refunds"))
            .header("Idempotency-Key", &request.refund_id)
            .form(&form);
        let refund: Refund = self.send("process_refund", http_request).await?;

        if matches!(refund.status.as_str(), "failed" | "canceled") {
            return Err(GatewayError::rejected(
                refund.status,
                "Refund was not accepted by the card network",
            ));
        }

        Ok(GatewayRefund {
            provider_refund_id: refund.id,
        })
    }

    fn handle_webhook(
        &self,
        notification: &WebhookNotification,
    ) -> Result<WebhookOutcome, GatewayError> {
        self.verify_signature(notification)?;

        let event: WebhookEvent = serde_json::from_str(&notification.body)?;
        let status = match event.kind.as_str() {
            "payment_intent.succeeded" => Some(TransactionStatus::Completed),
            "payment_intent.payment_failed" => Some(TransactionStatus::Failed),
            "payment_intent.canceled" => Some(TransactionStatus::Cancelled),
            "payment_intent.processing" => Some(TransactionStatus::Processing),
            _ => None,
        };
        if status.is_none() {
            return Ok(WebhookOutcome {
                event: event.kind,
                ..Default::default()
            });
        }

        let intent: IntentObject = serde_json::from_value(event.data.object)?;

        Ok(WebhookOutcome {
            event: event.kind,
            transaction_id: intent.metadata.transaction_id,
            provider_transaction_id: Some(intent.id),
            status,
            amount: intent.amount.map(from_minor_units),
        })
    }

    fn signature_header(&self) -> Option<&'static str> {
        Some(SIGNATURE_HEADER)
    }

    fn acknowledgement(&self) -> WebhookAck {
        WebhookAck {
            content_type: "application/json",
            body: serde_json::json!({ "received": true }).to_string(),
        }
    }
}

fn within_tolerance(timestamp: i64, received_at: DateTime<Utc>) -> bool {
    (received_at.timestamp() - timestamp).abs() <= WEBHOOK_TOLERANCE_SECS
}

fn map_intent_status(status: &str) -> TransactionStatus {
    match status {
        "succeeded" => TransactionStatus::Completed,
        "processing" | "requires_capture" => TransactionStatus::Processing,
        "canceled" => TransactionStatus::Cancelled,
        // requires_payment_method, requires_confirmation, requires_action
        _ => TransactionStatus::Pending,
    }
}

fn rejection(operation: &str, detail: ErrorDetail) -> GatewayError {
    let code = detail
        .decline_code
        .or(detail.code)
        .or(detail.kind)
        .unwrap_or_else(|| "unknown".to_string());
    let message = match code.as_str() {
        "card_declined" | "generic_decline" => "Card was declined".to_string(),
        "insufficient_funds" => "Card has insufficient funds".to_string(),
        "expired_card" => "Card has expired".to_string(),
        "incorrect_cvc" => "Card security code is incorrect".to_string(),
        "processing_error" => "Card could not be processed".to_string(),
        "payment_intent_unexpected_state" => {
            "Payment is not in a state that allows this operation".to_string()
        }
        "resource_missing" => "Payment not found at gateway".to_string(),
        "charge_already_refunded" => "Payment already refunded".to_string(),
        "amount_too_small" => "Amount is below the card network minimum".to_string(),
        _ => detail.message.unwrap_or_else(|| code.clone()),
    };
    tracing::error!(operation, code = %code, message = %message, "Card gateway rejected request");
    GatewayError::rejected(code, message)
}
