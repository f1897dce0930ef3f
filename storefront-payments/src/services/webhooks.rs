//! Asynchronous gateway notifications.

use std::sync::Arc;
use tracing::instrument;

use super::metrics::WEBHOOKS;
use super::orchestrator::PaymentOrchestrator;
use crate::error::PaymentError;
use crate::models::AccessScope;
use crate::providers::{WebhookAck, WebhookNotification};

/// Verifies notifications through the owning adapter, then feeds them into
/// the same transition path as status polling.
#[derive(Clone)]
pub struct WebhookReceiver {
    orchestrator: Arc<PaymentOrchestrator>,
}

impl WebhookReceiver {
    pub fn new(orchestrator: Arc<PaymentOrchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Header the provider signs notifications in, if any.
    pub fn signature_header(&self, provider: &str) -> Result<Option<&'static str>, PaymentError> {
        Ok(self.orchestrator.provider(provider)?.gateway().signature_header())
    }

    /// Process one notification. `Ok` means acknowledge; errors are either
    /// rejections (no state touched) or failures the gateway should retry.
    #[instrument(skip(self, notification), fields(provider = %provider_name))]
    pub async fn receive(
        &self,
        provider_name: &str,
        notification: WebhookNotification,
    ) -> Result<WebhookAck, PaymentError> {
        let provider = self.orchestrator.provider(provider_name)?;
        let gateway = provider.gateway();
        let kind = provider.kind();
        let count = |outcome: &str| WEBHOOKS.with_label_values(&[kind.as_str(), outcome]).inc();

        let outcome = gateway.handle_webhook(&notification).map_err(|err| {
            tracing::warn!(error = %err, "Rejected gateway notification");
            count("rejected");
            PaymentError::WebhookRejected(err.to_string())
        })?;

        let Some(transaction_id) = outcome.transaction_id.as_deref() else {
            tracing::info!(event = %outcome.event, "Ignoring notification without a transaction");
            count("ignored");
            return Ok(gateway.acknowledgement());
        };

        let Some(transaction) = self
            .orchestrator
            .ledger()
            .find_transaction(&AccessScope::Service, transaction_id)
            .await?
        else {
            tracing::warn!(transaction_id, event = %outcome.event, "Notification for unknown transaction");
            count("ignored");
            return Ok(gateway.acknowledgement());
        };

        if transaction.provider != kind {
            tracing::warn!(transaction_id, "Notification provider does not own transaction");
            count("rejected");
            return Err(PaymentError::WebhookRejected(
                "transaction belongs to another provider".to_string(),
            ));
        }

        if let Some(amount) = outcome.amount {
            if amount != transaction.amount {
                tracing::warn!(
                    transaction_id,
                    expected = %transaction.amount,
                    received = %amount,
                    "Notification amount does not match transaction"
                );
                count("rejected");
                return Err(PaymentError::WebhookRejected(
                    "notification amount does not match transaction".to_string(),
                ));
            }
        }

        let result = match outcome.status {
            Some(status) => self
                .orchestrator
                .apply_status(
                    &transaction,
                    status,
                    outcome.provider_transaction_id.as_deref(),
                )
                .await
                .map(|_| ()),
            // Verified but not self-describing: ask the gateway.
            None if !transaction.status.is_terminal() => self
                .orchestrator
                .refresh_from_gateway(transaction)
                .await
                .map(|_| ()),
            None => Ok(()),
        };

        if let Err(err) = result {
            tracing::error!(transaction_id, error = %err, "Failed to apply notification");
            count("error");
            return Err(err);
        }

        tracing::info!(transaction_id, event = %outcome.event, "Gateway notification applied");
        count("applied");
        Ok(gateway.acknowledgement())
    }
}
