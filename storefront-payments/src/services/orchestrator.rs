//! Payment orchestration: validates checkout requests against order state,
//! records transactions, dispatches to gateway adapters and reconciles
//! status through the transaction state machine.

use mongodb::bson::DateTime;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tracing::instrument;

use super::ledger::{RefundReservation, TransactionLedger};
use super::metrics::{
    record_gateway_error, GatewayTimer, PAYMENTS_CREATED, REFUNDS, STATUS_TRANSITIONS,
};
use super::orders::OrderDirectory;
use crate::config::CheckoutConfig;
use crate::error::PaymentError;
use crate::models::{
    AccessScope, PaymentMethod, PaymentRefund, PaymentTransaction, RefundStatus, TransactionStatus,
};
use crate::providers::{
    GatewayLookup, GatewayPaymentRequest, GatewayRefundRequest, Provider, ProviderRegistry,
};

/// Largest accepted difference between a requested amount and the order total.
const AMOUNT_TOLERANCE: Decimal = dec!(0.01);

#[derive(Debug, Clone)]
pub struct CreatePayment {
    pub order_id: String,
    /// Provider key of the payment method, e.g. `wallet_b`.
    pub payment_method: String,
    pub amount: Decimal,
    pub currency: Option<String>,
    pub return_url: Option<String>,
    pub cancel_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RefundPayment {
    pub transaction_id: String,
    /// Defaults to the remaining refundable balance.
    pub amount: Option<Decimal>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RefundResult {
    pub refund: PaymentRefund,
    pub transaction_status: TransactionStatus,
}

pub struct PaymentOrchestrator {
    ledger: Arc<dyn TransactionLedger>,
    orders: Arc<dyn OrderDirectory>,
    providers: ProviderRegistry,
    checkout: CheckoutConfig,
}

impl PaymentOrchestrator {
    pub fn new(
        ledger: Arc<dyn TransactionLedger>,
        orders: Arc<dyn OrderDirectory>,
        providers: ProviderRegistry,
        checkout: CheckoutConfig,
    ) -> Self {
        Self {
            ledger,
            orders,
            providers,
            checkout,
        }
    }

    pub fn ledger(&self) -> &dyn TransactionLedger {
        self.ledger.as_ref()
    }

    /// Resolve a provider key to its configured adapter.
    pub fn provider(&self, name: &str) -> Result<&Provider, PaymentError> {
        self.providers
            .get(name)
            .ok_or_else(|| PaymentError::ProviderUnavailable(name.to_string()))
    }

    /// Active payment methods, ordered for display.
    pub async fn list_payment_methods(&self) -> Result<Vec<PaymentMethod>, PaymentError> {
        Ok(self.ledger.list_active_payment_methods().await?)
    }

    #[instrument(
        skip(self, request),
        fields(order_id = %request.order_id, provider = %request.payment_method)
    )]
    pub async fn create_payment(
        &self,
        scope: &AccessScope,
        request: CreatePayment,
    ) -> Result<PaymentTransaction, PaymentError> {
        let method = self
            .ledger
            .find_payment_method(&request.payment_method)
            .await?
            .filter(|method| method.is_active)
            .ok_or_else(|| {
                self.count_created(&request.payment_method, "rejected");
                PaymentError::InvalidPaymentMethod(request.payment_method.clone())
            })?;

        let provider = self.provider(&method.name).inspect_err(|_| {
            self.count_created(&method.name, "rejected");
        })?;
        let kind = provider.kind();

        if request.amount <= Decimal::ZERO {
            self.count_created(kind.as_str(), "rejected");
            return Err(PaymentError::InvalidAmount(
                "amount must be positive".to_string(),
            ));
        }

        let order = match self.orders.find_order(scope, &request.order_id).await? {
            Some(order) => order,
            None => {
                tracing::warn!(scope = ?scope, "Order not found in caller scope");
                self.count_created(kind.as_str(), "rejected");
                return Err(PaymentError::OrderNotFound);
            }
        };

        if order.is_paid() {
            tracing::warn!(
                paid_by = ?order.payment_transaction_id,
                "Checkout requested for an order that is already paid"
            );
            self.count_created(kind.as_str(), "rejected");
            return Err(PaymentError::OrderAlreadyPaid(order.id));
        }

        if (request.amount - order.total_amount).abs() > AMOUNT_TOLERANCE {
            tracing::warn!(
                expected = %order.total_amount,
                received = %request.amount,
                "Payment amount does not match order total"
            );
            self.count_created(kind.as_str(), "rejected");
            return Err(PaymentError::AmountMismatch {
                expected: order.total_amount,
                received: request.amount,
            });
        }

        if let Some(active) = self
            .ledger
            .find_active_transaction_for_order(&order.id)
            .await?
        {
            tracing::warn!(
                active_transaction_id = %active.id,
                "Order already has an active payment attempt"
            );
        }

        let now = DateTime::now();
        let mut transaction = PaymentTransaction {
            id: uuid::Uuid::new_v4().simple().to_string(),
            order_id: order.id.clone(),
            user_id: order.user_id.clone(),
            payment_method_id: method.id.clone(),
            amount: order.total_amount,
            refund_reserved: Decimal::ZERO,
            currency: request
                .currency
                .clone()
                .unwrap_or_else(|| self.checkout.default_currency.clone())
                .to_uppercase(),
            provider: kind,
            status: TransactionStatus::Pending,
            provider_transaction_id: None,
            payment_url: None,
            qr_code_url: None,
            payment_data: None,
            expires_at: DateTime::from_millis(
                now.timestamp_millis() + self.checkout.expiry_minutes * 60 * 1000,
            ),
            paid_at: None,
            created_at: now,
            updated_at: now,
        };
        self.ledger.insert_transaction(&transaction).await?;

        tracing::info!(transaction_id = %transaction.id, "Payment transaction created");

        let gateway_request = GatewayPaymentRequest {
            transaction_id: transaction.id.clone(),
            order_id: order.id.clone(),
            amount: transaction.amount,
            currency: transaction.currency.clone(),
            subject: format!("{} {}", self.checkout.subject_prefix, order.id),
            return_url: request.return_url.unwrap_or_else(|| {
                fill_template(&self.checkout.return_url_template, &transaction.id)
            }),
            cancel_url: request.cancel_url.unwrap_or_else(|| {
                fill_template(&self.checkout.cancel_url_template, &transaction.id)
            }),
        };

        let created = {
            let _timer = GatewayTimer::start(kind.as_str(), "create_payment");
            provider.gateway().create_payment(&gateway_request).await
        };

        let payment = match created {
            Ok(payment) => payment,
            Err(err) => {
                tracing::error!(
                    transaction_id = %transaction.id,
                    error = %err,
                    kind = err.kind(),
                    "Gateway payment creation failed"
                );
                record_gateway_error(kind.as_str(), err.kind());
                self.count_created(kind.as_str(), "gateway_error");
                self.apply_status(&transaction, TransactionStatus::Failed, None)
                    .await?;
                return Err(err.into());
            }
        };

        self.ledger
            .attach_gateway_response(&transaction.id, &payment)
            .await?;
        transaction.payment_url = payment.payment_url.clone();
        transaction.qr_code_url = payment.qr_code_url.clone();
        transaction.payment_data = payment.payment_data.clone();
        if payment.provider_transaction_id.is_some() {
            transaction.provider_transaction_id = payment.provider_transaction_id.clone();
        }

        if let Some(status) = payment.status {
            transaction.status = self.apply_status(&transaction, status, None).await?;
        }

        self.count_created(kind.as_str(), "ok");
        Ok(transaction)
    }

    /// Current status, reconciled with the gateway unless already final.
    #[instrument(skip(self))]
    pub async fn check_payment_status(
        &self,
        scope: &AccessScope,
        transaction_id: &str,
    ) -> Result<PaymentTransaction, PaymentError> {
        let transaction = self
            .ledger
            .find_transaction(scope, transaction_id)
            .await?
            .ok_or(PaymentError::TransactionNotFound)?;

        if transaction.status.is_terminal() {
            return Ok(transaction);
        }

        self.refresh_from_gateway(transaction).await
    }

    /// Query the gateway and apply whatever it reports.
    pub(crate) async fn refresh_from_gateway(
        &self,
        mut transaction: PaymentTransaction,
    ) -> Result<PaymentTransaction, PaymentError> {
        let provider = self.provider(transaction.provider.as_str())?;
        let lookup = GatewayLookup {
            transaction_id: transaction.id.clone(),
            provider_transaction_id: transaction.provider_transaction_id.clone(),
        };

        let verified = {
            let _timer = GatewayTimer::start(transaction.provider.as_str(), "verify_payment");
            provider.gateway().verify_payment(&lookup).await
        };
        let reported = verified.inspect_err(|err| {
            tracing::error!(
                transaction_id = %transaction.id,
                error = %err,
                "Gateway status query failed"
            );
            record_gateway_error(transaction.provider.as_str(), err.kind());
        })?;

        let status = self
            .apply_status(
                &transaction,
                reported.status,
                reported.provider_transaction_id.as_deref(),
            )
            .await?;
        if status != transaction.status {
            transaction.status = status;
            if let Some(refreshed) = self
                .ledger
                .find_transaction(&AccessScope::Service, &transaction.id)
                .await?
            {
                transaction = refreshed;
            }
        }
        Ok(transaction)
    }

    /// Confirm a card intent with a tokenized payment method.
    #[instrument(skip(self, payment_method_id))]
    pub async fn confirm_card_payment(
        &self,
        scope: &AccessScope,
        transaction_id: &str,
        payment_method_id: &str,
    ) -> Result<PaymentTransaction, PaymentError> {
        let transaction = self
            .ledger
            .find_transaction(scope, transaction_id)
            .await?
            .ok_or(PaymentError::TransactionNotFound)?;

        let Provider::Card(card) = self.provider(transaction.provider.as_str())? else {
            return Err(PaymentError::UnsupportedOperation(format!(
                "{} payments are confirmed by the wallet",
                transaction.provider
            )));
        };
        if transaction.status.is_terminal() {
            return Err(PaymentError::UnsupportedOperation(format!(
                "transaction is already {}",
                transaction.status
            )));
        }
        let intent_id = transaction.provider_transaction_id.clone().ok_or_else(|| {
            PaymentError::UnsupportedOperation("transaction has no payment intent".to_string())
        })?;

        let confirmed = {
            let _timer = GatewayTimer::start(transaction.provider.as_str(), "confirm_payment");
            card.confirm_payment(&intent_id, payment_method_id).await
        };
        let reported = confirmed.inspect_err(|err| {
            tracing::error!(transaction_id, error = %err, "Card confirmation failed");
            record_gateway_error(transaction.provider.as_str(), err.kind());
        })?;

        let status = self
            .apply_status(&transaction, reported.status, None)
            .await?;
        Ok(PaymentTransaction {
            status,
            ..transaction
        })
    }

    #[instrument(skip(self, request), fields(transaction_id = %request.transaction_id))]
    pub async fn process_refund(
        &self,
        scope: &AccessScope,
        request: RefundPayment,
    ) -> Result<RefundResult, PaymentError> {
        let transaction = self
            .ledger
            .find_transaction(scope, &request.transaction_id)
            .await?
            .ok_or(PaymentError::TransactionNotFound)?;

        if transaction.status != TransactionStatus::Completed {
            tracing::warn!(status = %transaction.status, "Refund requested for unpaid transaction");
            return Err(PaymentError::RefundNotAllowed(transaction.status));
        }

        let remaining = transaction.amount - transaction.refund_reserved;
        let amount = request.amount.unwrap_or(remaining);

        if amount <= Decimal::ZERO {
            return Err(PaymentError::InvalidRefundAmount(
                "amount must be positive".to_string(),
            ));
        }
        if amount > remaining {
            return Err(PaymentError::InvalidRefundAmount(format!(
                "{} exceeds the refundable balance of {}",
                amount, remaining
            )));
        }

        let provider = self.provider(transaction.provider.as_str())?;
        let kind = transaction.provider.as_str();

        let now = DateTime::now();
        let mut refund = PaymentRefund {
            id: uuid::Uuid::new_v4().simple().to_string(),
            transaction_id: transaction.id.clone(),
            order_id: transaction.order_id.clone(),
            user_id: transaction.user_id.clone(),
            amount,
            reason: request.reason.clone(),
            status: RefundStatus::Pending,
            provider_refund_id: None,
            processed_at: None,
            created_at: now,
            updated_at: now,
        };
        if let RefundReservation::Exceeds { remaining } =
            self.ledger.reserve_refund(&refund).await?
        {
            tracing::warn!(
                amount = %amount,
                remaining = %remaining,
                "Refundable balance taken by a concurrent refund"
            );
            return Err(PaymentError::InvalidRefundAmount(format!(
                "{} exceeds the refundable balance of {}",
                amount, remaining
            )));
        }

        let gateway_request = GatewayRefundRequest {
            transaction_id: transaction.id.clone(),
            provider_transaction_id: transaction.provider_transaction_id.clone(),
            refund_id: refund.id.clone(),
            amount,
            total_amount: transaction.amount,
            currency: transaction.currency.clone(),
            reason: request.reason,
        };

        let refunded = {
            let _timer = GatewayTimer::start(kind, "process_refund");
            provider.gateway().process_refund(&gateway_request).await
        };

        let gateway_refund = match refunded {
            Ok(gateway_refund) => gateway_refund,
            Err(err) => {
                tracing::error!(refund_id = %refund.id, error = %err, "Gateway refund failed");
                record_gateway_error(kind, err.kind());
                REFUNDS.with_label_values(&[kind, "failed"]).inc();
                self.ledger
                    .finish_refund(&refund.id, RefundStatus::Failed, None)
                    .await?;
                return Err(err.into());
            }
        };

        self.ledger
            .finish_refund(
                &refund.id,
                RefundStatus::Completed,
                Some(&gateway_refund.provider_refund_id),
            )
            .await?;
        REFUNDS.with_label_values(&[kind, "completed"]).inc();

        refund.status = RefundStatus::Completed;
        refund.provider_refund_id = Some(gateway_refund.provider_refund_id);
        refund.processed_at = Some(DateTime::now());

        tracing::info!(refund_id = %refund.id, amount = %amount, "Refund completed");

        let refunded = self.ledger.refunded_total(&transaction.id).await?;
        let transaction_status = if refunded >= transaction.amount {
            self.apply_status(&transaction, TransactionStatus::Refunded, None)
                .await?
        } else {
            transaction.status
        };

        Ok(RefundResult {
            refund,
            transaction_status,
        })
    }

    /// Move `transaction` to `to` through the state machine and return the
    /// resulting status.
    ///
    /// Same-status updates are no-ops and illegal moves are ignored. The write
    /// is conditional in the ledger, so a concurrent update that got there
    /// first wins. Entering `completed` marks the order paid.
    pub(crate) async fn apply_status(
        &self,
        transaction: &PaymentTransaction,
        to: TransactionStatus,
        provider_transaction_id: Option<&str>,
    ) -> Result<TransactionStatus, PaymentError> {
        let from = transaction.status;
        if from == to {
            return Ok(from);
        }
        if !from.can_transition_to(to) {
            // An earlier in-flight state from a poll is routine; a conflicting
            // outcome is not.
            if to.is_terminal() {
                tracing::warn!(
                    transaction_id = %transaction.id,
                    from = %from,
                    to = %to,
                    "Ignoring stale status transition"
                );
            } else {
                tracing::debug!(
                    transaction_id = %transaction.id,
                    from = %from,
                    to = %to,
                    "Gateway still reports an earlier state"
                );
            }
            return Ok(from);
        }

        let applied = self
            .ledger
            .transition_transaction(&transaction.id, to, provider_transaction_id)
            .await?;
        if !applied {
            let current = self
                .ledger
                .find_transaction(&AccessScope::Service, &transaction.id)
                .await?
                .map(|stored| stored.status)
                .unwrap_or(from);
            tracing::warn!(
                transaction_id = %transaction.id,
                to = %to,
                current = %current,
                "Status transition lost to a concurrent update"
            );
            return Ok(current);
        }

        STATUS_TRANSITIONS
            .with_label_values(&[transaction.provider.as_str(), to.as_str()])
            .inc();
        tracing::info!(
            transaction_id = %transaction.id,
            order_id = %transaction.order_id,
            provider = %transaction.provider,
            from = %from,
            status = %to,
            "Transaction status updated"
        );

        if to == TransactionStatus::Completed {
            self.orders
                .mark_paid(&transaction.order_id, &transaction.id)
                .await
                .inspect_err(|err| {
                    tracing::error!(
                        transaction_id = %transaction.id,
                        order_id = %transaction.order_id,
                        error = %err,
                        "Failed to mark order paid"
                    );
                })?;
        }

        Ok(to)
    }

    fn count_created(&self, provider: &str, outcome: &str) {
        PAYMENTS_CREATED.with_label_values(&[provider, outcome]).inc();
    }
}

fn fill_template(template: &str, transaction_id: &str) -> String {
    template.replace("{transaction_id}", transaction_id)
}
