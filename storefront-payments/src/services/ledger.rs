//! Transaction ledger: the persistence boundary for payment methods,
//! transactions and refunds.

use anyhow::Result;
use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{doc, to_bson, Bson, DateTime, Document};
use mongodb::options::{FindOptions, IndexOptions};
use mongodb::{Collection, Database, IndexModel};
use rust_decimal::Decimal;
use tracing::instrument;

use crate::models::{
    AccessScope, PaymentMethod, PaymentRefund, PaymentTransaction, RefundStatus, TransactionStatus,
};
use crate::providers::GatewayPayment;

/// Outcome of [`TransactionLedger::reserve_refund`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefundReservation {
    Reserved,
    /// Nothing was written; `remaining` is the balance that was left.
    Exceeds { remaining: Decimal },
}

/// Guarded writes to a transaction's refund hold retried before giving up.
const REFUND_HOLD_ATTEMPTS: usize = 5;

/// Durable store of payment state. The orchestrator is its only writer.
#[async_trait]
pub trait TransactionLedger: Send + Sync {
    /// Active methods ordered by `sort_order`.
    async fn list_active_payment_methods(&self) -> Result<Vec<PaymentMethod>>;

    async fn find_payment_method(&self, name: &str) -> Result<Option<PaymentMethod>>;

    async fn insert_transaction(&self, transaction: &PaymentTransaction) -> Result<()>;

    /// Rows outside `scope` are reported as absent.
    async fn find_transaction(
        &self,
        scope: &AccessScope,
        id: &str,
    ) -> Result<Option<PaymentTransaction>>;

    /// A non-terminal, unexpired transaction for the order, if any.
    async fn find_active_transaction_for_order(
        &self,
        order_id: &str,
    ) -> Result<Option<PaymentTransaction>>;

    /// Move a transaction to `to`, only if its stored status is one of
    /// `to`'s legal predecessors. Returns whether the write applied.
    async fn transition_transaction(
        &self,
        id: &str,
        to: TransactionStatus,
        provider_transaction_id: Option<&str>,
    ) -> Result<bool>;

    /// Record what the gateway returned when the payment was opened.
    async fn attach_gateway_response(&self, id: &str, payment: &GatewayPayment) -> Result<()>;

    /// Record a pending refund and hold its amount against the transaction's
    /// `refund_reserved`. The balance check and the hold are one atomic step.
    async fn reserve_refund(&self, refund: &PaymentRefund) -> Result<RefundReservation>;

    /// Settle a pending refund. A failed refund releases its hold.
    async fn finish_refund(
        &self,
        id: &str,
        status: RefundStatus,
        provider_refund_id: Option<&str>,
    ) -> Result<()>;

    async fn list_refunds(&self, transaction_id: &str) -> Result<Vec<PaymentRefund>>;

    /// Sum of completed refunds against a transaction.
    async fn refunded_total(&self, transaction_id: &str) -> Result<Decimal> {
        let refunds = self.list_refunds(transaction_id).await?;
        Ok(refunds
            .iter()
            .filter(|refund| refund.status == RefundStatus::Completed)
            .map(|refund| refund.amount)
            .sum())
    }

    async fn health_check(&self) -> Result<()>;
}

#[derive(Clone)]
pub struct MongoLedger {
    db: Database,
    payment_methods: Collection<PaymentMethod>,
    transactions: Collection<PaymentTransaction>,
    refunds: Collection<PaymentRefund>,
}

impl MongoLedger {
    pub fn new(db: &Database) -> Self {
        Self {
            db: db.clone(),
            payment_methods: db.collection("payment_methods"),
            transactions: db.collection("payment_transactions"),
            refunds: db.collection("payment_refunds"),
        }
    }

    pub async fn init_indexes(&self) -> Result<()> {
        let method_name_index = IndexModel::builder()
            .keys(doc! { "name": 1 })
            .options(
                IndexOptions::builder()
                    .name("payment_method_name_idx".to_string())
                    .unique(true)
                    .build(),
            )
            .build();
        self.payment_methods
            .create_indexes([method_name_index], None)
            .await?;

        let order_index = IndexModel::builder()
            .keys(doc! { "order_id": 1, "status": 1 })
            .options(
                IndexOptions::builder()
                    .name("transaction_order_idx".to_string())
                    .build(),
            )
            .build();

        let user_index = IndexModel::builder()
            .keys(doc! { "user_id": 1, "created_at": -1 })
            .options(
                IndexOptions::builder()
                    .name("transaction_user_idx".to_string())
                    .build(),
            )
            .build();

        let provider_index = IndexModel::builder()
            .keys(doc! { "provider_transaction_id": 1 })
            .options(
                IndexOptions::builder()
                    .name("transaction_provider_ref_idx".to_string())
                    .sparse(true)
                    .build(),
            )
            .build();

        self.transactions
            .create_indexes([order_index, user_index, provider_index], None)
            .await?;

        let refund_index = IndexModel::builder()
            .keys(doc! { "transaction_id": 1, "status": 1 })
            .options(
                IndexOptions::builder()
                    .name("refund_transaction_idx".to_string())
                    .build(),
            )
            .build();
        self.refunds.create_indexes([refund_index], None).await?;

        tracing::info!("Payment ledger indexes initialized");
        Ok(())
    }

    /// Move `refund_reserved` by `delta` with a compare-and-set on its current
    /// value. When `bounded`, a hold past the transaction amount is refused.
    async fn adjust_refund_hold(
        &self,
        transaction_id: &str,
        delta: Decimal,
        bounded: bool,
    ) -> Result<RefundReservation> {
        for _ in 0..REFUND_HOLD_ATTEMPTS {
            let transaction = self
                .transactions
                .find_one(doc! { "_id": transaction_id }, None)
                .await?
                .ok_or_else(|| anyhow::anyhow!("transaction {} not found", transaction_id))?;

            let held = transaction.refund_reserved;
            let next = held + delta;
            if bounded && next > transaction.amount {
                return Ok(RefundReservation::Exceeds {
                    remaining: transaction.amount - held,
                });
            }

            // Rows written before the field existed have no hold at all.
            let mut expected = vec![to_bson(&held)?];
            if held.is_zero() {
                expected.push(Bson::Null);
            }
            let filter = doc! {
                "_id": transaction_id,
                "refund_reserved": { "$in": expected },
            };
            let update = doc! {
                "$set": {
                    "refund_reserved": to_bson(&next)?,
                    "updated_at": DateTime::now(),
                }
            };

            let result = self.transactions.update_one(filter, update, None).await?;
            if result.matched_count == 1 {
                return Ok(RefundReservation::Reserved);
            }
            tracing::debug!(transaction_id, "Refund hold changed concurrently, retrying");
        }

        anyhow::bail!(
            "refund hold on transaction {} is under contention",
            transaction_id
        )
    }

    /// Insert a payment method; used for seeding.
    pub async fn save_payment_method(&self, method: &PaymentMethod) -> Result<()> {
        self.payment_methods.insert_one(method, None).await?;
        Ok(())
    }
}

fn scope_filter(scope: &AccessScope, filter: &mut Document) {
    match scope {
        AccessScope::Customer(user_id) => {
            filter.insert("user_id", user_id.as_str());
        }
        // Matches both an explicit null and a missing field.
        AccessScope::Guest => {
            filter.insert("user_id", mongodb::bson::Bson::Null);
        }
        AccessScope::Service => {}
    }
}

#[async_trait]
impl TransactionLedger for MongoLedger {
    #[instrument(skip(self))]
    async fn list_active_payment_methods(&self) -> Result<Vec<PaymentMethod>> {
        let options = FindOptions::builder().sort(doc! { "sort_order": 1 }).build();
        let cursor = self
            .payment_methods
            .find(doc! { "is_active": true }, Some(options))
            .await?;
        Ok(cursor.try_collect().await?)
    }

    #[instrument(skip(self))]
    async fn find_payment_method(&self, name: &str) -> Result<Option<PaymentMethod>> {
        Ok(self
            .payment_methods
            .find_one(doc! { "name": name }, None)
            .await?)
    }

    #[instrument(skip(self, transaction), fields(transaction_id = %transaction.id))]
    async fn insert_transaction(&self, transaction: &PaymentTransaction) -> Result<()> {
        self.transactions.insert_one(transaction, None).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_transaction(
        &self,
        scope: &AccessScope,
        id: &str,
    ) -> Result<Option<PaymentTransaction>> {
        let mut filter = doc! { "_id": id };
        scope_filter(scope, &mut filter);
        Ok(self.transactions.find_one(filter, None).await?)
    }

    #[instrument(skip(self))]
    async fn find_active_transaction_for_order(
        &self,
        order_id: &str,
    ) -> Result<Option<PaymentTransaction>> {
        let filter = doc! {
            "order_id": order_id,
            "status": { "$in": ["pending", "processing"] },
            "expires_at": { "$gt": DateTime::now() },
        };
        Ok(self.transactions.find_one(filter, None).await?)
    }

    #[instrument(skip(self))]
    async fn transition_transaction(
        &self,
        id: &str,
        to: TransactionStatus,
        provider_transaction_id: Option<&str>,
    ) -> Result<bool> {
        let predecessors: Vec<&str> = to.predecessors().iter().map(|s| s.as_str()).collect();
        let filter = doc! {
            "_id": id,
            "status": { "$in": predecessors },
        };

        let now = DateTime::now();
        let mut set = doc! {
            "status": to.as_str(),
            "updated_at": now,
        };
        if let Some(reference) = provider_transaction_id {
            set.insert("provider_transaction_id", reference);
        }
        if to == TransactionStatus::Completed {
            set.insert("paid_at", now);
        }

        let result = self
            .transactions
            .update_one(filter, doc! { "$set": set }, None)
            .await?;
        Ok(result.matched_count == 1)
    }

    #[instrument(skip(self, payment))]
    async fn attach_gateway_response(&self, id: &str, payment: &GatewayPayment) -> Result<()> {
        let mut set = doc! {
            "payment_url": payment.payment_url.as_deref(),
            "qr_code_url": payment.qr_code_url.as_deref(),
            "payment_data": mongodb::bson::to_bson(&payment.payment_data)?,
            "updated_at": DateTime::now(),
        };
        if let Some(reference) = &payment.provider_transaction_id {
            set.insert("provider_transaction_id", reference.as_str());
        }

        self.transactions
            .update_one(doc! { "_id": id }, doc! { "$set": set }, None)
            .await?;
        Ok(())
    }

    #[instrument(skip(self, refund), fields(refund_id = %refund.id))]
    async fn reserve_refund(&self, refund: &PaymentRefund) -> Result<RefundReservation> {
        let reservation = self
            .adjust_refund_hold(&refund.transaction_id, refund.amount, true)
            .await?;
        if reservation != RefundReservation::Reserved {
            return Ok(reservation);
        }

        if let Err(err) = self.refunds.insert_one(refund, None).await {
            self.adjust_refund_hold(&refund.transaction_id, -refund.amount, false)
                .await?;
            return Err(err.into());
        }
        Ok(RefundReservation::Reserved)
    }

    #[instrument(skip(self))]
    async fn finish_refund(
        &self,
        id: &str,
        status: RefundStatus,
        provider_refund_id: Option<&str>,
    ) -> Result<()> {
        let now = DateTime::now();
        let update = doc! {
            "$set": {
                "status": status.as_str(),
                "provider_refund_id": provider_refund_id,
                "processed_at": now,
                "updated_at": now,
            }
        };
        let settled = self
            .refunds
            .find_one_and_update(doc! { "_id": id, "status": "pending" }, update, None)
            .await?;

        if let Some(refund) = settled.filter(|_| status == RefundStatus::Failed) {
            self.adjust_refund_hold(&refund.transaction_id, -refund.amount, false)
                .await?;
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_refunds(&self, transaction_id: &str) -> Result<Vec<PaymentRefund>> {
        let options = FindOptions::builder().sort(doc! { "created_at": 1 }).build();
        let cursor = self
            .refunds
            .find(doc! { "transaction_id": transaction_id }, Some(options))
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn health_check(&self) -> Result<()> {
        self.db.run_command(doc! { "ping": 1 }, None).await?;
        Ok(())
    }
}
