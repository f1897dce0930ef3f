//! In-memory ledger and order backends for local development and tests.

use anyhow::Result;
use async_trait::async_trait;
use mongodb::bson::DateTime;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::ledger::{RefundReservation, TransactionLedger};
use super::orders::OrderDirectory;
use crate::models::order::PAID;
use crate::models::{
    AccessScope, OrderSnapshot, PaymentMethod, PaymentRefund, PaymentTransaction, RefundStatus,
    TransactionStatus,
};
use crate::providers::GatewayPayment;

#[derive(Default, Clone)]
pub struct MemoryLedger {
    methods: Arc<RwLock<HashMap<String, PaymentMethod>>>,
    transactions: Arc<RwLock<HashMap<String, PaymentTransaction>>>,
    refunds: Arc<RwLock<HashMap<String, PaymentRefund>>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn save_payment_method(&self, method: PaymentMethod) {
        self.methods.write().await.insert(method.id.clone(), method);
    }

    pub async fn transaction_count(&self) -> usize {
        self.transactions.read().await.len()
    }

    pub async fn refund_count(&self) -> usize {
        self.refunds.read().await.len()
    }
}

#[async_trait]
impl TransactionLedger for MemoryLedger {
    async fn list_active_payment_methods(&self) -> Result<Vec<PaymentMethod>> {
        let methods = self.methods.read().await;
        let mut active: Vec<_> = methods.values().filter(|m| m.is_active).cloned().collect();
        active.sort_by_key(|m| m.sort_order);
        Ok(active)
    }

    async fn find_payment_method(&self, name: &str) -> Result<Option<PaymentMethod>> {
        let methods = self.methods.read().await;
        Ok(methods.values().find(|m| m.name == name).cloned())
    }

    async fn insert_transaction(&self, transaction: &PaymentTransaction) -> Result<()> {
        let mut transactions = self.transactions.write().await;
        if transactions.contains_key(&transaction.id) {
            anyhow::bail!("duplicate transaction id {}", transaction.id);
        }
        transactions.insert(transaction.id.clone(), transaction.clone());
        Ok(())
    }

    async fn find_transaction(
        &self,
        scope: &AccessScope,
        id: &str,
    ) -> Result<Option<PaymentTransaction>> {
        let transactions = self.transactions.read().await;
        Ok(transactions
            .get(id)
            .filter(|t| scope.permits(t.user_id.as_deref()))
            .cloned())
    }

    async fn find_active_transaction_for_order(
        &self,
        order_id: &str,
    ) -> Result<Option<PaymentTransaction>> {
        let now = DateTime::now();
        let transactions = self.transactions.read().await;
        Ok(transactions
            .values()
            .find(|t| t.order_id == order_id && !t.status.is_terminal() && !t.is_expired(now))
            .cloned())
    }

    async fn transition_transaction(
        &self,
        id: &str,
        to: TransactionStatus,
        provider_transaction_id: Option<&str>,
    ) -> Result<bool> {
        let mut transactions = self.transactions.write().await;
        let Some(transaction) = transactions.get_mut(id) else {
            return Ok(false);
        };
        if !transaction.status.can_transition_to(to) {
            return Ok(false);
        }

        let now = DateTime::now();
        transaction.status = to;
        transaction.updated_at = now;
        if let Some(reference) = provider_transaction_id {
            transaction.provider_transaction_id = Some(reference.to_string());
        }
        if to == TransactionStatus::Completed {
            transaction.paid_at = Some(now);
        }
        Ok(true)
    }

    async fn attach_gateway_response(&self, id: &str, payment: &GatewayPayment) -> Result<()> {
        let mut transactions = self.transactions.write().await;
        if let Some(transaction) = transactions.get_mut(id) {
            transaction.payment_url = payment.payment_url.clone();
            transaction.qr_code_url = payment.qr_code_url.clone();
            transaction.payment_data = payment.payment_data.clone();
            if payment.provider_transaction_id.is_some() {
                transaction.provider_transaction_id = payment.provider_transaction_id.clone();
            }
            transaction.updated_at = DateTime::now();
        }
        Ok(())
    }

    // Lock order: transactions, then refunds.
    async fn reserve_refund(&self, refund: &PaymentRefund) -> Result<RefundReservation> {
        let mut transactions = self.transactions.write().await;
        let transaction = transactions
            .get_mut(&refund.transaction_id)
            .ok_or_else(|| anyhow::anyhow!("transaction {} not found", refund.transaction_id))?;

        let remaining = transaction.amount - transaction.refund_reserved;
        if refund.amount > remaining {
            return Ok(RefundReservation::Exceeds { remaining });
        }

        let mut refunds = self.refunds.write().await;
        if refunds.contains_key(&refund.id) {
            anyhow::bail!("duplicate refund id {}", refund.id);
        }
        refunds.insert(refund.id.clone(), refund.clone());
        transaction.refund_reserved += refund.amount;
        transaction.updated_at = DateTime::now();
        Ok(RefundReservation::Reserved)
    }

    async fn finish_refund(
        &self,
        id: &str,
        status: RefundStatus,
        provider_refund_id: Option<&str>,
    ) -> Result<()> {
        let mut transactions = self.transactions.write().await;
        let mut refunds = self.refunds.write().await;
        let Some(refund) = refunds
            .get_mut(id)
            .filter(|r| r.status == RefundStatus::Pending)
        else {
            return Ok(());
        };

        let now = DateTime::now();
        refund.status = status;
        refund.provider_refund_id = provider_refund_id.map(str::to_string);
        refund.processed_at = Some(now);
        refund.updated_at = now;

        if status == RefundStatus::Failed {
            if let Some(transaction) = transactions.get_mut(&refund.transaction_id) {
                transaction.refund_reserved -= refund.amount;
                transaction.updated_at = now;
            }
        }
        Ok(())
    }

    async fn list_refunds(&self, transaction_id: &str) -> Result<Vec<PaymentRefund>> {
        let refunds = self.refunds.read().await;
        let mut matching: Vec<_> = refunds
            .values()
            .filter(|r| r.transaction_id == transaction_id)
            .cloned()
            .collect();
        matching.sort_by_key(|r| r.created_at);
        Ok(matching)
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Default, Clone)]
pub struct MemoryOrderDirectory {
    orders: Arc<RwLock<HashMap<String, OrderSnapshot>>>,
}

impl MemoryOrderDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_order(&self, order: OrderSnapshot) {
        self.orders.write().await.insert(order.id.clone(), order);
    }

    pub async fn get(&self, order_id: &str) -> Option<OrderSnapshot> {
        self.orders.read().await.get(order_id).cloned()
    }
}

#[async_trait]
impl OrderDirectory for MemoryOrderDirectory {
    async fn find_order(
        &self,
        scope: &AccessScope,
        order_id: &str,
    ) -> Result<Option<OrderSnapshot>> {
        let orders = self.orders.read().await;
        Ok(orders
            .get(order_id)
            .filter(|o| scope.permits(o.user_id.as_deref()))
            .cloned())
    }

    async fn mark_paid(&self, order_id: &str, transaction_id: &str) -> Result<()> {
        if let Some(order) = self.orders.write().await.get_mut(order_id) {
            order.payment_status = Some(PAID.to_string());
            order.payment_transaction_id = Some(transaction_id.to_string());
        }
        Ok(())
    }
}
