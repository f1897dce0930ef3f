//! Read/mark access to the storefront's order records.

use anyhow::Result;
use async_trait::async_trait;
use mongodb::bson::{doc, DateTime};
use mongodb::{Collection, Database};
use tracing::instrument;

use crate::models::order::PAID;
use crate::models::{AccessScope, OrderSnapshot};

/// Orders are owned by the storefront; checkout only reads them and marks
/// them paid.
#[async_trait]
pub trait OrderDirectory: Send + Sync {
    /// Orders outside `scope` are reported as absent.
    async fn find_order(&self, scope: &AccessScope, order_id: &str)
        -> Result<Option<OrderSnapshot>>;

    async fn mark_paid(&self, order_id: &str, transaction_id: &str) -> Result<()>;
}

#[derive(Clone)]
pub struct MongoOrderDirectory {
    orders: Collection<OrderSnapshot>,
}

impl MongoOrderDirectory {
    pub fn new(db: &Database) -> Self {
        Self {
            orders: db.collection("orders"),
        }
    }
}

#[async_trait]
impl OrderDirectory for MongoOrderDirectory {
    #[instrument(skip(self))]
    async fn find_order(
        &self,
        scope: &AccessScope,
        order_id: &str,
    ) -> Result<Option<OrderSnapshot>> {
        let mut filter = doc! { "_id": order_id };
        match scope {
            AccessScope::Customer(user_id) => {
                filter.insert("user_id", user_id.as_str());
            }
            AccessScope::Guest => {
                filter.insert("user_id", mongodb::bson::Bson::Null);
            }
            AccessScope::Service => {}
        }
        Ok(self.orders.find_one(filter, None).await?)
    }

    #[instrument(skip(self))]
    async fn mark_paid(&self, order_id: &str, transaction_id: &str) -> Result<()> {
        let now = DateTime::now();
        let update = doc! {
            "$set": {
                "payment_status": PAID,
                "payment_transaction_id": transaction_id,
                "paid_at": now,
                "updated_at": now,
            }
        };
        let result = self
            .orders
            .update_one(doc! { "_id": order_id }, update, None)
            .await?;

        if result.matched_count == 0 {
            tracing::warn!(order_id, "Order to mark paid no longer exists");
        }
        Ok(())
    }
}
