//! SKU orders and their payment transactions.

use serde::{Deserialize, Serialize};

use crate::Timestamp;

int_enum! {
    #[derive(Default)]
    pub enum SkuOrderStatus {
        #[default]
        None = 0,
        Pending = 1,
        Paid = 2,
        Fulfilled = 3,
        Canceled = 4,
    }
}

int_enum! {
    #[derive(Default)]
    pub enum SkuOrderItemType {
        #[default]
        None = 0,
        SingleUse = 1,
    }
}

int_enum! {
    pub enum SkuTransactionType {
        None = 0,
        Uphold = 1,
        AnonymousCard = 2,
        Tokens = 3,
    }
}

int_enum! {
    #[derive(Default)]
    pub enum SkuTransactionStatus {
        #[default]
        None = 0,
        Created = 1,
        Completed = 2,
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SkuOrderItem {
    pub order_item_id: String,
    pub order_id: String,
    pub sku: String,
    pub quantity: u32,
    pub price: f64,
    pub name: String,
    pub description: String,
    pub item_type: SkuOrderItemType,
    pub expires_at: Timestamp,
}

/// An order and its line items.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SkuOrder {
    pub order_id: String,
    pub total_amount: f64,
    pub merchant_id: String,
    pub location: String,
    pub status: SkuOrderStatus,
    /// Empty until a contribution pays for the order.
    pub contribution_id: String,
    pub created_at: Timestamp,
    pub items: Vec<SkuOrderItem>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SkuTransaction {
    pub transaction_id: String,
    pub order_id: String,
    pub external_transaction_id: String,
    pub transaction_type: SkuTransactionType,
    pub amount: f64,
    pub status: SkuTransactionStatus,
    pub created_at: Timestamp,
}
