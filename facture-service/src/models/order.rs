//! Customer order as owned by the order-management collaborator.
//!
//! This service only reads orders, flips `has_invoice` and, on invoice
//! deletion, moves `order_status` to `Cancelled`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Order lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Processing,
    Shipped,
    Delivered,
    Pickup,
    Cancelled,
    Refunded,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Pickup => "pickup",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Refunded => "refunded",
        }
    }

    /// Only handed-over orders can be invoiced.
    pub fn is_invoice_eligible(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Pickup)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub line1: String,
    #[serde(default)]
    pub line2: Option<String>,
    pub postal_code: String,
    pub city: String,
    pub country: String,
}

/// Identity of the buyer as captured on the order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientSnapshot {
    pub client_id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
}

impl ClientSnapshot {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryDetails {
    pub recipient: String,
    pub address: Address,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PickupPoint {
    pub name: String,
    pub address: Address,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: String,
    pub reference: String,
    pub name: String,
    pub quantity: u32,
    /// Unit price excluding tax.
    pub price: Decimal,
    /// Percentage, e.g. `20` for 20 %.
    pub tax_rate: Decimal,
    /// Per-unit discount, excluding tax.
    #[serde(default)]
    pub discount: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    #[serde(rename = "_id")]
    pub id: String,
    pub reference: String,
    pub client: ClientSnapshot,
    pub items: Vec<OrderItem>,
    #[serde(default)]
    pub delivery: Option<DeliveryDetails>,
    #[serde(default)]
    pub pickup: Option<PickupPoint>,
    pub delivery_method: String,
    pub payment_method: String,
    #[serde(default)]
    pub shipping_cost: Decimal,
    pub order_status: OrderStatus,
    #[serde(default)]
    pub has_invoice: bool,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn new(
        reference: String,
        client: ClientSnapshot,
        items: Vec<OrderItem>,
        delivery_method: String,
        payment_method: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            reference,
            client,
            items,
            delivery: None,
            pickup: None,
            delivery_method,
            payment_method,
            shipping_cost: Decimal::ZERO,
            order_status: OrderStatus::Processing,
            has_invoice: false,
            created_at: now,
            updated_at: now,
        }
    }
}
