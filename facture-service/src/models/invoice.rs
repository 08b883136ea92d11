//! Invoice (facture) snapshot model.

use crate::models::order::{ClientSnapshot, DeliveryDetails, Order, PickupPoint};
use chrono::{DateTime, Datelike, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const REFERENCE_PREFIX: &str = "FC";

/// Textual reference derived from the numbering fields, e.g. `FC-12-2025`.
pub fn format_reference(seq: i64, year: i32) -> String {
    format!("{}-{}-{}", REFERENCE_PREFIX, seq, year)
}

/// Invoice status. Written lowercase (`paid`, `cancelled`) in JSON and BSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Paid,
    Cancelled,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "paid" => Some(InvoiceStatus::Paid),
            "cancelled" | "canceled" => Some(InvoiceStatus::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceLine {
    pub product_id: String,
    pub reference: String,
    pub name: String,
    pub tax_rate: Decimal,
    pub quantity: u32,
    pub discount: Decimal,
    pub unit_price: Decimal,
}

impl InvoiceLine {
    /// max(0, price - discount) * quantity
    pub fn net(&self) -> Decimal {
        (self.unit_price - self.discount).max(Decimal::ZERO) * Decimal::from(self.quantity)
    }

    pub fn tax(&self) -> Decimal {
        self.net() * self.tax_rate / Decimal::ONE_HUNDRED
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceTotals {
    pub subtotal_ex_tax: Decimal,
    pub tax_total: Decimal,
    pub shipping_cost: Decimal,
    pub grand_total_incl_tax: Decimal,
}

fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

impl InvoiceTotals {
    pub fn compute(lines: &[InvoiceLine], shipping_cost: Decimal) -> Self {
        let subtotal: Decimal = lines.iter().map(InvoiceLine::net).sum();
        let tax: Decimal = lines.iter().map(InvoiceLine::tax).sum();
        let subtotal_ex_tax = round_money(subtotal);
        let tax_total = round_money(tax);
        let shipping_cost = round_money(shipping_cost);

        Self {
            subtotal_ex_tax,
            tax_total,
            shipping_cost,
            grand_total_incl_tax: round_money(subtotal + tax + shipping_cost),
        }
    }
}

/// The informational part of an invoice, rebuilt from the order whenever
/// the order changes. Numbering fields live outside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceSnapshot {
    pub client: ClientSnapshot,
    pub delivery: Option<DeliveryDetails>,
    pub pickup: Option<PickupPoint>,
    pub payment_method: String,
    pub delivery_method: String,
    pub items: Vec<InvoiceLine>,
    pub totals: InvoiceTotals,
}

impl InvoiceSnapshot {
    pub fn from_order(order: &Order) -> Self {
        let items: Vec<InvoiceLine> = order
            .items
            .iter()
            .map(|item| InvoiceLine {
                product_id: item.product_id.clone(),
                reference: item.reference.clone(),
                name: item.name.clone(),
                tax_rate: item.tax_rate,
                quantity: item.quantity,
                discount: item.discount,
                unit_price: item.price,
            })
            .collect();
        let totals = InvoiceTotals::compute(&items, order.shipping_cost);

        Self {
            client: order.client.clone(),
            delivery: order.delivery.clone(),
            pickup: order.pickup.clone(),
            payment_method: order.payment_method.clone(),
            delivery_method: order.delivery_method.clone(),
            items,
            totals,
        }
    }
}

mod optional_bson_datetime {
    use chrono::{DateTime, Utc};
    use mongodb::bson;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        value.map(bson::DateTime::from_chrono).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<bson::DateTime>::deserialize(deserializer)?.map(|dt| dt.to_chrono()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    #[serde(rename = "_id")]
    pub id: String,
    /// Id of the originating order; unique across invoices.
    pub order: String,
    pub order_reference: String,
    pub year: i32,
    pub seq: i64,
    pub reference: String,
    pub snapshot: InvoiceSnapshot,
    pub status: InvoiceStatus,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub issued_at: DateTime<Utc>,
    #[serde(default, with = "optional_bson_datetime")]
    pub paid_at: Option<DateTime<Utc>>,
    #[serde(default, with = "optional_bson_datetime")]
    pub cancelled_at: Option<DateTime<Utc>>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl Invoice {
    /// A freshly issued invoice is considered paid at issue time. The
    /// numbering year is the issue year.
    pub fn issue(order: &Order, seq: i64, now: DateTime<Utc>) -> Self {
        let year = now.year();
        Self {
            id: Uuid::new_v4().to_string(),
            order: order.id.clone(),
            order_reference: order.reference.clone(),
            year,
            seq,
            reference: format_reference(seq, year),
            snapshot: InvoiceSnapshot::from_order(order),
            status: InvoiceStatus::Paid,
            issued_at: now,
            paid_at: Some(now),
            cancelled_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.status == InvoiceStatus::Cancelled
    }
}
