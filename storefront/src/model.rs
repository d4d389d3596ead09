use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::StoreError;

pub type ModelId = i64;

/// Monetary amounts are carried in the smallest currency unit (cents),
/// matching what the card gateway expects for charge amounts.
pub type MinorUnits = i64;

/// Fulfilment status of an order, driven by the admin surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for OrderStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "confirmed" => Ok(OrderStatus::Confirmed),
            "shipped" => Ok(OrderStatus::Shipped),
            "delivered" => Ok(OrderStatus::Delivered),
            "cancelled" => Ok(OrderStatus::Cancelled),
            other => Err(StoreError::Validation(format!(
                "unknown order status: {other}"
            ))),
        }
    }
}

/// Settlement status of an order's charge, driven by gateway webhooks.
///
/// Transitions only move forward: once a charge has settled or failed the
/// record never returns to `unpaid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Unpaid,
    Paid,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Unpaid => "unpaid",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
        }
    }

    /// Whether moving to `next` is a legal transition. Re-asserting the
    /// current state is allowed so redelivered webhooks stay idempotent.
    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        match (self, next) {
            (PaymentStatus::Unpaid, _) => true,
            (current, next) => *current == next,
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unpaid" => Ok(PaymentStatus::Unpaid),
            "paid" => Ok(PaymentStatus::Paid),
            "failed" => Ok(PaymentStatus::Failed),
            other => Err(StoreError::Validation(format!(
                "unknown payment status: {other}"
            ))),
        }
    }
}

/// One committed checkout. Totals and per-item prices are captured at
/// placement time and never re-read from the catalog.
#[derive(Debug, Clone, Serialize)]
pub struct Order {
    pub id: ModelId,
    pub user_id: ModelId,
    pub address_id: Option<ModelId>,
    pub total_amount: MinorUnits,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_reference: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A line item as served to clients: the immutable captured quantity and
/// price, enriched with the product's display fields.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct OrderItem {
    pub id: ModelId,
    pub order_id: ModelId,
    pub product_id: ModelId,
    pub quantity: i32,
    pub unit_price: MinorUnits,
    pub name: String,
    pub image_url: Option<String>,
}

/// Delivery address fields joined into order views.
#[derive(Debug, Clone, Serialize)]
pub struct AddressSummary {
    pub street_address: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub country: String,
}

/// Raw `orders` row. Status columns are TEXT in the store; parsing into the
/// domain enums happens in [`Order::try_from`].
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OrderRow {
    pub id: ModelId,
    pub user_id: ModelId,
    pub address_id: Option<ModelId>,
    pub total_amount: i64,
    pub status: String,
    pub payment_status: String,
    pub payment_reference: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = StoreError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        Ok(Order {
            id: row.id,
            user_id: row.user_id,
            address_id: row.address_id,
            total_amount: row.total_amount,
            status: row.status.parse()?,
            payment_status: row.payment_status.parse()?,
            payment_reference: row.payment_reference,
            notes: row.notes,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// One requested line of a basket, as submitted by the client. Prices are
/// never taken from the client; they are re-read from the catalog inside
/// the placement transaction.
#[derive(Debug, Clone, Deserialize)]
pub struct BasketLine {
    pub product_id: ModelId,
    pub quantity: i32,
}

/// A proposed checkout: what the user wants to buy and where to ship it.
#[derive(Debug, Clone, Deserialize)]
pub struct PlaceOrder {
    pub items: Vec<BasketLine>,
    pub address_id: Option<ModelId>,
    pub notes: Option<String>,
}

/// Raw row for order views joined against `addresses`. The address columns
/// are nullable because the join is LEFT and the address reference itself
/// is optional.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OrderDetailRow {
    pub id: ModelId,
    pub user_id: ModelId,
    pub address_id: Option<ModelId>,
    pub total_amount: i64,
    pub status: String,
    pub payment_status: String,
    pub payment_reference: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub street_address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
}

impl OrderDetailRow {
    pub fn into_parts(self) -> Result<(Order, Option<AddressSummary>), StoreError> {
        let OrderDetailRow {
            id,
            user_id,
            address_id,
            total_amount,
            status,
            payment_status,
            payment_reference,
            notes,
            created_at,
            updated_at,
            street_address,
            city,
            state,
            postal_code,
            country,
        } = self;

        let address = match (street_address, city, state, postal_code, country) {
            (Some(street_address), Some(city), Some(state), Some(postal_code), Some(country)) => {
                Some(AddressSummary {
                    street_address,
                    city,
                    state,
                    postal_code,
                    country,
                })
            }
            _ => None,
        };

        let order = Order {
            id,
            user_id,
            address_id,
            total_amount,
            status: status.parse()?,
            payment_status: payment_status.parse()?,
            payment_reference,
            notes,
            created_at,
            updated_at,
        };

        Ok((order, address))
    }
}

/// An order together with its line items and delivery address, as served
/// to clients.
#[derive(Debug, Clone, Serialize)]
pub struct OrderWithItems {
    #[serde(flatten)]
    pub order: Order,
    pub address: Option<AddressSummary>,
    pub items: Vec<OrderItem>,
}

/// Raw row for the admin listing joined against `users`. Customer columns
/// are nullable because the user store is owned by the wider platform.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AdminOrderRow {
    pub id: ModelId,
    pub user_id: ModelId,
    pub address_id: Option<ModelId>,
    pub total_amount: i64,
    pub status: String,
    pub payment_status: String,
    pub payment_reference: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
}

/// Admin view of one order with the customer's identity joined in.
#[derive(Debug, Clone, Serialize)]
pub struct AdminOrderView {
    #[serde(flatten)]
    pub order: Order,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
}

impl TryFrom<AdminOrderRow> for AdminOrderView {
    type Error = StoreError;

    fn try_from(row: AdminOrderRow) -> Result<Self, Self::Error> {
        Ok(AdminOrderView {
            order: Order {
                id: row.id,
                user_id: row.user_id,
                address_id: row.address_id,
                total_amount: row.total_amount,
                status: row.status.parse()?,
                payment_status: row.payment_status.parse()?,
                payment_reference: row.payment_reference,
                notes: row.notes,
                created_at: row.created_at,
                updated_at: row.updated_at,
            },
            first_name: row.first_name,
            last_name: row.last_name,
            email: row.email,
        })
    }
}
