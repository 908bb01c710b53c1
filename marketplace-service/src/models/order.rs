//! Order aggregate: line items, total, and the order status machine.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Order lifecycle status.
///
/// Legal walks: Processing -> Shipped -> Delivered, with Cancelled reachable
/// from Processing or Shipped. Delivered is terminal except for Delivered
/// itself; a delivered order can never be cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Processing,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    /// Get string representation for database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether the edge `self -> to` exists in the status graph.
    pub fn can_transition_to(self, to: OrderStatus) -> bool {
        matches!(
            (self, to),
            (Self::Processing, Self::Shipped)
                | (Self::Shipped, Self::Delivered)
                | (Self::Processing, Self::Cancelled)
                | (Self::Shipped, Self::Cancelled)
        )
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Order row. Line items live in `order_items` and are immutable after
/// creation; `payment_id` points at the current payment attempt.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Order {
    pub order_id: Uuid,
    pub buyer_id: Uuid,
    pub total_price: Decimal,
    pub order_status: OrderStatus,
    pub payment_id: Option<Uuid>,
    pub created_utc: DateTime<Utc>,
    pub delivered_utc: Option<DateTime<Utc>>,
}

/// Priced line item snapshot.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct LineItem {
    pub item_id: Uuid,
    pub order_id: Uuid,
    pub position: i32,
    pub product_id: Uuid,
    pub seller_id: Uuid,
    pub unit_price: Decimal,
    pub quantity: i32,
}

impl LineItem {
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

/// Input for a line item at checkout. Unit price comes from the catalog
/// snapshot, never from the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewLineItem {
    pub product_id: Uuid,
    pub seller_id: Uuid,
    pub unit_price: Decimal,
    pub quantity: i32,
}

impl NewLineItem {
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_graph_is_exact() {
        use OrderStatus::*;
        let legal = [
            (Processing, Shipped),
            (Shipped, Delivered),
            (Processing, Cancelled),
            (Shipped, Cancelled),
        ];
        for from in [Processing, Shipped, Delivered, Cancelled] {
            for to in [Processing, Shipped, Delivered, Cancelled] {
                assert_eq!(
                    from.can_transition_to(to),
                    legal.contains(&(from, to)),
                    "{} -> {}",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn delivered_cannot_be_cancelled() {
        assert!(!OrderStatus::Delivered.can_transition_to(OrderStatus::Cancelled));
    }
}
