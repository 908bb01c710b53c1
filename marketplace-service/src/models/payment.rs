//! Payment model: gateway-correlated payment attempts with a derived fee
//! breakdown.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Payment lifecycle status.
///
/// pending -> succeeded | failed; succeeded -> refunded (return engine only).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Succeeded,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Derived fee breakdown. Never settable by a client; always recomputed from
/// the order's line items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Breakdown {
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub platform_fee: Decimal,
    pub total: Decimal,
}

impl Breakdown {
    /// Amount owed to the seller after the platform keeps its fee.
    pub fn net_amount(&self) -> Decimal {
        self.subtotal + self.tax - self.platform_fee
    }
}

/// Payment row. `transaction_id` is the gateway's intent id and is unique.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Payment {
    pub payment_id: Uuid,
    pub transaction_id: String,
    pub order_id: Uuid,
    pub customer_id: Uuid,
    pub seller_id: Uuid,
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub platform_fee: Decimal,
    pub total: Decimal,
    pub net_amount: Decimal,
    pub currency: String,
    pub status: PaymentStatus,
    pub failure_reason: Option<String>,
    pub refunded_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Payment {
    pub fn breakdown(&self) -> Breakdown {
        Breakdown {
            subtotal: self.subtotal,
            tax: self.tax,
            platform_fee: self.platform_fee,
            total: self.total,
        }
    }
}
