//! Return/refund request model.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// What the buyer is asking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReturnKind {
    FullRefund,
    PartialRefund,
    Exchange,
}

impl ReturnKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FullRefund => "full_refund",
            Self::PartialRefund => "partial_refund",
            Self::Exchange => "exchange",
        }
    }

    /// Exchanges move stock, not money; everything else needs an amount.
    pub fn requires_amount(&self) -> bool {
        !matches!(self, Self::Exchange)
    }
}

impl std::fmt::Display for ReturnKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Return request status. Terminal once approved or rejected; admin_review
/// is an escalation parking state with no modeled exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReturnStatus {
    Pending,
    Approved,
    Rejected,
    AdminReview,
}

impl ReturnStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::AdminReview => "admin_review",
        }
    }
}

impl std::fmt::Display for ReturnStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Seller decision on a pending return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReturnDecision {
    Approve,
    Reject,
}

/// Return request row.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ReturnRequest {
    pub return_id: Uuid,
    pub order_id: Uuid,
    pub customer_id: Uuid,
    pub payment_id: Uuid,
    pub kind: ReturnKind,
    pub requested_amount: Option<Decimal>,
    pub reason: String,
    pub evidence: Option<serde_json::Value>,
    pub status: ReturnStatus,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

/// Input for a new return request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewReturnRequest {
    pub order_id: Uuid,
    pub customer_id: Uuid,
    pub kind: ReturnKind,
    pub requested_amount: Option<Decimal>,
    pub reason: String,
    pub evidence: Vec<String>,
}
