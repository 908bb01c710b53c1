//! Ledger account and audit-trail models.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Who owns a balance. The platform account is a well-known singleton row
/// resolved by kind; seller accounts are keyed by the seller id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AccountKind {
    Seller,
    Platform,
}

impl AccountKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Seller => "seller",
            Self::Platform => "platform",
        }
    }
}

impl std::fmt::Display for AccountKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Entry direction (credit or debit).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Credit,
    Debit,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Credit => "credit",
            Self::Debit => "debit",
        }
    }
}

/// Why a balance moved. One reason per engine-triggered mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EntryReason {
    /// Seller credited with net amount on payment capture.
    Settlement,
    /// Platform credited with its fee on payment capture.
    Commission,
    /// Seller debited when a shipped order is cancelled.
    RefundReversal,
    /// Platform fee handed back when a shipped order is cancelled.
    FeeReversal,
    /// Seller debited for an approved return.
    ReturnRefund,
}

impl EntryReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Settlement => "settlement",
            Self::Commission => "commission",
            Self::RefundReversal => "refund_reversal",
            Self::FeeReversal => "fee_reversal",
            Self::ReturnRefund => "return_refund",
        }
    }
}

/// Ledger account row. `balance` is only ever mutated through the atomic
/// credit/debit primitives and can never be negative.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct LedgerAccount {
    pub account_id: Uuid,
    pub kind: AccountKind,
    pub owner_id: Option<Uuid>,
    pub balance: Decimal,
    pub currency: String,
    pub created_utc: DateTime<Utc>,
}

/// Append-only audit record for one balance mutation.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub entry_id: Uuid,
    pub account_id: Uuid,
    pub amount: Decimal,
    pub direction: Direction,
    pub reason: EntryReason,
    pub order_id: Option<Uuid>,
    pub payment_id: Option<Uuid>,
    pub return_id: Option<Uuid>,
    pub posted_utc: DateTime<Utc>,
}

impl LedgerEntry {
    /// Signed amount (positive for credit, negative for debit).
    pub fn signed_amount(&self) -> Decimal {
        match self.direction {
            Direction::Credit => self.amount,
            Direction::Debit => -self.amount,
        }
    }
}

/// Ids correlating a ledger mutation with the business record that caused it.
#[derive(Debug, Clone, Copy, Default)]
pub struct Correlation {
    pub order_id: Option<Uuid>,
    pub payment_id: Option<Uuid>,
    pub return_id: Option<Uuid>,
}

impl Correlation {
    pub fn for_payment(order_id: Uuid, payment_id: Uuid) -> Self {
        Self {
            order_id: Some(order_id),
            payment_id: Some(payment_id),
            return_id: None,
        }
    }

    pub fn for_return(order_id: Uuid, payment_id: Uuid, return_id: Uuid) -> Self {
        Self {
            order_id: Some(order_id),
            payment_id: Some(payment_id),
            return_id: Some(return_id),
        }
    }
}
