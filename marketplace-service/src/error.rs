//! Engine error taxonomy.
//!
//! Every business rule the engine enforces has its own variant so callers
//! (and tests) can distinguish outcomes; `class()` groups variants into the
//! coarse taxonomy, and `From<EngineError> for AppError` maps them onto the
//! shared boundary type for the 4xx/5xx split.

use crate::models::{OrderStatus, PaymentStatus, ReturnStatus};
use rust_decimal::Decimal;
use service_core::error::AppError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("order has no line items")]
    EmptyCart,

    #[error("line items sum to {computed} but total price is {supplied}")]
    PriceMismatch { supplied: Decimal, computed: Decimal },

    #[error("line items must belong to a single seller")]
    MultipleSellers,

    #[error("illegal order transition {from} -> {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("a delivered order cannot be cancelled")]
    OrderAlreadyDelivered,

    #[error("order is {status}, payment requires a processing order")]
    OrderNotPayable { status: OrderStatus },

    #[error("order total {total} is below the minimum charge {minimum}")]
    AmountTooLow { total: Decimal, minimum: Decimal },

    #[error("recomputed total {computed} does not match order total {order_total}")]
    AmountMismatch {
        order_total: Decimal,
        computed: Decimal,
    },

    #[error("ledger amounts must be positive, got {amount}")]
    InvalidAmount { amount: Decimal },

    #[error("insufficient funds: balance {balance}, requested {requested}")]
    InsufficientFunds {
        balance: Decimal,
        requested: Decimal,
    },

    #[error("returns require a delivered order, status is {status}")]
    NotDelivered { status: OrderStatus },

    #[error("a {kind} return requires an amount")]
    MissingAmount { kind: crate::models::ReturnKind },

    #[error("requested amount {requested} exceeds the payment total {paid}")]
    AmountExceedsPayment { requested: Decimal, paid: Decimal },

    #[error("return request is already {status}")]
    AlreadyProcessed { status: ReturnStatus },

    #[error("payment is {status}, expected {expected}")]
    PaymentNotInState {
        status: PaymentStatus,
        expected: PaymentStatus,
    },

    #[error("acting seller is not the seller on this order")]
    Unauthorized,

    #[error("order {0} not found")]
    OrderNotFound(Uuid),

    #[error("payment for transaction '{0}' not found")]
    PaymentNotFound(String),

    #[error("return request {0} not found")]
    ReturnNotFound(Uuid),

    #[error("ledger account {0} not found")]
    AccountNotFound(Uuid),

    #[error("payment gateway error: {0}")]
    Gateway(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Coarse failure classes from the error-handling design.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad input shape; no side effects.
    Validation,
    /// Wrong state for the requested transition; caller must re-fetch.
    Precondition,
    /// Business outcome, not a fault: the money is not there.
    InsufficientFunds,
    /// Structural drift between stored and recomputed figures. Loud.
    AmountMismatch,
    /// Payment provider unreachable or rejected; safe to retry.
    Gateway,
    /// Transaction could not commit; no partial state exists.
    Persistence,
}

impl EngineError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::EmptyCart
            | Self::PriceMismatch { .. }
            | Self::MultipleSellers
            | Self::MissingAmount { .. }
            | Self::InvalidAmount { .. }
            | Self::AmountTooLow { .. }
            | Self::AmountExceedsPayment { .. } => ErrorClass::Validation,

            Self::InvalidTransition { .. }
            | Self::OrderAlreadyDelivered
            | Self::OrderNotPayable { .. }
            | Self::NotDelivered { .. }
            | Self::AlreadyProcessed { .. }
            | Self::PaymentNotInState { .. }
            | Self::Unauthorized
            | Self::OrderNotFound(_)
            | Self::PaymentNotFound(_)
            | Self::ReturnNotFound(_)
            | Self::AccountNotFound(_) => ErrorClass::Precondition,

            Self::InsufficientFunds { .. } => ErrorClass::InsufficientFunds,
            Self::AmountMismatch { .. } => ErrorClass::AmountMismatch,
            Self::Gateway(_) => ErrorClass::Gateway,
            Self::Database(_) => ErrorClass::Persistence,
        }
    }

    /// Label for the errors metric.
    pub fn metric_label(&self) -> &'static str {
        match self.class() {
            ErrorClass::Validation => "validation",
            ErrorClass::Precondition => "precondition",
            ErrorClass::InsufficientFunds => "insufficient_funds",
            ErrorClass::AmountMismatch => "amount_mismatch",
            ErrorClass::Gateway => "gateway",
            ErrorClass::Persistence => "persistence",
        }
    }
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        crate::services::metrics::ERRORS_TOTAL
            .with_label_values(&[err.metric_label()])
            .inc();
        let message = anyhow::anyhow!("{}", err);
        match &err {
            EngineError::Unauthorized => AppError::Forbidden(message),

            EngineError::OrderNotFound(_)
            | EngineError::PaymentNotFound(_)
            | EngineError::ReturnNotFound(_)
            | EngineError::AccountNotFound(_) => AppError::NotFound(message),

            EngineError::AlreadyProcessed { .. } | EngineError::PaymentNotInState { .. } => {
                AppError::Conflict(message)
            }

            EngineError::Gateway(msg) => AppError::BadGateway(msg.clone()),

            EngineError::AmountMismatch { .. } => AppError::InternalError(message),

            EngineError::Database(_) => AppError::DatabaseError(message),

            _ => match err.class() {
                ErrorClass::Validation => AppError::ValidationError(message),
                ErrorClass::InsufficientFunds => AppError::BadRequest(message),
                ErrorClass::Precondition => AppError::Conflict(message),
                _ => AppError::InternalError(message),
            },
        }
    }
}
