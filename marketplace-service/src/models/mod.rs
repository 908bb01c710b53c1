//! Domain models for marketplace-service.

mod ledger;
mod order;
mod payment;
mod return_request;

pub use ledger::{AccountKind, Correlation, Direction, EntryReason, LedgerAccount, LedgerEntry};
pub use order::{LineItem, NewLineItem, Order, OrderStatus};
pub use payment::{Breakdown, Payment, PaymentStatus};
pub use return_request::{
    NewReturnRequest, ReturnDecision, ReturnKind, ReturnRequest, ReturnStatus,
};
