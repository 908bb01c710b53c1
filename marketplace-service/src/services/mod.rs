pub mod database;
pub mod gateway;
pub mod ledger;
pub mod metrics;
pub mod notifications;
pub mod orders;
pub mod payments;
pub mod returns;
