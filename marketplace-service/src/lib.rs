//! Marketplace transaction engine: orders, payments, commissions, returns.

pub mod config;
pub mod error;
pub mod models;
pub mod services;
