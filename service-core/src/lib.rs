//! service-core: Shared infrastructure for marketplace services.
pub mod config;
pub mod error;
pub mod observability;

pub use anyhow;
pub use http;
pub use serde;
pub use tracing;
