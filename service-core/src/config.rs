//! Environment-variable helpers shared by service config structs.

use crate::error::AppError;
use std::env;
use std::str::FromStr;

/// Load `.env` once and read a required variable.
pub fn required(name: &str) -> Result<String, AppError> {
    dotenvy::dotenv().ok();
    env::var(name).map_err(|_| {
        AppError::ConfigError(anyhow::anyhow!("{} must be set", name))
    })
}

/// Read an optional variable, falling back to a default.
pub fn optional(name: &str, default: &str) -> String {
    dotenvy::dotenv().ok();
    env::var(name).unwrap_or_else(|_| default.to_string())
}

/// Read an optional variable and parse it, falling back to a default.
pub fn optional_parsed<T: FromStr>(name: &str, default: T) -> Result<T, AppError> {
    dotenvy::dotenv().ok();
    match env::var(name) {
        Ok(raw) => raw.parse().map_err(|_| {
            AppError::ConfigError(anyhow::anyhow!("{} has an invalid value: {}", name, raw))
        }),
        Err(_) => Ok(default),
    }
}
