//! Configuration for marketplace-service.

use rust_decimal::Decimal;
use secrecy::Secret;
use service_core::config::{optional, optional_parsed, required};
use service_core::error::AppError;

#[derive(Clone, Debug)]
pub struct MarketplaceConfig {
    pub database: DatabaseConfig,
    pub stripe: StripeConfig,
    pub fees: FeePolicy,
    pub service_name: String,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Clone, Debug)]
pub struct StripeConfig {
    pub secret_key: Secret<String>,
    pub api_base: String,
}

/// Commission policy. One fee rate for every call path, configurable via
/// environment.
#[derive(Clone, Debug)]
pub struct FeePolicy {
    pub tax_rate: Decimal,
    pub fee_rate: Decimal,
    pub minimum_charge: Decimal,
    pub currency: String,
}

impl Default for FeePolicy {
    fn default() -> Self {
        Self {
            tax_rate: Decimal::new(20, 2),       // 0.20
            fee_rate: Decimal::new(20, 2),       // 0.20
            minimum_charge: Decimal::new(1000, 2), // 10.00
            currency: "usd".to_string(),
        }
    }
}

impl MarketplaceConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let database = DatabaseConfig {
            url: required("MARKETPLACE_DATABASE_URL")?,
            max_connections: optional_parsed("MARKETPLACE_DB_MAX_CONNECTIONS", 10)?,
            min_connections: optional_parsed("MARKETPLACE_DB_MIN_CONNECTIONS", 1)?,
        };

        let stripe = StripeConfig {
            secret_key: Secret::new(optional("STRIPE_SECRET_KEY", "")),
            api_base: optional("STRIPE_API_BASE", "https://api.stripe.com"),
        };

        let defaults = FeePolicy::default();
        let fees = FeePolicy {
            tax_rate: optional_parsed("MARKETPLACE_TAX_RATE", defaults.tax_rate)?,
            fee_rate: optional_parsed("MARKETPLACE_FEE_RATE", defaults.fee_rate)?,
            minimum_charge: optional_parsed("MARKETPLACE_MINIMUM_CHARGE", defaults.minimum_charge)?,
            currency: optional("MARKETPLACE_CURRENCY", &defaults.currency),
        };

        Ok(Self {
            database,
            stripe,
            fees,
            service_name: "marketplace-service".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_matches_the_published_rates() {
        let fees = FeePolicy::default();
        assert_eq!(fees.tax_rate.to_string(), "0.20");
        assert_eq!(fees.fee_rate.to_string(), "0.20");
        assert_eq!(fees.minimum_charge.to_string(), "10.00");
    }
}
