use std::str::FromStr;
use std::time::Duration;

use crate::payment::paystack::{PaystackConfig, DEFAULT_BASE_URL};
use crate::storage::PgStorageConfig;

// ============================================================================
// Service Configuration (environment)
// ============================================================================
//
// DATABASE_URL          Postgres URL; unset means in-memory storage
// DB_MAX_CONNECTIONS    pool size                          (10)
// STORE_TIMEOUT_MS      bound on every store call          (5000)
// PAYSTACK_SECRET_KEY   unset disables the payment gateway
// PAYSTACK_BASE_URL                                        (https://api.paystack.co)
// GATEWAY_TIMEOUT_SECS  per-request gateway timeout        (10)
// METRICS_PORT                                             (9090)
//
// ============================================================================

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("{var}={value:?} is invalid: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub store_timeout: Duration,
    pub paystack: Option<PaystackConfig>,
    pub metrics_port: u16,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let db_max_connections = parse_or(&get, "DB_MAX_CONNECTIONS", 10u32)?;
        if db_max_connections == 0 {
            return Err(ConfigError::Invalid {
                var: "DB_MAX_CONNECTIONS",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        let store_timeout = Duration::from_millis(parse_or(&get, "STORE_TIMEOUT_MS", 5000u64)?);
        let gateway_timeout = Duration::from_secs(parse_or(&get, "GATEWAY_TIMEOUT_SECS", 10u64)?);

        let paystack = get("PAYSTACK_SECRET_KEY").map(|secret_key| PaystackConfig {
            secret_key,
            base_url: get("PAYSTACK_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            timeout: gateway_timeout,
        });

        Ok(Self {
            database_url: get("DATABASE_URL"),
            db_max_connections,
            store_timeout,
            paystack,
            metrics_port: parse_or(&get, "METRICS_PORT", 9090u16)?,
        })
    }

    /// Postgres settings, when a database is configured.
    pub fn postgres(&self) -> Option<PgStorageConfig> {
        self.database_url.as_ref().map(|url| PgStorageConfig {
            database_url: url.clone(),
            max_connections: self.db_max_connections,
            timeout: self.store_timeout,
        })
    }
}

fn parse_or<T, G>(get: &G, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        None => Ok(default),
        Some(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            reason: e.to_string(),
            value,
        }),
    }
}
