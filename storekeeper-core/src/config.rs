// src/config.rs
//! Environment-variable configuration for the maintenance tasks.
//!
//! Every config is read once at startup into a plain struct; validation
//! failures are fatal before a store is even opened.

use crate::error::{Result, StoreError};

pub const DEFAULT_BATCH_SIZE: usize = 1000;

fn lookup_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn parse_flag(raw: &str) -> bool {
    matches!(raw.to_lowercase().as_str(), "true" | "1" | "yes")
}

fn parse_batch_size(raw: Option<String>, var: &str, default: usize) -> Result<usize> {
    match raw {
        None => Ok(default),
        Some(s) => {
            let n: usize = s
                .parse()
                .map_err(|_| StoreError::Config(format!("{} must be a positive integer", var)))?;
            if n == 0 {
                return Err(StoreError::Config(format!("{} must be at least 1", var)));
            }
            Ok(n)
        }
    }
}

/// Connection settings shared by every single-store task.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub uri: String,
    pub db: String,
    pub batch_size: usize,
    pub dry_run: bool,
    pub skip_existing: bool,
}

impl StoreConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(lookup_env)
    }

    pub fn from_lookup<F: Fn(&str) -> Option<String>>(get: F) -> Result<Self> {
        Ok(StoreConfig {
            uri: get("STORE_URI").unwrap_or_else(|| "./data".to_string()),
            db: get("STORE_DB").unwrap_or_else(|| "test".to_string()),
            batch_size: parse_batch_size(get("STORE_BATCH_SIZE"), "STORE_BATCH_SIZE", DEFAULT_BATCH_SIZE)?,
            dry_run: get("STORE_DRY_RUN").is_some_and(|v| parse_flag(&v)),
            skip_existing: get("STORE_SKIP_EXISTING").map_or(true, |v| parse_flag(&v)),
        })
    }
}

/// Source/destination settings for the clone task.
#[derive(Debug, Clone)]
pub struct CloneConfig {
    pub source_uri: String,
    pub source_db: String,
    pub dest_uri: String,
    pub dest_db: String,
    pub excluded_collections: Vec<String>,
    pub batch_size: usize,
    pub dry_run: bool,
}

impl CloneConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(lookup_env)
    }

    pub fn from_lookup<F: Fn(&str) -> Option<String>>(get: F) -> Result<Self> {
        let config = CloneConfig {
            source_uri: get("STORE_SOURCE_URI")
                .ok_or_else(|| StoreError::Config("STORE_SOURCE_URI is required".into()))?,
            source_db: get("STORE_SOURCE_DB")
                .ok_or_else(|| StoreError::Config("STORE_SOURCE_DB is required".into()))?,
            dest_uri: get("STORE_DEST_URI")
                .ok_or_else(|| StoreError::Config("STORE_DEST_URI is required".into()))?,
            dest_db: get("STORE_DEST_DB")
                .ok_or_else(|| StoreError::Config("STORE_DEST_DB is required".into()))?,
            excluded_collections: get("STORE_EXCLUDED_COLLECTIONS")
                .map(|raw| {
                    raw.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            batch_size: parse_batch_size(get("STORE_BATCH_SIZE"), "STORE_BATCH_SIZE", DEFAULT_BATCH_SIZE)?,
            dry_run: get("STORE_DRY_RUN").is_some_and(|v| parse_flag(&v)),
        };
        config.validate()?;
        Ok(config)
    }

    /// Cloning a database onto itself would destroy the source.
    fn validate(&self) -> Result<()> {
        if self.source_uri == self.dest_uri && self.source_db == self.dest_db {
            return Err(StoreError::Config(
                "source and destination databases must differ".into(),
            ));
        }
        Ok(())
    }
}

/// Settings for the payment-provider export task.
#[derive(Debug, Clone)]
pub struct PaymentsConfig {
    pub api_key: String,
    pub api_secret: String,
    pub base_url: String,
    pub output_file: String,
    pub batch_size: usize,
    pub rate_limit_secs: u64,
    pub dry_run: bool,
}

/// The provider caps page size at 100 items.
pub const PAYMENTS_MAX_BATCH: usize = 100;

impl PaymentsConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(lookup_env)
    }

    pub fn from_lookup<F: Fn(&str) -> Option<String>>(get: F) -> Result<Self> {
        let batch_size = parse_batch_size(get("PAYMENTS_BATCH_SIZE"), "PAYMENTS_BATCH_SIZE", PAYMENTS_MAX_BATCH)?;
        Ok(PaymentsConfig {
            api_key: get("PAYMENTS_API_KEY")
                .ok_or_else(|| StoreError::Config("PAYMENTS_API_KEY is required".into()))?,
            api_secret: get("PAYMENTS_API_SECRET")
                .ok_or_else(|| StoreError::Config("PAYMENTS_API_SECRET is required".into()))?,
            base_url: get("PAYMENTS_BASE_URL")
                .unwrap_or_else(|| "https://api.razorpay.com/v1".to_string()),
            output_file: get("PAYMENTS_OUTPUT_FILE")
                .unwrap_or_else(|| "payment_customers.csv".to_string()),
            batch_size: batch_size.min(PAYMENTS_MAX_BATCH),
            rate_limit_secs: match get("PAYMENTS_RATE_LIMIT") {
                None => 1,
                Some(s) => s.parse().map_err(|_| {
                    StoreError::Config("PAYMENTS_RATE_LIMIT must be a non-negative integer".into())
                })?,
            },
            dry_run: get("PAYMENTS_DRY_RUN").is_some_and(|v| parse_flag(&v)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        let map: HashMap<&str, &str> = pairs.iter().copied().collect();
        move |key| map.get(key).map(|v| v.to_string())
    }

    #[test]
    fn test_store_config_defaults() {
        let config = StoreConfig::from_lookup(env(&[])).unwrap();
        assert_eq!(config.uri, "./data");
        assert_eq!(config.db, "test");
        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
        assert!(!config.dry_run);
        assert!(config.skip_existing);
    }

    #[test]
    fn test_store_config_overrides() {
        let config = StoreConfig::from_lookup(env(&[
            ("STORE_URI", "/var/db"),
            ("STORE_DB", "prod"),
            ("STORE_BATCH_SIZE", "250"),
            ("STORE_DRY_RUN", "yes"),
            ("STORE_SKIP_EXISTING", "false"),
        ]))
        .unwrap();
        assert_eq!(config.uri, "/var/db");
        assert_eq!(config.db, "prod");
        assert_eq!(config.batch_size, 250);
        assert!(config.dry_run);
        assert!(!config.skip_existing);
    }

    #[test]
    fn test_store_config_rejects_bad_batch_size() {
        assert!(StoreConfig::from_lookup(env(&[("STORE_BATCH_SIZE", "zero")])).is_err());
        assert!(StoreConfig::from_lookup(env(&[("STORE_BATCH_SIZE", "0")])).is_err());
    }

    #[test]
    fn test_clone_config_rejects_same_endpoints() {
        let err = CloneConfig::from_lookup(env(&[
            ("STORE_SOURCE_URI", "/db"),
            ("STORE_SOURCE_DB", "app"),
            ("STORE_DEST_URI", "/db"),
            ("STORE_DEST_DB", "app"),
        ]))
        .unwrap_err();
        assert!(matches!(err, StoreError::Config(_)));
    }

    #[test]
    fn test_clone_config_parses_exclusions() {
        let config = CloneConfig::from_lookup(env(&[
            ("STORE_SOURCE_URI", "/prod"),
            ("STORE_SOURCE_DB", "app"),
            ("STORE_DEST_URI", "/test"),
            ("STORE_DEST_DB", "app"),
            ("STORE_EXCLUDED_COLLECTIONS", "logs, temp,,cache"),
        ]))
        .unwrap();
        assert_eq!(config.excluded_collections, vec!["logs", "temp", "cache"]);
    }

    #[test]
    fn test_payments_config_requires_credentials() {
        let err = PaymentsConfig::from_lookup(env(&[])).unwrap_err();
        assert!(matches!(err, StoreError::Config(_)));
    }

    #[test]
    fn test_payments_config_caps_batch_size() {
        let config = PaymentsConfig::from_lookup(env(&[
            ("PAYMENTS_API_KEY", "k"),
            ("PAYMENTS_API_SECRET", "s"),
            ("PAYMENTS_BATCH_SIZE", "500"),
        ]))
        .unwrap();
        assert_eq!(config.batch_size, PAYMENTS_MAX_BATCH);
    }
}
