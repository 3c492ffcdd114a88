//! Configuration loading and representation.
//!
//! | variable | default |
//! |---|---|
//! | `LEDGER_STORE` | `memory` (`memory` or `postgres`) |
//! | `DATABASE_URL` | required when `LEDGER_STORE=postgres` |
//! | `LEDGER_DB_MAX_CONNECTIONS` | `10` |
//! | `LEDGER_LOCK_TIMEOUT_MS` | `5000` |
//! | `LEDGER_DEFAULT_PAGE_SIZE` | `50` |
//! | `LEDGER_MAX_PAGE_SIZE` | `10000` |

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use stockledger_core::pagination::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StoreKind {
    Memory,
    Postgres,
}

impl FromStr for StoreKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "in-memory" | "in_memory" => Ok(StoreKind::Memory),
            "postgres" | "postgresql" => Ok(StoreKind::Postgres),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {var}: '{value}'")]
    Invalid { var: &'static str, value: String },

    #[error("DATABASE_URL must be set when LEDGER_STORE=postgres")]
    MissingDatabaseUrl,

    #[error("LEDGER_DEFAULT_PAGE_SIZE ({default}) must be between 1 and LEDGER_MAX_PAGE_SIZE ({max})")]
    PageSizes { default: u32, max: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    pub store: StoreKind,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub lock_timeout: Duration,
    pub default_page_size: u32,
    pub max_page_size: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            store: StoreKind::Memory,
            database_url: None,
            db_max_connections: 10,
            lock_timeout: Duration::from_millis(5_000),
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: MAX_PAGE_SIZE,
        }
    }
}

impl LedgerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable source; unset and blank values take defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let store = match get("LEDGER_STORE") {
            Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
                var: "LEDGER_STORE",
                value: raw,
            })?,
            None => defaults.store,
        };
        let database_url = get("DATABASE_URL");
        if store == StoreKind::Postgres && database_url.is_none() {
            return Err(ConfigError::MissingDatabaseUrl);
        }

        let config = Self {
            store,
            database_url,
            db_max_connections: parse_or(
                get("LEDGER_DB_MAX_CONNECTIONS"),
                "LEDGER_DB_MAX_CONNECTIONS",
                defaults.db_max_connections,
            )?,
            lock_timeout: Duration::from_millis(parse_or(
                get("LEDGER_LOCK_TIMEOUT_MS"),
                "LEDGER_LOCK_TIMEOUT_MS",
                defaults.lock_timeout.as_millis() as u64,
            )?),
            default_page_size: parse_or(
                get("LEDGER_DEFAULT_PAGE_SIZE"),
                "LEDGER_DEFAULT_PAGE_SIZE",
                defaults.default_page_size,
            )?,
            max_page_size: parse_or(
                get("LEDGER_MAX_PAGE_SIZE"),
                "LEDGER_MAX_PAGE_SIZE",
                defaults.max_page_size,
            )?,
        };

        if config.default_page_size < 1 || config.default_page_size > config.max_page_size {
            return Err(ConfigError::PageSizes {
                default: config.default_page_size,
                max: config.max_page_size,
            });
        }
        Ok(config)
    }
}

fn parse_or<T: FromStr>(raw: Option<String>, var: &'static str, default: T) -> Result<T, ConfigError> {
    match raw {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value }),
        None => Ok(default),
    }
}
