//! Backend wiring from configuration.

use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;

use crate::config::{LedgerConfig, StoreKind};
use crate::ledger::{InventoryLedger, PageLimits};
use crate::store::{InMemoryLedgerStore, PostgresLedgerStore};

/// A ledger over whichever store the configuration selected.
#[derive(Debug, Clone)]
pub enum LedgerBackend {
    InMemory(Arc<InventoryLedger<InMemoryLedgerStore>>),
    Postgres(Arc<InventoryLedger<PostgresLedgerStore>>),
}

impl LedgerBackend {
    pub fn kind(&self) -> StoreKind {
        match self {
            LedgerBackend::InMemory(_) => StoreKind::Memory,
            LedgerBackend::Postgres(_) => StoreKind::Postgres,
        }
    }
}

/// Build the configured backend. Postgres pools are connected and migrated.
pub async fn connect(config: &LedgerConfig) -> anyhow::Result<LedgerBackend> {
    let limits = PageLimits::from(config);
    match config.store {
        StoreKind::Memory => {
            tracing::info!("using in-memory ledger store");
            Ok(LedgerBackend::InMemory(Arc::new(
                InventoryLedger::new(InMemoryLedgerStore::new()).with_page_limits(limits),
            )))
        }
        StoreKind::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL must be set when LEDGER_STORE=postgres")?;
            let pool = PgPoolOptions::new()
                .max_connections(config.db_max_connections)
                .connect(url)
                .await
                .context("failed to connect to Postgres")?;
            let store = PostgresLedgerStore::new(pool, config.lock_timeout);
            store
                .migrate()
                .await
                .context("failed to apply ledger migrations")?;
            tracing::info!(
                max_connections = config.db_max_connections,
                lock_timeout_ms = config.lock_timeout.as_millis() as u64,
                "using Postgres ledger store"
            );
            Ok(LedgerBackend::Postgres(Arc::new(
                InventoryLedger::new(store).with_page_limits(limits),
            )))
        }
    }
}

/// [`LedgerConfig::from_env`] followed by [`connect`].
pub async fn connect_from_env() -> anyhow::Result<LedgerBackend> {
    let config = LedgerConfig::from_env().context("invalid ledger configuration")?;
    connect(&config).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_backend_honours_page_limits() {
        let config = LedgerConfig {
            default_page_size: 5,
            max_page_size: 20,
            ..LedgerConfig::default()
        };
        let backend = connect(&config).await.unwrap();
        assert_eq!(backend.kind(), StoreKind::Memory);
        let LedgerBackend::InMemory(ledger) = backend else {
            panic!("expected in-memory backend");
        };
        assert_eq!(ledger.pagination(None, None).unwrap().page_size, 5);
        assert!(ledger.pagination(Some(1), Some(21)).is_err());
    }

    #[tokio::test]
    async fn postgres_without_url_fails_with_context() {
        let config = LedgerConfig {
            store: StoreKind::Postgres,
            ..LedgerConfig::default()
        };
        let err = connect(&config).await.unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
    }
}
