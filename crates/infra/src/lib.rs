//! Infrastructure layer: ledger stores, the ledger service, config and wiring.

pub mod bootstrap;
pub mod config;
pub mod ledger;
pub mod store;


pub use bootstrap::{LedgerBackend, connect, connect_from_env};
pub use config::{ConfigError, LedgerConfig, StoreKind};
pub use ledger::{InventoryLedger, PageLimits};
pub use store::{
    AtomicExecutor, CommittedUnit, InMemoryLedgerStore, ItemStore, LedgerStore,
    PostgresLedgerStore, StoreError, TransactionLog,
};
