//! Ledger persistence boundary.
//!
//! Three traits split the store by concern: item rows, the transaction log, and
//! the atomic executor that is the only path allowed to change balances or
//! append rows. Both backends implement all three.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryLedgerStore;
pub use postgres::PostgresLedgerStore;
pub use r#trait::{
    AtomicExecutor, CommittedUnit, ItemStore, LedgerStore, StoreError, TransactionLog,
};
