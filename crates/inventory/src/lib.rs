//! Inventory stock ledger domain.
//!
//! Item and transaction models, the valuation engine and the planners that
//! turn a request into a [`UnitOfWork`]. Deterministic domain logic only (no
//! IO, no storage); committing a unit is the infra crate's job.

pub mod audit;
pub mod item;
pub mod plan;
pub mod transaction;
pub mod transfer;
pub mod valuation;

pub use audit::StockAudit;
pub use item::{InventoryItem, ItemFilter, ItemPatch, ItemSummary, NewItem, ValuationSummary};
pub use plan::{BalanceWrite, LockedItems, UnitOfWork, plan_create, plan_movement};
pub use transaction::{
    InventoryTransaction, NewTransaction, TransactionFilter, TransactionRequest, TransactionType,
    TransactionView, TransferDirection,
};
pub use transfer::plan_transfer;
pub use valuation::{Balance, Movement, Valuation, apply_movement};
