//! `stockledger-core`: shared building blocks for the stock ledger.
//!
//! This crate contains identifiers, the error taxonomy and pagination types
//! (no infrastructure concerns).

pub mod error;
pub mod id;
pub mod pagination;

pub use error::{LedgerError, LedgerResult};
pub use id::{ItemId, ItemKey, TransactionId};
pub use pagination::{Page, Pagination};
