//! Ledger error model.

use rust_decimal::Decimal;
use thiserror::Error;

/// Result type used across the ledger.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Typed failure surfaced to callers of the ledger.
///
/// Every variant is a complete failure: no operation that returns one of these has
/// left partial writes behind.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// An item or transaction id/code does not resolve, or a bulk delete referenced
    /// transactions outside the target item.
    #[error("not found: {0}")]
    NotFound(String),

    /// Missing or malformed input (non-positive quantity, self-transfer, missing
    /// destination, bad pagination, ...).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An issue would drive the item's stock below zero.
    #[error("insufficient stock for {item_code}: available {available}, requested {requested}")]
    InsufficientStock {
        item_code: String,
        available: Decimal,
        requested: Decimal,
    },

    /// The atomic unit was aborted by a concurrent modification; safe to retry.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The item code is already used by another item.
    #[error("item code already exists: {0}")]
    DuplicateCode(String),

    /// Backing store failure that is not a concurrency abort.
    #[error("storage failure: {0}")]
    Storage(String),
}

impl LedgerError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Whether the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Conflict(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn only_conflicts_are_retryable() {
        assert!(LedgerError::conflict("serialization failure").is_retryable());
        assert!(!LedgerError::not_found("item X").is_retryable());
        assert!(
            !LedgerError::InsufficientStock {
                item_code: "X001".to_string(),
                available: dec!(70),
                requested: dec!(100),
            }
            .is_retryable()
        );
    }

    #[test]
    fn insufficient_stock_message_names_the_item() {
        let err = LedgerError::InsufficientStock {
            item_code: "X001".to_string(),
            available: dec!(70),
            requested: dec!(100),
        };
        assert_eq!(
            err.to_string(),
            "insufficient stock for X001: available 70, requested 100"
        );
    }
}
