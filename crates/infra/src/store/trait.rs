use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;

use stockledger_core::{ItemId, ItemKey, LedgerError, LedgerResult, Page, Pagination, TransactionId};
use stockledger_inventory::{
    InventoryItem, InventoryTransaction, ItemFilter, LockedItems, TransactionFilter, UnitOfWork,
    ValuationSummary,
};

/// Ledger store operation error.
///
/// These are **infrastructure errors** (storage, locking, uniqueness). A unit of work
/// rejected by its own planning step is carried through unchanged as `Rejected`.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("item code already exists: {0}")]
    DuplicateCode(String),

    /// Serialization failure, deadlock or lock timeout. The unit left no trace.
    #[error("concurrent modification: {0}")]
    Conflict(String),

    #[error("storage backend failure: {0}")]
    Backend(String),

    #[error(transparent)]
    Rejected(#[from] LedgerError),
}

impl From<StoreError> for LedgerError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound(msg) => LedgerError::not_found(msg),
            StoreError::DuplicateCode(code) => LedgerError::DuplicateCode(code),
            StoreError::Conflict(msg) => LedgerError::conflict(msg),
            StoreError::Backend(msg) => LedgerError::storage(msg),
            StoreError::Rejected(err) => err,
        }
    }
}

/// Rows as they stand after a unit committed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommittedUnit {
    /// Inserted item first (if any), then every item whose balance was written.
    pub items: Vec<InventoryItem>,
    /// Appended rows, in plan order, with ids and links assigned.
    pub transactions: Vec<InventoryTransaction>,
}

impl CommittedUnit {
    pub fn item(&self, id: ItemId) -> Option<&InventoryItem> {
        self.items.iter().find(|item| item.id == id)
    }
}

/// Item rows. Balances are never written here; see [`AtomicExecutor`].
#[async_trait]
pub trait ItemStore: Send + Sync {
    async fn find_item(
        &self,
        key: &ItemKey,
        include_deleted: bool,
    ) -> Result<Option<InventoryItem>, StoreError>;

    /// Rows for `ids`, deleted or not. Unknown ids are skipped.
    async fn find_items(&self, ids: &[ItemId]) -> Result<Vec<InventoryItem>, StoreError>;

    /// Newest first.
    async fn list_items(
        &self,
        filter: &ItemFilter,
        pagination: Pagination,
    ) -> Result<Page<InventoryItem>, StoreError>;

    async fn valuation_summary(&self) -> Result<ValuationSummary, StoreError>;

    /// Persist the descriptive fields, code and thresholds of `item`.
    ///
    /// `current_stock` and `unit_cost` on the argument are ignored; the returned row
    /// carries the stored balance.
    /// Soft-deleted items are `NotFound`.
    async fn update_item_details(&self, item: &InventoryItem) -> Result<InventoryItem, StoreError>;

    /// `Some(at)` soft-deletes, `None` restores.
    async fn set_deleted(
        &self,
        id: ItemId,
        deleted_at: Option<DateTime<Utc>>,
    ) -> Result<InventoryItem, StoreError>;

    /// Restore whichever of `ids` are currently deleted; returns how many were.
    async fn restore_items(&self, ids: &[ItemId], now: DateTime<Utc>) -> Result<u64, StoreError>;
}

/// Append-mostly transaction log. Appends happen only through [`AtomicExecutor`].
#[async_trait]
pub trait TransactionLog: Send + Sync {
    async fn get_transaction(
        &self,
        id: TransactionId,
    ) -> Result<Option<InventoryTransaction>, StoreError>;

    /// Rows for `ids`. Unknown ids are skipped.
    async fn get_transactions(
        &self,
        ids: &[TransactionId],
    ) -> Result<Vec<InventoryTransaction>, StoreError>;

    /// History order: `transaction_date` descending, later commits first on ties.
    async fn list_by_item(
        &self,
        item_id: ItemId,
        filter: TransactionFilter,
        pagination: Pagination,
    ) -> Result<Page<InventoryTransaction>, StoreError>;

    /// Every surviving row for the item, oldest first.
    async fn item_history(&self, item_id: ItemId) -> Result<Vec<InventoryTransaction>, StoreError>;

    async fn count_by_item(&self, item_id: ItemId) -> Result<u64, StoreError>;

    /// Delete `ids`, all of which must belong to `item_id`, or delete nothing.
    ///
    /// Balances are left as they are. A surviving transfer peer loses its link.
    async fn bulk_delete(&self, item_id: ItemId, ids: &[TransactionId]) -> Result<u64, StoreError>;
}

/// Runs "read locked balances, plan, write balances + append rows" as one unit.
#[async_trait]
pub trait AtomicExecutor: Send + Sync {
    /// Lock `lock_ids` in ascending order, hand the latest committed rows to `work`,
    /// then apply the returned plan. Any failure discards every write of the unit.
    ///
    /// Soft-deleted items are not handed to `work`.
    async fn run_atomic<F>(&self, lock_ids: Vec<ItemId>, work: F) -> Result<CommittedUnit, StoreError>
    where
        F: FnOnce(&LockedItems) -> LedgerResult<UnitOfWork> + Send + 'static;
}

/// Everything the ledger service needs from a backend.
pub trait LedgerStore: ItemStore + TransactionLog + AtomicExecutor {}

impl<S> LedgerStore for S where S: ItemStore + TransactionLog + AtomicExecutor {}

#[async_trait]
impl<S> ItemStore for Arc<S>
where
    S: ItemStore + ?Sized,
{
    async fn find_item(
        &self,
        key: &ItemKey,
        include_deleted: bool,
    ) -> Result<Option<InventoryItem>, StoreError> {
        (**self).find_item(key, include_deleted).await
    }

    async fn find_items(&self, ids: &[ItemId]) -> Result<Vec<InventoryItem>, StoreError> {
        (**self).find_items(ids).await
    }

    async fn list_items(
        &self,
        filter: &ItemFilter,
        pagination: Pagination,
    ) -> Result<Page<InventoryItem>, StoreError> {
        (**self).list_items(filter, pagination).await
    }

    async fn valuation_summary(&self) -> Result<ValuationSummary, StoreError> {
        (**self).valuation_summary().await
    }

    async fn update_item_details(&self, item: &InventoryItem) -> Result<InventoryItem, StoreError> {
        (**self).update_item_details(item).await
    }

    async fn set_deleted(
        &self,
        id: ItemId,
        deleted_at: Option<DateTime<Utc>>,
    ) -> Result<InventoryItem, StoreError> {
        (**self).set_deleted(id, deleted_at).await
    }

    async fn restore_items(&self, ids: &[ItemId], now: DateTime<Utc>) -> Result<u64, StoreError> {
        (**self).restore_items(ids, now).await
    }
}

#[async_trait]
impl<S> TransactionLog for Arc<S>
where
    S: TransactionLog + ?Sized,
{
    async fn get_transaction(
        &self,
        id: TransactionId,
    ) -> Result<Option<InventoryTransaction>, StoreError> {
        (**self).get_transaction(id).await
    }

    async fn get_transactions(
        &self,
        ids: &[TransactionId],
    ) -> Result<Vec<InventoryTransaction>, StoreError> {
        (**self).get_transactions(ids).await
    }

    async fn list_by_item(
        &self,
        item_id: ItemId,
        filter: TransactionFilter,
        pagination: Pagination,
    ) -> Result<Page<InventoryTransaction>, StoreError> {
        (**self).list_by_item(item_id, filter, pagination).await
    }

    async fn item_history(&self, item_id: ItemId) -> Result<Vec<InventoryTransaction>, StoreError> {
        (**self).item_history(item_id).await
    }

    async fn count_by_item(&self, item_id: ItemId) -> Result<u64, StoreError> {
        (**self).count_by_item(item_id).await
    }

    async fn bulk_delete(&self, item_id: ItemId, ids: &[TransactionId]) -> Result<u64, StoreError> {
        (**self).bulk_delete(item_id, ids).await
    }
}

#[async_trait]
impl<S> AtomicExecutor for Arc<S>
where
    S: AtomicExecutor,
{
    async fn run_atomic<F>(&self, lock_ids: Vec<ItemId>, work: F) -> Result<CommittedUnit, StoreError>
    where
        F: FnOnce(&LockedItems) -> LedgerResult<UnitOfWork> + Send + 'static,
    {
        (**self).run_atomic(lock_ids, work).await
    }
}
