//! `InventoryLedger`: the entry points callers use.
//!
//! Resolves item keys, validates requests, and hands planning closures to the
//! store's atomic executor. Every balance change goes through one committed unit;
//! reads never cache.

use std::collections::{BTreeSet, HashMap};

use chrono::Utc;
use tracing::{info, instrument, warn};

use stockledger_core::{ItemId, ItemKey, LedgerError, LedgerResult, Page, Pagination, TransactionId};
use stockledger_inventory::{
    InventoryItem, InventoryTransaction, ItemFilter, ItemPatch, NewItem, StockAudit,
    TransactionFilter, TransactionRequest, TransactionType, TransactionView, ValuationSummary,
    plan_create, plan_movement, plan_transfer,
};

use crate::config::LedgerConfig;
use crate::store::LedgerStore;

/// Page-size limits applied to listing requests.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PageLimits {
    pub default_page_size: u32,
    pub max_page_size: u32,
}

impl Default for PageLimits {
    fn default() -> Self {
        let config = LedgerConfig::default();
        Self {
            default_page_size: config.default_page_size,
            max_page_size: config.max_page_size,
        }
    }
}

impl From<&LedgerConfig> for PageLimits {
    fn from(config: &LedgerConfig) -> Self {
        Self {
            default_page_size: config.default_page_size,
            max_page_size: config.max_page_size,
        }
    }
}

/// Stock ledger service over an injected store.
///
/// `Send + Sync` whenever `S` is; share it behind an `Arc`.
#[derive(Debug)]
pub struct InventoryLedger<S> {
    store: S,
    limits: PageLimits,
}

fn rejected(operation: &'static str, err: &LedgerError) {
    match err {
        LedgerError::InsufficientStock { .. } | LedgerError::Conflict(_) => {
            warn!(operation, error = %err, "ledger operation rejected");
        }
        _ => {}
    }
}

impl<S: LedgerStore> InventoryLedger<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            limits: PageLimits::default(),
        }
    }

    pub fn with_page_limits(mut self, limits: PageLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Fill in the configured default size and validate against the maximum.
    pub fn pagination(&self, page: Option<u32>, page_size: Option<u32>) -> LedgerResult<Pagination> {
        let pagination = Pagination::new(
            page.unwrap_or(1),
            page_size.unwrap_or(self.limits.default_page_size),
        );
        pagination.validate(self.limits.max_page_size)?;
        Ok(pagination)
    }

    async fn resolve(&self, key: &ItemKey) -> LedgerResult<InventoryItem> {
        self.store
            .find_item(key, false)
            .await?
            .ok_or_else(|| LedgerError::not_found(format!("inventory item {key}")))
    }

    #[instrument(skip(self, new_item), fields(code = %new_item.item_code))]
    pub async fn create_item(
        &self,
        new_item: NewItem,
        action_by: Option<String>,
    ) -> LedgerResult<InventoryItem> {
        new_item.validate()?;
        let id = ItemId::new();
        let now = Utc::now();
        let committed = self
            .store
            .run_atomic(vec![], move |_| plan_create(new_item, id, action_by, now))
            .await
            .map_err(LedgerError::from)
            .inspect_err(|e| rejected("create_item", e))?;

        let item = committed
            .item(id)
            .cloned()
            .ok_or_else(|| LedgerError::storage(format!("created item {id} missing from commit")))?;
        info!(
            item_id = %item.id,
            code = %item.item_code,
            opening_stock = %item.current_stock,
            "inventory item created"
        );
        Ok(item)
    }

    /// Metadata only; balances are never patched.
    #[instrument(skip(self, patch), fields(item = %key))]
    pub async fn update_item(&self, key: &ItemKey, patch: ItemPatch) -> LedgerResult<InventoryItem> {
        let item = self.resolve(key).await?;
        let updated = patch.apply_to(&item, Utc::now())?;
        Ok(self.store.update_item_details(&updated).await?)
    }

    pub async fn get_item(&self, key: &ItemKey) -> LedgerResult<InventoryItem> {
        self.resolve(key).await
    }

    pub async fn list_items(
        &self,
        filter: &ItemFilter,
        pagination: Pagination,
    ) -> LedgerResult<Page<InventoryItem>> {
        pagination.validate(self.limits.max_page_size)?;
        Ok(self.store.list_items(filter, pagination).await?)
    }

    #[instrument(skip(self), fields(item = %key))]
    pub async fn delete_item(&self, key: &ItemKey) -> LedgerResult<InventoryItem> {
        let item = self.resolve(key).await?;
        let deleted = self.store.set_deleted(item.id, Some(Utc::now())).await?;
        info!(item_id = %deleted.id, "inventory item soft-deleted");
        Ok(deleted)
    }

    #[instrument(skip(self))]
    pub async fn restore_item(&self, id: ItemId) -> LedgerResult<InventoryItem> {
        let item = self
            .store
            .find_item(&ItemKey::Id(id), true)
            .await?
            .ok_or_else(|| LedgerError::not_found(format!("inventory item {id}")))?;
        if !item.is_deleted {
            return Err(LedgerError::invalid(format!(
                "inventory item {} is not deleted",
                item.item_code
            )));
        }
        Ok(self.store.set_deleted(id, None).await?)
    }

    /// Restores the deleted subset of `ids`; returns how many were restored.
    #[instrument(skip(self, ids), fields(requested = ids.len()))]
    pub async fn bulk_restore_items(&self, ids: &[ItemId]) -> LedgerResult<u64> {
        if ids.is_empty() {
            return Err(LedgerError::invalid("no item ids given"));
        }
        let restored = self.store.restore_items(ids, Utc::now()).await?;
        info!(restored, "inventory items restored");
        Ok(restored)
    }

    pub async fn valuation_summary(&self) -> LedgerResult<ValuationSummary> {
        Ok(self.store.valuation_summary().await?)
    }

    /// Record a movement and return the committed row.
    ///
    /// For a transfer this is the source-side row; its related transaction is the
    /// destination row.
    #[instrument(
        skip(self, request, action_by),
        fields(item = %key, kind = %request.transaction_type, quantity = %request.quantity)
    )]
    pub async fn record_transaction(
        &self,
        key: &ItemKey,
        request: TransactionRequest,
        action_by: Option<String>,
    ) -> LedgerResult<InventoryTransaction> {
        let source = self.resolve(key).await?;
        let now = Utc::now();

        let (lock_ids, committed) = if request.transaction_type == TransactionType::Transfer {
            let destination_key = request.destination.clone().ok_or_else(|| {
                LedgerError::invalid("a destination item is required for transfers")
            })?;
            let destination = self.resolve(&destination_key).await?;
            if destination.id == source.id {
                return Err(LedgerError::invalid("cannot transfer an item to itself"));
            }
            let (source_id, destination_id) = (source.id, destination.id);
            let lock_ids = vec![source_id, destination_id];
            let committed = self
                .store
                .run_atomic(lock_ids.clone(), move |locked| {
                    plan_transfer(
                        locked.get(source_id)?,
                        locked.get(destination_id)?,
                        &request,
                        action_by,
                        now,
                    )
                })
                .await;
            (lock_ids, committed)
        } else {
            let item_id = source.id;
            let committed = self
                .store
                .run_atomic(vec![item_id], move |locked| {
                    plan_movement(locked.get(item_id)?, &request, action_by, now)
                })
                .await;
            (vec![item_id], committed)
        };

        let committed = committed
            .map_err(LedgerError::from)
            .inspect_err(|e| rejected("record_transaction", e))?;
        let recorded = committed
            .transactions
            .first()
            .cloned()
            .ok_or_else(|| LedgerError::storage("unit committed without a transaction row"))?;

        info!(
            items = ?lock_ids,
            transaction_id = %recorded.id,
            kind = %recorded.transaction_type,
            quantity = %recorded.quantity,
            "ledger transaction committed"
        );
        Ok(recorded)
    }

    pub async fn list_transactions(
        &self,
        key: &ItemKey,
        filter: TransactionFilter,
        pagination: Pagination,
    ) -> LedgerResult<Page<TransactionView>> {
        pagination.validate(self.limits.max_page_size)?;
        let item = self.resolve(key).await?;
        let page = self.store.list_by_item(item.id, filter, pagination).await?;
        let total = page.total;
        let views = self.views(page.items).await?;
        Ok(Page::new(views, total, pagination))
    }

    pub async fn get_transaction(&self, id: TransactionId) -> LedgerResult<TransactionView> {
        let tx = self
            .store
            .get_transaction(id)
            .await?
            .ok_or_else(|| LedgerError::not_found(format!("transaction {id}")))?;
        self.views(vec![tx])
            .await?
            .pop()
            .ok_or_else(|| LedgerError::not_found(format!("transaction {id}")))
    }

    pub async fn transaction_count(&self, key: &ItemKey) -> LedgerResult<u64> {
        let item = self.resolve(key).await?;
        Ok(self.store.count_by_item(item.id).await?)
    }

    /// Administrative delete; stock is not recomputed (see [`Self::audit_item`]).
    #[instrument(skip(self, ids), fields(item = %key, requested = ids.len()))]
    pub async fn bulk_delete_transactions(
        &self,
        key: &ItemKey,
        ids: &[TransactionId],
    ) -> LedgerResult<u64> {
        if ids.is_empty() {
            return Err(LedgerError::invalid("no transaction ids given"));
        }
        let item = self.resolve(key).await?;
        let deleted = self.store.bulk_delete(item.id, ids).await?;
        warn!(
            item_id = %item.id,
            deleted,
            "ledger rows deleted without recomputing stock"
        );
        Ok(deleted)
    }

    /// Replay surviving history against the stored balance. Deleted items included.
    pub async fn audit_item(&self, key: &ItemKey) -> LedgerResult<StockAudit> {
        let item = self
            .store
            .find_item(key, true)
            .await?
            .ok_or_else(|| LedgerError::not_found(format!("inventory item {key}")))?;
        let history = self.store.item_history(item.id).await?;
        let audit = StockAudit::replay(&item, &history)?;
        if !audit.is_consistent() {
            warn!(item_id = %item.id, drift = %audit.drift, "stock drifted from ledger");
        }
        Ok(audit)
    }

    /// Attach the transfer peer row and the peer's item to each row.
    async fn views(&self, rows: Vec<InventoryTransaction>) -> LedgerResult<Vec<TransactionView>> {
        let related_ids: Vec<TransactionId> = rows
            .iter()
            .filter_map(|tx| tx.related_transaction_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let related: HashMap<TransactionId, InventoryTransaction> = self
            .store
            .get_transactions(&related_ids)
            .await?
            .into_iter()
            .map(|tx| (tx.id, tx))
            .collect();

        let item_ids: Vec<ItemId> = related
            .values()
            .map(|tx| tx.inventory_item_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let items: HashMap<ItemId, InventoryItem> = self
            .store
            .find_items(&item_ids)
            .await?
            .into_iter()
            .map(|item| (item.id, item))
            .collect();

        Ok(rows
            .into_iter()
            .map(|tx| {
                let related_transaction = tx
                    .related_transaction_id
                    .and_then(|id| related.get(&id))
                    .cloned();
                let related_item = related_transaction
                    .as_ref()
                    .and_then(|peer| items.get(&peer.inventory_item_id))
                    .map(InventoryItem::summary);
                TransactionView {
                    transaction: tx,
                    related_transaction,
                    related_item,
                }
            })
            .collect())
    }
}
