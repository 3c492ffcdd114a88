use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::debug;

use stockledger_core::{ItemId, ItemKey, LedgerResult, Page, Pagination, TransactionId};
use stockledger_inventory::transaction::history_order;
use stockledger_inventory::{
    InventoryItem, InventoryTransaction, ItemFilter, LockedItems, TransactionFilter, UnitOfWork,
    ValuationSummary,
};

use super::r#trait::{AtomicExecutor, CommittedUnit, ItemStore, StoreError, TransactionLog};

#[derive(Debug, Clone)]
struct StoredItem {
    item: InventoryItem,
    seq: u64,
}

#[derive(Debug, Clone)]
struct StoredTransaction {
    tx: InventoryTransaction,
    seq: u64,
}

#[derive(Debug, Default)]
struct State {
    items: HashMap<ItemId, StoredItem>,
    codes: HashMap<String, ItemId>,
    transactions: HashMap<TransactionId, StoredTransaction>,
    by_item: HashMap<ItemId, Vec<TransactionId>>,
    next_seq: u64,
}

impl State {
    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn resolve(&self, key: &ItemKey) -> Option<&StoredItem> {
        match key {
            ItemKey::Id(id) => self.items.get(id),
            ItemKey::Code(code) => self.codes.get(code).and_then(|id| self.items.get(id)),
        }
    }

    fn item_mut(&mut self, id: ItemId) -> Result<&mut InventoryItem, StoreError> {
        self.items
            .get_mut(&id)
            .map(|stored| &mut stored.item)
            .ok_or_else(|| StoreError::NotFound(format!("inventory item {id}")))
    }

    fn remove_transaction(&mut self, id: TransactionId) -> Option<InventoryTransaction> {
        let stored = self.transactions.remove(&id)?;
        if let Some(ids) = self.by_item.get_mut(&stored.tx.inventory_item_id) {
            ids.retain(|t| *t != id);
        }
        Some(stored.tx)
    }

    /// Item rows in history order.
    fn sorted_history(&self, item_id: ItemId) -> Vec<&StoredTransaction> {
        let mut rows: Vec<&StoredTransaction> = self
            .by_item
            .get(&item_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.transactions.get(id))
            .collect();
        rows.sort_by(|a, b| history_order((&a.tx, a.seq), (&b.tx, b.seq)));
        rows
    }
}

/// Reverse step for one write of an in-flight unit.
#[derive(Debug)]
enum Undo {
    RemoveItem(ItemId),
    RemoveTransaction(TransactionId),
    Unlink(TransactionId),
    RestoreBalance {
        id: ItemId,
        stock: Decimal,
        unit_cost: Option<Decimal>,
        updated_at: DateTime<Utc>,
    },
}

/// In-memory ledger store.
///
/// Intended for tests/dev and single-process deployments. Per-item mutexes give
/// units the same isolation row locks give the Postgres store.
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    state: RwLock<State>,
    item_locks: Mutex<HashMap<ItemId, Arc<Mutex<()>>>>,
    transaction_limit: Option<usize>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap the transaction log. Appends beyond `limit` rows fail with a backend error.
    pub fn with_transaction_limit(limit: usize) -> Self {
        Self {
            transaction_limit: Some(limit),
            ..Self::default()
        }
    }

    pub fn transaction_count(&self) -> usize {
        self.state.read().map(|s| s.transactions.len()).unwrap_or(0)
    }

    fn read_state(&self) -> Result<std::sync::RwLockReadGuard<'_, State>, StoreError> {
        self.state
            .read()
            .map_err(|_| StoreError::Backend("state lock poisoned".to_string()))
    }

    fn write_state(&self) -> Result<std::sync::RwLockWriteGuard<'_, State>, StoreError> {
        self.state
            .write()
            .map_err(|_| StoreError::Backend("state lock poisoned".to_string()))
    }

    /// Lock slots for `ids`, deduplicated and in ascending order.
    fn lock_slots(&self, ids: &[ItemId]) -> Result<Vec<Arc<Mutex<()>>>, StoreError> {
        let ordered: BTreeSet<ItemId> = ids.iter().copied().collect();
        let mut locks = self
            .item_locks
            .lock()
            .map_err(|_| StoreError::Backend("lock table poisoned".to_string()))?;
        Ok(ordered
            .into_iter()
            .map(|id| locks.entry(id).or_default().clone())
            .collect())
    }

    fn acquire(slots: &[Arc<Mutex<()>>]) -> Result<Vec<MutexGuard<'_, ()>>, StoreError> {
        slots
            .iter()
            .map(|slot| {
                slot.lock()
                    .map_err(|_| StoreError::Backend("item lock poisoned".to_string()))
            })
            .collect()
    }

    fn commit_unit<F>(&self, lock_ids: Vec<ItemId>, work: F) -> Result<CommittedUnit, StoreError>
    where
        F: FnOnce(&LockedItems) -> LedgerResult<UnitOfWork>,
    {
        let slots = self.lock_slots(&lock_ids)?;
        let _guards = Self::acquire(&slots)?;

        let locked = {
            let state = self.read_state()?;
            LockedItems::new(
                lock_ids
                    .iter()
                    .filter_map(|id| state.items.get(id))
                    .filter(|stored| !stored.item.is_deleted)
                    .map(|stored| stored.item.clone()),
            )
        };

        let unit = work(&locked)?;
        unit.validate_links()?;

        let mut state = self.write_state()?;
        let mut undo = Vec::new();
        match self.apply(&mut state, &lock_ids, unit, &mut undo) {
            Ok(committed) => Ok(committed),
            Err(err) => {
                debug!(steps = undo.len(), "rolling back in-memory unit");
                rollback(&mut state, undo);
                Err(err)
            }
        }
    }

    fn apply(
        &self,
        state: &mut State,
        lock_ids: &[ItemId],
        unit: UnitOfWork,
        undo: &mut Vec<Undo>,
    ) -> Result<CommittedUnit, StoreError> {
        let now = Utc::now();
        let mut committed = CommittedUnit::default();
        let new_item_id = unit.new_item.as_ref().map(|item| item.id);
        let writable = |id: ItemId| lock_ids.contains(&id) || new_item_id == Some(id);

        if let Some(item) = unit.new_item {
            let id = item.id;
            if state.codes.contains_key(&item.item_code) {
                return Err(StoreError::DuplicateCode(item.item_code));
            }
            if state.items.contains_key(&id) {
                return Err(StoreError::Conflict(format!("item {id} already exists")));
            }
            let seq = state.next_seq();
            state.codes.insert(item.item_code.clone(), id);
            state.items.insert(id, StoredItem { item, seq });
            undo.push(Undo::RemoveItem(id));
        }

        let mut assigned: Vec<TransactionId> = Vec::with_capacity(unit.appends.len());
        for append in unit.appends {
            if !writable(append.inventory_item_id) {
                return Err(StoreError::Backend(format!(
                    "unit appends to unlocked item {}",
                    append.inventory_item_id
                )));
            }
            if let Some(limit) = self.transaction_limit {
                if state.transactions.len() >= limit {
                    return Err(StoreError::Backend(format!(
                        "transaction log is full ({limit} rows)"
                    )));
                }
            }
            if !state.items.contains_key(&append.inventory_item_id) {
                return Err(StoreError::NotFound(format!(
                    "inventory item {}",
                    append.inventory_item_id
                )));
            }

            let id = TransactionId::new();
            let related = append.pair_with.and_then(|idx| assigned.get(idx).copied());
            if let Some(peer) = related {
                if let Some(stored) = state.transactions.get_mut(&peer) {
                    stored.tx.related_transaction_id = Some(id);
                    undo.push(Undo::Unlink(peer));
                }
            }

            let item_id = append.inventory_item_id;
            let tx = append.into_stored(id, related, now);
            let seq = state.next_seq();
            state.transactions.insert(id, StoredTransaction { tx, seq });
            state.by_item.entry(item_id).or_default().push(id);
            undo.push(Undo::RemoveTransaction(id));
            assigned.push(id);
        }

        for write in &unit.balances {
            if !writable(write.item_id) {
                return Err(StoreError::Backend(format!(
                    "unit writes balance of unlocked item {}",
                    write.item_id
                )));
            }
            let item = state.item_mut(write.item_id)?;
            undo.push(Undo::RestoreBalance {
                id: item.id,
                stock: item.current_stock,
                unit_cost: item.unit_cost,
                updated_at: item.updated_at,
            });
            item.current_stock = write.stock;
            item.unit_cost = write.unit_cost;
            item.updated_at = now;
        }

        if let Some(id) = new_item_id {
            if let Some(stored) = state.items.get(&id) {
                committed.items.push(stored.item.clone());
            }
        }
        for id in unit.balances.iter().map(|b| b.item_id) {
            if Some(id) == new_item_id || committed.item(id).is_some() {
                continue;
            }
            if let Some(stored) = state.items.get(&id) {
                committed.items.push(stored.item.clone());
            }
        }
        committed.transactions = assigned
            .iter()
            .filter_map(|id| state.transactions.get(id))
            .map(|stored| stored.tx.clone())
            .collect();
        Ok(committed)
    }
}

fn rollback(state: &mut State, undo: Vec<Undo>) {
    for step in undo.into_iter().rev() {
        match step {
            Undo::RemoveItem(id) => {
                if let Some(stored) = state.items.remove(&id) {
                    state.codes.remove(&stored.item.item_code);
                }
            }
            Undo::RemoveTransaction(id) => {
                state.remove_transaction(id);
            }
            Undo::Unlink(id) => {
                if let Some(stored) = state.transactions.get_mut(&id) {
                    stored.tx.related_transaction_id = None;
                }
            }
            Undo::RestoreBalance {
                id,
                stock,
                unit_cost,
                updated_at,
            } => {
                if let Some(stored) = state.items.get_mut(&id) {
                    stored.item.current_stock = stock;
                    stored.item.unit_cost = unit_cost;
                    stored.item.updated_at = updated_at;
                }
            }
        }
    }
}

#[async_trait]
impl ItemStore for InMemoryLedgerStore {
    async fn find_item(
        &self,
        key: &ItemKey,
        include_deleted: bool,
    ) -> Result<Option<InventoryItem>, StoreError> {
        let state = self.read_state()?;
        Ok(state
            .resolve(key)
            .filter(|stored| include_deleted || !stored.item.is_deleted)
            .map(|stored| stored.item.clone()))
    }

    async fn find_items(&self, ids: &[ItemId]) -> Result<Vec<InventoryItem>, StoreError> {
        let state = self.read_state()?;
        Ok(ids
            .iter()
            .filter_map(|id| state.items.get(id))
            .map(|stored| stored.item.clone())
            .collect())
    }

    async fn list_items(
        &self,
        filter: &ItemFilter,
        pagination: Pagination,
    ) -> Result<Page<InventoryItem>, StoreError> {
        let state = self.read_state()?;
        let mut matching: Vec<&StoredItem> = state
            .items
            .values()
            .filter(|stored| filter.matches(&stored.item))
            .collect();
        matching.sort_by(|a, b| {
            b.item
                .created_at
                .cmp(&a.item.created_at)
                .then_with(|| b.seq.cmp(&a.seq))
        });
        let total = matching.len() as u64;
        let items = pagination
            .slice(&matching)
            .into_iter()
            .map(|stored| stored.item.clone())
            .collect();
        Ok(Page::new(items, total, pagination))
    }

    async fn valuation_summary(&self) -> Result<ValuationSummary, StoreError> {
        let state = self.read_state()?;
        Ok(ValuationSummary::from_items(
            state.items.values().map(|stored| &stored.item),
        )?)
    }

    async fn update_item_details(&self, item: &InventoryItem) -> Result<InventoryItem, StoreError> {
        let slots = self.lock_slots(&[item.id])?;
        let _guards = Self::acquire(&slots)?;
        let mut state = self.write_state()?;

        if state
            .items
            .get(&item.id)
            .is_none_or(|stored| stored.item.is_deleted)
        {
            return Err(StoreError::NotFound(format!("inventory item {}", item.id)));
        }
        if let Some(owner) = state.codes.get(&item.item_code) {
            if *owner != item.id {
                return Err(StoreError::DuplicateCode(item.item_code.clone()));
            }
        }
        let stored = state.item_mut(item.id)?;
        let previous_code = std::mem::replace(&mut stored.item_code, item.item_code.clone());
        stored.name = item.name.clone();
        stored.description = item.description.clone();
        stored.category = item.category.clone();
        stored.unit = item.unit.clone();
        stored.location = item.location.clone();
        stored.supplier = item.supplier.clone();
        stored.min_stock_level = item.min_stock_level;
        stored.max_stock_level = item.max_stock_level;
        stored.updated_at = item.updated_at;
        let updated = stored.clone();

        if previous_code != updated.item_code {
            state.codes.remove(&previous_code);
            state.codes.insert(updated.item_code.clone(), updated.id);
        }
        Ok(updated)
    }

    async fn set_deleted(
        &self,
        id: ItemId,
        deleted_at: Option<DateTime<Utc>>,
    ) -> Result<InventoryItem, StoreError> {
        let slots = self.lock_slots(&[id])?;
        let _guards = Self::acquire(&slots)?;
        let mut state = self.write_state()?;

        let item = state.item_mut(id)?;
        item.is_deleted = deleted_at.is_some();
        item.deleted_at = deleted_at;
        item.updated_at = deleted_at.unwrap_or_else(Utc::now);
        Ok(item.clone())
    }

    async fn restore_items(&self, ids: &[ItemId], now: DateTime<Utc>) -> Result<u64, StoreError> {
        let slots = self.lock_slots(ids)?;
        let _guards = Self::acquire(&slots)?;
        let mut state = self.write_state()?;

        let mut restored = 0;
        for id in ids.iter().collect::<BTreeSet<_>>() {
            if let Some(stored) = state.items.get_mut(id) {
                if stored.item.is_deleted {
                    stored.item.is_deleted = false;
                    stored.item.deleted_at = None;
                    stored.item.updated_at = now;
                    restored += 1;
                }
            }
        }
        Ok(restored)
    }
}

#[async_trait]
impl TransactionLog for InMemoryLedgerStore {
    async fn get_transaction(
        &self,
        id: TransactionId,
    ) -> Result<Option<InventoryTransaction>, StoreError> {
        let state = self.read_state()?;
        Ok(state.transactions.get(&id).map(|stored| stored.tx.clone()))
    }

    async fn get_transactions(
        &self,
        ids: &[TransactionId],
    ) -> Result<Vec<InventoryTransaction>, StoreError> {
        let state = self.read_state()?;
        Ok(ids
            .iter()
            .filter_map(|id| state.transactions.get(id))
            .map(|stored| stored.tx.clone())
            .collect())
    }

    async fn list_by_item(
        &self,
        item_id: ItemId,
        filter: TransactionFilter,
        pagination: Pagination,
    ) -> Result<Page<InventoryTransaction>, StoreError> {
        let state = self.read_state()?;
        let matching: Vec<&StoredTransaction> = state
            .sorted_history(item_id)
            .into_iter()
            .filter(|stored| filter.matches(&stored.tx))
            .collect();
        let total = matching.len() as u64;
        let rows = pagination
            .slice(&matching)
            .into_iter()
            .map(|stored| stored.tx.clone())
            .collect();
        Ok(Page::new(rows, total, pagination))
    }

    async fn item_history(&self, item_id: ItemId) -> Result<Vec<InventoryTransaction>, StoreError> {
        let state = self.read_state()?;
        Ok(state
            .sorted_history(item_id)
            .into_iter()
            .rev()
            .map(|stored| stored.tx.clone())
            .collect())
    }

    async fn count_by_item(&self, item_id: ItemId) -> Result<u64, StoreError> {
        let state = self.read_state()?;
        Ok(state.by_item.get(&item_id).map_or(0, |ids| ids.len() as u64))
    }

    async fn bulk_delete(&self, item_id: ItemId, ids: &[TransactionId]) -> Result<u64, StoreError> {
        let slots = self.lock_slots(&[item_id])?;
        let _guards = Self::acquire(&slots)?;
        let mut state = self.write_state()?;

        let wanted: BTreeSet<TransactionId> = ids.iter().copied().collect();
        let missing: Vec<String> = wanted
            .iter()
            .filter(|id| {
                state
                    .transactions
                    .get(id)
                    .is_none_or(|stored| stored.tx.inventory_item_id != item_id)
            })
            .map(|id| id.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(StoreError::NotFound(format!(
                "transactions not found for item {item_id}: {}",
                missing.join(", ")
            )));
        }

        let mut deleted = 0;
        for id in &wanted {
            if let Some(tx) = state.remove_transaction(*id) {
                deleted += 1;
                if let Some(peer) = tx.related_transaction_id {
                    if let Some(stored) = state.transactions.get_mut(&peer) {
                        stored.tx.related_transaction_id = None;
                    }
                }
            }
        }
        Ok(deleted)
    }
}

#[async_trait]
impl AtomicExecutor for InMemoryLedgerStore {
    async fn run_atomic<F>(&self, lock_ids: Vec<ItemId>, work: F) -> Result<CommittedUnit, StoreError>
    where
        F: FnOnce(&LockedItems) -> LedgerResult<UnitOfWork> + Send + 'static,
    {
        self.commit_unit(lock_ids, work)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use stockledger_core::LedgerError;
    use stockledger_inventory::{NewItem, TransactionRequest, plan_create, plan_movement, plan_transfer};

    async fn seed(store: &InMemoryLedgerStore, code: &str, stock: Decimal) -> InventoryItem {
        let id = ItemId::new();
        let new_item = NewItem::new(code, code).with_initial_stock(stock, Some(dec!(1)));
        let committed = store
            .run_atomic(vec![], move |_| plan_create(new_item, id, None, Utc::now()))
            .await
            .unwrap();
        committed.item(id).cloned().unwrap()
    }

    #[tokio::test]
    async fn create_commits_item_row_and_balance_together() {
        let store = InMemoryLedgerStore::new();
        let item = seed(&store, "X001", dec!(100)).await;
        assert_eq!(item.current_stock, dec!(100));
        assert_eq!(store.count_by_item(item.id).await.unwrap(), 1);
        let by_code = store
            .find_item(&ItemKey::Code("X001".to_string()), false)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_code.id, item.id);
    }

    #[tokio::test]
    async fn duplicate_code_inserts_nothing() {
        let store = InMemoryLedgerStore::new();
        seed(&store, "X001", dec!(5)).await;
        let id = ItemId::new();
        let new_item = NewItem::new("X001", "again").with_initial_stock(dec!(3), None);
        let err = store
            .run_atomic(vec![], move |_| plan_create(new_item, id, None, Utc::now()))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateCode(code) if code == "X001"));
        assert_eq!(store.transaction_count(), 1);
        assert!(store.find_item(&ItemKey::Id(id), true).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rejected_plan_surfaces_the_domain_error() {
        let store = InMemoryLedgerStore::new();
        let item = seed(&store, "X001", dec!(5)).await;
        let id = item.id;
        let err = store
            .run_atomic(vec![id], move |locked| {
                plan_movement(locked.get(id)?, &TransactionRequest::issue(dec!(6)), None, Utc::now())
            })
            .await
            .unwrap_err();
        assert!(matches!(
            LedgerError::from(err),
            LedgerError::InsufficientStock { .. }
        ));
    }

    #[tokio::test]
    async fn full_log_rolls_back_the_first_transfer_row() {
        let store = InMemoryLedgerStore::with_transaction_limit(3);
        let a = seed(&store, "A", dec!(10)).await;
        let b = seed(&store, "B", dec!(0)).await;
        seed(&store, "C", dec!(1)).await;
        assert_eq!(store.transaction_count(), 2);

        // One free slot: the outbound row fits, the inbound row does not.
        let (a_id, b_id) = (a.id, b.id);
        let err = store
            .run_atomic(vec![a_id, b_id], move |locked| {
                plan_transfer(
                    locked.get(a_id)?,
                    locked.get(b_id)?,
                    &TransactionRequest::transfer(dec!(4), b_id),
                    None,
                    Utc::now(),
                )
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));

        assert_eq!(store.transaction_count(), 2);
        assert_eq!(store.count_by_item(a_id).await.unwrap(), 1);
        let items = store.find_items(&[a_id, b_id]).await.unwrap();
        assert_eq!(items[0].current_stock, dec!(10));
        assert_eq!(items[1].current_stock, dec!(0));
        assert_eq!(items[1].unit_cost, None);
    }

    #[tokio::test]
    async fn bulk_delete_rejects_foreign_rows_and_unlinks_peers() {
        let store = InMemoryLedgerStore::new();
        let a = seed(&store, "A", dec!(10)).await;
        let b = seed(&store, "B", dec!(0)).await;
        let (a_id, b_id) = (a.id, b.id);
        let committed = store
            .run_atomic(vec![a_id, b_id], move |locked| {
                plan_transfer(
                    locked.get(a_id)?,
                    locked.get(b_id)?,
                    &TransactionRequest::transfer(dec!(4), b_id),
                    None,
                    Utc::now(),
                )
            })
            .await
            .unwrap();
        let outbound = committed.transactions[0].id;
        let inbound = committed.transactions[1].id;

        let err = store.bulk_delete(a_id, &[outbound, inbound]).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        assert_eq!(store.count_by_item(a_id).await.unwrap(), 2);

        assert_eq!(store.bulk_delete(a_id, &[outbound, outbound]).await.unwrap(), 1);
        let survivor = store.get_transaction(inbound).await.unwrap().unwrap();
        assert_eq!(survivor.related_transaction_id, None);
    }

    #[tokio::test]
    async fn code_change_moves_the_lookup() {
        let store = InMemoryLedgerStore::new();
        let mut item = seed(&store, "OLD", dec!(1)).await;
        seed(&store, "TAKEN", dec!(1)).await;

        item.item_code = "TAKEN".to_string();
        assert!(matches!(
            store.update_item_details(&item).await,
            Err(StoreError::DuplicateCode(_))
        ));

        item.item_code = "NEW".to_string();
        item.current_stock = dec!(999);
        let updated = store.update_item_details(&item).await.unwrap();
        assert_eq!(updated.current_stock, dec!(1));
        assert!(
            store
                .find_item(&ItemKey::Code("OLD".to_string()), true)
                .await
                .unwrap()
                .is_none()
        );
        assert!(
            store
                .find_item(&ItemKey::Code("NEW".to_string()), true)
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn details_of_a_deleted_item_are_not_patched() {
        let store = InMemoryLedgerStore::new();
        let item = seed(&store, "X001", dec!(1)).await;
        store.set_deleted(item.id, Some(Utc::now())).await.unwrap();

        let mut patched = item.clone();
        patched.name = "Renamed".to_string();
        let err = store.update_item_details(&patched).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));

        let stored = store.find_item(&ItemKey::Id(item.id), true).await.unwrap().unwrap();
        assert_eq!(stored.name, item.name);
    }
}
