//! Postgres-backed ledger store.
//!
//! Every unit of work runs in one database transaction: the touched item rows are
//! locked with `SELECT ... FOR UPDATE` in ascending id order, the plan is computed
//! against those rows, and the writes commit together or not at all.
//!
//! ## Error Mapping
//!
//! | PostgreSQL Error Code | StoreError | Scenario |
//! |----------------------|------------|----------|
//! | `40001` | `Conflict` | Serialization failure |
//! | `40P01` | `Conflict` | Deadlock detected |
//! | `55P03` | `Conflict` | `lock_timeout` expired while waiting for a row lock |
//! | `23505` on `inventory_items_item_code_key` | `DuplicateCode` | Item code already taken |
//! | Any other | `Backend` | Constraint violations, network errors, pool closed, ... |

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::{Span, instrument};
use uuid::Uuid;

use stockledger_core::{ItemId, ItemKey, LedgerResult, Page, Pagination, TransactionId};
use stockledger_inventory::{
    InventoryItem, InventoryTransaction, ItemFilter, LockedItems, TransactionFilter,
    TransactionType, TransferDirection, UnitOfWork, ValuationSummary,
};

use super::r#trait::{AtomicExecutor, CommittedUnit, ItemStore, StoreError, TransactionLog};

const MIGRATION: &str = include_str!("../../migrations/0001_inventory_ledger.sql");
const ITEM_CODE_CONSTRAINT: &str = "inventory_items_item_code_key";

const ITEM_COLUMNS: &str = "id, item_code, name, description, category, unit, location, supplier, \
     current_stock, unit_cost, min_stock_level, max_stock_level, is_deleted, deleted_at, \
     created_at, updated_at";

const TRANSACTION_COLUMNS: &str = "id, inventory_item_id, transaction_type, transfer_direction, \
     quantity, unit_cost, reference, notes, action_by, related_transaction_id, transaction_date, \
     created_at";

/// Postgres-backed ledger store.
///
/// `Send + Sync`; all access goes through the SQLx connection pool.
#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: Arc<PgPool>,
    lock_timeout: Duration,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self {
            pool: Arc::new(pool),
            lock_timeout,
        }
    }

    /// Create the ledger tables if they do not exist yet.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(MIGRATION)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    async fn begin(&self) -> Result<Transaction<'_, Postgres>, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        sqlx::query(&format!(
            "SET LOCAL lock_timeout = {}",
            self.lock_timeout.as_millis()
        ))
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("set_lock_timeout", e))?;
        Ok(tx)
    }

    async fn apply(
        tx: &mut Transaction<'_, Postgres>,
        lock_ids: &[ItemId],
        unit: UnitOfWork,
    ) -> Result<CommittedUnit, StoreError> {
        let now = Utc::now();
        let new_item_id = unit.new_item.as_ref().map(|item| item.id);
        let writable = |id: ItemId| lock_ids.contains(&id) || new_item_id == Some(id);
        let mut committed = CommittedUnit::default();

        if let Some(item) = &unit.new_item {
            let row = sqlx::query(&format!(
                r#"
                INSERT INTO inventory_items (
                    id, item_code, name, description, category, unit, location, supplier,
                    current_stock, unit_cost, min_stock_level, max_stock_level,
                    is_deleted, deleted_at, created_at, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
                RETURNING {ITEM_COLUMNS}
                "#
            ))
            .bind(item.id.as_uuid())
            .bind(&item.item_code)
            .bind(&item.name)
            .bind(&item.description)
            .bind(&item.category)
            .bind(&item.unit)
            .bind(&item.location)
            .bind(&item.supplier)
            .bind(item.current_stock)
            .bind(item.unit_cost)
            .bind(item.min_stock_level)
            .bind(item.max_stock_level)
            .bind(item.is_deleted)
            .bind(item.deleted_at)
            .bind(item.created_at)
            .bind(item.updated_at)
            .fetch_one(&mut **tx)
            .await
            .map_err(|e| {
                if is_code_violation(&e) {
                    StoreError::DuplicateCode(item.item_code.clone())
                } else {
                    map_sqlx_error("insert_item", e)
                }
            })?;
            committed.items.push(ItemRow::from_row(&row).map_err(decode_error)?.into());
        }

        for (idx, append) in unit.appends.into_iter().enumerate() {
            if !writable(append.inventory_item_id) {
                return Err(StoreError::Backend(format!(
                    "unit appends to unlocked item {}",
                    append.inventory_item_id
                )));
            }
            let id = TransactionId::new();
            let related = append
                .pair_with
                .and_then(|peer| committed.transactions.get(peer).map(|t| t.id));

            sqlx::query(
                r#"
                INSERT INTO inventory_transactions (
                    id, inventory_item_id, transaction_type, transfer_direction, quantity,
                    unit_cost, reference, notes, action_by, related_transaction_id,
                    transaction_date, created_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                "#,
            )
            .bind(id.as_uuid())
            .bind(append.inventory_item_id.as_uuid())
            .bind(append.transaction_type.as_str())
            .bind(append.transfer_direction.map(|d| d.as_str()))
            .bind(append.quantity)
            .bind(append.unit_cost)
            .bind(&append.reference)
            .bind(&append.notes)
            .bind(&append.action_by)
            .bind(related.map(Uuid::from))
            .bind(append.transaction_date)
            .bind(now)
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("insert_transaction", e))?;

            if let (Some(peer_idx), Some(peer)) = (append.pair_with, related) {
                sqlx::query(
                    "UPDATE inventory_transactions SET related_transaction_id = $1 WHERE id = $2",
                )
                .bind(id.as_uuid())
                .bind(peer.as_uuid())
                .execute(&mut **tx)
                .await
                .map_err(|e| map_sqlx_error("link_transaction", e))?;
                if let Some(stored) = committed.transactions.get_mut(peer_idx) {
                    stored.related_transaction_id = Some(id);
                }
            }

            tracing::trace!(idx, transaction_id = %id, "appended ledger row");
            committed
                .transactions
                .push(append.into_stored(id, related, now));
        }

        for write in &unit.balances {
            if !writable(write.item_id) {
                return Err(StoreError::Backend(format!(
                    "unit writes balance of unlocked item {}",
                    write.item_id
                )));
            }
            let row = sqlx::query(&format!(
                r#"
                UPDATE inventory_items
                SET current_stock = $2, unit_cost = $3, updated_at = $4
                WHERE id = $1
                RETURNING {ITEM_COLUMNS}
                "#
            ))
            .bind(write.item_id.as_uuid())
            .bind(write.stock)
            .bind(write.unit_cost)
            .bind(now)
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("write_balance", e))?
            .ok_or_else(|| StoreError::NotFound(format!("inventory item {}", write.item_id)))?;
            let item: InventoryItem = ItemRow::from_row(&row).map_err(decode_error)?.into();
            committed.items.retain(|existing| existing.id != item.id);
            committed.items.push(item);
        }

        Ok(committed)
    }

    async fn fetch_items(
        &self,
        operation: &str,
        query: sqlx::query::Query<'_, Postgres, sqlx::postgres::PgArguments>,
    ) -> Result<Vec<InventoryItem>, StoreError> {
        let rows = query
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        rows.iter()
            .map(|row| ItemRow::from_row(row).map(InventoryItem::from).map_err(decode_error))
            .collect()
    }

    async fn fetch_transactions(
        &self,
        operation: &str,
        query: sqlx::query::Query<'_, Postgres, sqlx::postgres::PgArguments>,
    ) -> Result<Vec<InventoryTransaction>, StoreError> {
        let rows = query
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        rows.iter()
            .map(|row| {
                TransactionRow::from_row(row)
                    .map_err(decode_error)
                    .and_then(InventoryTransaction::try_from)
            })
            .collect()
    }
}

fn uuids<T: Copy + Into<Uuid>>(ids: &[T]) -> Vec<Uuid> {
    ids.iter().map(|id| (*id).into()).collect()
}

#[async_trait]
impl ItemStore for PostgresLedgerStore {
    #[instrument(skip(self), fields(item = %key), err)]
    async fn find_item(
        &self,
        key: &ItemKey,
        include_deleted: bool,
    ) -> Result<Option<InventoryItem>, StoreError> {
        let by_id = format!(
            "SELECT {ITEM_COLUMNS} FROM inventory_items WHERE id = $1 AND ($2 OR is_deleted = FALSE)"
        );
        let by_code = format!(
            "SELECT {ITEM_COLUMNS} FROM inventory_items WHERE item_code = $1 AND ($2 OR is_deleted = FALSE)"
        );
        let query = match key {
            ItemKey::Id(id) => sqlx::query(&by_id).bind(*id.as_uuid()),
            ItemKey::Code(code) => sqlx::query(&by_code).bind(code.as_str()),
        };
        let mut items = self
            .fetch_items("find_item", query.bind(include_deleted))
            .await?;
        Ok(items.pop())
    }

    async fn find_items(&self, ids: &[ItemId]) -> Result<Vec<InventoryItem>, StoreError> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        let sql = format!("SELECT {ITEM_COLUMNS} FROM inventory_items WHERE id = ANY($1)");
        self.fetch_items("find_items", sqlx::query(&sql).bind(uuids(ids)))
            .await
    }

    #[instrument(skip(self), err)]
    async fn list_items(
        &self,
        filter: &ItemFilter,
        pagination: Pagination,
    ) -> Result<Page<InventoryItem>, StoreError> {
        const WHERE: &str = "($1::text IS NULL OR category = $1) \
             AND ($2 OR is_deleted = FALSE) \
             AND (NOT $3 OR (min_stock_level IS NOT NULL AND current_stock <= min_stock_level))";

        let total: i64 = sqlx::query(&format!("SELECT COUNT(*) FROM inventory_items WHERE {WHERE}"))
            .bind(&filter.category)
            .bind(filter.include_deleted)
            .bind(filter.low_stock)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("count_items", e))?
            .try_get(0)
            .map_err(decode_error)?;

        let rows = sqlx::query(&format!(
            "SELECT {ITEM_COLUMNS} FROM inventory_items WHERE {WHERE} \
             ORDER BY created_at DESC, id DESC LIMIT $4 OFFSET $5"
        ))
        .bind(&filter.category)
        .bind(filter.include_deleted)
        .bind(filter.low_stock)
        .bind(pagination.limit() as i64)
        .bind(pagination.offset() as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_items", e))?;

        let items = rows
            .iter()
            .map(|row| ItemRow::from_row(row).map(InventoryItem::from).map_err(decode_error))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page::new(items, total.max(0) as u64, pagination))
    }

    #[instrument(skip(self), err)]
    async fn valuation_summary(&self) -> Result<ValuationSummary, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total_items,
                COUNT(unit_cost) AS valued_items,
                COALESCE(SUM(current_stock), 0) AS total_quantity,
                COALESCE(SUM(current_stock * unit_cost), 0) AS total_value
            FROM inventory_items
            WHERE is_deleted = FALSE
            "#,
        )
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("valuation_summary", e))?;

        let total_items: i64 = row.try_get("total_items").map_err(decode_error)?;
        let valued_items: i64 = row.try_get("valued_items").map_err(decode_error)?;
        Ok(ValuationSummary {
            total_items: total_items as usize,
            valued_items: valued_items as usize,
            unvalued_items: (total_items - valued_items) as usize,
            total_quantity: row.try_get("total_quantity").map_err(decode_error)?,
            total_value: row.try_get("total_value").map_err(decode_error)?,
        })
    }

    #[instrument(skip(self, item), fields(item_id = %item.id), err)]
    async fn update_item_details(&self, item: &InventoryItem) -> Result<InventoryItem, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE inventory_items
            SET item_code = $2, name = $3, description = $4, category = $5, unit = $6,
                location = $7, supplier = $8, min_stock_level = $9, max_stock_level = $10,
                updated_at = $11
            WHERE id = $1 AND is_deleted = FALSE
            RETURNING {ITEM_COLUMNS}
            "#
        ))
        .bind(item.id.as_uuid())
        .bind(&item.item_code)
        .bind(&item.name)
        .bind(&item.description)
        .bind(&item.category)
        .bind(&item.unit)
        .bind(&item.location)
        .bind(&item.supplier)
        .bind(item.min_stock_level)
        .bind(item.max_stock_level)
        .bind(item.updated_at)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| {
            if is_code_violation(&e) {
                StoreError::DuplicateCode(item.item_code.clone())
            } else {
                map_sqlx_error("update_item_details", e)
            }
        })?
        .ok_or_else(|| StoreError::NotFound(format!("inventory item {}", item.id)))?;
        Ok(ItemRow::from_row(&row).map_err(decode_error)?.into())
    }

    #[instrument(skip(self), err)]
    async fn set_deleted(
        &self,
        id: ItemId,
        deleted_at: Option<DateTime<Utc>>,
    ) -> Result<InventoryItem, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE inventory_items
            SET is_deleted = $2, deleted_at = $3, updated_at = COALESCE($3, NOW())
            WHERE id = $1
            RETURNING {ITEM_COLUMNS}
            "#
        ))
        .bind(id.as_uuid())
        .bind(deleted_at.is_some())
        .bind(deleted_at)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("set_deleted", e))?
        .ok_or_else(|| StoreError::NotFound(format!("inventory item {id}")))?;
        Ok(ItemRow::from_row(&row).map_err(decode_error)?.into())
    }

    #[instrument(skip(self, ids), fields(count = ids.len()), err)]
    async fn restore_items(&self, ids: &[ItemId], now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE inventory_items
            SET is_deleted = FALSE, deleted_at = NULL, updated_at = $2
            WHERE id = ANY($1) AND is_deleted = TRUE
            "#,
        )
        .bind(uuids(ids))
        .bind(now)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("restore_items", e))?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl TransactionLog for PostgresLedgerStore {
    async fn get_transaction(
        &self,
        id: TransactionId,
    ) -> Result<Option<InventoryTransaction>, StoreError> {
        let sql = format!("SELECT {TRANSACTION_COLUMNS} FROM inventory_transactions WHERE id = $1");
        let mut rows = self
            .fetch_transactions("get_transaction", sqlx::query(&sql).bind(id.as_uuid()))
            .await?;
        Ok(rows.pop())
    }

    async fn get_transactions(
        &self,
        ids: &[TransactionId],
    ) -> Result<Vec<InventoryTransaction>, StoreError> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        let sql =
            format!("SELECT {TRANSACTION_COLUMNS} FROM inventory_transactions WHERE id = ANY($1)");
        self.fetch_transactions("get_transactions", sqlx::query(&sql).bind(uuids(ids)))
            .await
    }

    #[instrument(skip(self), fields(item_id = %item_id, rows = tracing::field::Empty), err)]
    async fn list_by_item(
        &self,
        item_id: ItemId,
        filter: TransactionFilter,
        pagination: Pagination,
    ) -> Result<Page<InventoryTransaction>, StoreError> {
        let wanted_type = filter.transaction_type.map(|t| t.as_str());
        let total: i64 = sqlx::query(
            r#"
            SELECT COUNT(*) FROM inventory_transactions
            WHERE inventory_item_id = $1 AND ($2::text IS NULL OR transaction_type = $2)
            "#,
        )
        .bind(item_id.as_uuid())
        .bind(wanted_type)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("count_transactions", e))?
        .try_get(0)
        .map_err(decode_error)?;

        let sql = format!(
            r#"
            SELECT {TRANSACTION_COLUMNS} FROM inventory_transactions
            WHERE inventory_item_id = $1 AND ($2::text IS NULL OR transaction_type = $2)
            ORDER BY transaction_date DESC, seq DESC
            LIMIT $3 OFFSET $4
            "#
        );
        let rows = self
            .fetch_transactions(
                "list_by_item",
                sqlx::query(&sql)
                    .bind(item_id.as_uuid())
                    .bind(wanted_type)
                    .bind(pagination.limit() as i64)
                    .bind(pagination.offset() as i64),
            )
            .await?;
        Span::current().record("rows", rows.len());
        Ok(Page::new(rows, total.max(0) as u64, pagination))
    }

    async fn item_history(&self, item_id: ItemId) -> Result<Vec<InventoryTransaction>, StoreError> {
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM inventory_transactions \
             WHERE inventory_item_id = $1 ORDER BY transaction_date ASC, seq ASC"
        );
        self.fetch_transactions("item_history", sqlx::query(&sql).bind(item_id.as_uuid()))
            .await
    }

    async fn count_by_item(&self, item_id: ItemId) -> Result<u64, StoreError> {
        let count: i64 =
            sqlx::query("SELECT COUNT(*) FROM inventory_transactions WHERE inventory_item_id = $1")
                .bind(item_id.as_uuid())
                .fetch_one(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("count_by_item", e))?
                .try_get(0)
                .map_err(decode_error)?;
        Ok(count.max(0) as u64)
    }

    #[instrument(skip(self, ids), fields(item_id = %item_id, requested = ids.len()), err)]
    async fn bulk_delete(&self, item_id: ItemId, ids: &[TransactionId]) -> Result<u64, StoreError> {
        let wanted: BTreeSet<TransactionId> = ids.iter().copied().collect();
        let wanted_ids: Vec<TransactionId> = wanted.iter().copied().collect();
        let mut tx = self.begin().await?;

        let rows = sqlx::query(
            r#"
            SELECT id FROM inventory_transactions
            WHERE id = ANY($1) AND inventory_item_id = $2
            ORDER BY id
            FOR UPDATE
            "#,
        )
        .bind(uuids(&wanted_ids))
        .bind(item_id.as_uuid())
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("lock_transactions", e))?;

        let found: BTreeSet<TransactionId> = rows
            .iter()
            .map(|row| row.try_get::<Uuid, _>("id").map(TransactionId::from_uuid))
            .collect::<Result<_, _>>()
            .map_err(decode_error)?;
        let missing: Vec<String> = wanted.difference(&found).map(|id| id.to_string()).collect();
        if !missing.is_empty() {
            // Dropping `tx` rolls back.
            return Err(StoreError::NotFound(format!(
                "transactions not found for item {item_id}: {}",
                missing.join(", ")
            )));
        }

        let result = sqlx::query("DELETE FROM inventory_transactions WHERE id = ANY($1)")
            .bind(uuids(&wanted_ids))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_transactions", e))?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl AtomicExecutor for PostgresLedgerStore {
    #[instrument(skip(self, work), fields(locks = lock_ids.len()), err)]
    async fn run_atomic<F>(&self, lock_ids: Vec<ItemId>, work: F) -> Result<CommittedUnit, StoreError>
    where
        F: FnOnce(&LockedItems) -> LedgerResult<UnitOfWork> + Send + 'static,
    {
        let ordered: Vec<ItemId> = lock_ids.iter().copied().collect::<BTreeSet<_>>().into_iter().collect();
        let mut tx = self.begin().await?;

        let rows = if ordered.is_empty() {
            vec![]
        } else {
            sqlx::query(&format!(
                "SELECT {ITEM_COLUMNS} FROM inventory_items WHERE id = ANY($1) ORDER BY id FOR UPDATE"
            ))
            .bind(uuids(&ordered))
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("lock_items", e))?
        };
        let locked = LockedItems::new(
            rows.iter()
                .map(|row| ItemRow::from_row(row).map(InventoryItem::from).map_err(decode_error))
                .collect::<Result<Vec<_>, _>>()?
                .into_iter()
                .filter(|item| !item.is_deleted),
        );

        let unit = work(&locked)?;
        unit.validate_links()?;

        let committed = Self::apply(&mut tx, &ordered, unit).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(committed)
    }
}

/// Map SQLx errors to `StoreError` with operation context.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("40001") | Some("40P01") | Some("55P03") => StoreError::Conflict(msg),
                Some("23505") if db_err.constraint() == Some(ITEM_CODE_CONSTRAINT) => {
                    StoreError::DuplicateCode(msg)
                }
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {operation}"))
        }
        other => StoreError::Backend(format!("sqlx error in {operation}: {other}")),
    }
}

fn is_code_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        return db_err.code().as_deref() == Some("23505")
            && db_err.constraint() == Some(ITEM_CODE_CONSTRAINT);
    }
    false
}

fn decode_error(err: sqlx::Error) -> StoreError {
    StoreError::Backend(format!("failed to decode row: {err}"))
}

#[derive(Debug)]
struct ItemRow {
    id: Uuid,
    item_code: String,
    name: String,
    description: Option<String>,
    category: Option<String>,
    unit: Option<String>,
    location: Option<String>,
    supplier: Option<String>,
    current_stock: Decimal,
    unit_cost: Option<Decimal>,
    min_stock_level: Option<Decimal>,
    max_stock_level: Option<Decimal>,
    is_deleted: bool,
    deleted_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for ItemRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(ItemRow {
            id: row.try_get("id")?,
            item_code: row.try_get("item_code")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            category: row.try_get("category")?,
            unit: row.try_get("unit")?,
            location: row.try_get("location")?,
            supplier: row.try_get("supplier")?,
            current_stock: row.try_get("current_stock")?,
            unit_cost: row.try_get("unit_cost")?,
            min_stock_level: row.try_get("min_stock_level")?,
            max_stock_level: row.try_get("max_stock_level")?,
            is_deleted: row.try_get("is_deleted")?,
            deleted_at: row.try_get("deleted_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl From<ItemRow> for InventoryItem {
    fn from(row: ItemRow) -> Self {
        InventoryItem {
            id: ItemId::from_uuid(row.id),
            item_code: row.item_code,
            name: row.name,
            description: row.description,
            category: row.category,
            unit: row.unit,
            location: row.location,
            supplier: row.supplier,
            current_stock: row.current_stock,
            unit_cost: row.unit_cost,
            min_stock_level: row.min_stock_level,
            max_stock_level: row.max_stock_level,
            is_deleted: row.is_deleted,
            deleted_at: row.deleted_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug)]
struct TransactionRow {
    id: Uuid,
    inventory_item_id: Uuid,
    transaction_type: String,
    transfer_direction: Option<String>,
    quantity: Decimal,
    unit_cost: Option<Decimal>,
    reference: Option<String>,
    notes: Option<String>,
    action_by: Option<String>,
    related_transaction_id: Option<Uuid>,
    transaction_date: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for TransactionRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(TransactionRow {
            id: row.try_get("id")?,
            inventory_item_id: row.try_get("inventory_item_id")?,
            transaction_type: row.try_get("transaction_type")?,
            transfer_direction: row.try_get("transfer_direction")?,
            quantity: row.try_get("quantity")?,
            unit_cost: row.try_get("unit_cost")?,
            reference: row.try_get("reference")?,
            notes: row.try_get("notes")?,
            action_by: row.try_get("action_by")?,
            related_transaction_id: row.try_get("related_transaction_id")?,
            transaction_date: row.try_get("transaction_date")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl TryFrom<TransactionRow> for InventoryTransaction {
    type Error = StoreError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        let corrupt = |e| StoreError::Backend(format!("corrupt transaction row {}: {e}", row.id));
        Ok(InventoryTransaction {
            id: TransactionId::from_uuid(row.id),
            inventory_item_id: ItemId::from_uuid(row.inventory_item_id),
            transaction_type: row
                .transaction_type
                .parse::<TransactionType>()
                .map_err(corrupt)?,
            transfer_direction: row
                .transfer_direction
                .as_deref()
                .map(str::parse::<TransferDirection>)
                .transpose()
                .map_err(corrupt)?,
            quantity: row.quantity,
            unit_cost: row.unit_cost,
            reference: row.reference,
            notes: row.notes,
            action_by: row.action_by,
            related_transaction_id: row.related_transaction_id.map(TransactionId::from_uuid),
            transaction_date: row.transaction_date,
            created_at: row.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    //! Run against a scratch database: `DATABASE_URL=postgres://... cargo test -p stockledger-infra`.
    //! Skipped when `DATABASE_URL` is unset.

    use super::*;
    use rust_decimal_macros::dec;
    use sqlx::postgres::PgPoolOptions;
    use stockledger_inventory::{NewItem, TransactionRequest, plan_create, plan_transfer};

    async fn store() -> Option<PostgresLedgerStore> {
        let url = std::env::var("DATABASE_URL").ok()?;
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .connect(&url)
            .await
            .ok()?;
        let store = PostgresLedgerStore::new(pool, Duration::from_millis(2_000));
        store.migrate().await.ok()?;
        Some(store)
    }

    fn code(prefix: &str) -> String {
        format!("{prefix}-{}", Uuid::now_v7().simple())
    }

    async fn seed(store: &PostgresLedgerStore, code: String, stock: Decimal) -> InventoryItem {
        let id = ItemId::new();
        let new_item = NewItem::new(code, "Widget").with_initial_stock(stock, Some(dec!(2)));
        store
            .run_atomic(vec![], move |_| plan_create(new_item, id, None, Utc::now()))
            .await
            .unwrap()
            .item(id)
            .cloned()
            .unwrap()
    }

    #[tokio::test]
    async fn transfer_pair_is_linked_both_ways() {
        let Some(store) = store().await else { return };
        let a = seed(&store, code("PGA"), dec!(70)).await;
        let b = seed(&store, code("PGB"), dec!(0)).await;
        let (a_id, b_id) = (a.id, b.id);

        let committed = store
            .run_atomic(vec![b_id, a_id], move |locked| {
                plan_transfer(
                    locked.get(a_id)?,
                    locked.get(b_id)?,
                    &TransactionRequest::transfer(dec!(20), b_id).with_unit_cost(dec!(2)),
                    None,
                    Utc::now(),
                )
            })
            .await
            .unwrap();

        let outbound = store
            .get_transaction(committed.transactions[0].id)
            .await
            .unwrap()
            .unwrap();
        let inbound = store
            .get_transaction(committed.transactions[1].id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outbound.related_transaction_id, Some(inbound.id));
        assert_eq!(inbound.related_transaction_id, Some(outbound.id));
        assert_eq!(committed.item(a_id).unwrap().current_stock, dec!(50));
        assert_eq!(committed.item(b_id).unwrap().current_stock, dec!(20));
    }

    #[tokio::test]
    async fn duplicate_code_maps_to_duplicate_code() {
        let Some(store) = store().await else { return };
        let taken = code("PGDUP");
        seed(&store, taken.clone(), dec!(1)).await;
        let id = ItemId::new();
        let new_item = NewItem::new(taken.clone(), "Again");
        let err = store
            .run_atomic(vec![], move |_| plan_create(new_item, id, None, Utc::now()))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateCode(c) if c == taken));
    }

    #[tokio::test]
    async fn bulk_delete_is_all_or_nothing() {
        let Some(store) = store().await else { return };
        let a = seed(&store, code("PGDEL"), dec!(5)).await;
        let history = store.item_history(a.id).await.unwrap();
        let err = store
            .bulk_delete(a.id, &[history[0].id, TransactionId::new()])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        assert_eq!(store.count_by_item(a.id).await.unwrap(), 1);
        assert_eq!(store.bulk_delete(a.id, &[history[0].id]).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn deleted_items_reject_detail_updates() {
        let Some(store) = store().await else { return };
        let item = seed(&store, code("PGUPD"), dec!(1)).await;
        store.set_deleted(item.id, Some(Utc::now())).await.unwrap();

        let mut patched = item.clone();
        patched.name = "Renamed".to_string();
        let err = store.update_item_details(&patched).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
