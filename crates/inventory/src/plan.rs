//! Units of work: the writes one ledger operation commits together.
//!
//! Planning is pure. A planner sees the locked, latest-committed item rows and
//! returns a [`UnitOfWork`]; an atomic executor in the infra crate applies it or
//! nothing at all.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use stockledger_core::{ItemId, LedgerError, LedgerResult};

use crate::item::{InventoryItem, NewItem};
use crate::transaction::{NewTransaction, TransactionRequest, TransactionType};
use crate::valuation::{Balance, Movement, apply_movement};

pub const INITIAL_STOCK_NOTE: &str = "Initial stock";

/// Snapshot of the rows an executor holds locks on.
#[derive(Debug, Clone, Default)]
pub struct LockedItems {
    items: BTreeMap<ItemId, InventoryItem>,
}

impl LockedItems {
    pub fn new(items: impl IntoIterator<Item = InventoryItem>) -> Self {
        Self {
            items: items.into_iter().map(|item| (item.id, item)).collect(),
        }
    }

    /// The locked row, or `NotFound` if it vanished before the lock was taken.
    pub fn get(&self, id: ItemId) -> LedgerResult<&InventoryItem> {
        self.items
            .get(&id)
            .ok_or_else(|| LedgerError::not_found(format!("inventory item {id}")))
    }
}

/// New authoritative balance for one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceWrite {
    pub item_id: ItemId,
    pub stock: Decimal,
    pub unit_cost: Option<Decimal>,
}

impl BalanceWrite {
    pub fn new(item_id: ItemId, balance: Balance) -> Self {
        Self {
            item_id,
            stock: balance.stock,
            unit_cost: balance.unit_cost,
        }
    }
}

/// Writes applied in this order: item insert, log appends, balance writes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitOfWork {
    pub new_item: Option<InventoryItem>,
    pub appends: Vec<NewTransaction>,
    pub balances: Vec<BalanceWrite>,
}

impl UnitOfWork {
    /// Every `pair_with` must name an earlier append, and pairs are one-to-one.
    pub fn validate_links(&self) -> LedgerResult<()> {
        let mut paired = vec![false; self.appends.len()];
        for (idx, append) in self.appends.iter().enumerate() {
            if let Some(peer) = append.pair_with {
                if peer >= idx {
                    return Err(LedgerError::invalid(format!(
                        "append {idx} pairs with later append {peer}"
                    )));
                }
                if paired[peer] || paired[idx] {
                    return Err(LedgerError::invalid(format!(
                        "append {peer} is already paired"
                    )));
                }
                paired[peer] = true;
                paired[idx] = true;
            }
        }
        Ok(())
    }
}

/// Insert a new item and, when it arrives with stock, its opening `IN` row.
pub fn plan_create(
    new_item: NewItem,
    id: ItemId,
    action_by: Option<String>,
    now: DateTime<Utc>,
) -> LedgerResult<UnitOfWork> {
    new_item.validate()?;
    let opening = new_item.initial_stock.filter(|q| *q > Decimal::ZERO);
    let opening_cost = new_item.initial_unit_cost;
    let item = new_item.into_item(id, now);

    let mut unit = UnitOfWork::default();
    if let Some(quantity) = opening {
        let valuation = apply_movement(
            &item.item_code,
            item.balance(),
            Movement::Receipt,
            quantity,
            opening_cost,
        )?;
        unit.appends.push(NewTransaction {
            inventory_item_id: id,
            transaction_type: TransactionType::In,
            transfer_direction: None,
            quantity,
            unit_cost: opening_cost,
            reference: None,
            notes: Some(INITIAL_STOCK_NOTE.to_string()),
            action_by,
            transaction_date: now,
            pair_with: None,
        });
        unit.balances
            .push(BalanceWrite::new(id, valuation.into_balance()));
    }
    unit.new_item = Some(item);
    Ok(unit)
}

/// Single-item movement (`IN`, `OUT`, `ADJUSTMENT`).
///
/// Transfers go through [`crate::transfer::plan_transfer`].
pub fn plan_movement(
    item: &InventoryItem,
    request: &TransactionRequest,
    action_by: Option<String>,
    now: DateTime<Utc>,
) -> LedgerResult<UnitOfWork> {
    if request.transaction_type == TransactionType::Transfer {
        return Err(LedgerError::invalid(
            "transfers must name a destination item",
        ));
    }
    let movement = Movement::for_type(request.transaction_type, None)?;
    let valuation = apply_movement(
        &item.item_code,
        item.balance(),
        movement,
        request.quantity,
        request.unit_cost,
    )?;

    Ok(UnitOfWork {
        new_item: None,
        appends: vec![NewTransaction {
            inventory_item_id: item.id,
            transaction_type: request.transaction_type,
            transfer_direction: None,
            quantity: request.quantity,
            unit_cost: request.unit_cost,
            reference: request.reference.clone(),
            notes: request.notes.clone(),
            action_by,
            transaction_date: now,
            pair_with: None,
        }],
        balances: vec![BalanceWrite::new(item.id, valuation.into_balance())],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn stocked(stock: Decimal, cost: Option<Decimal>) -> InventoryItem {
        let mut item = NewItem::new("X001", "Widget").into_item(ItemId::new(), Utc::now());
        item.current_stock = stock;
        item.unit_cost = cost;
        item
    }

    #[test]
    fn create_with_opening_stock_appends_initial_row() {
        let id = ItemId::new();
        let unit = plan_create(
            NewItem::new("X001", "Widget").with_initial_stock(dec!(100), Some(dec!(2.00))),
            id,
            Some("alice".to_string()),
            Utc::now(),
        )
        .unwrap();

        let item = unit.new_item.as_ref().unwrap();
        assert_eq!(item.current_stock, dec!(0));
        assert_eq!(unit.appends.len(), 1);
        assert_eq!(unit.appends[0].transaction_type, TransactionType::In);
        assert_eq!(unit.appends[0].notes.as_deref(), Some(INITIAL_STOCK_NOTE));
        assert_eq!(
            unit.balances,
            vec![BalanceWrite {
                item_id: id,
                stock: dec!(100),
                unit_cost: Some(dec!(2.00)),
            }]
        );
    }

    #[test]
    fn create_without_stock_writes_no_rows() {
        let unit = plan_create(
            NewItem::new("X002", "Widget").with_initial_stock(dec!(0), None),
            ItemId::new(),
            None,
            Utc::now(),
        )
        .unwrap();
        assert!(unit.new_item.is_some());
        assert!(unit.appends.is_empty());
        assert!(unit.balances.is_empty());
    }

    #[test]
    fn movement_plans_one_row_and_one_balance() {
        let item = stocked(dec!(100), Some(dec!(2)));
        let unit = plan_movement(
            &item,
            &TransactionRequest::issue(dec!(30)).with_reference("SO-1"),
            None,
            Utc::now(),
        )
        .unwrap();
        assert_eq!(unit.appends.len(), 1);
        assert_eq!(unit.appends[0].reference.as_deref(), Some("SO-1"));
        assert_eq!(unit.balances[0].stock, dec!(70));
        assert_eq!(unit.balances[0].unit_cost, Some(dec!(2)));
    }

    #[test]
    fn overdraw_produces_no_plan() {
        let item = stocked(dec!(5), None);
        let err = plan_movement(&item, &TransactionRequest::issue(dec!(6)), None, Utc::now())
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientStock { .. }));
    }

    #[test]
    fn transfer_requests_are_not_single_item_movements() {
        let item = stocked(dec!(5), None);
        let req = TransactionRequest::transfer(dec!(1), "X002");
        assert!(plan_movement(&item, &req, None, Utc::now()).is_err());
    }

    #[test]
    fn links_must_point_backwards() {
        let item = stocked(dec!(5), None);
        let mut unit =
            plan_movement(&item, &TransactionRequest::issue(dec!(1)), None, Utc::now()).unwrap();
        unit.appends[0].pair_with = Some(0);
        assert!(unit.validate_links().is_err());
    }

    #[test]
    fn locked_items_report_missing_rows() {
        let item = stocked(dec!(1), None);
        let locked = LockedItems::new([item.clone()]);
        assert_eq!(locked.get(item.id).unwrap().item_code, "X001");
        assert!(matches!(
            locked.get(ItemId::new()),
            Err(LedgerError::NotFound(_))
        ));
    }
}
