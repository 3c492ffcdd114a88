use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::{ItemId, LedgerResult};

use crate::item::InventoryItem;
use crate::transaction::InventoryTransaction;
use crate::valuation::out_of_range;

/// Stored balance compared against a replay of the item's surviving history.
///
/// Drift appears after administrative bulk deletes, which never recompute stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockAudit {
    pub item_id: ItemId,
    pub item_code: String,
    pub stored_stock: Decimal,
    pub ledger_stock: Decimal,
    /// `stored_stock - ledger_stock`.
    pub drift: Decimal,
    pub transaction_count: u64,
}

impl StockAudit {
    /// Rows owned by other items are ignored.
    pub fn replay(item: &InventoryItem, history: &[InventoryTransaction]) -> LedgerResult<Self> {
        let mut ledger_stock = Decimal::ZERO;
        let mut transaction_count = 0;
        for tx in history.iter().filter(|tx| tx.inventory_item_id == item.id) {
            ledger_stock = ledger_stock
                .checked_add(tx.signed_quantity()?)
                .ok_or_else(out_of_range)?;
            transaction_count += 1;
        }
        let drift = item
            .current_stock
            .checked_sub(ledger_stock)
            .ok_or_else(out_of_range)?;
        Ok(Self {
            item_id: item.id,
            item_code: item.item_code.clone(),
            stored_stock: item.current_stock,
            ledger_stock,
            drift,
            transaction_count,
        })
    }

    pub fn is_consistent(&self) -> bool {
        self.drift.is_zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::NewItem;
    use crate::transaction::{TransactionType, TransferDirection};
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use stockledger_core::TransactionId;

    fn tx(
        item: ItemId,
        transaction_type: TransactionType,
        direction: Option<TransferDirection>,
        quantity: Decimal,
    ) -> InventoryTransaction {
        let now = Utc::now();
        InventoryTransaction {
            id: TransactionId::new(),
            inventory_item_id: item,
            transaction_type,
            transfer_direction: direction,
            quantity,
            unit_cost: None,
            reference: None,
            notes: None,
            action_by: None,
            related_transaction_id: None,
            transaction_date: now,
            created_at: now,
        }
    }

    #[test]
    fn replay_matches_consistent_balance() {
        let mut item = NewItem::new("X001", "Bolts").into_item(ItemId::new(), Utc::now());
        item.current_stock = dec!(50);
        let history = vec![
            tx(item.id, TransactionType::In, None, dec!(100)),
            tx(item.id, TransactionType::Out, None, dec!(30)),
            tx(item.id, TransactionType::Transfer, Some(TransferDirection::Outbound), dec!(20)),
            tx(ItemId::new(), TransactionType::In, None, dec!(999)),
        ];
        let audit = StockAudit::replay(&item, &history).unwrap();
        assert_eq!(audit.ledger_stock, dec!(50));
        assert_eq!(audit.transaction_count, 3);
        assert!(audit.is_consistent());
    }

    #[test]
    fn deleted_rows_show_up_as_drift() {
        let mut item = NewItem::new("X001", "Bolts").into_item(ItemId::new(), Utc::now());
        item.current_stock = dec!(70);
        let history = vec![tx(item.id, TransactionType::In, None, dec!(100))];
        let audit = StockAudit::replay(&item, &history).unwrap();
        assert_eq!(audit.drift, dec!(-30));
        assert!(!audit.is_consistent());
    }
}
