use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::{ItemId, ItemKey, LedgerError, LedgerResult, TransactionId};

use crate::item::ItemSummary;
use crate::valuation::Movement;

/// Kind of stock-affecting event.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    In,
    Out,
    Adjustment,
    Transfer,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::In => "IN",
            TransactionType::Out => "OUT",
            TransactionType::Adjustment => "ADJUSTMENT",
            TransactionType::Transfer => "TRANSFER",
        }
    }
}

impl core::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for TransactionType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IN" => Ok(TransactionType::In),
            "OUT" => Ok(TransactionType::Out),
            "ADJUSTMENT" => Ok(TransactionType::Adjustment),
            "TRANSFER" => Ok(TransactionType::Transfer),
            other => Err(LedgerError::invalid(format!(
                "unknown transaction type '{other}'"
            ))),
        }
    }
}

/// Which side of a transfer pair a `TRANSFER` row records.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferDirection {
    Outbound,
    Inbound,
}

impl TransferDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferDirection::Outbound => "OUTBOUND",
            TransferDirection::Inbound => "INBOUND",
        }
    }
}

impl core::str::FromStr for TransferDirection {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OUTBOUND" => Ok(TransferDirection::Outbound),
            "INBOUND" => Ok(TransferDirection::Inbound),
            other => Err(LedgerError::invalid(format!(
                "unknown transfer direction '{other}'"
            ))),
        }
    }
}

/// One committed ledger row.
///
/// Rows are never edited after their unit commits; the only later change is deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryTransaction {
    pub id: TransactionId,
    pub inventory_item_id: ItemId,
    pub transaction_type: TransactionType,
    pub transfer_direction: Option<TransferDirection>,
    /// Unsigned magnitude; direction follows from type and transfer direction.
    pub quantity: Decimal,
    pub unit_cost: Option<Decimal>,
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub action_by: Option<String>,
    pub related_transaction_id: Option<TransactionId>,
    pub transaction_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl InventoryTransaction {
    pub fn movement(&self) -> LedgerResult<Movement> {
        Movement::for_type(self.transaction_type, self.transfer_direction)
    }

    /// Net effect of this row on its item's stock.
    pub fn signed_quantity(&self) -> LedgerResult<Decimal> {
        Ok(if self.movement()?.is_issue() {
            -self.quantity
        } else {
            self.quantity
        })
    }
}

/// A caller's request to record a stock movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRequest {
    pub transaction_type: TransactionType,
    pub quantity: Decimal,
    pub unit_cost: Option<Decimal>,
    pub reference: Option<String>,
    pub notes: Option<String>,
    /// Required for, and only meaningful on, `TRANSFER`.
    pub destination: Option<ItemKey>,
}

impl TransactionRequest {
    pub fn new(transaction_type: TransactionType, quantity: Decimal) -> Self {
        Self {
            transaction_type,
            quantity,
            unit_cost: None,
            reference: None,
            notes: None,
            destination: None,
        }
    }

    pub fn receipt(quantity: Decimal, unit_cost: Decimal) -> Self {
        Self::new(TransactionType::In, quantity).with_unit_cost(unit_cost)
    }

    pub fn issue(quantity: Decimal) -> Self {
        Self::new(TransactionType::Out, quantity)
    }

    pub fn transfer(quantity: Decimal, destination: impl Into<ItemKey>) -> Self {
        let mut req = Self::new(TransactionType::Transfer, quantity);
        req.destination = Some(destination.into());
        req
    }

    pub fn with_unit_cost(mut self, unit_cost: Decimal) -> Self {
        self.unit_cost = Some(unit_cost);
        self
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// A transaction row ready to be appended (id and `created_at` not yet assigned).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    pub inventory_item_id: ItemId,
    pub transaction_type: TransactionType,
    pub transfer_direction: Option<TransferDirection>,
    pub quantity: Decimal,
    pub unit_cost: Option<Decimal>,
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub action_by: Option<String>,
    pub transaction_date: DateTime<Utc>,
    /// Index of an earlier append in the same unit that this row pairs with.
    pub pair_with: Option<usize>,
}

impl NewTransaction {
    /// Materialise the row once the store has assigned identity.
    pub fn into_stored(
        self,
        id: TransactionId,
        related_transaction_id: Option<TransactionId>,
        created_at: DateTime<Utc>,
    ) -> InventoryTransaction {
        InventoryTransaction {
            id,
            inventory_item_id: self.inventory_item_id,
            transaction_type: self.transaction_type,
            transfer_direction: self.transfer_direction,
            quantity: self.quantity,
            unit_cost: self.unit_cost,
            reference: self.reference,
            notes: self.notes,
            action_by: self.action_by,
            related_transaction_id,
            transaction_date: self.transaction_date,
            created_at,
        }
    }
}

/// Filter for transaction listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionFilter {
    pub transaction_type: Option<TransactionType>,
}

impl TransactionFilter {
    pub fn of_type(transaction_type: TransactionType) -> Self {
        Self {
            transaction_type: Some(transaction_type),
        }
    }

    pub fn matches(&self, tx: &InventoryTransaction) -> bool {
        self.transaction_type
            .is_none_or(|wanted| wanted == tx.transaction_type)
    }
}

/// Display shape of a transaction: the row plus its resolved transfer peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionView {
    #[serde(flatten)]
    pub transaction: InventoryTransaction,
    pub related_transaction: Option<InventoryTransaction>,
    /// The item on the other side of a transfer.
    pub related_item: Option<ItemSummary>,
}

/// Canonical history order: newest `transaction_date` first.
///
/// `seq` is a store-specific insertion rank used to break timestamp ties so that
/// rows committed later sort first.
pub fn history_order(
    a: (&InventoryTransaction, u64),
    b: (&InventoryTransaction, u64),
) -> core::cmp::Ordering {
    b.0.transaction_date
        .cmp(&a.0.transaction_date)
        .then_with(|| b.1.cmp(&a.1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn row(transaction_type: TransactionType, direction: Option<TransferDirection>) -> InventoryTransaction {
        let now = Utc::now();
        InventoryTransaction {
            id: TransactionId::new(),
            inventory_item_id: ItemId::new(),
            transaction_type,
            transfer_direction: direction,
            quantity: dec!(4),
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
    fn signed_quantity_follows_direction() {
        assert_eq!(row(TransactionType::In, None).signed_quantity().unwrap(), dec!(4));
        assert_eq!(row(TransactionType::Adjustment, None).signed_quantity().unwrap(), dec!(4));
        assert_eq!(row(TransactionType::Out, None).signed_quantity().unwrap(), dec!(-4));
        assert_eq!(
            row(TransactionType::Transfer, Some(TransferDirection::Outbound))
                .signed_quantity()
                .unwrap(),
            dec!(-4)
        );
        assert_eq!(
            row(TransactionType::Transfer, Some(TransferDirection::Inbound))
                .signed_quantity()
                .unwrap(),
            dec!(4)
        );
    }

    #[test]
    fn type_round_trips_through_wire_names() {
        for t in [
            TransactionType::In,
            TransactionType::Out,
            TransactionType::Adjustment,
            TransactionType::Transfer,
        ] {
            assert_eq!(t.as_str().parse::<TransactionType>().unwrap(), t);
            assert_eq!(
                serde_json::to_value(t).unwrap(),
                serde_json::Value::String(t.as_str().to_string())
            );
        }
        assert!("RESERVE".parse::<TransactionType>().is_err());
    }

    #[test]
    fn filter_by_type() {
        let filter = TransactionFilter::of_type(TransactionType::Out);
        assert!(filter.matches(&row(TransactionType::Out, None)));
        assert!(!filter.matches(&row(TransactionType::In, None)));
        assert!(TransactionFilter::default().matches(&row(TransactionType::In, None)));
    }

    #[test]
    fn view_flattens_the_row() {
        let view = TransactionView {
            transaction: row(TransactionType::In, None),
            related_transaction: None,
            related_item: None,
        };
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["transactionType"], "IN");
        assert!(json["relatedTransaction"].is_null());
        assert!(json.get("transaction").is_none());
    }
}
