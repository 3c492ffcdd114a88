use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::{ItemId, LedgerError, LedgerResult};

use crate::valuation::{Balance, out_of_range};

/// One stocked item: identity, authoritative balance, advisory thresholds.
///
/// `current_stock` and `unit_cost` are written only by ledger commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryItem {
    pub id: ItemId,
    pub item_code: String,
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub unit: Option<String>,
    pub location: Option<String>,
    pub supplier: Option<String>,
    pub current_stock: Decimal,
    pub unit_cost: Option<Decimal>,
    pub min_stock_level: Option<Decimal>,
    pub max_stock_level: Option<Decimal>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InventoryItem {
    pub fn balance(&self) -> Balance {
        Balance::new(self.current_stock, self.unit_cost)
    }

    pub fn summary(&self) -> ItemSummary {
        ItemSummary {
            id: self.id,
            item_code: self.item_code.clone(),
            name: self.name.clone(),
        }
    }

    /// At or below the minimum level. Items without a minimum are never low.
    pub fn is_low_stock(&self) -> bool {
        self.min_stock_level
            .is_some_and(|min| self.current_stock <= min)
    }

    /// Stock valued at the current unit cost, when a cost is known.
    pub fn stock_value(&self) -> LedgerResult<Option<Decimal>> {
        self.unit_cost
            .map(|cost| self.current_stock.checked_mul(cost).ok_or_else(out_of_range))
            .transpose()
    }
}

/// Identity triple shown next to a transfer's peer row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemSummary {
    pub id: ItemId,
    pub item_code: String,
    pub name: String,
}

/// Item creation request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewItem {
    pub item_code: String,
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub unit: Option<String>,
    pub location: Option<String>,
    pub supplier: Option<String>,
    /// Opening quantity, recorded as an `IN` transaction rather than written directly.
    pub initial_stock: Option<Decimal>,
    pub initial_unit_cost: Option<Decimal>,
    pub min_stock_level: Option<Decimal>,
    pub max_stock_level: Option<Decimal>,
}

impl NewItem {
    pub fn new(item_code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            item_code: item_code.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_initial_stock(mut self, quantity: Decimal, unit_cost: Option<Decimal>) -> Self {
        self.initial_stock = Some(quantity);
        self.initial_unit_cost = unit_cost;
        self
    }

    pub fn with_min_stock_level(mut self, level: Decimal) -> Self {
        self.min_stock_level = Some(level);
        self
    }

    pub fn validate(&self) -> LedgerResult<()> {
        if self.item_code.trim().is_empty() {
            return Err(LedgerError::invalid("item code is required"));
        }
        if self.name.trim().is_empty() {
            return Err(LedgerError::invalid("item name is required"));
        }
        if self.initial_stock.is_some_and(|q| q < Decimal::ZERO) {
            return Err(LedgerError::invalid("initial stock cannot be negative"));
        }
        if self.initial_unit_cost.is_some_and(|c| c < Decimal::ZERO) {
            return Err(LedgerError::invalid("unit cost cannot be negative"));
        }
        validate_thresholds(self.min_stock_level, self.max_stock_level)
    }

    /// Build the zero-balance row; any opening stock arrives through the ledger.
    pub fn into_item(self, id: ItemId, now: DateTime<Utc>) -> InventoryItem {
        InventoryItem {
            id,
            item_code: self.item_code.trim().to_string(),
            name: self.name.trim().to_string(),
            description: self.description,
            category: self.category,
            unit: self.unit,
            location: self.location,
            supplier: self.supplier,
            current_stock: Decimal::ZERO,
            unit_cost: None,
            min_stock_level: self.min_stock_level,
            max_stock_level: self.max_stock_level,
            is_deleted: false,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Metadata update. Balance fields are deliberately absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemPatch {
    pub item_code: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub unit: Option<String>,
    pub location: Option<String>,
    pub supplier: Option<String>,
    pub min_stock_level: Option<Decimal>,
    pub max_stock_level: Option<Decimal>,
}

impl ItemPatch {
    /// Apply to a copy of `item`, validating the merged result.
    pub fn apply_to(&self, item: &InventoryItem, now: DateTime<Utc>) -> LedgerResult<InventoryItem> {
        let mut updated = item.clone();
        if let Some(code) = &self.item_code {
            if code.trim().is_empty() {
                return Err(LedgerError::invalid("item code cannot be blank"));
            }
            updated.item_code = code.trim().to_string();
        }
        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                return Err(LedgerError::invalid("item name cannot be blank"));
            }
            updated.name = name.trim().to_string();
        }
        if self.description.is_some() {
            updated.description = self.description.clone();
        }
        if self.category.is_some() {
            updated.category = self.category.clone();
        }
        if self.unit.is_some() {
            updated.unit = self.unit.clone();
        }
        if self.location.is_some() {
            updated.location = self.location.clone();
        }
        if self.supplier.is_some() {
            updated.supplier = self.supplier.clone();
        }
        if self.min_stock_level.is_some() {
            updated.min_stock_level = self.min_stock_level;
        }
        if self.max_stock_level.is_some() {
            updated.max_stock_level = self.max_stock_level;
        }
        validate_thresholds(updated.min_stock_level, updated.max_stock_level)?;
        updated.updated_at = now;
        Ok(updated)
    }
}

fn validate_thresholds(min: Option<Decimal>, max: Option<Decimal>) -> LedgerResult<()> {
    if min.is_some_and(|m| m < Decimal::ZERO) || max.is_some_and(|m| m < Decimal::ZERO) {
        return Err(LedgerError::invalid("stock levels cannot be negative"));
    }
    if let (Some(min), Some(max)) = (min, max) {
        if min > max {
            return Err(LedgerError::invalid(
                "minimum stock level cannot exceed maximum",
            ));
        }
    }
    Ok(())
}

/// Filter for item listings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemFilter {
    pub category: Option<String>,
    pub include_deleted: bool,
    pub low_stock: bool,
}

impl ItemFilter {
    pub fn matches(&self, item: &InventoryItem) -> bool {
        (self.include_deleted || !item.is_deleted)
            && self
                .category
                .as_ref()
                .is_none_or(|c| item.category.as_ref() == Some(c))
            && (!self.low_stock || item.is_low_stock())
    }
}

/// Stock value across all live items.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValuationSummary {
    pub total_items: usize,
    pub valued_items: usize,
    pub unvalued_items: usize,
    pub total_quantity: Decimal,
    pub total_value: Decimal,
}

impl ValuationSummary {
    pub fn from_items<'a>(
        items: impl IntoIterator<Item = &'a InventoryItem>,
    ) -> LedgerResult<Self> {
        let mut summary = ValuationSummary::default();
        for item in items.into_iter().filter(|i| !i.is_deleted) {
            summary.total_items += 1;
            summary.total_quantity = summary
                .total_quantity
                .checked_add(item.current_stock)
                .ok_or_else(out_of_range)?;
            match item.stock_value()? {
                Some(value) => {
                    summary.valued_items += 1;
                    summary.total_value = summary
                        .total_value
                        .checked_add(value)
                        .ok_or_else(out_of_range)?;
                }
                None => summary.unvalued_items += 1,
            }
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn item(code: &str) -> InventoryItem {
        NewItem::new(code, "Widget").into_item(ItemId::new(), Utc::now())
    }

    #[test]
    fn new_items_start_empty_even_with_opening_stock() {
        let created = NewItem::new(" X001 ", "Widget")
            .with_initial_stock(dec!(10), Some(dec!(2)))
            .into_item(ItemId::new(), Utc::now());
        assert_eq!(created.item_code, "X001");
        assert_eq!(created.current_stock, dec!(0));
        assert_eq!(created.unit_cost, None);
    }

    #[test]
    fn creation_validation() {
        assert!(NewItem::new("", "Widget").validate().is_err());
        assert!(NewItem::new("X", "  ").validate().is_err());
        assert!(
            NewItem::new("X", "Widget")
                .with_initial_stock(dec!(-1), None)
                .validate()
                .is_err()
        );
        let mut inverted = NewItem::new("X", "Widget");
        inverted.min_stock_level = Some(dec!(10));
        inverted.max_stock_level = Some(dec!(5));
        assert!(inverted.validate().is_err());
        assert!(NewItem::new("X", "Widget").validate().is_ok());
    }

    #[test]
    fn low_stock_needs_a_minimum() {
        let mut i = item("A");
        assert!(!i.is_low_stock());
        i.min_stock_level = Some(dec!(5));
        i.current_stock = dec!(5);
        assert!(i.is_low_stock());
        i.current_stock = dec!(6);
        assert!(!i.is_low_stock());
    }

    #[test]
    fn patch_never_touches_balance() {
        let mut original = item("A");
        original.current_stock = dec!(12);
        original.unit_cost = Some(dec!(3));
        let patch = ItemPatch {
            name: Some("Renamed".to_string()),
            min_stock_level: Some(dec!(2)),
            ..Default::default()
        };
        let updated = patch.apply_to(&original, Utc::now()).unwrap();
        assert_eq!(updated.name, "Renamed");
        assert_eq!(updated.current_stock, dec!(12));
        assert_eq!(updated.unit_cost, Some(dec!(3)));
        assert_eq!(updated.min_stock_level, Some(dec!(2)));
    }

    #[test]
    fn filter_excludes_deleted_by_default() {
        let mut gone = item("B");
        gone.is_deleted = true;
        assert!(!ItemFilter::default().matches(&gone));
        assert!(
            ItemFilter {
                include_deleted: true,
                ..Default::default()
            }
            .matches(&gone)
        );
    }

    #[test]
    fn summary_values_live_items_only() {
        let mut a = item("A");
        a.current_stock = dec!(10);
        a.unit_cost = Some(dec!(2.5));
        let mut b = item("B");
        b.current_stock = dec!(4);
        let mut c = item("C");
        c.current_stock = dec!(100);
        c.unit_cost = Some(dec!(1));
        c.is_deleted = true;

        let summary = ValuationSummary::from_items([&a, &b, &c]).unwrap();
        assert_eq!(summary.total_items, 2);
        assert_eq!(summary.valued_items, 1);
        assert_eq!(summary.unvalued_items, 1);
        assert_eq!(summary.total_quantity, dec!(14));
        assert_eq!(summary.total_value, dec!(25));
    }

    #[test]
    fn overflowing_totals_are_an_error() {
        let mut a = item("A");
        a.current_stock = Decimal::MAX;
        a.unit_cost = Some(dec!(2));
        assert!(matches!(a.stock_value(), Err(LedgerError::InvalidArgument(_))));

        a.unit_cost = None;
        let mut b = item("B");
        b.current_stock = Decimal::MAX;
        assert!(matches!(
            ValuationSummary::from_items([&a, &b]),
            Err(LedgerError::InvalidArgument(_))
        ));
    }
}
