//! Valuation engine: stock and weighted-average cost arithmetic.
//!
//! Pure functions only. Given an item's current balance and a requested movement,
//! compute the resulting balance or reject the movement. Nothing here touches storage.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::{LedgerError, LedgerResult};

use crate::transaction::{TransactionType, TransferDirection};

/// Direction of a movement as seen by the balance it applies to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Movement {
    /// Goods received (`IN`, receiving side of a `TRANSFER`). Adds stock and
    /// re-weights cost when a unit cost is supplied.
    Receipt,
    /// `ADJUSTMENT`. Adds stock; cost is left untouched.
    Adjustment,
    /// Goods issued (`OUT`, sending side of a `TRANSFER`). Subtracts stock, never
    /// changes cost.
    Issue,
}

impl Movement {
    /// Map a stored transaction shape onto its balance effect.
    pub fn for_type(
        transaction_type: TransactionType,
        direction: Option<TransferDirection>,
    ) -> LedgerResult<Self> {
        match (transaction_type, direction) {
            (TransactionType::In, None) => Ok(Movement::Receipt),
            (TransactionType::Adjustment, None) => Ok(Movement::Adjustment),
            (TransactionType::Out, None) => Ok(Movement::Issue),
            (TransactionType::Transfer, Some(TransferDirection::Inbound)) => Ok(Movement::Receipt),
            (TransactionType::Transfer, Some(TransferDirection::Outbound)) => Ok(Movement::Issue),
            (TransactionType::Transfer, None) => Err(LedgerError::invalid(
                "transfer movement requires a direction",
            )),
            (other, Some(_)) => Err(LedgerError::invalid(format!(
                "{other} movements have no transfer direction"
            ))),
        }
    }

    pub fn is_issue(self) -> bool {
        matches!(self, Movement::Issue)
    }
}

/// The part of an item the engine reasons about.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub stock: Decimal,
    pub unit_cost: Option<Decimal>,
}

impl Balance {
    pub fn new(stock: Decimal, unit_cost: Option<Decimal>) -> Self {
        Self { stock, unit_cost }
    }

    pub fn empty() -> Self {
        Self::new(Decimal::ZERO, None)
    }
}

/// Result of applying one movement to a balance.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Valuation {
    pub new_stock: Decimal,
    pub new_unit_cost: Option<Decimal>,
}

impl Valuation {
    pub fn into_balance(self) -> Balance {
        Balance::new(self.new_stock, self.new_unit_cost)
    }
}

/// Reject inputs the arithmetic must never see.
pub fn validate_movement_input(
    quantity: Decimal,
    incoming_unit_cost: Option<Decimal>,
) -> LedgerResult<()> {
    if quantity <= Decimal::ZERO {
        return Err(LedgerError::invalid("quantity must be greater than zero"));
    }
    if let Some(cost) = incoming_unit_cost {
        if cost < Decimal::ZERO {
            return Err(LedgerError::invalid("unit cost cannot be negative"));
        }
    }
    Ok(())
}

/// Result of a decimal operation that left the representable range.
pub(crate) fn out_of_range() -> LedgerError {
    LedgerError::invalid("quantity/cost out of range")
}

/// Weighted average of the held stock and an incoming receipt.
///
/// Falls back to the incoming cost when nothing meaningful is held (no stock or
/// no positive cost), since there is nothing to average against.
pub fn weighted_average_cost(
    current_stock: Decimal,
    current_cost: Option<Decimal>,
    quantity: Decimal,
    incoming_cost: Decimal,
) -> LedgerResult<Decimal> {
    match current_cost {
        Some(cost) if current_stock > Decimal::ZERO && cost > Decimal::ZERO => {
            let held_value = current_stock.checked_mul(cost);
            let incoming_value = quantity.checked_mul(incoming_cost);
            let total_value = held_value
                .zip(incoming_value)
                .and_then(|(held, incoming)| held.checked_add(incoming));
            let total_stock = current_stock.checked_add(quantity);
            total_value
                .zip(total_stock)
                .and_then(|(value, stock)| value.checked_div(stock))
                .ok_or_else(out_of_range)
        }
        _ => Ok(incoming_cost),
    }
}

/// Apply one movement to a balance.
///
/// `item_code` is only used to label an `InsufficientStock` failure.
pub fn apply_movement(
    item_code: &str,
    balance: Balance,
    movement: Movement,
    quantity: Decimal,
    incoming_unit_cost: Option<Decimal>,
) -> LedgerResult<Valuation> {
    validate_movement_input(quantity, incoming_unit_cost)?;

    match movement {
        Movement::Receipt => {
            let new_stock = balance.stock.checked_add(quantity).ok_or_else(out_of_range)?;
            let new_unit_cost = match incoming_unit_cost {
                Some(incoming) => Some(weighted_average_cost(
                    balance.stock,
                    balance.unit_cost,
                    quantity,
                    incoming,
                )?),
                None => balance.unit_cost,
            };
            Ok(Valuation {
                new_stock,
                new_unit_cost,
            })
        }
        Movement::Adjustment => Ok(Valuation {
            new_stock: balance.stock.checked_add(quantity).ok_or_else(out_of_range)?,
            new_unit_cost: balance.unit_cost,
        }),
        Movement::Issue => {
            let new_stock = balance.stock.checked_sub(quantity).ok_or_else(out_of_range)?;
            if new_stock < Decimal::ZERO {
                return Err(LedgerError::InsufficientStock {
                    item_code: item_code.to_string(),
                    available: balance.stock,
                    requested: quantity,
                });
            }
            Ok(Valuation {
                new_stock,
                new_unit_cost: balance.unit_cost,
            })
        }
    }
}
