//! Transfer coordinator: one valuation per side, two linked log rows.

use chrono::{DateTime, Utc};

use stockledger_core::{LedgerError, LedgerResult};

use crate::item::InventoryItem;
use crate::plan::{BalanceWrite, UnitOfWork};
use crate::transaction::{NewTransaction, TransactionRequest, TransactionType, TransferDirection};
use crate::valuation::{Movement, apply_movement};

/// Plan moving `request.quantity` from `source` to `destination`.
///
/// The outbound row is `appends[0]`; the inbound row pairs with it, so once
/// committed each names the other as its related transaction.
///
/// Without an explicit `unit_cost` the goods move at the source's current cost.
pub fn plan_transfer(
    source: &InventoryItem,
    destination: &InventoryItem,
    request: &TransactionRequest,
    action_by: Option<String>,
    now: DateTime<Utc>,
) -> LedgerResult<UnitOfWork> {
    if request.transaction_type != TransactionType::Transfer {
        return Err(LedgerError::invalid(format!(
            "{} is not a transfer",
            request.transaction_type
        )));
    }
    if source.id == destination.id {
        return Err(LedgerError::invalid(
            "cannot transfer an item to itself",
        ));
    }

    let unit_cost = request.unit_cost.or(source.unit_cost);
    let outbound = apply_movement(
        &source.item_code,
        source.balance(),
        Movement::Issue,
        request.quantity,
        unit_cost,
    )?;
    let inbound = apply_movement(
        &destination.item_code,
        destination.balance(),
        Movement::Receipt,
        request.quantity,
        unit_cost,
    )?;

    let side = |item: &InventoryItem, direction, notes: String, pair_with| NewTransaction {
        inventory_item_id: item.id,
        transaction_type: TransactionType::Transfer,
        transfer_direction: Some(direction),
        quantity: request.quantity,
        unit_cost,
        reference: request.reference.clone(),
        notes: Some(notes),
        action_by: action_by.clone(),
        transaction_date: now,
        pair_with,
    };

    let source_notes = request
        .notes
        .clone()
        .unwrap_or_else(|| format!("Transfer to {}", destination.name));
    let destination_notes = request
        .notes
        .clone()
        .unwrap_or_else(|| format!("Transfer from {}", source.name));

    Ok(UnitOfWork {
        new_item: None,
        appends: vec![
            side(source, TransferDirection::Outbound, source_notes, None),
            side(destination, TransferDirection::Inbound, destination_notes, Some(0)),
        ],
        balances: vec![
            BalanceWrite::new(source.id, outbound.into_balance()),
            BalanceWrite::new(destination.id, inbound.into_balance()),
        ],
    })
}
