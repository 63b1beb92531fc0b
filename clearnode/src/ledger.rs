//! The multi-party transfer primitive every balance mutation goes through.

use rust_decimal::Decimal;
use tokio_postgres::Transaction;

use primitives::{AccountId, Address};

use crate::{db, HandlerError};

/// Moves `amount` of `asset_symbol` between two accounts for one participant:
/// one debit row on `from`, one credit row on `to`.
///
/// The balance check runs inside the caller's transaction, so a transfer can
/// never take `from` below zero at commit. Zero transfers are no-ops and emit
/// no rows.
pub async fn transfer(
    tx: &Transaction<'_>,
    participant: &Address,
    asset_symbol: &str,
    from: &AccountId,
    to: &AccountId,
    amount: Decimal,
) -> Result<(), HandlerError> {
    if amount.is_sign_negative() {
        return Err(HandlerError::Malformed(
            "transfer amount must not be negative".to_string(),
        ));
    }
    if amount.is_zero() {
        return Ok(());
    }

    let available = db::ledger::balance(tx, from, participant, asset_symbol).await?;
    if available < amount {
        return Err(HandlerError::InsufficientFunds);
    }

    db::ledger::record(tx, from, participant, asset_symbol, -amount).await?;
    db::ledger::record(tx, to, participant, asset_symbol, amount).await?;

    Ok(())
}
