//! The append-only double-entry table. Rows are never updated or deleted;
//! balances are always derived by aggregation.

use chrono::Utc;
use rust_decimal::Decimal;
use tokio_postgres::GenericClient;

use primitives::{rpc::BalanceEntry, AccountId, Address};

/// Appends one ledger row: positive `amount` credits the account, negative
/// debits it, zero emits nothing. Exactly one of credit/debit is non-zero in
/// any stored row.
pub async fn record<C: GenericClient>(
    client: &C,
    account_id: &AccountId,
    participant: &Address,
    asset_symbol: &str,
    amount: Decimal,
) -> Result<(), tokio_postgres::Error> {
    if amount.is_zero() {
        return Ok(());
    }

    let (credit, debit) = if amount.is_sign_positive() {
        (amount, Decimal::ZERO)
    } else {
        (Decimal::ZERO, amount.abs())
    };

    let statement = client
        .prepare(
            "INSERT INTO ledger (account_id, participant, asset_symbol, credit, debit, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .await?;

    client
        .execute(
            &statement,
            &[
                account_id,
                participant,
                &asset_symbol,
                &credit,
                &debit,
                &Utc::now(),
            ],
        )
        .await?;

    Ok(())
}

/// ```text
/// SELECT COALESCE(SUM(credit), 0) - COALESCE(SUM(debit), 0)
///   FROM ledger WHERE account_id = $1 AND participant = $2 AND asset_symbol = $3
/// ```
pub async fn balance<C: GenericClient>(
    client: &C,
    account_id: &AccountId,
    participant: &Address,
    asset_symbol: &str,
) -> Result<Decimal, tokio_postgres::Error> {
    let statement = client
        .prepare(
            "SELECT COALESCE(SUM(credit), 0) - COALESCE(SUM(debit), 0) AS balance \
             FROM ledger WHERE account_id = $1 AND participant = $2 AND asset_symbol = $3",
        )
        .await?;

    let row = client
        .query_one(&statement, &[account_id, participant, &asset_symbol])
        .await?;

    Ok(row.get("balance"))
}

/// Per-asset balances of one `(account, participant)` pair.
pub async fn account_balances<C: GenericClient>(
    client: &C,
    account_id: &AccountId,
    participant: &Address,
) -> Result<Vec<BalanceEntry>, tokio_postgres::Error> {
    let statement = client
        .prepare(
            "SELECT asset_symbol, COALESCE(SUM(credit), 0) - COALESCE(SUM(debit), 0) AS balance \
             FROM ledger WHERE account_id = $1 AND participant = $2 \
             GROUP BY asset_symbol ORDER BY asset_symbol",
        )
        .await?;

    let rows = client.query(&statement, &[account_id, participant]).await?;

    Ok(rows
        .iter()
        .map(|row| BalanceEntry {
            asset: row.get("asset_symbol"),
            amount: row.get("balance"),
        })
        .collect())
}

/// Distinct asset symbols ever recorded under an account, regardless of
/// participant. Used to enumerate a session's pooled assets at close.
pub async fn account_assets<C: GenericClient>(
    client: &C,
    account_id: &AccountId,
) -> Result<Vec<String>, tokio_postgres::Error> {
    let statement = client
        .prepare("SELECT DISTINCT asset_symbol FROM ledger WHERE account_id = $1")
        .await?;

    let rows = client.query(&statement, &[account_id]).await?;

    Ok(rows.iter().map(|row| row.get("asset_symbol")).collect())
}
