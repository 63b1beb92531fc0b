//! Persisted per-chain cursor into the custody event log. Advancing the
//! cursor inside the same transaction as the event's effects is what makes
//! replayed events idempotent.

use adapter::EventPosition;
use tokio_postgres::GenericClient;

use primitives::ChainId;

pub async fn get<C: GenericClient>(
    client: &C,
    chain_id: ChainId,
) -> Result<Option<EventPosition>, tokio_postgres::Error> {
    let statement = client
        .prepare("SELECT block_number, log_index FROM chain_checkpoints WHERE chain_id = $1")
        .await?;

    let row = client
        .query_opt(&statement, &[&(chain_id.to_u32() as i32)])
        .await?;

    Ok(row.map(|row| EventPosition {
        block_number: row.get::<_, i64>("block_number") as u64,
        log_index: row.get::<_, i64>("log_index") as u64,
    }))
}

pub async fn set<C: GenericClient>(
    client: &C,
    chain_id: ChainId,
    position: EventPosition,
) -> Result<(), tokio_postgres::Error> {
    let statement = client
        .prepare(
            "INSERT INTO chain_checkpoints (chain_id, block_number, log_index) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (chain_id) DO UPDATE SET block_number = $2, log_index = $3",
        )
        .await?;

    client
        .execute(
            &statement,
            &[
                &(chain_id.to_u32() as i32),
                &(position.block_number as i64),
                &(position.log_index as i64),
            ],
        )
        .await?;

    Ok(())
}
