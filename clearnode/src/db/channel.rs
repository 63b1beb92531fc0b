use chrono::{DateTime, Utc};
use tokio_postgres::{GenericClient, Row};

use primitives::{Address, ChainId, Channel, ChannelId};

const CHANNEL_COLUMNS: &str = "channel_id, participant, status, token, chain_id, adjudicator, \
                               amount, nonce, version, created_at, updated_at";

fn channel_from(row: &Row) -> Channel {
    Channel {
        channel_id: row.get("channel_id"),
        participant: row.get("participant"),
        status: row.get("status"),
        token: row.get("token"),
        chain_id: ChainId::new(row.get::<_, i32>("chain_id") as u32),
        adjudicator: row.get("adjudicator"),
        amount: row.get::<_, i64>("amount") as u64,
        nonce: row.get::<_, i64>("nonce") as u64,
        version: row.get::<_, i64>("version") as u64,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

pub async fn get<C: GenericClient>(
    client: &C,
    channel_id: &ChannelId,
) -> Result<Option<Channel>, tokio_postgres::Error> {
    let statement = client
        .prepare(&format!(
            "SELECT {} FROM channels WHERE channel_id = $1",
            CHANNEL_COLUMNS
        ))
        .await?;

    let row = client.query_opt(&statement, &[channel_id]).await?;

    Ok(row.as_ref().map(channel_from))
}

pub async fn insert<C: GenericClient>(
    client: &C,
    channel: &Channel,
) -> Result<bool, tokio_postgres::Error> {
    let statement = client
        .prepare(
            "INSERT INTO channels (channel_id, participant, status, token, chain_id, adjudicator, \
             amount, nonce, version, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             ON CONFLICT (channel_id) DO NOTHING",
        )
        .await?;

    let inserted = client
        .execute(
            &statement,
            &[
                &channel.channel_id,
                &channel.participant,
                &channel.status,
                &channel.token,
                &(channel.chain_id.to_u32() as i32),
                &channel.adjudicator,
                &(channel.amount as i64),
                &(channel.nonce as i64),
                &(channel.version as i64),
                &channel.created_at,
                &channel.updated_at,
            ],
        )
        .await?;

    Ok(inserted == 1)
}

/// Writes back the mutable channel fields after an on-chain event.
pub async fn save<C: GenericClient>(
    client: &C,
    channel: &Channel,
) -> Result<(), tokio_postgres::Error> {
    let statement = client
        .prepare(
            "UPDATE channels SET status = $2, amount = $3, version = $4, updated_at = $5 \
             WHERE channel_id = $1",
        )
        .await?;

    client
        .execute(
            &statement,
            &[
                &channel.channel_id,
                &channel.status,
                &(channel.amount as i64),
                &(channel.version as i64),
                &channel.updated_at,
            ],
        )
        .await?;

    Ok(())
}

/// Channels of one participant, newest first.
pub async fn list_for_participant<C: GenericClient>(
    client: &C,
    participant: &Address,
) -> Result<Vec<Channel>, tokio_postgres::Error> {
    let statement = client
        .prepare(&format!(
            "SELECT {} FROM channels WHERE participant = $1 ORDER BY created_at DESC",
            CHANNEL_COLUMNS
        ))
        .await?;

    let rows = client.query(&statement, &[participant]).await?;

    Ok(rows.iter().map(channel_from).collect())
}

/// An existing non-closed channel for the `(participant, token, chain)`
/// triple; the `Created` pre-condition check.
pub async fn find_active<C: GenericClient>(
    client: &C,
    participant: &Address,
    token: &Address,
    chain_id: ChainId,
) -> Result<Option<Channel>, tokio_postgres::Error> {
    let statement = client
        .prepare(&format!(
            "SELECT {} FROM channels \
             WHERE participant = $1 AND token = $2 AND chain_id = $3 AND status IN ('joining', 'open')",
            CHANNEL_COLUMNS
        ))
        .await?;

    let row = client
        .query_opt(
            &statement,
            &[participant, token, &(chain_id.to_u32() as i32)],
        )
        .await?;

    Ok(row.as_ref().map(channel_from))
}

/// A fresh `joining` channel row, as first observed in a `Created` event.
pub fn new_channel(
    channel_id: ChannelId,
    participant: Address,
    token: Address,
    chain_id: ChainId,
    adjudicator: Address,
    amount: u64,
    nonce: u64,
    now: DateTime<Utc>,
) -> Channel {
    Channel {
        channel_id,
        participant,
        status: primitives::ChannelStatus::Joining,
        token,
        chain_id,
        adjudicator,
        amount,
        nonce,
        version: 0,
        created_at: now,
        updated_at: now,
    }
}
