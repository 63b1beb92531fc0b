use chrono::{DateTime, Utc};
use tokio_postgres::{GenericClient, Row};

use primitives::{AppSession, SessionId, SessionStatus};

const SESSION_COLUMNS: &str = "session_id, protocol, participants, weights, quorum, challenge, \
                               nonce, version, status, created_at, updated_at";

fn session_from(row: &Row) -> AppSession {
    AppSession {
        session_id: row.get("session_id"),
        protocol: row.get("protocol"),
        participants: row.get("participants"),
        weights: row.get("weights"),
        quorum: row.get::<_, i64>("quorum") as u64,
        challenge: row.get::<_, i64>("challenge") as u64,
        nonce: row.get::<_, i64>("nonce") as u64,
        version: row.get::<_, i64>("version") as u64,
        status: row.get("status"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

pub async fn insert<C: GenericClient>(
    client: &C,
    session: &AppSession,
) -> Result<(), tokio_postgres::Error> {
    let statement = client
        .prepare(
            "INSERT INTO app_sessions (session_id, protocol, participants, weights, quorum, \
             challenge, nonce, version, status, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .await?;

    client
        .execute(
            &statement,
            &[
                &session.session_id,
                &session.protocol,
                &session.participants,
                &session.weights,
                &(session.quorum as i64),
                &(session.challenge as i64),
                &(session.nonce as i64),
                &(session.version as i64),
                &session.status,
                &session.created_at,
                &session.updated_at,
            ],
        )
        .await?;

    Ok(())
}

pub async fn get<C: GenericClient>(
    client: &C,
    session_id: &SessionId,
) -> Result<Option<AppSession>, tokio_postgres::Error> {
    let statement = client
        .prepare(&format!(
            "SELECT {} FROM app_sessions WHERE session_id = $1 ORDER BY nonce DESC LIMIT 1",
            SESSION_COLUMNS
        ))
        .await?;

    let row = client.query_opt(&statement, &[session_id]).await?;

    Ok(row.as_ref().map(session_from))
}

/// The open session with this id, preferring the highest nonce.
pub async fn get_open<C: GenericClient>(
    client: &C,
    session_id: &SessionId,
) -> Result<Option<AppSession>, tokio_postgres::Error> {
    let statement = client
        .prepare(&format!(
            "SELECT {} FROM app_sessions WHERE session_id = $1 AND status = 'open' \
             ORDER BY nonce DESC LIMIT 1",
            SESSION_COLUMNS
        ))
        .await?;

    let row = client.query_opt(&statement, &[session_id]).await?;

    Ok(row.as_ref().map(session_from))
}

pub async fn mark_closed<C: GenericClient>(
    client: &C,
    session_id: &SessionId,
    closed_at: DateTime<Utc>,
) -> Result<(), tokio_postgres::Error> {
    let statement = client
        .prepare("UPDATE app_sessions SET status = $2, updated_at = $3 WHERE session_id = $1")
        .await?;

    client
        .execute(&statement, &[session_id, &SessionStatus::Closed, &closed_at])
        .await?;

    Ok(())
}
