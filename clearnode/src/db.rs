//! Store plumbing: connection pool, schema setup and the serializable
//! transaction wrapper every mutating handler runs inside.

use bb8::Pool;
use bb8_postgres::PostgresConnectionManager;
use thiserror::Error;
use tokio_postgres::{Client, IsolationLevel, NoTls, Transaction};

pub mod app_session;
pub mod asset;
pub mod channel;
pub mod checkpoint;
pub mod ledger;
pub mod rpc_record;

pub type DbPool = Pool<PostgresConnectionManager<NoTls>>;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("connection pool: {0}")]
    Pool(#[from] bb8::RunError<tokio_postgres::Error>),
    #[error("postgres: {0}")]
    Backend(#[from] tokio_postgres::Error),
}

pub async fn connect(database_url: &str) -> Result<DbPool, PoolError> {
    let config = database_url
        .parse::<tokio_postgres::Config>()
        .map_err(PoolError::Backend)?;

    let manager = PostgresConnectionManager::new(config, NoTls);

    Ok(Pool::builder().build(manager).await?)
}

/// Applies the embedded schema. Statements are idempotent, so running this on
/// every startup is safe.
pub async fn migrations(pool: &DbPool) -> Result<(), PoolError> {
    let client = pool.get().await?;

    client
        .batch_execute(include_str!("../migrations/schema.sql"))
        .await?;

    Ok(())
}

/// How many times a serialization conflict reruns the whole transaction
/// before surfacing `fails-internal` to the peer.
pub const SERIALIZATION_RETRIES: usize = 3;

/// Starts a serializable transaction; the isolation level every mutating
/// handler and event application runs under. Callers rerun their body on
/// [`crate::HandlerError::is_serialization_failure`], up to
/// [`SERIALIZATION_RETRIES`] times.
pub async fn begin(client: &mut Client) -> Result<Transaction<'_>, tokio_postgres::Error> {
    client
        .build_transaction()
        .isolation_level(IsolationLevel::Serializable)
        .start()
        .await
}
