//! Per-request audit log. Every request/response pair is written before the
//! response leaves the broker.

use tokio_postgres::{
    types::Json,
    GenericClient, Row,
};

use primitives::{rpc::RpcEntry, Address};

pub struct RpcRecord {
    pub sender: Address,
    pub req_id: u64,
    pub method: String,
    pub params: serde_json::Value,
    pub timestamp: u64,
    pub req_sig: Vec<String>,
    pub response: serde_json::Value,
    pub res_sig: Vec<String>,
}

pub async fn insert<C: GenericClient>(
    client: &C,
    record: &RpcRecord,
) -> Result<(), tokio_postgres::Error> {
    let statement = client
        .prepare(
            "INSERT INTO rpc_records (sender, req_id, method, params, req_timestamp, req_sig, \
             response, res_sig) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .await?;

    client
        .execute(
            &statement,
            &[
                &record.sender,
                &(record.req_id as i64),
                &record.method,
                &Json(&record.params),
                &(record.timestamp as i64),
                &record.req_sig,
                &Json(&record.response),
                &record.res_sig,
            ],
        )
        .await?;

    Ok(())
}

fn entry_from(row: &Row) -> RpcEntry {
    let params: Json<serde_json::Value> = row.get("params");
    let response: Json<serde_json::Value> = row.get("response");

    RpcEntry {
        id: row.get::<_, i64>("id") as u64,
        sender: row.get("sender"),
        req_id: row.get::<_, i64>("req_id") as u64,
        method: row.get("method"),
        params: params.0.to_string(),
        timestamp: row.get::<_, i64>("req_timestamp") as u64,
        req_sig: row.get("req_sig"),
        response: response.0.to_string(),
        res_sig: row.get("res_sig"),
    }
}

/// History of one sender, newest first.
pub async fn list_for_sender<C: GenericClient>(
    client: &C,
    sender: &Address,
) -> Result<Vec<RpcEntry>, tokio_postgres::Error> {
    let statement = client
        .prepare(
            "SELECT id, sender, req_id, method, params, req_timestamp, req_sig, response, res_sig \
             FROM rpc_records WHERE sender = $1 ORDER BY req_timestamp DESC, id DESC",
        )
        .await?;

    let rows = client.query(&statement, &[sender]).await?;

    Ok(rows.iter().map(entry_from).collect())
}
