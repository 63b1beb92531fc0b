use tokio_postgres::{GenericClient, Row};

use primitives::{Address, Asset, ChainId};

fn asset_from(row: &Row) -> Asset {
    Asset {
        symbol: row.get("symbol"),
        token: row.get("token"),
        chain_id: ChainId::new(row.get::<_, i32>("chain_id") as u32),
        decimals: row.get::<_, i16>("decimals") as u8,
    }
}

/// Seeds the registry from configuration; existing rows are refreshed so a
/// config change takes effect on restart.
pub async fn seed<C: GenericClient>(
    client: &C,
    assets: &[Asset],
) -> Result<(), tokio_postgres::Error> {
    let statement = client
        .prepare(
            "INSERT INTO assets (token, chain_id, symbol, decimals) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (token, chain_id) DO UPDATE SET symbol = $3, decimals = $4",
        )
        .await?;

    for asset in assets {
        client
            .execute(
                &statement,
                &[
                    &asset.token,
                    &(asset.chain_id.to_u32() as i32),
                    &asset.symbol,
                    &(asset.decimals as i16),
                ],
            )
            .await?;
    }

    Ok(())
}

pub async fn by_token<C: GenericClient>(
    client: &C,
    token: &Address,
    chain_id: ChainId,
) -> Result<Option<Asset>, tokio_postgres::Error> {
    let statement = client
        .prepare("SELECT token, chain_id, symbol, decimals FROM assets WHERE token = $1 AND chain_id = $2")
        .await?;

    let row = client
        .query_opt(&statement, &[token, &(chain_id.to_u32() as i32)])
        .await?;

    Ok(row.as_ref().map(asset_from))
}
