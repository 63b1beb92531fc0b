//! Channel resize and close: read-only handlers that answer with a
//! broker-signed state object. The ledger itself only moves when the chain
//! reconciler observes the corresponding on-chain event.

use serde_json::json;
use web3::types::U256;

use adapter::state::{encode_resize_amounts, state_hash, Intent, StateAllocation};
use primitives::{
    rpc::{
        ChannelStateResponse, CloseChannelParams, Message, ResizeChannelParams, StateSignature,
        WireAllocation,
    },
    AccountId, ChannelId, Signature,
};

use crate::{db, handlers::require_signature_from, Application, HandlerError};

/// `resize_channel`: produces a RESIZE state moving the channel to a user
/// share of `participant_change` (base units) with the broker's surplus
/// released. Requires the channel owner's signature and an off-chain balance
/// covering the new share. A change of zero is still answered and signed.
pub async fn resize_channel(app: &Application, message: &Message) -> Result<Message, HandlerError> {
    let params: ResizeChannelParams = message.payload.named_params()?;

    let client = app.pool.get().await.map_err(db::PoolError::from)?;
    let channel = db::channel::get(&*client, &params.channel_id)
        .await?
        .ok_or(HandlerError::NotFound("channel"))?;

    require_signature_from(message, &channel.participant)?;

    let asset = db::asset::by_token(&*client, &channel.token, channel.chain_id)
        .await?
        .ok_or(HandlerError::NotFound("asset"))?;

    if params.participant_change.is_sign_negative() {
        return Err(HandlerError::Malformed(
            "participant_change must not be negative".to_string(),
        ));
    }

    let balance = db::ledger::balance(
        &*client,
        &AccountId::participant(&channel.participant),
        &channel.participant,
        &asset.symbol,
    )
    .await?;
    if balance < params.participant_change {
        return Err(HandlerError::InsufficientFunds);
    }

    let user_units = asset
        .to_base_units(params.participant_change)
        .map_err(|error| HandlerError::Malformed(error.to_string()))?;

    // the broker's side always releases its surplus on resize
    let broker_release = channel.amount as i128 - user_units as i128;
    let state_data = encode_resize_amounts(&[0, -broker_release]);

    let next_version = channel.version + 1;
    let allocations = [
        StateAllocation {
            destination: params.funds_destination,
            token: channel.token,
            amount: U256::from(user_units),
        },
        StateAllocation {
            destination: app.signer.address(),
            token: channel.token,
            amount: U256::zero(),
        },
    ];

    let digest = state_hash(
        &channel.channel_id,
        Intent::Resize,
        next_version,
        &state_data,
        &allocations,
    );
    let signature = app.signer.sign_digest(digest)?;

    Ok(state_response(
        message,
        channel.channel_id,
        Intent::Resize,
        next_version,
        &state_data,
        &allocations,
        digest,
        &signature,
    ))
}

/// `close_channel`: produces a FINALIZE state paying the participant their
/// off-chain balance and the broker the rest of the deposit. A deposit
/// smaller than the balance must be resized up first.
pub async fn close_channel(app: &Application, message: &Message) -> Result<Message, HandlerError> {
    let params: CloseChannelParams = message.payload.named_params()?;

    let client = app.pool.get().await.map_err(db::PoolError::from)?;
    let channel = db::channel::get(&*client, &params.channel_id)
        .await?
        .ok_or(HandlerError::NotFound("channel"))?;

    require_signature_from(message, &channel.participant)?;

    let asset = db::asset::by_token(&*client, &channel.token, channel.chain_id)
        .await?
        .ok_or(HandlerError::NotFound("asset"))?;

    let balance = db::ledger::balance(
        &*client,
        &AccountId::participant(&channel.participant),
        &channel.participant,
        &asset.symbol,
    )
    .await?;
    if balance.is_sign_negative() {
        return Err(HandlerError::InsufficientFunds);
    }

    let user_units = asset
        .to_base_units(balance)
        .map_err(|error| HandlerError::Internal(error.to_string()))?;
    if (channel.amount as u128) < user_units {
        return Err(HandlerError::ResizeFirst);
    }

    let next_version = channel.version + 1;
    let allocations = [
        StateAllocation {
            destination: params.funds_destination,
            token: channel.token,
            amount: U256::from(user_units),
        },
        StateAllocation {
            destination: app.signer.address(),
            token: channel.token,
            amount: U256::from(channel.amount as u128 - user_units),
        },
    ];

    let digest = state_hash(
        &channel.channel_id,
        Intent::Finalize,
        next_version,
        &[],
        &allocations,
    );
    let signature = app.signer.sign_digest(digest)?;

    Ok(state_response(
        message,
        channel.channel_id,
        Intent::Finalize,
        next_version,
        &[],
        &allocations,
        digest,
        &signature,
    ))
}

#[allow(clippy::too_many_arguments)]
fn state_response(
    message: &Message,
    channel_id: ChannelId,
    intent: Intent,
    version: u64,
    state_data: &[u8],
    allocations: &[StateAllocation],
    digest: [u8; 32],
    signature: &Signature,
) -> Message {
    let response = ChannelStateResponse {
        channel_id,
        intent: intent.as_u8(),
        version,
        state_data: format!("0x{}", hex::encode(state_data)),
        allocations: allocations
            .iter()
            .map(|allocation| WireAllocation {
                destination: allocation.destination,
                token: allocation.token,
                amount: allocation.amount.low_u128(),
            })
            .collect(),
        state_hash: format!("0x{}", hex::encode(digest)),
        server_signature: StateSignature::from(signature),
    };

    Message::response(
        message.payload.request_id,
        &message.payload.method,
        vec![json!(response)],
    )
}

#[cfg(test)]
mod test {
    use super::*;
    use adapter::Signer;
    use primitives::test_util::{ALICE, ALICE_KEY, TOKEN_USDC};

    #[test]
    fn state_response_carries_the_driving_material() {
        let signer = Signer::from_hex(ALICE_KEY).expect("valid key");
        let channel_id: ChannelId =
            "0x000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f"
                .parse()
                .expect("valid id");

        let allocations = [StateAllocation {
            destination: *ALICE,
            token: *TOKEN_USDC,
            amount: U256::from(25_000_000_u64),
        }];
        let state_data = encode_resize_amounts(&[0, -5]);
        let digest = state_hash(&channel_id, Intent::Resize, 2, &state_data, &allocations);
        let signature = signer.sign_digest(digest).expect("signs");

        let request = Message::request(11, "resize_channel", vec![]);
        let response = state_response(
            &request,
            channel_id,
            Intent::Resize,
            2,
            &state_data,
            &allocations,
            digest,
            &signature,
        );

        assert_eq!(11, response.payload.request_id);
        let body: ChannelStateResponse = response
            .payload
            .named_params()
            .expect("valid response body");

        assert_eq!(channel_id, body.channel_id);
        assert_eq!(2, body.intent, "RESIZE intent tag");
        assert_eq!(2, body.version);
        assert!(body.state_data.starts_with("0x"));
        assert_eq!(66, body.state_hash.len());
        assert_eq!(25_000_000, body.allocations[0].amount);
        assert!(body.server_signature.v == 27 || body.server_signature.v == 28);

        // the returned signature recovers the broker over the state digest
        let recovered = adapter::recover_digest(
            digest,
            &format!(
                "{}{}{:02x}",
                body.server_signature.r,
                body.server_signature.s.trim_start_matches("0x"),
                body.server_signature.v - 27
            )
            .parse()
            .expect("valid signature hex"),
        )
        .expect("recovers");
        assert_eq!(signer.address(), recovered);
    }
}
