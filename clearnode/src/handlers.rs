//! Method dispatch and the read-only handlers. The fund-moving handlers live
//! in [`session`] and [`channel`].

use serde_json::json;

use primitives::{
    rpc::{
        BrokerConfig, GetAppDefinitionParams, GetChannelsParams, GetLedgerBalancesParams, Message,
        Method, NetworkInfo,
    },
    AccountId, Address,
};

use crate::{db, Application, HandlerError};

pub mod channel;
pub mod session;

/// Routes an authenticated request to its handler and builds the response.
/// Authority beyond "any authenticated caller" is enforced per handler.
pub async fn dispatch(
    app: &Application,
    caller: Address,
    message: &Message,
) -> Result<Message, HandlerError> {
    let method = message
        .method()
        .ok_or_else(|| HandlerError::Malformed(format!("unknown method {}", message.payload.method)))?;

    match method {
        Method::Ping => Ok(pong(message)),
        Method::GetConfig => Ok(get_config(app, message)),
        Method::GetLedgerBalances => get_ledger_balances(app, caller, message).await,
        Method::GetChannels => get_channels(app, message).await,
        Method::GetAppDefinition => get_app_definition(app, message).await,
        Method::GetRpcHistory => get_rpc_history(app, caller, message).await,
        Method::CreateAppSession => session::create_app_session(app, message).await,
        Method::CloseAppSession => session::close_app_session(app, message).await,
        Method::ResizeChannel => channel::resize_channel(app, message).await,
        Method::CloseChannel => channel::close_channel(app, message).await,
        // the auth flow is handled before dispatch; server-push methods and
        // "error" are never valid requests
        Method::AuthRequest
        | Method::AuthChallenge
        | Method::AuthVerify
        | Method::Pong
        | Method::BalanceUpdate
        | Method::ChannelUpdate
        | Method::Error => Err(HandlerError::Malformed(format!(
            "method {} cannot be requested",
            method
        ))),
    }
}

fn pong(message: &Message) -> Message {
    Message::response(
        message.payload.request_id,
        &Method::Pong.to_string(),
        vec![],
    )
}

fn get_config(app: &Application, message: &Message) -> Message {
    let mut networks: Vec<NetworkInfo> = app
        .config
        .chains
        .values()
        .map(|chain_info| NetworkInfo {
            chain_id: chain_info.chain.chain_id,
            custody_address: chain_info.chain.custody,
        })
        .collect();
    networks.sort_by_key(|network| network.chain_id);

    let config = BrokerConfig {
        broker_address: app.signer.address(),
        networks,
    };

    Message::response(
        message.payload.request_id,
        &message.payload.method,
        vec![json!(config)],
    )
}

/// Balances of the requested account (defaulting to the caller's own),
/// always filtered to rows tagged with the caller.
async fn get_ledger_balances(
    app: &Application,
    caller: Address,
    message: &Message,
) -> Result<Message, HandlerError> {
    let params: GetLedgerBalancesParams = message.payload.named_params()?;
    let account = params
        .acc
        .unwrap_or_else(|| AccountId::participant(&caller));

    let client = app.pool.get().await.map_err(db::PoolError::from)?;
    let balances = db::ledger::account_balances(&*client, &account, &caller).await?;

    Ok(Message::response(
        message.payload.request_id,
        &message.payload.method,
        vec![json!(balances)],
    ))
}

/// Requires a request signature by the queried participant.
async fn get_channels(app: &Application, message: &Message) -> Result<Message, HandlerError> {
    let params: GetChannelsParams = message.payload.named_params()?;

    require_signature_from(message, &params.participant)?;

    let client = app.pool.get().await.map_err(db::PoolError::from)?;
    let channels = db::channel::list_for_participant(&*client, &params.participant).await?;

    Ok(Message::response(
        message.payload.request_id,
        &message.payload.method,
        vec![json!(channels)],
    ))
}

async fn get_app_definition(app: &Application, message: &Message) -> Result<Message, HandlerError> {
    let params: GetAppDefinitionParams = message.payload.named_params()?;

    let client = app.pool.get().await.map_err(db::PoolError::from)?;
    let session = db::app_session::get(&*client, &params.acc)
        .await?
        .ok_or(HandlerError::NotFound("app session"))?;

    Ok(Message::response(
        message.payload.request_id,
        &message.payload.method,
        vec![json!(session.definition())],
    ))
}

async fn get_rpc_history(
    app: &Application,
    caller: Address,
    message: &Message,
) -> Result<Message, HandlerError> {
    let client = app.pool.get().await.map_err(db::PoolError::from)?;
    let history = db::rpc_record::list_for_sender(&*client, &caller).await?;

    Ok(Message::response(
        message.payload.request_id,
        &message.payload.method,
        vec![json!(history)],
    ))
}

/// At least one of the message's signatures must recover `expected`.
pub(crate) fn require_signature_from(
    message: &Message,
    expected: &Address,
) -> Result<(), HandlerError> {
    let bytes = message.payload.signable_bytes();

    let signed = message
        .signatures
        .iter()
        .any(|signature| adapter::verify(&bytes, signature, expected));

    if signed {
        Ok(())
    } else {
        Err(HandlerError::InvalidSignature)
    }
}

/// The distinct addresses recovered from the message's signatures, in
/// signature order. Any unrecoverable signature fails the whole request.
pub(crate) fn recover_signers(message: &Message) -> Result<Vec<Address>, HandlerError> {
    let bytes = message.payload.signable_bytes();

    message
        .signatures
        .iter()
        .map(|signature| {
            adapter::recover(&bytes, signature).map_err(|_| HandlerError::InvalidSignature)
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use adapter::Signer;
    use primitives::test_util::{ALICE_KEY, BOB_KEY};

    #[test]
    fn recover_signers_returns_addresses_in_signature_order() {
        let alice = Signer::from_hex(ALICE_KEY).expect("valid key");
        let bob = Signer::from_hex(BOB_KEY).expect("valid key");

        let mut message = Message::request(1, "create_app_session", vec![]);
        let bytes = message.payload.signable_bytes();
        message.signatures.push(bob.sign(&bytes).expect("signs"));
        message.signatures.push(alice.sign(&bytes).expect("signs"));

        let signers = recover_signers(&message).expect("recovers");
        assert_eq!(vec![bob.address(), alice.address()], signers);
    }

    #[test]
    fn require_signature_accepts_any_matching_signature() {
        let alice = Signer::from_hex(ALICE_KEY).expect("valid key");
        let bob = Signer::from_hex(BOB_KEY).expect("valid key");

        let mut message = Message::request(1, "get_channels", vec![]);
        let bytes = message.payload.signable_bytes();
        message.signatures.push(bob.sign(&bytes).expect("signs"));
        message.signatures.push(alice.sign(&bytes).expect("signs"));

        assert!(require_signature_from(&message, &alice.address()).is_ok());
        assert!(require_signature_from(&message, &bob.address()).is_ok());

        let charlie = Signer::from_hex(primitives::test_util::CHARLIE_KEY).expect("valid key");
        assert!(matches!(
            require_signature_from(&message, &charlie.address()),
            Err(HandlerError::InvalidSignature)
        ));
    }
}
