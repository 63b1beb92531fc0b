//! Virtual application sessions: pooling balances under a weighted quorum and
//! redistributing them at close. Both handlers run their fund movements in a
//! single serializable transaction.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::json;

use primitives::{
    rpc::{
        AppAllocation, AppSessionResponse, CloseAppSessionParams, CreateAppSessionParams, Message,
    },
    AccountId, Address, AppDefinition, AppSession, SessionStatus,
};

use crate::{db, handlers::recover_signers, ledger, Application, HandlerError};

/// `create_app_session`: moves every positive allocation from the
/// participant's own account into the session account and records the session
/// row. Every participant with a positive allocation must have signed the
/// request; zero allocations need no signature.
pub async fn create_app_session(
    app: &Application,
    message: &Message,
) -> Result<Message, HandlerError> {
    let params: CreateAppSessionParams = message.payload.named_params()?;
    let mut definition = params.definition;
    let allocations = params.allocations;

    definition
        .validate(allocations.len())
        .map_err(|error| HandlerError::Malformed(error.to_string()))?;

    if definition.nonce == 0 {
        definition.nonce = message.payload.timestamp;
    }

    let signers: HashSet<Address> = recover_signers(message)?.into_iter().collect();
    check_creation_allocations(&definition, &allocations, &signers)?;

    let session_id = definition.session_id();
    let now = Utc::now();
    let session = AppSession {
        session_id,
        protocol: definition.protocol.clone(),
        participants: definition.participants.clone(),
        weights: definition.weights.clone(),
        quorum: definition.quorum,
        challenge: definition.challenge,
        nonce: definition.nonce,
        version: message.payload.timestamp,
        status: SessionStatus::Open,
        created_at: now,
        updated_at: now,
    };

    let mut attempt = 0;
    loop {
        match run_create(app, &session, &allocations).await {
            Err(error) if error.is_serialization_failure() && attempt < db::SERIALIZATION_RETRIES => {
                attempt += 1;
            }
            Err(error) => return Err(error),
            Ok(()) => break,
        }
    }

    for allocation in &allocations {
        if allocation.amount > Decimal::ZERO {
            app.notify_balance_update(&allocation.participant).await;
        }
    }

    let response = AppSessionResponse {
        app_session_id: session_id,
        status: SessionStatus::Open,
    };

    Ok(Message::response(
        message.payload.request_id,
        &message.payload.method,
        vec![json!(response)],
    ))
}

async fn run_create(
    app: &Application,
    session: &AppSession,
    allocations: &[AppAllocation],
) -> Result<(), HandlerError> {
    let mut client = app.pool.get().await.map_err(db::PoolError::from)?;
    let tx = db::begin(&mut client).await?;

    if db::app_session::get(&tx, &session.session_id)
        .await?
        .is_some()
    {
        return Err(HandlerError::Conflict(format!(
            "app session {} already exists",
            session.session_id
        )));
    }

    let session_account = AccountId::session(&session.session_id);
    for allocation in allocations {
        ledger::transfer(
            &tx,
            &allocation.participant,
            &allocation.asset_symbol,
            &AccountId::participant(&allocation.participant),
            &session_account,
            allocation.amount,
        )
        .await?;
    }

    db::app_session::insert(&tx, session).await?;
    tx.commit().await?;

    Ok(())
}

/// `close_app_session`: verifies the weighted quorum over the request's
/// signatures, then settles the pool into the stated redistribution: every
/// session sub-balance is drained to zero and each participant's own account
/// is credited with their agreed share. The stated allocations must account
/// for the pooled balances exactly, per asset.
pub async fn close_app_session(
    app: &Application,
    message: &Message,
) -> Result<Message, HandlerError> {
    let params: CloseAppSessionParams = message.payload.named_params()?;
    if params.allocations.is_empty() {
        return Err(HandlerError::MissingParameter("allocations".to_string()));
    }

    let signers = recover_signers(message)?;

    let mut attempt = 0;
    let participants = loop {
        match run_close(app, &params, &signers).await {
            Err(error) if error.is_serialization_failure() && attempt < db::SERIALIZATION_RETRIES => {
                attempt += 1;
            }
            Err(error) => return Err(error),
            Ok(participants) => break participants,
        }
    };

    for participant in &participants {
        app.notify_balance_update(participant).await;
    }

    let response = AppSessionResponse {
        app_session_id: params.app_session_id,
        status: SessionStatus::Closed,
    };

    Ok(Message::response(
        message.payload.request_id,
        &message.payload.method,
        vec![json!(response)],
    ))
}

async fn run_close(
    app: &Application,
    params: &CloseAppSessionParams,
    signers: &[Address],
) -> Result<Vec<Address>, HandlerError> {
    let mut client = app.pool.get().await.map_err(db::PoolError::from)?;
    let tx = db::begin(&mut client).await?;

    let session = db::app_session::get_open(&tx, &params.app_session_id)
        .await?
        .ok_or(HandlerError::NotFound("app session"))?;

    evaluate_quorum(&session, signers)?;
    check_allocation_coverage(&session, &params.allocations)?;

    let session_account = AccountId::session(&session.session_id);

    // pooled per-asset totals across all participants
    let assets = db::ledger::account_assets(&tx, &session_account).await?;
    let mut session_totals: HashMap<String, Decimal> = HashMap::new();
    for asset in &assets {
        for participant in &session.participants {
            let balance =
                db::ledger::balance(&tx, &session_account, participant, asset).await?;
            *session_totals.entry(asset.clone()).or_default() += balance;
        }
    }

    let mut allocation_totals: HashMap<String, Decimal> = HashMap::new();
    for allocation in &params.allocations {
        if allocation.amount.is_sign_negative() {
            return Err(HandlerError::Malformed(
                "allocation amount must not be negative".to_string(),
            ));
        }

        *allocation_totals
            .entry(allocation.asset_symbol.clone())
            .or_default() += allocation.amount;
    }

    // the stated redistribution must account for the pool exactly before
    // anything moves
    check_asset_conservation(&session_totals, &allocation_totals)?;

    // drain every per-participant sub-balance of the session account to zero
    for participant in &session.participants {
        for asset in &assets {
            let recorded =
                db::ledger::balance(&tx, &session_account, participant, asset).await?;
            if !recorded.is_zero() {
                db::ledger::record(&tx, &session_account, participant, asset, -recorded)
                    .await?;
            }
        }
    }

    // pay out the redistribution the signers agreed on
    for allocation in &params.allocations {
        db::ledger::record(
            &tx,
            &AccountId::participant(&allocation.participant),
            &allocation.participant,
            &allocation.asset_symbol,
            allocation.amount,
        )
        .await?;
    }

    db::app_session::mark_closed(&tx, &session.session_id, Utc::now()).await?;
    tx.commit().await?;

    Ok(session.participants)
}

/// Every allocation must target a definition participant, and every
/// participant with a positive amount must be among the signers.
fn check_creation_allocations(
    definition: &AppDefinition,
    allocations: &[AppAllocation],
    signers: &HashSet<Address>,
) -> Result<(), HandlerError> {
    for allocation in allocations {
        if allocation.amount.is_sign_negative() {
            return Err(HandlerError::Malformed(
                "allocation amount must not be negative".to_string(),
            ));
        }
        if definition.weight_of(&allocation.participant).is_none() {
            return Err(HandlerError::Malformed(format!(
                "allocation for non-participant {}",
                allocation.participant
            )));
        }
        if allocation.amount > Decimal::ZERO && !signers.contains(&allocation.participant) {
            return Err(HandlerError::InvalidSignature);
        }
    }

    Ok(())
}

/// Sums the weights of the distinct signers. Duplicate signatures, unknown
/// signers and non-positive weights are rejected outright; the summed weight
/// must reach the session's quorum.
fn evaluate_quorum(session: &AppSession, signers: &[Address]) -> Result<i64, HandlerError> {
    let mut seen = HashSet::new();
    let mut reached: i64 = 0;

    for signer in signers {
        if !seen.insert(*signer) {
            return Err(HandlerError::InvalidSignature);
        }

        let weight = session
            .weight_of(signer)
            .ok_or(HandlerError::InvalidSignature)?;
        if weight <= 0 {
            return Err(HandlerError::InvalidSignature);
        }

        reached += weight;
    }

    if reached < session.quorum as i64 {
        return Err(HandlerError::QuorumNotMet {
            reached,
            required: session.quorum,
        });
    }

    Ok(reached)
}

/// Every session participant appears exactly once; nobody else does.
fn check_allocation_coverage(
    session: &AppSession,
    allocations: &[AppAllocation],
) -> Result<(), HandlerError> {
    let mut seen = HashSet::new();

    for allocation in allocations {
        if session.weight_of(&allocation.participant).is_none() {
            return Err(HandlerError::AllocationMismatch(format!(
                "allocation to non-participant {}",
                allocation.participant
            )));
        }
        if !seen.insert(allocation.participant) {
            return Err(HandlerError::AllocationMismatch(format!(
                "participant {} appears more than once",
                allocation.participant
            )));
        }
    }

    if seen.len() != session.participants.len() {
        return Err(HandlerError::AllocationMismatch(
            "every participant must appear exactly once".to_string(),
        ));
    }

    Ok(())
}

/// No asset may be created, destroyed or left behind: the allocation sums
/// must equal the pooled session totals per asset.
fn check_asset_conservation(
    session_totals: &HashMap<String, Decimal>,
    allocation_totals: &HashMap<String, Decimal>,
) -> Result<(), HandlerError> {
    for (asset, pooled) in session_totals {
        let allocated = allocation_totals.get(asset).copied().unwrap_or_default();
        if *pooled != allocated {
            return Err(HandlerError::AllocationMismatch(format!(
                "asset {}: pooled {}, allocated {}",
                asset, pooled, allocated
            )));
        }
    }

    for (asset, allocated) in allocation_totals {
        if !session_totals.contains_key(asset) && !allocated.is_zero() {
            return Err(HandlerError::AllocationMismatch(format!(
                "allocation references unknown asset {}",
                asset
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::Utc;
    use primitives::test_util::{ALICE, BOB, CHARLIE};

    fn session(weights: Vec<i64>, quorum: u64) -> AppSession {
        let definition = AppDefinition {
            protocol: "nitro-rpc".to_string(),
            participants: vec![*ALICE, *BOB],
            weights,
            quorum,
            challenge: 86_400,
            nonce: 1_700_000_000,
        };

        AppSession {
            session_id: definition.session_id(),
            protocol: definition.protocol.clone(),
            participants: definition.participants.clone(),
            weights: definition.weights.clone(),
            quorum: definition.quorum,
            challenge: definition.challenge,
            nonce: definition.nonce,
            version: 1_700_000_000,
            status: SessionStatus::Open,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn allocation(participant: Address, amount: i64) -> AppAllocation {
        AppAllocation {
            participant,
            asset_symbol: "usdc".to_string(),
            amount: Decimal::new(amount, 0),
        }
    }

    #[test]
    fn quorum_is_met_when_both_sign() {
        let session = session(vec![1, 1], 2);

        assert_eq!(Ok(2), evaluate_quorum(&session, &[*ALICE, *BOB]).map_err(|_| ()));
    }

    #[test]
    fn a_single_signer_misses_a_two_of_two_quorum() {
        let session = session(vec![1, 1], 2);

        match evaluate_quorum(&session, &[*ALICE]) {
            Err(HandlerError::QuorumNotMet { reached, required }) => {
                assert_eq!(1, reached);
                assert_eq!(2, required);
            }
            other => panic!("expected QuorumNotMet, got {:?}", other),
        }
    }

    #[test]
    fn weighted_single_signer_can_meet_quorum() {
        let session = session(vec![2, 1], 2);

        assert!(evaluate_quorum(&session, &[*ALICE]).is_ok());
        assert!(matches!(
            evaluate_quorum(&session, &[*BOB]),
            Err(HandlerError::QuorumNotMet { .. })
        ));
    }

    #[test]
    fn duplicate_unknown_and_zero_weight_signers_are_rejected() {
        let session = session(vec![1, 0], 1);

        assert!(matches!(
            evaluate_quorum(&session, &[*ALICE, *ALICE]),
            Err(HandlerError::InvalidSignature)
        ));
        assert!(matches!(
            evaluate_quorum(&session, &[*CHARLIE]),
            Err(HandlerError::InvalidSignature)
        ));
        // BOB participates with weight zero
        assert!(matches!(
            evaluate_quorum(&session, &[*BOB]),
            Err(HandlerError::InvalidSignature)
        ));
    }

    #[test]
    fn creation_requires_signatures_only_for_positive_allocations() {
        let session = session(vec![1, 1], 2);
        let definition = session.definition();

        let only_alice: HashSet<Address> = [*ALICE].into_iter().collect();

        // BOB's allocation is zero, so ALICE's signature alone suffices
        let allocations = vec![allocation(*ALICE, 100), allocation(*BOB, 0)];
        assert!(check_creation_allocations(&definition, &allocations, &only_alice).is_ok());

        // a positive BOB allocation now needs BOB's signature
        let allocations = vec![allocation(*ALICE, 100), allocation(*BOB, 1)];
        assert!(matches!(
            check_creation_allocations(&definition, &allocations, &only_alice),
            Err(HandlerError::InvalidSignature)
        ));
    }

    #[test]
    fn creation_rejects_negative_and_foreign_allocations() {
        let session = session(vec![1, 1], 2);
        let definition = session.definition();
        let signers: HashSet<Address> = [*ALICE, *BOB, *CHARLIE].into_iter().collect();

        assert!(matches!(
            check_creation_allocations(&definition, &[allocation(*ALICE, -1)], &signers),
            Err(HandlerError::Malformed(_))
        ));
        assert!(matches!(
            check_creation_allocations(&definition, &[allocation(*CHARLIE, 5)], &signers),
            Err(HandlerError::Malformed(_))
        ));
    }

    #[test]
    fn coverage_requires_every_participant_exactly_once() {
        let session = session(vec![1, 1], 2);

        assert!(check_allocation_coverage(
            &session,
            &[allocation(*ALICE, 30), allocation(*BOB, 70)]
        )
        .is_ok());

        // BOB missing
        assert!(matches!(
            check_allocation_coverage(&session, &[allocation(*ALICE, 100)]),
            Err(HandlerError::AllocationMismatch(_))
        ));

        // ALICE twice
        assert!(matches!(
            check_allocation_coverage(
                &session,
                &[allocation(*ALICE, 50), allocation(*ALICE, 50)]
            ),
            Err(HandlerError::AllocationMismatch(_))
        ));

        // outsider
        assert!(matches!(
            check_allocation_coverage(
                &session,
                &[allocation(*ALICE, 50), allocation(*CHARLIE, 50)]
            ),
            Err(HandlerError::AllocationMismatch(_))
        ));
    }

    #[test]
    fn conservation_matches_pooled_totals() {
        let pooled: HashMap<String, Decimal> =
            [("usdc".to_string(), Decimal::new(100, 0))].into_iter().collect();

        let exact: HashMap<String, Decimal> =
            [("usdc".to_string(), Decimal::new(100, 0))].into_iter().collect();
        assert!(check_asset_conservation(&pooled, &exact).is_ok());

        // 30 + 50 = 80 stated against 100 pooled
        let short: HashMap<String, Decimal> =
            [("usdc".to_string(), Decimal::new(80, 0))].into_iter().collect();
        assert!(matches!(
            check_asset_conservation(&pooled, &short),
            Err(HandlerError::AllocationMismatch(_))
        ));

        // an asset nobody pooled cannot be paid out
        let foreign: HashMap<String, Decimal> = [
            ("usdc".to_string(), Decimal::new(100, 0)),
            ("weth".to_string(), Decimal::new(1, 0)),
        ]
        .into_iter()
        .collect();
        assert!(matches!(
            check_asset_conservation(&pooled, &foreign),
            Err(HandlerError::AllocationMismatch(_))
        ));

        // a zero entry for an unknown asset is harmless
        let zero_foreign: HashMap<String, Decimal> = [
            ("usdc".to_string(), Decimal::new(100, 0)),
            ("weth".to_string(), Decimal::ZERO),
        ]
        .into_iter()
        .collect();
        assert!(check_asset_conservation(&pooled, &zero_foreign).is_ok());

        // an asset left behind in the session
        let empty: HashMap<String, Decimal> = HashMap::new();
        assert!(matches!(
            check_asset_conservation(&pooled, &empty),
            Err(HandlerError::AllocationMismatch(_))
        ));
    }
}
