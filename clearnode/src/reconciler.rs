//! Per-chain reconciliation: tails the custody contract's event log from a
//! persisted checkpoint and mirrors the on-chain facts into channel rows and
//! ledger entries. Each event applies in one serializable transaction
//! together with the checkpoint advance, so replaying the log is idempotent;
//! an event that cannot be applied keeps the checkpoint in place and is
//! retried with exponential backoff.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use slog::{error, info, o, warn, Logger};

use adapter::{
    state::{state_hash, Intent, StateAllocation},
    Custody, CustodyEvent, EventPosition,
};
use primitives::{config::ChainInfo, AccountId, Address, ChainId, ChannelId, ChannelStatus};

use crate::{db, Application, HandlerError};

/// How many poll ticks pass between on-chain balance reports.
const BALANCE_REPORT_TICKS: u64 = 120;

pub struct ChainReconciler {
    app: Arc<Application>,
    custody: Custody,
    chain: ChainInfo,
    logger: Logger,
    poll_interval: Duration,
    max_backoff: Duration,
}

impl ChainReconciler {
    pub fn new(app: Arc<Application>, chain: ChainInfo) -> Result<Self, adapter::Error> {
        let custody = Custody::new(&chain.chain)?;
        let logger = app
            .logger
            .new(o!("chain" => chain.chain.chain_id.to_string()));
        let poll_interval = Duration::from_millis(app.config.poll_interval_ms);
        let max_backoff = Duration::from_secs(app.config.max_backoff_secs);

        Ok(Self {
            app,
            custody,
            chain,
            logger,
            poll_interval,
            max_backoff,
        })
    }

    fn chain_id(&self) -> ChainId {
        self.chain.chain.chain_id
    }

    /// Tails the custody log until the process stops.
    pub async fn run(self) {
        info!(self.logger, "reconciler started";
              "custody" => %self.chain.chain.custody);

        let mut backoff = self.poll_interval;
        let mut ticks: u64 = 0;

        loop {
            if ticks % BALANCE_REPORT_TICKS == 0 {
                self.report_balances().await;
            }
            ticks += 1;

            match self.tick().await {
                Ok(()) => {
                    backoff = self.poll_interval;
                    tokio::time::sleep(self.poll_interval).await;
                }
                Err(err) => {
                    warn!(self.logger, "tick failed, backing off";
                          "error" => %err, "backoff_secs" => backoff.as_secs());
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(self.max_backoff);
                }
            }
        }
    }

    async fn tick(&self) -> Result<(), HandlerError> {
        let latest = self.custody.latest_block().await?;

        let checkpoint = {
            let client = self.app.pool.get().await.map_err(db::PoolError::from)?;
            db::checkpoint::get(&*client, self.chain_id()).await?
        };

        let from_block = checkpoint.map(|position| position.block_number).unwrap_or(0);
        if from_block > latest {
            return Ok(());
        }

        let events = self.custody.events(from_block, latest).await?;

        let mut applied = checkpoint;
        for (position, event) in events {
            if !should_apply(applied, position) {
                continue;
            }

            self.apply(position, event).await?;
            applied = Some(position);
        }

        Ok(())
    }

    async fn apply(&self, position: EventPosition, event: CustodyEvent) -> Result<(), HandlerError> {
        match event {
            CustodyEvent::Created {
                channel_id,
                participants,
                adjudicator,
                nonce,
                initial_data,
                initial_allocations,
            } => {
                self.apply_created(
                    position,
                    channel_id,
                    participants,
                    adjudicator,
                    nonce,
                    initial_data,
                    initial_allocations,
                )
                .await
            }
            CustodyEvent::Joined { channel_id, index } => {
                self.apply_joined(position, channel_id, index).await
            }
            CustodyEvent::Resized { channel_id, deltas } => {
                self.apply_resized(position, channel_id, deltas).await
            }
            CustodyEvent::Closed { channel_id } => self.apply_closed(position, channel_id).await,
        }
    }

    /// Marks an event as applied without any effect.
    async fn skip(&self, position: EventPosition, reason: &str) -> Result<(), HandlerError> {
        info!(self.logger, "skipping event"; "reason" => reason,
              "block" => position.block_number, "log" => position.log_index);

        let mut client = self.app.pool.get().await.map_err(db::PoolError::from)?;
        let tx = db::begin(&mut client).await?;
        db::checkpoint::set(&tx, self.chain_id(), position).await?;
        tx.commit().await?;

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn apply_created(
        &self,
        position: EventPosition,
        channel_id: ChannelId,
        participants: Vec<Address>,
        adjudicator: Address,
        nonce: u64,
        initial_data: Vec<u8>,
        initial_allocations: Vec<StateAllocation>,
    ) -> Result<(), HandlerError> {
        let broker = self.app.signer.address();

        if participants.len() < 2 || participants[1] != broker {
            return self.skip(position, "channel was not created with the broker").await;
        }
        let participant = participants[0];

        let funding = initial_allocations
            .first()
            .ok_or_else(|| HandlerError::Internal("created event without allocations".to_string()))?;
        let amount = u64::try_from(funding.amount)
            .map_err(|_| HandlerError::Internal("initial deposit exceeds u64".to_string()))?;
        let token = funding.token;

        let channel = db::channel::new_channel(
            channel_id,
            participant,
            token,
            self.chain_id(),
            adjudicator,
            amount,
            nonce,
            Utc::now(),
        );

        {
            let mut client = self.app.pool.get().await.map_err(db::PoolError::from)?;
            let tx = db::begin(&mut client).await?;

            if let Some(existing) =
                db::channel::find_active(&tx, &participant, &token, self.chain_id()).await?
            {
                // the chain fact stands, but this broker will not track a second
                // channel for the same (participant, token, chain)
                warn!(self.logger, "conflict: active channel already exists";
                      "existing" => %existing.channel_id, "created" => %channel_id);
                db::checkpoint::set(&tx, self.chain_id(), position).await?;
                tx.commit().await?;

                return Ok(());
            }

            db::channel::insert(&tx, &channel).await?;
            db::checkpoint::set(&tx, self.chain_id(), position).await?;
            tx.commit().await?;
        }

        info!(self.logger, "channel created, joining";
              "channel" => %channel_id, "participant" => %participant);

        // countersign the initial state and join as participant #1
        let digest = state_hash(
            &channel_id,
            Intent::Initialize,
            0,
            &initial_data,
            &initial_allocations,
        );
        let signature = self.app.signer.sign_digest(digest)?;

        match self.custody.join(&self.app.signer, channel_id, &signature).await {
            Ok(tx_hash) => {
                info!(self.logger, "join submitted"; "channel" => %channel_id, "tx" => %tx_hash);
            }
            Err(err) => {
                // the channel stays in joining until an operator re-submits
                error!(self.logger, "join submission failed";
                       "channel" => %channel_id, "error" => %err);
            }
        }

        self.app.notify_channel_update(&channel);

        Ok(())
    }

    async fn apply_joined(
        &self,
        position: EventPosition,
        channel_id: ChannelId,
        _index: u64,
    ) -> Result<(), HandlerError> {
        let channel = {
            let mut client = self.app.pool.get().await.map_err(db::PoolError::from)?;
            let tx = db::begin(&mut client).await?;

            let mut channel = db::channel::get(&tx, &channel_id)
                .await?
                .ok_or(HandlerError::NotFound("channel"))?;

            channel.status = ChannelStatus::Open;
            channel.updated_at = Utc::now();
            db::channel::save(&tx, &channel).await?;

            let asset = db::asset::by_token(&tx, &channel.token, self.chain_id())
                .await?
                .ok_or(HandlerError::NotFound("asset"))?;
            let amount = asset
                .from_base_units(channel.amount as i128)
                .map_err(|err| HandlerError::Internal(err.to_string()))?;

            db::ledger::record(
                &tx,
                &AccountId::participant(&channel.participant),
                &channel.participant,
                &asset.symbol,
                amount,
            )
            .await?;

            db::checkpoint::set(&tx, self.chain_id(), position).await?;
            tx.commit().await?;

            channel
        };

        info!(self.logger, "channel open"; "channel" => %channel_id);

        self.app.notify_balance_update(&channel.participant).await;
        self.app.notify_channel_update(&channel);

        Ok(())
    }

    async fn apply_resized(
        &self,
        position: EventPosition,
        channel_id: ChannelId,
        deltas: Vec<i128>,
    ) -> Result<(), HandlerError> {
        let channel = {
            let mut client = self.app.pool.get().await.map_err(db::PoolError::from)?;
            let tx = db::begin(&mut client).await?;

            let mut channel = db::channel::get(&tx, &channel_id)
                .await?
                .ok_or(HandlerError::NotFound("channel"))?;

            let total: i128 = deltas.iter().sum();
            let new_amount = channel.amount as i128 + total;
            let new_amount = u64::try_from(new_amount)
                .map_err(|_| HandlerError::Internal("resize out of range".to_string()))?;

            channel.amount = new_amount;
            channel.version += 1;
            channel.updated_at = Utc::now();
            db::channel::save(&tx, &channel).await?;

            // the first delta is the participant's deposit or withdrawal
            let participant_delta = deltas.first().copied().unwrap_or(0);
            if participant_delta != 0 {
                let asset = db::asset::by_token(&tx, &channel.token, self.chain_id())
                    .await?
                    .ok_or(HandlerError::NotFound("asset"))?;
                let amount = asset
                    .from_base_units(participant_delta)
                    .map_err(|err| HandlerError::Internal(err.to_string()))?;

                db::ledger::record(
                    &tx,
                    &AccountId::participant(&channel.participant),
                    &channel.participant,
                    &asset.symbol,
                    amount,
                )
                .await?;
            }

            db::checkpoint::set(&tx, self.chain_id(), position).await?;
            tx.commit().await?;

            channel
        };

        info!(self.logger, "channel resized";
              "channel" => %channel_id, "amount" => channel.amount, "version" => channel.version);

        self.app.notify_balance_update(&channel.participant).await;
        self.app.notify_channel_update(&channel);

        Ok(())
    }

    async fn apply_closed(
        &self,
        position: EventPosition,
        channel_id: ChannelId,
    ) -> Result<(), HandlerError> {
        let channel = {
            let mut client = self.app.pool.get().await.map_err(db::PoolError::from)?;
            let tx = db::begin(&mut client).await?;

            let mut channel = db::channel::get(&tx, &channel_id)
                .await?
                .ok_or(HandlerError::NotFound("channel"))?;

            let asset = db::asset::by_token(&tx, &channel.token, self.chain_id())
                .await?
                .ok_or(HandlerError::NotFound("asset"))?;

            let account = AccountId::participant(&channel.participant);
            let balance =
                db::ledger::balance(&tx, &account, &channel.participant, &asset.symbol).await?;
            let deposit = asset
                .from_base_units(channel.amount as i128)
                .map_err(|err| HandlerError::Internal(err.to_string()))?;

            // debit down to zero, never below
            let debit = balance.min(deposit);
            db::ledger::record(&tx, &account, &channel.participant, &asset.symbol, -debit)
                .await?;

            channel.status = ChannelStatus::Closed;
            channel.amount = 0;
            channel.version += 1;
            channel.updated_at = Utc::now();
            db::channel::save(&tx, &channel).await?;

            db::checkpoint::set(&tx, self.chain_id(), position).await?;
            tx.commit().await?;

            channel
        };

        info!(self.logger, "channel closed"; "channel" => %channel_id);

        self.app.notify_balance_update(&channel.participant).await;
        self.app.notify_channel_update(&channel);

        Ok(())
    }

    /// Logs the broker's on-chain standing per configured token.
    async fn report_balances(&self) {
        let broker = self.app.signer.address();

        for token in self.chain.tokens.values() {
            match self.custody.account_info(broker, token.address).await {
                Ok(info) => {
                    info!(self.logger, "custody account";
                          "token" => %token.address,
                          "available" => %info.available,
                          "channels" => info.channel_count);
                }
                Err(err) => {
                    warn!(self.logger, "failed to fetch custody account info";
                          "token" => %token.address, "error" => %err);
                }
            }
        }
    }
}

/// An event applies only when it lies strictly past the checkpoint.
fn should_apply(checkpoint: Option<EventPosition>, position: EventPosition) -> bool {
    checkpoint.map_or(true, |applied| position > applied)
}

#[cfg(test)]
mod test {
    use super::*;

    fn at(block_number: u64, log_index: u64) -> EventPosition {
        EventPosition {
            block_number,
            log_index,
        }
    }

    #[test]
    fn everything_applies_on_a_fresh_chain() {
        assert!(should_apply(None, at(0, 0)));
        assert!(should_apply(None, at(12, 3)));
    }

    #[test]
    fn replayed_events_do_not_apply_twice() {
        let checkpoint = Some(at(10, 2));

        // replaying the checkpointed log or anything before it is a no-op
        assert!(!should_apply(checkpoint, at(10, 2)));
        assert!(!should_apply(checkpoint, at(10, 1)));
        assert!(!should_apply(checkpoint, at(9, 7)));

        // strictly newer positions apply
        assert!(should_apply(checkpoint, at(10, 3)));
        assert!(should_apply(checkpoint, at(11, 0)));
    }
}
