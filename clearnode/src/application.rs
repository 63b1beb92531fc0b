use std::sync::Arc;

use adapter::Signer;
use axum::{routing::get, Extension, Router};
use slog::{error, info, Logger};

use primitives::{
    rpc::{Message, Method},
    AccountId, Address, Channel, Config,
};

use crate::{db::DbPool, subscriptions::Subscriptions, ws, HandlerError};

/// The broker application: everything a connection task or reconciler needs,
/// passed around as one explicit dependency.
pub struct Application {
    pub signer: Arc<Signer>,
    pub config: Config,
    pub logger: Logger,
    pub pool: DbPool,
    pub subscriptions: Subscriptions,
}

impl Application {
    pub fn new(
        signer: Arc<Signer>,
        config: Config,
        logger: Logger,
        pool: DbPool,
    ) -> Self {
        Self {
            signer,
            config,
            logger,
            pool,
            subscriptions: Subscriptions::new(),
        }
    }

    /// Signs a message with the broker key; outgoing responses carry exactly
    /// this one signature.
    pub fn sign_message(&self, message: &mut Message) -> Result<(), HandlerError> {
        let signature = self.signer.sign(&message.payload.signable_bytes())?;
        message.signatures = vec![signature];

        Ok(())
    }

    /// Pushes a `bu` notification with the participant's current balances to
    /// every live connection of that participant. Best-effort.
    pub async fn notify_balance_update(&self, participant: &Address) {
        let account = AccountId::participant(participant);

        let balances = match self.pool.get().await {
            Ok(client) => {
                crate::db::ledger::account_balances(&*client, &account, participant).await
            }
            Err(error) => {
                error!(self.logger, "failed to get connection for balance update";
                       "participant" => %participant, "error" => %error);
                return;
            }
        };

        let balances = match balances {
            Ok(balances) => balances,
            Err(error) => {
                error!(self.logger, "failed to load balances for update";
                       "participant" => %participant, "error" => %error);
                return;
            }
        };

        let params = match serde_json::to_value(&balances) {
            Ok(value) => vec![value],
            Err(error) => {
                error!(self.logger, "failed to serialize balance update"; "error" => %error);
                return;
            }
        };

        let mut message = Message::notification(Method::BalanceUpdate, params);
        if let Err(error) = self.sign_message(&mut message) {
            error!(self.logger, "failed to sign balance update"; "error" => %error);
            return;
        }

        self.subscriptions.notify(participant, message);
    }

    /// Pushes a `cu` notification with the channel row to its participant.
    pub fn notify_channel_update(&self, channel: &Channel) {
        let params = match serde_json::to_value(channel) {
            Ok(value) => vec![value],
            Err(error) => {
                error!(self.logger, "failed to serialize channel update"; "error" => %error);
                return;
            }
        };

        let mut message = Message::notification(Method::ChannelUpdate, params);
        if let Err(error) = self.sign_message(&mut message) {
            error!(self.logger, "failed to sign channel update"; "error" => %error);
            return;
        }

        self.subscriptions.notify(&channel.participant, message);
    }

    pub fn router(self: &Arc<Self>) -> Router {
        Router::new()
            .route("/ws", get(ws::ws_handler))
            .layer(Extension(Arc::clone(self)))
    }

    /// Serves the websocket endpoint until Ctrl+C.
    pub async fn run(self: Arc<Self>) {
        let logger = self.logger.clone();
        let listen_addr = self.config.listen_addr;

        info!(&logger, "Listening on socket address: {}!", listen_addr);

        let router = self.router();

        let server = axum::Server::bind(&listen_addr)
            .serve(router.into_make_service())
            .with_graceful_shutdown(shutdown_signal(logger.clone()));

        if let Err(error) = server.await {
            error!(&logger, "server error: {}", error; "main" => "run");
        }
    }
}

/// A Ctrl+C signal to gracefully shutdown the server
async fn shutdown_signal(logger: Logger) {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install CTRL+C signal handler");

    info!(&logger, "Received Ctrl+C signal. Shutting down..")
}
