//! The per-participant fan-out index.
//!
//! Connections register under their authenticated address once `auth_verify`
//! succeeds; handlers and reconcilers push broker-signed `bu` / `cu`
//! notifications to every live connection of an address. Delivery is
//! best-effort: a dead subscriber is dropped, a disconnected one reconciles
//! on reconnect through `get_ledger_balances` / `get_channels`.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use primitives::{rpc::Message, Address};

pub type ConnectionId = Uuid;

#[derive(Clone, Default)]
pub struct Subscriptions {
    inner: Arc<RwLock<HashMap<Address, HashMap<ConnectionId, UnboundedSender<Message>>>>>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(
        &self,
        address: Address,
        connection_id: ConnectionId,
        sender: UnboundedSender<Message>,
    ) {
        let mut inner = self.inner.write().expect("subscriptions lock poisoned");

        inner
            .entry(address)
            .or_default()
            .insert(connection_id, sender);
    }

    pub fn unsubscribe(&self, address: &Address, connection_id: &ConnectionId) {
        let mut inner = self.inner.write().expect("subscriptions lock poisoned");

        if let Some(connections) = inner.get_mut(address) {
            connections.remove(connection_id);
            if connections.is_empty() {
                inner.remove(address);
            }
        }
    }

    /// Pushes an already-signed message to every connection of `address`,
    /// pruning subscribers whose channel is gone.
    pub fn notify(&self, address: &Address, message: Message) {
        let mut inner = self.inner.write().expect("subscriptions lock poisoned");

        if let Some(connections) = inner.get_mut(address) {
            connections.retain(|_, sender| sender.send(message.clone()).is_ok());
            if connections.is_empty() {
                inner.remove(address);
            }
        }
    }

    pub fn subscriber_count(&self, address: &Address) -> usize {
        let inner = self.inner.read().expect("subscriptions lock poisoned");

        inner
            .get(address)
            .map(|connections| connections.len())
            .unwrap_or(0)
    }
}
