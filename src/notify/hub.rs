use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

use super::{NotificationSink, NotifyError, TransactionEvent, WalletUpdateEvent};
use crate::model::UserId;

#[derive(Serialize)]
struct Envelope<'a, T> {
    #[serde(rename = "type")]
    kind: &'static str,
    payload: &'a T,
}

/// Real-time fan-out of JSON messages to the live subscribers of each user.
#[derive(Debug, Default)]
pub struct Hub {
    subscribers: RwLock<HashMap<UserId, Vec<UnboundedSender<String>>>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber for a user. Dropping the receiver unsubscribes it.
    pub fn subscribe(&self, user: UserId) -> UnboundedReceiver<String> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let senders = subscribers.entry(user).or_default();
        senders.push(sender);
        info!(user = %user, connections = senders.len(), "subscriber registered");
        receiver
    }

    pub fn connection_count(&self, user: UserId) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&user)
            .map_or(0, |senders| senders.iter().filter(|s| !s.is_closed()).count())
    }

    pub fn total_connections(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .flatten()
            .filter(|s| !s.is_closed())
            .count()
    }

    /// Send a message to every subscriber of a user.
    ///
    /// A user without subscribers is not an error. Closed subscribers are pruned and
    /// reported as [`NotifyError::Disconnected`].
    pub fn broadcast_to_user(&self, user: UserId, message: &str) -> Result<(), NotifyError> {
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        let Some(senders) = subscribers.get_mut(&user) else {
            debug!(user = %user, "no subscribers");
            return Ok(());
        };

        let before = senders.len();
        senders.retain(|sender| sender.send(message.to_string()).is_ok());
        let dropped = before - senders.len();

        if senders.is_empty() {
            subscribers.remove(&user);
        }

        if dropped > 0 {
            warn!(user = %user, dropped, "pruned closed subscribers");
            return Err(NotifyError::Disconnected(user));
        }
        Ok(())
    }

    fn publish<T: Serialize>(
        &self,
        user: UserId,
        kind: &'static str,
        payload: &T,
    ) -> Result<(), NotifyError> {
        let message = serde_json::to_string(&Envelope { kind, payload })?;
        self.broadcast_to_user(user, &message)
    }
}

#[async_trait]
impl NotificationSink for Hub {
    async fn notify_transaction(
        &self,
        user: UserId,
        event: &TransactionEvent,
    ) -> Result<(), NotifyError> {
        self.publish(user, "transaction", event)
    }

    async fn notify_wallet_update(
        &self,
        user: UserId,
        event: &WalletUpdateEvent,
    ) -> Result<(), NotifyError> {
        self.publish(user, "wallet_update", event)
    }
}
