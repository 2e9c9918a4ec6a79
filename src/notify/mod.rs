//! Post-commit notifications.
//!
//! The engine only knows the [`NotificationSink`] capability. Events are handed over
//! after the unit of work has committed, on a detached task: a failing or slow sink
//! can never hold a lock or undo a committed operation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::Amount;
use crate::model::{
    MutationId, MutationKind, TransactionId, TransactionKind, UserId, WalletId,
};

mod hub;
pub use hub::Hub;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("failed to encode notification: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("subscriber of user {0} disconnected")]
    Disconnected(UserId),
}

/// A committed top-up or transfer, as seen by one of its parties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionEvent {
    pub transaction_id: TransactionId,
    pub kind: TransactionKind,
    pub amount: Amount,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_user: Option<UserId>,
    pub to_user: UserId,
    pub performed_by: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// New balance of a wallet after one of its mutations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WalletUpdateEvent {
    pub wallet_id: WalletId,
    pub new_balance: Amount,
    pub mutation_kind: MutationKind,
    pub mutation_id: MutationId,
    pub transaction_id: TransactionId,
    pub amount: Amount,
    pub updated_at: DateTime<Utc>,
}

/// Receiver of post-commit events.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify_transaction(
        &self,
        user: UserId,
        event: &TransactionEvent,
    ) -> Result<(), NotifyError>;

    async fn notify_wallet_update(
        &self,
        user: UserId,
        event: &WalletUpdateEvent,
    ) -> Result<(), NotifyError>;
}

/// Sink that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

#[async_trait]
impl NotificationSink for NoopSink {
    async fn notify_transaction(&self, _: UserId, _: &TransactionEvent) -> Result<(), NotifyError> {
        Ok(())
    }

    async fn notify_wallet_update(
        &self,
        _: UserId,
        _: &WalletUpdateEvent,
    ) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// Sink that records every event in the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

#[async_trait]
impl NotificationSink for TracingSink {
    async fn notify_transaction(
        &self,
        user: UserId,
        event: &TransactionEvent,
    ) -> Result<(), NotifyError> {
        info!(
            user = %user,
            transaction = %event.transaction_id,
            kind = %event.kind,
            amount = %event.amount,
            "transaction notification"
        );
        Ok(())
    }

    async fn notify_wallet_update(
        &self,
        user: UserId,
        event: &WalletUpdateEvent,
    ) -> Result<(), NotifyError> {
        info!(
            user = %user,
            wallet = %event.wallet_id,
            mutation = %event.mutation_id,
            new_balance = %event.new_balance,
            "wallet update notification"
        );
        Ok(())
    }
}

/// One event addressed to one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Transaction(UserId, TransactionEvent),
    WalletUpdate(UserId, WalletUpdateEvent),
}

/// Deliver a batch on a detached task. Failures are logged, never retried.
pub(crate) fn dispatch(sink: Arc<dyn NotificationSink>, batch: Vec<Notification>) {
    tokio::spawn(async move {
        for notification in batch {
            let (user, result) = match &notification {
                Notification::Transaction(user, event) => {
                    (*user, sink.notify_transaction(*user, event).await)
                }
                Notification::WalletUpdate(user, event) => {
                    (*user, sink.notify_wallet_update(*user, event).await)
                }
            };
            if let Err(e) = result {
                warn!(user = %user, reason = %e, "notification dropped");
            }
        }
    });
}
