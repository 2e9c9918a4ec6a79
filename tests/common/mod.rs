//! Shared test doubles and ledger audits.
#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use wallet_ledger::model::{
    Actor, Mutation, MutationKind, NewMutation, NewTransaction, Role, Transaction, TransactionId,
    UserId, Wallet, WalletId,
};
use wallet_ledger::notify::{
    Notification, NotificationSink, NotifyError, TransactionEvent, WalletUpdateEvent,
};
use wallet_ledger::store::{MemoryStore, Store, StoreError, UnitOfWork};
use wallet_ledger::{Amount, Engine, Pagination};

pub const ADMIN: UserId = UserId(1);

pub fn admin() -> Actor {
    Actor::new(ADMIN, Role::SuperAdmin)
}

pub fn amount(minor: i64) -> Amount {
    Amount::from_minor(minor)
}

/// Engine over a fresh in-memory store, with a wallet for every given user.
pub async fn engine_with_wallets(store: Arc<dyn Store>, users: &[UserId]) -> Engine {
    let engine = Engine::new(store);
    for user in users {
        engine.open_wallet(*user).await.unwrap();
    }
    engine
}

pub async fn balance(engine: &Engine, user: UserId) -> Amount {
    engine.wallet_for_user(user).await.unwrap().balance
}

/// Every mutation of a user's wallet, oldest first.
pub async fn history(engine: &Engine, user: UserId) -> Vec<Mutation> {
    let mut all = Vec::new();
    let mut page = 1;
    loop {
        let result = engine
            .list_mutations_for_user(user, Pagination::new(page, 100).unwrap())
            .await
            .unwrap();
        let done = result.items.len() < 100;
        all.extend(result.items);
        if done {
            break;
        }
        page += 1;
    }
    all.reverse();
    all
}

/// Check that a wallet's balance is exactly explained by its mutation chain.
pub async fn audit_wallet(engine: &Engine, user: UserId) {
    let wallet = engine.wallet_for_user(user).await.unwrap();
    let mutations = history(engine, user).await;

    let mut running = Amount::ZERO;
    for m in &mutations {
        assert_eq!(m.wallet, wallet.id);
        assert_eq!(m.balance_before, running, "broken chain at mutation {}", m.id);
        let expected = match m.kind {
            MutationKind::Credit => running.checked_add(m.amount),
            MutationKind::Debit => running.checked_sub(m.amount),
        };
        assert_eq!(Some(m.balance_after), expected);
        assert!(!m.balance_after.is_negative());
        running = m.balance_after;
    }
    assert_eq!(running, wallet.balance, "wallet {} drifted from its ledger", wallet.id);
}

/// Sink forwarding every event to a channel the test can await.
pub struct RecordingSink {
    sender: UnboundedSender<Notification>,
}

impl RecordingSink {
    pub fn new() -> (Arc<Self>, UnboundedReceiver<Notification>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Arc::new(Self { sender }), receiver)
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn notify_transaction(
        &self,
        user: UserId,
        event: &TransactionEvent,
    ) -> Result<(), NotifyError> {
        let _ = self
            .sender
            .send(Notification::Transaction(user, event.clone()));
        Ok(())
    }

    async fn notify_wallet_update(
        &self,
        user: UserId,
        event: &WalletUpdateEvent,
    ) -> Result<(), NotifyError> {
        let _ = self
            .sender
            .send(Notification::WalletUpdate(user, event.clone()));
        Ok(())
    }
}

/// Receive exactly `count` notifications, failing after one second.
pub async fn collect(
    receiver: &mut UnboundedReceiver<Notification>,
    count: usize,
) -> Vec<Notification> {
    let mut received = Vec::with_capacity(count);
    for _ in 0..count {
        let next = tokio::time::timeout(Duration::from_secs(1), receiver.recv())
            .await
            .expect("notification not delivered")
            .expect("sink dropped");
        received.push(next);
    }
    received
}

/// Sink rejecting every event.
pub struct FailingSink;

#[async_trait]
impl NotificationSink for FailingSink {
    async fn notify_transaction(
        &self,
        user: UserId,
        _: &TransactionEvent,
    ) -> Result<(), NotifyError> {
        Err(NotifyError::Disconnected(user))
    }

    async fn notify_wallet_update(
        &self,
        user: UserId,
        _: &WalletUpdateEvent,
    ) -> Result<(), NotifyError> {
        Err(NotifyError::Disconnected(user))
    }
}

/// Store wrapper that records the order of row locks and can fail the n-th
/// mutation append (1-based, counted per unit of work).
pub struct InstrumentedStore {
    inner: MemoryStore,
    fail_on_append: Option<usize>,
    locks: Arc<StdMutex<Vec<WalletId>>>,
}

impl InstrumentedStore {
    pub fn recording(inner: MemoryStore) -> Self {
        Self {
            inner,
            fail_on_append: None,
            locks: Arc::default(),
        }
    }

    pub fn failing(inner: MemoryStore, fail_on_append: usize) -> Self {
        Self {
            fail_on_append: Some(fail_on_append),
            ..Self::recording(inner)
        }
    }

    /// Wallets passed to `lock_for_update`, in call order, across all units.
    pub fn locked(&self) -> Vec<WalletId> {
        self.locks.lock().unwrap().clone()
    }

    pub fn clear_locked(&self) {
        self.locks.lock().unwrap().clear();
    }
}

#[async_trait]
impl Store for InstrumentedStore {
    async fn create_wallet(&self, user: UserId) -> Result<Wallet, StoreError> {
        self.inner.create_wallet(user).await
    }

    async fn find_wallet_by_user(&self, user: UserId) -> Result<Option<Wallet>, StoreError> {
        self.inner.find_wallet_by_user(user).await
    }

    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        Ok(Box::new(InstrumentedUnit {
            inner: self.inner.begin().await?,
            appends: 0,
            fail_on_append: self.fail_on_append,
            locks: Arc::clone(&self.locks),
        }))
    }

    async fn transactions_for_wallet(
        &self,
        wallet: WalletId,
        pagination: Pagination,
    ) -> Result<(Vec<Transaction>, u64), StoreError> {
        self.inner.transactions_for_wallet(wallet, pagination).await
    }

    async fn mutations_for_wallet(
        &self,
        wallet: WalletId,
        pagination: Pagination,
    ) -> Result<(Vec<Mutation>, u64), StoreError> {
        self.inner.mutations_for_wallet(wallet, pagination).await
    }

    async fn mutations_for_transaction(
        &self,
        transaction: TransactionId,
    ) -> Result<Vec<Mutation>, StoreError> {
        self.inner.mutations_for_transaction(transaction).await
    }
}

struct InstrumentedUnit {
    inner: Box<dyn UnitOfWork>,
    appends: usize,
    fail_on_append: Option<usize>,
    locks: Arc<StdMutex<Vec<WalletId>>>,
}

#[async_trait]
impl UnitOfWork for InstrumentedUnit {
    async fn lock_for_update(&mut self, wallet: WalletId) -> Result<Wallet, StoreError> {
        self.locks.lock().unwrap().push(wallet);
        self.inner.lock_for_update(wallet).await
    }

    fn update_balance(&mut self, wallet: WalletId, balance: Amount) -> Result<(), StoreError> {
        self.inner.update_balance(wallet, balance)
    }

    fn create_transaction(
        &mut self,
        transaction: NewTransaction,
    ) -> Result<Transaction, StoreError> {
        self.inner.create_transaction(transaction)
    }

    fn append_mutation(&mut self, mutation: NewMutation) -> Result<Mutation, StoreError> {
        self.appends += 1;
        if self.fail_on_append == Some(self.appends) {
            return Err(StoreError::Constraint("injected ledger failure".to_string()));
        }
        self.inner.append_mutation(mutation)
    }

    fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.inner.commit()
    }
}
