//! Persistence seam of the ledger.
//!
//! A [`Store`] holds three tables: wallets (with row-level pessimistic locks), the
//! append-only transaction log and the append-only mutation ledger. Every balance
//! change happens inside a [`UnitOfWork`]: locks taken there are held until the unit
//! commits or is dropped, and dropping an uncommitted unit discards its writes.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::Amount;
use crate::model::{
    Mutation, NewMutation, NewTransaction, Transaction, TransactionId, UserId, Wallet, WalletId,
};
use crate::page::Pagination;

mod ledger;
mod log;
mod memory;
mod wallets;

pub use ledger::MutationLedger;
pub use log::TransactionLog;
pub use memory::{DEFAULT_LOCK_TIMEOUT, MemoryStore};
pub use wallets::WalletTable;

/// Storage failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("wallet {0} not found")]
    WalletNotFound(WalletId),

    #[error("user {0} already owns a wallet")]
    DuplicateWallet(UserId),

    #[error("lock wait timeout on wallet {0}")]
    LockTimeout(WalletId),

    #[error("wallet {0} is not locked by this unit of work")]
    NotLocked(WalletId),

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("store state poisoned")]
    Poisoned,
}

impl StoreError {
    pub(crate) fn constraint(msg: impl Into<String>) -> Self {
        StoreError::Constraint(msg.into())
    }
}

/// Durable home of wallets, transactions and mutations.
#[async_trait]
pub trait Store: Send + Sync {
    /// Create the wallet of a user with a zero balance.
    async fn create_wallet(&self, user: UserId) -> Result<Wallet, StoreError>;

    /// Read-committed lookup, takes no lock.
    async fn find_wallet_by_user(&self, user: UserId) -> Result<Option<Wallet>, StoreError>;

    /// Open an atomic unit of work.
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError>;

    /// Committed transactions where the wallet is source or destination, newest first.
    async fn transactions_for_wallet(
        &self,
        wallet: WalletId,
        pagination: Pagination,
    ) -> Result<(Vec<Transaction>, u64), StoreError>;

    /// Committed mutations of the wallet, newest first.
    async fn mutations_for_wallet(
        &self,
        wallet: WalletId,
        pagination: Pagination,
    ) -> Result<(Vec<Mutation>, u64), StoreError>;

    async fn mutations_for_transaction(
        &self,
        transaction: TransactionId,
    ) -> Result<Vec<Mutation>, StoreError>;
}

/// One atomic, isolated scope of reads and writes.
#[async_trait]
pub trait UnitOfWork: Send {
    /// Acquire the exclusive row lock of a wallet and return its authoritative state.
    ///
    /// Blocks while another unit holds the lock, up to the store's lock timeout.
    async fn lock_for_update(&mut self, wallet: WalletId) -> Result<Wallet, StoreError>;

    /// Overwrite the balance of a wallet locked by this unit.
    fn update_balance(&mut self, wallet: WalletId, balance: Amount) -> Result<(), StoreError>;

    fn create_transaction(&mut self, transaction: NewTransaction)
    -> Result<Transaction, StoreError>;

    fn append_mutation(&mut self, mutation: NewMutation) -> Result<Mutation, StoreError>;

    /// Make every write of this unit visible at once and release its locks.
    fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

#[async_trait]
impl<S> Store for Arc<S>
where
    S: Store + ?Sized,
{
    async fn create_wallet(&self, user: UserId) -> Result<Wallet, StoreError> {
        (**self).create_wallet(user).await
    }

    async fn find_wallet_by_user(&self, user: UserId) -> Result<Option<Wallet>, StoreError> {
        (**self).find_wallet_by_user(user).await
    }

    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        (**self).begin().await
    }

    async fn transactions_for_wallet(
        &self,
        wallet: WalletId,
        pagination: Pagination,
    ) -> Result<(Vec<Transaction>, u64), StoreError> {
        (**self).transactions_for_wallet(wallet, pagination).await
    }

    async fn mutations_for_wallet(
        &self,
        wallet: WalletId,
        pagination: Pagination,
    ) -> Result<(Vec<Mutation>, u64), StoreError> {
        (**self).mutations_for_wallet(wallet, pagination).await
    }

    async fn mutations_for_transaction(
        &self,
        transaction: TransactionId,
    ) -> Result<Vec<Mutation>, StoreError> {
        (**self).mutations_for_transaction(transaction).await
    }
}
