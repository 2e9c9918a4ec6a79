//! In-memory backing store.
//!
//! Committed state lives in one table set behind a read/write lock. Each wallet row has
//! its own async mutex acting as the `SELECT ... FOR UPDATE` row lock. A unit of work
//! stages its writes privately and publishes them in a single write-lock critical
//! section, so readers observe either all of a unit's writes or none of them.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, warn};

use super::{MutationLedger, Store, StoreError, TransactionLog, UnitOfWork, WalletTable};
use crate::Amount;
use crate::model::{
    Mutation, MutationId, NewMutation, NewTransaction, Transaction, TransactionId, UserId, Wallet,
    WalletId,
};
use crate::page::Pagination;

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
struct Tables {
    wallets: WalletTable,
    transactions: TransactionLog,
    mutations: MutationLedger,
}

#[derive(Debug)]
struct Shared {
    tables: RwLock<Tables>,
    lock_timeout: Duration,
    last_transaction: AtomicU64,
    last_mutation: AtomicU64,
}

impl Shared {
    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, StoreError> {
        self.tables.write().map_err(|_| StoreError::Poisoned)
    }
}

fn next_id(counter: &AtomicU64) -> u64 {
    counter.fetch_add(1, Ordering::Relaxed) + 1
}

/// Store keeping every table in process memory.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    /// A store whose row-lock waits fail with [`StoreError::LockTimeout`] after `timeout`.
    pub fn with_lock_timeout(timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                tables: RwLock::new(Tables::default()),
                lock_timeout: timeout,
                last_transaction: AtomicU64::new(0),
                last_mutation: AtomicU64::new(0),
            }),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_wallet(&self, user: UserId) -> Result<Wallet, StoreError> {
        let mut tables = self.shared.write()?;
        tables.wallets.insert(user, Utc::now())
    }

    async fn find_wallet_by_user(&self, user: UserId) -> Result<Option<Wallet>, StoreError> {
        let tables = self.shared.read()?;
        Ok(tables.wallets.find_by_user(user).cloned())
    }

    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        Ok(Box::new(MemoryUnit::new(Arc::clone(&self.shared))))
    }

    async fn transactions_for_wallet(
        &self,
        wallet: WalletId,
        pagination: Pagination,
    ) -> Result<(Vec<Transaction>, u64), StoreError> {
        let tables = self.shared.read()?;
        Ok(tables.transactions.for_wallet(wallet, pagination))
    }

    async fn mutations_for_wallet(
        &self,
        wallet: WalletId,
        pagination: Pagination,
    ) -> Result<(Vec<Mutation>, u64), StoreError> {
        let tables = self.shared.read()?;
        Ok(tables.mutations.for_wallet(wallet, pagination))
    }

    async fn mutations_for_transaction(
        &self,
        transaction: TransactionId,
    ) -> Result<Vec<Mutation>, StoreError> {
        let tables = self.shared.read()?;
        Ok(tables.mutations.for_transaction(transaction))
    }
}

/// A row lock held by a unit, with the row as read under it.
struct Locked {
    _guard: OwnedMutexGuard<()>,
    wallet: Wallet,
    /// Balance-after of the last mutation staged for this wallet.
    head: Amount,
}

struct MemoryUnit {
    shared: Arc<Shared>,
    locked: HashMap<WalletId, Locked>,
    balances: HashMap<WalletId, Amount>,
    transactions: Vec<Transaction>,
    mutations: Vec<Mutation>,
    committed: bool,
}

impl MemoryUnit {
    fn new(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            locked: HashMap::new(),
            balances: HashMap::new(),
            transactions: Vec::new(),
            mutations: Vec::new(),
            committed: false,
        }
    }

    fn knows_transaction(&self, id: TransactionId) -> Result<bool, StoreError> {
        if self.transactions.iter().any(|t| t.id == id) {
            return Ok(true);
        }
        Ok(self.shared.read()?.transactions.contains(id))
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnit {
    async fn lock_for_update(&mut self, wallet: WalletId) -> Result<Wallet, StoreError> {
        if let Some(locked) = self.locked.get(&wallet) {
            let mut current = locked.wallet.clone();
            if let Some(balance) = self.balances.get(&wallet) {
                current.balance = *balance;
            }
            return Ok(current);
        }

        let row_lock = {
            let tables = self.shared.read()?;
            tables.wallets.row_lock(wallet)
        }
        .ok_or(StoreError::WalletNotFound(wallet))?;

        let timeout = self.shared.lock_timeout;
        let guard = match tokio::time::timeout(timeout, row_lock.lock_owned()).await {
            Ok(guard) => guard,
            Err(_) => {
                warn!(
                    wallet = %wallet,
                    timeout_ms = timeout.as_millis() as u64,
                    "row lock wait timed out"
                );
                return Err(StoreError::LockTimeout(wallet));
            }
        };

        // Only a read taken under the lock is authoritative.
        let current = {
            let tables = self.shared.read()?;
            tables.wallets.get(wallet).cloned()
        }
        .ok_or(StoreError::WalletNotFound(wallet))?;

        self.locked.insert(
            wallet,
            Locked {
                _guard: guard,
                wallet: current.clone(),
                head: current.balance,
            },
        );
        Ok(current)
    }

    fn update_balance(&mut self, wallet: WalletId, balance: Amount) -> Result<(), StoreError> {
        if !self.locked.contains_key(&wallet) {
            return Err(StoreError::NotLocked(wallet));
        }
        if balance.is_negative() {
            return Err(StoreError::constraint(format!(
                "wallet {wallet} balance would become {balance}"
            )));
        }
        self.balances.insert(wallet, balance);
        Ok(())
    }

    fn create_transaction(
        &mut self,
        transaction: NewTransaction,
    ) -> Result<Transaction, StoreError> {
        {
            let tables = self.shared.read()?;
            for wallet in transaction.from_wallet.iter().chain([&transaction.to_wallet]) {
                if tables.wallets.get(*wallet).is_none() {
                    return Err(StoreError::WalletNotFound(*wallet));
                }
            }
        }

        let transaction = Transaction {
            id: TransactionId(next_id(&self.shared.last_transaction)),
            kind: transaction.kind,
            amount: transaction.amount,
            from_wallet: transaction.from_wallet,
            to_wallet: transaction.to_wallet,
            performed_by: transaction.performed_by,
            status: transaction.status,
            description: transaction.description,
            created_at: Utc::now(),
        };
        TransactionLog::validate(&transaction)?;

        self.transactions.push(transaction.clone());
        Ok(transaction)
    }

    fn append_mutation(&mut self, mutation: NewMutation) -> Result<Mutation, StoreError> {
        if !self.knows_transaction(mutation.transaction)? {
            return Err(StoreError::constraint(format!(
                "mutation references unknown transaction {}",
                mutation.transaction
            )));
        }

        let locked = self
            .locked
            .get_mut(&mutation.wallet)
            .ok_or(StoreError::NotLocked(mutation.wallet))?;

        if mutation.balance_before != locked.head {
            return Err(StoreError::constraint(format!(
                "mutation of wallet {} starts at {} but the wallet is at {}",
                mutation.wallet, mutation.balance_before, locked.head
            )));
        }

        let mutation = Mutation {
            id: MutationId(next_id(&self.shared.last_mutation)),
            wallet: mutation.wallet,
            transaction: mutation.transaction,
            kind: mutation.kind,
            amount: mutation.amount,
            balance_before: mutation.balance_before,
            balance_after: mutation.balance_after,
            created_at: Utc::now(),
        };
        MutationLedger::validate(&mutation)?;

        locked.head = mutation.balance_after;
        self.mutations.push(mutation.clone());
        Ok(mutation)
    }

    fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        let shared = Arc::clone(&self.shared);
        let now = Utc::now();
        {
            let mut tables = shared.write()?;

            // Check every staged write before applying any of them.
            for transaction in &self.transactions {
                tables.transactions.check(transaction)?;
            }
            for mutation in &self.mutations {
                tables.mutations.check(mutation)?;
            }
            for (&wallet, &balance) in &self.balances {
                tables.wallets.check_balance(wallet, balance)?;
            }

            for transaction in self.transactions.drain(..) {
                tables.transactions.create(transaction)?;
            }
            for mutation in self.mutations.drain(..) {
                tables.mutations.append(mutation)?;
            }
            for (wallet, balance) in self.balances.drain() {
                tables.wallets.set_balance(wallet, balance, now)?;
            }
        }

        self.committed = true;
        debug!(locks = self.locked.len(), "unit of work committed");
        Ok(())
    }
}

impl Drop for MemoryUnit {
    fn drop(&mut self) {
        if !self.committed && (!self.locked.is_empty() || !self.transactions.is_empty()) {
            debug!(
                locks = self.locked.len(),
                staged_transactions = self.transactions.len(),
                staged_mutations = self.mutations.len(),
                "unit of work rolled back"
            );
        }
    }
}
