use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::StoreError;
use crate::Amount;
use crate::model::{UserId, Wallet, WalletId};

/// Committed wallet state plus the row lock guarding it.
#[derive(Debug)]
struct WalletRow {
    wallet: Wallet,
    lock: Arc<Mutex<()>>,
}

/// Wallet table: one row per user, each with its own pessimistic lock.
///
/// Balances are only written through [`WalletTable::set_balance`] at commit time,
/// by the unit of work that holds the row lock.
#[derive(Debug, Default)]
pub struct WalletTable {
    rows: HashMap<WalletId, WalletRow>,
    by_user: HashMap<UserId, WalletId>,
    last_id: u64,
}

impl WalletTable {
    pub fn insert(&mut self, user: UserId, now: DateTime<Utc>) -> Result<Wallet, StoreError> {
        if self.by_user.contains_key(&user) {
            return Err(StoreError::DuplicateWallet(user));
        }

        self.last_id += 1;
        let wallet = Wallet {
            id: WalletId(self.last_id),
            user,
            balance: Amount::ZERO,
            created_at: now,
            updated_at: now,
        };

        self.by_user.insert(user, wallet.id);
        self.rows.insert(
            wallet.id,
            WalletRow {
                wallet: wallet.clone(),
                lock: Arc::new(Mutex::new(())),
            },
        );
        Ok(wallet)
    }

    pub fn get(&self, id: WalletId) -> Option<&Wallet> {
        self.rows.get(&id).map(|row| &row.wallet)
    }

    pub fn find_by_user(&self, user: UserId) -> Option<&Wallet> {
        self.by_user.get(&user).and_then(|id| self.get(*id))
    }

    /// Handle on the row lock, to be awaited outside of any table guard.
    pub fn row_lock(&self, id: WalletId) -> Option<Arc<Mutex<()>>> {
        self.rows.get(&id).map(|row| Arc::clone(&row.lock))
    }

    /// Reject a balance the table would refuse to store.
    pub fn check_balance(&self, id: WalletId, balance: Amount) -> Result<(), StoreError> {
        if !self.rows.contains_key(&id) {
            return Err(StoreError::WalletNotFound(id));
        }
        if balance.is_negative() {
            return Err(StoreError::constraint(format!(
                "wallet {id} balance would become {balance}"
            )));
        }
        Ok(())
    }

    pub fn set_balance(
        &mut self,
        id: WalletId,
        balance: Amount,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.check_balance(id, balance)?;
        let row = self
            .rows
            .get_mut(&id)
            .ok_or(StoreError::WalletNotFound(id))?;
        row.wallet.balance = balance;
        row.wallet.updated_at = now;
        Ok(())
    }
}
