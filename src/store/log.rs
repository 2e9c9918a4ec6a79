use std::collections::HashMap;

use super::StoreError;
use crate::model::{Transaction, TransactionId, WalletId};
use crate::page::Pagination;

/// Append-only log of logical operations.
#[derive(Debug, Default)]
pub struct TransactionLog {
    entries: Vec<Transaction>,
    index: HashMap<TransactionId, usize>,
}

impl TransactionLog {
    pub fn validate(transaction: &Transaction) -> Result<(), StoreError> {
        if !transaction.amount.is_positive() {
            return Err(StoreError::constraint(format!(
                "transaction amount must be positive, got {}",
                transaction.amount
            )));
        }
        if transaction.from_wallet == Some(transaction.to_wallet) {
            return Err(StoreError::constraint(format!(
                "transaction source and destination are both wallet {}",
                transaction.to_wallet
            )));
        }
        Ok(())
    }

    pub fn check(&self, transaction: &Transaction) -> Result<(), StoreError> {
        if self.index.contains_key(&transaction.id) {
            return Err(StoreError::constraint(format!(
                "duplicate transaction id {}",
                transaction.id
            )));
        }
        Self::validate(transaction)
    }

    pub fn create(&mut self, transaction: Transaction) -> Result<TransactionId, StoreError> {
        self.check(&transaction)?;
        let id = transaction.id;
        self.index.insert(id, self.entries.len());
        self.entries.push(transaction);
        Ok(id)
    }

    pub fn contains(&self, id: TransactionId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn for_wallet(
        &self,
        wallet: WalletId,
        pagination: Pagination,
    ) -> (Vec<Transaction>, u64) {
        let mut matching: Vec<Transaction> = self
            .entries
            .iter()
            .filter(|t| t.involves(wallet))
            .cloned()
            .collect();
        matching.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        pagination.slice(matching)
    }
}
