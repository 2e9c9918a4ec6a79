use std::collections::HashSet;

use super::StoreError;
use crate::model::{Mutation, MutationId, TransactionId, WalletId};
use crate::page::Pagination;

/// Append-only log of balance changes. There is no way to update or remove an entry.
#[derive(Debug, Default)]
pub struct MutationLedger {
    entries: Vec<Mutation>,
    ids: HashSet<MutationId>,
}

impl MutationLedger {
    /// Check the arithmetic of a single entry, independent of ledger contents.
    pub fn validate(mutation: &Mutation) -> Result<(), StoreError> {
        if !mutation.amount.is_positive() {
            return Err(StoreError::constraint(format!(
                "mutation amount must be positive, got {}",
                mutation.amount
            )));
        }
        if mutation.kind.apply(mutation.balance_before, mutation.amount)
            != Some(mutation.balance_after)
        {
            return Err(StoreError::constraint(format!(
                "{} of {} from {} cannot end at {}",
                mutation.kind, mutation.amount, mutation.balance_before, mutation.balance_after
            )));
        }
        if mutation.balance_after.is_negative() {
            return Err(StoreError::constraint(format!(
                "wallet {} balance would become {}",
                mutation.wallet, mutation.balance_after
            )));
        }
        Ok(())
    }

    /// Full check for appending: arithmetic plus identity uniqueness.
    pub fn check(&self, mutation: &Mutation) -> Result<(), StoreError> {
        if self.ids.contains(&mutation.id) {
            return Err(StoreError::constraint(format!(
                "duplicate mutation id {}",
                mutation.id
            )));
        }
        Self::validate(mutation)
    }

    pub fn append(&mut self, mutation: Mutation) -> Result<(), StoreError> {
        self.check(&mutation)?;
        self.ids.insert(mutation.id);
        self.entries.push(mutation);
        Ok(())
    }

    pub fn for_wallet(&self, wallet: WalletId, pagination: Pagination) -> (Vec<Mutation>, u64) {
        let mut matching: Vec<Mutation> = self
            .entries
            .iter()
            .filter(|m| m.wallet == wallet)
            .cloned()
            .collect();
        matching.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        pagination.slice(matching)
    }

    pub fn for_transaction(&self, transaction: TransactionId) -> Vec<Mutation> {
        self.entries
            .iter()
            .filter(|m| m.transaction == transaction)
            .cloned()
            .collect()
    }
}
