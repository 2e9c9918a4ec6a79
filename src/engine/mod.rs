//! Ledger transaction engine.
//!
//! The engine moves money between wallets: top-ups mint funds into a wallet, transfers
//! move funds from the acting user's wallet to another user's. Each operation runs inside
//! one unit of work of the backing [`Store`] and either commits all of its writes or none.
//! Notifications are dispatched only after commit.

use std::sync::Arc;
use tracing::{error, info};

use crate::Amount;
use crate::model::{
    Actor, Mutation, MutationKind, NewMutation, NewTransaction, Transaction, TransactionId,
    TransactionKind, TransactionStatus, UserId, Wallet,
};
use crate::notify::{
    self, NoopSink, Notification, NotificationSink, TransactionEvent, WalletUpdateEvent,
};
use crate::page::{Page, Pagination};
use crate::store::Store;

mod error;
pub use error::{EngineError, ErrorKind};

/// The ledger transaction engine.
///
/// Cheap to share behind an `Arc`: all state lives in the store.
pub struct Engine {
    store: Arc<dyn Store>,
    notifier: Arc<dyn NotificationSink>,
}

/// Public API
impl Engine {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            notifier: Arc::new(NoopSink),
        }
    }

    /// Replace the sink receiving post-commit notifications.
    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Create the wallet of a user, with a zero balance.
    pub async fn open_wallet(&self, user: UserId) -> Result<Wallet, EngineError> {
        let wallet = self.store.create_wallet(user).await?;
        info!(user = %user, wallet = %wallet.id, "wallet opened");
        Ok(wallet)
    }

    /// Read-committed view of a user's wallet.
    pub async fn wallet_for_user(&self, user: UserId) -> Result<Wallet, EngineError> {
        self.store
            .find_wallet_by_user(user)
            .await?
            .ok_or_else(|| EngineError::wallet_of(user))
    }

    /// Mint `amount` into the wallet of `to`. Only a privileged actor may do this.
    pub async fn top_up(
        &self,
        actor: &Actor,
        to: UserId,
        amount: Amount,
        description: &str,
    ) -> Result<Transaction, EngineError> {
        let result = self.apply_top_up(actor, to, amount, description).await;
        Self::log_result("top-up", actor, to, amount, &result);
        result
    }

    /// Move `amount` from the actor's wallet to the wallet of `to`.
    pub async fn transfer(
        &self,
        actor: &Actor,
        to: UserId,
        amount: Amount,
        description: &str,
    ) -> Result<Transaction, EngineError> {
        let result = self.apply_transfer(actor, to, amount, description).await;
        Self::log_result("transfer", actor, to, amount, &result);
        result
    }

    /// Transactions where the user's wallet is source or destination, newest first.
    pub async fn list_transactions_for_user(
        &self,
        user: UserId,
        pagination: Pagination,
    ) -> Result<Page<Transaction>, EngineError> {
        let wallet = self.wallet_for_user(user).await?;
        let (items, total) = self
            .store
            .transactions_for_wallet(wallet.id, pagination)
            .await?;
        Ok(Page::new(items, total, pagination))
    }

    /// Mutations of the user's wallet, newest first.
    pub async fn list_mutations_for_user(
        &self,
        user: UserId,
        pagination: Pagination,
    ) -> Result<Page<Mutation>, EngineError> {
        let wallet = self.wallet_for_user(user).await?;
        let (items, total) = self
            .store
            .mutations_for_wallet(wallet.id, pagination)
            .await?;
        Ok(Page::new(items, total, pagination))
    }

    pub async fn mutations_for_transaction(
        &self,
        transaction: TransactionId,
    ) -> Result<Vec<Mutation>, EngineError> {
        Ok(self.store.mutations_for_transaction(transaction).await?)
    }
}

/// Private API
impl Engine {
    /// Small helper to log `top_up`/`transfer` results
    fn log_result(
        op: &str,
        actor: &Actor,
        to: UserId,
        amount: Amount,
        result: &Result<Transaction, EngineError>,
    ) {
        match result {
            Ok(tx) => {
                info!(
                    actor = %actor.user,
                    to = %to,
                    tx = %tx.id,
                    amount = %amount,
                    "{op} applied"
                );
            }
            Err(e) if e.kind() == ErrorKind::Internal => {
                error!(
                    actor = %actor.user,
                    to = %to,
                    amount = %amount,
                    reason = %e,
                    "{op} failed"
                );
            }
            Err(e) => {
                info!(
                    actor = %actor.user,
                    to = %to,
                    amount = %amount,
                    reason = %e,
                    "{op} skipped"
                );
            }
        }
    }

    fn ensure_positive(amount: Amount) -> Result<(), EngineError> {
        if !amount.is_positive() {
            return Err(EngineError::invalid(format!(
                "amount must be positive, got {amount}"
            )));
        }
        Ok(())
    }

    fn description(description: &str) -> Option<String> {
        let trimmed = description.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }

    /// Apply a top-up:
    /// - Validate amount, actor privilege and destination wallet before taking any lock
    /// - Lock the destination wallet and read its authoritative balance
    /// - Record the transaction and one credit mutation, then update the balance
    /// - Commit, then notify the destination user
    async fn apply_top_up(
        &self,
        actor: &Actor,
        to: UserId,
        amount: Amount,
        description: &str,
    ) -> Result<Transaction, EngineError> {
        Self::ensure_positive(amount)?;
        if !actor.role.can_mint() {
            return Err(EngineError::Forbidden(format!(
                "role {} cannot top up wallets",
                actor.role
            )));
        }
        let destination = self.wallet_for_user(to).await?;

        let mut unit = self.store.begin().await?;
        let wallet = unit.lock_for_update(destination.id).await?;

        let transaction = unit.create_transaction(NewTransaction {
            kind: TransactionKind::TopUp,
            amount,
            from_wallet: None,
            to_wallet: wallet.id,
            performed_by: actor.user,
            status: TransactionStatus::Completed,
            description: Self::description(description),
        })?;

        let credit = NewMutation::new(
            wallet.id,
            transaction.id,
            MutationKind::Credit,
            amount,
            wallet.balance,
        )
        .ok_or_else(EngineError::overflow)?;
        let credit = unit.append_mutation(credit)?;
        unit.update_balance(wallet.id, credit.balance_after)?;

        unit.commit()?;

        let event = TransactionEvent {
            transaction_id: transaction.id,
            kind: transaction.kind,
            amount,
            from_user: None,
            to_user: to,
            performed_by: actor.user,
            description: transaction.description.clone(),
            created_at: transaction.created_at,
        };
        notify::dispatch(
            Arc::clone(&self.notifier),
            vec![
                Notification::Transaction(to, event),
                Notification::WalletUpdate(to, wallet_update(&credit)),
            ],
        );

        Ok(transaction)
    }

    /// Apply a transfer:
    /// - Validate amount, reject self-transfers, resolve both wallets
    /// - Lock both wallets in ascending id order and re-read their balances
    /// - Ensure the source covers the amount
    /// - Record the transaction, the debit then the credit mutation, update both balances
    /// - Commit, then notify sender and recipient
    async fn apply_transfer(
        &self,
        actor: &Actor,
        to: UserId,
        amount: Amount,
        description: &str,
    ) -> Result<Transaction, EngineError> {
        Self::ensure_positive(amount)?;
        if actor.user == to {
            return Err(EngineError::invalid("cannot transfer to your own wallet"));
        }
        let source = self.wallet_for_user(actor.user).await?;
        let destination = self.wallet_for_user(to).await?;

        let mut unit = self.store.begin().await?;

        // Always lock the lower wallet id first so opposing transfers cannot deadlock.
        let (first, second) = if source.id < destination.id {
            (source.id, destination.id)
        } else {
            (destination.id, source.id)
        };
        let first = unit.lock_for_update(first).await?;
        let second = unit.lock_for_update(second).await?;
        let (source, destination) = if first.id == source.id {
            (first, second)
        } else {
            (second, first)
        };

        if source.balance < amount {
            return Err(EngineError::InsufficientFunds {
                wallet: source.id,
                available: source.balance,
                requested: amount,
            });
        }

        let transaction = unit.create_transaction(NewTransaction {
            kind: TransactionKind::Transfer,
            amount,
            from_wallet: Some(source.id),
            to_wallet: destination.id,
            performed_by: actor.user,
            status: TransactionStatus::Completed,
            description: Self::description(description),
        })?;

        let debit = NewMutation::new(
            source.id,
            transaction.id,
            MutationKind::Debit,
            amount,
            source.balance,
        )
        .ok_or_else(EngineError::overflow)?;
        let debit = unit.append_mutation(debit)?;

        let credit = NewMutation::new(
            destination.id,
            transaction.id,
            MutationKind::Credit,
            amount,
            destination.balance,
        )
        .ok_or_else(EngineError::overflow)?;
        let credit = unit.append_mutation(credit)?;

        unit.update_balance(source.id, debit.balance_after)?;
        unit.update_balance(destination.id, credit.balance_after)?;

        unit.commit()?;

        let event = TransactionEvent {
            transaction_id: transaction.id,
            kind: transaction.kind,
            amount,
            from_user: Some(actor.user),
            to_user: to,
            performed_by: actor.user,
            description: transaction.description.clone(),
            created_at: transaction.created_at,
        };
        notify::dispatch(
            Arc::clone(&self.notifier),
            vec![
                Notification::Transaction(actor.user, event.clone()),
                Notification::WalletUpdate(actor.user, wallet_update(&debit)),
                Notification::Transaction(to, event),
                Notification::WalletUpdate(to, wallet_update(&credit)),
            ],
        );

        Ok(transaction)
    }
}

fn wallet_update(mutation: &Mutation) -> WalletUpdateEvent {
    WalletUpdateEvent {
        wallet_id: mutation.wallet,
        new_balance: mutation.balance_after,
        mutation_kind: mutation.kind,
        mutation_id: mutation.id,
        transaction_id: mutation.transaction,
        amount: mutation.amount,
        updated_at: mutation.created_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Role, WalletId};
    use crate::store::MemoryStore;

    // test utils

    const ADMIN: UserId = UserId(1);
    const ALICE: UserId = UserId(2);
    const BOB: UserId = UserId(3);

    fn admin() -> Actor {
        Actor::new(ADMIN, Role::SuperAdmin)
    }

    fn amount(minor: i64) -> Amount {
        Amount::from_minor(minor)
    }

    async fn engine_with_wallets(users: &[UserId]) -> Engine {
        let engine = Engine::new(Arc::new(MemoryStore::new()));
        for user in users {
            engine.open_wallet(*user).await.unwrap();
        }
        engine
    }

    async fn balance(engine: &Engine, user: UserId) -> Amount {
        engine.wallet_for_user(user).await.unwrap().balance
    }

    // Wallets

    #[tokio::test]
    async fn open_wallet_starts_at_zero() {
        let engine = engine_with_wallets(&[ALICE]).await;
        assert_eq!(balance(&engine, ALICE).await, Amount::ZERO);
    }

    #[tokio::test]
    async fn second_wallet_for_user_conflicts() {
        let engine = engine_with_wallets(&[ALICE]).await;
        let err = engine.open_wallet(ALICE).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn missing_wallet_is_not_found() {
        let engine = engine_with_wallets(&[]).await;
        let err = engine.wallet_for_user(ALICE).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    // Top-up

    #[tokio::test]
    async fn top_up_credits_destination() {
        let engine = engine_with_wallets(&[ALICE]).await;
        let tx = engine
            .top_up(&admin(), ALICE, amount(10_000), "salary")
            .await
            .unwrap();

        assert_eq!(tx.kind, TransactionKind::TopUp);
        assert_eq!(tx.status, TransactionStatus::Completed);
        assert_eq!(tx.from_wallet, None);
        assert_eq!(tx.performed_by, ADMIN);
        assert_eq!(tx.description.as_deref(), Some("salary"));
        assert_eq!(balance(&engine, ALICE).await, amount(10_000));

        let mutations = engine.mutations_for_transaction(tx.id).await.unwrap();
        assert_eq!(mutations.len(), 1);
        assert_eq!(mutations[0].kind, MutationKind::Credit);
        assert_eq!(mutations[0].balance_before, Amount::ZERO);
        assert_eq!(mutations[0].balance_after, amount(10_000));
    }

    #[tokio::test]
    async fn top_up_accumulates() {
        let engine = engine_with_wallets(&[ALICE]).await;
        engine.top_up(&admin(), ALICE, amount(100), "").await.unwrap();
        engine.top_up(&admin(), ALICE, amount(50), "").await.unwrap();
        assert_eq!(balance(&engine, ALICE).await, amount(150));
    }

    #[tokio::test]
    async fn top_up_by_non_privileged_actor_is_forbidden() {
        let engine = engine_with_wallets(&[ALICE, BOB]).await;
        for role in [Role::Admin, Role::User] {
            let err = engine
                .top_up(&Actor::new(BOB, role), ALICE, amount(100), "")
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Forbidden);
        }
        assert_eq!(balance(&engine, ALICE).await, Amount::ZERO);
    }

    #[tokio::test]
    async fn top_up_checks_amount_before_role() {
        let engine = engine_with_wallets(&[ALICE]).await;
        let err = engine
            .top_up(&Actor::user(BOB), ALICE, Amount::ZERO, "")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn top_up_to_missing_wallet_fails() {
        let engine = engine_with_wallets(&[]).await;
        let err = engine
            .top_up(&admin(), ALICE, amount(100), "")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    // Transfer

    #[tokio::test]
    async fn transfer_moves_funds() {
        let engine = engine_with_wallets(&[ALICE, BOB]).await;
        engine
            .top_up(&admin(), ALICE, amount(10_000_000), "")
            .await
            .unwrap();

        let tx = engine
            .transfer(&Actor::user(ALICE), BOB, amount(4_000_000), "rent")
            .await
            .unwrap();

        assert_eq!(balance(&engine, ALICE).await, amount(6_000_000));
        assert_eq!(balance(&engine, BOB).await, amount(4_000_000));

        let mutations = engine.mutations_for_transaction(tx.id).await.unwrap();
        assert_eq!(mutations.len(), 2);
        let debit = mutations
            .iter()
            .find(|m| m.kind == MutationKind::Debit)
            .unwrap();
        let credit = mutations
            .iter()
            .find(|m| m.kind == MutationKind::Credit)
            .unwrap();
        assert_eq!(
            (debit.balance_before, debit.balance_after),
            (amount(10_000_000), amount(6_000_000))
        );
        assert_eq!(
            (credit.balance_before, credit.balance_after),
            (Amount::ZERO, amount(4_000_000))
        );
    }

    #[tokio::test]
    async fn transfer_exact_balance_succeeds() {
        let engine = engine_with_wallets(&[ALICE, BOB]).await;
        engine.top_up(&admin(), ALICE, amount(100), "").await.unwrap();
        engine
            .transfer(&Actor::user(ALICE), BOB, amount(100), "")
            .await
            .unwrap();
        assert_eq!(balance(&engine, ALICE).await, Amount::ZERO);
    }

    #[tokio::test]
    async fn transfer_insufficient_funds_fails() {
        let engine = engine_with_wallets(&[ALICE, BOB]).await;
        engine.top_up(&admin(), ALICE, amount(100), "").await.unwrap();

        let result = engine
            .transfer(&Actor::user(ALICE), BOB, amount(101), "")
            .await;
        assert!(matches!(
            result,
            Err(EngineError::InsufficientFunds { wallet: WalletId(1), .. })
        ));

        // Balances unchanged
        assert_eq!(balance(&engine, ALICE).await, amount(100));
        assert_eq!(balance(&engine, BOB).await, Amount::ZERO);
    }

    #[tokio::test]
    async fn transfer_to_self_is_rejected() {
        let engine = engine_with_wallets(&[ALICE]).await;
        engine.top_up(&admin(), ALICE, amount(100), "").await.unwrap();
        let err = engine
            .transfer(&Actor::user(ALICE), ALICE, amount(1), "")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let page = engine
            .list_transactions_for_user(ALICE, Pagination::default())
            .await
            .unwrap();
        assert_eq!(page.total, 1);
    }

    #[tokio::test]
    async fn transfer_rejects_non_positive_amounts() {
        let engine = engine_with_wallets(&[ALICE, BOB]).await;
        for minor in [0, -100] {
            let err = engine
                .transfer(&Actor::user(ALICE), BOB, amount(minor), "")
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        }
    }

    #[tokio::test]
    async fn transfer_needs_both_wallets() {
        let engine = engine_with_wallets(&[ALICE]).await;
        let err = engine
            .transfer(&Actor::user(ALICE), BOB, amount(1), "")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = engine
            .transfer(&Actor::user(BOB), ALICE, amount(1), "")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn transfer_towards_lower_wallet_id() {
        // BOB's wallet id is higher than ALICE's: locks are taken destination first.
        let engine = engine_with_wallets(&[ALICE, BOB]).await;
        engine.top_up(&admin(), BOB, amount(500), "").await.unwrap();
        engine
            .transfer(&Actor::user(BOB), ALICE, amount(200), "")
            .await
            .unwrap();
        assert_eq!(balance(&engine, ALICE).await, amount(200));
        assert_eq!(balance(&engine, BOB).await, amount(300));
    }

    #[tokio::test]
    async fn blank_description_is_absent() {
        let engine = engine_with_wallets(&[ALICE]).await;
        let tx = engine
            .top_up(&admin(), ALICE, amount(100), "   ")
            .await
            .unwrap();
        assert_eq!(tx.description, None);
    }

    // Read surface

    #[tokio::test]
    async fn listings_are_scoped_to_the_user_and_newest_first() {
        let engine = engine_with_wallets(&[ALICE, BOB]).await;
        let first = engine.top_up(&admin(), ALICE, amount(300), "").await.unwrap();
        let second = engine
            .transfer(&Actor::user(ALICE), BOB, amount(100), "")
            .await
            .unwrap();
        engine.top_up(&admin(), BOB, amount(50), "").await.unwrap();

        let page = engine
            .list_transactions_for_user(ALICE, Pagination::default())
            .await
            .unwrap();
        assert_eq!(page.total, 2);
        let ids: Vec<_> = page.items.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);

        let page = engine
            .list_mutations_for_user(BOB, Pagination::default())
            .await
            .unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.items[0].balance_after, amount(150));
        assert_eq!(page.items[1].balance_after, amount(100));
    }

    #[tokio::test]
    async fn listing_without_wallet_is_not_found() {
        let engine = engine_with_wallets(&[]).await;
        let err = engine
            .list_mutations_for_user(ALICE, Pagination::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
