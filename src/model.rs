//! Core domain types for the ledger engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Amount;

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }
    };
}

numeric_id!(
    /// User identifier, asserted by the authentication layer.
    UserId
);
numeric_id!(
    /// Wallet identifier. Two-wallet locks are always taken in ascending order of this id.
    WalletId
);
numeric_id!(
    /// Transaction identifier, assigned by the store.
    TransactionId
);
numeric_id!(
    /// Mutation identifier, assigned by the store.
    MutationId
);

/// Role of an authenticated user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    SuperAdmin,
    Admin,
    #[default]
    User,
}

impl Role {
    /// Only a super admin may create money through a top-up.
    pub fn can_mint(&self) -> bool {
        matches!(self, Role::SuperAdmin)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::SuperAdmin => "super_admin",
            Role::Admin => "admin",
            Role::User => "user",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "super_admin" => Ok(Role::SuperAdmin),
            "admin" => Ok(Role::Admin),
            "user" => Ok(Role::User),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

/// The acting user of an engine call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user: UserId,
    pub role: Role,
}

impl Actor {
    pub fn new(user: UserId, role: Role) -> Self {
        Self { user, role }
    }

    pub fn user(user: UserId) -> Self {
        Self::new(user, Role::User)
    }
}

/// A balance holder owned by exactly one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Wallet {
    pub id: WalletId,
    pub user: UserId,
    pub balance: Amount,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    TopUp,
    Transfer,
    /// Declared for completeness; no engine operation produces it.
    Withdraw,
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransactionKind::TopUp => "top_up",
            TransactionKind::Transfer => "transfer",
            TransactionKind::Withdraw => "withdraw",
        })
    }
}

/// Status of a logical operation.
///
/// Settlement is synchronous, so every persisted row is `Completed`; `Pending` and
/// `Failed` exist for the record shape only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

/// A persisted logical operation (top-up or transfer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub kind: TransactionKind,
    pub amount: Amount,
    /// Absent for top-ups.
    pub from_wallet: Option<WalletId>,
    pub to_wallet: WalletId,
    pub performed_by: UserId,
    pub status: TransactionStatus,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// Whether the wallet is the source or the destination of this transaction.
    pub fn involves(&self, wallet: WalletId) -> bool {
        self.to_wallet == wallet || self.from_wallet == Some(wallet)
    }
}

/// A transaction before the store has assigned its identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    pub kind: TransactionKind,
    pub amount: Amount,
    pub from_wallet: Option<WalletId>,
    pub to_wallet: WalletId,
    pub performed_by: UserId,
    pub status: TransactionStatus,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    Debit,
    Credit,
}

impl MutationKind {
    /// Balance after applying `amount` in this direction, `None` on overflow.
    pub fn apply(self, balance: Amount, amount: Amount) -> Option<Amount> {
        match self {
            MutationKind::Credit => balance.checked_add(amount),
            MutationKind::Debit => balance.checked_sub(amount),
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MutationKind::Debit => "debit",
            MutationKind::Credit => "credit",
        })
    }
}

/// An immutable ledger entry: one wallet's balance change caused by one transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mutation {
    pub id: MutationId,
    pub wallet: WalletId,
    pub transaction: TransactionId,
    pub kind: MutationKind,
    pub amount: Amount,
    pub balance_before: Amount,
    pub balance_after: Amount,
    pub created_at: DateTime<Utc>,
}

/// A mutation before the store has assigned its identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMutation {
    pub wallet: WalletId,
    pub transaction: TransactionId,
    pub kind: MutationKind,
    pub amount: Amount,
    pub balance_before: Amount,
    pub balance_after: Amount,
}

impl NewMutation {
    /// Build a mutation of `amount` against `balance_before`, computing the balance after.
    pub fn new(
        wallet: WalletId,
        transaction: TransactionId,
        kind: MutationKind,
        amount: Amount,
        balance_before: Amount,
    ) -> Option<Self> {
        let balance_after = kind.apply(balance_before, amount)?;
        Some(Self {
            wallet,
            transaction,
            kind,
            amount,
            balance_before,
            balance_after,
        })
    }
}
