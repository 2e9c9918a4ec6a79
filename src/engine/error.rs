//! Error types for ledger operations.

use thiserror::Error;

use crate::Amount;
use crate::model::{UserId, WalletId};
use crate::store::StoreError;

/// Coarse classification the request layer translates into responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    Forbidden,
    NotFound,
    InsufficientFunds,
    Conflict,
    Internal,
}

/// Error returned by every [`Engine`](super::Engine) operation.
///
/// No variant ever accompanies a partially applied operation.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("insufficient funds in wallet {wallet}: available {available}, requested {requested}")]
    InsufficientFunds {
        wallet: WalletId,
        available: Amount,
        requested: Amount,
    },

    #[error("timed out waiting for lock on wallet {0}")]
    LockTimeout(WalletId),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            EngineError::Forbidden(_) => ErrorKind::Forbidden,
            EngineError::NotFound(_) => ErrorKind::NotFound,
            EngineError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            EngineError::LockTimeout(_) | EngineError::Conflict(_) => ErrorKind::Conflict,
            EngineError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        EngineError::InvalidArgument(msg.into())
    }

    pub(crate) fn wallet_of(user: UserId) -> Self {
        EngineError::NotFound(format!("wallet of user {user}"))
    }

    pub(crate) fn overflow() -> Self {
        EngineError::Internal("balance arithmetic overflow".to_string())
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::LockTimeout(wallet) => EngineError::LockTimeout(wallet),
            StoreError::WalletNotFound(wallet) => EngineError::NotFound(format!("wallet {wallet}")),
            StoreError::DuplicateWallet(user) => {
                EngineError::Conflict(format!("user {user} already has a wallet"))
            }
            other => EngineError::Internal(other.to_string()),
        }
    }
}
