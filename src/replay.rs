//! Sequential replay of ledger operations.
//!
//! [`Replay`] stands in for the request layer: it keeps the role of every user it has
//! opened a wallet for and turns each [`Operation`] into an engine call on their behalf.

use std::collections::BTreeMap;
use tokio_stream::{Stream, StreamExt};
use tracing::info;

use crate::Amount;
use crate::engine::{Engine, EngineError};
use crate::model::{Actor, Role, UserId, Wallet};

/// One request against the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Open {
        user: UserId,
        role: Role,
    },
    TopUp {
        actor: UserId,
        to: UserId,
        amount: Amount,
        description: String,
    },
    Transfer {
        actor: UserId,
        to: UserId,
        amount: Amount,
        description: String,
    },
}

pub struct Replay {
    engine: Engine,
    roles: BTreeMap<UserId, Role>,
}

impl Replay {
    pub fn new(engine: Engine) -> Self {
        Self {
            engine,
            roles: BTreeMap::new(),
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Apply every operation of the stream, in order
    pub async fn run(&mut self, mut stream: impl Stream<Item = Operation> + Unpin) {
        while let Some(op) = stream.next().await {
            // a rejected operation must not stop the replay, the engine already logged it
            let _ = self.apply(op).await;
        }
    }

    pub async fn apply(&mut self, op: Operation) -> Result<(), EngineError> {
        match op {
            Operation::Open { user, role } => match self.engine.open_wallet(user).await {
                Ok(_) => {
                    self.roles.insert(user, role);
                    Ok(())
                }
                Err(e) => {
                    info!(user = %user, reason = %e, "open skipped");
                    Err(e)
                }
            },
            Operation::TopUp {
                actor,
                to,
                amount,
                description,
            } => {
                let actor = self.actor(actor);
                self.engine
                    .top_up(&actor, to, amount, &description)
                    .await
                    .map(drop)
            }
            Operation::Transfer {
                actor,
                to,
                amount,
                description,
            } => {
                let actor = self.actor(actor);
                self.engine
                    .transfer(&actor, to, amount, &description)
                    .await
                    .map(drop)
            }
        }
    }

    /// Users never opened are treated as ordinary users.
    fn actor(&self, user: UserId) -> Actor {
        let role = self.roles.get(&user).copied().unwrap_or_default();
        Actor::new(user, role)
    }

    /// Current wallet of every opened user, ordered by user id.
    pub async fn wallets(&self) -> Result<Vec<Wallet>, EngineError> {
        let mut wallets = Vec::with_capacity(self.roles.len());
        for user in self.roles.keys() {
            wallets.push(self.engine.wallet_for_user(*user).await?);
        }
        Ok(wallets)
    }
}
