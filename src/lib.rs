pub mod amount;
pub mod config;
pub mod csv;
pub mod engine;
pub mod model;
pub mod notify;
pub mod page;
pub mod replay;
pub mod store;

pub use amount::Amount;
pub use engine::{Engine, EngineError, ErrorKind};
pub use model::{Actor, Mutation, Role, Transaction, UserId, Wallet, WalletId};
pub use page::{Page, Pagination};
pub use store::{MemoryStore, Store};
