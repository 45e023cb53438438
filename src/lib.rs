pub mod amount;
pub mod batch;
pub mod config;
pub mod csv;
pub mod directory;
pub mod engine;
pub mod model;
pub mod store;

pub use amount::Amount;
pub use batch::{Batch, Command};
pub use config::LedgerConfig;
pub use engine::{ErrorKind, Ledger, LedgerError, RetryPolicy};
pub use model::{Account, AccountId, Balance, Transaction, TransactionStatus, TransactionType, TxId, User};
