//! Persistence boundary of the ledger.
//!
//! The engine reads through [`AccountStore`] and [`TransactionLog`] and writes
//! exclusively through [`LedgerStore::commit`], which applies a [`WriteBatch`]
//! as one all-or-nothing unit of work. Every write in a batch carries the
//! precondition it was computed under:
//!
//! - account writes carry the `version` read before the change (optimistic
//!   read-modify-write);
//! - status changes carry the expected prior status (compare-and-set);
//! - inserted reversals must not collide with an existing reversal of the
//!   same original transaction.
//!
//! If any precondition fails nothing is applied and the matching
//! [`StoreError`] is returned.

pub mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::{Account, AccountId, Transaction, TransactionStatus, TxId};

/// Errors reported by a store implementation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// An account changed between read and commit.
    #[error("account {0} was modified concurrently")]
    VersionConflict(AccountId),

    /// A status compare-and-set found a different status.
    #[error("transaction {id} is {current}, expected {expected}")]
    StatusChanged {
        id: TxId,
        expected: TransactionStatus,
        current: TransactionStatus,
    },

    /// The requested status change is not a legal lifecycle step.
    #[error("transaction {id} cannot move from {from} to {to}")]
    IllegalTransition {
        id: TxId,
        from: TransactionStatus,
        to: TransactionStatus,
    },

    /// A reversal for this original transaction already exists.
    #[error("transaction {0} already has a reversal")]
    DuplicateReversal(TxId),

    #[error("record {0} already exists")]
    DuplicateId(String),

    #[error("record {0} not found")]
    Missing(String),

    /// Backend failure; the message is for logs only.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// An account row to write, guarded by the version it was derived from.
#[derive(Debug, Clone)]
pub struct AccountWrite {
    pub expected_version: u64,
    pub account: Account,
}

/// A transaction-log write.
#[derive(Debug, Clone)]
pub enum TransactionWrite {
    /// Append a new record.
    Insert(Transaction),
    /// Move `id` from `from` to `to`; fails if the status is no longer `from`
    /// or if `from -> to` is not a lifecycle step.
    Transition {
        id: TxId,
        from: TransactionStatus,
        to: TransactionStatus,
    },
}

/// One atomic unit of work.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    pub accounts: Vec<AccountWrite>,
    pub transactions: Vec<TransactionWrite>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage `account`, expecting the store still holds its current version.
    ///
    /// Staging the same account twice keeps the first expected version and
    /// the latest contents.
    pub fn put_account(&mut self, account: Account) -> &mut Self {
        if let Some(existing) = self
            .accounts
            .iter_mut()
            .find(|w| w.account.id == account.id)
        {
            existing.account = account;
        } else {
            self.accounts.push(AccountWrite {
                expected_version: account.version,
                account,
            });
        }
        self
    }

    pub fn insert_transaction(&mut self, tx: Transaction) -> &mut Self {
        self.transactions.push(TransactionWrite::Insert(tx));
        self
    }

    pub fn transition(
        &mut self,
        id: TxId,
        from: TransactionStatus,
        to: TransactionStatus,
    ) -> &mut Self {
        self.transactions
            .push(TransactionWrite::Transition { id, from, to });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty() && self.transactions.is_empty()
    }
}

/// Durable record of account balances.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Persist a freshly opened account.
    async fn insert_account(&self, account: Account) -> StoreResult<()>;

    async fn account(&self, id: AccountId) -> StoreResult<Option<Account>>;

    async fn accounts(&self) -> StoreResult<Vec<Account>>;
}

/// Append-mostly record of every transaction and its status.
#[async_trait]
pub trait TransactionLog: Send + Sync {
    async fn transaction(&self, id: TxId) -> StoreResult<Option<Transaction>>;

    /// The reversal referencing `original`, if any.
    async fn reversal_of(&self, original: TxId) -> StoreResult<Option<Transaction>>;

    /// Every transaction debiting or crediting `account`, in insertion order.
    async fn transactions_for(&self, account: AccountId) -> StoreResult<Vec<Transaction>>;

    /// Pending transactions created at or before `cutoff`.
    async fn pending_before(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<Transaction>>;
}

/// A store able to commit a [`WriteBatch`] atomically.
#[async_trait]
pub trait LedgerStore: AccountStore + TransactionLog {
    async fn commit(&self, batch: WriteBatch) -> StoreResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Amount;

    #[test]
    fn put_account_keeps_first_expected_version() {
        let mut account = Account::open(Amount::from_units(10));
        account.version = 3;

        let mut batch = WriteBatch::new();
        batch.put_account(account.clone());

        account.balance = Amount::from_units(7);
        account.version = 99;
        batch.put_account(account);

        assert_eq!(batch.accounts.len(), 1);
        assert_eq!(batch.accounts[0].expected_version, 3);
        assert_eq!(batch.accounts[0].account.balance(), Amount::from_units(7));
    }

    #[test]
    fn empty_batch() {
        assert!(WriteBatch::new().is_empty());
    }
}
