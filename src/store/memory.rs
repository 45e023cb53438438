//! In-process store backed by hash maps behind a single `RwLock`.
//!
//! Reads take the shared lock; `commit` takes the exclusive lock, validates
//! every precondition of the batch and only then applies it, so a batch is
//! never partially visible.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{
    AccountStore, LedgerStore, StoreError, StoreResult, TransactionLog, TransactionWrite,
    WriteBatch,
};
use crate::model::{Account, AccountId, Transaction, TransactionStatus, TxId};

#[derive(Default)]
struct Tables {
    accounts: HashMap<AccountId, Account>,
    transactions: HashMap<TxId, Transaction>,
    /// original tx -> reversal tx
    reversals: HashMap<TxId, TxId>,
    /// Per-account history in insertion order.
    history: HashMap<AccountId, Vec<TxId>>,
}

impl Tables {
    fn check(&self, batch: &WriteBatch) -> StoreResult<()> {
        for write in &batch.accounts {
            let id = write.account.id;
            let current = self
                .accounts
                .get(&id)
                .ok_or_else(|| StoreError::Missing(id.to_string()))?;
            if current.version != write.expected_version {
                return Err(StoreError::VersionConflict(id));
            }
        }

        // Statuses as they will be after earlier writes of the same batch.
        let mut staged: HashMap<TxId, TransactionStatus> = HashMap::new();
        let mut staged_reversals: Vec<TxId> = Vec::new();
        for write in &batch.transactions {
            match write {
                TransactionWrite::Insert(tx) => {
                    if self.transactions.contains_key(&tx.id) || staged.contains_key(&tx.id) {
                        return Err(StoreError::DuplicateId(tx.id.to_string()));
                    }
                    if let Some(original) = tx.reversed_transaction_id {
                        if self.reversals.contains_key(&original)
                            || staged_reversals.contains(&original)
                        {
                            return Err(StoreError::DuplicateReversal(original));
                        }
                        staged_reversals.push(original);
                    }
                    staged.insert(tx.id, tx.status);
                }
                TransactionWrite::Transition { id, from, to } => {
                    if !from.can_transition_to(*to) {
                        return Err(StoreError::IllegalTransition {
                            id: *id,
                            from: *from,
                            to: *to,
                        });
                    }
                    let current = match staged.get(id) {
                        Some(status) => *status,
                        None => {
                            self.transactions
                                .get(id)
                                .ok_or_else(|| StoreError::Missing(id.to_string()))?
                                .status
                        }
                    };
                    if current != *from {
                        return Err(StoreError::StatusChanged {
                            id: *id,
                            expected: *from,
                            current,
                        });
                    }
                    staged.insert(*id, *to);
                }
            }
        }
        Ok(())
    }

    fn apply(&mut self, batch: WriteBatch) {
        for write in batch.accounts {
            let account = write.account.with_version(write.expected_version + 1);
            self.accounts.insert(account.id, account);
        }

        for write in batch.transactions {
            match write {
                TransactionWrite::Insert(tx) => {
                    if let Some(original) = tx.reversed_transaction_id {
                        self.reversals.insert(original, tx.id);
                    }
                    self.history
                        .entry(tx.debited_account_id)
                        .or_default()
                        .push(tx.id);
                    self.history
                        .entry(tx.credited_account_id)
                        .or_default()
                        .push(tx.id);
                    self.transactions.insert(tx.id, tx);
                }
                TransactionWrite::Transition { id, to, .. } => {
                    if let Some(tx) = self.transactions.get_mut(&id) {
                        tx.status = to;
                    }
                }
            }
        }
    }
}

/// [`LedgerStore`] kept entirely in memory.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn insert_account(&self, account: Account) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if tables.accounts.contains_key(&account.id) {
            return Err(StoreError::DuplicateId(account.id.to_string()));
        }
        tables.accounts.insert(account.id, account);
        Ok(())
    }

    async fn account(&self, id: AccountId) -> StoreResult<Option<Account>> {
        Ok(self.tables.read().await.accounts.get(&id).cloned())
    }

    async fn accounts(&self) -> StoreResult<Vec<Account>> {
        let tables = self.tables.read().await;
        let mut accounts: Vec<_> = tables.accounts.values().cloned().collect();
        accounts.sort_by_key(|a| (a.created_at, a.id));
        Ok(accounts)
    }
}

#[async_trait]
impl TransactionLog for MemoryStore {
    async fn transaction(&self, id: TxId) -> StoreResult<Option<Transaction>> {
        Ok(self.tables.read().await.transactions.get(&id).cloned())
    }

    async fn reversal_of(&self, original: TxId) -> StoreResult<Option<Transaction>> {
        let tables = self.tables.read().await;
        Ok(tables
            .reversals
            .get(&original)
            .and_then(|id| tables.transactions.get(id))
            .cloned())
    }

    async fn transactions_for(&self, account: AccountId) -> StoreResult<Vec<Transaction>> {
        let tables = self.tables.read().await;
        let Some(ids) = tables.history.get(&account) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| tables.transactions.get(id))
            .cloned()
            .collect())
    }

    async fn pending_before(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<Transaction>> {
        let tables = self.tables.read().await;
        let mut pending: Vec<_> = tables
            .transactions
            .values()
            .filter(|tx| tx.status == TransactionStatus::Pending && tx.created_at <= cutoff)
            .cloned()
            .collect();
        pending.sort_by_key(|tx| (tx.created_at, tx.id));
        Ok(pending)
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn commit(&self, batch: WriteBatch) -> StoreResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut tables = self.tables.write().await;
        tables.check(&batch)?;
        tables.apply(batch);
        Ok(())
    }
}
