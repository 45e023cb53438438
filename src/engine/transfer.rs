//! Transfer state machine.
//!
//! Each function performs one attempt of a transition: read the records it
//! needs, let the balance guard compute the new balances, and commit
//! everything as a single [`WriteBatch`]. A stale read surfaces as
//! [`StepError::Retry`]; the facade decides whether to try again.
//!
//! - initiate: lock sender funds + insert `PENDING` transfer
//! - confirm: unlock + settle + `PENDING -> COMPLETE`
//! - cancel: unlock + `PENDING -> CANCELED`
//! - reverse: counter-settle + insert `COMPLETE` reversal

use tracing::error;

use super::LedgerError;
use super::guard;
use crate::Amount;
use crate::model::{Account, AccountId, Transaction, TransactionStatus, TransactionType, TxId};
use crate::store::{AccountStore, LedgerStore, StoreError, TransactionLog, WriteBatch};

/// Outcome of a failed attempt.
#[derive(Debug)]
pub(crate) enum StepError {
    /// Optimistic write lost a race; the attempt may be repeated.
    Retry,
    Fail(LedgerError),
}

impl From<LedgerError> for StepError {
    fn from(e: LedgerError) -> Self {
        StepError::Fail(e)
    }
}

impl From<StoreError> for StepError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::VersionConflict(_) | StoreError::DuplicateId(_) => StepError::Retry,
            StoreError::StatusChanged { id, current, .. } => {
                StepError::Fail(LedgerError::TransactionAlreadyFinalized {
                    tx: id,
                    status: current,
                })
            }
            StoreError::DuplicateReversal(original) => {
                StepError::Fail(LedgerError::ReversalAlreadyExists(original))
            }
            other => StepError::Fail(store_failure(other)),
        }
    }
}

/// Hide store details from callers; keep them in the logs.
pub(crate) fn store_failure(e: StoreError) -> LedgerError {
    error!(reason = %e, "ledger store failure");
    LedgerError::StoreUnavailable
}

pub(crate) async fn initiate(
    store: &dyn LedgerStore,
    sender: AccountId,
    receiver: AccountId,
    amount: Amount,
) -> Result<Transaction, StepError> {
    if sender == receiver {
        return Err(LedgerError::SelfTransferNotAllowed(sender).into());
    }

    let mut debited = load_account(store, sender).await?;
    load_account(store, receiver).await?;

    guard::lock(&mut debited, amount)?;

    let tx = Transaction::pending_transfer(sender, receiver, amount);
    let mut batch = WriteBatch::new();
    batch.put_account(debited).insert_transaction(tx.clone());
    store.commit(batch).await?;

    Ok(tx)
}

pub(crate) async fn confirm(
    store: &dyn LedgerStore,
    id: TxId,
    caller: AccountId,
) -> Result<Transaction, StepError> {
    let tx = load_pending(store, id, Some(caller)).await?;
    let mut debited = load_account(store, tx.debited_account_id).await?;
    let mut credited = load_account(store, tx.credited_account_id).await?;

    // Release the reservation first so `locked <= balance` holds once settled.
    guard::unlock(&mut debited, tx.value)?;
    guard::settle(&mut debited, &mut credited, tx.value)?;

    let mut batch = WriteBatch::new();
    batch
        .put_account(debited)
        .put_account(credited)
        .transition(id, TransactionStatus::Pending, TransactionStatus::Complete);
    store.commit(batch).await?;

    Ok(Transaction {
        status: TransactionStatus::Complete,
        ..tx
    })
}

/// `caller` is `None` when the engine itself cancels (expiry).
pub(crate) async fn cancel(
    store: &dyn LedgerStore,
    id: TxId,
    caller: Option<AccountId>,
) -> Result<Transaction, StepError> {
    let tx = load_pending(store, id, caller).await?;
    let mut debited = load_account(store, tx.debited_account_id).await?;

    guard::unlock(&mut debited, tx.value)?;

    let mut batch = WriteBatch::new();
    batch
        .put_account(debited)
        .transition(id, TransactionStatus::Pending, TransactionStatus::Canceled);
    store.commit(batch).await?;

    Ok(Transaction {
        status: TransactionStatus::Canceled,
        ..tx
    })
}

pub(crate) async fn reverse(store: &dyn LedgerStore, id: TxId) -> Result<Transaction, StepError> {
    if store.reversal_of(id).await?.is_some() {
        return Err(LedgerError::ReversalAlreadyExists(id).into());
    }

    let original = store
        .transaction(id)
        .await?
        .ok_or(LedgerError::TransactionNotFound(id))?;

    if original.transaction_type == TransactionType::Reversal {
        return Err(LedgerError::TransactionNotReversible {
            tx: id,
            reason: "a reversal cannot be reversed",
        }
        .into());
    }
    if original.status != TransactionStatus::Complete {
        return Err(LedgerError::TransactionNotReversible {
            tx: id,
            reason: "only completed transfers can be reversed",
        }
        .into());
    }

    let mut debited = load_account(store, original.debited_account_id).await?;
    let mut credited = load_account(store, original.credited_account_id).await?;

    guard::reverse_settle(&mut debited, &mut credited, original.value)?;

    let reversal = Transaction::reversal_of(&original);
    let mut batch = WriteBatch::new();
    batch
        .put_account(debited)
        .put_account(credited)
        .insert_transaction(reversal.clone());
    store.commit(batch).await?;

    Ok(reversal)
}

async fn load_account(store: &dyn LedgerStore, id: AccountId) -> Result<Account, StepError> {
    store
        .account(id)
        .await?
        .ok_or_else(|| LedgerError::AccountNotFound(id).into())
}

/// Fetch `id` and check it can still be confirmed or canceled by `caller`.
async fn load_pending(
    store: &dyn LedgerStore,
    id: TxId,
    caller: Option<AccountId>,
) -> Result<Transaction, StepError> {
    let tx = store
        .transaction(id)
        .await?
        .ok_or(LedgerError::TransactionNotFound(id))?;

    if tx.status.is_terminal() {
        return Err(LedgerError::TransactionAlreadyFinalized {
            tx: id,
            status: tx.status,
        }
        .into());
    }

    if let Some(caller) = caller
        && caller != tx.debited_account_id
    {
        return Err(LedgerError::NotTransactionOwner { tx: id, caller }.into());
    }

    Ok(tx)
}
