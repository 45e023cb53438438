//! Ledger engine.
//!
//! [`Ledger`] is the single entry point: it validates requests, resolves
//! users to accounts and runs every transfer transition as one unit of work
//! against the [`LedgerStore`], retrying optimistic-write conflicts with
//! bounded backoff.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::Amount;
use crate::config::LedgerConfig;
use crate::directory::{DirectoryError, MemoryDirectory, UserDirectory, normalize_email};
use crate::model::{Account, AccountId, Balance, Transaction, TxId, User, UserId};
use crate::store::{LedgerStore, MemoryStore};

mod error;
pub use error::{ErrorKind, LedgerError};

mod guard;

mod retry;
pub use retry::RetryPolicy;

mod transfer;
use transfer::{StepError, store_failure};

/// The ledger facade.
///
/// Cheap to clone; clones share the same store and directory.
#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn LedgerStore>,
    directory: Arc<dyn UserDirectory>,
    config: Arc<LedgerConfig>,
}

/// Public API
impl Ledger {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        directory: Arc<dyn UserDirectory>,
        config: LedgerConfig,
    ) -> Self {
        Self {
            store,
            directory,
            config: Arc::new(config),
        }
    }

    /// A ledger backed by [`MemoryStore`] and [`MemoryDirectory`].
    pub fn in_memory(config: LedgerConfig) -> Self {
        Self::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryDirectory::new()),
            config,
        )
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Open an account holding `starting_balance`.
    pub async fn create_account(&self, starting_balance: Amount) -> Result<Account, LedgerError> {
        ensure_not_negative(starting_balance)?;

        let account = Account::open(starting_balance);
        self.store
            .insert_account(account.clone())
            .await
            .map_err(store_failure)?;

        info!(account = %account.id, balance = %starting_balance, "account created");
        Ok(account)
    }

    /// Register a user with an account opened at the configured starting balance.
    pub async fn register_user(&self, email: &str, name: &str) -> Result<User, LedgerError> {
        self.register_user_with_balance(email, name, self.config.starting_balance)
            .await
    }

    pub async fn register_user_with_balance(
        &self,
        email: &str,
        name: &str,
        starting_balance: Amount,
    ) -> Result<User, LedgerError> {
        let email = normalize_email(email);
        if !is_plausible_email(&email) {
            return Err(LedgerError::InvalidEmail(email));
        }
        ensure_not_negative(starting_balance)?;

        let account = Account::open(starting_balance);
        let user = User {
            id: UserId::new(),
            email: email.clone(),
            name: name.trim().to_string(),
            account_id: account.id,
            created_at: Utc::now(),
        };

        // Claim the email first; the directory rejects duplicates atomically.
        self.directory
            .register(user.clone())
            .await
            .map_err(directory_failure)?;

        if let Err(e) = self.store.insert_account(account).await {
            if let Err(undo) = self.directory.remove(&email).await {
                error!(email = %email, reason = %undo, "failed to release email after account creation failed");
            }
            return Err(store_failure(e));
        }

        info!(
            user = %user.id,
            email = %user.email,
            account = %user.account_id,
            balance = %starting_balance,
            "user registered"
        );
        Ok(user)
    }

    /// Resolve a user's email to their account.
    pub async fn resolve_account(&self, email: &str) -> Result<AccountId, LedgerError> {
        let email = normalize_email(email);
        let user = self
            .directory
            .find_by_email(&email)
            .await
            .map_err(directory_failure)?;
        let Some(user) = user else {
            return Err(LedgerError::UnknownRecipient(email));
        };

        // Registration claims the email before the account is committed.
        let account = self
            .store
            .account(user.account_id)
            .await
            .map_err(store_failure)?;
        match account {
            Some(account) => Ok(account.id),
            None => Err(LedgerError::UnknownRecipient(email)),
        }
    }

    /// All registered users, sorted by email.
    pub async fn users(&self) -> Result<Vec<User>, LedgerError> {
        self.directory.users().await.map_err(directory_failure)
    }

    /// Reserve `amount` on `sender` and record a pending transfer to `receiver`.
    pub async fn initiate_transfer(
        &self,
        sender: AccountId,
        receiver: AccountId,
        amount: Amount,
    ) -> Result<Transaction, LedgerError> {
        let result = match ensure_positive(amount) {
            Ok(()) => {
                self.with_retry("initiate", || {
                    transfer::initiate(self.store.as_ref(), sender, receiver, amount)
                })
                .await
            }
            Err(e) => Err(e),
        };
        Self::log_result("transfer", sender, &result);
        result
    }

    /// [`initiate_transfer`](Self::initiate_transfer) to the account of the
    /// user registered under `receiver_email`.
    pub async fn initiate_transfer_to(
        &self,
        sender: AccountId,
        receiver_email: &str,
        amount: Amount,
    ) -> Result<Transaction, LedgerError> {
        let receiver = self.resolve_account(receiver_email).await?;
        self.initiate_transfer(sender, receiver, amount).await
    }

    /// Settle a pending transfer. Only the debited account may confirm.
    pub async fn confirm_transfer(
        &self,
        tx: TxId,
        caller: AccountId,
    ) -> Result<Transaction, LedgerError> {
        let result = self
            .with_retry("confirm", || {
                transfer::confirm(self.store.as_ref(), tx, caller)
            })
            .await;
        Self::log_result("confirm", tx, &result);
        result
    }

    /// Release the funds of a pending transfer. Only the debited account may cancel.
    pub async fn cancel_transfer(
        &self,
        tx: TxId,
        caller: AccountId,
    ) -> Result<Transaction, LedgerError> {
        let result = self
            .with_retry("cancel", || {
                transfer::cancel(self.store.as_ref(), tx, Some(caller))
            })
            .await;
        Self::log_result("cancel", tx, &result);
        result
    }

    /// Undo a completed transfer with a new completed reversal.
    pub async fn reverse_transfer(&self, tx: TxId) -> Result<Transaction, LedgerError> {
        let result = self
            .with_retry("reverse", || transfer::reverse(self.store.as_ref(), tx))
            .await;
        Self::log_result("reverse", tx, &result);
        result
    }

    /// Cancel every pending transfer older than the configured TTL at `now`.
    ///
    /// Transfers finalized concurrently are skipped, and a transfer that fails
    /// to cancel is logged and left for the next sweep. Returns the expired ones.
    pub async fn expire_stale_transfers(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Transaction>, LedgerError> {
        let Some(cutoff) = self.expiry_cutoff(now) else {
            return Ok(Vec::new());
        };

        let stale = self
            .store
            .pending_before(cutoff)
            .await
            .map_err(store_failure)?;

        let mut expired = Vec::with_capacity(stale.len());
        for tx in stale {
            let result = self
                .with_retry("expire", || {
                    transfer::cancel(self.store.as_ref(), tx.id, None)
                })
                .await;
            match result {
                Ok(canceled) => {
                    warn!(
                        tx = %canceled.id,
                        account = %canceled.debited_account_id,
                        amount = %canceled.value,
                        created_at = %canceled.created_at,
                        "pending transfer expired"
                    );
                    expired.push(canceled);
                }
                Err(LedgerError::TransactionAlreadyFinalized { .. }) => {
                    debug!(tx = %tx.id, "transfer finalized before expiry");
                }
                Err(e) => {
                    warn!(
                        tx = %tx.id,
                        code = e.code(),
                        reason = %e,
                        "failed to expire pending transfer"
                    );
                }
            }
        }
        Ok(expired)
    }

    /// Run [`expire_stale_transfers`](Self::expire_stale_transfers) every `every`.
    pub fn spawn_expiry_sweeper(&self, every: Duration) -> JoinHandle<()> {
        let ledger = self.clone();
        let every = every.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = ledger.expire_stale_transfers(Utc::now()).await {
                    error!(code = e.code(), reason = %e, "expiry sweep failed");
                }
            }
        })
    }

    pub async fn get_balance(&self, account: AccountId) -> Result<Balance, LedgerError> {
        Ok(self.get_account(account).await?.snapshot())
    }

    pub async fn get_account(&self, account: AccountId) -> Result<Account, LedgerError> {
        self.store
            .account(account)
            .await
            .map_err(store_failure)?
            .ok_or(LedgerError::AccountNotFound(account))
    }

    /// Every account, oldest first.
    pub async fn accounts(&self) -> Result<Vec<Account>, LedgerError> {
        self.store.accounts().await.map_err(store_failure)
    }

    pub async fn get_transaction(&self, tx: TxId) -> Result<Transaction, LedgerError> {
        self.store
            .transaction(tx)
            .await
            .map_err(store_failure)?
            .ok_or(LedgerError::TransactionNotFound(tx))
    }

    /// Transactions debiting or crediting `account`, in the order they were recorded.
    pub async fn list_transactions(
        &self,
        account: AccountId,
    ) -> Result<Vec<Transaction>, LedgerError> {
        self.get_account(account).await?;
        self.store
            .transactions_for(account)
            .await
            .map_err(store_failure)
    }

    pub async fn list_user_transactions(
        &self,
        email: &str,
    ) -> Result<Vec<Transaction>, LedgerError> {
        let account = self.resolve_account(email).await?;
        self.list_transactions(account).await
    }
}

/// Private API
impl Ledger {
    /// Run `attempt` until it succeeds, fails for good, or the retry budget is spent.
    async fn with_retry<T, F, Fut>(&self, op: &'static str, mut attempt: F) -> Result<T, LedgerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StepError>>,
    {
        let policy = self.config.retry;
        let attempts = policy.attempts();

        for n in 1..=attempts {
            match attempt().await {
                Ok(value) => return Ok(value),
                Err(StepError::Fail(e)) => return Err(e),
                Err(StepError::Retry) if n < attempts => {
                    let delay = policy.delay_for_attempt(n);
                    debug!(op, attempt = n, delay_ms = delay.as_millis() as u64, "write conflict, retrying");
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(StepError::Retry) => {}
            }
        }

        warn!(op, attempts, "write conflicts persisted, giving up");
        Err(LedgerError::ConcurrentUpdateConflict { attempts })
    }

    fn expiry_cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let ttl = self.config.pending_ttl?;
        let cutoff = TimeDelta::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_sub_signed(ttl));
        if cutoff.is_none() {
            warn!(ttl_secs = ttl.as_secs(), "pending ttl out of range, nothing expires");
        }
        cutoff
    }

    /// Small helper to log transition results
    fn log_result(op: &str, subject: impl fmt::Display, result: &Result<Transaction, LedgerError>) {
        match result {
            Ok(tx) => {
                info!(
                    tx = %tx.id,
                    debited = %tx.debited_account_id,
                    credited = %tx.credited_account_id,
                    amount = %tx.value,
                    status = %tx.status,
                    "{op} applied"
                );
            }
            Err(e) if e.kind().is_infrastructure() => {
                warn!(subject = %subject, code = e.code(), reason = %e, "{op} failed");
            }
            Err(e) => {
                info!(subject = %subject, code = e.code(), reason = %e, "{op} skipped");
            }
        }
    }
}

fn ensure_positive(amount: Amount) -> Result<(), LedgerError> {
    if !amount.is_positive() {
        return Err(LedgerError::InvalidAmount(amount, "must be greater than zero"));
    }
    Ok(())
}

fn ensure_not_negative(amount: Amount) -> Result<(), LedgerError> {
    if amount.is_negative() {
        return Err(LedgerError::InvalidAmount(amount, "must not be negative"));
    }
    Ok(())
}

fn is_plausible_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && !domain.is_empty() && !domain.contains('@')
        }
        None => false,
    }
}

fn directory_failure(e: DirectoryError) -> LedgerError {
    match e {
        DirectoryError::EmailTaken(email) => LedgerError::EmailAlreadyRegistered(email),
        DirectoryError::Unavailable(reason) => {
            error!(reason = %reason, "user directory failure");
            LedgerError::StoreUnavailable
        }
    }
}
