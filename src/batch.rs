//! Batch driver.
//!
//! Replays a stream of [`Command`]s against a [`Ledger`]. Transactions are
//! referred to by labels local to the batch; the driver maps each label to
//! the id the ledger generated for it. A failing command is logged and
//! skipped, it never stops the batch.

use std::collections::HashMap;

use thiserror::Error;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, warn};

use crate::Amount;
use crate::engine::{Ledger, LedgerError};
use crate::model::{Balance, TxId, User};

/// One line of work for the batch driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Register {
        email: String,
        name: String,
        /// Falls back to the configured starting balance.
        starting_balance: Option<Amount>,
    },
    Transfer {
        sender: String,
        receiver: String,
        tx: String,
        amount: Amount,
    },
    Confirm {
        user: String,
        tx: String,
    },
    Cancel {
        user: String,
        tx: String,
    },
    Reverse {
        tx: String,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Register { .. } => "register",
            Command::Transfer { .. } => "transfer",
            Command::Confirm { .. } => "confirm",
            Command::Cancel { .. } => "cancel",
            Command::Reverse { .. } => "reverse",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BatchError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("unknown transaction label '{0}'")]
    UnknownLabel(String),

    #[error("transaction label '{0}' is already in use")]
    DuplicateLabel(String),
}

pub struct Batch {
    ledger: Ledger,
    labels: HashMap<String, TxId>,
}

impl Batch {
    pub fn new(ledger: Ledger) -> Self {
        Self {
            ledger,
            labels: HashMap::new(),
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Ledger id behind a batch label.
    pub fn resolve_label(&self, label: &str) -> Option<TxId> {
        self.labels.get(label).copied()
    }

    /// Run every command of the stream in order
    pub async fn run(&mut self, mut stream: impl Stream<Item = Command> + Unpin) {
        while let Some(command) = stream.next().await {
            let name = command.name();
            if let Err(e) = self.apply(command).await {
                warn!(command = name, "{e}");
            }
        }
    }

    pub async fn apply(&mut self, command: Command) -> Result<(), BatchError> {
        match command {
            Command::Register {
                email,
                name,
                starting_balance,
            } => {
                let balance = starting_balance.unwrap_or(self.ledger.config().starting_balance);
                self.ledger
                    .register_user_with_balance(&email, &name, balance)
                    .await?;
            }
            Command::Transfer {
                sender,
                receiver,
                tx,
                amount,
            } => {
                if self.labels.contains_key(&tx) {
                    return Err(BatchError::DuplicateLabel(tx));
                }
                let sender = self.ledger.resolve_account(&sender).await?;
                let created = self
                    .ledger
                    .initiate_transfer_to(sender, &receiver, amount)
                    .await?;
                debug!(label = %tx, tx = %created.id, "label bound");
                self.labels.insert(tx, created.id);
            }
            Command::Confirm { user, tx } => {
                let id = self.label(&tx)?;
                let caller = self.ledger.resolve_account(&user).await?;
                self.ledger.confirm_transfer(id, caller).await?;
            }
            Command::Cancel { user, tx } => {
                let id = self.label(&tx)?;
                let caller = self.ledger.resolve_account(&user).await?;
                self.ledger.cancel_transfer(id, caller).await?;
            }
            Command::Reverse { tx } => {
                let id = self.label(&tx)?;
                self.ledger.reverse_transfer(id).await?;
            }
        }
        Ok(())
    }

    /// Every registered user with their current balance, sorted by email.
    ///
    /// Users whose account is not committed yet are left out.
    pub async fn balances(&self) -> Result<Vec<(User, Balance)>, LedgerError> {
        let users = self.ledger.users().await?;
        let mut rows = Vec::with_capacity(users.len());
        for user in users {
            match self.ledger.get_balance(user.account_id).await {
                Ok(balance) => rows.push((user, balance)),
                // registration still in flight
                Err(LedgerError::AccountNotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(rows)
    }

    fn label(&self, label: &str) -> Result<TxId, BatchError> {
        self.resolve_label(label)
            .ok_or_else(|| BatchError::UnknownLabel(label.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedgerConfig;
    use crate::model::TransactionStatus;

    fn batch() -> Batch {
        Batch::new(Ledger::in_memory(LedgerConfig::default()))
    }

    fn register(email: &str) -> Command {
        Command::Register {
            email: email.into(),
            name: email.into(),
            starting_balance: None,
        }
    }

    fn transfer(sender: &str, receiver: &str, tx: &str, units: i64) -> Command {
        Command::Transfer {
            sender: sender.into(),
            receiver: receiver.into(),
            tx: tx.into(),
            amount: Amount::from_units(units),
        }
    }

    fn confirm(user: &str, tx: &str) -> Command {
        Command::Confirm {
            user: user.into(),
            tx: tx.into(),
        }
    }

    async fn available(batch: &Batch, email: &str) -> Amount {
        let account = batch.ledger().resolve_account(email).await.unwrap();
        batch.ledger().get_balance(account).await.unwrap().available()
    }

    #[tokio::test]
    async fn run_processes_all_commands() {
        let mut batch = batch();
        let commands = vec![
            register("a@x.io"),
            register("b@x.io"),
            transfer("a@x.io", "b@x.io", "t1", 100),
            confirm("a@x.io", "t1"),
        ];

        batch.run(tokio_stream::iter(commands)).await;

        assert_eq!(available(&batch, "a@x.io").await, Amount::from_units(900));
        assert_eq!(available(&batch, "b@x.io").await, Amount::from_units(1100));

        let id = batch.resolve_label("t1").unwrap();
        let tx = batch.ledger().get_transaction(id).await.unwrap();
        assert_eq!(tx.status, TransactionStatus::Complete);
    }

    #[tokio::test]
    async fn run_skips_failed_commands_and_continues() {
        let mut batch = batch();
        let commands = vec![
            register("a@x.io"),
            register("b@x.io"),
            transfer("a@x.io", "b@x.io", "t1", 5000), // insufficient funds
            confirm("a@x.io", "t1"),                  // unknown label
            transfer("a@x.io", "b@x.io", "t2", 10),
            confirm("b@x.io", "t2"), // not the owner
            Command::Cancel {
                user: "a@x.io".into(),
                tx: "t2".into(),
            },
        ];

        batch.run(tokio_stream::iter(commands)).await;

        assert_eq!(batch.resolve_label("t1"), None);
        assert_eq!(available(&batch, "a@x.io").await, Amount::from_units(1000));
        assert_eq!(available(&batch, "b@x.io").await, Amount::from_units(1000));
    }

    #[tokio::test]
    async fn register_with_explicit_balance() {
        let mut batch = batch();
        batch
            .apply(Command::Register {
                email: "rich@x.io".into(),
                name: "Rich".into(),
                starting_balance: Some(Amount::from_units(5)),
            })
            .await
            .unwrap();
        assert_eq!(available(&batch, "rich@x.io").await, Amount::from_units(5));
    }

    #[tokio::test]
    async fn duplicate_label_is_rejected() {
        let mut batch = batch();
        batch.apply(register("a@x.io")).await.unwrap();
        batch.apply(register("b@x.io")).await.unwrap();
        batch.apply(transfer("a@x.io", "b@x.io", "t1", 1)).await.unwrap();

        let err = batch
            .apply(transfer("a@x.io", "b@x.io", "t1", 1))
            .await
            .unwrap_err();
        assert_eq!(err, BatchError::DuplicateLabel("t1".into()));
    }

    #[tokio::test]
    async fn reverse_by_label() {
        let mut batch = batch();
        batch.apply(register("a@x.io")).await.unwrap();
        batch.apply(register("b@x.io")).await.unwrap();
        batch.apply(transfer("a@x.io", "b@x.io", "t1", 100)).await.unwrap();
        batch.apply(confirm("a@x.io", "t1")).await.unwrap();
        batch.apply(Command::Reverse { tx: "t1".into() }).await.unwrap();

        let err = batch
            .apply(Command::Reverse { tx: "t1".into() })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BatchError::Ledger(LedgerError::ReversalAlreadyExists(_))
        ));
        assert_eq!(available(&batch, "a@x.io").await, Amount::from_units(1000));
    }

    #[tokio::test]
    async fn balances_skip_users_without_committed_account() {
        use crate::directory::{MemoryDirectory, UserDirectory};
        use crate::model::{AccountId, UserId};
        use crate::store::MemoryStore;
        use chrono::Utc;
        use std::sync::Arc;

        let directory = Arc::new(MemoryDirectory::new());
        let ledger = Ledger::new(
            Arc::new(MemoryStore::new()),
            directory.clone(),
            LedgerConfig::default(),
        );
        let mut batch = Batch::new(ledger);
        batch.apply(register("amy@x.io")).await.unwrap();
        directory
            .register(User {
                id: UserId::new(),
                email: "zed@x.io".into(),
                name: "Zed".into(),
                account_id: AccountId::new(),
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let rows = batch.balances().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0.email, "amy@x.io");
    }

    #[tokio::test]
    async fn balances_sorted_by_email() {
        let mut batch = batch();
        batch.apply(register("zed@x.io")).await.unwrap();
        batch.apply(register("amy@x.io")).await.unwrap();

        let rows = batch.balances().await.unwrap();
        let emails: Vec<_> = rows.iter().map(|(u, _)| u.email.as_str()).collect();
        assert_eq!(emails, ["amy@x.io", "zed@x.io"]);
    }
}
