//! Core domain types for the ledger.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::Amount;

/// Account identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct AccountId(Uuid);

/// Transaction identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TxId(Uuid);

/// User identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct UserId(Uuid);

macro_rules! uuid_id {
    ($name:ident) => {
        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }
    };
}

uuid_id!(AccountId);
uuid_id!(TxId);
uuid_id!(UserId);

/// An account with its total and reserved funds.
///
/// `locked_balance` never exceeds `balance` and neither goes negative.
/// Only the balance guard changes the two amounts; `version` is bumped by
/// the store on every committed write and drives optimistic concurrency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Account {
    pub id: AccountId,
    pub(crate) balance: Amount,
    pub(crate) locked_balance: Amount,
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    pub(crate) version: u64,
}

impl Account {
    pub(crate) fn open(starting_balance: Amount) -> Self {
        Self {
            id: AccountId::new(),
            balance: starting_balance,
            locked_balance: Amount::ZERO,
            created_at: Utc::now(),
            version: 0,
        }
    }

    /// Rebuild an account read back from a store.
    ///
    /// The caller vouches for `0 <= locked_balance <= balance`; the ledger
    /// only ever persists accounts that satisfy it.
    pub fn from_parts(
        id: AccountId,
        balance: Amount,
        locked_balance: Amount,
        created_at: DateTime<Utc>,
        version: u64,
    ) -> Self {
        Self {
            id,
            balance,
            locked_balance,
            created_at,
            version,
        }
    }

    /// The same account stamped with the version a store committed it under.
    pub fn with_version(self, version: u64) -> Self {
        Self { version, ..self }
    }

    pub fn balance(&self) -> Amount {
        self.balance
    }

    pub fn locked_balance(&self) -> Amount {
        self.locked_balance
    }

    /// Funds that can be reserved right now.
    pub fn available(&self) -> Amount {
        self.balance - self.locked_balance
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn snapshot(&self) -> Balance {
        Balance {
            balance: self.balance,
            locked_balance: self.locked_balance,
        }
    }
}

/// Point-in-time view of an account's funds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Balance {
    pub balance: Amount,
    pub locked_balance: Amount,
}

impl Balance {
    pub fn available(&self) -> Amount {
        self.balance - self.locked_balance
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Transfer,
    Reversal,
}

/// Lifecycle of a transaction.
///
/// ```text
/// PENDING ──confirm──▶ COMPLETE
///    │
///    └──cancel/expire──▶ CANCELED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Complete,
    Canceled,
}

impl TransactionStatus {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        matches!(
            (self, next),
            (
                TransactionStatus::Pending,
                TransactionStatus::Complete | TransactionStatus::Canceled
            )
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Complete => "COMPLETE",
            TransactionStatus::Canceled => "CANCELED",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A record in the transaction log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transaction {
    pub id: TxId,
    pub debited_account_id: AccountId,
    pub credited_account_id: AccountId,
    pub value: Amount,
    pub transaction_type: TransactionType,
    pub status: TransactionStatus,
    /// Set only on reversals: the completed transfer this one undoes.
    pub reversed_transaction_id: Option<TxId>,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// A new transfer awaiting confirmation or cancellation.
    pub(crate) fn pending_transfer(debited: AccountId, credited: AccountId, value: Amount) -> Self {
        Self {
            id: TxId::new(),
            debited_account_id: debited,
            credited_account_id: credited,
            value,
            transaction_type: TransactionType::Transfer,
            status: TransactionStatus::Pending,
            reversed_transaction_id: None,
            created_at: Utc::now(),
        }
    }

    /// The completed counter-transaction of `original`.
    pub(crate) fn reversal_of(original: &Transaction) -> Self {
        Self {
            id: TxId::new(),
            debited_account_id: original.credited_account_id,
            credited_account_id: original.debited_account_id,
            value: original.value,
            transaction_type: TransactionType::Reversal,
            status: TransactionStatus::Complete,
            reversed_transaction_id: Some(original.id),
            created_at: Utc::now(),
        }
    }
}

/// A registered user and the single account linked to them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub name: String,
    pub account_id: AccountId,
    pub created_at: DateTime<Utc>,
}
