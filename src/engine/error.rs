//! Error types for ledger operations.

use thiserror::Error;

use crate::Amount;
use crate::model::{AccountId, TransactionStatus, TxId};

/// Error returned by every [`Ledger`](super::Ledger) operation.
///
/// Business errors describe an invalid request and are never retried.
/// `ConcurrentUpdateConflict` means "try again"; `StoreUnavailable` is fatal.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("insufficient available funds in account {account}: available {available}, requested {requested}")]
    InsufficientFunds {
        account: AccountId,
        available: Amount,
        requested: Amount,
    },

    #[error("account {0} cannot transfer to itself")]
    SelfTransferNotAllowed(AccountId),

    #[error("transaction {0} not found")]
    TransactionNotFound(TxId),

    #[error("transaction {tx} is already {status}")]
    TransactionAlreadyFinalized { tx: TxId, status: TransactionStatus },

    #[error("account {caller} does not own transaction {tx}")]
    NotTransactionOwner { tx: TxId, caller: AccountId },

    #[error("transaction {tx} cannot be reversed: {reason}")]
    TransactionNotReversible { tx: TxId, reason: &'static str },

    #[error("transaction {0} has already been reversed")]
    ReversalAlreadyExists(TxId),

    #[error("account {0} not found")]
    AccountNotFound(AccountId),

    #[error("invalid amount {0}: {1}")]
    InvalidAmount(Amount, &'static str),

    #[error("no user registered with email {0}")]
    UnknownRecipient(String),

    #[error("email {0} is already registered")]
    EmailAlreadyRegistered(String),

    #[error("invalid email '{0}'")]
    InvalidEmail(String),

    #[error("concurrent update conflict after {attempts} attempts, try again")]
    ConcurrentUpdateConflict { attempts: u32 },

    /// Would break `0 <= locked <= balance`; never the caller's fault.
    #[error("balance invariant violated on account {0}")]
    InvariantViolation(AccountId),

    #[error("ledger storage unavailable")]
    StoreUnavailable,
}

/// Stable, machine-readable classification of a [`LedgerError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InsufficientFunds,
    SelfTransferNotAllowed,
    TransactionNotFound,
    TransactionAlreadyFinalized,
    NotTransactionOwner,
    TransactionNotReversible,
    ReversalAlreadyExists,
    AccountNotFound,
    InvalidAmount,
    UnknownRecipient,
    EmailAlreadyRegistered,
    InvalidEmail,
    ConcurrentUpdateConflict,
    InvariantViolation,
    StoreUnavailable,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::InsufficientFunds => "INSUFFICIENT_FUNDS",
            ErrorKind::SelfTransferNotAllowed => "SELF_TRANSFER_NOT_ALLOWED",
            ErrorKind::TransactionNotFound => "TRANSACTION_NOT_FOUND",
            ErrorKind::TransactionAlreadyFinalized => "TRANSACTION_ALREADY_FINALIZED",
            ErrorKind::NotTransactionOwner => "NOT_TRANSACTION_OWNER",
            ErrorKind::TransactionNotReversible => "TRANSACTION_NOT_REVERSIBLE",
            ErrorKind::ReversalAlreadyExists => "REVERSAL_ALREADY_EXISTS",
            ErrorKind::AccountNotFound => "ACCOUNT_NOT_FOUND",
            ErrorKind::InvalidAmount => "INVALID_AMOUNT",
            ErrorKind::UnknownRecipient => "UNKNOWN_RECIPIENT",
            ErrorKind::EmailAlreadyRegistered => "EMAIL_ALREADY_REGISTERED",
            ErrorKind::InvalidEmail => "INVALID_EMAIL",
            ErrorKind::ConcurrentUpdateConflict => "CONCURRENT_UPDATE_CONFLICT",
            ErrorKind::InvariantViolation => "INVARIANT_VIOLATION",
            ErrorKind::StoreUnavailable => "STORE_UNAVAILABLE",
        }
    }

    /// Infrastructure kinds, as opposed to invalid requests.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            ErrorKind::ConcurrentUpdateConflict
                | ErrorKind::InvariantViolation
                | ErrorKind::StoreUnavailable
        )
    }
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            LedgerError::SelfTransferNotAllowed(_) => ErrorKind::SelfTransferNotAllowed,
            LedgerError::TransactionNotFound(_) => ErrorKind::TransactionNotFound,
            LedgerError::TransactionAlreadyFinalized { .. } => {
                ErrorKind::TransactionAlreadyFinalized
            }
            LedgerError::NotTransactionOwner { .. } => ErrorKind::NotTransactionOwner,
            LedgerError::TransactionNotReversible { .. } => ErrorKind::TransactionNotReversible,
            LedgerError::ReversalAlreadyExists(_) => ErrorKind::ReversalAlreadyExists,
            LedgerError::AccountNotFound(_) => ErrorKind::AccountNotFound,
            LedgerError::InvalidAmount(..) => ErrorKind::InvalidAmount,
            LedgerError::UnknownRecipient(_) => ErrorKind::UnknownRecipient,
            LedgerError::EmailAlreadyRegistered(_) => ErrorKind::EmailAlreadyRegistered,
            LedgerError::InvalidEmail(_) => ErrorKind::InvalidEmail,
            LedgerError::ConcurrentUpdateConflict { .. } => ErrorKind::ConcurrentUpdateConflict,
            LedgerError::InvariantViolation(_) => ErrorKind::InvariantViolation,
            LedgerError::StoreUnavailable => ErrorKind::StoreUnavailable,
        }
    }

    pub fn code(&self) -> &'static str {
        self.kind().code()
    }

    /// Only optimistic-write collisions are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::ConcurrentUpdateConflict { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes() {
        assert_eq!(
            LedgerError::SelfTransferNotAllowed(AccountId::new()).code(),
            "SELF_TRANSFER_NOT_ALLOWED"
        );
        assert_eq!(
            LedgerError::ReversalAlreadyExists(TxId::new()).code(),
            "REVERSAL_ALREADY_EXISTS"
        );
        assert_eq!(LedgerError::StoreUnavailable.code(), "STORE_UNAVAILABLE");
    }

    #[test]
    fn only_conflicts_are_retryable() {
        assert!(LedgerError::ConcurrentUpdateConflict { attempts: 3 }.is_retryable());
        assert!(!LedgerError::StoreUnavailable.is_retryable());
        assert!(!LedgerError::TransactionNotFound(TxId::new()).is_retryable());
    }

    #[test]
    fn business_and_infrastructure_kinds() {
        assert!(ErrorKind::ConcurrentUpdateConflict.is_infrastructure());
        assert!(ErrorKind::StoreUnavailable.is_infrastructure());
        assert!(!ErrorKind::InsufficientFunds.is_infrastructure());
        assert!(!ErrorKind::NotTransactionOwner.is_infrastructure());
    }

    #[test]
    fn store_unavailable_message_has_no_detail() {
        assert_eq!(
            LedgerError::StoreUnavailable.to_string(),
            "ledger storage unavailable"
        );
    }

    #[test]
    fn insufficient_funds_message() {
        let account = AccountId::new();
        let err = LedgerError::InsufficientFunds {
            account,
            available: Amount::from_units(5),
            requested: Amount::from_units(10),
        };
        assert_eq!(
            err.to_string(),
            format!(
                "insufficient available funds in account {account}: available 5.0000, requested 10.0000"
            )
        );
    }
}
