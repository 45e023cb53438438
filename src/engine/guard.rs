//! Balance guard: the only code that changes `balance` and `locked_balance`.
//!
//! Every function works on an owned copy of an account read from the store.
//! The caller stages the result in a [`WriteBatch`](crate::store::WriteBatch);
//! the version check at commit time makes each read-modify-write atomic.
//! On error the account is left untouched.

use crate::Amount;
use crate::engine::LedgerError;
use crate::model::Account;

/// Reserve `amount` of the account's available funds.
pub(crate) fn lock(account: &mut Account, amount: Amount) -> Result<(), LedgerError> {
    ensure_positive(amount)?;
    ensure_available(account, amount)?;

    let locked = add(account, account.locked_balance, amount)?;
    commit(account, account.balance, locked)
}

/// Release `amount` previously reserved by [`lock`].
pub(crate) fn unlock(account: &mut Account, amount: Amount) -> Result<(), LedgerError> {
    ensure_positive(amount)?;
    if amount > account.locked_balance {
        return Err(LedgerError::InvariantViolation(account.id));
    }

    let locked = sub(account, account.locked_balance, amount)?;
    commit(account, account.balance, locked)
}

/// Move `amount` from `debited` to `credited`. Locked funds are untouched,
/// so the debited account must have `amount` available.
pub(crate) fn settle(
    debited: &mut Account,
    credited: &mut Account,
    amount: Amount,
) -> Result<(), LedgerError> {
    ensure_positive(amount)?;
    ensure_available(debited, amount)?;

    let debited_balance = sub(debited, debited.balance, amount)?;
    let credited_balance = add(credited, credited.balance, amount)?;

    // Validate both sides before touching either.
    check(debited, debited_balance, debited.locked_balance)?;
    check(credited, credited_balance, credited.locked_balance)?;

    debited.balance = debited_balance;
    credited.balance = credited_balance;
    Ok(())
}

/// Undo a settlement: credit back `original_debited`, debit
/// `original_credited`. The original credited account must still have
/// `amount` available.
pub(crate) fn reverse_settle(
    original_debited: &mut Account,
    original_credited: &mut Account,
    amount: Amount,
) -> Result<(), LedgerError> {
    settle(original_credited, original_debited, amount)
}

fn ensure_positive(amount: Amount) -> Result<(), LedgerError> {
    if !amount.is_positive() {
        return Err(LedgerError::InvalidAmount(amount, "must be greater than zero"));
    }
    Ok(())
}

fn ensure_available(account: &Account, amount: Amount) -> Result<(), LedgerError> {
    let available = account.available();
    if available < amount {
        return Err(LedgerError::InsufficientFunds {
            account: account.id,
            available,
            requested: amount,
        });
    }
    Ok(())
}

fn add(account: &Account, lhs: Amount, rhs: Amount) -> Result<Amount, LedgerError> {
    lhs.checked_add(rhs)
        .ok_or(LedgerError::InvariantViolation(account.id))
}

fn sub(account: &Account, lhs: Amount, rhs: Amount) -> Result<Amount, LedgerError> {
    lhs.checked_sub(rhs)
        .ok_or(LedgerError::InvariantViolation(account.id))
}

/// `0 <= locked <= balance`
fn check(account: &Account, balance: Amount, locked: Amount) -> Result<(), LedgerError> {
    if locked.is_negative() || locked > balance {
        return Err(LedgerError::InvariantViolation(account.id));
    }
    Ok(())
}

fn commit(account: &mut Account, balance: Amount, locked: Amount) -> Result<(), LedgerError> {
    check(account, balance, locked)?;
    account.balance = balance;
    account.locked_balance = locked;
    Ok(())
}
