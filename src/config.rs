//! Ledger configuration.

use std::time::Duration;

use crate::Amount;
use crate::engine::RetryPolicy;

/// Tunables for a [`Ledger`](crate::Ledger).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Balance of the account opened for each registered user.
    pub starting_balance: Amount,
    /// Retries for optimistic-write conflicts.
    pub retry: RetryPolicy,
    /// Age after which a pending transfer may be expired; `None` keeps
    /// pending transfers until they are confirmed or canceled.
    pub pending_ttl: Option<Duration>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            starting_balance: Amount::from_units(1000),
            retry: RetryPolicy::default(),
            pending_ttl: Some(Duration::from_secs(24 * 60 * 60)),
        }
    }
}

impl LedgerConfig {
    pub fn with_starting_balance(mut self, amount: Amount) -> Self {
        self.starting_balance = amount;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_pending_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.pending_ttl = ttl;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = LedgerConfig::default();
        assert_eq!(config.starting_balance, Amount::from_units(1000));
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.pending_ttl, Some(Duration::from_secs(86_400)));
    }

    #[test]
    fn builders_override() {
        let config = LedgerConfig::default()
            .with_starting_balance(Amount::from_units(5))
            .with_retry(RetryPolicy::immediate(2))
            .with_pending_ttl(None);
        assert_eq!(config.starting_balance, Amount::from_units(5));
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.pending_ttl, None);
    }
}
