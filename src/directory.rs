//! User directory: maps emails to users and their linked account.

use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::model::User;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("email {0} is already registered")]
    EmailTaken(String),

    #[error("directory unavailable: {0}")]
    Unavailable(String),
}

/// Trim and lowercase an email so lookups are case-insensitive.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Identity resolution used by the ledger.
///
/// Emails passed in are already normalized.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Register `user`; fails if the email is taken.
    async fn register(&self, user: User) -> Result<(), DirectoryError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, DirectoryError>;

    async fn remove(&self, email: &str) -> Result<Option<User>, DirectoryError>;

    /// All users, sorted by email.
    async fn users(&self) -> Result<Vec<User>, DirectoryError>;
}

#[derive(Default)]
pub struct MemoryDirectory {
    users: RwLock<BTreeMap<String, User>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserDirectory for MemoryDirectory {
    async fn register(&self, user: User) -> Result<(), DirectoryError> {
        let mut users = self.users.write().await;
        if users.contains_key(&user.email) {
            return Err(DirectoryError::EmailTaken(user.email));
        }
        users.insert(user.email.clone(), user);
        Ok(())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, DirectoryError> {
        Ok(self.users.read().await.get(email).cloned())
    }

    async fn remove(&self, email: &str) -> Result<Option<User>, DirectoryError> {
        Ok(self.users.write().await.remove(email))
    }

    async fn users(&self) -> Result<Vec<User>, DirectoryError> {
        Ok(self.users.read().await.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AccountId, UserId};
    use chrono::Utc;

    fn user(email: &str) -> User {
        User {
            id: UserId::new(),
            email: email.to_string(),
            name: "Test".to_string(),
            account_id: AccountId::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn normalize_lowercases_and_trims() {
        assert_eq!(normalize_email("  Alice@Example.COM "), "alice@example.com");
    }

    #[tokio::test]
    async fn register_and_find() {
        let directory = MemoryDirectory::new();
        let alice = user("alice@example.com");
        directory.register(alice.clone()).await.unwrap();

        let found = directory.find_by_email("alice@example.com").await.unwrap();
        assert_eq!(found, Some(alice));
        assert_eq!(directory.find_by_email("bob@example.com").await.unwrap(), None);
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let directory = MemoryDirectory::new();
        directory.register(user("alice@example.com")).await.unwrap();

        let result = directory.register(user("alice@example.com")).await;
        assert_eq!(
            result,
            Err(DirectoryError::EmailTaken("alice@example.com".to_string()))
        );
    }

    #[tokio::test]
    async fn users_sorted_by_email() {
        let directory = MemoryDirectory::new();
        directory.register(user("carol@example.com")).await.unwrap();
        directory.register(user("alice@example.com")).await.unwrap();

        let emails: Vec<_> = directory
            .users()
            .await
            .unwrap()
            .into_iter()
            .map(|u| u.email)
            .collect();
        assert_eq!(emails, vec!["alice@example.com", "carol@example.com"]);
    }

    #[tokio::test]
    async fn remove_returns_user() {
        let directory = MemoryDirectory::new();
        directory.register(user("alice@example.com")).await.unwrap();
        assert!(directory.remove("alice@example.com").await.unwrap().is_some());
        assert!(directory.users().await.unwrap().is_empty());
    }
}
