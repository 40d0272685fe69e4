//! Persistence of the bearer token.
//!
//! The token lives under [`TOKEN_KEY`]. Its absence means the user is logged
//! out.

use std::sync::Mutex;

use parley_shared::constants::TOKEN_KEY;

use crate::database::Database;
use crate::error::{Result, StoreError};

/// Backend that keeps the credential across restarts.
pub trait CredentialStore: Send + Sync {
    fn load(&self) -> Result<Option<String>>;
    fn save(&self, token: &str) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// Credential store backed by the `settings` table.
pub struct SqliteCredentialStore {
    db: Mutex<Database>,
}

impl SqliteCredentialStore {
    pub fn new(db: Database) -> Self {
        Self { db: Mutex::new(db) }
    }

    fn with_db<T>(&self, f: impl FnOnce(&Database) -> Result<T>) -> Result<T> {
        let guard = self
            .db
            .lock()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))?;
        f(&guard)
    }
}

impl CredentialStore for SqliteCredentialStore {
    fn load(&self) -> Result<Option<String>> {
        self.with_db(|db| db.get_setting(TOKEN_KEY))
    }

    fn save(&self, token: &str) -> Result<()> {
        self.with_db(|db| db.put_setting(TOKEN_KEY, token))
    }

    fn clear(&self) -> Result<()> {
        self.with_db(|db| db.delete_setting(TOKEN_KEY).map(|_| ()))
    }
}

/// Non-persistent store for tests and throwaway sessions.
#[derive(Default)]
pub struct MemoryCredentialStore {
    token: Mutex<Option<String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with a token already "persisted".
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Mutex::new(Some(token.into())),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Result<Option<String>> {
        let guard = self
            .token
            .lock()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))?;
        Ok(guard.clone())
    }

    fn save(&self, token: &str) -> Result<()> {
        let mut guard = self
            .token
            .lock()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))?;
        *guard = Some(token.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let mut guard = self
            .token
            .lock()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))?;
        *guard = None;
        Ok(())
    }
}
