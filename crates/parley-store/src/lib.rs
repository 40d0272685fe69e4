//! # parley-store
//!
//! Local persistence for the Parley client, backed by SQLite.
//!
//! The only state that must survive a restart is the bearer token, kept in a
//! small key/value `settings` table under a single fixed key. The crate
//! exposes a synchronous [`Database`] handle plus the [`CredentialStore`]
//! abstraction the session layer depends on.

pub mod credentials;
pub mod database;
pub mod migrations;
pub mod settings;

mod error;

pub use credentials::{CredentialStore, MemoryCredentialStore, SqliteCredentialStore};
pub use database::Database;
pub use error::{Result, StoreError};
