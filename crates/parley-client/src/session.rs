//! Session Store: the single source of truth for the bearer credential.
//!
//! Every outbound request consults [`SessionStore::credential`]. Changes are
//! persisted through a [`CredentialStore`] and announced on a broadcast
//! channel so the event loop can react to expiry.

use std::sync::{Arc, RwLock};

use tokio::sync::broadcast;
use tracing::{debug, error, info};

use parley_store::CredentialStore;

use crate::error::Result;

const SIGNAL_BUFFER: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionSignal {
    SignedIn,
    SignedOut,
    /// The server rejected the credential and it was dropped.
    Expired,
}

pub struct SessionStore {
    backend: Arc<dyn CredentialStore>,
    token: RwLock<Option<String>>,
    signals: broadcast::Sender<SessionSignal>,
}

impl SessionStore {
    /// Restore the persisted credential, if any.
    pub fn load(backend: Arc<dyn CredentialStore>) -> Result<Self> {
        let token = backend.load()?;
        debug!(restored = token.is_some(), "session store loaded");
        let (signals, _) = broadcast::channel(SIGNAL_BUFFER);
        Ok(Self {
            backend,
            token: RwLock::new(token),
            signals,
        })
    }

    /// Persist (`Some`) or clear (`None`) the credential.
    pub fn set_credential(&self, token: Option<String>) -> Result<()> {
        let signal = match &token {
            Some(t) => {
                self.backend.save(t)?;
                SessionSignal::SignedIn
            }
            None => {
                self.backend.clear()?;
                SessionSignal::SignedOut
            }
        };
        *self.token.write().unwrap_or_else(|e| e.into_inner()) = token;
        let _ = self.signals.send(signal);
        Ok(())
    }

    pub fn credential(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.token
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Drop the credential after the server rejected it.
    pub fn expire(&self) {
        let had_token = self
            .token
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .is_some();
        if let Err(e) = self.backend.clear() {
            error!(error = %e, "failed to clear persisted credential");
        }
        if had_token {
            info!("credential rejected by server; session expired");
        }
        let _ = self.signals.send(SessionSignal::Expired);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionSignal> {
        self.signals.subscribe()
    }
}
