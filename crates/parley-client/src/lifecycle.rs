//! Session Lifecycle Controller.
//!
//! Drives login, registration and logout, and wires the conversation manager
//! and push channel together once a user is authenticated.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use parley_net::PushHandle;
use parley_shared::types::{LoginRequest, Registration, User, UserId};
use parley_shared::validation::{validate_login, validate_registration};
use parley_shared::ValidationError;

use crate::api::ChatApi;
use crate::chats::ConversationManager;
use crate::error::{ClientError, Result};
use crate::presenter::{Presenter, UiEvent};
use crate::session::SessionStore;

/// Opening and closing the push channel.
pub trait PushControl: Send + Sync {
    fn connect(&self, user_id: UserId);
    fn disconnect(&self);
}

impl PushControl for PushHandle {
    fn connect(&self, user_id: UserId) {
        PushHandle::connect(self, user_id);
    }

    fn disconnect(&self) {
        PushHandle::disconnect(self);
    }
}

pub struct SessionLifecycle {
    session: Arc<SessionStore>,
    api: Arc<dyn ChatApi>,
    push: Arc<dyn PushControl>,
    presenter: Presenter,
    current_user: Option<User>,
}

impl SessionLifecycle {
    pub fn new(
        session: Arc<SessionStore>,
        api: Arc<dyn ChatApi>,
        push: Arc<dyn PushControl>,
        presenter: Presenter,
    ) -> Self {
        Self {
            session,
            api,
            push,
            presenter,
            current_user: None,
        }
    }

    pub fn current_user(&self) -> Option<&User> {
        self.current_user.as_ref()
    }

    /// Resume a persisted session. Returns whether the user is signed in.
    pub async fn restore(&mut self, manager: &mut ConversationManager) -> bool {
        if !self.session.is_authenticated() {
            self.presenter.emit(UiEvent::ShowLogin);
            return false;
        }

        match self.api.current_user().await {
            Ok(user) => {
                info!(user = %user.username, "session restored");
                self.activate(user, manager);
                true
            }
            Err(e) => {
                warn!(error = %e, "auth check failed");
                self.sign_out(manager);
                false
            }
        }
    }

    pub async fn login(
        &mut self,
        manager: &mut ConversationManager,
        username: &str,
        password: &str,
    ) -> Result<User> {
        let credentials = match validate_login(username, password) {
            Ok(c) => c,
            Err(e) => return Err(self.reject(e)),
        };

        self.presenter.loading(true);
        let result = self.exchange_and_load(&credentials).await;
        self.presenter.loading(false);

        match result {
            Ok(user) => {
                info!(user = %user.username, "logged in");
                self.activate(user.clone(), manager);
                self.presenter.success("Login successful!");
                Ok(user)
            }
            Err(e) => {
                self.presenter.error(e.to_string());
                Err(e)
            }
        }
    }

    async fn exchange_and_load(
        &self,
        credentials: &LoginRequest,
    ) -> Result<User> {
        let token = self.api.login(credentials).await?;
        self.session.set_credential(Some(token.access_token))?;
        match self.api.current_user().await {
            Ok(user) => Ok(user),
            Err(e) => {
                error!(error = %e, "failed to load profile after login");
                if let Err(clear) = self.session.set_credential(None) {
                    error!(error = %clear, "failed to clear credential");
                }
                Err(e)
            }
        }
    }

    /// Create an account. The user stays signed out and is sent back to the
    /// login form.
    pub async fn register(&mut self, form: &Registration) -> Result<User> {
        let form = match validate_registration(form) {
            Ok(f) => f,
            Err(e) => return Err(self.reject(e)),
        };

        self.presenter.loading(true);
        let result = self.api.register(&form).await;
        self.presenter.loading(false);

        match result {
            Ok(user) => {
                info!(user = %user.username, "registered");
                self.presenter.success("Registration successful! Please login.");
                self.presenter.emit(UiEvent::ShowLogin);
                Ok(user)
            }
            Err(e) => {
                self.presenter.error(e.to_string());
                Err(e)
            }
        }
    }

    pub fn logout(&mut self, manager: &mut ConversationManager) {
        self.sign_out(manager);
        self.presenter.success("Logged out successfully");
    }

    /// The server rejected the credential. Returns to the login screen
    /// without the logout toast.
    pub fn handle_session_expired(&mut self, manager: &mut ConversationManager) {
        if self.current_user.is_none() {
            debug!("session expiry ignored: not signed in");
            return;
        }
        self.sign_out(manager);
        self.presenter.warning("Session expired, please log in again");
    }

    pub async fn update_profile(
        &mut self,
        manager: &mut ConversationManager,
        full_name: &str,
    ) -> Result<User> {
        let full_name = full_name.trim();
        if full_name.is_empty() {
            return Err(self.reject(ValidationError::MissingFields));
        }

        match self.api.update_profile(full_name).await {
            Ok(user) => {
                self.current_user = Some(user.clone());
                manager.set_current_user(user.clone());
                self.presenter.emit(UiEvent::ProfileUpdated(user.clone()));
                self.presenter.success("Profile updated");
                Ok(user)
            }
            Err(e) => {
                self.presenter.error(e.to_string());
                Err(e)
            }
        }
    }

    fn activate(&mut self, user: User, manager: &mut ConversationManager) {
        self.current_user = Some(user.clone());
        manager.set_current_user(user.clone());
        self.presenter.emit(UiEvent::ShowChatApp { user: user.clone() });
        manager.load_chats();
        self.push.connect(user.id);
    }

    fn sign_out(&mut self, manager: &mut ConversationManager) {
        if let Err(e) = self.session.set_credential(None) {
            error!(error = %e, "failed to clear credential");
        }
        self.current_user = None;
        self.push.disconnect();
        manager.reset();
        self.presenter.emit(UiEvent::ShowLogin);
    }

    fn reject(&self, e: ValidationError) -> ClientError {
        self.presenter.error(e.to_string());
        ClientError::Validation(e)
    }
}
