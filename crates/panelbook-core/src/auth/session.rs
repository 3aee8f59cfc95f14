use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::credentials::{CredentialStore, REFRESH_TOKEN_KEY};
use super::identity::{decode_identity, Identity};
use crate::api::ApiError;

/// Authentication state observed by the rest of the app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum AuthState {
    /// Startup restore has not finished yet; show the loading indicator.
    Restoring,
    Authenticated,
    Unauthenticated,
}

/// In-memory session. `identity` is always derived from `access_token`.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub access_token: Option<String>,
    pub identity: Option<Identity>,
}

/// Process-wide session state plus the persisted refresh token.
///
/// `set_session` and `hard_logout` are the only writers.
pub struct SessionState {
    session: RwLock<Session>,
    store: Arc<dyn CredentialStore>,
    state_tx: watch::Sender<AuthState>,
}

impl SessionState {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        let (state_tx, _) = watch::channel(AuthState::Restoring);
        Self {
            session: RwLock::new(Session::default()),
            store,
            state_tx,
        }
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    /// Install a new token pair: sets the access token, derives the
    /// identity and persists the refresh token.
    pub fn set_session(&self, access_token: &str, refresh_token: &str) -> Result<(), ApiError> {
        self.update_access_token(access_token);
        self.store.set(REFRESH_TOKEN_KEY, refresh_token)?;
        Ok(())
    }

    /// Replace the access token and recompute the identity from it.
    fn update_access_token(&self, access_token: &str) {
        let identity = decode_identity(access_token);
        if identity.is_none() {
            debug!("Session established without decodable identity");
        }
        {
            let mut session = self.session.write().unwrap_or_else(|e| e.into_inner());
            session.access_token = Some(access_token.to_string());
            session.identity = identity;
        }
        self.publish(AuthState::Authenticated);
    }

    /// Clear the session and the persisted refresh token.
    ///
    /// Safe to call when already logged out. A credential store failure is
    /// logged and does not stop the in-memory session from being cleared.
    pub fn hard_logout(&self) {
        if let Err(e) = self.store.delete(REFRESH_TOKEN_KEY) {
            warn!(error = %e, "Failed to delete refresh token during logout");
        }
        let was_authenticated = {
            let mut session = self.session.write().unwrap_or_else(|e| e.into_inner());
            let had_token = session.access_token.is_some();
            *session = Session::default();
            had_token
        };
        if was_authenticated {
            info!("Session cleared");
        }
        self.publish(AuthState::Unauthenticated);
    }

    /// Mark startup restore as finished without a session.
    pub(crate) fn mark_unauthenticated(&self) {
        self.publish(AuthState::Unauthenticated);
    }

    fn publish(&self, state: AuthState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }

    pub fn access_token(&self) -> Option<String> {
        self.session
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .access_token
            .clone()
    }

    pub fn identity(&self) -> Option<Identity> {
        self.session
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .identity
            .clone()
    }

    /// Snapshot of the whole session.
    pub fn snapshot(&self) -> Session {
        self.session.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.session
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .access_token
            .is_some()
    }

    pub fn auth_state(&self) -> AuthState {
        *self.state_tx.borrow()
    }

    /// Subscribe to authentication state changes.
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state_tx.subscribe()
    }
}
