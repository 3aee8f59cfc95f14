//! Authentication module: session state, credential storage and refresh
//! coordination.
//!
//! This module provides:
//! - `SessionState`: in-memory access token, decoded identity and observable auth state
//! - `CredentialStore`: persisted refresh token (OS keychain or in-memory)
//! - `RefreshCoordinator`: single-flight guard around token refresh
//!
//! Only the refresh token is persisted. Access tokens live in memory and are
//! re-acquired through `ApiClient::restore_session` on startup.

pub mod credentials;
pub mod identity;
pub mod refresh;
pub mod session;

pub use credentials::{CredentialStore, KeyringStore, MemoryStore, REFRESH_TOKEN_KEY};
pub use identity::{decode_identity, Identity};
pub use refresh::{RefreshCoordinator, RefreshOutcome};
pub use session::{AuthState, Session, SessionState};
