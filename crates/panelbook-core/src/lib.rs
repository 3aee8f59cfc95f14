//! Session and cache core for the panelbook scheduling client.
//!
//! - [`api::ApiClient`]: authenticated request pipeline with single-flight
//!   token refresh, session restore, login and logout
//! - [`auth`]: session state, identity decoding, credential stores
//! - [`cache::EntityCache`]: stale-while-revalidate cache for interviews
//! - [`config::Config`]: backend URL, timeouts, keychain service

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod models;

pub use api::{ApiClient, ApiError};
pub use auth::{AuthState, CredentialStore, Identity, KeyringStore, MemoryStore};
pub use cache::{CacheEntry, EntityCache, InterviewCache};
pub use config::Config;
pub use models::{Interview, InterviewSeed, Participant};
