//! REST API client module for the scheduling backend.
//!
//! This module provides the `ApiClient`, the single entry point for every
//! backend call. It owns the session, attaches bearer tokens, and handles
//! token expiry by refreshing once and replaying the request.

pub mod client;
pub mod error;

pub use client::ApiClient;
pub use error::ApiError;
pub use reqwest::Method;
