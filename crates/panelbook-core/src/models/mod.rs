//! Data models exchanged with the scheduling backend.
//!
//! - `Interview`, `Participant`, `InterviewSeed`: the cached entity and its seed
//! - Token request/response bodies for the login and refresh endpoints

pub mod auth;
pub(crate) mod de;
pub mod interview;

pub use auth::{LoginRequest, LoginResponse, RefreshRequest, RefreshResponse};
pub use interview::{Interview, InterviewSeed, Participant};
