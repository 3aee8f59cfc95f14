//! Best-effort decoding of access token claims into an [`Identity`].
//!
//! The access token is treated as a JWT. Its signature is never checked:
//! the server is the authority, the decoded identity only drives display
//! and navigation decisions on the client.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::de::{string_or_default, string_or_number};

/// Identity claims carried by the access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Identity {
    #[serde(default, deserialize_with = "string_or_default")]
    pub name: String,
    #[serde(default, deserialize_with = "string_or_default")]
    pub email: String,
    #[serde(default, deserialize_with = "string_or_default")]
    pub role: String,
    #[serde(
        rename = "committeeId",
        alias = "committee_id",
        default,
        deserialize_with = "string_or_number"
    )]
    pub committee_id: Option<String>,
    #[serde(
        rename = "subcommitteeId",
        alias = "subcommittee_id",
        default,
        deserialize_with = "string_or_number"
    )]
    pub subcommittee_id: Option<String>,
}

impl Identity {
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.email
        } else {
            &self.name
        }
    }
}

/// Decode the identity claims of an access token.
///
/// Returns `None` for anything that is not a JWT with a JSON object payload.
/// Never fails: a token that cannot be decoded is still a usable bearer
/// credential.
pub fn decode_identity(token: &str) -> Option<Identity> {
    let mut segments = token.split('.');
    let payload = match (segments.next(), segments.next(), segments.next()) {
        (Some(_), Some(payload), Some(_)) => payload,
        _ => {
            debug!("Access token is not a JWT, identity unavailable");
            return None;
        }
    };

    let bytes = match URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')) {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!(error = %e, "Access token payload is not base64url");
            return None;
        }
    };

    match serde_json::from_slice::<Identity>(&bytes) {
        Ok(identity) => Some(identity),
        Err(e) => {
            debug!(error = %e, "Access token claims could not be parsed");
            None
        }
    }
}
