use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::de::string_or_number;
use crate::cache::CachedEntity;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Participant {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub name: String,
    pub role: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Interview {
    pub id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default = "Utc::now")]
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub participants: Vec<Participant>,
    pub location: Option<String>,
    #[serde(rename = "committeeId", default, deserialize_with = "string_or_number")]
    pub committee_id: Option<String>,
    #[serde(rename = "subcommitteeId", default, deserialize_with = "string_or_number")]
    pub subcommittee_id: Option<String>,
    pub notes: Option<String>,
    pub status: Option<String>,
}

/// Partial interview a screen already holds, e.g. from a list row.
///
/// Every field is optional; see [`Interview::from_seed`] for the defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InterviewSeed {
    pub title: Option<String>,
    pub date: Option<DateTime<Utc>>,
    pub participants: Option<Vec<Participant>>,
    pub location: Option<String>,
    #[serde(rename = "committeeId")]
    pub committee_id: Option<String>,
    #[serde(rename = "subcommitteeId")]
    pub subcommittee_id: Option<String>,
    pub notes: Option<String>,
    pub status: Option<String>,
}

impl InterviewSeed {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }
}

impl Interview {
    /// Build a complete record from a seed.
    ///
    /// Defaults: empty title, current time as date, no participants, and
    /// `None` for every optional field.
    pub fn from_seed(id: i64, seed: InterviewSeed) -> Self {
        Self {
            id,
            title: seed.title.unwrap_or_default(),
            date: seed.date.unwrap_or_else(Utc::now),
            participants: seed.participants.unwrap_or_default(),
            location: seed.location,
            committee_id: seed.committee_id,
            subcommittee_id: seed.subcommittee_id,
            notes: seed.notes,
            status: seed.status,
        }
    }

    pub fn formatted_date(&self) -> String {
        self.date.format("%b %d, %Y %H:%M").to_string()
    }

    pub fn participant_names(&self) -> Vec<&str> {
        self.participants.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn location_display(&self) -> &str {
        self.location.as_deref().unwrap_or("TBD")
    }
}

impl CachedEntity for Interview {
    type Seed = InterviewSeed;

    const RESOURCE: &'static str = "interviews";

    fn id(&self) -> i64 {
        self.id
    }

    fn from_seed(id: i64, seed: Self::Seed) -> Self {
        Interview::from_seed(id, seed)
    }
}
