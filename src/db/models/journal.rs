//! Local record of each activity attempt.
//!
//! One row per controller, written when the backend session is created and
//! closed when it ends. Rows still `Active` at startup belong to a run that
//! never reached its end routine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::sampler::SamplerCounters;
use crate::session::EndReason;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum JournalStatus {
    Active,
    Ended,
    Interrupted,
}

impl JournalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JournalStatus::Active => "Active",
            JournalStatus::Ended => "Ended",
            JournalStatus::Interrupted => "Interrupted",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntry {
    pub id: String,
    pub session_id: i64,
    pub activity_id: i64,
    pub student_id: i64,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: JournalStatus,
    pub end_reason: Option<EndReason>,
    /// Whether the backend confirmed the end of the session.
    pub acknowledged: bool,
    pub counters: SamplerCounters,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
