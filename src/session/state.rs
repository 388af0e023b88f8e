use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SessionError;
use crate::models::{Activity, ActivitySession, EmotionObservation};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum SessionPhase {
    #[default]
    Idle,
    AwaitingPreconditions,
    Active,
    Ending,
    Ended,
}

impl SessionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionPhase::Idle => "Idle",
            SessionPhase::AwaitingPreconditions => "AwaitingPreconditions",
            SessionPhase::Active => "Active",
            SessionPhase::Ending => "Ending",
            SessionPhase::Ended => "Ended",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum EndReason {
    Manual,
    Timeout,
    Teardown,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndReason::Manual => "Manual",
            EndReason::Timeout => "Timeout",
            EndReason::Teardown => "Teardown",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub phase: SessionPhase,
    pub activity: Option<Activity>,
    pub session: Option<ActivitySession>,
    pub camera_ready: bool,
    pub remaining_secs: Option<u64>,
    pub latest_emotion: Option<EmotionObservation>,
    /// Set when the gateway refused to create the session; blocks automatic
    /// re-evaluation until an explicit restart.
    pub start_failed: bool,
    pub last_error: Option<SessionError>,
    pub end_reason: Option<EndReason>,
    /// Single-flight latch for `AwaitingPreconditions -> Active`.
    #[serde(skip)]
    pub starting: bool,
    #[serde(skip)]
    pub torn_down: bool,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_pre_session(&self) -> bool {
        matches!(
            self.phase,
            SessionPhase::Idle | SessionPhase::AwaitingPreconditions
        )
    }

    /// Recomputes the waiting phase from what is currently loaded. Has no
    /// effect once a session is active or finished.
    pub fn settle_waiting_phase(&mut self) {
        if !self.is_pre_session() {
            return;
        }
        self.phase = if self.start_failed || (self.activity.is_some() && self.camera_ready) {
            SessionPhase::AwaitingPreconditions
        } else {
            SessionPhase::Idle
        };
    }

    pub fn try_latch_start(&mut self) -> bool {
        if self.phase != SessionPhase::AwaitingPreconditions
            || self.starting
            || self.start_failed
            || self.torn_down
        {
            return false;
        }
        self.starting = true;
        true
    }

    pub fn activate(&mut self, session: ActivitySession, countdown_secs: Option<u64>) {
        self.phase = SessionPhase::Active;
        self.starting = false;
        self.session = Some(session);
        self.remaining_secs = countdown_secs;
        self.latest_emotion = None;
        self.last_error = None;
    }

    pub fn fail_start(&mut self, error: SessionError) {
        self.starting = false;
        self.start_failed = true;
        self.camera_ready = false;
        self.last_error = Some(error);
        self.settle_waiting_phase();
    }

    /// Clears a previous creation failure so `start` can try again.
    pub fn reset_failure(&mut self) {
        if self.is_pre_session() {
            self.start_failed = false;
            self.last_error = None;
            self.settle_waiting_phase();
        }
    }

    /// The one-way `Active -> Ending` transition. Only the first caller
    /// gets `true`.
    pub fn begin_ending(&mut self, reason: EndReason) -> bool {
        if self.phase != SessionPhase::Active {
            return false;
        }
        self.phase = SessionPhase::Ending;
        self.end_reason = Some(reason);
        true
    }

    /// Decrements the countdown by one second. `None` when there is no
    /// countdown, it already hit zero, or the session is not active.
    pub fn tick_countdown(&mut self) -> Option<u64> {
        if self.phase != SessionPhase::Active {
            return None;
        }
        match self.remaining_secs {
            Some(remaining) if remaining > 0 => {
                let next = remaining - 1;
                self.remaining_secs = Some(next);
                Some(next)
            }
            _ => None,
        }
    }

    pub fn record_observation(&mut self, observation: EmotionObservation) -> bool {
        if self.phase != SessionPhase::Active {
            return false;
        }
        self.latest_emotion = Some(observation);
        true
    }

    pub fn finish(&mut self, ended_at: DateTime<Utc>) {
        if let Some(session) = self.session.as_mut() {
            session.close(ended_at);
        }
        self.phase = SessionPhase::Ended;
        self.camera_ready = false;
        self.latest_emotion = None;
    }
}
