use serde::Serialize;
use tokio::sync::broadcast;

use crate::error::SessionError;
use crate::models::{Activity, ActivitySession, EmotionObservation};
use crate::sampler::SamplerCounters;

use super::state::{EndReason, SessionPhase};

/// Summary produced once per session when it ends.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndReport {
    pub session: ActivitySession,
    pub reason: EndReason,
    pub counters: SamplerCounters,
    /// False when the gateway did not confirm the end.
    pub acknowledged: bool,
    pub gateway_error: Option<SessionError>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    PhaseChanged { phase: SessionPhase },
    ActivityLoaded { activity: Activity },
    CameraReady,
    /// Persistent banner: the camera cannot be used.
    CameraWarning { message: String },
    /// Signed-in user may watch the preview but not perform the activity.
    NotEligible { message: String },
    SessionStarted {
        session: ActivitySession,
        remaining_secs: Option<u64>,
    },
    CountdownTick { remaining_secs: u64 },
    EmotionObserved { observation: EmotionObservation },
    /// Inline, transient error.
    Error { error: SessionError },
    SessionEnded { report: EndReport },
}

/// Fan-out of controller events. Emitting with no subscribers is fine.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn emit(&self, event: SessionEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }
}

/// `mm:ss` rendering of a countdown value.
pub fn format_remaining(secs: u64) -> String {
    format!("{:02}:{:02}", secs / 60, secs % 60)
}
