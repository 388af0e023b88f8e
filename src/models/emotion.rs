use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const NOT_DETECTED_LABEL: &str = "No detectado";

/// Outcome of a single inference request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum EmotionResult {
    Detected {
        label: String,
        confidence: Option<f64>,
    },
    NotDetected,
    Failed {
        reason: String,
    },
}

/// Latest emotion shown for a running session. Only the most recent one is
/// kept; it is never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmotionObservation {
    pub label: Option<String>,
    pub confidence: Option<f64>,
    pub momento_segundo: u64,
    pub observed_at: DateTime<Utc>,
}

impl EmotionObservation {
    /// Failed and empty results both collapse to "not detected".
    pub fn from_result(result: &EmotionResult, momento_segundo: u64) -> Self {
        let (label, confidence) = match result {
            EmotionResult::Detected { label, confidence } => {
                (Some(label.clone()), confidence.map(|c| c.clamp(0.0, 1.0)))
            }
            EmotionResult::NotDetected | EmotionResult::Failed { .. } => (None, None),
        };

        Self {
            label,
            confidence,
            momento_segundo,
            observed_at: Utc::now(),
        }
    }

    pub fn is_detected(&self) -> bool {
        self.label.is_some()
    }

    /// Display text, e.g. `felicidad (87.5%)` or `No detectado`.
    pub fn display(&self) -> String {
        match (&self.label, self.confidence) {
            (Some(label), Some(confidence)) => format!("{label} ({:.1}%)", confidence * 100.0),
            (Some(label), None) => label.clone(),
            (None, _) => NOT_DETECTED_LABEL.to_string(),
        }
    }
}
