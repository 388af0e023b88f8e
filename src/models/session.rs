use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Session record as returned by the lifecycle endpoints. Nested `actividad`
/// and `alumno` objects are ignored; the client already knows both.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionHandle {
    pub id: i64,
    #[serde(default)]
    pub fecha_hora_inicio_real: Option<String>,
    #[serde(default)]
    pub fecha_hora_fin_real: Option<String>,
}

impl SessionHandle {
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.fecha_hora_inicio_real
            .as_deref()
            .and_then(parse_backend_timestamp)
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.fecha_hora_fin_real
            .as_deref()
            .and_then(parse_backend_timestamp)
    }
}

/// One student's attempt at one activity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActivitySession {
    pub id: i64,
    pub activity_id: i64,
    pub student_id: i64,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl ActivitySession {
    pub fn from_handle(
        handle: &SessionHandle,
        activity_id: i64,
        student_id: i64,
        fallback_start: DateTime<Utc>,
    ) -> Self {
        Self {
            id: handle.id,
            activity_id,
            student_id,
            started_at: handle.started_at().unwrap_or(fallback_start),
            ended_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }

    /// Sets the end timestamp. Returns false when it was already set; the
    /// first value is kept.
    pub fn close(&mut self, at: DateTime<Utc>) -> bool {
        if self.ended_at.is_some() {
            return false;
        }
        self.ended_at = Some(at);
        true
    }
}

/// Parses timestamps emitted by the backend: RFC 3339, or naive ISO 8601
/// (interpreted as UTC) when the server runs without time zone support.
pub fn parse_backend_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
