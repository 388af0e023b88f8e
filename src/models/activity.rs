use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::parse_backend_timestamp;

/// Parent subject of an activity. The backend serializes it either as a bare
/// id or as the full nested object depending on the serializer in use.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum SubjectRef {
    Id(i64),
    Nested {
        id: i64,
        #[serde(default)]
        nombre: Option<String>,
    },
}

impl SubjectRef {
    pub fn id(&self) -> i64 {
        match self {
            SubjectRef::Id(id) => *id,
            SubjectRef::Nested { id, .. } => *id,
        }
    }
}

/// Catalog entry for an activity. Read-only from the client's side.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Activity {
    pub id: i64,
    #[serde(default)]
    pub materia: Option<SubjectRef>,
    pub nombre: String,
    #[serde(default)]
    pub descripcion: String,
    #[serde(default)]
    pub fecha_inicio: Option<String>,
    #[serde(default)]
    pub duracion_analisis_minutos: i64,
}

impl Activity {
    /// Countdown length in seconds, or `None` when the activity has no
    /// positive analysis duration and must be ended manually.
    pub fn countdown_secs(&self) -> Option<u64> {
        if self.duracion_analisis_minutos > 0 {
            Some(self.duracion_analisis_minutos as u64 * 60)
        } else {
            None
        }
    }

    pub fn starts_at(&self) -> Option<DateTime<Utc>> {
        self.fecha_inicio
            .as_deref()
            .and_then(parse_backend_timestamp)
    }

    pub fn subject_id(&self) -> Option<i64> {
        self.materia.as_ref().map(SubjectRef::id)
    }
}
