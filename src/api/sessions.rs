use async_trait::async_trait;
use serde::Serialize;

use crate::models::SessionHandle;

use super::{ApiClient, ApiError};

/// Remote create/end of activity session records. Failures are reported to
/// the caller as-is; nothing here retries.
#[async_trait]
pub trait SessionGateway: Send + Sync {
    async fn create_session(
        &self,
        activity_id: i64,
        student_id: i64,
    ) -> Result<SessionHandle, ApiError>;

    async fn end_session(&self, session_id: i64) -> Result<SessionHandle, ApiError>;
}

#[derive(Serialize)]
struct CreateSessionPayload {
    actividad: i64,
    alumno: i64,
}

pub struct HttpSessionGateway {
    api: ApiClient,
}

impl HttpSessionGateway {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }
}

#[async_trait]
impl SessionGateway for HttpSessionGateway {
    async fn create_session(
        &self,
        activity_id: i64,
        student_id: i64,
    ) -> Result<SessionHandle, ApiError> {
        let payload = CreateSessionPayload {
            actividad: activity_id,
            alumno: student_id,
        };
        self.api
            .post_json("/api/sesiones-actividad/", Some(&payload))
            .await
    }

    async fn end_session(&self, session_id: i64) -> Result<SessionHandle, ApiError> {
        self.api
            .post_json::<(), _>(
                &format!("/api/sesiones-actividad/{session_id}/end_session/"),
                None,
            )
            .await
    }
}
