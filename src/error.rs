use serde::Serialize;
use thiserror::Error;

use crate::api::ApiError;
use crate::capture::CaptureError;

/// Failures surfaced by the session controller.
///
/// `PermissionDenied`, `DeviceUnavailable` and `Gateway` during creation stop a
/// session from starting. `Inference` and `Device` are per tick and never stop
/// the sampling cadence.
#[derive(Debug, Clone, Error, Serialize, PartialEq)]
#[serde(tag = "kind", content = "message", rename_all = "camelCase")]
pub enum SessionError {
    #[error("not authenticated: {0}")]
    Unauthenticated(String),
    #[error("camera permission denied: {0}")]
    PermissionDenied(String),
    #[error("camera unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("{0}")]
    PreconditionUnmet(String),
    #[error("session gateway error: {0}")]
    Gateway(String),
    #[error("emotion inference failed: {0}")]
    Inference(String),
    #[error("frame capture failed: {0}")]
    Device(String),
}

impl SessionError {
    /// Camera problems get a persistent banner instead of an inline message.
    pub fn is_camera_warning(&self) -> bool {
        matches!(
            self,
            SessionError::PermissionDenied(_) | SessionError::DeviceUnavailable(_)
        )
    }
}

impl From<CaptureError> for SessionError {
    fn from(err: CaptureError) -> Self {
        match err {
            CaptureError::PermissionDenied(msg) => SessionError::PermissionDenied(msg),
            CaptureError::DeviceUnavailable(msg) => SessionError::DeviceUnavailable(msg),
            other => SessionError::Device(other.to_string()),
        }
    }
}

impl From<ApiError> for SessionError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Unauthenticated => SessionError::Unauthenticated(err.to_string()),
            other => SessionError::Gateway(other.to_string()),
        }
    }
}
