use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::EmotionResult;
use crate::sampler::EncodedFrame;

use super::ApiClient;

/// Maps one encoded frame to an emotion. Implementations never fail the
/// caller: transport and server errors come back as `EmotionResult::Failed`.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn infer(
        &self,
        session_id: i64,
        frame: &EncodedFrame,
        momento_segundo: u64,
    ) -> EmotionResult;
}

#[derive(Serialize)]
struct EmotionFrameRequest<'a> {
    sesion_id: i64,
    frame_base64: &'a str,
    momento_segundo: u64,
}

/// The endpoint answers with the stored analysis on success
/// (`emocion_predominante`/`confianza_emocion`), or with only a `message`
/// when no face was found.
#[derive(Debug, Deserialize)]
struct EmotionFrameResponse {
    #[serde(default, alias = "emocion_predominante")]
    emocion: Option<String>,
    #[serde(default, alias = "confianza_emocion")]
    confianza: Option<f64>,
}

impl From<EmotionFrameResponse> for EmotionResult {
    fn from(response: EmotionFrameResponse) -> Self {
        match response.emocion {
            Some(label) if !label.trim().is_empty() => EmotionResult::Detected {
                label,
                confidence: response.confianza.map(|c| c.clamp(0.0, 1.0)),
            },
            _ => EmotionResult::NotDetected,
        }
    }
}

pub struct HttpInferenceClient {
    api: ApiClient,
}

impl HttpInferenceClient {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }
}

#[async_trait]
impl InferenceClient for HttpInferenceClient {
    async fn infer(
        &self,
        session_id: i64,
        frame: &EncodedFrame,
        momento_segundo: u64,
    ) -> EmotionResult {
        let data_url = frame.to_data_url();
        let request = EmotionFrameRequest {
            sesion_id: session_id,
            frame_base64: &data_url,
            momento_segundo,
        };

        match self
            .api
            .post_json::<_, EmotionFrameResponse>("/api/emocion-detection/", Some(&request))
            .await
        {
            Ok(response) => response.into(),
            Err(err) => EmotionResult::Failed {
                reason: err.to_string(),
            },
        }
    }
}
