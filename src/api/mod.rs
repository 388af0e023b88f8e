//! Authenticated REST access to the education backend.
//!
//! Every call carries the DRF token (`Authorization: Token <key>`). A client
//! without a token fails before a request is built.

pub mod activities;
pub mod emotion;
pub mod sessions;

use std::time::Duration;

use reqwest::{header, Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use activities::{ActivityCatalog, HttpActivityCatalog};
pub use emotion::{HttpInferenceClient, InferenceClient};
pub use sessions::{HttpSessionGateway, SessionGateway};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("no authentication token available")]
    Unauthenticated,
    #[error("request to {endpoint} timed out")]
    Timeout { endpoint: String },
    #[error("request to {endpoint} failed: {message}")]
    Network { endpoint: String, message: String },
    #[error("{endpoint} returned {status}: {message}")]
    Status {
        endpoint: String,
        status: StatusCode,
        message: String,
    },
    #[error("unexpected response from {endpoint}: {message}")]
    Decode { endpoint: String, message: String },
}

#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    http: Client,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| anyhow::anyhow!("failed to build HTTP client: {err}"))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
            token: None,
        })
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token.filter(|t| !t.is_empty());
        self
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    fn token(&self) -> Result<&str, ApiError> {
        self.token.as_deref().ok_or(ApiError::Unauthenticated)
    }

    pub async fn get_json<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T, ApiError> {
        let token = self.token()?;
        let response = self
            .http
            .get(self.url(endpoint))
            .header(header::AUTHORIZATION, format!("Token {token}"))
            .send()
            .await
            .map_err(|err| transport_error(endpoint, err))?;

        decode_json(endpoint, response).await
    }

    /// POST with an optional JSON body, decoding a JSON reply.
    pub async fn post_json<B, T>(&self, endpoint: &str, body: Option<&B>) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.send_post(endpoint, body).await?;
        decode_json(endpoint, response).await
    }

    /// POST where only the status matters.
    pub async fn post_unit<B>(&self, endpoint: &str, body: Option<&B>) -> Result<(), ApiError>
    where
        B: Serialize + ?Sized,
    {
        let response = self.send_post(endpoint, body).await?;
        ensure_success(endpoint, response).await.map(|_| ())
    }

    /// POST without credentials; only the login endpoint uses this.
    pub async fn post_anonymous<B, T>(&self, endpoint: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .http
            .post(self.url(endpoint))
            .json(body)
            .send()
            .await
            .map_err(|err| transport_error(endpoint, err))?;

        decode_json(endpoint, response).await
    }

    async fn send_post<B>(&self, endpoint: &str, body: Option<&B>) -> Result<Response, ApiError>
    where
        B: Serialize + ?Sized,
    {
        let token = self.token()?;
        let mut request = self
            .http
            .post(self.url(endpoint))
            .header(header::AUTHORIZATION, format!("Token {token}"));

        request = match body {
            Some(body) => request.json(body),
            None => request.header(header::CONTENT_TYPE, "application/json"),
        };

        request
            .send()
            .await
            .map_err(|err| transport_error(endpoint, err))
    }
}

fn transport_error(endpoint: &str, err: reqwest::Error) -> ApiError {
    if err.is_timeout() {
        ApiError::Timeout {
            endpoint: endpoint.to_string(),
        }
    } else {
        ApiError::Network {
            endpoint: endpoint.to_string(),
            message: err.to_string(),
        }
    }
}

async fn ensure_success(endpoint: &str, response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = summarize_error_body(status, &body);
    log::error!("Request to {endpoint} failed: {message}");

    Err(ApiError::Status {
        endpoint: endpoint.to_string(),
        status,
        message,
    })
}

async fn decode_json<T: DeserializeOwned>(endpoint: &str, response: Response) -> Result<T, ApiError> {
    let response = ensure_success(endpoint, response).await?;
    let bytes = response.bytes().await.map_err(|err| transport_error(endpoint, err))?;

    serde_json::from_slice(&bytes).map_err(|err| ApiError::Decode {
        endpoint: endpoint.to_string(),
        message: err.to_string(),
    })
}

/// Human-readable summary of an error body. DRF puts the useful text in
/// `detail`, `message`, `error` or `non_field_errors`; field validation
/// errors fall through to the raw JSON.
pub fn summarize_error_body(status: StatusCode, body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return status.to_string();
    }

    let Ok(value) = serde_json::from_str::<Value>(trimmed) else {
        return trimmed.to_string();
    };

    for key in ["detail", "message", "error"] {
        if let Some(text) = value.get(key).and_then(Value::as_str) {
            return text.to_string();
        }
    }

    if let Some(errors) = value.get("non_field_errors").and_then(Value::as_array) {
        let joined = errors
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        if !joined.is_empty() {
            return joined;
        }
    }

    value.to_string()
}
