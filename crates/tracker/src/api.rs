//! REST client for the simulation endpoints.
//!
//! Wraps job creation, progress queries and progress cleanup using
//! [`reqwest`]. The tracker only talks to the server through the
//! [`SimulationBackend`] trait so tests can script responses.

use std::time::Duration;

use async_trait::async_trait;
use qsim_core::progress::ProgressSnapshot;
use qsim_core::simulation::SimulationRequest;
use qsim_core::types::DbId;
use serde::Deserialize;

/// The server operations the tracker depends on.
#[async_trait]
pub trait SimulationBackend: Send + Sync {
    /// Submit a simulation. Returns the job handle and expected shot count.
    async fn create_simulation(
        &self,
        request: &SimulationRequest,
    ) -> Result<CreatedSimulation, ApiError>;

    /// Read the current progress of a job.
    ///
    /// Returns [`ApiError::NotFound`] once the server has dropped the
    /// progress record.
    async fn fetch_progress(&self, job_id: DbId) -> Result<ProgressSnapshot, ApiError>;

    /// Release the server-side progress record. Idempotent.
    async fn clear_progress(&self, job_id: DbId) -> Result<(), ApiError>;
}

/// `202 Accepted` body of `POST /simulations`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CreatedSimulation {
    #[serde(default)]
    pub message: String,
    #[serde(rename = "simID")]
    pub sim_id: DbId,
    pub total: u32,
}

/// Errors from the simulation REST layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout, decode).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The progress record for this job does not exist (any more).
    #[error("Progress not found for simulation {0}")]
    NotFound(DbId),

    /// The server refused to create the simulation.
    #[error("{message}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Server-provided explanation.
        message: String,
    },

    /// Any other non-2xx response.
    #[error("Simulation API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },
}

/// HTTP client for the simulation server.
pub struct SimulationApi {
    client: reqwest::Client,
    api_url: String,
}

impl SimulationApi {
    /// Create a new API client.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `http://localhost:8000`.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    /// Create a client whose requests give up after `timeout`.
    pub fn with_timeout(api_url: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, api_url))
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        Self { client, api_url }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    fn progress_url(&self, job_id: DbId) -> String {
        format!("{}/simulations/{}/progress", self.api_url, job_id)
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code, or turn it into an
    /// [`ApiError::ApiError`] carrying the status and body text.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl SimulationBackend for SimulationApi {
    /// Sends `POST /simulations`. Any non-2xx status is a rejection whose
    /// message comes from the body's `message` or `detail` field.
    async fn create_simulation(
        &self,
        request: &SimulationRequest,
    ) -> Result<CreatedSimulation, ApiError> {
        let response = self
            .client
            .post(format!("{}/simulations", self.api_url))
            .json(request)
            .send()
            .await?;

        match Self::ensure_success(response).await {
            Ok(response) => Ok(response.json::<CreatedSimulation>().await?),
            Err(ApiError::ApiError { status, body }) => Err(ApiError::Rejected {
                status,
                message: rejection_message(status, &body),
            }),
            Err(e) => Err(e),
        }
    }

    async fn fetch_progress(&self, job_id: DbId) -> Result<ProgressSnapshot, ApiError> {
        let response = self.client.get(self.progress_url(job_id)).send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ApiError::NotFound(job_id));
        }
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<ProgressSnapshot>().await?)
    }

    /// Sends `DELETE /simulations/{id}/progress`. A 404 counts as success.
    async fn clear_progress(&self, job_id: DbId) -> Result<(), ApiError> {
        let response = self.client.delete(self.progress_url(job_id)).send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        Self::ensure_success(response).await?;
        Ok(())
    }
}

/// Pull a human-readable reason out of an error body.
///
/// The server answers with `{"message": ...}` from its own handlers and
/// `{"detail": ...}` from framework-level guards (rate limits, budgets).
fn rejection_message(status: u16, body: &str) -> String {
    let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();
    let field = parsed.as_ref().and_then(|v| {
        ["message", "detail"]
            .iter()
            .find_map(|key| v.get(*key).and_then(|m| m.as_str()))
            .map(str::to_string)
    });

    match field {
        Some(m) if !m.trim().is_empty() => m,
        _ if !body.trim().is_empty() => body.trim().to_string(),
        _ => format!("Simulation request rejected with status {status}"),
    }
}
