//! Certification authority client.
//!
//! The authority registers sessions, receives heartbeats and telemetry and
//! serves the boundary document for a session. Every call is best-effort
//! from the agent's point of view: failures degrade `connected`, never the
//! local verdict.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use envelo_boundary::BoundaryDocument;
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::config::AuthorityConfig;
use crate::error::{AgentError, AgentResult};
use crate::telemetry::TelemetryRecord;

/// `POST /sessions` body.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionRegistration {
    pub session_id: String,
    pub system_id: String,
    pub agent_version: String,
    pub started_at: DateTime<Utc>,
    pub boundary_count: usize,
}

/// Authority reply to a registration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SessionAck {
    /// Boundary set to enforce for this session, if the authority has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boundaries: Option<BoundaryDocument>,
}

/// `POST /heartbeat` body.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Heartbeat {
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub pass_count: u64,
    pub block_count: u64,
}

/// `POST /telemetry` body.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TelemetryBatch {
    pub session_id: String,
    pub records: Vec<TelemetryRecord>,
}

/// `POST /sessions/{id}/end` body.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionSummary {
    pub ended_at: DateTime<Utc>,
    pub pass_count: u64,
    pub block_count: u64,
}

/// Operations the agent needs from the authority.
#[async_trait]
pub trait AuthorityClient: Send + Sync {
    async fn register_session(&self, registration: &SessionRegistration) -> AgentResult<SessionAck>;

    async fn heartbeat(&self, heartbeat: &Heartbeat) -> AgentResult<()>;

    async fn send_telemetry(&self, batch: &TelemetryBatch) -> AgentResult<()>;

    async fn end_session(&self, session_id: &str, summary: &SessionSummary) -> AgentResult<()>;

    async fn fetch_boundaries(&self, session_id: &str) -> AgentResult<BoundaryDocument>;
}

/// JSON-over-HTTP authority client.
pub struct HttpAuthorityClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpAuthorityClient {
    pub fn new(config: &AuthorityConfig) -> AgentResult<Self> {
        let client = Client::builder().timeout(config.request_timeout()).build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> AgentResult<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.authorized(self.client.get(&url)).send().await?;
        Self::handle_response(response).await
    }

    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> AgentResult<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.authorized(self.client.post(&url)).json(body).send().await?;
        Self::check_status(response).await
    }

    async fn check_status(response: reqwest::Response) -> AgentResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let message = response.text().await.unwrap_or_default();
            Err(AgentError::Authority {
                status: status.as_u16(),
                message,
            })
        }
    }

    async fn handle_response<T: DeserializeOwned>(response: reqwest::Response) -> AgentResult<T> {
        let response = Self::check_status(response).await?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl AuthorityClient for HttpAuthorityClient {
    async fn register_session(&self, registration: &SessionRegistration) -> AgentResult<SessionAck> {
        let response = self.post("/sessions", registration).await?;
        // Any 2xx registers the session; the body is optional.
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body).unwrap_or_default())
    }

    async fn heartbeat(&self, heartbeat: &Heartbeat) -> AgentResult<()> {
        self.post("/heartbeat", heartbeat).await.map(|_| ())
    }

    async fn send_telemetry(&self, batch: &TelemetryBatch) -> AgentResult<()> {
        self.post("/telemetry", batch).await.map(|_| ())
    }

    async fn end_session(&self, session_id: &str, summary: &SessionSummary) -> AgentResult<()> {
        self.post(&format!("/sessions/{}/end", session_id), summary)
            .await
            .map(|_| ())
    }

    async fn fetch_boundaries(&self, session_id: &str) -> AgentResult<BoundaryDocument> {
        self.get(&format!("/sessions/{}/boundaries", session_id)).await
    }
}
