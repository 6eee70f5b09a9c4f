use crate::action_log::ActionRecord;
use crate::config::ServerConfig;
use crate::orchestrator::OrchestratorStatus;
use crate::session::Session;
use crate::timeouts::secs;
use crate::{OrchestratorError, Result};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Talks to the HTTP API of a running `serve` instance.
pub struct ServerClient {
    client: reqwest::Client,
    base_url: String,
}

impl ServerClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        url::Url::parse(&base_url).map_err(|e| {
            OrchestratorError::InvalidRequest(format!("invalid server URL '{}': {}", base_url, e))
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(secs::SERVER_REQUEST))
            .build()?;
        Ok(Self { client, base_url })
    }

    pub fn from_config(config: &ServerConfig) -> Result<Self> {
        Self::new(format!("http://{}:{}", config.host, config.http_port))
    }

    pub async fn status(&self) -> Result<OrchestratorStatus> {
        self.get("/api/status")
            .await?
            .ok_or_else(|| OrchestratorError::General("server has no status endpoint".into()))
    }

    pub async fn sessions(&self) -> Result<Vec<Session>> {
        Ok(self.get("/api/sessions").await?.unwrap_or_default())
    }

    pub async fn actions(&self, session_id: &str) -> Result<Vec<ActionRecord>> {
        self.get(&format!("/api/sessions/{}/actions", session_id))
            .await?
            .ok_or_else(|| OrchestratorError::SessionNotFound(session_id.to_string()))
    }

    pub async fn cleanup(&self, session_id: &str) -> Result<()> {
        let url = format!("{}/api/sessions/{}", self.base_url, session_id);
        let response = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(OrchestratorError::SessionNotFound(session_id.to_string())),
            status if status.is_success() => Ok(()),
            status => Err(server_error(status, response).await),
        }
    }

    /// `Ok(None)` on 404.
    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response.json().await?)),
            status => Err(server_error(status, response).await),
        }
    }

    fn unreachable(&self, err: reqwest::Error) -> OrchestratorError {
        OrchestratorError::General(format!(
            "Cannot reach server at {} ({}). Is `crawl-orchestrator serve` running?",
            self.base_url, err
        ))
    }
}

async fn server_error(status: StatusCode, response: reqwest::Response) -> OrchestratorError {
    let body: serde_json::Value = response.json().await.unwrap_or_default();
    let message = body
        .get("error")
        .and_then(|e| e.as_str())
        .unwrap_or("no error message");
    OrchestratorError::General(format!("server returned {}: {}", status, message))
}
