use super::{Extraction, ExtractionStrategy, Extractor};
use crate::config::ExtractorConfig;
use crate::{OrchestratorError, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::Duration;

/// [`Extractor`] that delegates to an extraction service over HTTP.
///
/// The service receives `{html, strategy, options}` as JSON and answers with
/// `{content, structured_data?}`.
pub struct HttpExtractor {
    client: reqwest::Client,
    endpoint: String,
}

#[derive(Serialize)]
struct ExtractRequest<'a> {
    html: &'a str,
    strategy: &'a ExtractionStrategy,
    options: &'a Map<String, Value>,
}

impl HttpExtractor {
    pub fn new(config: &ExtractorConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait::async_trait]
impl Extractor for HttpExtractor {
    async fn extract(
        &self,
        html: &str,
        strategy: &ExtractionStrategy,
        options: &Map<String, Value>,
    ) -> Result<Extraction> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&ExtractRequest {
                html,
                strategy,
                options,
            })
            .send()
            .await
            .map_err(|e| OrchestratorError::Extraction(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OrchestratorError::Extraction(format!(
                "service returned {}: {}",
                status,
                body.chars().take(200).collect::<String>()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| OrchestratorError::Extraction(format!("failed to read body: {}", e)))?;

        serde_json::from_slice::<Extraction>(&bytes)
            .map_err(|e| OrchestratorError::Extraction(format!("malformed response: {}", e)))
    }
}
