//! HTTP collaborators.
//!
//! Both post JSON to a configured endpoint and parse the JSON reply:
//! - `HttpExecutor`: POST {endpoint} with an `ActionRequest`, expects a `StepOutcome`
//! - `HttpSynthesizer`: POST {endpoint}/narrative and {endpoint}/risk-map

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;

use crate::domain::{NarrativeDocument, NarrativeVerbosity, RiskMap, StepOutcome};

use super::{ActionExecutor, ActionRequest, SynthesisContext, Synthesizer};

async fn post_json<B, R>(
    client: &reqwest::Client,
    url: &str,
    token: Option<&str>,
    body: &B,
    timeout: Duration,
) -> Result<R>
where
    B: Serialize + ?Sized,
    R: DeserializeOwned,
{
    let mut request = client.post(url).timeout(timeout).json(body);
    if let Some(token) = token {
        request = request.header("Authorization", format!("Bearer {}", token));
    }

    let response = request
        .send()
        .await
        .with_context(|| format!("Failed to reach {}", url))?;

    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        anyhow::bail!("{} returned {}: {}", url, status, text);
    }

    response
        .json::<R>()
        .await
        .with_context(|| format!("Failed to parse response from {}", url))
}

/// Executor that delegates to a remote action service
pub struct HttpExecutor {
    endpoint: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl HttpExecutor {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            token: None,
            client: reqwest::Client::new(),
        }
    }

    /// Send a bearer token with every request
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

#[async_trait]
impl ActionExecutor for HttpExecutor {
    fn name(&self) -> &str {
        "http"
    }

    async fn execute(&self, request: &ActionRequest, timeout: Duration) -> Result<StepOutcome> {
        post_json(
            &self.client,
            &self.endpoint,
            self.token.as_deref(),
            request,
            timeout,
        )
        .await
        .with_context(|| format!("Action for step '{}' failed", request.step_key))
    }

    async fn health_check(&self) -> Result<()> {
        let url = format!("{}/health", self.endpoint.trim_end_matches('/'));
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to run executor health check")?;

        if !response.status().is_success() {
            anyhow::bail!("Executor health check failed: {}", response.status());
        }
        Ok(())
    }
}

/// Synthesizer that delegates to a remote synthesis service
pub struct HttpSynthesizer {
    endpoint: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpSynthesizer {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            timeout,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Synthesizer for HttpSynthesizer {
    fn name(&self) -> &str {
        "http"
    }

    async fn narrative(
        &self,
        context: &SynthesisContext,
        verbosity: NarrativeVerbosity,
        include_recommendations: bool,
    ) -> Result<NarrativeDocument> {
        let body = json!({
            "context": context,
            "verbosity": verbosity,
            "include_recommendations": include_recommendations,
        });
        let url = format!("{}/narrative", self.endpoint);
        post_json(&self.client, &url, None, &body, self.timeout).await
    }

    async fn risk_map(
        &self,
        context: &SynthesisContext,
        include_opportunities: bool,
    ) -> Result<RiskMap> {
        let body = json!({
            "context": context,
            "include_opportunities": include_opportunities,
        });
        let url = format!("{}/risk-map", self.endpoint);
        post_json(&self.client, &url, None, &body, self.timeout).await
    }
}
