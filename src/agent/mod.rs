pub mod response;

use anyhow::Context;
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::AgentConfig;

/// Raw reply from the hosted agent. The remote service owns the schema:
/// depending on the deployment it returns a bare string, a list of step
/// records (thinking / tool_use / tool_result / content), or an object
/// with an `output` key. Callers go through [`response::flatten`] and
/// [`response::extract_json`] instead of touching the value directly.
#[derive(Debug, Clone)]
pub struct AgentResponse(pub Value);

#[async_trait]
pub trait AgentClient: Send + Sync {
    /// One blocking round trip to the agent. Transport, auth and remote
    /// errors all surface as `Err`; callers treat any of them as "agent
    /// unavailable" and fall back rather than aborting a run.
    async fn invoke(&self, prompt: &str) -> anyhow::Result<AgentResponse>;
}

pub struct HostedAgent {
    http: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
}

impl HostedAgent {
    pub fn new(cfg: &AgentConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: cfg.url.clone(),
            api_key: cfg.api_key.clone(),
            model: cfg.model.clone(),
        }
    }
}

#[async_trait]
impl AgentClient for HostedAgent {
    async fn invoke(&self, prompt: &str) -> anyhow::Result<AgentResponse> {
        let res = self
            .http
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&json!({ "model": self.model, "input": prompt }))
            .send()
            .await
            .context("agent request")?;

        let status = res.status();
        if !status.is_success() {
            let error_body = res
                .text()
                .await
                .unwrap_or_else(|_| "failed to read error body".to_string());
            anyhow::bail!("agent error {}: {}", status, error_body);
        }

        let body = res.json::<Value>().await.context("agent response body")?;
        Ok(AgentResponse(body))
    }
}
