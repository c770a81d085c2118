use serde::Deserialize;

/// Connection settings for the hosted planning agent. When absent the
/// service runs in offline mode: chat degrades to fixed replies and plan
/// generation falls back to the deterministic template generator.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    pub url: String,
    pub api_key: String,
    pub model: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub agent: Option<AgentConfig>,
    pub max_retries: u32,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")?;

        let agent = match (std::env::var("AGENT_URL"), std::env::var("AGENT_API_KEY")) {
            (Ok(url), Ok(api_key)) => Some(AgentConfig {
                url,
                api_key,
                model: std::env::var("AGENT_MODEL")
                    .unwrap_or_else(|_| "llama3.1-70b".into()),
            }),
            _ => None,
        };

        let max_retries = std::env::var("PLAN_MAX_RETRIES")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(3);

        Ok(Self {
            database_url,
            agent,
            max_retries,
        })
    }
}
