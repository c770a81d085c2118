use thiserror::Error;

/// Failure taxonomy for the generation workflow. Extraction and
/// validation failures are recovered by the mock fallback, agent
/// failures mean "agent unavailable", persistence failures go through
/// the bounded retry loop before being recorded.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("agent output could not be parsed")]
    Extraction,

    #[error("plan failed structural validation")]
    Validation,

    #[error("agent unavailable: {0}")]
    Agent(String),

    #[error("user data unavailable: {0}")]
    Aggregate(String),

    #[error("persistence failed: {0}")]
    Persistence(#[from] sqlx::Error),
}

impl PlanError {
    /// Workflow stage a failure is attributed to in run reports.
    pub fn stage(&self) -> &'static str {
        match self {
            PlanError::Extraction | PlanError::Validation | PlanError::Agent(_) => "generate_plan",
            PlanError::Aggregate(_) => "aggregate_data",
            PlanError::Persistence(_) => "persist_plan",
        }
    }
}
