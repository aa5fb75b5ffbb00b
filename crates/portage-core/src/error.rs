use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid template: {0}")]
    InvalidTemplate(String),

    #[error("dependency cycle through resources: {}", names.join(", "))]
    DependencyCycle { names: Vec<String> },

    #[error("unsupported plan status: {0}")]
    UnknownStatus(String),

    #[error("unsupported plan type: {0}")]
    UnknownPlanType(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
