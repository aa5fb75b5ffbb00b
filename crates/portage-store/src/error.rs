use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{what} not found for plan {plan_id}")]
    NotFound {
        what: &'static str,
        plan_id: String,
    },

    #[error("{what} already exists for plan {plan_id}")]
    AlreadyExists {
        what: &'static str,
        plan_id: String,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn not_found(what: &'static str, plan_id: impl Into<String>) -> Self {
        StoreError::NotFound {
            what,
            plan_id: plan_id.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}
