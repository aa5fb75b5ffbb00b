use thiserror::Error;

use portage_core::CoreError;
use portage_driver::DriverError;
use portage_store::StoreError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("plan {plan_id} not found")]
    PlanNotFound { plan_id: String },

    #[error("plan type must be 'clone' or 'migrate', got '{plan_type}'")]
    PlanTypeNotSupported { plan_type: String },

    #[error("plan creation failed: {0}")]
    PlanCreateFailed(String),

    #[error("plan update failed: {0}")]
    PlanUpdateError(String),

    #[error("plan resources update failed: {0}")]
    PlanResourcesUpdateError(String),

    #[error("resource {0} not found")]
    ResourceNotFound(String),

    #[error("store error: {0}")]
    Store(StoreError),

    #[error("driver error: {0}")]
    Driver(#[from] DriverError),

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl EngineError {
    pub fn resources(msg: impl Into<String>) -> Self {
        EngineError::PlanResourcesUpdateError(msg.into())
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound {
                what: "plan",
                plan_id,
            } => EngineError::PlanNotFound { plan_id },
            other => EngineError::Store(other),
        }
    }
}
