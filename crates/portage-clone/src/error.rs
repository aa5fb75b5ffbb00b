use thiserror::Error;

use portage_core::CoreError;
use portage_driver::DriverError;
use portage_engine::EngineError;
use portage_store::StoreError;

#[derive(Debug, Error)]
pub enum CloneError {
    #[error("plan {plan_id} not found")]
    PlanNotFound { plan_id: String },

    #[error("deploying plan {plan_id} failed: {msg}")]
    PlanDeployError { plan_id: String, msg: String },

    #[error("cloning plan {plan_id} failed: {msg}")]
    PlanCloneFailed { plan_id: String, msg: String },

    #[error("migrating plan {plan_id} failed: {msg}")]
    PlanMigrateFailed { plan_id: String, msg: String },

    #[error("exporting template for plan {plan_id} failed: {msg}")]
    ExportTemplateFailed { plan_id: String, msg: String },

    #[error("downloading template for plan {plan_id} failed: {msg}")]
    DownloadTemplateFailed { plan_id: String, msg: String },

    #[error("availability zone missing for server {server_id}")]
    AvailabilityZoneNotFound { server_id: String },

    #[error("no migrate network available for server {server_id}")]
    NoMigrateNetProvided { server_id: String },

    #[error("gateway service error: {0}")]
    V2v(String),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("driver error: {0}")]
    Driver(#[from] DriverError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for CloneError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound {
                what: "plan",
                plan_id,
            } => CloneError::PlanNotFound { plan_id },
            other => CloneError::Store(other),
        }
    }
}
