//! Execution endpoints. Everything here returns `202 Accepted` and hands
//! the work to the orchestrator on a detached task; clients poll the plan
//! for progress.

use std::collections::BTreeMap;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::Value;

use portage_engine::ResourceEdit;
use portage_store::AzMapRow;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct ExportCloneBody {
    #[serde(default)]
    pub sys_clone: bool,
    #[serde(default = "default_copy_data")]
    pub copy_data: bool,
}

fn default_copy_data() -> bool {
    true
}

pub async fn export_clone_template(
    State(state): State<AppState>,
    Path(plan_id): Path<String>,
    Json(body): Json<ExportCloneBody>,
) -> Result<StatusCode, ApiError> {
    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        if let Err(e) = orchestrator
            .export_clone_template(&plan_id, body.sys_clone, body.copy_data)
            .await
        {
            tracing::error!(plan_id = %plan_id, error = %e, "export clone template failed");
        }
    });
    Ok(StatusCode::ACCEPTED)
}

pub async fn export_migrate_template(
    State(state): State<AppState>,
    Path(plan_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        if let Err(e) = orchestrator.export_migrate_template(&plan_id).await {
            tracing::error!(plan_id = %plan_id, error = %e, "export migrate template failed");
        }
    });
    Ok(StatusCode::ACCEPTED)
}

/// The full clone surface. `destination`, `az_map`, `update_resources`,
/// `sys_clone` and `copy_data` drive behavior; the remaining knobs are
/// accepted and recorded with the request for API parity.
#[derive(Deserialize)]
pub struct CloneBody {
    pub clone: CloneArgs,
}

#[derive(Deserialize)]
pub struct CloneArgs {
    pub destination: String,
    #[serde(default)]
    pub az_map: BTreeMap<String, String>,
    #[serde(default)]
    pub clone_resources: Vec<Value>,
    #[serde(default)]
    pub clone_links: Vec<Value>,
    #[serde(default)]
    pub update_resources: Vec<ResourceEdit>,
    #[serde(default)]
    pub replace_resources: Vec<Value>,
    #[serde(default)]
    pub sys_clone: bool,
    #[serde(default = "default_copy_data")]
    pub copy_data: bool,
}

pub async fn clone(
    State(state): State<AppState>,
    Path(plan_id): Path<String>,
    Json(body): Json<CloneBody>,
) -> Result<StatusCode, ApiError> {
    let args = body.clone;
    if !args.update_resources.is_empty() {
        state
            .service
            .update_plan_resources(&plan_id, args.update_resources)
            .await?;
    }
    if !args.az_map.is_empty() {
        state
            .store
            .az_map_put(AzMapRow {
                plan_id: plan_id.clone(),
                az_mapper: args.az_map.clone(),
            })
            .await?;
    }
    let orchestrator = state.orchestrator.clone();
    let destination = args.destination;
    tokio::spawn(async move {
        if let Err(e) = orchestrator.clone_plan(&plan_id, &destination).await {
            tracing::error!(plan_id = %plan_id, error = %e, "clone failed");
        }
    });
    Ok(StatusCode::ACCEPTED)
}

#[derive(Deserialize)]
pub struct MigrateBody {
    pub migrate: MigrateArgs,
}

#[derive(Deserialize)]
pub struct MigrateArgs {
    pub destination: String,
}

pub async fn migrate(
    State(state): State<AppState>,
    Path(plan_id): Path<String>,
    Json(body): Json<MigrateBody>,
) -> Result<StatusCode, ApiError> {
    let orchestrator = state.orchestrator.clone();
    let destination = body.migrate.destination;
    tokio::spawn(async move {
        if let Err(e) = orchestrator.migrate(&plan_id, &destination).await {
            tracing::error!(plan_id = %plan_id, error = %e, "migrate failed");
        }
    });
    Ok(StatusCode::ACCEPTED)
}

#[derive(Deserialize)]
pub struct ExportAndCloneBody {
    pub destination: String,
    #[serde(default)]
    pub update_resources: Vec<ResourceEdit>,
    #[serde(default)]
    pub sys_clone: bool,
    #[serde(default = "default_copy_data")]
    pub copy_data: bool,
}

pub async fn export_template_and_clone(
    State(state): State<AppState>,
    Path(plan_id): Path<String>,
    Json(body): Json<ExportAndCloneBody>,
) -> Result<StatusCode, ApiError> {
    if !body.update_resources.is_empty() {
        state
            .service
            .update_plan_resources(&plan_id, body.update_resources)
            .await?;
    }
    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        if let Err(e) = orchestrator
            .export_template_and_clone(&plan_id, &body.destination, body.sys_clone, body.copy_data)
            .await
        {
            tracing::error!(plan_id = %plan_id, error = %e, "export and clone failed");
        }
    });
    Ok(StatusCode::ACCEPTED)
}

pub async fn download_template(
    State(state): State<AppState>,
    Path(plan_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let row = state.service.get_template(&plan_id).await.map_err(|e| {
        match e {
            portage_engine::EngineError::Store(inner) if inner.is_not_found() => {
                ApiError::NotFound(format!("no template stored for plan {plan_id}"))
            }
            other => other.into(),
        }
    })?;
    Ok(Json(serde_json::json!({"template": row.template})))
}
