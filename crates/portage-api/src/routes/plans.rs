use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{Map, Value};

use portage_core::plan::{Plan, ResourceSelection};
use portage_core::{PlanStatus, Template};
use portage_engine::ResourceEdit;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct CreatePlanBody {
    pub plan: CreatePlanArgs,
}

#[derive(Deserialize)]
pub struct CreatePlanArgs {
    #[serde(rename = "type")]
    pub plan_type: String,
    pub project_id: String,
    pub user_id: String,
    #[serde(default)]
    pub plan_name: Option<String>,
    #[serde(default)]
    pub resources: Vec<ResourceSelection>,
    /// Importing a template builds the plan's resource graph immediately.
    #[serde(default)]
    pub template: Option<Template>,
}

pub async fn create_plan(
    State(state): State<AppState>,
    Json(body): Json<CreatePlanBody>,
) -> Result<Json<Plan>, ApiError> {
    let args = body.plan;
    let plan = state
        .service
        .create_plan(
            &args.plan_type,
            &args.project_id,
            &args.user_id,
            args.plan_name,
            args.resources,
        )
        .await?;
    let plan = match args.template {
        Some(template) => {
            state
                .service
                .import_from_template(&plan.plan_id, template)
                .await?
        }
        None => plan,
    };
    Ok(Json(plan))
}

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub project_id: String,
}

pub async fn list_plans(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Plan>>, ApiError> {
    Ok(Json(state.service.list_plans(&query.project_id).await?))
}

#[derive(Deserialize)]
pub struct ShowQuery {
    #[serde(default = "default_detail")]
    pub detail: bool,
}

fn default_detail() -> bool {
    true
}

pub async fn show_plan(
    State(state): State<AppState>,
    Path(plan_id): Path<String>,
    Query(query): Query<ShowQuery>,
) -> Result<Json<Plan>, ApiError> {
    Ok(Json(state.service.get_plan(&plan_id, query.detail).await?))
}

#[derive(Deserialize)]
pub struct UpdatePlanBody {
    pub plan: Map<String, Value>,
}

pub async fn update_plan(
    State(state): State<AppState>,
    Path(plan_id): Path<String>,
    Json(body): Json<UpdatePlanBody>,
) -> Result<Json<Plan>, ApiError> {
    state.service.update_plan(&plan_id, body.plan).await?;
    Ok(Json(state.service.get_plan(&plan_id, false).await?))
}

pub async fn delete_plan(
    State(state): State<AppState>,
    Path(plan_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.service.delete_plan(&plan_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn force_delete_plan(
    State(state): State<AppState>,
    Path(plan_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.service.force_delete_plan(&plan_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct ResetStateArgs {
    pub plan_status: PlanStatus,
}

#[derive(Deserialize)]
pub struct DeleteResourcesArgs {
    pub resources: Vec<ResourceEdit>,
}

/// The `action` sub-resource: a single-key body selects the verb.
#[derive(Deserialize)]
pub struct ActionBody {
    #[serde(default)]
    pub download_template: Option<Value>,
    #[serde(rename = "os-reset_state", default)]
    pub reset_state: Option<ResetStateArgs>,
    #[serde(rename = "plan-delete-resource", default)]
    pub delete_resource: Option<DeleteResourcesArgs>,
}

pub async fn plan_action(
    State(state): State<AppState>,
    Path(plan_id): Path<String>,
    Json(body): Json<ActionBody>,
) -> Result<Json<Value>, ApiError> {
    if body.download_template.is_some() {
        let row = state.service.get_template(&plan_id).await?;
        return Ok(Json(serde_json::to_value(row.template)?));
    }
    if let Some(args) = body.reset_state {
        // A forced error first cancels any in-flight watchers; the
        // orchestration call holds the plan lock until they wind down.
        if args.plan_status == PlanStatus::Error {
            state.orchestrator.abort(&plan_id);
        }
        state
            .service
            .reset_plan_status(&plan_id, args.plan_status)
            .await?;
        return Ok(Json(Value::Null));
    }
    if let Some(args) = body.delete_resource {
        state
            .service
            .update_plan_resources(&plan_id, args.resources)
            .await?;
        return Ok(Json(Value::Null));
    }
    Err(ApiError::BadRequest("unsupported plan action".to_string()))
}

#[derive(Deserialize)]
pub struct UpdateResourcesBody {
    pub resources: Vec<ResourceEdit>,
}

pub async fn update_plan_resources(
    State(state): State<AppState>,
    Path(plan_id): Path<String>,
    Json(body): Json<UpdateResourcesBody>,
) -> Result<Json<Plan>, ApiError> {
    let plan = state
        .service
        .update_plan_resources(&plan_id, body.resources)
        .await?;
    Ok(Json(plan))
}
