use std::collections::BTreeMap;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use portage_core::plan::{Plan, ResourceSet};
use portage_core::{PlanStatus, ResourceMap, Template};

/// Whitelisted field updates applied to a stored plan. Absent fields are
/// left alone; writes are last-writer-wins per field.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_status: Option<PlanStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_resources: Option<ResourceMap>,
    /// Engine-internal: written once at template import, never exposed on
    /// the public update surface.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_resources: Option<ResourceMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sys_clone: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copy_data: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expire_at: Option<Timestamp>,
}

impl PlanUpdate {
    pub fn status(status: PlanStatus) -> Self {
        PlanUpdate {
            plan_status: Some(status),
            ..PlanUpdate::default()
        }
    }

    pub fn task(task_status: impl Into<String>) -> Self {
        PlanUpdate {
            task_status: Some(task_status.into()),
            ..PlanUpdate::default()
        }
    }

    /// Apply onto a plan. Writing `updated_resources` recomputes the
    /// dependency view and bumps `updated_at`.
    pub fn apply(self, plan: &mut Plan, now: Timestamp) {
        if let Some(task_status) = self.task_status {
            plan.task_status = task_status;
        }
        if let Some(plan_status) = self.plan_status {
            plan.plan_status = plan_status;
        }
        if let Some(stack_id) = self.stack_id {
            plan.stack_id = Some(stack_id);
        }
        if let Some(sys_clone) = self.sys_clone {
            plan.sys_clone = sys_clone;
        }
        if let Some(copy_data) = self.copy_data {
            plan.copy_data = copy_data;
        }
        if let Some(expire_at) = self.expire_at {
            plan.expire_at = expire_at;
        }
        if let Some(resources) = self.original_resources {
            plan.original_resources = resources;
            plan.original_dependencies.clear();
            plan.rebuild_dependencies(ResourceSet::Original);
        }
        if let Some(resources) = self.updated_resources {
            plan.updated_resources = resources;
            plan.updated_dependencies.clear();
            plan.rebuild_dependencies(ResourceSet::Updated);
            plan.updated_at = now;
        }
    }
}

/// `plan_template` row: the rendered template of a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateRow {
    pub plan_id: String,
    pub template: Template,
}

/// `plan_stack` row: linkage between a plan and a deployed stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackLinkRow {
    pub plan_id: String,
    pub stack_id: String,
}

/// `plan_cloned_resources` row: source→target relations written after a
/// successful clone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClonedResourcesRow {
    pub plan_id: String,
    pub destination: String,
    pub relation: Value,
    pub dependencies: Value,
}

/// `plan_availability_zone_mapper` row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AzMapRow {
    pub plan_id: String,
    pub az_mapper: BTreeMap<String, String>,
}
