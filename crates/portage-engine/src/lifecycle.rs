//! Plan lifecycle: create, import, read, update, delete. Every mutation
//! runs under the per-plan lock; reads are lock-free snapshots.

use std::str::FromStr;
use std::sync::Arc;

use jiff::Timestamp;
use serde_json::{Map, Value};

use portage_core::plan::{Plan, ResourceSelection};
use portage_core::{PlanStatus, PlanType, Template};
use portage_driver::Drivers;
use portage_store::{PlanStore, PlanUpdate, TemplateRow};

use crate::error::EngineError;
use crate::locks::PlanLocks;
use crate::mutation::{self, ResourceEdit};

const UPDATE_WHITELIST: [&str; 6] = [
    "task_status",
    "plan_status",
    "stack_id",
    "updated_resources",
    "sys_clone",
    "copy_data",
];

pub struct PlanService {
    store: Arc<dyn PlanStore>,
    drivers: Drivers,
    locks: PlanLocks,
    expire_minutes: i64,
}

impl PlanService {
    pub fn new(store: Arc<dyn PlanStore>, drivers: Drivers, expire_minutes: i64) -> Self {
        PlanService {
            store,
            drivers,
            locks: PlanLocks::new(),
            expire_minutes,
        }
    }

    pub fn store(&self) -> &Arc<dyn PlanStore> {
        &self.store
    }

    /// The lock registry, shared with the orchestrator so clone/migrate
    /// serialize against plan edits.
    pub fn locks(&self) -> PlanLocks {
        self.locks.clone()
    }

    /// Allocate and persist a plan in `creating`.
    pub async fn create_plan(
        &self,
        plan_type: &str,
        project_id: &str,
        user_id: &str,
        plan_name: Option<String>,
        clone_resources: Vec<ResourceSelection>,
    ) -> Result<Plan, EngineError> {
        let plan_type =
            PlanType::from_str(plan_type).map_err(|_| EngineError::PlanTypeNotSupported {
                plan_type: plan_type.to_string(),
            })?;
        let mut plan = Plan::new(
            plan_type,
            project_id,
            user_id,
            plan_name,
            self.expire_minutes,
            Timestamp::now(),
        );
        plan.clone_resources = clone_resources;
        self.store
            .plan_create(&plan)
            .await
            .map_err(|e| EngineError::PlanCreateFailed(e.to_string()))?;
        tracing::info!(plan_id = %plan.plan_id, plan_type = %plan_type, "plan created");
        Ok(plan)
    }

    /// Parse a template into the plan's resource graph and make the plan
    /// available. On any failure the plan lands in `error`.
    pub async fn import_from_template(
        &self,
        plan_id: &str,
        template: Template,
    ) -> Result<Plan, EngineError> {
        let _guard = self.locks.acquire(plan_id).await;
        let plan = self.store.plan_get(plan_id).await?;
        if plan.plan_status != PlanStatus::Creating {
            return Err(EngineError::PlanCreateFailed(format!(
                "plan {plan_id} is not awaiting import (status {})",
                plan.plan_status
            )));
        }

        match self.build_from_template(&plan, template).await {
            Ok(plan) => {
                tracing::info!(plan_id = %plan_id, "plan built from template");
                Ok(plan)
            }
            Err(e) => {
                tracing::error!(plan_id = %plan_id, error = %e, "template import failed");
                let _ = self
                    .store
                    .plan_update(plan_id, PlanUpdate::status(PlanStatus::Error))
                    .await;
                Err(EngineError::PlanCreateFailed(e.to_string()))
            }
        }
    }

    async fn build_from_template(
        &self,
        plan: &Plan,
        template: Template,
    ) -> Result<Plan, EngineError> {
        let resources = template.into_resources()?;
        Plan::check_acyclic(&resources)?;

        // Migrate plans carry the same map on both sides; the mutation
        // engine refuses to touch them, so the two never diverge.
        let update = PlanUpdate {
            plan_status: Some(PlanStatus::Available),
            original_resources: Some(resources.clone()),
            updated_resources: Some(resources),
            ..PlanUpdate::default()
        };
        Ok(self.store.plan_update(&plan.plan_id, update).await?)
    }

    pub async fn get_plan(&self, plan_id: &str, detail: bool) -> Result<Plan, EngineError> {
        let plan = self.store.plan_get(plan_id).await?;
        Ok(if detail {
            plan
        } else {
            plan.without_resources()
        })
    }

    pub async fn list_plans(&self, project_id: &str) -> Result<Vec<Plan>, EngineError> {
        Ok(self
            .store
            .plan_list(project_id)
            .await?
            .into_iter()
            .map(|p| p.without_resources())
            .collect())
    }

    /// Whitelisted field update. Unknown keys and unknown
    /// status values are rejected before anything is written.
    pub async fn update_plan(
        &self,
        plan_id: &str,
        values: Map<String, Value>,
    ) -> Result<(), EngineError> {
        for (key, value) in &values {
            if !UPDATE_WHITELIST.contains(&key.as_str()) {
                return Err(EngineError::PlanUpdateError(format!(
                    "{key} field not found or unsupported to update"
                )));
            }
            if key == "plan_status" {
                let status = value.as_str().unwrap_or_default();
                PlanStatus::from_str(status).map_err(|_| {
                    EngineError::PlanUpdateError(format!("'{status}' plan_status unsupported"))
                })?;
            }
        }
        let update: PlanUpdate = serde_json::from_value(Value::Object(values))
            .map_err(|e| EngineError::PlanUpdateError(e.to_string()))?;

        let _guard = self.locks.acquire(plan_id).await;
        self.store.plan_update(plan_id, update).await?;
        tracing::info!(plan_id = %plan_id, "plan updated");
        Ok(())
    }

    /// Force a status transition (the `os-reset_state` action). Only legal
    /// edges are accepted; `error` is reachable from everywhere.
    pub async fn reset_plan_status(
        &self,
        plan_id: &str,
        status: PlanStatus,
    ) -> Result<(), EngineError> {
        let _guard = self.locks.acquire(plan_id).await;
        let plan = self.store.plan_get(plan_id).await?;
        if !plan.plan_status.can_transition(status) {
            return Err(EngineError::PlanUpdateError(format!(
                "cannot move plan from {} to {status}",
                plan.plan_status
            )));
        }
        self.store
            .plan_update(plan_id, PlanUpdate::status(status))
            .await?;
        Ok(())
    }

    /// Apply a list of resource edits to an available clone plan.
    pub async fn update_plan_resources(
        &self,
        plan_id: &str,
        edits: Vec<ResourceEdit>,
    ) -> Result<Plan, EngineError> {
        let _guard = self.locks.acquire(plan_id).await;
        let mut plan = self.store.plan_get(plan_id).await?;
        if plan.plan_status != PlanStatus::Available {
            return Err(EngineError::resources(format!(
                "plan {plan_id} is not available for edits (status {})",
                plan.plan_status
            )));
        }
        if plan.plan_type == PlanType::Migrate {
            return Err(EngineError::resources(
                "resources of a migrate plan are not allowed to be modified",
            ));
        }

        mutation::apply_edits(&self.drivers, &mut plan, edits).await?;

        let update = PlanUpdate {
            updated_resources: Some(plan.updated_resources.clone()),
            ..PlanUpdate::default()
        };
        let stored = self.store.plan_update(plan_id, update).await?;
        tracing::info!(plan_id = %plan_id, "plan resources updated");
        Ok(stored)
    }

    /// Delete an available or errored plan: stack, template, cloned
    /// resources and AZ map rows go first, then the plan row.
    pub async fn delete_plan(&self, plan_id: &str) -> Result<(), EngineError> {
        let _guard = self.locks.acquire(plan_id).await;
        let plan = self.store.plan_get(plan_id).await?;
        if !plan.is_mutable() {
            return Err(EngineError::PlanUpdateError(format!(
                "plan {plan_id} can only be deleted while available or in error (status {})",
                plan.plan_status
            )));
        }
        self.store
            .plan_update(plan_id, PlanUpdate::status(PlanStatus::Deleting))
            .await?;
        self.clear_associations(plan_id, plan.stack_id.as_deref())
            .await?;
        self.store.plan_delete(plan_id).await?;
        tracing::info!(plan_id = %plan_id, "plan deleted");
        Ok(())
    }

    /// Delete regardless of status, tolerating rows that never existed.
    pub async fn force_delete_plan(&self, plan_id: &str) -> Result<(), EngineError> {
        let _guard = self.locks.acquire(plan_id).await;
        match self.store.plan_get(plan_id).await {
            Ok(plan) => {
                self.clear_associations(plan_id, plan.stack_id.as_deref())
                    .await?;
                self.store.plan_delete(plan_id).await?;
            }
            Err(e) if e.is_not_found() => {
                tracing::warn!(plan_id = %plan_id, "force delete of a missing plan");
                self.clear_associations(plan_id, None).await?;
            }
            Err(e) => return Err(e.into()),
        }
        tracing::info!(plan_id = %plan_id, "plan force deleted");
        Ok(())
    }

    /// Drop everything hanging off a plan row. Deployed stacks are deleted
    /// through the stack engine; missing rows only warn.
    async fn clear_associations(
        &self,
        plan_id: &str,
        plan_stack_id: Option<&str>,
    ) -> Result<(), EngineError> {
        let mut stack_ids: Vec<String> = self
            .store
            .stack_links(plan_id)
            .await?
            .into_iter()
            .map(|row| row.stack_id)
            .collect();
        if let Some(stack_id) = plan_stack_id {
            if !stack_ids.iter().any(|s| s == stack_id) {
                stack_ids.push(stack_id.to_string());
            }
        }
        for stack_id in stack_ids {
            match self.drivers.stack.delete_stack(&stack_id).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    tracing::warn!(plan_id = %plan_id, stack_id = %stack_id, "stack already gone");
                }
                Err(e) => return Err(e.into()),
            }
        }
        self.store.stack_links_delete(plan_id).await?;

        match self.store.template_delete(plan_id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                tracing::warn!(plan_id = %plan_id, "plan has no template");
            }
            Err(e) => return Err(e.into()),
        }
        self.store.cloned_resources_delete(plan_id).await?;
        match self.store.az_map_delete(plan_id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                tracing::warn!(plan_id = %plan_id, "plan has no az map");
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    /// Stored template for a plan (the `download_template` surface).
    pub async fn get_template(&self, plan_id: &str) -> Result<TemplateRow, EngineError> {
        Ok(self.store.template_get(plan_id).await?)
    }
}
