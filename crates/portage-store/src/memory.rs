use std::collections::HashMap;

use jiff::Timestamp;
use tokio::sync::RwLock;

use portage_core::Plan;

use crate::error::StoreError;
use crate::rows::{AzMapRow, ClonedResourcesRow, PlanUpdate, StackLinkRow, TemplateRow};
use crate::store::{BoxFuture, PlanStore};

/// In-memory plan store. Backs the test suites and the dev profile; every
/// table from the durable layout has a map here.
#[derive(Default)]
pub struct MemoryStore {
    plans: RwLock<HashMap<String, Plan>>,
    templates: RwLock<HashMap<String, TemplateRow>>,
    stack_links: RwLock<Vec<StackLinkRow>>,
    cloned_resources: RwLock<Vec<ClonedResourcesRow>>,
    az_maps: RwLock<HashMap<String, AzMapRow>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }
}

impl PlanStore for MemoryStore {
    fn plan_create<'a>(&'a self, plan: &'a Plan) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let mut plans = self.plans.write().await;
            if plans.contains_key(&plan.plan_id) {
                return Err(StoreError::AlreadyExists {
                    what: "plan",
                    plan_id: plan.plan_id.clone(),
                });
            }
            plans.insert(plan.plan_id.clone(), plan.clone());
            Ok(())
        })
    }

    fn plan_get<'a>(&'a self, plan_id: &'a str) -> BoxFuture<'a, Result<Plan, StoreError>> {
        Box::pin(async move {
            self.plans
                .read()
                .await
                .get(plan_id)
                .cloned()
                .ok_or_else(|| StoreError::not_found("plan", plan_id))
        })
    }

    fn plan_list<'a>(
        &'a self,
        project_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<Plan>, StoreError>> {
        Box::pin(async move {
            let mut plans: Vec<Plan> = self
                .plans
                .read()
                .await
                .values()
                .filter(|p| project_id.is_empty() || p.project_id == project_id)
                .cloned()
                .collect();
            plans.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            Ok(plans)
        })
    }

    fn plan_update<'a>(
        &'a self,
        plan_id: &'a str,
        update: PlanUpdate,
    ) -> BoxFuture<'a, Result<Plan, StoreError>> {
        Box::pin(async move {
            let mut plans = self.plans.write().await;
            let plan = plans
                .get_mut(plan_id)
                .ok_or_else(|| StoreError::not_found("plan", plan_id))?;
            update.apply(plan, Timestamp::now());
            tracing::trace!(plan_id = %plan_id, status = %plan.plan_status, "plan row updated");
            Ok(plan.clone())
        })
    }

    fn plan_delete<'a>(&'a self, plan_id: &'a str) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            self.plans
                .write()
                .await
                .remove(plan_id)
                .map(|_| ())
                .ok_or_else(|| StoreError::not_found("plan", plan_id))
        })
    }

    fn template_put<'a>(&'a self, row: TemplateRow) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            self.templates
                .write()
                .await
                .insert(row.plan_id.clone(), row);
            Ok(())
        })
    }

    fn template_get<'a>(
        &'a self,
        plan_id: &'a str,
    ) -> BoxFuture<'a, Result<TemplateRow, StoreError>> {
        Box::pin(async move {
            self.templates
                .read()
                .await
                .get(plan_id)
                .cloned()
                .ok_or_else(|| StoreError::not_found("template", plan_id))
        })
    }

    fn template_delete<'a>(&'a self, plan_id: &'a str) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            self.templates
                .write()
                .await
                .remove(plan_id)
                .map(|_| ())
                .ok_or_else(|| StoreError::not_found("template", plan_id))
        })
    }

    fn stack_link_put<'a>(&'a self, row: StackLinkRow) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            self.stack_links.write().await.push(row);
            Ok(())
        })
    }

    fn stack_links<'a>(
        &'a self,
        plan_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<StackLinkRow>, StoreError>> {
        Box::pin(async move {
            Ok(self
                .stack_links
                .read()
                .await
                .iter()
                .filter(|row| row.plan_id == plan_id)
                .cloned()
                .collect())
        })
    }

    fn stack_links_delete<'a>(
        &'a self,
        plan_id: &'a str,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            self.stack_links
                .write()
                .await
                .retain(|row| row.plan_id != plan_id);
            Ok(())
        })
    }

    fn cloned_resources_put<'a>(
        &'a self,
        row: ClonedResourcesRow,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            self.cloned_resources.write().await.push(row);
            Ok(())
        })
    }

    fn cloned_resources_delete<'a>(
        &'a self,
        plan_id: &'a str,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            self.cloned_resources
                .write()
                .await
                .retain(|row| row.plan_id != plan_id);
            Ok(())
        })
    }

    fn az_map_put<'a>(&'a self, row: AzMapRow) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            self.az_maps.write().await.insert(row.plan_id.clone(), row);
            Ok(())
        })
    }

    fn az_map_get<'a>(&'a self, plan_id: &'a str) -> BoxFuture<'a, Result<AzMapRow, StoreError>> {
        Box::pin(async move {
            self.az_maps
                .read()
                .await
                .get(plan_id)
                .cloned()
                .ok_or_else(|| StoreError::not_found("az map", plan_id))
        })
    }

    fn az_map_delete<'a>(&'a self, plan_id: &'a str) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            self.az_maps
                .write()
                .await
                .remove(plan_id)
                .map(|_| ())
                .ok_or_else(|| StoreError::not_found("az map", plan_id))
        })
    }
}
