use std::future::Future;
use std::pin::Pin;

use portage_core::Plan;

use crate::error::StoreError;
use crate::rows::{AzMapRow, ClonedResourcesRow, PlanUpdate, StackLinkRow, TemplateRow};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Facade in front of the durable store. The engine never touches row I/O
/// directly; a production implementation maps these onto the plan tables,
/// the in-memory implementation backs tests and the dev profile.
pub trait PlanStore: Send + Sync {
    fn plan_create<'a>(&'a self, plan: &'a Plan) -> BoxFuture<'a, Result<(), StoreError>>;

    fn plan_get<'a>(&'a self, plan_id: &'a str) -> BoxFuture<'a, Result<Plan, StoreError>>;

    fn plan_list<'a>(&'a self, project_id: &'a str) -> BoxFuture<'a, Result<Vec<Plan>, StoreError>>;

    /// Apply a whitelisted field update; returns the stored plan after the
    /// write.
    fn plan_update<'a>(
        &'a self,
        plan_id: &'a str,
        update: PlanUpdate,
    ) -> BoxFuture<'a, Result<Plan, StoreError>>;

    fn plan_delete<'a>(&'a self, plan_id: &'a str) -> BoxFuture<'a, Result<(), StoreError>>;

    fn template_put<'a>(&'a self, row: TemplateRow) -> BoxFuture<'a, Result<(), StoreError>>;

    fn template_get<'a>(
        &'a self,
        plan_id: &'a str,
    ) -> BoxFuture<'a, Result<TemplateRow, StoreError>>;

    fn template_delete<'a>(&'a self, plan_id: &'a str) -> BoxFuture<'a, Result<(), StoreError>>;

    fn stack_link_put<'a>(&'a self, row: StackLinkRow) -> BoxFuture<'a, Result<(), StoreError>>;

    fn stack_links<'a>(
        &'a self,
        plan_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<StackLinkRow>, StoreError>>;

    fn stack_links_delete<'a>(&'a self, plan_id: &'a str)
        -> BoxFuture<'a, Result<(), StoreError>>;

    fn cloned_resources_put<'a>(
        &'a self,
        row: ClonedResourcesRow,
    ) -> BoxFuture<'a, Result<(), StoreError>>;

    fn cloned_resources_delete<'a>(
        &'a self,
        plan_id: &'a str,
    ) -> BoxFuture<'a, Result<(), StoreError>>;

    fn az_map_put<'a>(&'a self, row: AzMapRow) -> BoxFuture<'a, Result<(), StoreError>>;

    fn az_map_get<'a>(&'a self, plan_id: &'a str) -> BoxFuture<'a, Result<AzMapRow, StoreError>>;

    fn az_map_delete<'a>(&'a self, plan_id: &'a str) -> BoxFuture<'a, Result<(), StoreError>>;
}
