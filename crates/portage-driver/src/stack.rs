use crate::error::DriverError;
use crate::types::{
    CreateStackRequest, ResourceTypeSchema, StackEvent, StackInfo, StackResource,
};
use crate::BoxFuture;

/// The orchestration back-end that instantiates templates.
pub trait StackEngine: Send + Sync {
    fn create_stack<'a>(
        &'a self,
        request: CreateStackRequest,
    ) -> BoxFuture<'a, Result<StackInfo, DriverError>>;

    fn get_stack<'a>(&'a self, stack_id: &'a str) -> BoxFuture<'a, Result<StackInfo, DriverError>>;

    fn delete_stack<'a>(&'a self, stack_id: &'a str) -> BoxFuture<'a, Result<(), DriverError>>;

    /// Resolve a template-local resource name to its physical id.
    fn get_resource<'a>(
        &'a self,
        stack_id: &'a str,
        resource_name: &'a str,
    ) -> BoxFuture<'a, Result<StackResource, DriverError>>;

    /// Property schema for a resource type tag.
    fn get_resource_type<'a>(
        &'a self,
        type_tag: &'a str,
    ) -> BoxFuture<'a, Result<ResourceTypeSchema, DriverError>>;

    /// Stack events, newest first.
    fn events_list<'a>(
        &'a self,
        stack_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<StackEvent>, DriverError>>;
}
