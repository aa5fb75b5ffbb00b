//! portage-core
//!
//! Shared object model for the plan engine: typed resources, the plan record
//! with its dependency graph, plan/stack status automata, and the template
//! format resources deploy from.

pub mod error;
pub mod plan;
pub mod reference;
pub mod resource;
pub mod status;
pub mod template;

pub use crate::error::CoreError;
pub use crate::plan::{
    DependencyMap, Plan, ResourceDependency, ResourceMap, ResourceSelection, ResourceSet,
};
pub use crate::resource::{ExtraProperties, ParamSpec, Resource, ResourceKind};
pub use crate::status::{PlanStatus, PlanType, StackStatus};
pub use crate::template::{FilesMap, Template, TemplateResource, TemplateType};
