//! portage-engine
//!
//! Plan lifecycle manager and mutation engine: status transitions, template
//! import, whitelisted updates, and the add/edit/delete semantics over the
//! resource graph. Mutations on one plan serialize through [`PlanLocks`].

pub mod error;
pub mod extract;
pub mod lifecycle;
pub mod locks;
pub mod mutation;
pub mod validate;

pub use crate::error::EngineError;
pub use crate::lifecycle::PlanService;
pub use crate::locks::{PlanGuard, PlanLocks};
pub use crate::mutation::{EditAction, ResourceEdit};
