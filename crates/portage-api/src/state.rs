use std::sync::Arc;

use portage_clone::CloneOrchestrator;
use portage_engine::PlanService;
use portage_store::PlanStore;

/// Shared application state, injected into all route handlers via Axum
/// state.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<PlanService>,
    pub orchestrator: Arc<CloneOrchestrator>,
    pub store: Arc<dyn PlanStore>,
}
