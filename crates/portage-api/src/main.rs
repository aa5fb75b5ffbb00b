use std::sync::Arc;

use axum::routing::{delete, get, post, put};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::EnvFilter;

use portage_clone::CloneOrchestrator;
use portage_driver::{Drivers, Gateway, VgwAllocator};
use portage_engine::PlanService;
use portage_store::MemoryStore;

mod config;
mod error;
mod routes;
mod state;

use config::Config;
use state::AppState;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let config = Config::from_env();

    // The durable row store and the real cloud adapters live out of tree;
    // the dev profile runs against the in-memory store and the scripted
    // static cloud.
    let store = Arc::new(MemoryStore::new());
    let drivers = Drivers::from_config(&config.clone_driver)
        .map_err(|e| eyre::eyre!("driver setup failed: {e}"))?;

    let vgw = Arc::new(VgwAllocator::new());
    for (az, id, ip) in &config.vgw_pool {
        vgw.register(
            az.clone(),
            Gateway {
                id: id.clone(),
                ip: ip.clone(),
            },
        );
    }

    let service = Arc::new(PlanService::new(
        store.clone(),
        drivers.clone(),
        config.plan_expire_time,
    ));
    let orchestrator = Arc::new(CloneOrchestrator::new(
        store.clone(),
        drivers,
        vgw,
        service.locks(),
        config.clone.clone(),
    ));

    let state = AppState {
        service,
        orchestrator,
        store,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        // Plans
        .route("/v1/plans", post(routes::plans::create_plan))
        .route("/v1/plans", get(routes::plans::list_plans))
        .route("/v1/plans/{id}", get(routes::plans::show_plan))
        .route("/v1/plans/{id}", put(routes::plans::update_plan))
        .route("/v1/plans/{id}", delete(routes::plans::delete_plan))
        .route(
            "/v1/plans/{id}/force-delete",
            post(routes::plans::force_delete_plan),
        )
        .route("/v1/plans/{id}/action", post(routes::plans::plan_action))
        .route(
            "/v1/plans/{id}/resources",
            post(routes::plans::update_plan_resources),
        )
        // Clone / migrate execution
        .route(
            "/v1/plans/{id}/export_clone_template",
            post(routes::clone::export_clone_template),
        )
        .route(
            "/v1/plans/{id}/export_migrate_template",
            post(routes::clone::export_migrate_template),
        )
        .route("/v1/plans/{id}/clone", post(routes::clone::clone))
        .route("/v1/plans/{id}/migrate", post(routes::clone::migrate))
        .route(
            "/v1/plans/{id}/export_template_and_clone",
            post(routes::clone::export_template_and_clone),
        )
        .route(
            "/v1/plans/{id}/template",
            get(routes::clone::download_template),
        )
        .layer(cors)
        .with_state(state);

    tracing::info!(addr = %config.listen_addr, "portage api listening");
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
