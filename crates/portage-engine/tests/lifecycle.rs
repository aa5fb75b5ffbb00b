use std::sync::Arc;

use serde_json::{json, Map};

use portage_core::reference;
use portage_core::resource::{Resource, ResourceKind};
use portage_core::template::Template;
use portage_core::{PlanStatus, ResourceMap};
use portage_driver::{Drivers, StaticCloud};
use portage_engine::{EngineError, PlanService};
use portage_store::{MemoryStore, PlanStore};

fn service() -> (PlanService, Arc<MemoryStore>, StaticCloud) {
    let store = Arc::new(MemoryStore::new());
    let cloud = StaticCloud::new();
    let drivers = Drivers::from_static(cloud.clone());
    let service = PlanService::new(store.clone(), drivers, 60);
    (service, store, cloud)
}

fn sample_template() -> Template {
    let mut net = Resource::new("net_0", ResourceKind::Network, "net-a");
    net.set_property("name", json!("front"));
    let mut subnet = Resource::new("subnet_0", ResourceKind::Subnet, "subnet-a");
    subnet.set_property("network_id", reference::get_resource("net_0"));
    let resources: ResourceMap = [net, subnet]
        .into_iter()
        .map(|r| (r.name.clone(), r))
        .collect();
    Template::from_resources(&resources, "clone template")
}

#[tokio::test]
async fn create_rejects_unknown_plan_type() {
    let (service, _, _) = service();
    let err = service
        .create_plan("evacuate", "project", "user", None, vec![])
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::PlanTypeNotSupported { .. }));
}

#[tokio::test]
async fn import_makes_a_clone_plan_available_with_both_sides() {
    let (service, _, _) = service();
    let plan = service
        .create_plan("clone", "project", "user", None, vec![])
        .await
        .unwrap();

    let imported = service
        .import_from_template(&plan.plan_id, sample_template())
        .await
        .unwrap();

    assert_eq!(imported.plan_status, PlanStatus::Available);
    assert_eq!(imported.original_resources.len(), 2);
    assert_eq!(imported.updated_resources.len(), 2);
    assert_eq!(
        imported.updated_dependencies["subnet_0"].dependencies,
        vec!["net_0"]
    );

    // A second import finds the plan past `creating`.
    assert!(service
        .import_from_template(&plan.plan_id, sample_template())
        .await
        .is_err());
}

#[tokio::test]
async fn import_failure_lands_the_plan_in_error() {
    let (service, store, _) = service();
    let plan = service
        .create_plan("clone", "project", "user", None, vec![])
        .await
        .unwrap();

    // Two resources referencing each other: the import must fail.
    let mut a = Resource::new("a", ResourceKind::Network, "a-id");
    a.set_property("peer", reference::get_resource("b"));
    let mut b = Resource::new("b", ResourceKind::Subnet, "b-id");
    b.set_property("peer", reference::get_resource("a"));
    let resources: ResourceMap = [a, b].into_iter().map(|r| (r.name.clone(), r)).collect();
    let template = Template::from_resources(&resources, "broken");

    let err = service
        .import_from_template(&plan.plan_id, template)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::PlanCreateFailed(_)));
    let stored = store.plan_get(&plan.plan_id).await.unwrap();
    assert_eq!(stored.plan_status, PlanStatus::Error);
}

#[tokio::test]
async fn update_whitelist_is_enforced() {
    let (service, store, _) = service();
    let plan = service
        .create_plan("clone", "project", "user", None, vec![])
        .await
        .unwrap();

    let mut values = Map::new();
    values.insert("project_id".to_string(), json!("other"));
    assert!(matches!(
        service.update_plan(&plan.plan_id, values).await.unwrap_err(),
        EngineError::PlanUpdateError(_)
    ));

    let mut values = Map::new();
    values.insert("plan_status".to_string(), json!("napping"));
    assert!(matches!(
        service.update_plan(&plan.plan_id, values).await.unwrap_err(),
        EngineError::PlanUpdateError(_)
    ));

    let mut values = Map::new();
    values.insert("task_status".to_string(), json!("server_0: CREATE_COMPLETE"));
    values.insert("stack_id".to_string(), json!("stack-9"));
    service.update_plan(&plan.plan_id, values).await.unwrap();

    let stored = store.plan_get(&plan.plan_id).await.unwrap();
    assert_eq!(stored.task_status, "server_0: CREATE_COMPLETE");
    assert_eq!(stored.stack_id.as_deref(), Some("stack-9"));
}

#[tokio::test]
async fn reset_state_respects_the_automaton() {
    let (service, store, _) = service();
    let plan = service
        .create_plan("clone", "project", "user", None, vec![])
        .await
        .unwrap();

    // Any state may be forced to error.
    service
        .reset_plan_status(&plan.plan_id, PlanStatus::Error)
        .await
        .unwrap();
    assert_eq!(
        store.plan_get(&plan.plan_id).await.unwrap().plan_status,
        PlanStatus::Error
    );

    // But not to an arbitrary forward state.
    assert!(service
        .reset_plan_status(&plan.plan_id, PlanStatus::Finished)
        .await
        .is_err());
}

#[tokio::test]
async fn delete_clears_rows_and_requires_a_deletable_status() {
    let (service, store, cloud) = service();
    let plan = service
        .create_plan("clone", "project", "user", None, vec![])
        .await
        .unwrap();

    // Still `creating`: refuse.
    assert!(service.delete_plan(&plan.plan_id).await.is_err());

    service
        .import_from_template(&plan.plan_id, sample_template())
        .await
        .unwrap();

    // Give it a stack link so delete has something to clear.
    let stack = {
        use portage_driver::StackEngine;
        cloud
            .create_stack(portage_driver::types::CreateStackRequest {
                stack_name: "stack-x".to_string(),
                template: json!({"resources": {}}).to_string(),
                files: Default::default(),
                disable_rollback: true,
            })
            .await
            .unwrap()
    };
    store
        .stack_link_put(portage_store::StackLinkRow {
            plan_id: plan.plan_id.clone(),
            stack_id: stack.id.clone(),
        })
        .await
        .unwrap();

    service.delete_plan(&plan.plan_id).await.unwrap();

    assert!(store.plan_get(&plan.plan_id).await.unwrap_err().is_not_found());
    assert!(cloud.deleted_stacks().contains(&stack.id));
    assert!(store.stack_links(&plan.plan_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn force_delete_tolerates_missing_rows() {
    let (service, _, _) = service();
    service.force_delete_plan("never-existed").await.unwrap();
}

#[tokio::test]
async fn migrate_plans_refuse_resource_edits() {
    let (service, _, _) = service();
    let plan = service
        .create_plan("migrate", "project", "user", None, vec![])
        .await
        .unwrap();
    service
        .import_from_template(&plan.plan_id, sample_template())
        .await
        .unwrap();

    let err = service
        .update_plan_resources(&plan.plan_id, vec![])
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::PlanResourcesUpdateError(_)));
}

#[tokio::test]
async fn concurrent_updates_serialize_per_plan() {
    let (service, store, _) = service();
    let service = Arc::new(service);
    let plan = service
        .create_plan("clone", "project", "user", None, vec![])
        .await
        .unwrap();

    let mut handles = Vec::new();
    for i in 0..8 {
        let service = service.clone();
        let plan_id = plan.plan_id.clone();
        handles.push(tokio::spawn(async move {
            let mut values = Map::new();
            values.insert("task_status".to_string(), json!(format!("step-{i}")));
            service.update_plan(&plan_id, values).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    // Every write won some serial position; the final value is one of them.
    let stored = store.plan_get(&plan.plan_id).await.unwrap();
    assert!(stored.task_status.starts_with("step-"));
}
