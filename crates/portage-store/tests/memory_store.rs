use jiff::Timestamp;
use portage_core::plan::Plan;
use portage_core::reference;
use portage_core::resource::{Resource, ResourceKind};
use portage_core::{PlanStatus, PlanType};
use portage_store::{MemoryStore, PlanStore, PlanUpdate, StackLinkRow, TemplateRow};

fn sample_plan() -> Plan {
    Plan::new(
        PlanType::Clone,
        "project-1",
        "user-1",
        Some("front-tier".to_string()),
        60,
        Timestamp::UNIX_EPOCH,
    )
}

#[tokio::test]
async fn create_then_get_round_trips() {
    let store = MemoryStore::new();
    let plan = sample_plan();
    store.plan_create(&plan).await.unwrap();

    let loaded = store.plan_get(&plan.plan_id).await.unwrap();
    assert_eq!(loaded.plan_name, "front-tier");
    assert_eq!(loaded.plan_status, PlanStatus::Creating);

    assert!(store.plan_get("missing").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn duplicate_create_is_rejected() {
    let store = MemoryStore::new();
    let plan = sample_plan();
    store.plan_create(&plan).await.unwrap();
    assert!(store.plan_create(&plan).await.is_err());
}

#[tokio::test]
async fn update_rebuilds_dependencies_on_resource_write() {
    let store = MemoryStore::new();
    let plan = sample_plan();
    store.plan_create(&plan).await.unwrap();

    let mut net = Resource::new("net_0", ResourceKind::Network, "net-id");
    net.set_property("name", serde_json::json!("front"));
    let mut subnet = Resource::new("subnet_0", ResourceKind::Subnet, "subnet-id");
    subnet.set_property("network_id", reference::get_resource("net_0"));
    let resources = [net, subnet]
        .into_iter()
        .map(|r| (r.name.clone(), r))
        .collect();

    let update = PlanUpdate {
        updated_resources: Some(resources),
        plan_status: Some(PlanStatus::Available),
        ..PlanUpdate::default()
    };
    let stored = store.plan_update(&plan.plan_id, update).await.unwrap();

    assert_eq!(stored.plan_status, PlanStatus::Available);
    assert_eq!(
        stored.updated_dependencies["subnet_0"].dependencies,
        vec!["net_0"]
    );
    assert!(stored.updated_at > plan.updated_at);
}

#[tokio::test]
async fn rows_are_scoped_per_plan() {
    let store = MemoryStore::new();
    let plan = sample_plan();
    store.plan_create(&plan).await.unwrap();

    store
        .template_put(TemplateRow {
            plan_id: plan.plan_id.clone(),
            template: portage_core::Template::empty("clone template"),
        })
        .await
        .unwrap();
    store
        .stack_link_put(StackLinkRow {
            plan_id: plan.plan_id.clone(),
            stack_id: "stack-1".to_string(),
        })
        .await
        .unwrap();
    store
        .stack_link_put(StackLinkRow {
            plan_id: "other".to_string(),
            stack_id: "stack-2".to_string(),
        })
        .await
        .unwrap();

    assert!(store.template_get(&plan.plan_id).await.is_ok());
    let links = store.stack_links(&plan.plan_id).await.unwrap();
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].stack_id, "stack-1");

    store.stack_links_delete(&plan.plan_id).await.unwrap();
    assert!(store.stack_links(&plan.plan_id).await.unwrap().is_empty());
    assert_eq!(store.stack_links("other").await.unwrap().len(), 1);
}

#[tokio::test]
async fn delete_removes_the_plan_row_only_once() {
    let store = MemoryStore::new();
    let plan = sample_plan();
    store.plan_create(&plan).await.unwrap();
    store.plan_delete(&plan.plan_id).await.unwrap();
    assert!(store
        .plan_delete(&plan.plan_id)
        .await
        .unwrap_err()
        .is_not_found());
}
