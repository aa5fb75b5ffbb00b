use std::collections::BTreeMap;
use std::sync::Arc;

use portage_clone::{CloneConfig, CloneError, CloneMode, CloneOrchestrator};
use portage_core::reference;
use portage_core::resource::{Resource, ResourceKind};
use portage_core::template::Template;
use portage_core::{PlanStatus, ResourceMap};
use portage_driver::types::{NetworkInfo, PortInfo, ServerInfo, SubnetInfo, VolumeInfo};
use portage_driver::{Drivers, Gateway, StaticCloud, VgwAllocator};
use portage_engine::PlanService;
use portage_store::{MemoryStore, PlanStore};
use serde_json::json;

struct Harness {
    service: PlanService,
    orchestrator: CloneOrchestrator,
    store: Arc<MemoryStore>,
    cloud: StaticCloud,
    vgw: Arc<VgwAllocator>,
}

fn fast_config(mode: CloneMode) -> CloneConfig {
    CloneConfig {
        clone_migrate_type: mode,
        sys_image: "image-base".to_string(),
        migrate_net_map: BTreeMap::new(),
        v2vgateway_api_listen_port: 9998,
        plan_file_path: "/var/lib/portage/".to_string(),
        poll_interval_ms: 1,
        create_port_attempts: 3,
        create_port_interval_ms: 1,
    }
}

fn harness(config: CloneConfig) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let cloud = StaticCloud::new();
    let drivers = Drivers::from_static(cloud.clone());
    let vgw = Arc::new(VgwAllocator::new());
    let service = PlanService::new(store.clone(), drivers.clone(), 60);
    let orchestrator = CloneOrchestrator::new(
        store.clone(),
        drivers,
        vgw.clone(),
        service.locks(),
        config,
    );
    Harness {
        service,
        orchestrator,
        store,
        cloud,
        vgw,
    }
}

fn clone_fixture() -> ResourceMap {
    let mut net = Resource::new("net_0", ResourceKind::Network, "net-a");
    net.set_property("name", json!("front"));

    let mut subnet = Resource::new("subnet_0", ResourceKind::Subnet, "subnet-a");
    subnet.set_property("network_id", reference::get_resource("net_0"));
    subnet.set_property(
        "allocation_pools",
        json!([{"start": "10.0.0.10", "end": "10.0.0.200"}]),
    );

    let mut port = Resource::new("port_0", ResourceKind::Port, "port-a");
    port.set_property("network_id", reference::get_resource("net_0"));
    port.set_property("mac_address", json!("fa:16:3e:00:00:aa"));
    port.set_property(
        "fixed_ips",
        json!([{"subnet_id": {"get_resource": "subnet_0"}, "ip_address": "10.0.0.5"}]),
    );

    let mut volume = Resource::new("volume_0", ResourceKind::Volume, "vol-a");
    volume.set_property("size", json!(10));
    volume.set_property("image", json!("image-orig"));

    let mut server = Resource::new("server_0", ResourceKind::Server, "server-a");
    server.set_property("availability_zone", json!("az-src"));
    server.set_property("networks", json!([{"port": {"get_resource": "port_0"}}]));
    server.set_property(
        "block_device_mapping_v2",
        json!([{"volume_id": {"get_resource": "volume_0"}, "boot_index": 0,
                "device_name": "/dev/vda"}]),
    );

    [net, subnet, port, volume, server]
        .into_iter()
        .map(|r| (r.name.clone(), r))
        .collect()
}

fn seed_clone_cloud(h: &Harness) {
    h.cloud.add_server(ServerInfo {
        id: "server-a".to_string(),
        name: "front-vm".to_string(),
        status: "SHUTOFF".to_string(),
        vm_state: "stopped".to_string(),
        availability_zone: "az-src".to_string(),
        flavor_id: "flavor-1".to_string(),
        key_name: None,
        attached_volume_ids: vec!["vol-a".to_string()],
    });
    h.cloud.add_volume(VolumeInfo {
        id: "vol-a".to_string(),
        name: "front-sys".to_string(),
        status: "available".to_string(),
        size: 10,
        availability_zone: "az-src".to_string(),
        bootable: true,
        shareable: false,
        volume_type_id: None,
        consistency_group_id: None,
    });
    h.cloud.add_network(NetworkInfo {
        id: "net-a".to_string(),
        name: "front".to_string(),
        admin_state_up: true,
        shared: false,
        subnet_ids: vec!["subnet-a".to_string()],
        segmentation_id: None,
    });
    // The device the gateway will see once the volume attaches.
    h.cloud.set_disk_format("vdb", "ext4");
    h.vgw.register(
        "az-src",
        Gateway {
            id: "gw-src".to_string(),
            ip: "192.0.2.1".to_string(),
        },
    );
    h.vgw.register(
        "az-dst",
        Gateway {
            id: "gw-dst".to_string(),
            ip: "192.0.2.2".to_string(),
        },
    );
}

async fn imported_plan(h: &Harness, plan_type: &str, resources: ResourceMap) -> String {
    let plan = h
        .service
        .create_plan(plan_type, "project", "user", None, vec![])
        .await
        .unwrap();
    let template = Template::from_resources(&resources, "clone template");
    h.service
        .import_from_template(&plan.plan_id, template)
        .await
        .unwrap();
    plan.plan_id
}

// Live clone of a stopped server with a system disk on a pre-existing
// network: the volume sub-stack deploys first with the configured bootable
// image, the main stack binds the network by parameter, data flows through
// the gateways, and the plan finishes.
#[tokio::test]
async fn live_clone_deploys_volume_sub_stack_then_main_stack() {
    let h = harness(fast_config(CloneMode::Live));
    seed_clone_cloud(&h);
    let plan_id = imported_plan(&h, "clone", clone_fixture()).await;

    h.orchestrator
        .export_clone_template(&plan_id, true, true)
        .await
        .unwrap();
    h.orchestrator.clone_plan(&plan_id, "az-dst").await.unwrap();

    let plan = h.store.plan_get(&plan_id).await.unwrap();
    assert_eq!(plan.plan_status, PlanStatus::Finished);
    assert!(plan.stack_id.is_some());

    let templates = h.cloud.submitted_templates();
    assert_eq!(templates.len(), 2);
    let sub = templates
        .iter()
        .find(|t| t.contains("volume_0") && !t.contains("server_0"))
        .expect("volume sub-stack template");
    let sub: serde_json::Value = serde_json::from_str(sub).unwrap();
    assert_eq!(
        sub["resources"]["volume_0"]["properties"]["image"],
        json!("image-base")
    );

    let main = templates
        .iter()
        .find(|t| t.contains("server_0"))
        .expect("main template");
    let main: serde_json::Value = serde_json::from_str(main).unwrap();
    // Pre-existing network and the sub-stack volume are bound by parameter.
    assert_eq!(main["parameters"]["net_0"]["default"], json!("net-a"));
    assert!(main["resources"].get("net_0").is_none());
    assert!(main["resources"].get("volume_0").is_none());
    assert!(main["parameters"]["volume_0"]["default"].is_string());
    // The port on the existing network lost its source addresses.
    assert!(main["resources"]["port_0"]["properties"]
        .get("mac_address")
        .is_none());

    // One transfer went through the source gateway device.
    let requests = h.cloud.clone_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].src_dev_name, "vdb");
    assert_eq!(requests[0].src_gw_url, "192.0.2.1:9998");

    // Source side is back to normal.
    assert_eq!(h.cloud.volume_shareable("vol-a"), Some(false));
    assert!(h
        .cloud
        .volume_detachments()
        .contains(&("gw-src".to_string(), "vol-a".to_string())));
    assert!(h
        .cloud
        .reset_states()
        .contains(&("server-a".to_string(), "stopped".to_string())));
}

// A clone failing in the middle of the data copy unwinds: the source
// volume is detached from its gateway, the shareable flag is cleared, and
// (with rollback enabled) the sub-stack is deleted.
#[tokio::test]
async fn clone_failure_mid_copy_rolls_back_and_errors_the_plan() {
    let h = harness(fast_config(CloneMode::Live));
    seed_clone_cloud(&h);
    h.cloud.script_clone_volume_failure();
    let plan_id = imported_plan(&h, "clone", clone_fixture()).await;

    h.orchestrator
        .export_clone_template(&plan_id, true, true)
        .await
        .unwrap();
    // The stored template opts into stack rollback.
    let mut row = h.store.template_get(&plan_id).await.unwrap();
    row.template.disable_rollback = Some(false);
    h.store.template_put(row).await.unwrap();

    let err = h.orchestrator.clone_plan(&plan_id, "az-dst").await.unwrap_err();
    assert!(err.to_string().contains("transfer refused"), "{err}");

    let plan = h.store.plan_get(&plan_id).await.unwrap();
    assert_eq!(plan.plan_status, PlanStatus::Error);
    assert!(plan.task_status.contains("transfer refused"));

    assert!(h
        .cloud
        .volume_detachments()
        .contains(&("gw-src".to_string(), "vol-a".to_string())));
    assert_eq!(h.cloud.volume_shareable("vol-a"), Some(false));
    assert!(!h.cloud.deleted_stacks().is_empty());
}

fn migrate_fixture() -> ResourceMap {
    let mut net = Resource::new("net_0", ResourceKind::Network, "net-a");
    net.set_property("name", json!("front"));

    let mut subnet = Resource::new("subnet_0", ResourceKind::Subnet, "subnet-a");
    subnet.set_property("network_id", reference::get_resource("net_0"));

    let mut port = Resource::new("port_0", ResourceKind::Port, "port-a");
    port.set_property("network_id", reference::get_resource("net_0"));
    port.set_property("mac_address", json!("fa:16:3e:00:00:aa"));
    port.set_property(
        "fixed_ips",
        json!([{"subnet_id": {"get_resource": "subnet_0"}, "ip_address": "10.0.0.5"}]),
    );

    let mut server = Resource::new("server_0", ResourceKind::Server, "server-a");
    server.set_property("availability_zone", json!("az-src"));
    server.set_property("networks", json!([{"port": {"get_resource": "port_0"}}]));

    [net, subnet, port, server]
        .into_iter()
        .map(|r| (r.name.clone(), r))
        .collect()
}

fn seed_migrate_cloud(h: &Harness, host_ip: Option<&str>) {
    h.cloud.add_server(ServerInfo {
        id: "server-a".to_string(),
        name: "front-vm".to_string(),
        status: "ACTIVE".to_string(),
        vm_state: "active".to_string(),
        availability_zone: "az-src".to_string(),
        flavor_id: "flavor-1".to_string(),
        key_name: None,
        attached_volume_ids: vec!["vol-src".to_string()],
    });
    h.cloud.add_network(NetworkInfo {
        id: "net-a".to_string(),
        name: "front".to_string(),
        admin_state_up: true,
        shared: false,
        subnet_ids: vec!["subnet-a".to_string()],
        segmentation_id: None,
    });
    h.cloud.add_subnet(SubnetInfo {
        id: "subnet-a".to_string(),
        name: "front-sub".to_string(),
        network_id: "net-a".to_string(),
        cidr: "10.0.0.0/24".to_string(),
        gateway_ip: None,
        enable_dhcp: true,
        allocation_pools: vec![],
    });
    let mut binding_profile = BTreeMap::new();
    if let Some(host_ip) = host_ip {
        binding_profile.insert("host_ip".to_string(), json!(host_ip));
    }
    h.cloud.add_port(PortInfo {
        id: "port-a".to_string(),
        name: "front-port".to_string(),
        network_id: "net-a".to_string(),
        mac_address: "fa:16:3e:00:00:aa".to_string(),
        admin_state_up: true,
        status: "ACTIVE".to_string(),
        device_id: Some("server-a".to_string()),
        fixed_ips: vec![portage_driver::types::FixedIp {
            subnet_id: "subnet-a".to_string(),
            ip_address: "10.0.0.5".to_string(),
        }],
        security_group_ids: vec![],
        binding_profile,
    });
}

// With no migrate network configured, the data address comes from an
// attached port's binding profile; without one the migrate fails before
// anything deploys.
#[tokio::test]
async fn migrate_without_data_address_fails_with_migrate_net_error() {
    let h = harness(fast_config(CloneMode::Cold));
    seed_migrate_cloud(&h, None);
    let plan_id = imported_plan(&h, "migrate", migrate_fixture()).await;

    let err = h
        .orchestrator
        .migrate(&plan_id, "az-dst")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("no migrate network"), "{err}");

    let plan = h.store.plan_get(&plan_id).await.unwrap();
    assert_eq!(plan.plan_status, PlanStatus::Error);
    assert!(h.cloud.submitted_templates().is_empty());
}

// Cut-over with zero floating IPs reduces to port detach/re-attach: the
// source port identity moves onto the target server and the source side is
// cleaned up.
#[tokio::test]
async fn migrate_cutover_rehomes_ports_and_cleans_up_sources() {
    let h = harness(fast_config(CloneMode::Cold));
    seed_migrate_cloud(&h, Some("192.0.2.9"));
    let plan_id = imported_plan(&h, "migrate", migrate_fixture()).await;

    h.orchestrator.migrate(&plan_id, "az-dst").await.unwrap();

    let plan = h.store.plan_get(&plan_id).await.unwrap();
    assert_eq!(plan.plan_status, PlanStatus::Finished);

    // One identity port re-created with the source MAC and address.
    let created = h.cloud.created_ports();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].mac_address, "fa:16:3e:00:00:aa");
    assert_eq!(created[0].fixed_ips[0].ip_address, "10.0.0.5");

    // Source port left the source server; the stack port left the target
    // server; the new port landed on the target.
    let detached = h.cloud.interfaces_detached();
    assert!(detached.contains(&("server-a".to_string(), "port-a".to_string())));
    assert_eq!(detached.len(), 2);
    let attached = h.cloud.interfaces_attached();
    assert_eq!(attached.len(), 1);
    assert_eq!(attached[0].1, created[0].id);

    // No floating ips were involved.
    assert!(h.cloud.fip_associations().is_empty());
    assert!(h.cloud.fip_disassociations().is_empty());

    // Source cleanup: the server and its volumes are gone.
    assert_eq!(h.cloud.deleted_servers(), vec!["server-a".to_string()]);
    assert!(h
        .cloud
        .deleted_volumes()
        .contains(&"vol-src".to_string()));
}

// Port re-creation exhausting its conflict retries rolls the server back:
// the original port is re-created on the source server, the floating ip is
// re-associated, and the plan lands in error.
#[tokio::test]
async fn migrate_cutover_conflict_exhaustion_rolls_back() {
    let h = harness(fast_config(CloneMode::Cold));
    seed_migrate_cloud(&h, Some("192.0.2.9"));
    h.cloud.add_floatingip(portage_driver::types::FloatingIpInfo {
        id: "fip-a".to_string(),
        floating_network_id: "net-a".to_string(),
        floating_ip_address: "203.0.113.7".to_string(),
        port_id: Some("port-a".to_string()),
        fixed_ip_address: Some("10.0.0.5".to_string()),
    });

    let mut resources = migrate_fixture();
    let mut fip = Resource::new("floatingip_0", ResourceKind::FloatingIp, "fip-a");
    fip.set_property("floating_network_id", reference::get_resource("net_0"));
    fip.set_property("port_id", reference::get_resource("port_0"));
    fip.set_property("fixed_ip_address", json!("10.0.0.5"));
    resources.insert(fip.name.clone(), fip);

    let plan_id = imported_plan(&h, "migrate", resources).await;
    // Every in-budget attempt conflicts; the retry loop must exhaust.
    h.cloud.script_port_conflicts(3);

    let err = h
        .orchestrator
        .migrate(&plan_id, "az-dst")
        .await
        .unwrap_err();
    assert!(matches!(err, CloneError::PlanMigrateFailed { .. }), "{err}");

    let plan = h.store.plan_get(&plan_id).await.unwrap();
    assert_eq!(plan.plan_status, PlanStatus::Error);
    assert!(!plan.task_status.is_empty());

    // Rollback re-created the source port, re-attached it, and put the
    // floating ip back.
    assert_eq!(h.cloud.fip_disassociations(), vec!["fip-a".to_string()]);
    let created = h.cloud.created_ports();
    assert_eq!(created.len(), 1);
    let attached = h.cloud.interfaces_attached();
    assert_eq!(
        attached.last().unwrap(),
        &("server-a".to_string(), created[0].id.clone())
    );
    let associations = h.cloud.fip_associations();
    assert_eq!(associations.len(), 1);
    assert_eq!(associations[0].0, "fip-a");
    assert_eq!(associations[0].1, created[0].id);

    // The half-migrated stack is gone.
    assert!(!h.cloud.deleted_stacks().is_empty());
}
