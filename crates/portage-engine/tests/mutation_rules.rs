use std::sync::Arc;

use serde_json::json;

use portage_core::reference;
use portage_core::resource::{Resource, ResourceKind};
use portage_core::template::Template;
use portage_core::ResourceMap;
use portage_driver::types::{
    AllocationPool, FloatingIpInfo, NetworkInfo, SubnetInfo, VolumeInfo,
};
use portage_driver::{Drivers, StaticCloud};
use portage_engine::extract::normalize_rules;
use portage_engine::{EditAction, EngineError, PlanService, ResourceEdit};
use portage_store::MemoryStore;

fn edit(action: EditAction, resource_id: &str) -> ResourceEdit {
    ResourceEdit {
        action,
        resource_id: Some(resource_id.to_string()),
        id: None,
        resource_type: None,
        copy_data: None,
        properties: serde_json::Map::new(),
    }
}

fn fixture_resources() -> ResourceMap {
    let mut net_0 = Resource::new("net_0", ResourceKind::Network, "net-a");
    net_0.set_property("name", json!("front"));
    net_0.set_property("value_specs", json!({"provider:segmentation_id": 1001}));

    let mut subnet_0 = Resource::new("subnet_0", ResourceKind::Subnet, "subnet-a");
    subnet_0.set_property("network_id", reference::get_resource("net_0"));
    subnet_0.set_property(
        "allocation_pools",
        json!([{"start": "10.0.0.10", "end": "10.0.0.200"}]),
    );

    let mut port_0 = Resource::new("port_0", ResourceKind::Port, "port-a");
    port_0.set_property("network_id", reference::get_resource("net_0"));
    port_0.set_property("mac_address", json!("fa:16:3e:00:00:aa"));
    port_0.set_property(
        "fixed_ips",
        json!([{"subnet_id": {"get_resource": "subnet_0"}, "ip_address": "10.0.0.5"}]),
    );

    let mut net_1 = Resource::new("net_1", ResourceKind::Network, "net-b");
    net_1.set_property("name", json!("back"));

    let mut subnet_1 = Resource::new("subnet_1", ResourceKind::Subnet, "subnet-b");
    subnet_1.set_property("network_id", reference::get_resource("net_1"));

    let mut port_1 = Resource::new("port_1", ResourceKind::Port, "port-b");
    port_1.set_property("network_id", reference::get_resource("net_1"));
    port_1.set_property(
        "fixed_ips",
        json!([{"subnet_id": {"get_resource": "subnet_1"}, "ip_address": "10.1.0.5"}]),
    );

    let volume_0 = Resource::new("volume_0", ResourceKind::Volume, "vol-a");

    let mut keypair_0 = Resource::new("keypair_0", ResourceKind::KeyPair, "kp-a");
    keypair_0.set_property("name", json!("ops"));

    let mut floatingip_0 = Resource::new("floatingip_0", ResourceKind::FloatingIp, "fip-a");
    floatingip_0.set_property("floating_network_id", reference::get_resource("net_0"));
    floatingip_0.set_property("port_id", reference::get_resource("port_0"));

    let mut server_0 = Resource::new("server_0", ResourceKind::Server, "server-a");
    server_0.set_property(
        "networks",
        json!([
            {"port": {"get_resource": "port_0"}},
            {"port": {"get_resource": "port_1"}},
        ]),
    );
    server_0.set_property(
        "block_device_mapping_v2",
        json!([{"volume_id": {"get_resource": "volume_0"}, "boot_index": 0,
                "device_name": "/dev/vda"}]),
    );

    [
        net_0,
        subnet_0,
        port_0,
        net_1,
        subnet_1,
        port_1,
        volume_0,
        keypair_0,
        floatingip_0,
        server_0,
    ]
    .into_iter()
    .map(|r| (r.name.clone(), r))
    .collect()
}

fn seeded_cloud() -> StaticCloud {
    let cloud = StaticCloud::new();
    cloud.add_network(NetworkInfo {
        id: "net-b".to_string(),
        name: "back".to_string(),
        admin_state_up: true,
        shared: false,
        subnet_ids: vec!["subnet-b".to_string()],
        segmentation_id: None,
    });
    cloud.add_network(NetworkInfo {
        id: "net-c".to_string(),
        name: "spare".to_string(),
        admin_state_up: true,
        shared: false,
        subnet_ids: vec!["subnet-c".to_string()],
        segmentation_id: None,
    });
    cloud.add_network(NetworkInfo {
        id: "net-ext".to_string(),
        name: "external".to_string(),
        admin_state_up: true,
        shared: true,
        subnet_ids: vec![],
        segmentation_id: None,
    });
    cloud.add_subnet(SubnetInfo {
        id: "subnet-a".to_string(),
        name: "front-sub".to_string(),
        network_id: "net-a".to_string(),
        cidr: "10.0.0.0/24".to_string(),
        gateway_ip: Some("10.0.0.1".to_string()),
        enable_dhcp: true,
        allocation_pools: vec![AllocationPool {
            start: "10.0.0.10".to_string(),
            end: "10.0.0.200".to_string(),
        }],
    });
    cloud.add_subnet(SubnetInfo {
        id: "subnet-c".to_string(),
        name: "spare-sub".to_string(),
        network_id: "net-c".to_string(),
        cidr: "10.2.0.0/24".to_string(),
        gateway_ip: None,
        enable_dhcp: true,
        allocation_pools: vec![AllocationPool {
            start: "10.2.0.10".to_string(),
            end: "10.2.0.200".to_string(),
        }],
    });
    cloud.add_floatingip(FloatingIpInfo {
        id: "fip-used".to_string(),
        floating_network_id: "net-ext".to_string(),
        floating_ip_address: "203.0.113.9".to_string(),
        port_id: Some("someone-elses-port".to_string()),
        fixed_ip_address: Some("10.9.9.9".to_string()),
    });
    cloud.add_floatingip(FloatingIpInfo {
        id: "fip-free".to_string(),
        floating_network_id: "net-ext".to_string(),
        floating_ip_address: "203.0.113.10".to_string(),
        port_id: None,
        fixed_ip_address: None,
    });
    cloud.add_volume(VolumeInfo {
        id: "vol-b".to_string(),
        name: "data-2".to_string(),
        status: "available".to_string(),
        size: 20,
        availability_zone: "az-src".to_string(),
        bootable: false,
        shareable: false,
        volume_type_id: None,
        consistency_group_id: None,
    });
    cloud
}

async fn available_plan(cloud: &StaticCloud) -> (PlanService, String) {
    let store = Arc::new(MemoryStore::new());
    let drivers = Drivers::from_static(cloud.clone());
    let service = PlanService::new(store, drivers, 60);
    let plan = service
        .create_plan("clone", "project", "user", None, vec![])
        .await
        .unwrap();
    let template = Template::from_resources(&fixture_resources(), "clone template");
    service
        .import_from_template(&plan.plan_id, template)
        .await
        .unwrap();
    (service, plan.plan_id)
}

#[tokio::test]
async fn delete_is_refused_while_referenced() {
    let cloud = seeded_cloud();
    let (service, plan_id) = available_plan(&cloud).await;

    let err = service
        .update_plan_resources(&plan_id, vec![edit(EditAction::Delete, "subnet_0")])
        .await
        .unwrap_err();
    match err {
        EngineError::PlanResourcesUpdateError(msg) => {
            assert!(msg.contains("depends on subnet_0"), "{msg}");
        }
        other => panic!("expected PlanResourcesUpdateError, got {other}"),
    }
}

#[tokio::test]
async fn delete_cascades_only_into_orphans() {
    let cloud = seeded_cloud();
    let (service, plan_id) = available_plan(&cloud).await;

    // The floating ip pins port_0 and net_0; deleting it frees nothing else.
    let plan = service
        .update_plan_resources(&plan_id, vec![edit(EditAction::Delete, "floatingip_0")])
        .await
        .unwrap();
    assert!(!plan.updated_resources.contains_key("floatingip_0"));
    assert!(plan.updated_resources.contains_key("port_0"));
    assert!(plan.updated_resources.contains_key("net_0"));

    // Deleting the server cascades through ports, subnets, networks and the
    // volume, all of which are now unreferenced.
    let plan = service
        .update_plan_resources(&plan_id, vec![edit(EditAction::Delete, "server_0")])
        .await
        .unwrap();
    assert!(
        plan.updated_resources.keys().map(String::as_str).eq(["keypair_0"]),
        "left: {:?}",
        plan.updated_resources.keys().collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn server_edits_are_limited_to_user_data_and_metadata() {
    let cloud = seeded_cloud();
    let (service, plan_id) = available_plan(&cloud).await;

    let mut bad = edit(EditAction::Edit, "server_0");
    bad.properties.insert("flavor".to_string(), json!("xl"));
    assert!(service
        .update_plan_resources(&plan_id, vec![bad])
        .await
        .is_err());

    let mut good = edit(EditAction::Edit, "server_0");
    good.properties
        .insert("user_data".to_string(), json!("#cloud-config"));
    let plan = service
        .update_plan_resources(&plan_id, vec![good])
        .await
        .unwrap();
    assert_eq!(
        plan.updated_resources["server_0"].properties["user_data"],
        json!("#cloud-config")
    );
}

#[tokio::test]
async fn port_fixed_ip_must_stay_inside_the_allocation_pool() {
    let cloud = seeded_cloud();
    let (service, plan_id) = available_plan(&cloud).await;

    let mut bad = edit(EditAction::Edit, "port_0");
    bad.properties.insert(
        "fixed_ips".to_string(),
        json!([{"subnet_id": {"get_resource": "subnet_0"}, "ip_address": "10.0.0.250"}]),
    );
    let err = service
        .update_plan_resources(&plan_id, vec![bad])
        .await
        .unwrap_err();
    match err {
        EngineError::PlanResourcesUpdateError(msg) => {
            assert!(msg.contains("allocation_pools"), "{msg}");
            assert!(msg.contains("10.0.0.200"), "{msg}");
        }
        other => panic!("expected PlanResourcesUpdateError, got {other}"),
    }

    let mut good = edit(EditAction::Edit, "port_0");
    good.properties.insert(
        "fixed_ips".to_string(),
        json!([{"subnet_id": {"get_resource": "subnet_0"}, "ip_address": "10.0.0.50"}]),
    );
    let plan = service
        .update_plan_resources(&plan_id, vec![good])
        .await
        .unwrap();
    let port = &plan.updated_resources["port_0"];
    assert_eq!(
        port.properties["fixed_ips"][0]["ip_address"],
        json!("10.0.0.50")
    );
    // Address changed: the realized port must be rebuilt on deploy.
    assert!(port.id.is_empty());
}

#[tokio::test]
async fn port_fixed_ip_count_must_not_change() {
    let cloud = seeded_cloud();
    let (service, plan_id) = available_plan(&cloud).await;

    let mut bad = edit(EditAction::Edit, "port_0");
    bad.properties.insert(
        "fixed_ips".to_string(),
        json!([
            {"subnet_id": {"get_resource": "subnet_0"}, "ip_address": "10.0.0.50"},
            {"subnet_id": {"get_resource": "subnet_0"}, "ip_address": "10.0.0.51"},
        ]),
    );
    assert!(service
        .update_plan_resources(&plan_id, vec![bad])
        .await
        .is_err());
}

#[tokio::test]
async fn network_swap_rejects_duplicates_on_a_server() {
    let cloud = seeded_cloud();
    let (service, plan_id) = available_plan(&cloud).await;

    // Swapping net_1 onto the live network port_0 already uses.
    let mut dup = edit(EditAction::Edit, "net_1");
    dup.id = Some("net-a".to_string());
    // net-a is not registered in the cloud; register it so the lookup and
    // subnet check pass before the duplicate check fires.
    cloud.add_network(NetworkInfo {
        id: "net-a".to_string(),
        name: "front".to_string(),
        admin_state_up: true,
        shared: false,
        subnet_ids: vec!["subnet-a".to_string()],
        segmentation_id: Some(1001),
    });
    let err = service
        .update_plan_resources(&plan_id, vec![dup])
        .await
        .unwrap_err();
    match err {
        EngineError::PlanResourcesUpdateError(msg) => {
            assert!(msg.contains("Duplicate networks"), "{msg}");
        }
        other => panic!("expected PlanResourcesUpdateError, got {other}"),
    }

    // Swapping to a third network is fine and re-homes subnet_1 + port_1.
    let mut ok = edit(EditAction::Edit, "net_1");
    ok.id = Some("net-c".to_string());
    let plan = service
        .update_plan_resources(&plan_id, vec![ok])
        .await
        .unwrap();
    assert_eq!(plan.updated_resources["net_1"].id, "net-c");
    assert_eq!(plan.updated_resources["subnet_1"].id, "subnet-c");
    let port = &plan.updated_resources["port_1"];
    assert!(port.id.is_empty());
    // The stale address on the old subnet is gone.
    assert!(port.properties["fixed_ips"][0].get("ip_address").is_none());
}

#[tokio::test]
async fn floatingip_swap_requires_an_unbound_target() {
    let cloud = seeded_cloud();
    let (service, plan_id) = available_plan(&cloud).await;

    let mut in_use = edit(EditAction::Edit, "floatingip_0");
    in_use.id = Some("fip-used".to_string());
    let err = service
        .update_plan_resources(&plan_id, vec![in_use])
        .await
        .unwrap_err();
    match err {
        EngineError::PlanResourcesUpdateError(msg) => {
            assert!(msg.contains("in use"), "{msg}");
        }
        other => panic!("expected PlanResourcesUpdateError, got {other}"),
    }

    let mut free = edit(EditAction::Edit, "floatingip_0");
    free.id = Some("fip-free".to_string());
    let plan = service
        .update_plan_resources(&plan_id, vec![free])
        .await
        .unwrap();
    let fip = &plan.updated_resources["floatingip_0"];
    assert_eq!(fip.id, "fip-free");
    // The existing port binding survives the swap.
    assert_eq!(
        fip.properties["port_id"],
        reference::get_resource("port_0")
    );
}

#[tokio::test]
async fn volume_swap_marks_the_target_existing() {
    let cloud = seeded_cloud();
    let (service, plan_id) = available_plan(&cloud).await;

    let mut swap = edit(EditAction::Edit, "volume_0");
    swap.id = Some("vol-b".to_string());
    swap.copy_data = Some(false);
    let plan = service
        .update_plan_resources(&plan_id, vec![swap])
        .await
        .unwrap();
    let volume = &plan.updated_resources["volume_0"];
    assert_eq!(volume.id, "vol-b");
    assert_eq!(volume.extra_properties.exist, Some(true));
    assert_eq!(volume.extra_properties.copy_data, Some(false));
}

#[tokio::test]
async fn keypair_edit_needs_an_id_or_a_public_key() {
    let cloud = seeded_cloud();
    let (service, plan_id) = available_plan(&cloud).await;

    let bare = edit(EditAction::Edit, "keypair_0");
    assert!(service
        .update_plan_resources(&plan_id, vec![bare])
        .await
        .is_err());

    let mut with_key = edit(EditAction::Edit, "keypair_0");
    with_key
        .properties
        .insert("public_key".to_string(), json!("ssh-ed25519 AAAA..."));
    let plan = service
        .update_plan_resources(&plan_id, vec![with_key])
        .await
        .unwrap();
    let keypair = &plan.updated_resources["keypair_0"];
    // Overridden in place: the realized keypair no longer applies.
    assert!(keypair.id.is_empty());
    assert_eq!(keypair.properties["public_key"], json!("ssh-ed25519 AAAA..."));
}

#[test]
fn security_group_rules_are_normalized() {
    let rules = vec![json!({
        "protocol": "any",
        "remote_group_id": "sg-1",
        "security_group_id": "sg-1",
        "tenant_id": "t-1",
        "id": "rule-1",
        "direction": "ingress",
        "port_range_min": null,
    })];
    let normalized = normalize_rules(rules);
    let rule = normalized[0].as_object().unwrap();
    assert!(!rule.contains_key("protocol"));
    assert!(!rule.contains_key("remote_group_id"));
    assert_eq!(rule["remote_mode"], json!("remote_group_id"));
    assert!(!rule.contains_key("tenant_id"));
    assert!(!rule.contains_key("id"));
    assert!(!rule.contains_key("security_group_id"));
    assert!(!rule.contains_key("port_range_min"));
    assert_eq!(rule["direction"], json!("ingress"));
}
