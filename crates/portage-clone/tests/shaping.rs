use std::collections::HashSet;

use portage_clone::shape;
use portage_core::reference;
use portage_core::resource::{Resource, ResourceKind};
use portage_core::template::{Template, TemplateType};
use portage_core::ResourceMap;
use serde_json::json;

fn template_with(resources: Vec<Resource>) -> Template {
    let map: ResourceMap = resources
        .into_iter()
        .map(|r| (r.name.clone(), r))
        .collect();
    Template::from_resources(&map, "clone template")
}

#[test]
fn destination_az_lands_on_servers_and_volumes_only() {
    let mut server = Resource::new("server_0", ResourceKind::Server, "s");
    server.set_property("availability_zone", json!("az-src"));
    let volume = Resource::new("volume_0", ResourceKind::Volume, "v");
    let net = Resource::new("net_0", ResourceKind::Network, "n");
    let mut template = template_with(vec![server, volume, net]);

    shape::set_destination_az(&mut template, "az-dst");

    assert_eq!(
        template.resources["server_0"].properties["availability_zone"],
        json!("az-dst")
    );
    assert_eq!(
        template.resources["volume_0"].properties["availability_zone"],
        json!("az-dst")
    );
    assert!(!template.resources["net_0"]
        .properties
        .contains_key("availability_zone"));
}

#[test]
fn ports_on_existing_networks_shed_source_addresses() {
    let mut port = Resource::new("port_0", ResourceKind::Port, "p");
    port.set_property("network_id", reference::get_resource("net_0"));
    port.set_property("mac_address", json!("fa:16:3e:00:00:aa"));
    port.set_property(
        "fixed_ips",
        json!([{"subnet_id": {"get_resource": "subnet_0"}, "ip_address": "10.0.0.5"}]),
    );
    let mut other = Resource::new("port_1", ResourceKind::Port, "q");
    other.set_property("network_id", reference::get_resource("net_1"));
    other.set_property("mac_address", json!("fa:16:3e:00:00:bb"));
    let mut template = template_with(vec![port, other]);

    let existing: HashSet<String> = ["net_0".to_string()].into();
    shape::drop_port_addresses(&mut template, &existing);

    let shaped = &template.resources["port_0"];
    assert!(!shaped.properties.contains_key("mac_address"));
    assert!(shaped.properties["fixed_ips"][0].get("ip_address").is_none());
    // Ports on networks that get rebuilt keep their identity.
    assert!(template.resources["port_1"]
        .properties
        .contains_key("mac_address"));
}

#[test]
fn parameter_promotion_rewrites_references_and_drops_the_body() {
    let net = Resource::new("net_0", ResourceKind::Network, "net-live-id");
    let mut subnet = Resource::new("subnet_0", ResourceKind::Subnet, "sub");
    subnet.set_property("network_id", reference::get_resource("net_0"));
    let mut template = template_with(vec![net, subnet]);

    shape::promote_to_parameter(&mut template, "net_0", "net-live-id", "existing network");

    assert!(!template.resources.contains_key("net_0"));
    assert_eq!(
        template.parameters["net_0"].default,
        Some(json!("net-live-id"))
    );
    assert_eq!(
        template.resources["subnet_0"].properties["network_id"],
        reference::get_param("net_0")
    );
}

#[test]
fn load_balancer_triples_collapse_into_pools() {
    let mut vip = Resource::new("lb_vip_0", ResourceKind::LbVip, "vip");
    vip.set_property("address", json!("10.0.0.9"));
    vip.set_property("protocol_port", json!(443));
    vip.set_property("admin_state_up", json!(true));
    let mut pool = Resource::new("lb_pool_0", ResourceKind::LbPool, "pool");
    pool.set_property("vip", reference::get_resource("lb_vip_0"));
    let mut listener = Resource::new("lb_listener_0", ResourceKind::LbListener, "lsn");
    listener.set_property("vip_id", reference::get_resource("lb_vip_0"));
    let member = Resource::new("lb_member_0", ResourceKind::LbMember, "mem");
    let mut template = template_with(vec![vip, pool, listener, member]);

    shape::collapse_load_balancer(&mut template);

    assert!(!template.resources.contains_key("lb_vip_0"));
    assert!(!template.resources.contains_key("lb_listener_0"));
    assert!(template.resources.contains_key("lb_member_0"));
    let inlined = &template.resources["lb_pool_0"].properties["vip"];
    assert_eq!(inlined["address"], json!("10.0.0.9"));
    assert_eq!(inlined["protocol_port"], json!(443));
    // Only connection fields inline; unrelated VIP fields do not travel.
    assert!(inlined.get("admin_state_up").is_none());
}

#[test]
fn floating_ip_factoring_moves_fips_into_a_sibling_file() {
    let net = Resource::new("net_0", ResourceKind::Network, "n");
    let mut subnet = Resource::new("subnet_0", ResourceKind::Subnet, "s");
    subnet.set_property("network_id", reference::get_resource("net_0"));
    let mut fip = Resource::new("floatingip_0", ResourceKind::FloatingIp, "f");
    fip.set_property("floating_network_id", reference::get_resource("net_0"));
    let mut template = template_with(vec![net, subnet, fip]);

    let files =
        shape::factor_floating_ips(&mut template, "/var/lib/portage/", "plan-1").unwrap();

    assert_eq!(files.len(), 1);
    let key = "file:///var/lib/portage/plan-1.floatingIp.template";
    assert!(files.contains_key(key));
    assert!(!template.resources.contains_key("floatingip_0"));
    let reference_block = &template.resources["floatingip"];
    assert_eq!(
        reference_block.resource_type,
        TemplateType::File(key.to_string())
    );
    assert_eq!(
        reference_block.properties["floating_network_id_0"],
        reference::get_resource("net_0")
    );
    assert_eq!(
        reference_block.properties["subnet_id_0"],
        reference::get_resource("subnet_0")
    );

    let child = Template::from_json(&files[key]).unwrap();
    assert!(child.resources.contains_key("floatingip_0"));
    assert_eq!(
        child.resources["floatingip_0"].properties["floating_network_id"],
        reference::get_param("floating_network_id_0")
    );
}

#[test]
fn floating_ip_factoring_is_a_no_op_without_fips() {
    let net = Resource::new("net_0", ResourceKind::Network, "n");
    let mut template = template_with(vec![net]);
    let before = serde_json::to_string(&template).unwrap();

    let files =
        shape::factor_floating_ips(&mut template, "/var/lib/portage/", "plan-1").unwrap();

    assert!(files.is_empty());
    assert_eq!(serde_json::to_string(&template).unwrap(), before);
}

#[test]
fn private_fields_are_stripped_before_submission() {
    let mut volume = Resource::new("volume_0", ResourceKind::Volume, "v");
    volume.extra_properties.gw_url = Some("192.0.2.1:9998".to_string());
    let mut template = template_with(vec![volume]);
    template.plan_id = Some("plan-1".to_string());

    shape::strip_private_fields(&mut template);

    assert!(template.plan_id.is_none());
    assert!(template.resources["volume_0"].extra_properties.is_none());
}
