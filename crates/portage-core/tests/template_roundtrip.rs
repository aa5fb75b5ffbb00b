use portage_core::plan::Plan;
use portage_core::reference;
use portage_core::resource::{ParamSpec, Resource, ResourceKind};
use portage_core::template::{Template, TemplateResource, TemplateType};
use portage_core::ResourceMap;
use serde_json::json;

fn sample_resources() -> ResourceMap {
    let mut net = Resource::new("net_0", ResourceKind::Network, "net-uuid");
    net.set_property("name", json!("front"));

    let mut subnet = Resource::new("subnet_0", ResourceKind::Subnet, "subnet-uuid");
    subnet.set_property("network_id", reference::get_resource("net_0"));
    subnet.set_property(
        "allocation_pools",
        json!([{"start": "10.0.0.10", "end": "10.0.0.200"}]),
    );

    let mut port = Resource::new("port_0", ResourceKind::Port, "port-uuid");
    port.set_property("network_id", reference::get_resource("net_0"));
    port.set_property(
        "fixed_ips",
        json!([{"subnet_id": {"get_resource": "subnet_0"}, "ip_address": "10.0.0.5"}]),
    );

    let mut server = Resource::new("server_0", ResourceKind::Server, "server-uuid");
    server.set_property("networks", json!([{"port": {"get_resource": "port_0"}}]));
    server.set_property("flavor", reference::get_param("flavor_0"));
    server.add_parameter(
        "flavor_0",
        ParamSpec::string("flavor", Some(json!("flavor-uuid"))),
    );
    server.extra_properties.gw_url = Some("192.0.2.7:9998".to_string());

    [net, subnet, port, server]
        .into_iter()
        .map(|r| (r.name.clone(), r))
        .collect()
}

#[test]
fn import_of_export_preserves_names_kinds_and_edges() {
    let original = sample_resources();
    let template = Template::from_resources(&original, "clone template");
    let raw = template.to_json().unwrap();

    let imported = Template::from_json(&raw).unwrap().into_resources().unwrap();

    let mut original_keys: Vec<_> = original.keys().collect();
    let mut imported_keys: Vec<_> = imported.keys().collect();
    original_keys.sort();
    imported_keys.sort();
    assert_eq!(original_keys, imported_keys);

    for (name, res) in &original {
        assert_eq!(imported[name].kind, res.kind);
        assert_eq!(imported[name].id, res.id);
    }
    assert_eq!(
        Plan::compute_dependencies(&original),
        Plan::compute_dependencies(&imported)
    );
    // Engine-private fields survive the trip.
    assert_eq!(
        imported["server_0"].extra_properties.gw_url.as_deref(),
        Some("192.0.2.7:9998")
    );
    // Parameter bindings are rebuilt from the template parameters.
    assert!(imported["server_0"].parameters.contains_key("flavor_0"));
}

#[test]
fn unrealized_resources_get_a_fresh_id() {
    let mut resources = sample_resources();
    resources.get_mut("port_0").unwrap().id = String::new();
    let template = Template::from_resources(&resources, "clone template");
    let imported = template.into_resources().unwrap();
    assert!(!imported["port_0"].id.is_empty());
}

#[test]
fn nested_file_entries_are_rejected_at_import() {
    let mut template = Template::empty("clone template");
    template.resources.insert(
        "nested_0".to_string(),
        TemplateResource {
            resource_type: TemplateType::File("file://child.template".to_string()),
            properties: serde_json::Map::new(),
            extra_properties: None,
            content: Some("{}".to_string()),
        },
    );
    assert!(template.into_resources().is_err());
}

#[test]
fn unknown_type_tags_fail_to_parse() {
    let raw = json!({
        "heat_template_version": "2013-05-23",
        "description": "bad",
        "resources": {"x": {"type": 42}}
    })
    .to_string();
    assert!(Template::from_json(&raw).is_err());
}
