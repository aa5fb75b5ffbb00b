//! Template shaping before submission.
//!
//! The rendered template still describes the source deployment; these
//! passes turn it into something the destination can instantiate: private
//! fields go, availability zones move, pre-existing resources collapse
//! into parameters, load-balancer triples fold, floating IPs factor into a
//! sibling file template.

use std::collections::HashSet;

use serde_json::{json, Value};

use portage_core::template::{Template, TemplateResource, TemplateType};
use portage_core::{reference, FilesMap, ParamSpec, ResourceKind};

/// Remove the engine-private payload from every resource.
pub fn strip_private_fields(template: &mut Template) {
    template.expire_time = None;
    template.plan_type = None;
    template.plan_id = None;
    template.stack_id = None;
    for resource in template.resources.values_mut() {
        resource.extra_properties = None;
    }
}

/// Re-home every server and volume to the destination zone.
pub fn set_destination_az(template: &mut Template, destination: &str) {
    for resource in template.resources.values_mut() {
        let takes_az = resource
            .kind()
            .map(ResourceKind::takes_destination_az)
            .unwrap_or(false);
        if takes_az {
            resource
                .properties
                .insert("availability_zone".to_string(), json!(destination));
        }
    }
}

/// Local network name a port references, whatever the reference shape.
fn port_network_name(port: &TemplateResource) -> Option<String> {
    let network_id = port.properties.get("network_id")?;
    match reference::as_reference(network_id)? {
        reference::Reference::Resource(name) | reference::Reference::Param(name) => {
            Some(name.to_string())
        }
        _ => None,
    }
}

/// Ports landing on a network that already exists at the destination must
/// not carry source addresses: the MAC and the fixed IPs would collide.
pub fn drop_port_addresses(template: &mut Template, existing_networks: &HashSet<String>) {
    for resource in template.resources.values_mut() {
        if resource.kind() != Some(ResourceKind::Port) {
            continue;
        }
        let on_existing = port_network_name(resource)
            .map(|name| existing_networks.contains(&name))
            .unwrap_or(false);
        if !on_existing {
            continue;
        }
        resource.properties.remove("mac_address");
        if let Some(fixed_ips) = resource
            .properties
            .get_mut("fixed_ips")
            .and_then(Value::as_array_mut)
        {
            for entry in fixed_ips.iter_mut().filter_map(Value::as_object_mut) {
                entry.remove("ip_address");
            }
        }
    }
}

/// Bind a resource that already exists at the destination by parameter:
/// declare the parameter with the live id as default, rewrite every
/// `get_resource` to `get_param`, drop the resource body.
pub fn promote_to_parameter(
    template: &mut Template,
    name: &str,
    live_id: &str,
    description: &str,
) {
    template.parameters.insert(
        name.to_string(),
        ParamSpec::string(description, Some(json!(live_id))),
    );
    for resource in template.resources.values_mut() {
        for value in resource.properties.values_mut() {
            reference::resource_to_param(value, name);
        }
    }
    template.resources.remove(name);
}

const VIP_INLINE_FIELDS: [&str; 6] = [
    "connection_limit",
    "subnet",
    "address",
    "protocol_port",
    "name",
    "session_persistence",
];

/// Collapse VIP + pool + listener triples: each referring pool inlines the
/// VIP's connection properties, then the VIP and its listeners disappear.
pub fn collapse_load_balancer(template: &mut Template) {
    let vip_names: Vec<String> = template
        .resources
        .iter()
        .filter(|(_, r)| r.kind() == Some(ResourceKind::LbVip))
        .map(|(name, _)| name.clone())
        .collect();

    for vip_name in &vip_names {
        let vip_properties: Value = {
            let Some(vip) = template.resources.get(vip_name) else {
                continue;
            };
            let mut inline = serde_json::Map::new();
            for field in VIP_INLINE_FIELDS {
                if let Some(value) = vip.properties.get(field) {
                    inline.insert(field.to_string(), value.clone());
                }
            }
            Value::Object(inline)
        };

        let pool_names: Vec<String> = template
            .resources
            .iter()
            .filter(|(_, r)| {
                r.kind() == Some(ResourceKind::LbPool)
                    && r.properties
                        .get("vip")
                        .and_then(reference::referenced_resource)
                        == Some(vip_name.as_str())
            })
            .map(|(name, _)| name.clone())
            .collect();
        for pool_name in pool_names {
            if let Some(pool) = template.resources.get_mut(&pool_name) {
                pool.properties
                    .insert("vip".to_string(), vip_properties.clone());
            }
        }

        let listener_names: Vec<String> = template
            .resources
            .iter()
            .filter(|(_, r)| {
                r.kind() == Some(ResourceKind::LbListener)
                    && r.properties
                        .get("vip_id")
                        .and_then(reference::referenced_resource)
                        == Some(vip_name.as_str())
            })
            .map(|(name, _)| name.clone())
            .collect();
        for listener_name in listener_names {
            template.resources.remove(&listener_name);
        }
        template.resources.remove(vip_name);
    }
}

/// Factor every floating IP that references an in-plan network into a
/// sibling file template, leaving one reference block behind. A template
/// with no floating IPs comes back untouched with an empty files map.
pub fn factor_floating_ips(
    template: &mut Template,
    plan_file_path: &str,
    plan_id: &str,
) -> Result<FilesMap, portage_core::CoreError> {
    let file_name = format!("file://{plan_file_path}{plan_id}.floatingIp.template");

    let fip_names: Vec<String> = template
        .resources
        .iter()
        .filter(|(_, r)| {
            r.kind() == Some(ResourceKind::FloatingIp)
                && r.properties
                    .get("floating_network_id")
                    .and_then(reference::referenced_resource)
                    .is_some()
        })
        .map(|(name, _)| name.clone())
        .collect();
    if fip_names.is_empty() {
        return Ok(FilesMap::new());
    }

    let mut child = Template::empty("Generated template");
    let mut reference_properties = serde_json::Map::new();

    for (idx, fip_name) in fip_names.iter().enumerate() {
        let Some(fip) = template.resources.remove(fip_name) else {
            continue;
        };
        let net_name = fip
            .properties
            .get("floating_network_id")
            .and_then(reference::referenced_resource)
            .map(str::to_string)
            .unwrap_or_default();
        // First subnet of the floating network, for the reference block.
        let subnet_name = template
            .resources
            .iter()
            .find(|(_, r)| {
                r.kind() == Some(ResourceKind::Subnet)
                    && r.properties
                        .get("network_id")
                        .and_then(reference::referenced_resource)
                        == Some(net_name.as_str())
            })
            .map(|(name, _)| name.clone());

        let net_param = format!("floating_network_id_{idx}");
        let subnet_param = format!("subnet_id_{idx}");

        reference_properties.insert(net_param.clone(), reference::get_resource(&net_name));
        if let Some(subnet_name) = subnet_name {
            reference_properties.insert(subnet_param.clone(), reference::get_resource(&subnet_name));
        }

        child
            .parameters
            .insert(net_param.clone(), ParamSpec::string("network", None));
        child
            .parameters
            .insert(subnet_param, ParamSpec::string("subnet", None));
        let mut properties = serde_json::Map::new();
        properties.insert(
            "floating_network_id".to_string(),
            reference::get_param(&net_param),
        );
        child.resources.insert(
            format!("floatingip_{idx}"),
            TemplateResource {
                resource_type: fip.resource_type,
                properties,
                extra_properties: None,
                content: None,
            },
        );
    }

    template.resources.insert(
        "floatingip".to_string(),
        TemplateResource {
            resource_type: TemplateType::File(file_name.clone()),
            properties: reference_properties,
            extra_properties: None,
            content: None,
        },
    );

    let mut files = FilesMap::new();
    files.insert(file_name, child.to_json()?);
    Ok(files)
}
