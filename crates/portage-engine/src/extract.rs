//! Pulling live cloud objects into a plan's resource map.
//!
//! Each extractor reuses an entry that already carries the live id, so a
//! subnet pulled twice lands in the map once; transitive dependencies
//! (subnet→network, volume→type→qos) come along.

use serde_json::{json, Value};

use portage_core::{reference, Resource, ResourceKind, ResourceMap};
use portage_driver::types::{
    FloatingIpInfo, KeyPairInfo, NetworkInfo, QosSpecsInfo, SecurityGroupInfo, SubnetInfo,
    VolumeInfo, VolumeTypeInfo,
};
use portage_driver::Drivers;

use crate::error::EngineError;

/// Smallest unused `<prefix>_<n>` local name.
pub fn fresh_name(resources: &ResourceMap, kind: ResourceKind) -> String {
    let prefix = kind.name_prefix();
    let mut n = 0;
    loop {
        let candidate = format!("{prefix}_{n}");
        if !resources.contains_key(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// Local name of the entry of `kind` realized as `id`, if present.
pub fn find_by_live_id(resources: &ResourceMap, kind: ResourceKind, id: &str) -> Option<String> {
    resources
        .values()
        .find(|r| r.kind == kind && r.id == id)
        .map(|r| r.name.clone())
}

// ── resource builders ────────────────────────────────────────────────────

pub fn keypair_resource(name: &str, info: &KeyPairInfo) -> Resource {
    let mut res = Resource::new(name, ResourceKind::KeyPair, info.id.clone());
    res.set_property("name", json!(info.name));
    res.set_property("public_key", json!(info.public_key));
    res
}

pub fn security_group_resource(name: &str, info: &SecurityGroupInfo) -> Resource {
    let mut res = Resource::new(name, ResourceKind::SecurityGroup, info.id.clone());
    res.set_property("name", json!(info.name));
    res.set_property("description", json!(info.description));
    res.set_property("rules", Value::Array(normalize_rules(info.rules.clone())));
    res
}

pub fn network_resource(name: &str, info: &NetworkInfo) -> Resource {
    let mut res = Resource::new(name, ResourceKind::Network, info.id.clone());
    res.set_property("name", json!(info.name));
    res.set_property("admin_state_up", json!(info.admin_state_up));
    res.set_property("shared", json!(info.shared));
    if let Some(segmentation_id) = info.segmentation_id {
        res.set_property(
            "value_specs",
            json!({"provider:segmentation_id": segmentation_id}),
        );
    }
    res
}

pub fn subnet_resource(name: &str, info: &SubnetInfo, network_ref: Value) -> Resource {
    let mut res = Resource::new(name, ResourceKind::Subnet, info.id.clone());
    res.set_property("name", json!(info.name));
    res.set_property("cidr", json!(info.cidr));
    if let Some(gateway_ip) = &info.gateway_ip {
        res.set_property("gateway_ip", json!(gateway_ip));
    }
    res.set_property("enable_dhcp", json!(info.enable_dhcp));
    res.set_property(
        "allocation_pools",
        json!(info
            .allocation_pools
            .iter()
            .map(|p| json!({"start": p.start, "end": p.end}))
            .collect::<Vec<_>>()),
    );
    res.set_property("network_id", network_ref);
    res
}

pub fn floatingip_resource(name: &str, info: &FloatingIpInfo, network_ref: Value) -> Resource {
    let mut res = Resource::new(name, ResourceKind::FloatingIp, info.id.clone());
    res.set_property("floating_network_id", network_ref);
    res
}

pub fn qos_resource(name: &str, info: &QosSpecsInfo) -> Resource {
    let mut res = Resource::new(name, ResourceKind::Qos, info.id.clone());
    res.set_property("name", json!(info.name));
    res.set_property("specs", info.specs.clone());
    res
}

pub fn volume_type_resource(name: &str, info: &VolumeTypeInfo, qos_ref: Option<Value>) -> Resource {
    let mut res = Resource::new(name, ResourceKind::VolumeType, info.id.clone());
    res.set_property("name", json!(info.name));
    res.set_property("metadata", info.extra_specs.clone());
    if let Some(qos_ref) = qos_ref {
        res.set_property("qos_specs_id", qos_ref);
    }
    res
}

pub fn volume_resource(name: &str, info: &VolumeInfo, type_ref: Option<Value>) -> Resource {
    let mut res = Resource::new(name, ResourceKind::Volume, info.id.clone());
    res.set_property("name", json!(info.name));
    res.set_property("size", json!(info.size));
    res.set_property("availability_zone", json!(info.availability_zone));
    if let Some(type_ref) = type_ref {
        res.set_property("volume_type", type_ref);
    }
    res
}

/// Security-group rules as the cloud reports them carry fields the template
/// language rejects; strip and fold them.
pub fn normalize_rules(rules: Vec<Value>) -> Vec<Value> {
    rules
        .into_iter()
        .map(|mut rule| {
            if let Some(map) = rule.as_object_mut() {
                if map.get("protocol").and_then(Value::as_str) == Some("any") {
                    map.remove("protocol");
                }
                let remote_group = map.get("remote_group_id").cloned();
                if let Some(remote_group) = remote_group.filter(|v| !v.is_null()) {
                    map.insert("remote_mode".to_string(), json!("remote_group_id"));
                    if Some(&remote_group) == map.get("security_group_id") {
                        map.remove("remote_group_id");
                    }
                }
                map.remove("tenant_id");
                map.remove("id");
                map.remove("security_group_id");
                map.retain(|_, v| !v.is_null());
            }
            rule
        })
        .collect()
}

// ── transitive extraction ────────────────────────────────────────────────

pub async fn extract_qos(
    drivers: &Drivers,
    resources: &mut ResourceMap,
    qos_id: &str,
) -> Result<String, EngineError> {
    if let Some(name) = find_by_live_id(resources, ResourceKind::Qos, qos_id) {
        return Ok(name);
    }
    let info = drivers.block.get_qos_specs(qos_id).await?;
    let name = fresh_name(resources, ResourceKind::Qos);
    resources.insert(name.clone(), qos_resource(&name, &info));
    Ok(name)
}

pub async fn extract_volume_type(
    drivers: &Drivers,
    resources: &mut ResourceMap,
    type_id: &str,
) -> Result<String, EngineError> {
    if let Some(name) = find_by_live_id(resources, ResourceKind::VolumeType, type_id) {
        return Ok(name);
    }
    let info = drivers.block.get_volume_type(type_id).await?;
    let qos_ref = match &info.qos_specs_id {
        Some(qos_id) => {
            let qos_name = extract_qos(drivers, resources, qos_id).await?;
            Some(reference::get_resource(&qos_name))
        }
        None => None,
    };
    let name = fresh_name(resources, ResourceKind::VolumeType);
    resources.insert(name.clone(), volume_type_resource(&name, &info, qos_ref));
    Ok(name)
}

pub async fn extract_volume(
    drivers: &Drivers,
    resources: &mut ResourceMap,
    volume_id: &str,
) -> Result<String, EngineError> {
    if let Some(name) = find_by_live_id(resources, ResourceKind::Volume, volume_id) {
        return Ok(name);
    }
    let info = drivers.block.get_volume(volume_id).await?;
    let type_ref = match &info.volume_type_id {
        Some(type_id) => {
            let type_name = extract_volume_type(drivers, resources, type_id).await?;
            Some(reference::get_resource(&type_name))
        }
        None => None,
    };
    let name = fresh_name(resources, ResourceKind::Volume);
    resources.insert(name.clone(), volume_resource(&name, &info, type_ref));
    Ok(name)
}

pub async fn extract_network(
    drivers: &Drivers,
    resources: &mut ResourceMap,
    network_id: &str,
) -> Result<String, EngineError> {
    if let Some(name) = find_by_live_id(resources, ResourceKind::Network, network_id) {
        return Ok(name);
    }
    let info = drivers.network.get_network(network_id).await?;
    let name = fresh_name(resources, ResourceKind::Network);
    resources.insert(name.clone(), network_resource(&name, &info));
    Ok(name)
}

pub async fn extract_subnet(
    drivers: &Drivers,
    resources: &mut ResourceMap,
    subnet_id: &str,
) -> Result<String, EngineError> {
    if let Some(name) = find_by_live_id(resources, ResourceKind::Subnet, subnet_id) {
        return Ok(name);
    }
    let info = drivers.network.get_subnet(subnet_id).await?;
    let net_name = extract_network(drivers, resources, &info.network_id).await?;
    let name = fresh_name(resources, ResourceKind::Subnet);
    resources.insert(
        name.clone(),
        subnet_resource(&name, &info, reference::get_resource(&net_name)),
    );
    Ok(name)
}

pub async fn extract_floatingip(
    drivers: &Drivers,
    resources: &mut ResourceMap,
    floatingip_id: &str,
) -> Result<String, EngineError> {
    if let Some(name) = find_by_live_id(resources, ResourceKind::FloatingIp, floatingip_id) {
        return Ok(name);
    }
    let info = drivers.network.get_floatingip(floatingip_id).await?;
    let net_name = extract_network(drivers, resources, &info.floating_network_id).await?;
    let name = fresh_name(resources, ResourceKind::FloatingIp);
    resources.insert(
        name.clone(),
        floatingip_resource(&name, &info, reference::get_resource(&net_name)),
    );
    Ok(name)
}

pub async fn extract_security_group(
    drivers: &Drivers,
    resources: &mut ResourceMap,
    group_id: &str,
) -> Result<String, EngineError> {
    if let Some(name) = find_by_live_id(resources, ResourceKind::SecurityGroup, group_id) {
        return Ok(name);
    }
    let info = drivers.network.get_security_group(group_id).await?;
    let name = fresh_name(resources, ResourceKind::SecurityGroup);
    resources.insert(name.clone(), security_group_resource(&name, &info));
    Ok(name)
}

pub async fn extract_keypair(
    drivers: &Drivers,
    resources: &mut ResourceMap,
    keypair_id: &str,
) -> Result<String, EngineError> {
    if let Some(name) = find_by_live_id(resources, ResourceKind::KeyPair, keypair_id) {
        return Ok(name);
    }
    let info = drivers.compute.get_keypair(keypair_id).await?;
    let name = fresh_name(resources, ResourceKind::KeyPair);
    resources.insert(name.clone(), keypair_resource(&name, &info));
    Ok(name)
}
