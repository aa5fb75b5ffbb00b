//! The add/edit/delete semantics over a plan's resource graph.
//!
//! Edits apply in order; dependencies are rebuilt once at the end. The
//! caller already holds the plan lock and persists the result.

use std::net::IpAddr;

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use portage_core::plan::ResourceSet;
use portage_core::{reference, Plan, ResourceKind, ResourceMap};
use portage_driver::types::AllocationPool;
use portage_driver::Drivers;

use crate::error::EngineError;
use crate::extract;
use crate::validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditAction {
    Add,
    Edit,
    Delete,
}

/// One entry of an `update-resources` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceEdit {
    pub action: EditAction,
    /// Template-local name of the target resource.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    /// Live-cloud id, for swaps and extractions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<ResourceKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copy_data: Option<bool>,
    /// Plain property overrides.
    #[serde(flatten)]
    pub properties: Map<String, Value>,
}

/// Apply a list of edits to `plan.updated_resources`, then rebuild the
/// dependency view.
pub async fn apply_edits(
    drivers: &Drivers,
    plan: &mut Plan,
    edits: Vec<ResourceEdit>,
) -> Result<(), EngineError> {
    for edit in edits {
        match edit.action {
            EditAction::Delete => delete_resource(plan, edit)?,
            EditAction::Add => add_resource(drivers, plan, edit).await?,
            EditAction::Edit => edit_resource(drivers, plan, edit).await?,
        }
    }
    plan.updated_dependencies.clear();
    plan.rebuild_dependencies(ResourceSet::Updated);
    Ok(())
}

fn target_name(edit: &ResourceEdit) -> Result<String, EngineError> {
    edit.resource_id
        .clone()
        .ok_or_else(|| EngineError::resources("resource_id must be provided"))
}

// ── delete ───────────────────────────────────────────────────────────────

fn delete_resource(plan: &mut Plan, edit: ResourceEdit) -> Result<(), EngineError> {
    let name = target_name(&edit)?;
    let target = plan
        .updated_resources
        .get(&name)
        .ok_or_else(|| EngineError::ResourceNotFound(name.clone()))?;

    if let Some(holder) = referencing_resource(&plan.updated_resources, &name) {
        return Err(EngineError::resources(format!(
            "resource {holder} still depends on {name}, delete failed"
        )));
    }

    let orphan_candidates: Vec<String> = target
        .property_refs()
        .into_iter()
        .filter(|n| plan.updated_resources.contains_key(n))
        .collect();
    plan.updated_resources.remove(&name);
    gc_orphans(&mut plan.updated_resources, orphan_candidates);
    Ok(())
}

/// Name of some resource other than `name` that references it, if any.
fn referencing_resource(resources: &ResourceMap, name: &str) -> Option<String> {
    resources
        .values()
        .filter(|r| r.name != name)
        .find(|r| r.properties.values().any(|v| reference::references(v, name)))
        .map(|r| r.name.clone())
}

/// Remove every candidate nothing references any more, cascading into its
/// own dependencies.
fn gc_orphans(resources: &mut ResourceMap, candidates: Vec<String>) {
    for candidate in candidates {
        if !resources.contains_key(&candidate) {
            continue;
        }
        if referencing_resource(resources, &candidate).is_some() {
            continue;
        }
        if let Some(removed) = resources.remove(&candidate) {
            tracing::debug!(resource = %candidate, "removed orphaned resource");
            let next: Vec<String> = removed
                .property_refs()
                .into_iter()
                .filter(|n| resources.contains_key(n))
                .collect();
            gc_orphans(resources, next);
        }
    }
}

// ── add ──────────────────────────────────────────────────────────────────

async fn add_resource(
    drivers: &Drivers,
    plan: &mut Plan,
    edit: ResourceEdit,
) -> Result<(), EngineError> {
    let id = edit
        .id
        .ok_or_else(|| EngineError::resources("id must be provided when adding a resource"))?;
    let kind = edit
        .resource_type
        .ok_or_else(|| EngineError::resources("resource_type must be provided when adding"))?;
    let resources = &mut plan.updated_resources;
    match kind {
        ResourceKind::Volume => {
            extract::extract_volume(drivers, resources, &id).await?;
        }
        ResourceKind::VolumeType => {
            extract::extract_volume_type(drivers, resources, &id).await?;
        }
        ResourceKind::Qos => {
            extract::extract_qos(drivers, resources, &id).await?;
        }
        ResourceKind::Network => {
            extract::extract_network(drivers, resources, &id).await?;
        }
        ResourceKind::Subnet => {
            extract::extract_subnet(drivers, resources, &id).await?;
        }
        ResourceKind::FloatingIp => {
            extract::extract_floatingip(drivers, resources, &id).await?;
        }
        ResourceKind::SecurityGroup => {
            extract::extract_security_group(drivers, resources, &id).await?;
        }
        ResourceKind::KeyPair => {
            extract::extract_keypair(drivers, resources, &id).await?;
        }
        other => {
            return Err(EngineError::resources(format!(
                "{} resource is unsupported to add",
                other.tag()
            )));
        }
    }
    Ok(())
}

// ── edit ─────────────────────────────────────────────────────────────────

async fn edit_resource(
    drivers: &Drivers,
    plan: &mut Plan,
    edit: ResourceEdit,
) -> Result<(), EngineError> {
    let name = target_name(&edit)?;
    let kind = plan
        .updated_resources
        .get(&name)
        .map(|r| r.kind)
        .ok_or_else(|| EngineError::resources(format!("{name} resource not found")))?;

    // Shape-check the plain overrides against the stack engine's schema.
    // Load-balancer VIPs have no registered type there.
    if kind != ResourceKind::LbVip {
        let schema = drivers.stack.get_resource_type(kind.tag()).await?;
        validate::validate_properties(&edit.properties, &schema)?;
    }

    match kind {
        ResourceKind::Server => edit_server(plan, &name, edit),
        ResourceKind::KeyPair => edit_keypair(drivers, plan, &name, edit).await,
        ResourceKind::SecurityGroup => edit_security_group(drivers, plan, &name, edit).await,
        ResourceKind::FloatingIp => edit_floatingip(drivers, plan, &name, edit).await,
        ResourceKind::Port => edit_port(drivers, plan, &name, edit).await,
        ResourceKind::Network => edit_network(drivers, plan, &name, edit).await,
        ResourceKind::Subnet => edit_subnet(drivers, plan, &name, edit).await,
        ResourceKind::Volume => edit_volume(drivers, plan, &name, edit).await,
        ResourceKind::VolumeType => edit_volume_type(drivers, plan, &name, edit).await,
        ResourceKind::Qos => edit_qos(drivers, plan, &name, edit).await,
        ResourceKind::LbVip => {
            apply_simple_fields(plan, &name, edit.properties);
            Ok(())
        }
        other => Err(EngineError::resources(format!(
            "{} resource is unsupported to update",
            other.tag()
        ))),
    }
}

fn apply_simple_fields(plan: &mut Plan, name: &str, properties: Map<String, Value>) {
    if let Some(res) = plan.updated_resources.get_mut(name) {
        for (key, value) in properties {
            res.properties.insert(key, value);
        }
    }
}

fn edit_server(plan: &mut Plan, name: &str, edit: ResourceEdit) -> Result<(), EngineError> {
    const ALLOWED: [&str; 2] = ["user_data", "metadata"];
    for key in edit.properties.keys() {
        if !ALLOWED.contains(&key.as_str()) {
            return Err(EngineError::resources(format!(
                "'{key}' field of server is not allowed to update"
            )));
        }
    }
    apply_simple_fields(plan, name, edit.properties);
    Ok(())
}

async fn edit_keypair(
    drivers: &Drivers,
    plan: &mut Plan,
    name: &str,
    edit: ResourceEdit,
) -> Result<(), EngineError> {
    let current_id = plan.updated_resources[name].id.clone();
    let has_public_key = edit.properties.contains_key("public_key");
    match &edit.id {
        None if !has_public_key => {
            return Err(EngineError::resources(
                "'id' or 'public_key' must be provided when updating keypair resource",
            ));
        }
        Some(new_id) if *new_id != current_id => {
            let info = drivers.compute.get_keypair(new_id).await?;
            plan.updated_resources
                .insert(name.to_string(), extract::keypair_resource(name, &info));
        }
        _ => {
            // Overridden in place; the realized keypair no longer matches.
            if let Some(res) = plan.updated_resources.get_mut(name) {
                res.id.clear();
            }
        }
    }
    apply_simple_fields(plan, name, edit.properties);
    Ok(())
}

async fn edit_security_group(
    drivers: &Drivers,
    plan: &mut Plan,
    name: &str,
    edit: ResourceEdit,
) -> Result<(), EngineError> {
    let current_id = plan.updated_resources[name].id.clone();
    let has_rules = edit.properties.contains_key("rules");
    match &edit.id {
        None if !has_rules => {
            return Err(EngineError::resources(
                "'id' or 'rules' must be provided when updating security group resource",
            ));
        }
        Some(new_id) if *new_id != current_id => {
            let info = drivers.network.get_security_group(new_id).await?;
            plan.updated_resources.insert(
                name.to_string(),
                extract::security_group_resource(name, &info),
            );
        }
        _ => {
            if let Some(res) = plan.updated_resources.get_mut(name) {
                res.id.clear();
            }
        }
    }
    apply_simple_fields(plan, name, edit.properties);
    Ok(())
}

async fn edit_floatingip(
    drivers: &Drivers,
    plan: &mut Plan,
    name: &str,
    edit: ResourceEdit,
) -> Result<(), EngineError> {
    let new_id = edit.id.clone().ok_or_else(|| {
        EngineError::resources("'id' must be provided when updating floating ip resource")
    })?;
    let current_id = plan.updated_resources[name].id.clone();
    if new_id != current_id {
        let info = drivers.network.get_floatingip(&new_id).await?;
        if info.port_id.as_deref().is_some_and(|p| !p.is_empty()) {
            return Err(EngineError::resources(format!(
                "floating ip {new_id} is in use"
            )));
        }
        let net_ref = {
            let resources = &mut plan.updated_resources;
            let net_name =
                extract::extract_network(drivers, resources, &info.floating_network_id).await?;
            reference::get_resource(&net_name)
        };
        // Keep the original port binding, if the plan had one.
        let port_ref = plan.updated_resources[name].properties.get("port_id").cloned();
        let mut res = extract::floatingip_resource(name, &info, net_ref);
        if let Some(port_ref) = port_ref {
            res.set_property("port_id", port_ref);
        }
        plan.updated_resources.insert(name.to_string(), res);
    } else if let Some(res) = plan.updated_resources.get_mut(name) {
        res.id.clear();
    }
    apply_simple_fields(plan, name, edit.properties);
    Ok(())
}

// ── port ─────────────────────────────────────────────────────────────────

async fn edit_port(
    drivers: &Drivers,
    plan: &mut Plan,
    name: &str,
    edit: ResourceEdit,
) -> Result<(), EngineError> {
    for key in edit.properties.keys() {
        if key != "fixed_ips" {
            return Err(EngineError::resources(
                "only 'fixed_ips' property is allowed to be updated on a port",
            ));
        }
    }
    let ips_to_update = edit
        .properties
        .get("fixed_ips")
        .and_then(Value::as_array)
        .cloned()
        .ok_or_else(|| {
            EngineError::resources("only 'fixed_ips' property is allowed to be updated on a port")
        })?;

    let mut fixed_ips = plan.updated_resources[name]
        .properties
        .get("fixed_ips")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    if fixed_ips.len() != ips_to_update.len() {
        return Err(EngineError::resources(
            "the number of fixed ips must remain the same",
        ));
    }

    for (index, item) in ips_to_update.iter().enumerate() {
        let subnet_ref = item
            .get("subnet_id")
            .cloned()
            .ok_or_else(|| {
                EngineError::resources("subnet_id must be provided when updating fixed_ips")
            })?;
        let ip_address = item
            .get("ip_address")
            .and_then(Value::as_str)
            .map(str::to_string);

        if let Some(ip) = &ip_address {
            let pools = resolve_pools(drivers, plan, name, &subnet_ref).await?;
            if pools.is_empty() {
                return Err(EngineError::resources(
                    "cannot find subnet allocation_pools information",
                ));
            }
            if !ip_in_pools(ip, &pools) {
                return Err(EngineError::resources(format!(
                    "ip address {ip} doesn't match allocation_pools {}",
                    serde_json::to_string(&pools).unwrap_or_default()
                )));
            }
        }

        let entry = fixed_ips
            .get_mut(index)
            .and_then(Value::as_object_mut)
            .ok_or_else(|| EngineError::resources("malformed fixed_ips on port"))?;
        if let Some(ip) = &ip_address {
            entry.insert("ip_address".to_string(), Value::String(ip.clone()));
        }

        let original_subnet = entry.get("subnet_id").cloned();
        if original_subnet.as_ref() == Some(&subnet_ref) {
            // Same subnet: only the address changed.
        } else if let Some(reference::Reference::Resource(sub_name)) =
            reference::as_reference(&subnet_ref)
        {
            if !plan.updated_resources.contains_key(sub_name) {
                return Err(EngineError::resources(format!(
                    "{sub_name} resource not found"
                )));
            }
            entry.insert("subnet_id".to_string(), subnet_ref.clone());
        } else if let Some(subnet_id) = subnet_ref.as_str() {
            let local = {
                let resources = &mut plan.updated_resources;
                extract::extract_subnet(drivers, resources, subnet_id).await?
            };
            let entry = fixed_ips
                .get_mut(index)
                .and_then(Value::as_object_mut)
                .ok_or_else(|| EngineError::resources("malformed fixed_ips on port"))?;
            entry.insert("subnet_id".to_string(), reference::get_resource(&local));
        } else {
            return Err(EngineError::resources("subnet_id is invalid"));
        }
    }

    if let Some(res) = plan.updated_resources.get_mut(name) {
        res.properties
            .insert("fixed_ips".to_string(), Value::Array(fixed_ips));
        // Address changed: the realized port must be re-created on deploy.
        res.id.clear();
    }
    Ok(())
}

/// Allocation pools for a subnet reference of any accepted shape: a
/// `get_param` binding, a `get_resource` pointing into the plan, or a bare
/// live id resolved through the network driver.
async fn resolve_pools(
    drivers: &Drivers,
    plan: &Plan,
    port_name: &str,
    subnet_ref: &Value,
) -> Result<Vec<AllocationPool>, EngineError> {
    match reference::as_reference(subnet_ref) {
        Some(reference::Reference::Param(param)) => {
            let subnet_id = plan.updated_resources[port_name]
                .parameters
                .get(param)
                .and_then(|spec| spec.default.as_ref())
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| EngineError::resources(format!("{param} parameter not found")))?;
            let subnet = drivers.network.get_subnet(&subnet_id).await?;
            Ok(subnet.allocation_pools)
        }
        Some(reference::Reference::Resource(sub_name)) => {
            let subnet = plan
                .updated_resources
                .get(sub_name)
                .ok_or_else(|| EngineError::resources(format!("{sub_name} resource not found")))?;
            let pools = subnet
                .properties
                .get("allocation_pools")
                .cloned()
                .unwrap_or(Value::Array(vec![]));
            Ok(serde_json::from_value(pools)
                .map_err(|e| EngineError::resources(format!("malformed allocation_pools: {e}")))?)
        }
        _ => match subnet_ref.as_str() {
            Some(subnet_id) => {
                let subnet = drivers.network.get_subnet(subnet_id).await.map_err(|e| {
                    EngineError::resources(format!("subnet {subnet_id} not found: {e}"))
                })?;
                Ok(subnet.allocation_pools)
            }
            None => Err(EngineError::resources("subnet_id is invalid")),
        },
    }
}

fn ip_in_pools(ip: &str, pools: &[AllocationPool]) -> bool {
    let Ok(ip) = ip.parse::<IpAddr>() else {
        return false;
    };
    pools.iter().any(|pool| {
        match (pool.start.parse::<IpAddr>(), pool.end.parse::<IpAddr>()) {
            (Ok(start), Ok(end)) => ip_to_int(&start) <= ip_to_int(&ip) && ip_to_int(&ip) <= ip_to_int(&end),
            _ => false,
        }
    })
}

fn ip_to_int(ip: &IpAddr) -> u128 {
    match ip {
        IpAddr::V4(v4) => u32::from(*v4) as u128,
        IpAddr::V6(v6) => u128::from(*v6),
    }
}

// ── network / subnet ─────────────────────────────────────────────────────

async fn edit_network(
    drivers: &Drivers,
    plan: &mut Plan,
    name: &str,
    edit: ResourceEdit,
) -> Result<(), EngineError> {
    let current_id = plan.updated_resources[name].id.clone();
    match edit.id.clone() {
        Some(new_id) if new_id != current_id => {
            swap_network(drivers, plan, name, &new_id, None).await?;
        }
        _ => {
            invalidate_network_tree(plan, name);
            // A re-created network cannot carry the provider segmentation id
            // of the old one unless the caller pinned a fresh one.
            let pinned = edit
                .properties
                .get("value_specs")
                .and_then(|v| v.get("provider:segmentation_id"))
                .is_some();
            if !pinned {
                if let Some(res) = plan.updated_resources.get_mut(name) {
                    if let Some(specs) = res
                        .properties
                        .get_mut("value_specs")
                        .and_then(Value::as_object_mut)
                    {
                        specs.remove("provider:segmentation_id");
                    }
                }
            }
        }
    }
    apply_simple_fields(plan, name, edit.properties);
    Ok(())
}

/// Replace a network by live id, then re-home every dependent subnet (bar
/// `except_subnet`) onto a random subnet of the new network.
async fn swap_network(
    drivers: &Drivers,
    plan: &mut Plan,
    name: &str,
    new_id: &str,
    except_subnet: Option<&str>,
) -> Result<(), EngineError> {
    let info = drivers.network.get_network(new_id).await?;
    if info.subnet_ids.is_empty() {
        return Err(EngineError::resources(format!(
            "no subnets found in network {new_id}"
        )));
    }
    validate_server_network_duplication(plan, name, new_id)?;

    plan.updated_resources
        .insert(name.to_string(), extract::network_resource(name, &info));

    let dependent_subnets: Vec<String> = Plan::compute_dependencies(&plan.updated_resources)
        .values()
        .filter(|dep| {
            dep.kind == ResourceKind::Subnet
                && dep.dependencies.iter().any(|d| d == name)
                && Some(dep.name_in_template.as_str()) != except_subnet
        })
        .map(|dep| dep.name_in_template.clone())
        .collect();

    for subnet_name in dependent_subnets {
        let random_subnet = info
            .subnet_ids
            .choose(&mut rand::thread_rng())
            .cloned()
            .unwrap_or_default();
        rehome_subnet(drivers, plan, &subnet_name, &random_subnet).await?;
    }
    Ok(())
}

async fn edit_subnet(
    drivers: &Drivers,
    plan: &mut Plan,
    name: &str,
    edit: ResourceEdit,
) -> Result<(), EngineError> {
    match edit.id.clone() {
        Some(new_id) => {
            let info = drivers.network.get_subnet(&new_id).await?;
            let net_name = plan.updated_resources[name]
                .properties
                .get("network_id")
                .and_then(reference::referenced_resource)
                .map(str::to_string)
                .ok_or_else(|| {
                    EngineError::resources("subnet has no network resource reference")
                })?;
            let net_res = plan
                .updated_resources
                .get(&net_name)
                .ok_or_else(|| {
                    EngineError::resources(format!("network resource {net_name} not found"))
                })?;
            // A subnet swap may force the parent network to swap too.
            if net_res.id != info.network_id {
                swap_network(drivers, plan, &net_name, &info.network_id, Some(name)).await?;
            }
            rehome_subnet(drivers, plan, name, &new_id).await?;
        }
        None => {
            // In-place invalidation: the subnet and its network tree get
            // re-created on deploy.
            let net_names: Vec<String> = plan.updated_resources[name]
                .property_refs()
                .into_iter()
                .filter(|n| {
                    plan.updated_resources
                        .get(n)
                        .is_some_and(|r| r.kind == ResourceKind::Network)
                })
                .collect();
            for net_name in net_names {
                invalidate_network_tree(plan, &net_name);
                if let Some(res) = plan.updated_resources.get_mut(&net_name) {
                    if let Some(specs) = res
                        .properties
                        .get_mut("value_specs")
                        .and_then(Value::as_object_mut)
                    {
                        specs.remove("provider:segmentation_id");
                    }
                }
            }
        }
    }
    apply_simple_fields(plan, name, edit.properties);
    Ok(())
}

/// Point a subnet resource at a different live subnet; dependent ports lose
/// their realized id and any fixed address that belonged to the old subnet.
async fn rehome_subnet(
    drivers: &Drivers,
    plan: &mut Plan,
    name: &str,
    new_subnet_id: &str,
) -> Result<(), EngineError> {
    if plan.updated_resources[name].id == new_subnet_id {
        tracing::debug!(subnet = %name, "subnet unchanged, skipping");
        return Ok(());
    }
    let info = drivers.network.get_subnet(new_subnet_id).await?;
    let network_ref = plan.updated_resources[name]
        .properties
        .get("network_id")
        .cloned()
        .unwrap_or(Value::Null);
    plan.updated_resources.insert(
        name.to_string(),
        extract::subnet_resource(name, &info, network_ref),
    );

    let dependent_ports: Vec<String> = Plan::compute_dependencies(&plan.updated_resources)
        .values()
        .filter(|dep| dep.kind == ResourceKind::Port && dep.dependencies.iter().any(|d| d == name))
        .map(|dep| dep.name_in_template.clone())
        .collect();
    for port_name in dependent_ports {
        if let Some(port) = plan.updated_resources.get_mut(&port_name) {
            port.id.clear();
            if let Some(fixed_ips) = port
                .properties
                .get_mut("fixed_ips")
                .and_then(Value::as_array_mut)
            {
                for entry in fixed_ips.iter_mut().filter_map(Value::as_object_mut) {
                    let on_this_subnet = entry
                        .get("subnet_id")
                        .and_then(reference::referenced_resource)
                        == Some(name);
                    if on_this_subnet {
                        entry.remove("ip_address");
                    }
                }
            }
        }
    }
    Ok(())
}

/// Clear the realized ids of a network and everything hanging off it, so
/// the whole tree is re-created on deploy.
fn invalidate_network_tree(plan: &mut Plan, net_name: &str) {
    const NET_DEPENDENTS: [ResourceKind; 4] = [
        ResourceKind::Subnet,
        ResourceKind::Port,
        ResourceKind::FloatingIp,
        ResourceKind::Router,
    ];
    const SECOND_ORDER: [ResourceKind; 2] = [ResourceKind::RouterInterface, ResourceKind::Port];

    let deps = Plan::compute_dependencies(&plan.updated_resources);
    let mut to_clear = vec![net_name.to_string()];
    for dep in deps.values() {
        if NET_DEPENDENTS.contains(&dep.kind) && dep.dependencies.iter().any(|d| d == net_name) {
            to_clear.push(dep.name_in_template.clone());
            for second in deps.values() {
                if SECOND_ORDER.contains(&second.kind)
                    && second
                        .dependencies
                        .iter()
                        .any(|d| d == &dep.name_in_template)
                {
                    to_clear.push(second.name_in_template.clone());
                }
            }
        }
    }
    for name in to_clear {
        if let Some(res) = plan.updated_resources.get_mut(&name) {
            res.id.clear();
        }
    }
}

/// Reject a network swap that would leave one server with two ports on the
/// same network.
fn validate_server_network_duplication(
    plan: &Plan,
    net_name: &str,
    net_id: &str,
) -> Result<(), EngineError> {
    let resources = &plan.updated_resources;
    for server in resources
        .values()
        .filter(|r| r.kind == ResourceKind::Server)
    {
        let Some(networks) = server.properties.get("networks").and_then(Value::as_array) else {
            continue;
        };
        let mut exist_nets: Vec<String> = Vec::new();
        let mut targets_swapped_net = false;

        let mut record = |value: &Value, owner: &portage_core::Resource| {
            match reference::as_reference(value) {
                Some(reference::Reference::Resource(r)) => {
                    if r == net_name {
                        targets_swapped_net = true;
                    } else if let Some(res) = resources.get(r) {
                        exist_nets.push(res.id.clone());
                    }
                }
                Some(reference::Reference::Param(p)) => {
                    if let Some(id) = owner
                        .parameters
                        .get(p)
                        .and_then(|spec| spec.default.as_ref())
                        .and_then(Value::as_str)
                    {
                        exist_nets.push(id.to_string());
                    }
                }
                _ => {
                    if let Some(id) = value.as_str() {
                        exist_nets.push(id.to_string());
                    }
                }
            }
        };

        for entry in networks {
            if let Some(port_ref) = entry.get("port").and_then(reference::referenced_resource) {
                if let Some(port_res) = resources.get(port_ref) {
                    if let Some(network_id) = port_res.properties.get("network_id") {
                        record(network_id, port_res);
                    }
                }
            }
            if let Some(uuid) = entry.get("uuid") {
                record(uuid, server);
            }
            if let Some(network) = entry.get("network") {
                record(network, server);
            }
        }

        if targets_swapped_net && exist_nets.iter().any(|id| id == net_id) {
            return Err(EngineError::resources(format!(
                "Duplicate networks {net_id} found on server {}",
                server.name
            )));
        }
    }
    Ok(())
}

// ── volumes ──────────────────────────────────────────────────────────────

async fn edit_volume(
    drivers: &Drivers,
    plan: &mut Plan,
    name: &str,
    edit: ResourceEdit,
) -> Result<(), EngineError> {
    let current_id = plan.updated_resources[name].id.clone();
    if let Some(new_id) = edit.id.clone() {
        if new_id != current_id {
            let old_refs: Vec<String> = plan.updated_resources[name]
                .property_refs()
                .into_iter()
                .filter(|n| plan.updated_resources.contains_key(n))
                .collect();
            let info = drivers.block.get_volume(&new_id).await?;
            let type_ref = match &info.volume_type_id {
                Some(type_id) => {
                    let resources = &mut plan.updated_resources;
                    let type_name =
                        extract::extract_volume_type(drivers, resources, type_id).await?;
                    Some(reference::get_resource(&type_name))
                }
                None => None,
            };
            let mut res = extract::volume_resource(name, &info, type_ref);
            // An already-realized volume is bound by parameter, not rebuilt.
            res.extra_properties.exist = Some(true);
            plan.updated_resources.insert(name.to_string(), res);
            gc_orphans(&mut plan.updated_resources, old_refs);
        }
    }
    if let Some(copy_data) = edit.copy_data {
        if let Some(res) = plan.updated_resources.get_mut(name) {
            res.extra_properties.copy_data = Some(copy_data);
        }
    }
    apply_simple_fields(plan, name, edit.properties);
    Ok(())
}

async fn edit_volume_type(
    drivers: &Drivers,
    plan: &mut Plan,
    name: &str,
    edit: ResourceEdit,
) -> Result<(), EngineError> {
    let current_id = plan.updated_resources[name].id.clone();
    if let Some(new_id) = edit.id.clone() {
        if new_id != current_id {
            let old_refs: Vec<String> = plan.updated_resources[name]
                .property_refs()
                .into_iter()
                .filter(|n| plan.updated_resources.contains_key(n))
                .collect();
            let info = drivers.block.get_volume_type(&new_id).await?;
            let qos_ref = match &info.qos_specs_id {
                Some(qos_id) => {
                    let resources = &mut plan.updated_resources;
                    let qos_name = extract::extract_qos(drivers, resources, qos_id).await?;
                    Some(reference::get_resource(&qos_name))
                }
                None => None,
            };
            plan.updated_resources.insert(
                name.to_string(),
                extract::volume_type_resource(name, &info, qos_ref),
            );
            gc_orphans(&mut plan.updated_resources, old_refs);
        }
    }
    apply_simple_fields(plan, name, edit.properties);
    Ok(())
}

async fn edit_qos(
    drivers: &Drivers,
    plan: &mut Plan,
    name: &str,
    edit: ResourceEdit,
) -> Result<(), EngineError> {
    let current_id = plan.updated_resources[name].id.clone();
    if let Some(new_id) = edit.id.clone() {
        if new_id != current_id {
            let info = drivers.block.get_qos_specs(&new_id).await?;
            plan.updated_resources
                .insert(name.to_string(), extract::qos_resource(name, &info));
        }
    }
    apply_simple_fields(plan, name, edit.properties);
    Ok(())
}
