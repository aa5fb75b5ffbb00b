//! Template export: gateway discovery, disk probing, state stamping.
//!
//! Before a plan's template is rendered, every server gets a gateway
//! endpoint for data copy and every volume learns which device, format and
//! mount point it maps to. Side-effects (shareable flags, attachments,
//! migrate ports) push compensations so a failed export unwinds cleanly.

use std::collections::BTreeSet;
use std::time::Duration;

use serde_json::Value;

use portage_core::plan::ResourceMap;
use portage_core::{reference, ExtraProperties, ResourceKind};
use portage_driver::{Drivers, Gateway, GatewayAgent, VgwAllocator};

use crate::config::CloneConfig;
use crate::error::CloneError;
use crate::undo::UndoManager;
use crate::waiter::{AbortFlag, Tick, Waiter};

const VOLUME_IN_USE_ATTEMPTS: u32 = 120;
const PORT_ACTIVE_ATTEMPTS: u32 = 60;

/// Work out a gateway endpoint for every server and probe every attached
/// volume through it (in priority order: stopped
/// server via an allocated gateway VM, running server via the migrate
/// network, running server via an existing port's binding profile).
pub async fn handle_resources(
    drivers: &Drivers,
    vgw: &VgwAllocator,
    config: &CloneConfig,
    resources: &mut ResourceMap,
    sys_clone: bool,
    copy_data: bool,
    undo: &mut UndoManager,
) -> Result<(), CloneError> {
    let server_names: Vec<String> = resources
        .values()
        .filter(|r| r.kind == ResourceKind::Server)
        .map(|r| r.name.clone())
        .collect();
    for name in server_names {
        handle_server(drivers, vgw, config, resources, &name, sys_clone, copy_data, undo).await?;
    }
    let stack_names: Vec<String> = resources
        .values()
        .filter(|r| r.kind == ResourceKind::Stack)
        .map(|r| r.name.clone())
        .collect();
    for name in stack_names {
        handle_stack_resource(drivers, vgw, config, resources, &name, undo).await?;
    }
    stamp_states(drivers, resources, "cloning").await?;
    Ok(())
}

/// Enrich the embedded template of a nested stack resource: every volume
/// gets a gateway and a device probe, every server records its vm state,
/// `file://` children recurse.
async fn handle_stack_resource(
    drivers: &Drivers,
    vgw: &VgwAllocator,
    config: &CloneConfig,
    resources: &mut ResourceMap,
    name: &str,
    undo: &mut UndoManager,
) -> Result<(), CloneError> {
    let (stack_id, raw) = {
        let res = &resources[name];
        let raw = res
            .properties
            .get("template")
            .and_then(Value::as_str)
            .map(str::to_string);
        (res.id.clone(), raw)
    };
    let Some(raw) = raw else {
        return Ok(());
    };
    let mut parsed: Value = serde_json::from_str(&raw)
        .map_err(|e| CloneError::V2v(format!("unparseable embedded template: {e}")))?;
    enrich_embedded(drivers, vgw, config, &mut parsed, &stack_id, undo).await?;
    if let Some(res) = resources.get_mut(name) {
        res.properties
            .insert("template".to_string(), Value::String(parsed.to_string()));
    }
    Ok(())
}

async fn enrich_embedded(
    drivers: &Drivers,
    vgw: &VgwAllocator,
    config: &CloneConfig,
    template: &mut Value,
    stack_id: &str,
    undo: &mut UndoManager,
) -> Result<(), CloneError> {
    let keys: Vec<String> = template
        .get("resources")
        .and_then(Value::as_object)
        .map(|entries| entries.keys().cloned().collect())
        .unwrap_or_default();

    for key in keys {
        let type_tag = template["resources"][&key]
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        match type_tag.as_str() {
            "OS::Cinder::Volume" => {
                let already = template["resources"][&key]
                    .get("extra_properties")
                    .and_then(|e| e.get("gw_url"))
                    .is_some();
                if already {
                    continue;
                }
                let physical = drivers
                    .stack
                    .get_resource(stack_id, &key)
                    .await?
                    .physical_resource_id;
                let info = drivers.block.get_volume(&physical).await?;
                let gateway = vgw
                    .next(&info.availability_zone)
                    .map_err(|_| CloneError::V2v("no vgw host found".to_string()))?;
                let gw_url = gateway_url(config, &gateway.ip);
                let agent = drivers.agents.connect(&gw_url);
                let probe = probe_volume(drivers, agent.as_ref(), &gateway, &physical, undo).await?;

                let entry = &mut template["resources"][&key];
                entry["id"] = Value::String(physical.clone());
                let extra = entry
                    .as_object_mut()
                    .and_then(|e| {
                        e.entry("extra_properties")
                            .or_insert_with(|| Value::Object(Default::default()))
                            .as_object_mut()
                    })
                    .ok_or_else(|| CloneError::V2v("malformed embedded volume".to_string()))?;
                extra.insert("gw_url".to_string(), Value::String(gw_url));
                extra.insert("gw_id".to_string(), Value::String(gateway.id.clone()));
                extra.insert("is_deacidized".to_string(), Value::Bool(true));
                extra.insert("id".to_string(), Value::String(physical));
                extra.insert("status".to_string(), Value::String("in-use".to_string()));
                if let Some(dev) = probe.sys_dev_name {
                    extra.insert("sys_dev_name".to_string(), Value::String(dev));
                }
                if let Some(format) = probe.guest_format {
                    extra.insert("guest_format".to_string(), Value::String(format));
                }
                if let Some(mount) = probe.mount_point {
                    extra.insert("mount_point".to_string(), Value::String(mount));
                }
                if probe.set_shareable {
                    extra.insert("set_shareable".to_string(), Value::Bool(true));
                }
            }
            "OS::Nova::Server" => {
                let physical = drivers
                    .stack
                    .get_resource(stack_id, &key)
                    .await?
                    .physical_resource_id;
                let vm_state = drivers.compute.get_server(&physical).await?.vm_state;
                let entry = &mut template["resources"][&key];
                entry["id"] = Value::String(physical.clone());
                if let Some(extra) = entry
                    .as_object_mut()
                    .and_then(|e| {
                        e.entry("extra_properties")
                            .or_insert_with(|| Value::Object(Default::default()))
                            .as_object_mut()
                    })
                {
                    extra.insert("vm_state".to_string(), Value::String(vm_state));
                    extra.insert("id".to_string(), Value::String(physical));
                }
            }
            tag if tag.starts_with("file://") => {
                let child_stack = drivers
                    .stack
                    .get_resource(stack_id, &key)
                    .await?
                    .physical_resource_id;
                let content = template["resources"][&key]
                    .get("content")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                if let Some(content) = content {
                    let mut child: Value = serde_json::from_str(&content).map_err(|e| {
                        CloneError::V2v(format!("unparseable nested template: {e}"))
                    })?;
                    Box::pin(enrich_embedded(
                        drivers,
                        vgw,
                        config,
                        &mut child,
                        &child_stack,
                        undo,
                    ))
                    .await?;
                    template["resources"][&key]["content"] = Value::String(child.to_string());
                }
            }
            _ => {}
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn handle_server(
    drivers: &Drivers,
    vgw: &VgwAllocator,
    config: &CloneConfig,
    resources: &mut ResourceMap,
    name: &str,
    sys_clone: bool,
    copy_data: bool,
    undo: &mut UndoManager,
) -> Result<(), CloneError> {
    let (server_id, server_az, mut extra, bdms) = {
        let res = &resources[name];
        (
            res.id.clone(),
            res.properties
                .get("availability_zone")
                .and_then(Value::as_str)
                .map(str::to_string),
            res.extra_properties.clone(),
            res.properties
                .get("block_device_mapping_v2")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
        )
    };
    if extra.gw_url.is_some() {
        return Ok(());
    }

    let vm_state = match extra.vm_state.clone() {
        Some(state) => state,
        None => drivers.compute.get_server(&server_id).await?.vm_state,
    };
    extra.vm_state = Some(vm_state.clone());
    extra.sys_clone = Some(sys_clone);
    extra.is_deacidized = Some(true);

    if vm_state == "stopped" {
        let az = server_az.ok_or_else(|| CloneError::AvailabilityZoneNotFound {
            server_id: server_id.clone(),
        })?;
        let gateway = vgw
            .next(&az)
            .map_err(|_| CloneError::V2v("no vgw host found".to_string()))?;
        let gw_url = gateway_url(config, &gateway.ip);
        extra.gw_url = Some(gw_url.clone());
        extra.gw_id = Some(gateway.id.clone());
        write_extra(resources, name, extra);

        let agent = drivers.agents.connect(&gw_url);
        for bdm in &bdms {
            let Some(volume_name) = bdm.get("volume_id").and_then(reference::referenced_resource)
            else {
                continue;
            };
            let volume_name = volume_name.to_string();
            if !resources.contains_key(&volume_name) {
                continue;
            }
            let is_boot = boot_index_is_zero(bdm);
            {
                let volume = resources
                    .get_mut(&volume_name)
                    .ok_or_else(|| CloneError::V2v(format!("volume {volume_name} vanished")))?;
                volume.extra_properties.gw_url = Some(gw_url.clone());
                volume.extra_properties.gw_id = Some(gateway.id.clone());
                volume.extra_properties.is_deacidized = Some(true);
                if volume.extra_properties.copy_data.is_none() {
                    volume.extra_properties.copy_data = Some(copy_data);
                }
                if is_boot {
                    volume.extra_properties.sys_clone = Some(sys_clone);
                }
            }
            let wants_copy = resources[&volume_name]
                .extra_properties
                .copy_data
                .unwrap_or(copy_data);
            // Boot disks ride along only when system cloning is on.
            if wants_copy && (!is_boot || sys_clone) {
                attach_volume_to_gateway(
                    drivers,
                    agent.as_ref(),
                    resources,
                    &volume_name,
                    &gateway,
                    undo,
                )
                .await?;
            }
        }
        return Ok(());
    }

    // Running server: reach it over the migrate network, or fall back to
    // the host address recorded in a port's binding profile.
    let gw_url = if !config.migrate_net_map.is_empty() {
        let az = server_az.ok_or_else(|| CloneError::AvailabilityZoneNotFound {
            server_id: server_id.clone(),
        })?;
        let migrate_net = config.migrate_net_map.get(&az).ok_or_else(|| {
            CloneError::NoMigrateNetProvided {
                server_id: server_id.clone(),
            }
        })?;
        let attachment = drivers
            .compute
            .interface_attach(&server_id, Some(migrate_net.as_str()), None)
            .await?;
        let fixed_ip = attachment
            .fixed_ips
            .first()
            .map(|ip| ip.ip_address.clone())
            .ok_or_else(|| CloneError::V2v("migrate port has no fixed ip".to_string()))?;
        let port_id = attachment.port_id.clone();
        {
            let compute = drivers.compute.clone();
            let server_id = server_id.clone();
            let port_id = port_id.clone();
            undo.push("detach migrate port", move || async move {
                compute.interface_detach(&server_id, &port_id).await?;
                Ok(())
            });
        }
        extra.migrate_port_id = Some(port_id.clone());
        await_port_active(drivers, &port_id).await?;
        gateway_url(config, &fixed_ip)
    } else {
        let ports = drivers.network.port_list(Some(server_id.as_str())).await?;
        let host_ip = ports
            .iter()
            .find_map(|p| {
                p.binding_profile
                    .get("host_ip")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .ok_or_else(|| CloneError::NoMigrateNetProvided {
                server_id: server_id.clone(),
            })?;
        gateway_url(config, &host_ip)
    };
    extra.gw_url = Some(gw_url.clone());
    write_extra(resources, name, extra);

    // Probe each attached disk through the in-guest agent.
    let agent = drivers.agents.connect(&gw_url);
    for bdm in &bdms {
        let Some(volume_name) = bdm.get("volume_id").and_then(reference::referenced_resource)
        else {
            continue;
        };
        let volume_name = volume_name.to_string();
        let device_name = bdm
            .get("device_name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let Some(volume_id) = resources.get(&volume_name).map(|r| r.id.clone()) else {
            continue;
        };
        let guest_format = agent.get_disk_format(&device_name).await?;
        let mount_point = agent.get_disk_mount_point(&device_name).await?;
        let sys_dev_name = agent
            .get_disk_name(&volume_id)
            .await?
            .unwrap_or_else(|| device_name.clone());
        if let Some(volume) = resources.get_mut(&volume_name) {
            volume.extra_properties.gw_url = Some(gw_url.clone());
            volume.extra_properties.is_deacidized = Some(true);
            volume.extra_properties.guest_format = guest_format;
            volume.extra_properties.mount_point = mount_point;
            volume.extra_properties.sys_dev_name = Some(sys_dev_name);
            if volume.extra_properties.copy_data.is_none() {
                volume.extra_properties.copy_data = Some(copy_data);
            }
            if boot_index_is_zero(bdm) {
                volume.extra_properties.sys_clone = Some(sys_clone);
            }
        }
    }
    Ok(())
}

fn gateway_url(config: &CloneConfig, host: &str) -> String {
    format!("{host}:{}", config.v2vgateway_api_listen_port)
}

fn write_extra(resources: &mut ResourceMap, name: &str, extra: ExtraProperties) {
    if let Some(res) = resources.get_mut(name) {
        res.extra_properties = extra;
    }
}

fn boot_index_is_zero(bdm: &Value) -> bool {
    match bdm.get("boot_index") {
        Some(Value::Number(n)) => n.as_i64() == Some(0),
        Some(Value::String(s)) => s == "0",
        _ => false,
    }
}

/// What attaching a volume to a gateway learned about it.
pub struct VolumeProbe {
    pub sys_dev_name: Option<String>,
    pub guest_format: Option<String>,
    pub mount_point: Option<String>,
    pub set_shareable: bool,
}

/// Share + attach a source volume to a gateway VM, discover the device by
/// /dev set-difference, and mount it. Each side-effect pushes its
/// compensation.
pub async fn probe_volume(
    drivers: &Drivers,
    agent: &dyn GatewayAgent,
    gateway: &Gateway,
    volume_id: &str,
    undo: &mut UndoManager,
) -> Result<VolumeProbe, CloneError> {
    let info = drivers.block.get_volume(volume_id).await?;
    let mut set_shareable = false;
    if !info.shareable {
        tracing::debug!(volume = %volume_id, "marking volume shareable");
        drivers.block.set_volume_shareable(volume_id, true).await?;
        set_shareable = true;
        let block = drivers.block.clone();
        let id = volume_id.to_string();
        undo.push("clear shareable flag", move || async move {
            block.set_volume_shareable(&id, false).await?;
            Ok(())
        });
    }

    let disks_before: BTreeSet<String> = agent.list_disks().await?.into_iter().collect();

    drivers
        .compute
        .attach_volume(&gateway.id, volume_id, None)
        .await?;
    tracing::debug!(volume = %volume_id, gateway = %gateway.id, "volume attached to gateway");
    {
        let compute = drivers.compute.clone();
        let gw_id = gateway.id.clone();
        let id = volume_id.to_string();
        undo.push("detach volume from gateway", move || async move {
            compute.detach_volume(&gw_id, &id).await?;
            Ok(())
        });
    }

    await_volume_status(drivers, volume_id, "in-use").await?;

    let disks_after: BTreeSet<String> = agent.list_disks().await?.into_iter().collect();
    let mut new_disks = disks_after.difference(&disks_before);
    let sys_dev_name = match (new_disks.next(), new_disks.next()) {
        (Some(dev), None) => Some(dev.clone()),
        _ => None,
    };

    let mut probe = VolumeProbe {
        sys_dev_name: sys_dev_name.clone(),
        guest_format: None,
        mount_point: None,
        set_shareable,
    };
    if let Some(dev) = sys_dev_name {
        if let Some(format) = agent.get_disk_format(&dev).await? {
            let mount_point = agent
                .force_mount_disk(&dev, &format!("/opt/{volume_id}"))
                .await?;
            probe.guest_format = Some(format);
            probe.mount_point = Some(mount_point);
        }
    }
    Ok(probe)
}

/// [`probe_volume`] writing its findings into a plan resource.
pub async fn attach_volume_to_gateway(
    drivers: &Drivers,
    agent: &dyn GatewayAgent,
    resources: &mut ResourceMap,
    volume_name: &str,
    gateway: &Gateway,
    undo: &mut UndoManager,
) -> Result<(), CloneError> {
    let volume_id = resources[volume_name].id.clone();
    let probe = probe_volume(drivers, agent, gateway, &volume_id, undo).await?;
    if let Some(volume) = resources.get_mut(volume_name) {
        if probe.set_shareable {
            volume.extra_properties.set_shareable = Some(true);
        }
        volume.extra_properties.sys_dev_name = probe.sys_dev_name;
        volume.extra_properties.guest_format = probe.guest_format;
        volume.extra_properties.mount_point = probe.mount_point;
        volume.extra_properties.status = Some("in-use".to_string());
    }
    Ok(())
}

async fn await_volume_status(
    drivers: &Drivers,
    volume_id: &str,
    wanted: &str,
) -> Result<(), CloneError> {
    let waiter = Waiter::with_attempts(Duration::from_millis(500), VOLUME_IN_USE_ATTEMPTS);
    let outcome = waiter
        .wait_for(&AbortFlag::new(), || async move {
            let info = drivers.block.get_volume(volume_id).await?;
            if info.status == wanted {
                Ok::<_, CloneError>(Tick::Done(()))
            } else {
                Ok(Tick::Continue)
            }
        })
        .await?;
    match outcome.into_done() {
        Some(()) => Ok(()),
        None => Err(CloneError::V2v(format!(
            "volume {volume_id} never reached {wanted}"
        ))),
    }
}

async fn await_port_active(drivers: &Drivers, port_id: &str) -> Result<(), CloneError> {
    let waiter = Waiter::with_attempts(Duration::from_secs(1), PORT_ACTIVE_ATTEMPTS);
    let outcome = waiter
        .wait_for(&AbortFlag::new(), || async move {
            let info = drivers.network.get_port(port_id).await?;
            if info.status == "ACTIVE" {
                Ok::<_, CloneError>(Tick::Done(()))
            } else {
                Ok(Tick::Continue)
            }
        })
        .await?;
    match outcome.into_done() {
        Some(()) => Ok(()),
        None => Err(CloneError::V2v(format!("port {port_id} never became active"))),
    }
}

/// Overwrite the progress state of every server and volume in the plan,
/// recursing into nested stack templates.
pub async fn stamp_states(
    drivers: &Drivers,
    resources: &ResourceMap,
    state: &str,
) -> Result<(), CloneError> {
    for res in resources.values() {
        match res.kind {
            ResourceKind::Server if !res.id.is_empty() => {
                drivers.compute.reset_state(&res.id, state).await?;
            }
            ResourceKind::Volume if !res.id.is_empty() => {
                drivers.block.reset_state(&res.id, state).await?;
            }
            ResourceKind::Stack => {
                if let Some(template) = res.properties.get("template").and_then(Value::as_str) {
                    stamp_embedded(drivers, template, state).await?;
                }
            }
            _ => {}
        }
    }
    Ok(())
}

async fn stamp_embedded(
    drivers: &Drivers,
    raw_template: &str,
    state: &str,
) -> Result<(), CloneError> {
    let parsed: Value = serde_json::from_str(raw_template)
        .map_err(|e| CloneError::V2v(format!("unparseable embedded template: {e}")))?;
    let Some(entries) = parsed.get("resources").and_then(Value::as_object) else {
        return Ok(());
    };
    for entry in entries.values() {
        let id = entry
            .get("extra_properties")
            .and_then(|e| e.get("id"))
            .and_then(Value::as_str);
        match entry.get("type").and_then(Value::as_str) {
            Some("OS::Cinder::Volume") => {
                if let Some(id) = id {
                    drivers.block.reset_state(id, state).await?;
                }
            }
            Some("OS::Nova::Server") => {
                if let Some(id) = id {
                    drivers.compute.reset_state(id, state).await?;
                }
            }
            Some(tag) if tag.starts_with("file://") => {
                if let Some(content) = entry.get("content").and_then(Value::as_str) {
                    Box::pin(stamp_embedded(drivers, content, state)).await?;
                }
            }
            _ => {}
        }
    }
    Ok(())
}

/// Put servers and volumes back into their pre-export states once the
/// clone has finished.
pub async fn reset_resources(drivers: &Drivers, resources: &ResourceMap) {
    for res in resources.values() {
        let result = match res.kind {
            ResourceKind::Server if !res.id.is_empty() => {
                let state = res
                    .extra_properties
                    .vm_state
                    .clone()
                    .unwrap_or_else(|| "active".to_string());
                drivers.compute.reset_state(&res.id, &state).await
            }
            ResourceKind::Volume if !res.id.is_empty() => {
                let state = res
                    .extra_properties
                    .status
                    .clone()
                    .unwrap_or_else(|| "available".to_string());
                drivers.block.reset_state(&res.id, &state).await
            }
            _ => Ok(()),
        };
        if let Err(e) = result {
            tracing::warn!(resource = %res.name, error = %e, "resource state reset failed");
        }
    }
}

/// Detach the migrate-only ports attached during export.
pub async fn clear_migrate_ports(drivers: &Drivers, resources: &ResourceMap) {
    for res in resources.values() {
        if res.kind != ResourceKind::Server {
            continue;
        }
        if let Some(port_id) = &res.extra_properties.migrate_port_id {
            if let Err(e) = drivers.compute.interface_detach(&res.id, port_id).await {
                tracing::warn!(
                    server = %res.id,
                    port = %port_id,
                    error = %e,
                    "failed to detach migrate port"
                );
            }
        }
    }
}
