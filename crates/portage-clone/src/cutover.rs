//! Identity cut-over after a migrate deployment.
//!
//! The target stack is up; each original server's ports and floating IPs
//! get re-homed: floating IPs disassociate, the source port is detached and
//! deleted, an identical port (same MAC and fixed IPs) is re-created with a
//! bounded conflict-retry, swapped onto the target server, and the floating
//! IPs re-associate. A failure rolls the current server back LIFO.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;

use portage_core::plan::ResourceMap;
use portage_core::reference;
use portage_driver::types::{CreatePortRequest, FixedIp};
use portage_driver::Drivers;

use crate::config::CloneConfig;
use crate::error::CloneError;
use crate::undo::UndoManager;

/// One source server with the ports that need re-homing (only ports on
/// networks that already exist at the destination take part).
#[derive(Debug, Clone)]
pub struct ServerPorts {
    pub server_name: String,
    pub server_id: String,
    /// (template-local port name, live port id)
    pub ports: Vec<(String, String)>,
}

/// A floating ip bound through a port.
#[derive(Debug, Clone)]
pub struct FipBinding {
    pub fip_id: String,
    pub fixed_ip: Option<String>,
}

pub async fn realloc_port_floating_ips(
    drivers: &Drivers,
    config: &CloneConfig,
    plan_id: &str,
    stack_id: &str,
    resource_map: &ResourceMap,
    server_ports: &[ServerPorts],
    port_fips: &HashMap<String, Vec<FipBinding>>,
    unassociated: &HashSet<String>,
) -> Result<(), CloneError> {
    for server in server_ports {
        if let Err(e) = rehome_server(
            drivers,
            config,
            stack_id,
            resource_map,
            server,
            port_fips,
            unassociated,
        )
        .await
        {
            tracing::error!(
                plan_id = %plan_id,
                server = %server.server_id,
                error = %e,
                "cut-over failed, server rolled back"
            );
            return Err(CloneError::PlanMigrateFailed {
                plan_id: plan_id.to_string(),
                msg: e.to_string(),
            });
        }
    }
    Ok(())
}

async fn rehome_server(
    drivers: &Drivers,
    config: &CloneConfig,
    stack_id: &str,
    resource_map: &ResourceMap,
    server: &ServerPorts,
    port_fips: &HashMap<String, Vec<FipBinding>>,
    unassociated: &HashSet<String>,
) -> Result<(), CloneError> {
    let mut undo = UndoManager::new();
    // Latest live id per port name; the re-associate compensation reads it
    // so a rollback lands on whichever port currently exists.
    let port_map: Arc<Mutex<HashMap<String, String>>> = Arc::new(Mutex::new(
        server.ports.iter().cloned().collect(),
    ));

    let target_server = drivers
        .stack
        .get_resource(stack_id, &server.server_name)
        .await?
        .physical_resource_id;

    let result = rehome_ports(
        drivers,
        config,
        stack_id,
        resource_map,
        server,
        &target_server,
        port_fips,
        unassociated,
        &port_map,
        &mut undo,
    )
    .await;

    match result {
        Ok(()) => {
            undo.commit();
            Ok(())
        }
        Err(e) => {
            tracing::warn!(server = %server.server_id, "rolling back cut-over side-effects");
            undo.rollback().await;
            Err(e)
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn rehome_ports(
    drivers: &Drivers,
    config: &CloneConfig,
    stack_id: &str,
    resource_map: &ResourceMap,
    server: &ServerPorts,
    target_server: &str,
    port_fips: &HashMap<String, Vec<FipBinding>>,
    unassociated: &HashSet<String>,
    port_map: &Arc<Mutex<HashMap<String, String>>>,
    undo: &mut UndoManager,
) -> Result<(), CloneError> {
    for (port_name, port_id) in &server.ports {
        let bindings = port_fips.get(port_name).cloned().unwrap_or_default();

        // 1. Floating ips off the source port.
        for binding in &bindings {
            if unassociated.contains(&binding.fip_id) {
                continue;
            }
            tracing::debug!(fip = %binding.fip_id, "disassociating floating ip");
            drivers
                .network
                .disassociate_floating_ip(&binding.fip_id)
                .await?;
            let network = drivers.network.clone();
            let fip_id = binding.fip_id.clone();
            let port_map = port_map.clone();
            let port_name = port_name.clone();
            undo.push("re-associate floating ip", move || async move {
                let current = port_map
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .get(&port_name)
                    .cloned();
                if let Some(port_id) = current {
                    network
                        .associate_floating_ip(&fip_id, &port_id, None)
                        .await?;
                }
                Ok(())
            });
        }

        // 2. Source port off the source server (this deletes the port).
        tracing::debug!(port = %port_id, server = %server.server_id, "detaching source port");
        drivers
            .compute
            .interface_detach(&server.server_id, port_id)
            .await?;
        let request = port_create_request(resource_map, port_name)?;
        {
            let compute = drivers.compute.clone();
            let network = drivers.network.clone();
            let server_id = server.server_id.clone();
            let request = request.clone();
            let port_map = port_map.clone();
            let port_name = port_name.clone();
            undo.push("re-create and attach source port", move || async move {
                let port = network.create_port(request).await?;
                port_map
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(port_name, port.id.clone());
                compute
                    .interface_attach(&server_id, None, Some(port.id.as_str()))
                    .await?;
                Ok(())
            });
        }

        // 3. Re-create the port with the same identity, bounded retry on
        // address conflicts while the old port finishes dying.
        let mut new_port_id = None;
        for attempt in 0..config.create_port_attempts {
            match drivers.network.create_port(request.clone()).await {
                Ok(port) => {
                    new_port_id = Some(port.id);
                    break;
                }
                Err(e) if e.is_address_conflict() => {
                    tracing::debug!(
                        port = %port_name,
                        attempt,
                        "address still in use, retrying port creation"
                    );
                    tokio::time::sleep(Duration::from_millis(config.create_port_interval_ms))
                        .await;
                }
                Err(e) => return Err(e.into()),
            }
        }
        let new_port_id = new_port_id.ok_or_else(|| {
            CloneError::V2v(format!(
                "port {port_name} re-creation kept conflicting after {} attempts",
                config.create_port_attempts
            ))
        })?;
        port_map
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(port_name.clone(), new_port_id.clone());
        {
            let network = drivers.network.clone();
            let id = new_port_id.clone();
            undo.push("delete re-created port", move || async move {
                network.delete_port(&id).await?;
                Ok(())
            });
        }

        // 4. Swap the target server onto the re-created port.
        let stack_port = drivers
            .stack
            .get_resource(stack_id, port_name)
            .await?
            .physical_resource_id;
        tracing::debug!(port = %stack_port, server = %target_server, "detaching stack port");
        drivers
            .compute
            .interface_detach(target_server, &stack_port)
            .await?;
        drivers
            .compute
            .interface_attach(target_server, None, Some(new_port_id.as_str()))
            .await?;

        // 5. Floating ips onto the new port, original fixed address kept.
        for binding in &bindings {
            if unassociated.contains(&binding.fip_id) {
                continue;
            }
            drivers
                .network
                .associate_floating_ip(
                    &binding.fip_id,
                    &new_port_id,
                    binding.fixed_ip.as_deref(),
                )
                .await?;
        }
    }
    Ok(())
}

/// Rebuild the creation request for a source port from its plan resource:
/// same network, same security groups, same MAC, same fixed IPs.
fn port_create_request(
    resource_map: &ResourceMap,
    port_name: &str,
) -> Result<CreatePortRequest, CloneError> {
    let port = resource_map
        .get(port_name)
        .ok_or_else(|| CloneError::V2v(format!("port resource {port_name} missing from plan")))?;

    let live_id = |value: &Value| -> Option<String> {
        match reference::referenced_resource(value) {
            Some(local) => resource_map.get(local).map(|r| r.id.clone()),
            None => value.as_str().map(str::to_string),
        }
    };

    let network_id = port
        .properties
        .get("network_id")
        .and_then(|v| live_id(v))
        .ok_or_else(|| CloneError::V2v(format!("port {port_name} has no resolvable network")))?;

    let security_group_ids = port
        .properties
        .get("security_groups")
        .and_then(Value::as_array)
        .map(|groups| groups.iter().filter_map(|v| live_id(v)).collect())
        .unwrap_or_default();

    let fixed_ips = port
        .properties
        .get("fixed_ips")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| {
                    let subnet_id = entry.get("subnet_id").and_then(|v| live_id(v))?;
                    let ip_address = entry
                        .get("ip_address")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    Some(FixedIp {
                        subnet_id,
                        ip_address,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(CreatePortRequest {
        network_id,
        mac_address: port
            .properties
            .get("mac_address")
            .and_then(Value::as_str)
            .map(str::to_string),
        fixed_ips,
        security_group_ids,
        admin_state_up: true,
    })
}
