//! Scripted in-memory cloud.
//!
//! Implements every driver facet plus the gateway agent against a single
//! mutable state table. Selected with `clone_driver = "static"` for local
//! development; the orchestrator and engine test suites drive it directly.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use uuid::Uuid;

use portage_core::StackStatus;

use crate::agent::{AgentConnector, CloneVolumeRequest, GatewayAgent, TransferStatus};
use crate::block::BlockDriver;
use crate::compute::ComputeDriver;
use crate::error::DriverError;
use crate::network::NetworkDriver;
use crate::stack::StackEngine;
use crate::types::{
    CreatePortRequest, CreateStackRequest, FixedIp, FlavorInfo, FloatingIpInfo,
    InterfaceAttachment, KeyPairInfo, NetworkInfo, PortInfo, QosSpecsInfo, ResourceTypeSchema,
    RouterInfo, SecurityGroupInfo, ServerInfo, StackEvent, StackInfo, StackResource, SubnetInfo,
    VolumeInfo, VolumeTypeInfo,
};
use crate::BoxFuture;

#[derive(Debug, Clone)]
struct StackState {
    info: StackInfo,
    resources: BTreeMap<String, String>,
    template: String,
    polls_left: u32,
    fail: bool,
    events: Vec<StackEvent>,
}

#[derive(Debug, Clone)]
struct TransferTask {
    polls_left: u32,
    outcome: TransferStatus,
}

#[derive(Default)]
struct CloudState {
    servers: HashMap<String, ServerInfo>,
    flavors: HashMap<String, FlavorInfo>,
    keypairs: HashMap<String, KeyPairInfo>,
    volumes: HashMap<String, VolumeInfo>,
    volume_types: HashMap<String, VolumeTypeInfo>,
    qos_specs: HashMap<String, QosSpecsInfo>,
    networks: HashMap<String, NetworkInfo>,
    subnets: HashMap<String, SubnetInfo>,
    ports: HashMap<String, PortInfo>,
    routers: HashMap<String, RouterInfo>,
    security_groups: HashMap<String, SecurityGroupInfo>,
    floatingips: HashMap<String, FloatingIpInfo>,
    schemas: HashMap<String, ResourceTypeSchema>,
    stacks: HashMap<String, StackState>,

    // scripted behavior
    stack_poll_delay: u32,
    fail_next_stack: bool,
    port_conflicts_left: u32,
    fail_clone_volume: bool,
    transfer_poll_delay: u32,

    // gateway agent
    gateway_disks: Vec<String>,
    disk_formats: HashMap<String, String>,
    mount_points: HashMap<String, String>,
    volume_devices: HashMap<String, String>,
    next_device: usize,
    transfers: HashMap<String, TransferTask>,

    // observation log
    reset_states: Vec<(String, String)>,
    volume_attachments: Vec<(String, String)>,
    volume_detachments: Vec<(String, String)>,
    interfaces_attached: Vec<(String, String)>,
    interfaces_detached: Vec<(String, String)>,
    created_ports: Vec<PortInfo>,
    deleted_ports: Vec<String>,
    deleted_servers: Vec<String>,
    deleted_volumes: Vec<String>,
    deleted_stacks: Vec<String>,
    fip_associations: Vec<(String, String, Option<String>)>,
    fip_disassociations: Vec<String>,
    clone_requests: Vec<CloneVolumeRequest>,
}

/// Scripted cloud shared by every facet; clones share state.
#[derive(Clone, Default)]
pub struct StaticCloud {
    state: Arc<Mutex<CloudState>>,
}

impl StaticCloud {
    pub fn new() -> Self {
        StaticCloud::default()
    }

    fn lock(&self) -> MutexGuard<'_, CloudState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ── seeding ──────────────────────────────────────────────────────────

    pub fn add_server(&self, server: ServerInfo) {
        self.lock().servers.insert(server.id.clone(), server);
    }

    pub fn add_flavor(&self, flavor: FlavorInfo) {
        self.lock().flavors.insert(flavor.id.clone(), flavor);
    }

    pub fn add_keypair(&self, keypair: KeyPairInfo) {
        self.lock().keypairs.insert(keypair.id.clone(), keypair);
    }

    pub fn add_volume(&self, volume: VolumeInfo) {
        self.lock().volumes.insert(volume.id.clone(), volume);
    }

    pub fn add_volume_type(&self, volume_type: VolumeTypeInfo) {
        self.lock()
            .volume_types
            .insert(volume_type.id.clone(), volume_type);
    }

    pub fn add_qos_specs(&self, qos: QosSpecsInfo) {
        self.lock().qos_specs.insert(qos.id.clone(), qos);
    }

    pub fn add_network(&self, network: NetworkInfo) {
        self.lock().networks.insert(network.id.clone(), network);
    }

    pub fn add_subnet(&self, subnet: SubnetInfo) {
        self.lock().subnets.insert(subnet.id.clone(), subnet);
    }

    pub fn add_port(&self, port: PortInfo) {
        self.lock().ports.insert(port.id.clone(), port);
    }

    pub fn add_router(&self, router: RouterInfo) {
        self.lock().routers.insert(router.id.clone(), router);
    }

    pub fn add_security_group(&self, group: SecurityGroupInfo) {
        self.lock().security_groups.insert(group.id.clone(), group);
    }

    pub fn add_floatingip(&self, fip: FloatingIpInfo) {
        self.lock().floatingips.insert(fip.id.clone(), fip);
    }

    pub fn set_resource_schema(&self, type_tag: &str, schema: ResourceTypeSchema) {
        self.lock().schemas.insert(type_tag.to_string(), schema);
    }

    pub fn add_gateway_disk(&self, dev_name: &str) {
        self.lock().gateway_disks.push(dev_name.to_string());
    }

    pub fn set_disk_format(&self, dev_name: &str, format: &str) {
        self.lock()
            .disk_formats
            .insert(dev_name.to_string(), format.to_string());
    }

    pub fn set_disk_mount_point(&self, dev_name: &str, mount_point: &str) {
        self.lock()
            .mount_points
            .insert(dev_name.to_string(), mount_point.to_string());
    }

    pub fn map_volume_device(&self, volume_id: &str, dev_name: &str) {
        self.lock()
            .volume_devices
            .insert(volume_id.to_string(), dev_name.to_string());
    }

    // ── scripting ────────────────────────────────────────────────────────

    /// Stacks stay CREATE_IN_PROGRESS for this many polls.
    pub fn script_stack_poll_delay(&self, polls: u32) {
        self.lock().stack_poll_delay = polls;
    }

    pub fn script_stack_failure(&self) {
        self.lock().fail_next_stack = true;
    }

    /// The next `n` port creations fail with a MAC conflict.
    pub fn script_port_conflicts(&self, n: u32) {
        self.lock().port_conflicts_left = n;
    }

    pub fn script_clone_volume_failure(&self) {
        self.lock().fail_clone_volume = true;
    }

    pub fn script_transfer_poll_delay(&self, polls: u32) {
        self.lock().transfer_poll_delay = polls;
    }

    // ── observation ──────────────────────────────────────────────────────

    pub fn reset_states(&self) -> Vec<(String, String)> {
        self.lock().reset_states.clone()
    }

    pub fn volume_attachments(&self) -> Vec<(String, String)> {
        self.lock().volume_attachments.clone()
    }

    pub fn volume_detachments(&self) -> Vec<(String, String)> {
        self.lock().volume_detachments.clone()
    }

    pub fn interfaces_attached(&self) -> Vec<(String, String)> {
        self.lock().interfaces_attached.clone()
    }

    pub fn interfaces_detached(&self) -> Vec<(String, String)> {
        self.lock().interfaces_detached.clone()
    }

    pub fn created_ports(&self) -> Vec<PortInfo> {
        self.lock().created_ports.clone()
    }

    pub fn deleted_ports(&self) -> Vec<String> {
        self.lock().deleted_ports.clone()
    }

    pub fn deleted_servers(&self) -> Vec<String> {
        self.lock().deleted_servers.clone()
    }

    pub fn deleted_volumes(&self) -> Vec<String> {
        self.lock().deleted_volumes.clone()
    }

    pub fn deleted_stacks(&self) -> Vec<String> {
        self.lock().deleted_stacks.clone()
    }

    pub fn fip_associations(&self) -> Vec<(String, String, Option<String>)> {
        self.lock().fip_associations.clone()
    }

    pub fn fip_disassociations(&self) -> Vec<String> {
        self.lock().fip_disassociations.clone()
    }

    pub fn clone_requests(&self) -> Vec<CloneVolumeRequest> {
        self.lock().clone_requests.clone()
    }

    pub fn submitted_templates(&self) -> Vec<String> {
        self.lock()
            .stacks
            .values()
            .map(|s| s.template.clone())
            .collect()
    }

    pub fn volume_shareable(&self, volume_id: &str) -> Option<bool> {
        self.lock().volumes.get(volume_id).map(|v| v.shareable)
    }
}

fn clone_or_not_found<T: Clone>(
    map: &HashMap<String, T>,
    what: &'static str,
    id: &str,
) -> Result<T, DriverError> {
    map.get(id)
        .cloned()
        .ok_or_else(|| DriverError::not_found(what, id))
}

impl ComputeDriver for StaticCloud {
    fn get_server<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<ServerInfo, DriverError>> {
        Box::pin(async move { clone_or_not_found(&self.lock().servers, "server", id) })
    }

    fn get_flavor<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<FlavorInfo, DriverError>> {
        Box::pin(async move { clone_or_not_found(&self.lock().flavors, "flavor", id) })
    }

    fn get_keypair<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<KeyPairInfo, DriverError>> {
        Box::pin(async move { clone_or_not_found(&self.lock().keypairs, "keypair", id) })
    }

    fn reset_state<'a>(
        &'a self,
        id: &'a str,
        state: &'a str,
    ) -> BoxFuture<'a, Result<(), DriverError>> {
        Box::pin(async move {
            self.lock()
                .reset_states
                .push((id.to_string(), state.to_string()));
            Ok(())
        })
    }

    fn attach_volume<'a>(
        &'a self,
        server_id: &'a str,
        volume_id: &'a str,
        _device: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Option<String>, DriverError>> {
        Box::pin(async move {
            let mut state = self.lock();
            state
                .volume_attachments
                .push((server_id.to_string(), volume_id.to_string()));
            // New device shows up on the gateway; volume flips to in-use.
            let dev = format!("vd{}", (b'b' + state.next_device as u8) as char);
            state.next_device += 1;
            state.gateway_disks.push(dev.clone());
            state
                .volume_devices
                .insert(volume_id.to_string(), dev.clone());
            if let Some(volume) = state.volumes.get_mut(volume_id) {
                volume.status = "in-use".to_string();
            } else {
                state.volumes.insert(
                    volume_id.to_string(),
                    VolumeInfo {
                        id: volume_id.to_string(),
                        name: volume_id.to_string(),
                        status: "in-use".to_string(),
                        size: 1,
                        availability_zone: "az-src".to_string(),
                        bootable: false,
                        shareable: false,
                        volume_type_id: None,
                        consistency_group_id: None,
                    },
                );
            }
            Ok(Some(dev))
        })
    }

    fn detach_volume<'a>(
        &'a self,
        server_id: &'a str,
        volume_id: &'a str,
    ) -> BoxFuture<'a, Result<(), DriverError>> {
        Box::pin(async move {
            let mut state = self.lock();
            state
                .volume_detachments
                .push((server_id.to_string(), volume_id.to_string()));
            if let Some(dev) = state.volume_devices.remove(volume_id) {
                state.gateway_disks.retain(|d| d != &dev);
            }
            if let Some(volume) = state.volumes.get_mut(volume_id) {
                volume.status = "available".to_string();
            }
            Ok(())
        })
    }

    fn interface_attach<'a>(
        &'a self,
        server_id: &'a str,
        network_id: Option<&'a str>,
        port_id: Option<&'a str>,
    ) -> BoxFuture<'a, Result<InterfaceAttachment, DriverError>> {
        Box::pin(async move {
            let mut state = self.lock();
            let (port_id, fixed_ips) = match (port_id, network_id) {
                (Some(port_id), _) => {
                    let fixed_ips = state
                        .ports
                        .get(port_id)
                        .map(|p| p.fixed_ips.clone())
                        .unwrap_or_default();
                    (port_id.to_string(), fixed_ips)
                }
                (None, Some(network_id)) => {
                    // Allocate a fresh port on the requested network.
                    let id = format!("port-{}", Uuid::new_v4());
                    let subnet_id = state
                        .subnets
                        .values()
                        .find(|s| s.network_id == network_id)
                        .map(|s| s.id.clone())
                        .unwrap_or_default();
                    let fixed_ips = vec![FixedIp {
                        subnet_id,
                        ip_address: format!("198.51.100.{}", state.next_device + 10),
                    }];
                    let mac_address = format!("fa:16:3e:00:00:{:02x}", state.next_device);
                    state.ports.insert(
                        id.clone(),
                        PortInfo {
                            id: id.clone(),
                            name: id.clone(),
                            network_id: network_id.to_string(),
                            mac_address,
                            admin_state_up: true,
                            status: "ACTIVE".to_string(),
                            device_id: Some(server_id.to_string()),
                            fixed_ips: fixed_ips.clone(),
                            security_group_ids: vec![],
                            binding_profile: BTreeMap::new(),
                        },
                    );
                    state.next_device += 1;
                    (id, fixed_ips)
                }
                (None, None) => {
                    return Err(DriverError::Api(
                        "interface_attach needs a network or a port".into(),
                    ));
                }
            };
            state
                .interfaces_attached
                .push((server_id.to_string(), port_id.clone()));
            Ok(InterfaceAttachment { port_id, fixed_ips })
        })
    }

    fn interface_detach<'a>(
        &'a self,
        server_id: &'a str,
        port_id: &'a str,
    ) -> BoxFuture<'a, Result<(), DriverError>> {
        Box::pin(async move {
            self.lock()
                .interfaces_detached
                .push((server_id.to_string(), port_id.to_string()));
            Ok(())
        })
    }

    fn delete_server<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<(), DriverError>> {
        Box::pin(async move {
            let mut state = self.lock();
            state.servers.remove(id);
            state.deleted_servers.push(id.to_string());
            Ok(())
        })
    }
}

impl BlockDriver for StaticCloud {
    fn get_volume<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<VolumeInfo, DriverError>> {
        Box::pin(async move { clone_or_not_found(&self.lock().volumes, "volume", id) })
    }

    fn get_volume_type<'a>(
        &'a self,
        id: &'a str,
    ) -> BoxFuture<'a, Result<VolumeTypeInfo, DriverError>> {
        Box::pin(async move { clone_or_not_found(&self.lock().volume_types, "volume type", id) })
    }

    fn get_qos_specs<'a>(
        &'a self,
        id: &'a str,
    ) -> BoxFuture<'a, Result<QosSpecsInfo, DriverError>> {
        Box::pin(async move { clone_or_not_found(&self.lock().qos_specs, "qos specs", id) })
    }

    fn set_volume_shareable<'a>(
        &'a self,
        id: &'a str,
        shareable: bool,
    ) -> BoxFuture<'a, Result<(), DriverError>> {
        Box::pin(async move {
            let mut state = self.lock();
            let volume = state
                .volumes
                .get_mut(id)
                .ok_or_else(|| DriverError::not_found("volume", id))?;
            volume.shareable = shareable;
            Ok(())
        })
    }

    fn set_volume_bootable<'a>(
        &'a self,
        id: &'a str,
        bootable: bool,
    ) -> BoxFuture<'a, Result<(), DriverError>> {
        Box::pin(async move {
            let mut state = self.lock();
            if let Some(volume) = state.volumes.get_mut(id) {
                volume.bootable = bootable;
            }
            Ok(())
        })
    }

    fn delete_volume<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<(), DriverError>> {
        Box::pin(async move {
            let mut state = self.lock();
            state.volumes.remove(id);
            state.deleted_volumes.push(id.to_string());
            Ok(())
        })
    }

    fn reset_state<'a>(
        &'a self,
        id: &'a str,
        state: &'a str,
    ) -> BoxFuture<'a, Result<(), DriverError>> {
        Box::pin(async move {
            self.lock()
                .reset_states
                .push((id.to_string(), state.to_string()));
            Ok(())
        })
    }
}

impl NetworkDriver for StaticCloud {
    fn get_network<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<NetworkInfo, DriverError>> {
        Box::pin(async move { clone_or_not_found(&self.lock().networks, "network", id) })
    }

    fn get_subnet<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<SubnetInfo, DriverError>> {
        Box::pin(async move { clone_or_not_found(&self.lock().subnets, "subnet", id) })
    }

    fn get_port<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<PortInfo, DriverError>> {
        Box::pin(async move { clone_or_not_found(&self.lock().ports, "port", id) })
    }

    fn get_router<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<RouterInfo, DriverError>> {
        Box::pin(async move { clone_or_not_found(&self.lock().routers, "router", id) })
    }

    fn get_security_group<'a>(
        &'a self,
        id: &'a str,
    ) -> BoxFuture<'a, Result<SecurityGroupInfo, DriverError>> {
        Box::pin(async move {
            clone_or_not_found(&self.lock().security_groups, "security group", id)
        })
    }

    fn get_floatingip<'a>(
        &'a self,
        id: &'a str,
    ) -> BoxFuture<'a, Result<FloatingIpInfo, DriverError>> {
        Box::pin(async move { clone_or_not_found(&self.lock().floatingips, "floating ip", id) })
    }

    fn port_list<'a>(
        &'a self,
        device_id: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Vec<PortInfo>, DriverError>> {
        Box::pin(async move {
            Ok(self
                .lock()
                .ports
                .values()
                .filter(|p| device_id.is_none() || p.device_id.as_deref() == device_id)
                .cloned()
                .collect())
        })
    }

    fn create_port<'a>(
        &'a self,
        request: CreatePortRequest,
    ) -> BoxFuture<'a, Result<PortInfo, DriverError>> {
        Box::pin(async move {
            let mut state = self.lock();
            if state.port_conflicts_left > 0 {
                state.port_conflicts_left -= 1;
                return Err(DriverError::MacAddressInUse);
            }
            let id = format!("port-{}", Uuid::new_v4());
            let port = PortInfo {
                id: id.clone(),
                name: id.clone(),
                network_id: request.network_id,
                mac_address: request
                    .mac_address
                    .unwrap_or_else(|| "fa:16:3e:00:00:01".to_string()),
                admin_state_up: request.admin_state_up,
                status: "ACTIVE".to_string(),
                device_id: None,
                fixed_ips: request.fixed_ips,
                security_group_ids: request.security_group_ids,
                binding_profile: BTreeMap::new(),
            };
            state.ports.insert(id, port.clone());
            state.created_ports.push(port.clone());
            Ok(port)
        })
    }

    fn delete_port<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<(), DriverError>> {
        Box::pin(async move {
            let mut state = self.lock();
            state.ports.remove(id);
            state.deleted_ports.push(id.to_string());
            Ok(())
        })
    }

    fn associate_floating_ip<'a>(
        &'a self,
        floatingip_id: &'a str,
        port_id: &'a str,
        fixed_address: Option<&'a str>,
    ) -> BoxFuture<'a, Result<(), DriverError>> {
        Box::pin(async move {
            let mut state = self.lock();
            state.fip_associations.push((
                floatingip_id.to_string(),
                port_id.to_string(),
                fixed_address.map(str::to_string),
            ));
            if let Some(fip) = state.floatingips.get_mut(floatingip_id) {
                fip.port_id = Some(port_id.to_string());
                fip.fixed_ip_address = fixed_address.map(str::to_string);
            }
            Ok(())
        })
    }

    fn disassociate_floating_ip<'a>(
        &'a self,
        floatingip_id: &'a str,
    ) -> BoxFuture<'a, Result<(), DriverError>> {
        Box::pin(async move {
            let mut state = self.lock();
            state.fip_disassociations.push(floatingip_id.to_string());
            if let Some(fip) = state.floatingips.get_mut(floatingip_id) {
                fip.port_id = None;
                fip.fixed_ip_address = None;
            }
            Ok(())
        })
    }
}

impl StackEngine for StaticCloud {
    fn create_stack<'a>(
        &'a self,
        request: CreateStackRequest,
    ) -> BoxFuture<'a, Result<StackInfo, DriverError>> {
        Box::pin(async move {
            let parsed: Value = serde_json::from_str(&request.template)
                .map_err(|e| DriverError::Api(format!("unparseable template: {e}")))?;
            let mut state = self.lock();
            let stack_id = format!("stack-id-{}", Uuid::new_v4());
            let mut resources = BTreeMap::new();
            if let Some(entries) = parsed.get("resources").and_then(Value::as_object) {
                for name in entries.keys() {
                    resources.insert(name.clone(), format!("{stack_id}:{name}"));
                }
            }
            let fail = state.fail_next_stack;
            state.fail_next_stack = false;
            let info = StackInfo {
                id: stack_id.clone(),
                stack_name: request.stack_name,
                stack_status: StackStatus::CreateInProgress,
                disable_rollback: request.disable_rollback,
            };
            let polls_left = state.stack_poll_delay;
            state.stacks.insert(
                stack_id,
                StackState {
                    info: info.clone(),
                    resources,
                    template: request.template,
                    polls_left,
                    fail,
                    events: vec![],
                },
            );
            Ok(info)
        })
    }

    fn get_stack<'a>(&'a self, stack_id: &'a str) -> BoxFuture<'a, Result<StackInfo, DriverError>> {
        Box::pin(async move {
            let mut state = self.lock();
            let stack = state
                .stacks
                .get_mut(stack_id)
                .ok_or_else(|| DriverError::not_found("stack", stack_id))?;
            if stack.info.stack_status == StackStatus::CreateInProgress {
                if stack.polls_left > 0 {
                    stack.polls_left -= 1;
                } else {
                    stack.info.stack_status = if stack.fail {
                        StackStatus::CreateFailed
                    } else {
                        StackStatus::CreateComplete
                    };
                    let status = if stack.fail {
                        "CREATE_FAILED"
                    } else {
                        "CREATE_COMPLETE"
                    };
                    let name = stack
                        .resources
                        .keys()
                        .next()
                        .cloned()
                        .unwrap_or_else(|| stack.info.stack_name.clone());
                    stack.events.push(StackEvent {
                        resource_name: name,
                        resource_status: status.to_string(),
                    });
                }
            }
            Ok(stack.info.clone())
        })
    }

    fn delete_stack<'a>(&'a self, stack_id: &'a str) -> BoxFuture<'a, Result<(), DriverError>> {
        Box::pin(async move {
            let mut state = self.lock();
            state.stacks.remove(stack_id);
            state.deleted_stacks.push(stack_id.to_string());
            Ok(())
        })
    }

    fn get_resource<'a>(
        &'a self,
        stack_id: &'a str,
        resource_name: &'a str,
    ) -> BoxFuture<'a, Result<StackResource, DriverError>> {
        Box::pin(async move {
            let state = self.lock();
            let stack = state
                .stacks
                .get(stack_id)
                .ok_or_else(|| DriverError::not_found("stack", stack_id))?;
            let physical = stack
                .resources
                .get(resource_name)
                .ok_or_else(|| DriverError::not_found("stack resource", resource_name))?;
            Ok(StackResource {
                resource_name: resource_name.to_string(),
                physical_resource_id: physical.clone(),
            })
        })
    }

    fn get_resource_type<'a>(
        &'a self,
        type_tag: &'a str,
    ) -> BoxFuture<'a, Result<ResourceTypeSchema, DriverError>> {
        Box::pin(async move {
            Ok(self
                .lock()
                .schemas
                .get(type_tag)
                .cloned()
                .unwrap_or_default())
        })
    }

    fn events_list<'a>(
        &'a self,
        stack_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<StackEvent>, DriverError>> {
        Box::pin(async move {
            let state = self.lock();
            let stack = state
                .stacks
                .get(stack_id)
                .ok_or_else(|| DriverError::not_found("stack", stack_id))?;
            let mut events = stack.events.clone();
            events.reverse();
            Ok(events)
        })
    }
}

impl GatewayAgent for StaticCloud {
    fn list_disks(&self) -> BoxFuture<'_, Result<Vec<String>, DriverError>> {
        Box::pin(async move { Ok(self.lock().gateway_disks.clone()) })
    }

    fn get_disk_name<'a>(
        &'a self,
        volume_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<String>, DriverError>> {
        Box::pin(async move { Ok(self.lock().volume_devices.get(volume_id).cloned()) })
    }

    fn get_disk_format<'a>(
        &'a self,
        dev_name: &'a str,
    ) -> BoxFuture<'a, Result<Option<String>, DriverError>> {
        Box::pin(async move { Ok(self.lock().disk_formats.get(dev_name).cloned()) })
    }

    fn get_disk_mount_point<'a>(
        &'a self,
        dev_name: &'a str,
    ) -> BoxFuture<'a, Result<Option<String>, DriverError>> {
        Box::pin(async move { Ok(self.lock().mount_points.get(dev_name).cloned()) })
    }

    fn force_mount_disk<'a>(
        &'a self,
        dev_name: &'a str,
        mount_point: &'a str,
    ) -> BoxFuture<'a, Result<String, DriverError>> {
        Box::pin(async move {
            self.lock()
                .mount_points
                .insert(dev_name.to_string(), mount_point.to_string());
            Ok(mount_point.to_string())
        })
    }

    fn clone_volume(
        &self,
        request: CloneVolumeRequest,
    ) -> BoxFuture<'_, Result<String, DriverError>> {
        Box::pin(async move {
            let mut state = self.lock();
            if state.fail_clone_volume {
                return Err(DriverError::Agent("transfer refused by agent".into()));
            }
            state.clone_requests.push(request);
            let task_id = format!("task-{}", Uuid::new_v4());
            let task = TransferTask {
                polls_left: state.transfer_poll_delay,
                outcome: TransferStatus::Finished,
            };
            state.transfers.insert(task_id.clone(), task);
            Ok(task_id)
        })
    }

    fn get_data_trans_status<'a>(
        &'a self,
        task_id: &'a str,
    ) -> BoxFuture<'a, Result<TransferStatus, DriverError>> {
        Box::pin(async move {
            let mut state = self.lock();
            let task = state
                .transfers
                .get_mut(task_id)
                .ok_or_else(|| DriverError::not_found("transfer task", task_id))?;
            if task.polls_left > 0 {
                task.polls_left -= 1;
                Ok(TransferStatus::InProgress)
            } else {
                Ok(task.outcome)
            }
        })
    }
}

impl AgentConnector for StaticCloud {
    fn connect(&self, _gw_url: &str) -> Arc<dyn GatewayAgent> {
        Arc::new(self.clone())
    }
}
