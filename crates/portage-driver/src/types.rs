use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use portage_core::{FilesMap, StackStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub id: String,
    pub name: String,
    pub status: String,
    /// e.g. "active", "stopped"
    pub vm_state: String,
    pub availability_zone: String,
    pub flavor_id: String,
    #[serde(default)]
    pub key_name: Option<String>,
    #[serde(default)]
    pub attached_volume_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlavorInfo {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyPairInfo {
    pub id: String,
    pub name: String,
    pub public_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeInfo {
    pub id: String,
    pub name: String,
    pub status: String,
    pub size: i64,
    pub availability_zone: String,
    pub bootable: bool,
    pub shareable: bool,
    #[serde(default)]
    pub volume_type_id: Option<String>,
    #[serde(default)]
    pub consistency_group_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeTypeInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub extra_specs: Value,
    #[serde(default)]
    pub qos_specs_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QosSpecsInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub specs: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub id: String,
    pub name: String,
    pub admin_state_up: bool,
    pub shared: bool,
    #[serde(default)]
    pub subnet_ids: Vec<String>,
    #[serde(default)]
    pub segmentation_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationPool {
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubnetInfo {
    pub id: String,
    pub name: String,
    pub network_id: String,
    pub cidr: String,
    #[serde(default)]
    pub gateway_ip: Option<String>,
    pub enable_dhcp: bool,
    #[serde(default)]
    pub allocation_pools: Vec<AllocationPool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixedIp {
    pub subnet_id: String,
    pub ip_address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortInfo {
    pub id: String,
    pub name: String,
    pub network_id: String,
    pub mac_address: String,
    pub admin_state_up: bool,
    /// "ACTIVE" once the backing host wired the port up.
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub fixed_ips: Vec<FixedIp>,
    #[serde(default)]
    pub security_group_ids: Vec<String>,
    /// Host-side binding details; `host_ip` is the fallback data-copy
    /// address for a running server.
    #[serde(default)]
    pub binding_profile: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FloatingIpInfo {
    pub id: String,
    pub floating_network_id: String,
    pub floating_ip_address: String,
    #[serde(default)]
    pub port_id: Option<String>,
    #[serde(default)]
    pub fixed_ip_address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterInfo {
    pub id: String,
    pub name: String,
    pub admin_state_up: bool,
    #[serde(default)]
    pub external_gateway_info: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityGroupInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Raw rule objects; normalized by the mutation engine on re-extract.
    #[serde(default)]
    pub rules: Vec<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePortRequest {
    pub network_id: String,
    #[serde(default)]
    pub mac_address: Option<String>,
    #[serde(default)]
    pub fixed_ips: Vec<FixedIp>,
    #[serde(default)]
    pub security_group_ids: Vec<String>,
    pub admin_state_up: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceAttachment {
    pub port_id: String,
    #[serde(default)]
    pub fixed_ips: Vec<FixedIp>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackInfo {
    pub id: String,
    pub stack_name: String,
    pub stack_status: StackStatus,
    pub disable_rollback: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackEvent {
    pub resource_name: String,
    pub resource_status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackResource {
    pub resource_name: String,
    pub physical_resource_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateStackRequest {
    pub stack_name: String,
    /// Serialized template body.
    pub template: String,
    #[serde(default)]
    pub files: FilesMap,
    pub disable_rollback: bool,
}

/// Property schema of one resource type, as reported by the stack engine.
/// A `"*"` key describes homogeneous children.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertySchema {
    #[serde(rename = "type")]
    pub property_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<BTreeMap<String, PropertySchema>>,
}

pub type ResourceTypeSchema = BTreeMap<String, PropertySchema>;
