use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::reference;

/// The closed set of resource kinds a plan can carry. Serialized with the
/// qualified type tags used by the template language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    #[serde(rename = "OS::Nova::Server")]
    Server,
    #[serde(rename = "OS::Cinder::Volume")]
    Volume,
    #[serde(rename = "OS::Cinder::VolumeType")]
    VolumeType,
    #[serde(rename = "OS::Cinder::Qos")]
    Qos,
    #[serde(rename = "OS::Cinder::ConsistencyGroup")]
    ConsistencyGroup,
    #[serde(rename = "OS::Neutron::Net")]
    Network,
    #[serde(rename = "OS::Neutron::Subnet")]
    Subnet,
    #[serde(rename = "OS::Neutron::Port")]
    Port,
    #[serde(rename = "OS::Neutron::Router")]
    Router,
    #[serde(rename = "OS::Neutron::RouterInterface")]
    RouterInterface,
    #[serde(rename = "OS::Neutron::FloatingIP")]
    FloatingIp,
    #[serde(rename = "OS::Neutron::SecurityGroup")]
    SecurityGroup,
    #[serde(rename = "OS::Nova::KeyPair")]
    KeyPair,
    #[serde(rename = "OS::Nova::Flavor")]
    Flavor,
    #[serde(rename = "OS::Neutron::Vip")]
    LbVip,
    #[serde(rename = "OS::Neutron::Pool")]
    LbPool,
    #[serde(rename = "OS::Neutron::Listener")]
    LbListener,
    #[serde(rename = "OS::Neutron::PoolMember")]
    LbMember,
    #[serde(rename = "OS::Neutron::HealthMonitor")]
    LbMonitor,
    #[serde(rename = "OS::Heat::Stack")]
    Stack,
}

impl ResourceKind {
    pub fn tag(self) -> &'static str {
        match self {
            ResourceKind::Server => "OS::Nova::Server",
            ResourceKind::Volume => "OS::Cinder::Volume",
            ResourceKind::VolumeType => "OS::Cinder::VolumeType",
            ResourceKind::Qos => "OS::Cinder::Qos",
            ResourceKind::ConsistencyGroup => "OS::Cinder::ConsistencyGroup",
            ResourceKind::Network => "OS::Neutron::Net",
            ResourceKind::Subnet => "OS::Neutron::Subnet",
            ResourceKind::Port => "OS::Neutron::Port",
            ResourceKind::Router => "OS::Neutron::Router",
            ResourceKind::RouterInterface => "OS::Neutron::RouterInterface",
            ResourceKind::FloatingIp => "OS::Neutron::FloatingIP",
            ResourceKind::SecurityGroup => "OS::Neutron::SecurityGroup",
            ResourceKind::KeyPair => "OS::Nova::KeyPair",
            ResourceKind::Flavor => "OS::Nova::Flavor",
            ResourceKind::LbVip => "OS::Neutron::Vip",
            ResourceKind::LbPool => "OS::Neutron::Pool",
            ResourceKind::LbListener => "OS::Neutron::Listener",
            ResourceKind::LbMember => "OS::Neutron::PoolMember",
            ResourceKind::LbMonitor => "OS::Neutron::HealthMonitor",
            ResourceKind::Stack => "OS::Heat::Stack",
        }
    }

    /// Kinds isolated into the volume sub-stack during a cold clone.
    pub fn is_volume_shaped(self) -> bool {
        matches!(
            self,
            ResourceKind::Volume
                | ResourceKind::VolumeType
                | ResourceKind::Qos
                | ResourceKind::ConsistencyGroup
        )
    }

    /// Kinds whose `availability_zone` property is rewritten to the
    /// destination before deployment.
    pub fn takes_destination_az(self) -> bool {
        matches!(self, ResourceKind::Server | ResourceKind::Volume)
    }

    /// Local-name prefix used when the engine extracts a fresh resource.
    pub fn name_prefix(self) -> &'static str {
        match self {
            ResourceKind::Server => "server",
            ResourceKind::Volume => "volume",
            ResourceKind::VolumeType => "volume_type",
            ResourceKind::Qos => "qos",
            ResourceKind::ConsistencyGroup => "consistency_group",
            ResourceKind::Network => "network",
            ResourceKind::Subnet => "subnet",
            ResourceKind::Port => "port",
            ResourceKind::Router => "router",
            ResourceKind::RouterInterface => "router_interface",
            ResourceKind::FloatingIp => "floatingip",
            ResourceKind::SecurityGroup => "security_group",
            ResourceKind::KeyPair => "keypair",
            ResourceKind::Flavor => "flavor",
            ResourceKind::LbVip => "lb_vip",
            ResourceKind::LbPool => "lb_pool",
            ResourceKind::LbListener => "lb_listener",
            ResourceKind::LbMember => "lb_member",
            ResourceKind::LbMonitor => "lb_monitor",
            ResourceKind::Stack => "stack",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Engine-private fields carried next to the public properties of a
/// resource. Never submitted to the stack engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtraProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gw_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gw_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sys_clone: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copy_data: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_deacidized: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub migrate_port_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vm_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guest_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_point: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sys_dev_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exist: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set_shareable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// A template parameter declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    #[serde(rename = "type")]
    pub param_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ParamSpec {
    pub fn string(description: impl Into<String>, default: Option<Value>) -> Self {
        ParamSpec {
            param_type: "string".to_string(),
            description: description.into(),
            default,
        }
    }
}

/// A typed template element denoting one cloud object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ResourceKind,
    /// Live-cloud identifier; empty until the resource is realized.
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
    #[serde(default)]
    pub extra_properties: ExtraProperties,
    #[serde(default)]
    pub parameters: BTreeMap<String, ParamSpec>,
}

impl Resource {
    pub fn new(name: impl Into<String>, kind: ResourceKind, id: impl Into<String>) -> Self {
        Resource {
            name: name.into(),
            kind,
            id: id.into(),
            properties: Map::new(),
            extra_properties: ExtraProperties::default(),
            parameters: BTreeMap::new(),
        }
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: Value) {
        self.properties.insert(key.into(), value);
    }

    pub fn add_parameter(&mut self, name: impl Into<String>, spec: ParamSpec) {
        self.parameters.insert(name.into(), spec);
    }

    /// True when the live object already exists at the destination and must
    /// be bound by parameter instead of rebuilt.
    pub fn marked_existing(&self) -> bool {
        self.extra_properties.exist.unwrap_or(false)
    }

    /// Local resource names this resource references from its property tree.
    pub fn property_refs(&self) -> Vec<String> {
        let mut refs = Vec::new();
        for value in self.properties.values() {
            reference::collect_resource_refs(value, &mut refs);
        }
        refs
    }

    /// Rebuild the parameter declarations from the `get_param` bindings in
    /// the property tree, resolving each against `available`.
    pub fn rebuild_parameters(&mut self, available: &BTreeMap<String, ParamSpec>) {
        let mut bound = Vec::new();
        for value in self.properties.values() {
            reference::collect_param_refs(value, &mut bound);
        }
        self.parameters.clear();
        for name in bound {
            if let Some(spec) = available.get(&name) {
                self.parameters.insert(name, spec.clone());
            }
        }
    }
}
