use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// How volume contents get to the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloneMode {
    /// All volume-shaped resources go into the sub-stack.
    Cold,
    /// Only system disks of servers with `sys_clone` set.
    Live,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloneConfig {
    pub clone_migrate_type: CloneMode,
    /// Bootable image substituted for cloned system disks.
    pub sys_image: String,
    /// AZ → network id used to reach running servers for data copy.
    #[serde(default)]
    pub migrate_net_map: BTreeMap<String, String>,
    pub v2vgateway_api_listen_port: u16,
    /// Prefix for plan-scoped sibling template files.
    pub plan_file_path: String,
    /// Stack/transfer watch interval.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Bounded retry for port re-creation during cut-over.
    #[serde(default = "default_create_port_attempts")]
    pub create_port_attempts: u32,
    #[serde(default = "default_create_port_interval_ms")]
    pub create_port_interval_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_create_port_attempts() -> u32 {
    150
}

fn default_create_port_interval_ms() -> u64 {
    1000
}

impl Default for CloneConfig {
    fn default() -> Self {
        CloneConfig {
            clone_migrate_type: CloneMode::Cold,
            sys_image: String::new(),
            migrate_net_map: BTreeMap::new(),
            v2vgateway_api_listen_port: 9998,
            plan_file_path: "/var/lib/portage/".to_string(),
            poll_interval_ms: default_poll_interval_ms(),
            create_port_attempts: default_create_port_attempts(),
            create_port_interval_ms: default_create_port_interval_ms(),
        }
    }
}
