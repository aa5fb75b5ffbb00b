use std::collections::BTreeMap;
use std::env;

use portage_clone::{CloneConfig, CloneMode};

/// Runtime configuration, read from `PORTAGE_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: String,
    pub plan_expire_time: i64,
    pub clone_driver: String,
    pub clone: CloneConfig,
    /// `az:gateway-id:gateway-ip` triples for the vgw pool.
    pub vgw_pool: Vec<(String, String, String)>,
}

impl Config {
    pub fn from_env() -> Self {
        let clone = CloneConfig {
            clone_migrate_type: match env::var("PORTAGE_CLONE_MIGRATE_TYPE").as_deref() {
                Ok("live") => CloneMode::Live,
                _ => CloneMode::Cold,
            },
            sys_image: env::var("PORTAGE_SYS_IMAGE").unwrap_or_default(),
            migrate_net_map: parse_map(
                &env::var("PORTAGE_MIGRATE_NET_MAP").unwrap_or_default(),
            ),
            v2vgateway_api_listen_port: env::var("PORTAGE_V2VGATEWAY_API_LISTEN_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(9998),
            plan_file_path: env::var("PORTAGE_PLAN_FILE_PATH")
                .unwrap_or_else(|_| "/var/lib/portage/".to_string()),
            ..CloneConfig::default()
        };
        Config {
            listen_addr: env::var("PORTAGE_LISTEN_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:8899".to_string()),
            plan_expire_time: env::var("PORTAGE_PLAN_EXPIRE_TIME")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
            clone_driver: env::var("PORTAGE_CLONE_DRIVER")
                .unwrap_or_else(|_| "static".to_string()),
            clone,
            vgw_pool: parse_pool(&env::var("PORTAGE_VGW_POOL").unwrap_or_default()),
        }
    }
}

/// `key=value,key=value` pairs.
fn parse_map(raw: &str) -> BTreeMap<String, String> {
    raw.split(',')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            Some((key.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

/// `az:id:ip` triples separated by commas.
fn parse_pool(raw: &str) -> Vec<(String, String, String)> {
    raw.split(',')
        .filter_map(|entry| {
            let mut parts = entry.split(':');
            let az = parts.next()?.trim();
            let id = parts.next()?.trim();
            let ip = parts.next()?.trim();
            if az.is_empty() || id.is_empty() || ip.is_empty() {
                return None;
            }
            Some((az.to_string(), id.to_string(), ip.to_string()))
        })
        .collect()
}
