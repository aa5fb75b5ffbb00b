use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::DriverError;

/// A gateway VM that can host the data-copy agent.
#[derive(Debug, Clone)]
pub struct Gateway {
    pub id: String,
    pub ip: String,
}

/// Process-local allocator of idle gateway VMs per availability zone.
/// Hands them out round-robin; multi-process allocation is an external
/// concern.
#[derive(Default)]
pub struct VgwAllocator {
    pools: Mutex<HashMap<String, Pool>>,
}

#[derive(Default)]
struct Pool {
    gateways: Vec<Gateway>,
    cursor: usize,
}

impl VgwAllocator {
    pub fn new() -> Self {
        VgwAllocator::default()
    }

    pub fn register(&self, az: impl Into<String>, gateway: Gateway) {
        let mut pools = self.pools.lock().unwrap_or_else(|e| e.into_inner());
        pools.entry(az.into()).or_default().gateways.push(gateway);
    }

    /// Next gateway for the zone, or `NoGateway` when none is registered.
    pub fn next(&self, az: &str) -> Result<Gateway, DriverError> {
        let mut pools = self.pools.lock().unwrap_or_else(|e| e.into_inner());
        let pool = pools
            .get_mut(az)
            .filter(|pool| !pool.gateways.is_empty())
            .ok_or_else(|| DriverError::NoGateway(az.to_string()))?;
        let gateway = pool.gateways[pool.cursor % pool.gateways.len()].clone();
        pool.cursor = pool.cursor.wrapping_add(1);
        Ok(gateway)
    }
}
