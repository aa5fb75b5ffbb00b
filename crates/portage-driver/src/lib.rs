//! portage-driver
//!
//! The narrow interface every cloud adapter implements: one trait per facet
//! (compute, block storage, networking, stack engine), the gateway-agent
//! client, and the AZ→gateway allocator. Adapters for real clouds live out
//! of tree; [`StaticCloud`] is the scripted in-memory one.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub mod agent;
pub mod block;
pub mod compute;
pub mod error;
pub mod network;
pub mod stack;
pub mod static_cloud;
pub mod types;
pub mod vgw;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub use crate::agent::{
    AgentConnector, CloneVolumeRequest, GatewayAgent, HttpAgentConnector, HttpGatewayAgent,
    TransferStatus,
};
pub use crate::block::BlockDriver;
pub use crate::compute::ComputeDriver;
pub use crate::error::DriverError;
pub use crate::network::NetworkDriver;
pub use crate::stack::StackEngine;
pub use crate::static_cloud::StaticCloud;
pub use crate::vgw::{Gateway, VgwAllocator};

/// Every facet of one cloud, bundled for the engine and orchestrator.
#[derive(Clone)]
pub struct Drivers {
    pub compute: Arc<dyn ComputeDriver>,
    pub block: Arc<dyn BlockDriver>,
    pub network: Arc<dyn NetworkDriver>,
    pub stack: Arc<dyn StackEngine>,
    pub agents: Arc<dyn AgentConnector>,
}

impl Drivers {
    /// Bundle backed entirely by one scripted cloud.
    pub fn from_static(cloud: StaticCloud) -> Self {
        Drivers {
            compute: Arc::new(cloud.clone()),
            block: Arc::new(cloud.clone()),
            network: Arc::new(cloud.clone()),
            stack: Arc::new(cloud.clone()),
            agents: Arc::new(cloud),
        }
    }

    /// Resolve the `clone_driver` selector. Real cloud adapters register
    /// out of tree; unknown names surface as a catalog error.
    pub fn from_config(clone_driver: &str) -> Result<Self, DriverError> {
        match clone_driver {
            "static" => Ok(Drivers::from_static(StaticCloud::new())),
            other => Err(DriverError::ServiceCatalog(format!(
                "no adapter registered for clone_driver '{other}'"
            ))),
        }
    }
}
