use crate::error::DriverError;
use crate::types::{
    CreatePortRequest, FloatingIpInfo, NetworkInfo, PortInfo, RouterInfo, SecurityGroupInfo,
    SubnetInfo,
};
use crate::BoxFuture;

/// Networking facet of a cloud adapter.
pub trait NetworkDriver: Send + Sync {
    fn get_network<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<NetworkInfo, DriverError>>;

    fn get_subnet<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<SubnetInfo, DriverError>>;

    fn get_port<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<PortInfo, DriverError>>;

    fn get_router<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<RouterInfo, DriverError>>;

    fn get_security_group<'a>(
        &'a self,
        id: &'a str,
    ) -> BoxFuture<'a, Result<SecurityGroupInfo, DriverError>>;

    fn get_floatingip<'a>(
        &'a self,
        id: &'a str,
    ) -> BoxFuture<'a, Result<FloatingIpInfo, DriverError>>;

    /// Ports attached to a device, or all ports when `device_id` is None.
    fn port_list<'a>(
        &'a self,
        device_id: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Vec<PortInfo>, DriverError>>;

    fn create_port<'a>(
        &'a self,
        request: CreatePortRequest,
    ) -> BoxFuture<'a, Result<PortInfo, DriverError>>;

    fn delete_port<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<(), DriverError>>;

    fn associate_floating_ip<'a>(
        &'a self,
        floatingip_id: &'a str,
        port_id: &'a str,
        fixed_address: Option<&'a str>,
    ) -> BoxFuture<'a, Result<(), DriverError>>;

    fn disassociate_floating_ip<'a>(
        &'a self,
        floatingip_id: &'a str,
    ) -> BoxFuture<'a, Result<(), DriverError>>;
}
