use crate::error::DriverError;
use crate::types::{FlavorInfo, InterfaceAttachment, KeyPairInfo, ServerInfo};
use crate::BoxFuture;

/// Compute facet of a cloud adapter.
pub trait ComputeDriver: Send + Sync {
    fn get_server<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<ServerInfo, DriverError>>;

    fn get_flavor<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<FlavorInfo, DriverError>>;

    fn get_keypair<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<KeyPairInfo, DriverError>>;

    /// Overwrite the task/progress state shown for a server.
    fn reset_state<'a>(
        &'a self,
        id: &'a str,
        state: &'a str,
    ) -> BoxFuture<'a, Result<(), DriverError>>;

    /// Attach a volume; returns the device name the hypervisor picked, when
    /// it reports one.
    fn attach_volume<'a>(
        &'a self,
        server_id: &'a str,
        volume_id: &'a str,
        device: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Option<String>, DriverError>>;

    fn detach_volume<'a>(
        &'a self,
        server_id: &'a str,
        volume_id: &'a str,
    ) -> BoxFuture<'a, Result<(), DriverError>>;

    /// Attach an interface, by network (a fresh port is allocated) or by
    /// existing port id.
    fn interface_attach<'a>(
        &'a self,
        server_id: &'a str,
        network_id: Option<&'a str>,
        port_id: Option<&'a str>,
    ) -> BoxFuture<'a, Result<InterfaceAttachment, DriverError>>;

    fn interface_detach<'a>(
        &'a self,
        server_id: &'a str,
        port_id: &'a str,
    ) -> BoxFuture<'a, Result<(), DriverError>>;

    fn delete_server<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<(), DriverError>>;
}
