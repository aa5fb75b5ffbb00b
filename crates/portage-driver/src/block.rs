use crate::error::DriverError;
use crate::types::{QosSpecsInfo, VolumeInfo, VolumeTypeInfo};
use crate::BoxFuture;

/// Block-storage facet of a cloud adapter.
pub trait BlockDriver: Send + Sync {
    fn get_volume<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<VolumeInfo, DriverError>>;

    fn get_volume_type<'a>(
        &'a self,
        id: &'a str,
    ) -> BoxFuture<'a, Result<VolumeTypeInfo, DriverError>>;

    fn get_qos_specs<'a>(
        &'a self,
        id: &'a str,
    ) -> BoxFuture<'a, Result<QosSpecsInfo, DriverError>>;

    fn set_volume_shareable<'a>(
        &'a self,
        id: &'a str,
        shareable: bool,
    ) -> BoxFuture<'a, Result<(), DriverError>>;

    fn set_volume_bootable<'a>(
        &'a self,
        id: &'a str,
        bootable: bool,
    ) -> BoxFuture<'a, Result<(), DriverError>>;

    fn delete_volume<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<(), DriverError>>;

    fn reset_state<'a>(
        &'a self,
        id: &'a str,
        state: &'a str,
    ) -> BoxFuture<'a, Result<(), DriverError>>;
}
