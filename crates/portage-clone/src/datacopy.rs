//! Per-volume data copy through the gateway agents.
//!
//! After a volume sub-stack (or nested stack) reaches CREATE_COMPLETE, each
//! source volume that was probed during export streams its bytes to the
//! matching destination volume: the destination volume is attached to a
//! gateway in the destination zone, and the source-side agent drives the
//! transfer device-to-device.

use std::collections::BTreeSet;
use std::time::Duration;

use portage_core::plan::ResourceMap;
use portage_core::ResourceKind;
use portage_driver::{CloneVolumeRequest, Drivers, TransferStatus, VgwAllocator};

use crate::config::CloneConfig;
use crate::error::CloneError;
use crate::undo::UndoManager;
use crate::waiter::{AbortFlag, Tick, Waiter};

const TRANSFER_ATTEMPTS: u32 = 7200;

/// Copy every probed volume of `origin` into its freshly deployed
/// counterpart in `stack_id`.
pub async fn copy_stack_volumes(
    drivers: &Drivers,
    vgw: &VgwAllocator,
    config: &CloneConfig,
    origin: &ResourceMap,
    stack_id: &str,
    destination: &str,
    abort: &AbortFlag,
    undo: &mut UndoManager,
) -> Result<(), CloneError> {
    for res in origin.values() {
        if res.kind != ResourceKind::Volume {
            continue;
        }
        let extra = &res.extra_properties;
        if res.marked_existing() || !extra.copy_data.unwrap_or(true) {
            continue;
        }
        let (Some(src_gw_url), Some(src_dev)) = (&extra.gw_url, &extra.sys_dev_name) else {
            tracing::debug!(volume = %res.name, "volume was not probed, skipping copy");
            continue;
        };

        let target = drivers.stack.get_resource(stack_id, &res.name).await?;
        copy_volume(
            drivers,
            vgw,
            config,
            &res.name,
            src_gw_url,
            src_dev,
            extra.guest_format.as_deref().unwrap_or_default(),
            extra.mount_point.as_deref().unwrap_or_default(),
            &target.physical_resource_id,
            destination,
            abort,
            undo,
        )
        .await?;
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn copy_volume(
    drivers: &Drivers,
    vgw: &VgwAllocator,
    config: &CloneConfig,
    volume_name: &str,
    src_gw_url: &str,
    src_dev: &str,
    src_format: &str,
    src_mount_point: &str,
    target_volume_id: &str,
    destination: &str,
    abort: &AbortFlag,
    undo: &mut UndoManager,
) -> Result<(), CloneError> {
    let gateway = vgw
        .next(destination)
        .map_err(|_| CloneError::V2v(format!("no vgw host found in {destination}")))?;
    let des_gw_url = format!("{}:{}", gateway.ip, config.v2vgateway_api_listen_port);
    let des_agent = drivers.agents.connect(&des_gw_url);

    let disks_before: BTreeSet<String> = des_agent.list_disks().await?.into_iter().collect();
    drivers
        .compute
        .attach_volume(&gateway.id, target_volume_id, None)
        .await?;
    {
        let compute = drivers.compute.clone();
        let gw_id = gateway.id.clone();
        let volume_id = target_volume_id.to_string();
        undo.push("detach target volume from gateway", move || async move {
            compute.detach_volume(&gw_id, &volume_id).await?;
            Ok(())
        });
    }
    let disks_after: BTreeSet<String> = des_agent.list_disks().await?.into_iter().collect();
    let des_dev = disks_after
        .difference(&disks_before)
        .next()
        .cloned()
        .ok_or_else(|| {
            CloneError::V2v(format!(
                "cannot identify target device for volume {target_volume_id}"
            ))
        })?;

    let src_agent = drivers.agents.connect(src_gw_url);
    let task_id = src_agent
        .clone_volume(CloneVolumeRequest {
            src_dev_name: src_dev.to_string(),
            des_dev_name: des_dev,
            src_dev_format: src_format.to_string(),
            src_mount_point: src_mount_point.to_string(),
            src_gw_url: src_gw_url.to_string(),
            des_gw_url: des_gw_url.clone(),
        })
        .await?;
    tracing::info!(volume = %volume_name, task = %task_id, "volume transfer started");

    let waiter = Waiter::with_attempts(
        Duration::from_millis(config.poll_interval_ms),
        TRANSFER_ATTEMPTS,
    );
    let src_agent_ref = src_agent.as_ref();
    let task = task_id.as_str();
    let outcome = waiter
        .wait_for(abort, move || async move {
            match src_agent_ref.get_data_trans_status(task).await? {
                TransferStatus::InProgress => Ok::<_, CloneError>(Tick::Continue),
                terminal => Ok(Tick::Done(terminal)),
            }
        })
        .await?;
    match outcome.into_done() {
        Some(TransferStatus::Finished) => {
            tracing::info!(volume = %volume_name, "volume transfer finished");
            // Free the target volume so the main stack can claim it.
            drivers
                .compute
                .detach_volume(&gateway.id, target_volume_id)
                .await?;
            Ok(())
        }
        Some(_) => Err(CloneError::V2v(format!(
            "volume transfer failed for {volume_name}"
        ))),
        None => Err(CloneError::V2v(format!(
            "volume transfer for {volume_name} aborted or timed out"
        ))),
    }
}

/// Copy the volumes of a nested stack's embedded template, recursing into
/// `file://` children deployed as their own stacks.
pub async fn copy_template_volumes(
    drivers: &Drivers,
    vgw: &VgwAllocator,
    config: &CloneConfig,
    template: &serde_json::Value,
    stack_id: &str,
    destination: &str,
    abort: &AbortFlag,
    undo: &mut UndoManager,
) -> Result<(), CloneError> {
    use serde_json::Value;

    let Some(entries) = template.get("resources").and_then(Value::as_object) else {
        return Ok(());
    };
    for (key, entry) in entries {
        let type_tag = entry
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if type_tag == "OS::Cinder::Volume" {
            let extra = entry.get("extra_properties").cloned().unwrap_or_default();
            let copy_wanted = extra
                .get("copy_data")
                .and_then(Value::as_bool)
                .unwrap_or(true);
            let src_gw_url = extra.get("gw_url").and_then(Value::as_str);
            let src_dev = extra.get("sys_dev_name").and_then(Value::as_str);
            let (Some(src_gw_url), Some(src_dev)) = (src_gw_url, src_dev) else {
                continue;
            };
            if !copy_wanted {
                continue;
            }
            let target = drivers.stack.get_resource(stack_id, key).await?;
            copy_volume(
                drivers,
                vgw,
                config,
                key,
                src_gw_url,
                src_dev,
                extra
                    .get("guest_format")
                    .and_then(Value::as_str)
                    .unwrap_or_default(),
                extra
                    .get("mount_point")
                    .and_then(Value::as_str)
                    .unwrap_or_default(),
                &target.physical_resource_id,
                destination,
                abort,
                undo,
            )
            .await?;
        } else if type_tag.starts_with("file://") {
            let Some(content) = entry.get("content").and_then(Value::as_str) else {
                continue;
            };
            let child: Value = serde_json::from_str(content)
                .map_err(|e| CloneError::V2v(format!("unparseable nested template: {e}")))?;
            let child_stack = drivers
                .stack
                .get_resource(stack_id, key)
                .await?
                .physical_resource_id;
            Box::pin(copy_template_volumes(
                drivers,
                vgw,
                config,
                &child,
                &child_stack,
                destination,
                abort,
                undo,
            ))
            .await?;
        }
    }
    Ok(())
}

/// Detach source volumes from their gateways and clear borrowed shareable
/// flags once every transfer succeeded.
pub async fn release_source_attachments(drivers: &Drivers, resources: &ResourceMap) {
    for res in resources.values() {
        if res.kind != ResourceKind::Volume {
            continue;
        }
        let extra = &res.extra_properties;
        if let (Some(gw_id), Some(_)) = (&extra.gw_id, &extra.sys_dev_name) {
            if let Err(e) = drivers.compute.detach_volume(gw_id, &res.id).await {
                tracing::warn!(volume = %res.id, error = %e, "source volume detach failed");
            }
        }
        if extra.set_shareable == Some(true) {
            if let Err(e) = drivers.block.set_volume_shareable(&res.id, false).await {
                tracing::warn!(volume = %res.id, error = %e, "clearing shareable flag failed");
            }
        }
    }
}
