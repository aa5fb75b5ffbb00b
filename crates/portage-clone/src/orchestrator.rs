//! The clone/migrate state machine.
//!
//! Drives a plan from AVAILABLE to FINISHED: template shaping, volume
//! sub-stacks, stack submission and watching, per-volume data copy,
//! identity cut-over, source cleanup. Failures unwind through the undo
//! stack and land the plan in ERROR with the cause in `task_status`.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use uuid::Uuid;

use portage_core::plan::ResourceMap;
use portage_core::template::TEMPLATE_VERSION;
use portage_core::{reference, FilesMap, PlanStatus, PlanType, ResourceKind, StackStatus, Template};
use portage_driver::types::{CreateStackRequest, StackInfo};
use portage_driver::{Drivers, VgwAllocator};
use portage_engine::PlanLocks;
use portage_store::{ClonedResourcesRow, PlanStore, PlanUpdate, StackLinkRow, TemplateRow};

use crate::config::{CloneConfig, CloneMode};
use crate::cutover::{self, FipBinding, ServerPorts};
use crate::datacopy;
use crate::error::CloneError;
use crate::export;
use crate::shape;
use crate::undo::UndoManager;
use crate::waiter::{AbortFlag, Tick, Waiter};

/// How stack progress mirrors into the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mirror {
    CloneMain,
    MigrateMain,
    SubStack,
}

/// Book-keeping for one orchestration call.
struct RunCtx {
    undo: UndoManager,
    stacks: Vec<String>,
    abort: AbortFlag,
    disable_rollback: bool,
}

impl RunCtx {
    fn new(abort: AbortFlag) -> Self {
        RunCtx {
            undo: UndoManager::new(),
            stacks: Vec::new(),
            abort,
            disable_rollback: true,
        }
    }
}

pub struct CloneOrchestrator {
    store: Arc<dyn PlanStore>,
    drivers: Drivers,
    vgw: Arc<VgwAllocator>,
    locks: PlanLocks,
    config: CloneConfig,
    aborts: Mutex<HashMap<String, AbortFlag>>,
}

impl CloneOrchestrator {
    pub fn new(
        store: Arc<dyn PlanStore>,
        drivers: Drivers,
        vgw: Arc<VgwAllocator>,
        locks: PlanLocks,
        config: CloneConfig,
    ) -> Self {
        CloneOrchestrator {
            store,
            drivers,
            vgw,
            locks,
            config,
            aborts: Mutex::new(HashMap::new()),
        }
    }

    /// Signal the watchers of a running orchestration to stop. Used when a
    /// plan is force-transitioned to error.
    pub fn abort(&self, plan_id: &str) {
        let aborts = self.aborts.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(flag) = aborts.get(plan_id) {
            flag.set();
        }
    }

    fn register_abort(&self, plan_id: &str) -> AbortFlag {
        let flag = AbortFlag::new();
        self.aborts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(plan_id.to_string(), flag.clone());
        flag
    }

    fn unregister_abort(&self, plan_id: &str) {
        self.aborts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(plan_id);
    }

    // ── export ───────────────────────────────────────────────────────────

    pub async fn export_clone_template(
        &self,
        plan_id: &str,
        sys_clone: bool,
        copy_data: bool,
    ) -> Result<(), CloneError> {
        tracing::info!(plan_id = %plan_id, sys_clone, copy_data, "exporting clone template");
        let _guard = self.locks.acquire(plan_id).await;
        self.export_template_inner(plan_id, sys_clone, copy_data)
            .await
            .map(|_| ())
    }

    pub async fn export_migrate_template(&self, plan_id: &str) -> Result<(), CloneError> {
        tracing::info!(plan_id = %plan_id, "exporting migrate template");
        let _guard = self.locks.acquire(plan_id).await;
        self.export_template_inner(plan_id, false, true)
            .await
            .map(|_| ())
    }

    /// Gateway discovery + disk probing, then render and store the
    /// template. Caller holds the plan lock.
    async fn export_template_inner(
        &self,
        plan_id: &str,
        sys_clone: bool,
        copy_data: bool,
    ) -> Result<ResourceMap, CloneError> {
        let plan = self.store.plan_get(plan_id).await?;
        let mut resources = plan.updated_resources.clone();
        if !resources.is_empty() {
            let mut undo = UndoManager::new();
            let handled = export::handle_resources(
                &self.drivers,
                &self.vgw,
                &self.config,
                &mut resources,
                sys_clone,
                copy_data,
                &mut undo,
            )
            .await;
            if let Err(e) = handled {
                tracing::error!(plan_id = %plan_id, error = %e, "export failed, rolling back");
                undo.rollback().await;
                return Err(CloneError::ExportTemplateFailed {
                    plan_id: plan_id.to_string(),
                    msg: e.to_string(),
                });
            }
            self.store
                .plan_update(
                    plan_id,
                    PlanUpdate {
                        updated_resources: Some(resources.clone()),
                        ..PlanUpdate::default()
                    },
                )
                .await?;
            let mut template = Template::from_resources(&resources, "clone template");
            template.plan_id = Some(plan_id.to_string());
            template.plan_type = Some(plan.plan_type);
            template.expire_time = Some(plan.expire_at);
            self.store
                .template_put(TemplateRow {
                    plan_id: plan_id.to_string(),
                    template,
                })
                .await?;
        }
        self.store
            .plan_update(
                plan_id,
                PlanUpdate {
                    plan_status: Some(PlanStatus::Available),
                    sys_clone: Some(sys_clone),
                    copy_data: Some(copy_data),
                    ..PlanUpdate::default()
                },
            )
            .await?;
        Ok(resources)
    }

    // ── clone ────────────────────────────────────────────────────────────

    pub async fn clone_plan(&self, plan_id: &str, destination: &str) -> Result<(), CloneError> {
        tracing::info!(plan_id = %plan_id, destination = %destination, "clone started");
        let _guard = self.locks.acquire(plan_id).await;
        let mut ctx = RunCtx::new(self.register_abort(plan_id));
        let result = self.run_clone(plan_id, destination, &mut ctx).await;
        self.finish_run(plan_id, &mut ctx, result).await
    }

    pub async fn export_template_and_clone(
        &self,
        plan_id: &str,
        destination: &str,
        sys_clone: bool,
        copy_data: bool,
    ) -> Result<(), CloneError> {
        self.export_clone_template(plan_id, sys_clone, copy_data)
            .await?;
        self.clone_plan(plan_id, destination).await
    }

    /// Converge the wrap-up of an orchestration run: commit or roll back,
    /// drop rollback-eligible stacks, record the terminal status.
    async fn finish_run(
        &self,
        plan_id: &str,
        ctx: &mut RunCtx,
        result: Result<(), CloneError>,
    ) -> Result<(), CloneError> {
        self.unregister_abort(plan_id);
        match result {
            Ok(()) => {
                ctx.undo.commit();
                Ok(())
            }
            Err(e) => {
                tracing::error!(plan_id = %plan_id, error = %e, "orchestration failed, rolling back");
                ctx.undo.rollback().await;
                if !ctx.disable_rollback {
                    for stack_id in &ctx.stacks {
                        if let Err(err) = self.drivers.stack.delete_stack(stack_id).await {
                            tracing::warn!(stack_id = %stack_id, error = %err, "stack delete failed");
                        }
                    }
                }
                let _ = self
                    .store
                    .plan_update(
                        plan_id,
                        PlanUpdate {
                            plan_status: Some(PlanStatus::Error),
                            task_status: Some(e.to_string()),
                            ..PlanUpdate::default()
                        },
                    )
                    .await;
                Err(e)
            }
        }
    }

    async fn run_clone(
        &self,
        plan_id: &str,
        destination: &str,
        ctx: &mut RunCtx,
    ) -> Result<(), CloneError> {
        self.store
            .plan_update(plan_id, PlanUpdate::status(PlanStatus::Cloning))
            .await?;
        let plan = self.store.plan_get(plan_id).await?;
        let mut resource_map = plan.updated_resources.clone();
        ctx.disable_rollback = self.template_disable_rollback(plan_id).await;

        // Nested stacks deploy on their own (their embedded templates carry
        // everything, including their volumes).
        let stack_names: Vec<String> = resource_map
            .values()
            .filter(|r| r.kind == ResourceKind::Stack)
            .map(|r| r.name.clone())
            .collect();
        for name in stack_names {
            if let Some(res) = resource_map.remove(&name) {
                self.clone_stack(plan_id, &name, &res, destination, ctx)
                    .await?;
            }
        }

        if resource_map.is_empty() {
            tracing::warn!(plan_id = %plan_id, "nothing left to clone");
            self.store
                .plan_update(plan_id, PlanUpdate::status(PlanStatus::Finished))
                .await?;
            return Ok(());
        }

        self.seed_source_compensations(&resource_map, ctx);

        let mut template = Template::from_resources(&resource_map, "clone template");
        template.plan_id = Some(plan_id.to_string());
        template.plan_type = Some(PlanType::Clone);
        template.expire_time = Some(plan.expire_at);

        shape::collapse_load_balancer(&mut template);
        let existing_nets = self
            .promote_existing(plan_id, &mut template, &resource_map, PlanType::Clone)
            .await?;
        shape::drop_port_addresses(&mut template, &existing_nets);
        shape::set_destination_az(&mut template, destination);

        // Cold or live: carve out the volume sub-stack, deploy it, copy bytes,
        // bind the fresh ids as parameters.
        let moved = self
            .prepare_volumes(plan_id, &mut template, &resource_map, destination, ctx)
            .await?;

        let files = shape::factor_floating_ips(&mut template, &self.config.plan_file_path, plan_id)?;
        shape::strip_private_fields(&mut template);

        let stack = self
            .submit_and_watch(plan_id, Mirror::CloneMain, template.to_json()?, files, None, ctx)
            .await?;
        if stack.stack_status != StackStatus::CreateComplete {
            return Err(CloneError::PlanDeployError {
                plan_id: plan_id.to_string(),
                msg: format!("stack {} ended in {:?}", stack.id, stack.stack_status),
            });
        }

        // Volumes that stayed in the main template copy now.
        let mut remaining = resource_map.clone();
        for name in &moved {
            remaining.remove(name);
        }
        let copies_pending = remaining.values().any(|r| {
            r.kind == ResourceKind::Volume
                && !r.marked_existing()
                && r.extra_properties.sys_dev_name.is_some()
                && r.extra_properties.copy_data.unwrap_or(true)
        });
        if copies_pending {
            datacopy::copy_stack_volumes(
                &self.drivers,
                &self.vgw,
                &self.config,
                &remaining,
                &stack.id,
                destination,
                &ctx.abort,
                &mut ctx.undo,
            )
            .await?;
            self.store
                .plan_update(plan_id, PlanUpdate::status(PlanStatus::DataTransFinished))
                .await?;
        }

        // Source side goes back to normal; record what maps to what.
        datacopy::release_source_attachments(&self.drivers, &resource_map).await;
        export::reset_resources(&self.drivers, &resource_map).await;
        self.record_cloned_resources(plan_id, destination, &resource_map, &stack.id)
            .await?;

        self.store
            .plan_update(plan_id, PlanUpdate::status(PlanStatus::Finished))
            .await?;
        tracing::info!(plan_id = %plan_id, stack_id = %stack.id, "clone finished");
        Ok(())
    }

    /// The stored template may pin `disable_rollback`; default is on (the
    /// stack engine must not unwind half-created stacks behind our back).
    async fn template_disable_rollback(&self, plan_id: &str) -> bool {
        match self.store.template_get(plan_id).await {
            Ok(row) => row.template.disable_rollback.unwrap_or(true),
            Err(_) => true,
        }
    }

    /// Compensations for the standing export side-effects (source volumes
    /// attached to gateways, borrowed shareable flags).
    fn seed_source_compensations(&self, resource_map: &ResourceMap, ctx: &mut RunCtx) {
        for res in resource_map.values() {
            if res.kind != ResourceKind::Volume {
                continue;
            }
            let extra = &res.extra_properties;
            if extra.set_shareable == Some(true) {
                let block = self.drivers.block.clone();
                let id = res.id.clone();
                ctx.undo.push("clear shareable flag", move || async move {
                    block.set_volume_shareable(&id, false).await?;
                    Ok(())
                });
            }
            if let (Some(gw_id), Some(_)) = (&extra.gw_id, &extra.sys_dev_name) {
                let compute = self.drivers.compute.clone();
                let gw_id = gw_id.clone();
                let id = res.id.clone();
                ctx.undo
                    .push("detach volume from gateway", move || async move {
                        compute.detach_volume(&gw_id, &id).await?;
                        Ok(())
                    });
            }
        }
    }

    /// Cold or live clone: isolate volume-shaped resources into a
    /// sub-stack, deploy it, copy data, and turn each moved resource into a
    /// parameter of the main template bound to the fresh id. Returns the
    /// moved local names.
    async fn prepare_volumes(
        &self,
        plan_id: &str,
        template: &mut Template,
        origin: &ResourceMap,
        destination: &str,
        ctx: &mut RunCtx,
    ) -> Result<Vec<String>, CloneError> {
        let moved: Vec<String> = match self.config.clone_migrate_type {
            CloneMode::Cold => template
                .resources
                .iter()
                .filter(|(name, r)| {
                    r.kind().map(ResourceKind::is_volume_shaped).unwrap_or(false)
                        && origin
                            .get(name.as_str())
                            .map(|res| !res.marked_existing())
                            .unwrap_or(false)
                })
                .map(|(name, _)| name.clone())
                .collect(),
            CloneMode::Live => self.live_clone_selection(origin),
        };
        if moved.is_empty() {
            return Ok(Vec::new());
        }
        tracing::info!(plan_id = %plan_id, volumes = moved.len(), "deploying volume sub-stack");

        let mut sub = Template::empty("volume template");
        for name in &moved {
            let Some(mut entry) = template.resources.get(name).cloned() else {
                continue;
            };
            let is_system_disk = origin
                .get(name)
                .map(|r| {
                    r.kind == ResourceKind::Volume && r.extra_properties.sys_clone == Some(true)
                })
                .unwrap_or(false);
            if is_system_disk {
                // The copied system disk boots from the configured image,
                // not the source one.
                entry
                    .properties
                    .insert("image".to_string(), json!(self.config.sys_image));
            }
            sub.resources.insert(name.clone(), entry);
        }
        shape::set_destination_az(&mut sub, destination);
        shape::strip_private_fields(&mut sub);

        let stack = self
            .submit_and_watch(
                plan_id,
                Mirror::SubStack,
                sub.to_json()?,
                FilesMap::new(),
                None,
                ctx,
            )
            .await?;
        if stack.stack_status != StackStatus::CreateComplete {
            return Err(CloneError::PlanDeployError {
                plan_id: plan_id.to_string(),
                msg: format!("volume sub-stack ended in {:?}", stack.stack_status),
            });
        }

        let origin_sub: ResourceMap = origin
            .iter()
            .filter(|(name, _)| moved.contains(*name))
            .map(|(name, res)| (name.clone(), res.clone()))
            .collect();
        datacopy::copy_stack_volumes(
            &self.drivers,
            &self.vgw,
            &self.config,
            &origin_sub,
            &stack.id,
            destination,
            &ctx.abort,
            &mut ctx.undo,
        )
        .await?;
        self.store
            .plan_update(plan_id, PlanUpdate::status(PlanStatus::DataTransFinished))
            .await?;

        for name in &moved {
            let physical = self
                .drivers
                .stack
                .get_resource(&stack.id, name)
                .await?
                .physical_resource_id;
            let is_system_disk = origin
                .get(name)
                .map(|r| {
                    r.kind == ResourceKind::Volume && r.extra_properties.sys_clone == Some(true)
                })
                .unwrap_or(false);
            if is_system_disk && self.config.clone_migrate_type == CloneMode::Live {
                self.drivers.block.set_volume_bootable(&physical, true).await?;
            }
            shape::promote_to_parameter(template, name, &physical, "volume sub-stack output");
        }
        Ok(moved)
    }

    /// System disks of servers that asked for system cloning, plus their
    /// volume-type and qos dependencies.
    fn live_clone_selection(&self, origin: &ResourceMap) -> Vec<String> {
        let mut moved = Vec::new();
        for server in origin
            .values()
            .filter(|r| r.kind == ResourceKind::Server && r.extra_properties.sys_clone == Some(true))
        {
            let Some(bdms) = server
                .properties
                .get("block_device_mapping_v2")
                .and_then(Value::as_array)
            else {
                continue;
            };
            for bdm in bdms {
                let boot = matches!(
                    bdm.get("boot_index"),
                    Some(Value::Number(n)) if n.as_i64() == Some(0)
                ) || matches!(bdm.get("boot_index"), Some(Value::String(s)) if s == "0");
                if !boot {
                    continue;
                }
                let Some(vol_name) = bdm.get("volume_id").and_then(reference::referenced_resource)
                else {
                    continue;
                };
                if !moved.iter().any(|m| m == vol_name) && origin.contains_key(vol_name) {
                    moved.push(vol_name.to_string());
                    // Volume type and qos ride along.
                    for dep in origin[vol_name].property_refs() {
                        let Some(dep_res) = origin.get(&dep) else {
                            continue;
                        };
                        if dep_res.kind == ResourceKind::VolumeType
                            && !moved.contains(&dep)
                        {
                            moved.push(dep.clone());
                            for qos in dep_res.property_refs() {
                                if origin.get(&qos).map(|r| r.kind) == Some(ResourceKind::Qos)
                                    && !moved.contains(&qos)
                                {
                                    moved.push(qos);
                                }
                            }
                        }
                    }
                }
            }
        }
        moved
    }

    /// Promote every resource that already exists in the target cloud to a
    /// template parameter bound to its live id. Returns the local names of
    /// the networks among them (their ports must shed source addresses).
    async fn promote_existing(
        &self,
        plan_id: &str,
        template: &mut Template,
        resource_map: &ResourceMap,
        plan_type: PlanType,
    ) -> Result<HashSet<String>, CloneError> {
        let mut existing_nets = HashSet::new();
        let names: Vec<String> = template.resources.keys().cloned().collect();
        for name in names {
            let Some(res) = resource_map.get(&name) else {
                continue;
            };
            if res.id.is_empty() {
                continue;
            }
            let promotable = match res.kind {
                ResourceKind::Flavor
                | ResourceKind::Network
                | ResourceKind::SecurityGroup
                | ResourceKind::Subnet
                | ResourceKind::KeyPair
                | ResourceKind::Router
                | ResourceKind::RouterInterface
                | ResourceKind::VolumeType => true,
                ResourceKind::FloatingIp | ResourceKind::Qos => plan_type == PlanType::Clone,
                ResourceKind::Volume => res.marked_existing(),
                _ => false,
            };
            if !promotable {
                continue;
            }
            let exists = self.resource_exists(plan_id, res.kind, &res.id).await?;
            if !exists {
                continue;
            }
            tracing::debug!(resource = %name, id = %res.id, "binding existing resource by parameter");
            if res.kind == ResourceKind::Network {
                existing_nets.insert(name.clone());
            }
            shape::promote_to_parameter(
                template,
                &name,
                &res.id,
                &format!("existing {}", res.kind.name_prefix()),
            );
        }
        Ok(existing_nets)
    }

    /// Whether the live object behind a plan resource is visible through
    /// the driver. A floating ip that exists but is already bound fails the
    /// clone outright.
    async fn resource_exists(
        &self,
        plan_id: &str,
        kind: ResourceKind,
        id: &str,
    ) -> Result<bool, CloneError> {
        let result = match kind {
            ResourceKind::Flavor => self.drivers.compute.get_flavor(id).await.map(|_| ()),
            ResourceKind::KeyPair => self.drivers.compute.get_keypair(id).await.map(|_| ()),
            ResourceKind::Network => self.drivers.network.get_network(id).await.map(|_| ()),
            ResourceKind::Subnet => self.drivers.network.get_subnet(id).await.map(|_| ()),
            ResourceKind::Router => self.drivers.network.get_router(id).await.map(|_| ()),
            ResourceKind::RouterInterface => self.drivers.network.get_port(id).await.map(|_| ()),
            ResourceKind::SecurityGroup => {
                self.drivers.network.get_security_group(id).await.map(|_| ())
            }
            ResourceKind::VolumeType => self.drivers.block.get_volume_type(id).await.map(|_| ()),
            ResourceKind::Qos => self.drivers.block.get_qos_specs(id).await.map(|_| ()),
            ResourceKind::Volume => self.drivers.block.get_volume(id).await.map(|_| ()),
            ResourceKind::FloatingIp => {
                return match self.drivers.network.get_floatingip(id).await {
                    Ok(fip) => {
                        if fip.fixed_ip_address.as_deref().is_some_and(|a| !a.is_empty()) {
                            Err(CloneError::PlanCloneFailed {
                                plan_id: plan_id.to_string(),
                                msg: format!("floating ip {id} exists and is in use"),
                            })
                        } else {
                            Ok(true)
                        }
                    }
                    Err(e) if e.is_not_found() => Ok(false),
                    Err(e) => Err(e.into()),
                };
            }
            _ => return Ok(false),
        };
        match result {
            Ok(()) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    // ── nested stacks ────────────────────────────────────────────────────

    async fn clone_stack(
        &self,
        plan_id: &str,
        name: &str,
        res: &portage_core::Resource,
        destination: &str,
        ctx: &mut RunCtx,
    ) -> Result<(), CloneError> {
        tracing::info!(plan_id = %plan_id, stack = %name, "cloning nested stack");
        let raw = res
            .properties
            .get("template")
            .and_then(Value::as_str)
            .ok_or_else(|| CloneError::V2v(format!("stack {name} has no embedded template")))?;
        let mut child: Value = serde_json::from_str(raw)
            .map_err(|e| CloneError::V2v(format!("unparseable embedded template: {e}")))?;
        let origin = child.clone();
        let files = rewrite_nested(&mut child, destination)?;

        let stack_name = res
            .properties
            .get("stack_name")
            .and_then(Value::as_str)
            .unwrap_or(name);
        let mut properties = res.properties.clone();
        properties.remove("stack_name");
        properties.remove("disable_rollback");
        properties.remove("parameters");
        properties.insert("template".to_string(), Value::String(child.to_string()));

        let mut wrapper_resources = serde_json::Map::new();
        wrapper_resources.insert(
            name.to_string(),
            json!({"type": "OS::Heat::Stack", "properties": properties}),
        );
        let wrapper = json!({
            "heat_template_version": TEMPLATE_VERSION,
            "description": "clone template",
            "resources": wrapper_resources,
        });

        let stack = self
            .submit_and_watch(
                plan_id,
                Mirror::SubStack,
                wrapper.to_string(),
                files,
                Some(format!("{stack_name}-{}", Uuid::new_v4())),
                ctx,
            )
            .await?;
        if stack.stack_status != StackStatus::CreateComplete {
            self.drivers.stack.delete_stack(&stack.id).await.ok();
            return Err(CloneError::PlanDeployError {
                plan_id: plan_id.to_string(),
                msg: format!("nested stack {name} ended in {:?}", stack.stack_status),
            });
        }

        // The wrapper's single resource is the child stack; its volumes
        // copy against that stack's ids.
        let child_stack = self
            .drivers
            .stack
            .get_resource(&stack.id, name)
            .await?
            .physical_resource_id;
        datacopy::copy_template_volumes(
            &self.drivers,
            &self.vgw,
            &self.config,
            &origin,
            &child_stack,
            destination,
            &ctx.abort,
            &mut ctx.undo,
        )
        .await?;
        Ok(())
    }

    // ── migrate ──────────────────────────────────────────────────────────

    pub async fn migrate(&self, plan_id: &str, destination: &str) -> Result<(), CloneError> {
        tracing::info!(plan_id = %plan_id, destination = %destination, "migrate started");
        let _guard = self.locks.acquire(plan_id).await;
        let mut ctx = RunCtx::new(self.register_abort(plan_id));
        let result = self.run_migrate(plan_id, destination, &mut ctx).await;
        self.finish_run(plan_id, &mut ctx, result).await
    }

    async fn run_migrate(
        &self,
        plan_id: &str,
        destination: &str,
        ctx: &mut RunCtx,
    ) -> Result<(), CloneError> {
        self.store
            .plan_update(plan_id, PlanUpdate::status(PlanStatus::Migrating))
            .await?;
        let resource_map = self.export_template_inner(plan_id, false, false).await?;
        let plan = self.store.plan_get(plan_id).await?;
        ctx.disable_rollback = self.template_disable_rollback(plan_id).await;

        let identity = self.collect_identity(&resource_map).await?;

        let mut template = Template::from_resources(&resource_map, "migrate template");
        template.plan_id = Some(plan_id.to_string());
        template.plan_type = Some(PlanType::Migrate);
        template.expire_time = Some(plan.expire_at);

        // Floating IPs whose network already exists get re-homed during
        // cut-over; they must not be rebuilt by the stack.
        self.drop_rehomed_floating_ips(&mut template, &resource_map)
            .await?;

        let existing_nets = self
            .promote_existing(plan_id, &mut template, &resource_map, PlanType::Migrate)
            .await?;
        shape::drop_port_addresses(&mut template, &existing_nets);
        shape::set_destination_az(&mut template, destination);
        shape::strip_private_fields(&mut template);

        let stack = self
            .submit_and_watch(
                plan_id,
                Mirror::MigrateMain,
                template.to_json()?,
                FilesMap::new(),
                None,
                ctx,
            )
            .await?;
        if stack.stack_status != StackStatus::CreateComplete {
            return Err(CloneError::PlanDeployError {
                plan_id: plan_id.to_string(),
                msg: format!("stack {} ended in {:?}", stack.id, stack.stack_status),
            });
        }

        if !self.config.migrate_net_map.is_empty() {
            export::clear_migrate_ports(&self.drivers, &resource_map).await;
        }

        let stored = self.store.plan_get(plan_id).await?;
        if stored.plan_status == PlanStatus::Error {
            return Err(CloneError::PlanMigrateFailed {
                plan_id: plan_id.to_string(),
                msg: "plan was forced into error during deployment".to_string(),
            });
        }

        let cut = cutover::realloc_port_floating_ips(
            &self.drivers,
            &self.config,
            plan_id,
            &stack.id,
            &resource_map,
            &identity.server_ports,
            &identity.port_fips,
            &identity.unassociated,
        )
        .await;
        if let Err(e) = cut {
            self.drivers.stack.delete_stack(&stack.id).await.ok();
            return Err(e);
        }

        self.cleanup_sources(&resource_map, &ctx.abort).await?;
        self.store
            .plan_update(plan_id, PlanUpdate::status(PlanStatus::Finished))
            .await?;
        tracing::info!(plan_id = %plan_id, stack_id = %stack.id, "migrate finished");
        Ok(())
    }

    /// Remove floating-ip resources whose floating network already exists;
    /// cut-over re-homes the live ones instead.
    async fn drop_rehomed_floating_ips(
        &self,
        template: &mut Template,
        resource_map: &ResourceMap,
    ) -> Result<(), CloneError> {
        let names: Vec<String> = template
            .resources
            .iter()
            .filter(|(_, r)| r.kind() == Some(ResourceKind::FloatingIp))
            .map(|(name, _)| name.clone())
            .collect();
        for name in names {
            let Some(net_name) = resource_map
                .get(&name)
                .and_then(|r| r.properties.get("floating_network_id"))
                .and_then(reference::referenced_resource)
            else {
                continue;
            };
            let Some(net_id) = resource_map.get(net_name).map(|r| r.id.clone()) else {
                continue;
            };
            match self.drivers.network.get_network(&net_id).await {
                Ok(_) => {
                    tracing::debug!(fip = %name, "floating network exists, deferring to cut-over");
                    template.resources.remove(&name);
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// (port, floating-ip, fixed-ip) triples per server, restricted to
    /// ports whose network already exists at the destination.
    async fn collect_identity(
        &self,
        resource_map: &ResourceMap,
    ) -> Result<IdentityMap, CloneError> {
        let mut identity = IdentityMap::default();

        for server in resource_map
            .values()
            .filter(|r| r.kind == ResourceKind::Server)
        {
            let mut ports = Vec::new();
            let networks = server
                .properties
                .get("networks")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            for entry in networks {
                let Some(port_name) = entry.get("port").and_then(reference::referenced_resource)
                else {
                    continue;
                };
                let Some(port_res) = resource_map.get(port_name) else {
                    continue;
                };
                let Some(net_id) = port_res
                    .properties
                    .get("network_id")
                    .and_then(reference::referenced_resource)
                    .and_then(|net| resource_map.get(net))
                    .map(|net| net.id.clone())
                else {
                    continue;
                };
                match self.drivers.network.get_network(&net_id).await {
                    Ok(_) => ports.push((port_name.to_string(), port_res.id.clone())),
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e.into()),
                }
            }
            if !ports.is_empty() {
                identity.server_ports.push(ServerPorts {
                    server_name: server.name.clone(),
                    server_id: server.id.clone(),
                    ports,
                });
            }
        }

        // Floating IPs bound through ports.
        for fip in resource_map
            .values()
            .filter(|r| r.kind == ResourceKind::FloatingIp)
        {
            let Some(port_name) = fip
                .properties
                .get("port_id")
                .and_then(reference::referenced_resource)
            else {
                continue;
            };
            let fixed_ip = fip
                .properties
                .get("fixed_ip_address")
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| {
                    resource_map
                        .get(port_name)
                        .and_then(|p| p.properties.get("fixed_ips"))
                        .and_then(Value::as_array)
                        .and_then(|ips| ips.first())
                        .and_then(|ip| ip.get("ip_address"))
                        .and_then(Value::as_str)
                        .map(str::to_string)
                });
            match self.drivers.network.get_floatingip(&fip.id).await {
                Ok(live) => {
                    if live.port_id.is_none() {
                        identity.unassociated.insert(fip.id.clone());
                    }
                }
                Err(e) if e.is_not_found() => {
                    identity.unassociated.insert(fip.id.clone());
                }
                Err(e) => return Err(e.into()),
            }
            identity
                .port_fips
                .entry(port_name.to_string())
                .or_default()
                .push(FipBinding {
                    fip_id: fip.id.clone(),
                    fixed_ip,
                });
        }
        Ok(identity)
    }

    /// Delete each source server (waiting out its termination) and its
    /// attached volumes.
    async fn cleanup_sources(
        &self,
        resource_map: &ResourceMap,
        abort: &AbortFlag,
    ) -> Result<(), CloneError> {
        let drivers = &self.drivers;
        for res in resource_map
            .values()
            .filter(|r| r.kind == ResourceKind::Server)
        {
            let server_id = res.id.as_str();
            let info = match drivers.compute.get_server(server_id).await {
                Ok(info) => info,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e.into()),
            };
            let volume_ids = info.attached_volume_ids.clone();
            tracing::info!(server = %server_id, "deleting source server");
            drivers.compute.delete_server(server_id).await?;

            let waiter = Waiter::new(Duration::from_millis(self.config.poll_interval_ms));
            let outcome = waiter
                .wait_for(abort, || async move {
                    match drivers.compute.get_server(server_id).await {
                        Err(e) if e.is_not_found() => Ok::<_, CloneError>(Tick::Done(())),
                        Ok(info) if info.status == "ERROR" => Ok(Tick::Done(())),
                        Ok(_) => {
                            // Deletion is idempotent; nudge it again.
                            let _ = drivers.compute.delete_server(server_id).await;
                            Ok(Tick::Continue)
                        }
                        Err(e) => Err(e.into()),
                    }
                })
                .await?;
            if outcome.into_done().is_none() {
                return Err(CloneError::V2v(format!(
                    "aborted while waiting for server {server_id} to terminate"
                )));
            }
            for volume_id in volume_ids {
                if let Err(e) = drivers.block.delete_volume(&volume_id).await {
                    tracing::warn!(volume = %volume_id, error = %e, "source volume delete failed");
                }
            }
        }
        Ok(())
    }

    // ── submission & watching ────────────────────────────────────────────

    async fn submit_and_watch(
        &self,
        plan_id: &str,
        mirror: Mirror,
        template_body: String,
        files: FilesMap,
        stack_name: Option<String>,
        ctx: &mut RunCtx,
    ) -> Result<StackInfo, CloneError> {
        let request = CreateStackRequest {
            stack_name: stack_name.unwrap_or_else(|| format!("stack-{}", Uuid::new_v4())),
            template: template_body,
            files,
            disable_rollback: ctx.disable_rollback,
        };
        let stack = self
            .drivers
            .stack
            .create_stack(request)
            .await
            .map_err(|e| CloneError::PlanDeployError {
                plan_id: plan_id.to_string(),
                msg: e.to_string(),
            })?;
        tracing::info!(plan_id = %plan_id, stack_id = %stack.id, "stack submitted");
        ctx.stacks.push(stack.id.clone());
        self.store
            .stack_link_put(StackLinkRow {
                plan_id: plan_id.to_string(),
                stack_id: stack.id.clone(),
            })
            .await?;
        self.store
            .plan_update(
                plan_id,
                PlanUpdate {
                    stack_id: Some(stack.id.clone()),
                    ..PlanUpdate::default()
                },
            )
            .await?;

        let drivers = &self.drivers;
        let store = &self.store;
        let abort = ctx.abort.clone();
        let stack_id = stack.id.clone();
        let waiter = Waiter::new(Duration::from_millis(self.config.poll_interval_ms));
        let outcome = waiter
            .wait_for(&ctx.abort, || {
                let stack_id = stack_id.clone();
                let abort = abort.clone();
                async move {
                    let info = drivers.stack.get_stack(&stack_id).await?;
                    let status_write = match (mirror, info.stack_status) {
                        (_, StackStatus::CreateFailed) => Some(PlanStatus::Error),
                        (Mirror::SubStack, StackStatus::CreateComplete) => None,
                        (Mirror::CloneMain, StackStatus::CreateComplete) => {
                            Some(PlanStatus::Finished)
                        }
                        (Mirror::MigrateMain, StackStatus::CreateComplete) => {
                            Some(PlanStatus::DataTransFinished)
                        }
                        (Mirror::MigrateMain, _) => Some(PlanStatus::Migrating),
                        (_, _) => Some(PlanStatus::Cloning),
                    };
                    let mut update = PlanUpdate::default();
                    update.plan_status = status_write;
                    if let Ok(events) = drivers.stack.events_list(&stack_id).await {
                        if let Some(event) = events.first() {
                            update.task_status = Some(format!(
                                "{}: {}",
                                event.resource_name, event.resource_status
                            ));
                        }
                    }
                    store.plan_update(plan_id, update).await?;

                    if info.stack_status.is_create_terminal() {
                        return Ok::<_, CloneError>(Tick::Done(info));
                    }
                    // An outside force-transition to error cancels the watch.
                    let stored = store.plan_get(plan_id).await?;
                    if stored.plan_status == PlanStatus::Error {
                        abort.set();
                    }
                    Ok(Tick::Continue)
                }
            })
            .await?;
        match outcome {
            crate::waiter::WaitOutcome::Done(info) => Ok(info),
            _ => Err(CloneError::PlanDeployError {
                plan_id: plan_id.to_string(),
                msg: format!("watch of stack {stack_id} was aborted"),
            }),
        }
    }

    async fn record_cloned_resources(
        &self,
        plan_id: &str,
        destination: &str,
        resource_map: &ResourceMap,
        stack_id: &str,
    ) -> Result<(), CloneError> {
        let mut relation = serde_json::Map::new();
        for res in resource_map.values() {
            let target = match self.drivers.stack.get_resource(stack_id, &res.name).await {
                Ok(r) => Some(r.physical_resource_id),
                Err(e) if e.is_not_found() => None,
                Err(e) => return Err(e.into()),
            };
            relation.insert(
                res.name.clone(),
                json!({"source_id": res.id, "target_id": target}),
            );
        }
        let dependencies =
            serde_json::to_value(portage_core::Plan::compute_dependencies(resource_map))
                .unwrap_or(Value::Null);
        self.store
            .cloned_resources_put(ClonedResourcesRow {
                plan_id: plan_id.to_string(),
                destination: destination.to_string(),
                relation: Value::Object(relation),
                dependencies,
            })
            .await?;
        Ok(())
    }
}

#[derive(Default)]
struct IdentityMap {
    server_ports: Vec<ServerPorts>,
    port_fips: HashMap<String, Vec<FipBinding>>,
    unassociated: HashSet<String>,
}

/// Strip private fields from a nested template, move availability zones to
/// the destination, and pull `file://` children (recursively) into a files
/// map.
fn rewrite_nested(template: &mut Value, destination: &str) -> Result<FilesMap, CloneError> {
    let mut files = FilesMap::new();
    let Some(entries) = template
        .get_mut("resources")
        .and_then(Value::as_object_mut)
    else {
        return Ok(files);
    };
    for entry in entries.values_mut() {
        let Some(obj) = entry.as_object_mut() else {
            continue;
        };
        obj.remove("extra_properties");
        obj.remove("id");
        if let Some(props) = obj.get_mut("properties").and_then(Value::as_object_mut) {
            if props.contains_key("availability_zone") {
                props.insert("availability_zone".to_string(), json!(destination));
            }
        }
        let tag = obj
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if tag.starts_with("file://") {
            if let Some(Value::String(content)) = obj.remove("content") {
                let mut child: Value = serde_json::from_str(&content)
                    .map_err(|e| CloneError::V2v(format!("unparseable nested template: {e}")))?;
                let child_files = rewrite_nested(&mut child, destination)?;
                files.extend(child_files);
                files.insert(tag, child.to_string());
            }
        }
    }
    Ok(files)
}
