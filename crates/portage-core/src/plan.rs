use std::collections::{BTreeMap, BTreeSet};

use jiff::{Timestamp, ToSpan};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;
use crate::reference;
use crate::resource::{Resource, ResourceKind};
use crate::status::{PlanStatus, PlanType};

/// One element of the resource selection a clone plan was created from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSelection {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ResourceKind,
}

/// One node of the dependency view over a resource map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDependency {
    pub id: String,
    /// Display name, taken from the resource's `name` property when present.
    pub name: String,
    /// Template-local identifier; the key of the dependency map.
    pub name_in_template: String,
    #[serde(rename = "type")]
    pub kind: ResourceKind,
    pub dependencies: Vec<String>,
}

pub type ResourceMap = BTreeMap<String, Resource>;
pub type DependencyMap = BTreeMap<String, ResourceDependency>;

/// Which side of a plan's resource pair an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceSet {
    Original,
    Updated,
}

/// The durable record of a clone/migrate intent plus its resource graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub plan_id: String,
    pub plan_name: String,
    pub plan_type: PlanType,
    pub project_id: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_id: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<Timestamp>,
    pub expire_at: Timestamp,
    #[serde(default)]
    pub deleted: bool,
    pub plan_status: PlanStatus,
    #[serde(default)]
    pub task_status: String,
    #[serde(default)]
    pub sys_clone: bool,
    #[serde(default = "default_copy_data")]
    pub copy_data: bool,
    /// The live-resource selection a clone plan was created from.
    #[serde(default)]
    pub clone_resources: Vec<ResourceSelection>,
    #[serde(default)]
    pub original_resources: ResourceMap,
    #[serde(default)]
    pub updated_resources: ResourceMap,
    #[serde(default)]
    pub original_dependencies: DependencyMap,
    #[serde(default)]
    pub updated_dependencies: DependencyMap,
}

fn default_copy_data() -> bool {
    true
}

impl Plan {
    /// Allocate a fresh plan in `Creating`, expiring `expire_minutes` from
    /// `now`.
    pub fn new(
        plan_type: PlanType,
        project_id: impl Into<String>,
        user_id: impl Into<String>,
        plan_name: Option<String>,
        expire_minutes: i64,
        now: Timestamp,
    ) -> Self {
        let plan_id = Uuid::new_v4().to_string();
        Plan {
            plan_name: plan_name.unwrap_or_else(|| plan_id.clone()),
            plan_id,
            plan_type,
            project_id: project_id.into(),
            user_id: user_id.into(),
            stack_id: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            expire_at: now
                .saturating_add(expire_minutes.minutes())
                .expect("minutes span is always valid timestamp arithmetic"),
            deleted: false,
            plan_status: PlanStatus::Creating,
            task_status: String::new(),
            sys_clone: false,
            copy_data: true,
            clone_resources: Vec::new(),
            original_resources: ResourceMap::new(),
            updated_resources: ResourceMap::new(),
            original_dependencies: DependencyMap::new(),
            updated_dependencies: DependencyMap::new(),
        }
    }

    /// Expiry is advisory: nothing acts on it mid-orchestration.
    pub fn expired(&self, now: Timestamp) -> bool {
        now > self.expire_at
    }

    /// Plans are mutable only while available or errored.
    pub fn is_mutable(&self) -> bool {
        matches!(
            self.plan_status,
            PlanStatus::Available | PlanStatus::Error
        )
    }

    /// Compute the dependency view of `resources`: one node per resource,
    /// edges for every `get_resource`/`get_attr[0]` reference that resolves
    /// inside the map.
    pub fn compute_dependencies(resources: &ResourceMap) -> DependencyMap {
        let mut deps = DependencyMap::new();
        for res in resources.values() {
            let mut edges: Vec<String> = Vec::new();
            for value in res.properties.values() {
                let mut refs = Vec::new();
                reference::collect_resource_refs(value, &mut refs);
                for name in refs {
                    if resources.contains_key(&name) && !edges.contains(&name) {
                        edges.push(name);
                    }
                }
            }
            let display = res
                .properties
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            deps.insert(
                res.name.clone(),
                ResourceDependency {
                    id: res.id.clone(),
                    name: display,
                    name_in_template: res.name.clone(),
                    kind: res.kind,
                    dependencies: edges,
                },
            );
        }
        deps
    }

    /// Recompute the stored dependency map for one side of the plan.
    ///
    /// If the set of resource names is unchanged the stored map is trusted
    /// and left alone; otherwise it is rebuilt from scratch.
    pub fn rebuild_dependencies(&mut self, set: ResourceSet) {
        let (resources, dependencies) = match set {
            ResourceSet::Original => (&self.original_resources, &mut self.original_dependencies),
            ResourceSet::Updated => (&self.updated_resources, &mut self.updated_dependencies),
        };
        if resources.is_empty() {
            dependencies.clear();
            return;
        }
        if resources.len() == dependencies.len()
            && resources.keys().all(|name| dependencies.contains_key(name))
        {
            return;
        }
        *dependencies = Self::compute_dependencies(resources);
    }

    /// Fail when the dependency graph of `resources` has a cycle, naming the
    /// resources still entangled after peeling all leaves.
    pub fn check_acyclic(resources: &ResourceMap) -> Result<(), CoreError> {
        let deps = Self::compute_dependencies(resources);
        let mut remaining: BTreeMap<&str, BTreeSet<&str>> = deps
            .values()
            .map(|d| {
                (
                    d.name_in_template.as_str(),
                    d.dependencies.iter().map(String::as_str).collect(),
                )
            })
            .collect();
        loop {
            let leaves: Vec<&str> = remaining
                .iter()
                .filter(|(_, edges)| edges.is_empty())
                .map(|(name, _)| *name)
                .collect();
            if leaves.is_empty() {
                break;
            }
            for leaf in &leaves {
                remaining.remove(*leaf);
            }
            for edges in remaining.values_mut() {
                for leaf in &leaves {
                    edges.remove(*leaf);
                }
            }
        }
        if remaining.is_empty() {
            Ok(())
        } else {
            Err(CoreError::DependencyCycle {
                names: remaining.keys().map(|n| n.to_string()).collect(),
            })
        }
    }

    /// Copy without the (potentially large) resource and dependency maps,
    /// for summary listings.
    pub fn without_resources(&self) -> Plan {
        let mut plan = self.clone();
        plan.original_resources.clear();
        plan.updated_resources.clear();
        plan.original_dependencies.clear();
        plan.updated_dependencies.clear();
        plan
    }

    /// Names of resources no other resource depends on, for one side.
    pub fn roots(&self, set: ResourceSet) -> Vec<String> {
        let deps = match set {
            ResourceSet::Original => &self.original_dependencies,
            ResourceSet::Updated => &self.updated_dependencies,
        };
        deps.keys()
            .filter(|name| {
                !deps
                    .values()
                    .any(|d| d.dependencies.iter().any(|e| e == *name))
            })
            .cloned()
            .collect()
    }
}
