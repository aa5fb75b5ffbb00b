use std::collections::BTreeMap;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::CoreError;
use crate::plan::ResourceMap;
use crate::resource::{ExtraProperties, ParamSpec, Resource, ResourceKind};
use crate::status::PlanType;

pub const TEMPLATE_VERSION: &str = "2013-05-23";

/// The `type` field of a template resource: a known kind tag, or a
/// `file://<key>` reference to a nested template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TemplateType {
    Known(ResourceKind),
    File(String),
}

impl TemplateType {
    pub fn kind(&self) -> Option<ResourceKind> {
        match self {
            TemplateType::Known(kind) => Some(*kind),
            TemplateType::File(_) => None,
        }
    }

    pub fn file_key(&self) -> Option<&str> {
        match self {
            TemplateType::File(key) if key.starts_with("file://") => Some(key),
            _ => None,
        }
    }
}

/// One entry of a template's `resources` map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateResource {
    #[serde(rename = "type")]
    pub resource_type: TemplateType,
    #[serde(default)]
    pub properties: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_properties: Option<ExtraProperties>,
    /// Serialized child template for `file://` entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl TemplateResource {
    pub fn kind(&self) -> Option<ResourceKind> {
        self.resource_type.kind()
    }
}

/// Map of `file://<key>` to the serialized child template shipped with a
/// stack submission.
pub type FilesMap = BTreeMap<String, String>;

/// The declarative template a plan deploys from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub heat_template_version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, ParamSpec>,
    #[serde(default)]
    pub resources: BTreeMap<String, TemplateResource>,

    // Engine-private fields, stripped before submission.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expire_time: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_type: Option<PlanType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disable_rollback: Option<bool>,
}

impl Template {
    pub fn empty(description: impl Into<String>) -> Self {
        Template {
            heat_template_version: TEMPLATE_VERSION.to_string(),
            description: description.into(),
            parameters: BTreeMap::new(),
            resources: BTreeMap::new(),
            expire_time: None,
            plan_type: None,
            plan_id: None,
            stack_id: None,
            disable_rollback: None,
        }
    }

    /// Render a resource map into a template. Each resource contributes its
    /// entry (live id tucked into `extra_properties`) and its parameter
    /// declarations.
    pub fn from_resources(resources: &ResourceMap, description: impl Into<String>) -> Self {
        let mut template = Template::empty(description);
        for res in resources.values() {
            let mut extra = res.extra_properties.clone();
            extra.id = if res.id.is_empty() {
                None
            } else {
                Some(res.id.clone())
            };
            template.resources.insert(
                res.name.clone(),
                TemplateResource {
                    resource_type: TemplateType::Known(res.kind),
                    properties: res.properties.clone(),
                    extra_properties: Some(extra),
                    content: None,
                },
            );
            for (name, spec) in &res.parameters {
                template.parameters.insert(name.clone(), spec.clone());
            }
        }
        template
    }

    /// Parse the template body back into a resource map. Entries without a
    /// realized id get a fresh one; `file://` entries are rejected here
    /// (nested templates are imported through their parent stack resource).
    pub fn into_resources(self) -> Result<ResourceMap, CoreError> {
        let parameters = self.parameters;
        let mut resources = ResourceMap::new();
        for (name, entry) in self.resources {
            let kind = match entry.resource_type {
                TemplateType::Known(kind) => kind,
                TemplateType::File(key) => {
                    return Err(CoreError::InvalidTemplate(format!(
                        "nested template {key} is only valid inside a stack resource"
                    )));
                }
            };
            let mut extra = entry.extra_properties.unwrap_or_default();
            let id = extra
                .id
                .take()
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            let mut res = Resource {
                name: name.clone(),
                kind,
                id,
                properties: entry.properties,
                extra_properties: extra,
                parameters: BTreeMap::new(),
            };
            res.rebuild_parameters(&parameters);
            resources.insert(name, res);
        }
        Ok(resources)
    }

    /// Serialize for the stack engine.
    pub fn to_json(&self) -> Result<String, CoreError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self, CoreError> {
        Ok(serde_json::from_str(raw)?)
    }
}
