//! Reference shapes inside property trees.
//!
//! A node is a reference when it is a single-key mapping whose key is
//! `get_resource`, `get_param`, or `get_attr`. `get_resource` and
//! `get_attr[0]` contribute dependency edges; `get_param` binds a template
//! parameter.

use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference<'a> {
    Resource(&'a str),
    Param(&'a str),
    Attr(&'a Vec<Value>),
}

/// Interpret a value as a reference node, if it is one.
pub fn as_reference(value: &Value) -> Option<Reference<'_>> {
    let map = value.as_object()?;
    if map.len() != 1 {
        return None;
    }
    let (key, inner) = map.iter().next()?;
    match key.as_str() {
        "get_resource" => inner.as_str().map(Reference::Resource),
        "get_param" => inner.as_str().map(Reference::Param),
        "get_attr" => inner.as_array().map(Reference::Attr),
        _ => None,
    }
}

/// The local name a reference points at, when it points at a resource.
pub fn referenced_resource(value: &Value) -> Option<&str> {
    match as_reference(value)? {
        Reference::Resource(name) => Some(name),
        Reference::Attr(args) => args.first().and_then(Value::as_str),
        Reference::Param(_) => None,
    }
}

/// Collect the local names referenced anywhere below `value` through
/// `get_resource` or `get_attr[0]`, in depth-first order, deduplicated.
pub fn collect_resource_refs(value: &Value, out: &mut Vec<String>) {
    if let Some(name) = referenced_resource(value) {
        if !out.iter().any(|n| n == name) {
            out.push(name.to_string());
        }
        return;
    }
    match value {
        Value::Object(map) => {
            for v in map.values() {
                collect_resource_refs(v, out);
            }
        }
        Value::Array(items) => {
            for v in items {
                collect_resource_refs(v, out);
            }
        }
        _ => {}
    }
}

/// Collect the parameter names bound anywhere below `value` via `get_param`.
pub fn collect_param_refs(value: &Value, out: &mut Vec<String>) {
    if let Some(Reference::Param(name)) = as_reference(value) {
        if !out.iter().any(|n| n == name) {
            out.push(name.to_string());
        }
        return;
    }
    match value {
        Value::Object(map) => {
            for v in map.values() {
                collect_param_refs(v, out);
            }
        }
        Value::Array(items) => {
            for v in items {
                collect_param_refs(v, out);
            }
        }
        _ => {}
    }
}

/// True when any node below `value` references `name` through
/// `get_resource` or `get_attr[0]`.
pub fn references(value: &Value, name: &str) -> bool {
    if referenced_resource(value) == Some(name) {
        return true;
    }
    match value {
        Value::Object(map) => map.values().any(|v| references(v, name)),
        Value::Array(items) => items.iter().any(|v| references(v, name)),
        _ => false,
    }
}

/// Rewrite every `{get_resource: name}` below `value` into
/// `{get_param: name}`. `get_attr` references are left alone: an attribute
/// of a parameterized resource has no template meaning and shaping removes
/// those separately.
pub fn resource_to_param(value: &mut Value, name: &str) {
    let is_target = matches!(as_reference(value), Some(Reference::Resource(n)) if n == name);
    if is_target {
        let mut map = Map::new();
        map.insert("get_param".to_string(), Value::String(name.to_string()));
        *value = Value::Object(map);
        return;
    }
    match value {
        Value::Object(map) => {
            for v in map.values_mut() {
                resource_to_param(v, name);
            }
        }
        Value::Array(items) => {
            for v in items {
                resource_to_param(v, name);
            }
        }
        _ => {}
    }
}

/// Build a `{get_resource: name}` node.
pub fn get_resource(name: &str) -> Value {
    let mut map = Map::new();
    map.insert("get_resource".to_string(), Value::String(name.to_string()));
    Value::Object(map)
}

/// Build a `{get_param: name}` node.
pub fn get_param(name: &str) -> Value {
    let mut map = Map::new();
    map.insert("get_param".to_string(), Value::String(name.to_string()));
    Value::Object(map)
}
