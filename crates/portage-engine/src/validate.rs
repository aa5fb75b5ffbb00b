//! Shape validation of edited properties against the schema the stack
//! engine reports for a resource type.

use serde_json::{Map, Value};

use portage_core::reference;
use portage_driver::types::{PropertySchema, ResourceTypeSchema};

use crate::error::EngineError;

/// Validate `args` against `schema`. An empty schema validates everything;
/// reference shapes are accepted in place of any scalar or map value.
pub fn validate_properties(
    args: &Map<String, Value>,
    schema: &ResourceTypeSchema,
) -> Result<(), EngineError> {
    if schema.is_empty() {
        return Ok(());
    }
    for (key, value) in args {
        let property = match schema.get(key) {
            Some(property) => property,
            None => match wildcard(schema) {
                Some(property) => property,
                None => {
                    return Err(EngineError::resources(format!("unknown property {key}")));
                }
            },
        };
        validate_value(key, value, property)?;
    }
    Ok(())
}

fn wildcard(schema: &ResourceTypeSchema) -> Option<&PropertySchema> {
    if schema.len() == 1 {
        schema.get("*")
    } else {
        None
    }
}

fn validate_value(key: &str, value: &Value, property: &PropertySchema) -> Result<(), EngineError> {
    let expected = property.property_type.to_ascii_lowercase();
    let ok = match expected.as_str() {
        "integer" | "number" => value.is_number() || is_reference(value),
        "boolean" => value.is_boolean() || is_reference(value),
        "string" => value.is_string() || value.is_number() || value.is_null() || is_reference(value),
        "list" => value.is_array(),
        "map" => value.is_object(),
        // Unknown schema types are not validated.
        _ => true,
    };
    if !ok {
        return Err(EngineError::resources(format!(
            "property {key} has the wrong type (expect {expected})"
        )));
    }

    if let (Value::Object(children), Some(child_schema)) = (value, &property.schema) {
        // Reference nodes stand in for the whole subtree.
        if !is_reference(value) {
            validate_properties(children, child_schema)?;
        }
    }

    if let (Value::Array(items), Some(child_schema)) = (value, &property.schema) {
        if let Some(item_schema) = wildcard(child_schema) {
            for item in items {
                validate_value(key, item, item_schema)?;
            }
        }
    }
    Ok(())
}

fn is_reference(value: &Value) -> bool {
    reference::as_reference(value).is_some()
}
