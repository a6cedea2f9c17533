//! Parameter schema sanitization
//!
//! MCP servers publish JSON Schemas the model API does not fully accept. The
//! sanitizer removes the unsupported keywords, recursing through `properties`,
//! `items` and `anyOf`.

use serde_json::{json, Map, Value};

/// `format` values the model API accepts on string schemas.
const SUPPORTED_STRING_FORMATS: &[&str] = &["enum", "date-time"];

/// Sanitize an MCP `inputSchema`. Missing or non-object schemas become an empty
/// object schema.
pub fn sanitize_parameters(schema: Option<&Value>) -> Value {
    match schema {
        Some(Value::Object(map)) => {
            let mut sanitized = Value::Object(map.clone());
            sanitize_node(&mut sanitized);
            sanitized
        }
        _ => empty_object_schema(),
    }
}

pub fn empty_object_schema() -> Value {
    json!({ "type": "object", "properties": {} })
}

fn sanitize_node(node: &mut Value) {
    let Some(map) = node.as_object_mut() else {
        return;
    };

    map.remove("$schema");

    if map.contains_key("anyOf") {
        map.remove("default");
        if let Some(Value::Array(variants)) = map.get_mut("anyOf") {
            for variant in variants {
                sanitize_node(variant);
            }
        }
    }

    if let Some(items) = map.get_mut("items") {
        sanitize_node(items);
    }

    if let Some(Value::Object(properties)) = map.get_mut("properties") {
        for property in properties.values_mut() {
            sanitize_node(property);
        }
    }

    strip_unsupported_format(map);
}

fn strip_unsupported_format(map: &mut Map<String, Value>) {
    let is_string = map.get("type").and_then(Value::as_str) == Some("string");
    if !is_string {
        return;
    }
    let supported = map
        .get("format")
        .and_then(Value::as_str)
        .map(|format| SUPPORTED_STRING_FORMATS.contains(&format))
        .unwrap_or(true);
    if !supported {
        map.remove("format");
    }
}
