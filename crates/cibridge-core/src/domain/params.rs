//! Build parameters at the trigger boundary.
//!
//! Callers hand over loosely typed values (JSON objects from a tool call,
//! `KEY=VALUE` pairs from a command line). They are normalised here into
//! the ordered string map the rest of the crate works with.

use cibridge_gateway::BuildParameters;
use serde_json::Value;

use super::error::{BridgeError, Result};

/// Coerce a JSON object into build parameters.
///
/// Strings pass through; numbers and booleans use their JSON text. `null`,
/// arrays and nested objects are rejected.
pub fn parameters_from_json(value: &Value) -> Result<BuildParameters> {
    let object = match value {
        Value::Null => return Ok(BuildParameters::new()),
        Value::Object(map) => map,
        other => {
            return Err(BridgeError::InvalidArgument(format!(
                "parameters must be a JSON object, got {}",
                json_kind(other)
            )))
        }
    };

    let mut parameters = BuildParameters::new();
    for (key, value) in object {
        let text = match value {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            other => {
                return Err(BridgeError::InvalidArgument(format!(
                    "parameter '{key}' must be a string, number or boolean, got {}",
                    json_kind(other)
                )))
            }
        };
        parameters.insert(key.clone(), text);
    }
    Ok(parameters)
}

/// Parse one `KEY=VALUE` pair. The value may itself contain `=`.
pub fn parse_parameter_pair(pair: &str) -> Result<(String, String)> {
    let (key, value) = pair.split_once('=').ok_or_else(|| {
        BridgeError::InvalidArgument(format!("parameter '{pair}' is not of the form KEY=VALUE"))
    })?;
    let key = key.trim();
    if key.is_empty() {
        return Err(BridgeError::InvalidArgument(format!(
            "parameter '{pair}' has an empty name"
        )));
    }
    Ok((key.to_string(), value.to_string()))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
