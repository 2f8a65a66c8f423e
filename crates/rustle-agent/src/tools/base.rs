//! The `Tool` contract.
//!
//! A tool is the tuple (name, description, JSON-Schema parameters, execute).
//! Parameter validation against the schema runs before every execution, so a
//! malformed call never reaches a tool body — the LLM gets a correctable
//! error string instead.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

use rustle_core::types::ToolDefinition;

// ─────────────────────────────────────────────
// Tool trait
// ─────────────────────────────────────────────

/// Every agent capability implements this.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Stable identifier the LLM calls (e.g. `"read_file"`). Unique within
    /// a registry.
    fn name(&self) -> &str;

    /// Prose hint included in the exported function schema.
    fn description(&self) -> &str;

    /// JSON Schema for the arguments. The root must be
    /// `{"type": "object", ...}`.
    fn parameters(&self) -> Value;

    /// Run the tool. Errors are caught by the registry and converted to an
    /// error string for the LLM; only return `Err` for real failures.
    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String>;

    /// Check `params` against [`Tool::parameters`]. Returns one message per
    /// violated constraint; empty means valid.
    fn validate_params(&self, params: &HashMap<String, Value>) -> Vec<String> {
        let schema = self.parameters();
        let value = Value::Object(params.clone().into_iter().collect());
        validate_value(&value, &schema, "")
    }

    /// The function-calling export for the LLM.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description(), self.parameters())
    }
}

// ─────────────────────────────────────────────
// Schema validation
// ─────────────────────────────────────────────

/// Recursive JSON-Schema walk covering the subset tools use: declared type,
/// enum membership, numeric minimum/maximum, string minLength/maxLength,
/// required keys, nested object properties, and array items.
fn validate_value(value: &Value, schema: &Value, path: &str) -> Vec<String> {
    let label = if path.is_empty() { "parameter" } else { path };
    let declared = schema.get("type").and_then(|t| t.as_str());

    if let Some(t) = declared {
        let matches = match t {
            "string" => value.is_string(),
            "integer" => value.is_i64() || value.is_u64(),
            "number" => value.is_number(),
            "boolean" => value.is_boolean(),
            "array" => value.is_array(),
            "object" => value.is_object(),
            _ => true,
        };
        if !matches {
            return vec![format!("{label} should be {t}")];
        }
    }

    let mut errors = Vec::new();

    if let Some(allowed) = schema.get("enum").and_then(|e| e.as_array()) {
        if !allowed.contains(value) {
            let options: Vec<String> = allowed.iter().map(|v| v.to_string()).collect();
            errors.push(format!("{label} must be one of [{}]", options.join(", ")));
        }
    }

    if matches!(declared, Some("integer") | Some("number")) {
        if let Some(n) = value.as_f64() {
            if let Some(min) = schema.get("minimum").and_then(|v| v.as_f64()) {
                if n < min {
                    errors.push(format!("{label} must be >= {min}"));
                }
            }
            if let Some(max) = schema.get("maximum").and_then(|v| v.as_f64()) {
                if n > max {
                    errors.push(format!("{label} must be <= {max}"));
                }
            }
        }
    }

    if declared == Some("string") {
        if let Some(s) = value.as_str() {
            let len = s.chars().count();
            if let Some(min) = schema.get("minLength").and_then(|v| v.as_u64()) {
                if (len as u64) < min {
                    errors.push(format!("{label} must be at least {min} chars"));
                }
            }
            if let Some(max) = schema.get("maxLength").and_then(|v| v.as_u64()) {
                if (len as u64) > max {
                    errors.push(format!("{label} must be at most {max} chars"));
                }
            }
        }
    }

    if declared == Some("object") {
        if let Some(obj) = value.as_object() {
            if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
                for key in required.iter().filter_map(|k| k.as_str()) {
                    if !obj.contains_key(key) {
                        let full = join_path(path, key);
                        errors.push(format!("missing required {full}"));
                    }
                }
            }
            if let Some(props) = schema.get("properties").and_then(|p| p.as_object()) {
                for (key, val) in obj {
                    if let Some(prop_schema) = props.get(key) {
                        errors.extend(validate_value(val, prop_schema, &join_path(path, key)));
                    }
                }
            }
        }
    }

    if declared == Some("array") {
        if let (Some(items), Some(arr)) = (schema.get("items"), value.as_array()) {
            for (i, item) in arr.iter().enumerate() {
                let item_path = if path.is_empty() {
                    format!("[{i}]")
                } else {
                    format!("{path}[{i}]")
                };
                errors.extend(validate_value(item, items, &item_path));
            }
        }
    }

    errors
}

fn join_path(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

// ─────────────────────────────────────────────
// Param helpers
// ─────────────────────────────────────────────

/// Required string param; friendly error when absent or the wrong type.
pub fn require_string(params: &HashMap<String, Value>, key: &str) -> anyhow::Result<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("Missing required parameter: {key}"))
}

pub fn optional_string(params: &HashMap<String, Value>, key: &str) -> Option<String> {
    params.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

pub fn optional_i64(params: &HashMap<String, Value>, key: &str) -> Option<i64> {
    params.get(key).and_then(|v| v.as_i64())
}

/// Optional bool, `false` when absent.
pub fn optional_bool(params: &HashMap<String, Value>, key: &str) -> bool {
    params.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
