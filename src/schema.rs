//! JSON Schema validation for proxied tool arguments.
//!
//! Arguments supplied by the inbound client are checked against the
//! `inputSchema` the downstream server advertised at discovery time, before
//! any token exchange or downstream call is made. Checks, in order:
//!
//! 1. **Required parameters** - every name under `required:` must be present
//!    and non-null.
//! 2. **Unknown parameters** - keys not listed under `properties:` are
//!    rejected.
//! 3. **Type validation with coercion** - values are checked against the
//!    declared type; `"123"` coerces to `123` for integer/number fields and
//!    `"true"`/`"false"` to booleans.
//! 4. **Enum values** - where a property declares `enum: [...]` the value
//!    must be one of the listed options.
//!
//! A schema of `null`, `{}` or one without `properties` accepts any object.

use serde_json::{Map, Value};

/// Validate `arguments` against `input_schema`.
///
/// Returns the arguments after safe coercions on success, or a
/// parameter-by-parameter message suitable for an `InvalidArgument` error.
pub fn validate_arguments(
    arguments: &Value,
    input_schema: &Value,
) -> std::result::Result<Value, String> {
    let Some(properties) = input_schema
        .get("properties")
        .and_then(Value::as_object)
    else {
        // No declared properties: accept the arguments unchanged.
        return Ok(normalize(arguments)?);
    };

    let required: Vec<&str> = input_schema
        .get("required")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let args = match normalize(arguments) {
        Ok(Value::Object(m)) => m,
        Ok(_) | Err(_) => return Err("arguments must be a JSON object".to_string()),
    };

    let mut problems = Vec::new();
    let mut coerced = Map::new();

    for name in &required {
        match args.get(*name) {
            None | Some(Value::Null) => {
                problems.push(format!("missing required parameter '{name}'"));
            }
            Some(_) => {}
        }
    }

    for (name, value) in &args {
        let Some(prop) = properties.get(name) else {
            problems.push(format!("unknown parameter '{name}'"));
            continue;
        };
        if value.is_null() {
            // Optional parameter explicitly null: drop it, as absent.
            continue;
        }
        match check_type(value, prop) {
            Ok(v) => {
                if let Some(options) = prop.get("enum").and_then(Value::as_array) {
                    if !options.contains(&v) {
                        problems.push(format!(
                            "parameter '{name}' must be one of {}",
                            serde_json::to_string(options).unwrap_or_default()
                        ));
                        continue;
                    }
                }
                coerced.insert(name.clone(), v);
            }
            Err(expected) => {
                problems.push(format!(
                    "parameter '{name}' must be of type {expected}"
                ));
            }
        }
    }

    if problems.is_empty() {
        Ok(Value::Object(coerced))
    } else {
        Err(problems.join("; "))
    }
}

/// Treat null/missing arguments as an empty object.
fn normalize(arguments: &Value) -> std::result::Result<Value, String> {
    match arguments {
        Value::Null => Ok(Value::Object(Map::new())),
        Value::Object(_) => Ok(arguments.clone()),
        _ => Err("arguments must be a JSON object".to_string()),
    }
}

/// Check `value` against the declared JSON Schema type, applying safe
/// string coercions. Returns the (possibly coerced) value, or the expected
/// type name on mismatch.
fn check_type(value: &Value, prop: &Value) -> std::result::Result<Value, &'static str> {
    let Some(declared) = prop.get("type").and_then(Value::as_str) else {
        return Ok(value.clone());
    };

    match declared {
        "string" => match value {
            Value::String(_) => Ok(value.clone()),
            _ => Err("string"),
        },
        "integer" => match value {
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value.clone()),
            Value::String(s) => s
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| "integer"),
            _ => Err("integer"),
        },
        "number" => match value {
            Value::Number(_) => Ok(value.clone()),
            Value::String(s) => s
                .parse::<f64>()
                .ok()
                .and_then(|f| serde_json::Number::from_f64(f).map(Value::Number))
                .ok_or("number"),
            _ => Err("number"),
        },
        "boolean" => match value {
            Value::Bool(_) => Ok(value.clone()),
            Value::String(s) if s == "true" => Ok(Value::Bool(true)),
            Value::String(s) if s == "false" => Ok(Value::Bool(false)),
            _ => Err("boolean"),
        },
        "array" => match value {
            Value::Array(_) => Ok(value.clone()),
            _ => Err("array"),
        },
        "object" => match value {
            Value::Object(_) => Ok(value.clone()),
            _ => Err("object"),
        },
        _ => Ok(value.clone()),
    }
}
