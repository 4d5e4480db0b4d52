//! WD-003: Parameter resolution and environment interpolation.
//!
//! A declaration is either single-line (`name: value`) or multi-line
//! (`name: {type, value, default, required, ...}`). Resolution yields a
//! [`Parameter`] whose value variant always agrees with its type.

use super::error::{Error, Result};
use super::manifest::RawInputs;
use super::types::*;
use regex::Regex;
use serde_yaml_ng::Value;
use std::sync::OnceLock;

/// Keys that make a mapping a multi-line declaration.
const MULTI_LINE_KEYS: [&str; 7] = [
    "type",
    "description",
    "value",
    "required",
    "default",
    "status",
    "schema",
];

/// A multi-line declaration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MultiLineParam {
    pub type_name: Option<String>,
    pub description: Option<String>,
    pub value: Option<Value>,
    pub default: Option<Value>,
    pub required: bool,
}

/// A classified parameter declaration.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamDecl {
    SingleLine(Value),
    MultiLine(MultiLineParam),
}

impl ParamDecl {
    /// Classify a raw YAML declaration.
    pub fn from_yaml(raw: &Value) -> Self {
        let Value::Mapping(map) = raw else {
            return ParamDecl::SingleLine(raw.clone());
        };
        let is_multi = !map.is_empty()
            && map
                .keys()
                .all(|k| k.as_str().is_some_and(|k| MULTI_LINE_KEYS.contains(&k)));
        if !is_multi {
            return ParamDecl::SingleLine(raw.clone());
        }
        let get = |key: &str| map.get(key).filter(|v| !v.is_null()).cloned();
        ParamDecl::MultiLine(MultiLineParam {
            type_name: get("type").map(|v| yaml_scalar_string(&v)),
            description: get("description").map(|v| yaml_scalar_string(&v)),
            value: get("value"),
            default: get("default"),
            required: get("required").and_then(|v| v.as_bool()).unwrap_or(false),
        })
    }
}

/// Resolve a raw declaration into a typed parameter.
pub fn resolve(name: &str, raw: &Value, file: &str) -> Result<Parameter> {
    match ParamDecl::from_yaml(raw) {
        ParamDecl::SingleLine(value) => resolve_single_line(name, value, file),
        ParamDecl::MultiLine(decl) => resolve_multi_line(name, decl, file),
    }
}

/// Resolve every declaration of an `inputs:` block, preserving order.
pub fn resolve_all(inputs: &RawInputs, file: &str) -> Result<Parameters> {
    let mut out = Parameters::new();
    for (name, raw) in inputs {
        out.insert(name.clone(), resolve(name, raw, file)?);
    }
    Ok(out)
}

fn resolve_single_line(name: &str, value: Value, file: &str) -> Result<Parameter> {
    // A bare type name declares the type with its zero value.
    if let Value::String(s) = &value {
        if let Some(t) = ParamType::from_name(s) {
            return Ok(Parameter {
                value: t.zero_value(),
                required: false,
                description: None,
                style: DeclarationStyle::SingleLine,
            });
        }
    }
    let param_type = infer_type(name, &value, file)?;
    Ok(Parameter {
        value: convert(name, param_type, Some(value), file)?,
        required: false,
        description: None,
        style: DeclarationStyle::SingleLine,
    })
}

fn resolve_multi_line(name: &str, decl: MultiLineParam, file: &str) -> Result<Parameter> {
    let value = decl.value.or(decl.default);
    let param_type = match decl.type_name.as_deref() {
        Some(t) => ParamType::from_name(t).ok_or_else(|| Error::InvalidParameterType {
            file: file.to_string(),
            name: name.to_string(),
            type_name: t.to_string(),
        })?,
        None => match &value {
            Some(v) => infer_type(name, v, file)?,
            None => ParamType::String,
        },
    };
    Ok(Parameter {
        value: convert(name, param_type, value, file)?,
        required: decl.required,
        description: decl.description,
        style: DeclarationStyle::MultiLine,
    })
}

/// Infer a parameter type from the YAML runtime kind of its value.
/// Integers outside the `i64` range are floats.
pub fn infer_type(name: &str, value: &Value, file: &str) -> Result<ParamType> {
    match value {
        Value::Null | Value::String(_) => Ok(ParamType::String),
        Value::Bool(_) => Ok(ParamType::Boolean),
        Value::Number(n) if n.is_i64() => Ok(ParamType::Integer),
        Value::Number(_) => Ok(ParamType::Float),
        Value::Mapping(_) => Ok(ParamType::Json),
        Value::Sequence(_) => Ok(ParamType::Slice),
        Value::Tagged(t) => Err(Error::InvalidParameterType {
            file: file.to_string(),
            name: name.to_string(),
            type_name: t.tag.to_string(),
        }),
    }
}

fn yaml_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() => "integer",
        Value::Number(_) => "float",
        Value::String(_) => "string",
        Value::Sequence(_) => "slice",
        Value::Mapping(_) => "json",
        Value::Tagged(_) => "tagged",
    }
}

fn convert(name: &str, param_type: ParamType, value: Option<Value>, file: &str) -> Result<ParamValue> {
    let Some(value) = value else {
        return Ok(param_type.zero_value());
    };
    if value.is_null() {
        return Ok(param_type.zero_value());
    }
    let mismatch = |v: &Value| Error::ParameterTypeMismatch {
        file: file.to_string(),
        name: name.to_string(),
        expected: param_type.to_string(),
        actual: yaml_kind(v).to_string(),
    };
    match param_type {
        ParamType::String => match &value {
            Value::String(s) => Ok(ParamValue::String(interpolate(s))),
            other => Err(mismatch(other)),
        },
        ParamType::Integer => match value.as_i64() {
            Some(i) => Ok(ParamValue::Integer(i)),
            None => Err(mismatch(&value)),
        },
        ParamType::Float => match &value {
            Value::Number(n) => n.as_f64().map(ParamValue::Float).ok_or_else(|| mismatch(&value)),
            other => Err(mismatch(other)),
        },
        ParamType::Boolean => match value {
            Value::Bool(b) => Ok(ParamValue::Boolean(b)),
            other => Err(mismatch(&other)),
        },
        ParamType::Json => match &value {
            Value::String(s) => Ok(ParamValue::Json(
                serde_json::from_str(s).unwrap_or_else(|_| serde_json::Value::String(s.clone())),
            )),
            Value::Mapping(_) => Ok(ParamValue::Json(yaml_to_json(&value, true))),
            other => Err(mismatch(other)),
        },
        ParamType::Slice => match &value {
            Value::Sequence(items) => Ok(ParamValue::Slice(
                items.iter().map(|v| yaml_to_json(v, true)).collect(),
            )),
            other => Err(mismatch(other)),
        },
    }
}

/// Convert a YAML value to JSON, stringifying non-string keys.
/// With `interpolate_strings`, string leaves pass through [`interpolate`].
pub fn yaml_to_json(value: &Value, interpolate_strings: bool) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                serde_json::Value::from(i)
            } else if let Some(u) = n.as_u64() {
                serde_json::Value::from(u)
            } else {
                n.as_f64()
                    .map(serde_json::Value::from)
                    .unwrap_or(serde_json::Value::Null)
            }
        }
        Value::String(s) if interpolate_strings => serde_json::Value::String(interpolate(s)),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Sequence(items) => serde_json::Value::Array(
            items
                .iter()
                .map(|v| yaml_to_json(v, interpolate_strings))
                .collect(),
        ),
        Value::Mapping(map) => {
            let mut obj = serde_json::Map::new();
            for (k, v) in map {
                obj.insert(yaml_scalar_string(k), yaml_to_json(v, interpolate_strings));
            }
            serde_json::Value::Object(obj)
        }
        Value::Tagged(t) => yaml_to_json(&t.value, interpolate_strings),
    }
}

/// Render a scalar YAML value as a plain string (keys, names, type tags).
pub fn yaml_scalar_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Null => String::new(),
        other => serde_yaml_ng::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

// ============================================================================
// Environment interpolation
// ============================================================================

fn env_token() -> &'static Regex {
    static TOKEN: OnceLock<Regex> = OnceLock::new();
    TOKEN.get_or_init(|| {
        Regex::new(r"\$\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)")
            .expect("env token pattern is valid")
    })
}

/// True when a string should undergo interpolation.
pub fn is_interpolable(s: &str) -> bool {
    (s.starts_with('$') && s.len() > 1)
        || (s.contains("${") && s.matches('{').count() == s.matches('}').count())
}

/// Replace `$NAME` / `${NAME}` with environment values; `$${NAME}` escapes to `${NAME}`.
/// Missing variables become the empty string with a warning.
pub fn interpolate(s: &str) -> String {
    if !is_interpolable(s) {
        return s.to_string();
    }
    env_token()
        .replace_all(s, |caps: &regex::Captures| {
            if let Some(escaped) = caps.get(1) {
                return format!("${{{}}}", escaped.as_str());
            }
            let var = caps
                .get(2)
                .or_else(|| caps.get(3))
                .map(|m| m.as_str())
                .unwrap_or_default();
            match std::env::var(var) {
                Ok(v) => v,
                Err(_) => {
                    tracing::warn!("environment variable [{}] is not set; using empty string", var);
                    String::new()
                }
            }
        })
        .into_owned()
}

/// Strip `$`, `{` and `}` from a variable expression (`${FOO}` → `FOO`).
pub fn env_var_name(expr: &str) -> String {
    expr.replacen('$', "", 1).replace(['{', '}'], "")
}
