//! WD-006: Web action annotations.

use super::error::{Error, Result};
use super::params;
use super::types::Annotations;
use serde_json::Value as Json;

pub const WEB_EXPORT: &str = "web-export";
pub const FINAL: &str = "final";
pub const RAW_HTTP: &str = "raw-http";
pub const REQUIRE_WHISK_AUTH: &str = "require-whisk-auth";

/// Accepted `web-export` modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebMode {
    Enabled,
    Raw,
    Disabled,
}

impl WebMode {
    /// Parse a declared mode (`true`/`yes`, `raw`, `false`/`no`), case-insensitive.
    pub fn parse(value: &serde_yaml_ng::Value) -> Option<Self> {
        let text = params::yaml_scalar_string(value).to_lowercase();
        match text.as_str() {
            "true" | "yes" => Some(WebMode::Enabled),
            "raw" => Some(WebMode::Raw),
            "false" | "no" => Some(WebMode::Disabled),
            _ => None,
        }
    }
}

/// Apply a declared `web-export` value to an action's annotations.
pub fn apply(
    annotations: &mut Annotations,
    value: &serde_yaml_ng::Value,
    action: &str,
    file: &str,
) -> Result<()> {
    let mode = WebMode::parse(value).ok_or_else(|| {
        Error::validation(
            file,
            format!(
                "action [{}] has invalid web-export value [{}]; expected true, yes, raw, false or no",
                action,
                params::yaml_scalar_string(value)
            ),
        )
    })?;
    set_mode(annotations, mode);
    Ok(())
}

/// Set the annotations for a mode. `require-whisk-auth` is left untouched.
pub fn set_mode(annotations: &mut Annotations, mode: WebMode) {
    match mode {
        WebMode::Enabled | WebMode::Raw => {
            annotations.insert(WEB_EXPORT.to_string(), Json::Bool(true));
            annotations.insert(FINAL.to_string(), Json::Bool(true));
            annotations.insert(RAW_HTTP.to_string(), Json::Bool(mode == WebMode::Raw));
        }
        WebMode::Disabled => {
            annotations.shift_remove(WEB_EXPORT);
            annotations.shift_remove(FINAL);
            annotations.shift_remove(RAW_HTTP);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_yaml_ng::Value;

    #[test]
    fn test_wd006_enable() {
        let mut ann = Annotations::new();
        apply(&mut ann, &Value::Bool(true), "a", "m.yaml").unwrap();
        assert_eq!(ann[WEB_EXPORT], Json::Bool(true));
        assert_eq!(ann[FINAL], Json::Bool(true));
        assert_eq!(ann[RAW_HTTP], Json::Bool(false));
    }

    #[test]
    fn test_wd006_yes_and_raw() {
        let mut ann = Annotations::new();
        apply(&mut ann, &Value::String("Yes".into()), "a", "m.yaml").unwrap();
        assert_eq!(ann[RAW_HTTP], Json::Bool(false));
        apply(&mut ann, &Value::String("raw".into()), "a", "m.yaml").unwrap();
        assert_eq!(ann[RAW_HTTP], Json::Bool(true));
    }

    #[test]
    fn test_wd006_disable_keeps_auth() {
        let mut ann = Annotations::new();
        ann.insert(REQUIRE_WHISK_AUTH.into(), Json::Bool(true));
        set_mode(&mut ann, WebMode::Enabled);
        apply(&mut ann, &Value::String("no".into()), "a", "m.yaml").unwrap();
        assert!(!ann.contains_key(WEB_EXPORT));
        assert!(!ann.contains_key(FINAL));
        assert_eq!(ann[REQUIRE_WHISK_AUTH], Json::Bool(true));
    }

    #[test]
    fn test_wd006_invalid_mode() {
        let mut ann = Annotations::new();
        let err = apply(&mut ann, &Value::String("sometimes".into()), "a", "m.yaml").unwrap_err();
        assert!(err.to_string().contains("sometimes"));
        assert!(ann.is_empty());
    }
}
