//! WD-004: Runtime catalog of supported kinds, defaults and file extensions.
//!
//! Built once per run from the bundled table or from the API host's
//! runtime manifest, then passed to composition explicitly.

use indexmap::IndexMap;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Bundled runtime table, used when the API host cannot be queried.
const BUNDLED_RUNTIMES: &str = r#"{
  "runtimes": {
    "nodejs": [
      {"kind": "nodejs:6", "default": false, "deprecated": true},
      {"kind": "nodejs:10", "default": false},
      {"kind": "nodejs:12", "default": false},
      {"kind": "nodejs:14", "default": true}
    ],
    "python": [
      {"kind": "python:2", "default": false, "deprecated": true},
      {"kind": "python:3", "default": true}
    ],
    "swift": [
      {"kind": "swift:4.2", "default": false},
      {"kind": "swift:5.1", "default": true}
    ],
    "java": [
      {"kind": "java:8", "default": true, "requireMain": true}
    ],
    "php": [
      {"kind": "php:7.3", "default": false},
      {"kind": "php:7.4", "default": true}
    ],
    "ruby": [
      {"kind": "ruby:2.5", "default": true}
    ],
    "go": [
      {"kind": "go:1.15", "default": true}
    ],
    "dotnet": [
      {"kind": "dotnet:3.1", "default": true, "requireMain": true}
    ]
  }
}"#;

/// File extension to runtime family.
const EXTENSION_FAMILIES: [(&str, &str); 8] = [
    ("js", "nodejs"),
    ("py", "python"),
    ("swift", "swift"),
    ("java", "java"),
    ("jar", "java"),
    ("php", "php"),
    ("rb", "ruby"),
    ("go", "go"),
];

#[derive(Debug, Clone, Deserialize)]
struct RuntimeEntry {
    kind: String,
    #[serde(default)]
    default: bool,
    #[serde(default)]
    deprecated: bool,
    #[serde(rename = "requireMain", default)]
    require_main: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct RuntimeTable {
    runtimes: IndexMap<String, Vec<RuntimeEntry>>,
}

/// Supported runtime kinds grouped by family.
#[derive(Debug, Clone)]
pub struct RuntimeCatalog {
    families: IndexMap<String, Vec<RuntimeEntry>>,
    extensions: HashMap<String, String>,
}

impl RuntimeCatalog {
    /// Catalog built from the bundled table.
    pub fn bundled() -> Self {
        Self::from_json(BUNDLED_RUNTIMES).unwrap_or_else(|_| Self {
            families: IndexMap::new(),
            extensions: HashMap::new(),
        })
    }

    /// Parse a runtime table (`{"runtimes": {family: [{kind, default, deprecated}]}}`).
    pub fn from_json(json: &str) -> Result<Self, String> {
        let table: RuntimeTable =
            serde_json::from_str(json).map_err(|e| format!("invalid runtime table: {}", e))?;
        let extensions = EXTENSION_FAMILIES
            .iter()
            .filter(|(_, family)| table.runtimes.contains_key(*family))
            .map(|(ext, family)| (ext.to_string(), family.to_string()))
            .collect();
        Ok(Self {
            families: table.runtimes,
            extensions,
        })
    }

    /// Query `https://<api_host>` for its runtime table, falling back to the bundled one.
    /// Certificate checks are skipped only when `insecure` is set.
    pub fn load(api_host: Option<&str>, insecure: bool) -> Self {
        let Some(host) = api_host.filter(|h| !h.is_empty()) else {
            return Self::bundled();
        };
        let url = if host.starts_with("http") {
            host.to_string()
        } else {
            format!("https://{}", host)
        };
        let fetched = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(10))
            .danger_accept_invalid_certs(insecure)
            .build()
            .and_then(|c| c.get(&url).send())
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.text());
        match fetched.map_err(|e| e.to_string()).and_then(|body| Self::from_json(&body)) {
            Ok(catalog) => {
                tracing::debug!("runtime table loaded from {}", url);
                catalog
            }
            Err(e) => {
                tracing::info!("using bundled runtime table ({})", e);
                Self::bundled()
            }
        }
    }

    /// Family serving a file extension (without the dot).
    pub fn family_for_extension(&self, ext: &str) -> Option<&str> {
        self.extensions.get(ext).map(String::as_str)
    }

    /// Default kind for a file extension, e.g. `js` → `nodejs:14`.
    pub fn kind_for_extension(&self, ext: &str) -> Option<String> {
        let family = self.family_for_extension(ext)?;
        self.default_kind(family)
    }

    /// Default (non-deprecated) kind of a family.
    pub fn default_kind(&self, family: &str) -> Option<String> {
        let entries = self.families.get(family)?;
        entries
            .iter()
            .find(|e| e.default && !e.deprecated)
            .or_else(|| entries.iter().find(|e| !e.deprecated))
            .map(|e| e.kind.clone())
    }

    /// True when `kind` is a supported, non-deprecated runtime (`family:default` is accepted).
    pub fn is_supported(&self, kind: &str) -> bool {
        if let Some(family) = kind.strip_suffix(":default") {
            return self.families.contains_key(family);
        }
        self.families
            .values()
            .flatten()
            .any(|e| e.kind == kind && !e.deprecated)
    }

    /// Resolve `family:default` to the concrete default kind.
    pub fn canonical_kind(&self, kind: &str) -> String {
        kind.strip_suffix(":default")
            .and_then(|family| self.default_kind(family))
            .unwrap_or_else(|| kind.to_string())
    }

    /// Whether the runtime needs an explicit `main` entry point.
    pub fn requires_main(&self, kind: &str) -> bool {
        self.families
            .values()
            .flatten()
            .any(|e| e.kind == kind && e.require_main)
    }

    /// True when a source extension is compatible with an explicit runtime kind.
    pub fn extension_matches(&self, ext: &str, kind: &str) -> bool {
        match self.family_for_extension(ext) {
            Some(family) => kind.split(':').next() == Some(family),
            None => true,
        }
    }

    /// Source file extension used when exporting code of a kind.
    pub fn extension_for_kind(&self, kind: &str) -> &'static str {
        let family = kind.split(':').next().unwrap_or(kind);
        EXTENSION_FAMILIES
            .iter()
            .find(|(ext, f)| *f == family && *ext != "jar")
            .map(|(ext, _)| *ext)
            .unwrap_or("txt")
    }

    /// Extensions recognized as action sources.
    pub fn source_extensions(&self) -> Vec<&str> {
        let mut exts: Vec<&str> = self
            .extensions
            .keys()
            .map(String::as_str)
            .filter(|e| *e != "jar")
            .collect();
        exts.sort_unstable();
        exts
    }
}

impl Default for RuntimeCatalog {
    fn default() -> Self {
        Self::bundled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wd004_extension_defaults() {
        let c = RuntimeCatalog::bundled();
        assert_eq!(c.kind_for_extension("js").as_deref(), Some("nodejs:14"));
        assert_eq!(c.kind_for_extension("py").as_deref(), Some("python:3"));
        assert_eq!(c.kind_for_extension("jar").as_deref(), Some("java:8"));
        assert_eq!(c.kind_for_extension("zip"), None);
    }

    #[test]
    fn test_wd004_supported_kinds() {
        let c = RuntimeCatalog::bundled();
        assert!(c.is_supported("nodejs:12"));
        assert!(c.is_supported("nodejs:default"));
        assert!(!c.is_supported("nodejs:6"));
        assert!(!c.is_supported("cobol:1"));
        assert_eq!(c.canonical_kind("python:default"), "python:3");
        assert_eq!(c.canonical_kind("python:3"), "python:3");
    }

    #[test]
    fn test_wd004_requires_main() {
        let c = RuntimeCatalog::bundled();
        assert!(c.requires_main("java:8"));
        assert!(!c.requires_main("nodejs:14"));
    }

    #[test]
    fn test_wd004_extension_matches() {
        let c = RuntimeCatalog::bundled();
        assert!(c.extension_matches("js", "nodejs:10"));
        assert!(!c.extension_matches("js", "python:3"));
        assert!(c.extension_matches("zip", "python:3"));
        assert_eq!(c.extension_for_kind("python:3"), "py");
        assert_eq!(c.extension_for_kind("java:8"), "java");
    }

    #[test]
    fn test_wd004_custom_table() {
        let c = RuntimeCatalog::from_json(
            r#"{"runtimes": {"nodejs": [{"kind": "nodejs:20", "default": true}]}}"#,
        )
        .unwrap();
        assert_eq!(c.kind_for_extension("js").as_deref(), Some("nodejs:20"));
        assert_eq!(c.family_for_extension("py"), None);
        assert_eq!(c.source_extensions(), vec!["js"]);
        assert!(RuntimeCatalog::from_json("{not json").is_err());
    }

    #[test]
    fn test_wd004_load_without_host_is_bundled() {
        let c = RuntimeCatalog::load(None, false);
        assert!(c.is_supported("swift:5.1"));
    }

    #[test]
    fn test_wd004_load_unreachable_host_falls_back() {
        for insecure in [false, true] {
            let c = RuntimeCatalog::load(Some("http://127.0.0.1:1"), insecure);
            assert!(c.is_supported("nodejs:default"));
        }
    }
}
