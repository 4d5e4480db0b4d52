//! WD-002: YAML schema for manifest and deployment documents.
//!
//! All structures deny unknown keys. Parameter declarations stay raw
//! (`serde_yaml_ng::Value`) until the resolver classifies them.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Raw parameter declarations keyed by name.
pub type RawInputs = IndexMap<String, serde_yaml_ng::Value>;

/// Raw annotations keyed by name.
pub type RawAnnotations = IndexMap<String, serde_yaml_ng::Value>;

// ============================================================================
// Manifest
// ============================================================================

/// Root of manifest.yaml.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManifestYaml {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<ProjectYaml>,

    /// Legacy single-package shape.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<PackageYaml>,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub packages: IndexMap<String, PackageYaml>,
}

/// `project:` block.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectYaml {
    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub credential: String,

    #[serde(rename = "apiHost", alias = "baseUrl", default, skip_serializing_if = "String::is_empty")]
    pub api_host: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,

    /// Project-level inputs, also used to resolve package name expressions.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub inputs: RawInputs,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub packages: IndexMap<String, PackageYaml>,
}

/// A package declaration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackageYaml {
    /// Only used by the legacy `package:` shape.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub license: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub credential: String,

    #[serde(rename = "apiHost", alias = "baseUrl", default, skip_serializing_if = "String::is_empty")]
    pub api_host: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public: Option<bool>,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub dependencies: IndexMap<String, DependencyYaml>,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub actions: IndexMap<String, ActionYaml>,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub sequences: IndexMap<String, SequenceYaml>,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub triggers: IndexMap<String, TriggerYaml>,

    /// Accepted for compatibility; feeds are deployed as actions elsewhere.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub feeds: IndexMap<String, serde_yaml_ng::Value>,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub rules: IndexMap<String, RuleYaml>,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub apis: IndexMap<String, ApiYaml>,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub inputs: RawInputs,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub annotations: RawAnnotations,
}

/// An action declaration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActionYaml {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,

    /// Deprecated alias of `function`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub location: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub function: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub code: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub runtime: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub main: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub docker: String,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub native: bool,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub conductor: bool,

    #[serde(rename = "web-export", default, skip_serializing_if = "Option::is_none")]
    pub web_export: Option<serde_yaml_ng::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web: Option<serde_yaml_ng::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<LimitsYaml>,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub inputs: RawInputs,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub outputs: RawInputs,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub annotations: RawAnnotations,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<Vec<String>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
}

impl ActionYaml {
    /// `function`, falling back to the deprecated `location`.
    pub fn source(&self) -> Option<&str> {
        if !self.function.is_empty() {
            Some(&self.function)
        } else if !self.location.is_empty() {
            Some(&self.location)
        } else {
            None
        }
    }

    /// `web-export`, falling back to `web`.
    pub fn web_mode(&self) -> Option<&serde_yaml_ng::Value> {
        self.web_export.as_ref().or(self.web.as_ref())
    }
}

/// Action limits as declared.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LimitsYaml {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    #[serde(rename = "memorySize", default, skip_serializing_if = "Option::is_none")]
    pub memory_size: Option<u64>,

    #[serde(rename = "logSize", default, skip_serializing_if = "Option::is_none")]
    pub log_size: Option<u64>,

    #[serde(rename = "concurrentActivations", default, skip_serializing_if = "Option::is_none")]
    pub concurrent_activations: Option<u64>,

    #[serde(rename = "userInvocationRate", default, skip_serializing_if = "Option::is_none")]
    pub user_invocation_rate: Option<u64>,

    #[serde(rename = "codeSize", default, skip_serializing_if = "Option::is_none")]
    pub code_size: Option<u64>,

    #[serde(rename = "parameterSize", default, skip_serializing_if = "Option::is_none")]
    pub parameter_size: Option<u64>,
}

/// A sequence declaration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SequenceYaml {
    /// Comma-delimited component list.
    pub actions: String,

    #[serde(rename = "web-export", alias = "web", default, skip_serializing_if = "Option::is_none")]
    pub web_export: Option<serde_yaml_ng::Value>,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub annotations: RawAnnotations,
}

/// A trigger declaration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TriggerYaml {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub feed: String,

    /// Deprecated alias of `feed`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub inputs: RawInputs,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub annotations: RawAnnotations,
}

/// A rule declaration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleYaml {
    pub trigger: String,

    pub action: String,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub annotations: RawAnnotations,
}

/// A dependency declaration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DependencyYaml {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,

    pub location: String,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub inputs: RawInputs,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub annotations: RawAnnotations,
}

/// `basePath → relPath → action → route`.
pub type ApiYaml = IndexMap<String, IndexMap<String, IndexMap<String, ApiRouteYaml>>>;

/// A single API route.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApiRouteYaml {
    pub method: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub response: String,
}

// ============================================================================
// Deployment
// ============================================================================

/// Root of deployment.yaml.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeploymentYaml {
    #[serde(alias = "application", default, skip_serializing_if = "Option::is_none")]
    pub project: Option<DeploymentProjectYaml>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<DeploymentPackageYaml>,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub packages: IndexMap<String, DeploymentPackageYaml>,
}

/// `project:` / `application:` block of a deployment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeploymentProjectYaml {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub credential: String,

    #[serde(rename = "apiHost", alias = "baseUrl", default, skip_serializing_if = "String::is_empty")]
    pub api_host: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub packages: IndexMap<String, DeploymentPackageYaml>,
}

/// Per-package overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeploymentPackageYaml {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub credential: String,

    #[serde(rename = "apiHost", alias = "baseUrl", default, skip_serializing_if = "String::is_empty")]
    pub api_host: String,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub inputs: RawInputs,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub annotations: RawAnnotations,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub actions: IndexMap<String, DeploymentEntityYaml>,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub triggers: IndexMap<String, DeploymentEntityYaml>,
}

/// Inputs/annotations override for one action or trigger.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeploymentEntityYaml {
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub inputs: RawInputs,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub annotations: RawAnnotations,
}
