//! WD-001: Canonical entity graph.
//!
//! Composition produces a [`DeploymentApplication`]; overlay binding, reconciliation
//! and the executor consume it. Entities serialize in the platform's wire shape
//! (key/value arrays for parameters and annotations).

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Name of the virtual package whose entities live directly under the namespace.
pub const DEFAULT_PACKAGE: &str = "default";

/// Default namespace placeholder understood by the platform.
pub const DEFAULT_NAMESPACE: &str = "_";

// ============================================================================
// Parameters
// ============================================================================

/// Supported parameter types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    String,
    Integer,
    Float,
    Boolean,
    Json,
    Slice,
}

impl ParamType {
    pub const ALL: [ParamType; 6] = [
        ParamType::String,
        ParamType::Integer,
        ParamType::Float,
        ParamType::Boolean,
        ParamType::Json,
        ParamType::Slice,
    ];

    /// Look up a type by its declared name. Only canonical names are accepted.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.to_string() == name)
    }

    /// Zero value used when a parameter resolves without a value.
    pub fn zero_value(self) -> ParamValue {
        match self {
            ParamType::String => ParamValue::String(String::new()),
            ParamType::Integer => ParamValue::Integer(0),
            ParamType::Float => ParamValue::Float(0.0),
            ParamType::Boolean => ParamValue::Boolean(false),
            ParamType::Json => ParamValue::Json(serde_json::Value::Object(Default::default())),
            ParamType::Slice => ParamValue::Slice(Vec::new()),
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => write!(f, "string"),
            Self::Integer => write!(f, "integer"),
            Self::Float => write!(f, "float"),
            Self::Boolean => write!(f, "boolean"),
            Self::Json => write!(f, "json"),
            Self::Slice => write!(f, "slice"),
        }
    }
}

/// A resolved parameter value. The variant always agrees with the declared type.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Json(serde_json::Value),
    Slice(Vec<serde_json::Value>),
}

impl ParamValue {
    pub fn param_type(&self) -> ParamType {
        match self {
            Self::String(_) => ParamType::String,
            Self::Integer(_) => ParamType::Integer,
            Self::Float(_) => ParamType::Float,
            Self::Boolean(_) => ParamType::Boolean,
            Self::Json(_) => ParamType::Json,
            Self::Slice(_) => ParamType::Slice,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::Integer(i) => serde_json::Value::from(*i),
            Self::Float(x) => serde_json::Value::from(*x),
            Self::Boolean(b) => serde_json::Value::Bool(*b),
            Self::Json(v) => v.clone(),
            Self::Slice(items) => serde_json::Value::Array(items.clone()),
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == self.param_type().zero_value()
    }
}

/// How a parameter was declared in YAML.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclarationStyle {
    SingleLine,
    MultiLine,
}

/// A declared input after resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub value: ParamValue,
    pub required: bool,
    pub description: Option<String>,
    pub style: DeclarationStyle,
}

impl Parameter {
    pub fn param_type(&self) -> ParamType {
        self.value.param_type()
    }
}

/// Ordered parameter map keyed by name.
pub type Parameters = IndexMap<String, Parameter>;

/// Ordered annotation map keyed by name.
pub type Annotations = IndexMap<String, serde_json::Value>;

/// Wire key/value pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: serde_json::Value,
}

/// Convert parameters to the wire key/value array.
pub fn params_to_wire(params: &Parameters) -> Vec<KeyValue> {
    params
        .iter()
        .map(|(k, p)| KeyValue {
            key: k.clone(),
            value: p.value.to_json(),
        })
        .collect()
}

/// Convert annotations to the wire key/value array.
pub fn annotations_to_wire(annotations: &Annotations) -> Vec<KeyValue> {
    annotations
        .iter()
        .map(|(k, v)| KeyValue {
            key: k.clone(),
            value: v.clone(),
        })
        .collect()
}

// ============================================================================
// Entities
// ============================================================================

/// Entity kinds known to the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Package,
    Action,
    Trigger,
    Rule,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Package => write!(f, "package"),
            Self::Action => write!(f, "action"),
            Self::Trigger => write!(f, "trigger"),
            Self::Rule => write!(f, "rule"),
        }
    }
}

/// Package binding target (`/namespace/package`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    pub namespace: String,
    pub name: String,
}

/// Package record as deployed.
#[derive(Debug, Clone, Default)]
pub struct Package {
    pub name: String,
    pub namespace: String,
    pub version: String,
    pub license: String,
    pub publish: bool,
    pub parameters: Parameters,
    pub annotations: Annotations,
    pub binding: Option<Binding>,
}

/// Execution details of an action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Exec {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub binary: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<String>,
}

/// Action limits.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Limits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<u64>,
}

impl Limits {
    pub fn is_empty(&self) -> bool {
        self.timeout.is_none() && self.memory.is_none() && self.logs.is_none()
    }
}

/// An action or sequence owned by a package.
#[derive(Debug, Clone, Default)]
pub struct Action {
    pub name: String,
    pub version: String,
    pub publish: bool,
    pub exec: Exec,
    pub parameters: Parameters,
    pub annotations: Annotations,
    pub limits: Option<Limits>,
    /// Source file the code came from, used by the duplicate-merge policy.
    pub source_path: Option<PathBuf>,
}

impl Action {
    pub fn is_sequence(&self) -> bool {
        self.exec.kind == "sequence"
    }

    pub fn is_web(&self) -> bool {
        matches!(
            self.annotations.get("web-export"),
            Some(serde_json::Value::Bool(true))
        )
    }
}

/// Trigger record; the feed, if any, is mirrored in the `feed` annotation.
#[derive(Debug, Clone, Default)]
pub struct Trigger {
    pub name: String,
    pub namespace: String,
    pub feed: Option<String>,
    pub parameters: Parameters,
    pub annotations: Annotations,
}

/// Rule linking a trigger to an action.
#[derive(Debug, Clone)]
pub struct Rule {
    pub name: String,
    pub trigger: String,
    pub action: String,
    pub enabled: bool,
    pub annotations: Annotations,
}

/// External package dependency.
#[derive(Debug, Clone, Default)]
pub struct Dependency {
    pub name: String,
    pub location: String,
    pub version: String,
    pub is_binding: bool,
    pub base_repo: String,
    pub sub_folder: String,
    pub parameters: Parameters,
    pub annotations: Annotations,
    /// Local directory holding the fetched dependency.
    pub resolved_path: Option<PathBuf>,
}

/// API gateway route backed by an action.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRoute {
    pub api_name: String,
    pub base_path: String,
    pub rel_path: String,
    pub method: String,
    /// Package-qualified action name (`pkg/action`).
    pub action: String,
    pub response: String,
}

/// A package with everything it owns.
#[derive(Debug, Clone, Default)]
pub struct DeploymentPackage {
    pub package: Package,
    pub actions: IndexMap<String, Action>,
    pub sequences: IndexMap<String, Action>,
    pub triggers: IndexMap<String, Trigger>,
    pub rules: IndexMap<String, Rule>,
    pub dependencies: IndexMap<String, Dependency>,
    pub apis: Vec<ApiRoute>,
}

impl DeploymentPackage {
    pub fn new(package: Package) -> Self {
        Self {
            package,
            ..Default::default()
        }
    }

    pub fn is_default(&self) -> bool {
        self.package.name == DEFAULT_PACKAGE
    }

    /// Name prefix for entities owned by this package (`pkg/` or empty).
    pub fn entity_prefix(&self) -> String {
        if self.is_default() {
            String::new()
        } else {
            format!("{}/", self.package.name)
        }
    }
}

/// The canonical entity graph.
#[derive(Debug, Clone, Default)]
pub struct DeploymentApplication {
    pub project_name: Option<String>,
    pub namespace: String,
    pub packages: IndexMap<String, DeploymentPackage>,
}

impl DeploymentApplication {
    pub fn new(namespace: &str) -> Self {
        Self {
            project_name: None,
            namespace: namespace.to_string(),
            packages: IndexMap::new(),
        }
    }

    pub fn action_count(&self) -> usize {
        self.packages.values().map(|p| p.actions.len()).sum()
    }

    pub fn sequence_count(&self) -> usize {
        self.packages.values().map(|p| p.sequences.len()).sum()
    }

    pub fn trigger_count(&self) -> usize {
        self.packages.values().map(|p| p.triggers.len()).sum()
    }

    pub fn rule_count(&self) -> usize {
        self.packages.values().map(|p| p.rules.len()).sum()
    }
}

// ============================================================================
// Qualified names
// ============================================================================

/// Qualify a name against a namespace: leading `/` is kept, otherwise `/ns/name`.
pub fn qualify(name: &str, namespace: &str) -> String {
    if name.starts_with('/') {
        name.to_string()
    } else if namespace.starts_with('/') {
        format!("{}/{}", namespace, name)
    } else {
        format!("/{}/{}", namespace, name)
    }
}

/// Qualify an action reference relative to its owning package.
/// `name` without `/` gains the package prefix unless the package is `default`.
pub fn package_relative(name: &str, package: &str) -> String {
    if name.contains('/') || package == DEFAULT_PACKAGE {
        name.to_string()
    } else {
        format!("{}/{}", package, name)
    }
}

// ============================================================================
// Plans and results
// ============================================================================

/// What will happen to an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanAction {
    Create,
    Update,
    Destroy,
}

impl fmt::Display for PlanAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "CREATE"),
            Self::Update => write!(f, "UPDATE"),
            Self::Destroy => write!(f, "DESTROY"),
        }
    }
}

/// A single planned remote mutation.
#[derive(Debug, Clone)]
pub struct PlannedChange {
    pub kind: EntityKind,
    /// Label shown to the user (`sequence`, `api`, ... refine `kind`).
    pub label: String,
    pub name: String,
    pub action: PlanAction,
}

/// The complete plan shown before deployment.
#[derive(Debug, Clone, Default)]
pub struct ExecutionPlan {
    pub project: String,
    pub namespace: String,
    pub changes: Vec<PlannedChange>,
    pub to_create: u32,
    pub to_update: u32,
    pub to_destroy: u32,
}

/// A terminal per-entity failure recorded by the executor.
#[derive(Debug, Clone)]
pub struct EntityFailure {
    pub label: String,
    pub name: String,
    pub error: String,
}

/// Outcome of a deploy or undeploy run.
#[derive(Debug, Clone, Default)]
pub struct DeployReport {
    pub succeeded: u32,
    pub failures: Vec<EntityFailure>,
    pub deleted: u32,
    pub cancelled: bool,
}

impl DeployReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wd001_param_type_names() {
        for t in ParamType::ALL {
            assert_eq!(ParamType::from_name(&t.to_string()), Some(t));
        }
        assert_eq!(ParamType::from_name("int"), None);
        assert_eq!(ParamType::from_name("String"), None);
    }

    #[test]
    fn test_wd001_zero_values() {
        assert_eq!(ParamType::Integer.zero_value(), ParamValue::Integer(0));
        assert_eq!(ParamType::String.zero_value(), ParamValue::String(String::new()));
        assert!(ParamType::Json.zero_value().is_zero());
        assert!(!ParamValue::Boolean(true).is_zero());
    }

    #[test]
    fn test_wd001_qualify() {
        assert_eq!(qualify("t1", "ns"), "/ns/t1");
        assert_eq!(qualify("/other/t1", "ns"), "/other/t1");
        assert_eq!(qualify("t1", "/ns"), "/ns/t1");
    }

    #[test]
    fn test_wd001_package_relative() {
        assert_eq!(package_relative("hello", "pkg"), "pkg/hello");
        assert_eq!(package_relative("other/hello", "pkg"), "other/hello");
        assert_eq!(package_relative("hello", DEFAULT_PACKAGE), "hello");
    }

    #[test]
    fn test_wd001_wire_conversion() {
        let mut params = Parameters::new();
        params.insert(
            "n".to_string(),
            Parameter {
                value: ParamValue::Integer(3),
                required: false,
                description: None,
                style: DeclarationStyle::SingleLine,
            },
        );
        let wire = params_to_wire(&params);
        assert_eq!(wire.len(), 1);
        assert_eq!(wire[0].value, serde_json::json!(3));
        let json = serde_json::to_string(&wire[0]).unwrap();
        assert_eq!(json, r#"{"key":"n","value":3}"#);
    }

    #[test]
    fn test_wd001_plan_action_display() {
        assert_eq!(PlanAction::Create.to_string(), "CREATE");
        assert_eq!(PlanAction::Destroy.to_string(), "DESTROY");
    }
}
