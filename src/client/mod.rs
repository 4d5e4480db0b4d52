//! WD-011: Platform client abstraction with HTTP and in-memory implementations.

pub mod http;
pub mod memory;

use crate::core::types::*;
use thiserror::Error;

/// A failed remote call. `status` is absent for transport failures.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}{}", .status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default())]
pub struct ClientError {
    pub status: Option<u16>,
    pub message: String,
}

impl ClientError {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(what: &str) -> Self {
        Self::new(Some(404), format!("{} not found", what))
    }

    /// Concurrent modification, gateway errors and transport failures.
    pub fn is_transient(&self) -> bool {
        match self.status {
            None => true,
            Some(code) => matches!(code, 409 | 502 | 503 | 504),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status == Some(404)
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

/// An entity as the platform reports it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RemoteEntity {
    pub kind: Option<EntityKind>,
    /// `ns` for namespace-level entities, `ns/pkg` for package members.
    pub namespace: String,
    pub name: String,
    pub publish: bool,
    pub annotations: Annotations,
    pub parameters: Vec<KeyValue>,
    pub exec: Option<Exec>,
    pub binding: Option<Binding>,
    /// Rules only: qualified trigger and action names.
    pub trigger: Option<String>,
    pub action: Option<String>,
}

impl RemoteEntity {
    pub fn new(kind: EntityKind, namespace: &str, name: &str) -> Self {
        Self {
            kind: Some(kind),
            namespace: namespace.to_string(),
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// Owning package, if the entity lives in one.
    pub fn package(&self) -> Option<&str> {
        self.namespace.split_once('/').map(|(_, pkg)| pkg)
    }

    /// Name relative to the namespace (`pkg/name` or `name`).
    pub fn relative_name(&self) -> String {
        match self.package() {
            Some(pkg) => format!("{}/{}", pkg, self.name),
            None => self.name.clone(),
        }
    }

    pub fn qualified_name(&self) -> String {
        format!("/{}/{}", self.namespace, self.name)
    }

    /// Kind shown in reports: `sequence` and `binding` refine the entity kind.
    pub fn kind_label(&self) -> String {
        if self.exec.as_ref().is_some_and(|e| e.kind == "sequence") {
            return "sequence".to_string();
        }
        if self.binding.is_some() {
            return "binding".to_string();
        }
        self.kind.map(|k| k.to_string()).unwrap_or_default()
    }
}

/// Operations the deployer needs from the platform.
///
/// Entity names passed to `delete` and `get_action` are namespace-relative
/// (`pkg/action` or `action`). Puts overwrite.
pub trait WhiskClient: Send + Sync {
    /// Namespace the client operates in.
    fn namespace(&self) -> &str;

    /// List entities of a kind; `package` narrows actions to one package.
    fn list(&self, kind: EntityKind, package: Option<&str>) -> ClientResult<Vec<RemoteEntity>>;

    fn put_package(&self, package: &Package) -> ClientResult<()>;

    /// Create or update an action (or sequence) inside `package`, or at namespace level.
    fn put_action(&self, package: Option<&str>, action: &Action) -> ClientResult<()>;

    fn put_trigger(&self, trigger: &Trigger) -> ClientResult<()>;

    /// Create or update a rule whose trigger and action are already qualified.
    fn put_rule(&self, rule: &Rule) -> ClientResult<()>;

    fn set_rule_state(&self, name: &str, active: bool) -> ClientResult<()>;

    fn delete(&self, kind: EntityKind, name: &str) -> ClientResult<()>;

    /// Invoke a feed action (`/ns/pkg/feed`) with lifecycle parameters.
    fn invoke_feed(&self, feed: &str, params: &serde_json::Value) -> ClientResult<()>;

    /// Fetch an action including its code.
    fn get_action(&self, name: &str) -> ClientResult<RemoteEntity>;

    fn put_api(&self, route: &ApiRoute) -> ClientResult<()>;

    fn delete_api(&self, route: &ApiRoute) -> ClientResult<()>;
}
