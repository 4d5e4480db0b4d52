//! WD-015: Reconciliation of remote entities owned by a project against the desired graph.
//!
//! Remote state is the only record of what a project deployed. Entities carrying
//! the project's `whisk-managed` marker that the new graph no longer declares are
//! scheduled for deletion, rules first and packages last.

use super::managed::ManagedAnnotation;
use crate::client::{RemoteEntity, WhiskClient};
use crate::core::error::{Error, Result};
use crate::core::types::*;
use std::collections::{BTreeMap, BTreeSet};

/// Order in which obsolete entities are removed.
pub const DELETE_ORDER: [EntityKind; 4] = [
    EntityKind::Rule,
    EntityKind::Trigger,
    EntityKind::Action,
    EntityKind::Package,
];

/// A remote entity scheduled for removal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteOp {
    pub kind: EntityKind,
    /// Namespace-relative name (`pkg/action` or `name`).
    pub name: String,
    /// Display label (`sequence`, `binding`, ... refine `kind`).
    pub label: String,
    /// Feed action to notify before a trigger is deleted.
    pub feed: Option<String>,
}

/// Key identifying an entity within a namespace.
type EntityKey = (EntityKind, String);

/// Every remote entity visible to the client, deduplicated by kind and name.
///
/// Actions are listed at namespace level and again per package. Listing
/// failures are returned unchanged.
pub fn list_remote(client: &dyn WhiskClient) -> Result<Vec<RemoteEntity>> {
    let mut seen: BTreeMap<EntityKey, RemoteEntity> = BTreeMap::new();
    let packages = client.list(EntityKind::Package, None)?;
    let mut batches = vec![client.list(EntityKind::Action, None)?];
    for pkg in packages.iter().filter(|p| p.binding.is_none()) {
        batches.push(client.list(EntityKind::Action, Some(&pkg.name))?);
    }
    batches.push(client.list(EntityKind::Trigger, None)?);
    batches.push(client.list(EntityKind::Rule, None)?);
    for entity in packages.into_iter().chain(batches.into_iter().flatten()) {
        let Some(kind) = entity.kind else { continue };
        seen.entry((kind, entity.relative_name())).or_insert(entity);
    }
    Ok(seen.into_values().collect())
}

/// Remote entities whose ownership marker names `project`.
pub fn managed_remote(client: &dyn WhiskClient, project: &str) -> Result<Vec<RemoteEntity>> {
    let all = list_remote(client)?;
    let owned: Vec<RemoteEntity> = all
        .into_iter()
        .filter(|e| ManagedAnnotation::belongs_to(&e.annotations, project))
        .collect();
    tracing::info!("project [{}] owns {} remote entities", project, owned.len());
    Ok(owned)
}

/// Namespace-relative names the graph will deploy.
pub fn desired_keys(app: &DeploymentApplication) -> BTreeSet<EntityKey> {
    let mut keys = BTreeSet::new();
    for pkg in app.packages.values() {
        let prefix = pkg.entity_prefix();
        if !pkg.is_default() {
            keys.insert((EntityKind::Package, pkg.package.name.clone()));
        }
        for name in pkg.actions.keys().chain(pkg.sequences.keys()) {
            keys.insert((EntityKind::Action, format!("{}{}", prefix, name)));
        }
        for name in pkg.triggers.keys() {
            keys.insert((EntityKind::Trigger, name.clone()));
        }
        for name in pkg.rules.keys() {
            keys.insert((EntityKind::Rule, name.clone()));
        }
    }
    keys
}

/// `Remote − Desired`, in deletion order.
pub fn compute_deletes(remote: &[RemoteEntity], app: &DeploymentApplication) -> Vec<DeleteOp> {
    let desired = desired_keys(app);
    let mut ops: Vec<DeleteOp> = remote
        .iter()
        .filter_map(|e| {
            let kind = e.kind?;
            let name = e.relative_name();
            if desired.contains(&(kind, name.clone())) {
                return None;
            }
            Some(delete_op(e, kind, name))
        })
        .collect();
    ops.sort_by_key(|op| DELETE_ORDER.iter().position(|k| *k == op.kind));
    ops
}

/// Every remote entity owned by `project`, in deletion order.
pub fn project_deletes(client: &dyn WhiskClient, project: &str) -> Result<Vec<DeleteOp>> {
    let owned = managed_remote(client, project)?;
    Ok(compute_deletes(&owned, &DeploymentApplication::default()))
}

/// Deletes needed to bring the remote project in line with `app`.
pub fn reconcile(client: &dyn WhiskClient, app: &DeploymentApplication) -> Result<Vec<DeleteOp>> {
    let project = app
        .project_name
        .as_deref()
        .ok_or_else(|| Error::validation("", "managed deployment requires a project name"))?;
    let owned = managed_remote(client, project)?;
    let ops = compute_deletes(&owned, app);
    for op in &ops {
        tracing::info!("{} [{}] is no longer declared by project [{}]", op.label, op.name, project);
    }
    Ok(ops)
}

fn delete_op(entity: &RemoteEntity, kind: EntityKind, name: String) -> DeleteOp {
    let feed = match kind {
        EntityKind::Trigger => entity
            .annotations
            .get("feed")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string),
        _ => None,
    };
    DeleteOp {
        kind,
        name,
        label: entity.kind_label(),
        feed,
    }
}
