//! WD-017: Report of what is deployed in the namespace.
//!
//! The four entity listings are independent, so they run concurrently on
//! blocking worker threads.

use super::{client_config, ClientArgs};
use crate::client::{ClientResult, RemoteEntity, WhiskClient};
use crate::core::types::EntityKind;
use std::sync::Arc;

const REPORT_KINDS: [EntityKind; 4] = [
    EntityKind::Package,
    EntityKind::Action,
    EntityKind::Trigger,
    EntityKind::Rule,
];

pub(crate) fn cmd_report(args: &ClientArgs) -> Result<(), String> {
    let cfg = client_config(args)?;
    let client: Arc<dyn WhiskClient> = Arc::new(args.connect(&cfg)?);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("cannot start runtime: {}", e))?;
    let sections = runtime.block_on(collect(client))?;

    println!("Namespace: {}", cfg.namespace.value);
    for (kind, entities) in REPORT_KINDS.iter().zip(&sections) {
        println!();
        println!("{}s ({})", kind, entities.len());
        for line in format_section(entities) {
            println!("  {}", line);
        }
    }
    Ok(())
}

/// List every reported kind concurrently, in [`REPORT_KINDS`] order.
pub async fn collect(client: Arc<dyn WhiskClient>) -> Result<Vec<Vec<RemoteEntity>>, String> {
    let spawn = |kind: EntityKind| {
        let client = Arc::clone(&client);
        tokio::task::spawn_blocking(move || list_kind(client.as_ref(), kind))
    };
    let (packages, actions, triggers, rules) = tokio::join!(
        spawn(EntityKind::Package),
        spawn(EntityKind::Action),
        spawn(EntityKind::Trigger),
        spawn(EntityKind::Rule)
    );

    let mut sections = Vec::with_capacity(REPORT_KINDS.len());
    for (kind, joined) in REPORT_KINDS.iter().zip([packages, actions, triggers, rules]) {
        let listed = joined.map_err(|e| format!("{} listing task failed: {}", kind, e))?;
        let mut entities = listed.map_err(|e| format!("cannot list {}s: {}", kind, e))?;
        entities.sort_by_key(|e| e.qualified_name());
        sections.push(entities);
    }
    Ok(sections)
}

/// Actions include package members, which a namespace listing omits.
fn list_kind(client: &dyn WhiskClient, kind: EntityKind) -> ClientResult<Vec<RemoteEntity>> {
    if kind != EntityKind::Action {
        return client.list(kind, None);
    }
    let mut actions = client.list(EntityKind::Action, None)?;
    for pkg in client.list(EntityKind::Package, None)? {
        if pkg.binding.is_some() {
            continue;
        }
        for action in client.list(EntityKind::Action, Some(&pkg.name))? {
            if !actions.iter().any(|a| a.qualified_name() == action.qualified_name()) {
                actions.push(action);
            }
        }
    }
    Ok(actions)
}

/// `/ns/name  private|shared [kind]` per entity.
pub fn format_section(entities: &[RemoteEntity]) -> Vec<String> {
    let width = entities
        .iter()
        .map(|e| e.qualified_name().len())
        .max()
        .unwrap_or(0);
    entities
        .iter()
        .map(|e| {
            let visibility = if e.publish { "shared" } else { "private" };
            format!(
                "{:<width$}  {:<7} {}",
                e.qualified_name(),
                visibility,
                e.kind_label(),
                width = width
            )
        })
        .collect()
}
