//! WD-016: Plan generation from the desired graph and remote names.

use super::types::*;
use crate::tripwire::drift::DeleteOp;
use std::collections::BTreeSet;
use std::io::Write;

/// Build the plan shown before deployment.
///
/// `existing` holds namespace-relative names already present remotely; entities
/// found there are updates, everything else is a create.
pub fn plan(
    app: &DeploymentApplication,
    existing: &BTreeSet<(EntityKind, String)>,
    deletes: &[DeleteOp],
) -> ExecutionPlan {
    let mut changes = Vec::new();
    let mut to_create = 0u32;
    let mut to_update = 0u32;
    let mut to_destroy = 0u32;

    let mut push = |kind: EntityKind, label: &str, name: String| {
        let action = determine_action(kind, &name, existing);
        match action {
            PlanAction::Create => to_create += 1,
            PlanAction::Update => to_update += 1,
            PlanAction::Destroy => to_destroy += 1,
        }
        changes.push(PlannedChange {
            kind,
            label: label.to_string(),
            name,
            action,
        });
    };

    for pkg in app.packages.values() {
        if pkg.is_default() {
            continue;
        }
        let label = if pkg.package.binding.is_some() { "binding" } else { "package" };
        push(EntityKind::Package, label, pkg.package.name.clone());
    }
    for pkg in app.packages.values() {
        let prefix = pkg.entity_prefix();
        for name in pkg.actions.keys() {
            push(EntityKind::Action, "action", format!("{}{}", prefix, name));
        }
    }
    for pkg in app.packages.values() {
        let prefix = pkg.entity_prefix();
        for name in pkg.sequences.keys() {
            push(EntityKind::Action, "sequence", format!("{}{}", prefix, name));
        }
    }
    for pkg in app.packages.values() {
        for name in pkg.triggers.keys() {
            push(EntityKind::Trigger, "trigger", name.clone());
        }
    }
    for pkg in app.packages.values() {
        for name in pkg.rules.keys() {
            push(EntityKind::Rule, "rule", name.clone());
        }
    }

    for op in deletes {
        to_destroy += 1;
        changes.push(PlannedChange {
            kind: op.kind,
            label: op.label.clone(),
            name: op.name.clone(),
            action: PlanAction::Destroy,
        });
    }

    // APIs are counted as creates; the gateway overwrites by path and verb.
    for pkg in app.packages.values() {
        for api in &pkg.apis {
            to_create += 1;
            changes.push(PlannedChange {
                kind: EntityKind::Action,
                label: "api".to_string(),
                name: format!("{}{} {}", api.base_path, api.rel_path, api.method),
                action: PlanAction::Create,
            });
        }
    }

    ExecutionPlan {
        project: app.project_name.clone().unwrap_or_default(),
        namespace: app.namespace.clone(),
        changes,
        to_create,
        to_update,
        to_destroy,
    }
}

fn determine_action(kind: EntityKind, name: &str, existing: &BTreeSet<(EntityKind, String)>) -> PlanAction {
    if existing.contains(&(kind, name.to_string())) {
        PlanAction::Update
    } else {
        PlanAction::Create
    }
}

/// Render a plan the way the CLI prints it.
pub fn write_plan(out: &mut dyn Write, plan: &ExecutionPlan) -> std::io::Result<()> {
    let project = if plan.project.is_empty() { "(unnamed)" } else { &plan.project };
    writeln!(
        out,
        "Planning: {} in namespace {} ({} entities)",
        project,
        plan.namespace,
        plan.changes.len()
    )?;
    writeln!(out)?;
    for change in &plan.changes {
        let symbol = match change.action {
            PlanAction::Create => "+",
            PlanAction::Update => "~",
            PlanAction::Destroy => "-",
        };
        writeln!(out, "  {} {} {}", symbol, change.label, change.name)?;
    }
    writeln!(out)?;
    writeln!(
        out,
        "Plan: {} to add, {} to change, {} to destroy.",
        plan.to_create, plan.to_update, plan.to_destroy
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app() -> DeploymentApplication {
        let mut app = DeploymentApplication::new("guest");
        app.project_name = Some("demo".into());
        let mut pkg = DeploymentPackage::new(Package {
            name: "p".into(),
            ..Default::default()
        });
        pkg.actions.insert(
            "a".into(),
            Action {
                name: "a".into(),
                ..Default::default()
            },
        );
        pkg.sequences.insert(
            "s".into(),
            Action {
                name: "s".into(),
                exec: Exec {
                    kind: "sequence".into(),
                    ..Default::default()
                },
                ..Default::default()
            },
        );
        pkg.triggers.insert(
            "t".into(),
            Trigger {
                name: "t".into(),
                ..Default::default()
            },
        );
        app.packages.insert("p".into(), pkg);
        app
    }

    #[test]
    fn test_wd016_plan_create_and_update() {
        let mut existing = BTreeSet::new();
        existing.insert((EntityKind::Action, "p/a".to_string()));
        let plan = plan(&app(), &existing, &[]);
        assert_eq!(plan.to_create, 3);
        assert_eq!(plan.to_update, 1);
        assert_eq!(plan.changes[0].label, "package");
        assert_eq!(plan.changes[1].action, PlanAction::Update);
        assert_eq!(plan.changes[2].name, "p/s");
        assert_eq!(plan.changes[2].label, "sequence");
    }

    #[test]
    fn test_wd016_plan_includes_deletes() {
        let deletes = vec![DeleteOp {
            kind: EntityKind::Action,
            name: "p/old".into(),
            label: "action".into(),
            feed: None,
        }];
        let plan = plan(&app(), &BTreeSet::new(), &deletes);
        assert_eq!(plan.to_destroy, 1);
        assert!(plan
            .changes
            .iter()
            .any(|c| c.action == PlanAction::Destroy && c.name == "p/old"));
    }

    #[test]
    fn test_wd016_default_package_skipped() {
        let mut app = DeploymentApplication::new("guest");
        let mut pkg = DeploymentPackage::new(Package {
            name: DEFAULT_PACKAGE.into(),
            ..Default::default()
        });
        pkg.actions.insert("a".into(), Action::default());
        app.packages.insert(DEFAULT_PACKAGE.into(), pkg);
        let plan = plan(&app, &BTreeSet::new(), &[]);
        assert_eq!(plan.changes.len(), 1);
        assert_eq!(plan.changes[0].name, "a");
    }

    #[test]
    fn test_wd016_write_plan() {
        let plan = plan(&app(), &BTreeSet::new(), &[]);
        let mut out = Vec::new();
        write_plan(&mut out, &plan).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("Planning: demo in namespace guest (4 entities)"));
        assert!(text.contains("  + sequence p/s"));
        assert!(text.contains("Plan: 4 to add, 0 to change, 0 to destroy."));
    }
}
