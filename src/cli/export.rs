//! WD-017: Export a managed project back into a manifest and sources.

use super::{client_config, scaffold, ClientArgs};
use crate::client::{RemoteEntity, WhiskClient};
use crate::core::dependencies;
use crate::core::manifest::*;
use crate::core::runtimes::RuntimeCatalog;
use crate::core::types::*;
use crate::tripwire::drift;
use crate::tripwire::managed::MANAGED_KEY;
use base64::Engine;
use std::path::{Path, PathBuf};

/// What an export wrote.
#[derive(Debug, Default)]
pub struct ExportSummary {
    pub packages: usize,
    pub actions: usize,
    pub sequences: usize,
    pub triggers: usize,
    pub rules: usize,
    pub files: Vec<PathBuf>,
}

pub(crate) fn cmd_export(project: &str, manifest: &Path, args: &ClientArgs) -> Result<(), String> {
    let cfg = client_config(args)?;
    let client = args.connect(&cfg)?;
    let summary = export_project(&client, project, manifest)?;
    println!(
        "Exported project {} to {}: {} package(s), {} action(s), {} sequence(s), {} trigger(s), {} rule(s)",
        project,
        manifest.display(),
        summary.packages,
        summary.actions,
        summary.sequences,
        summary.triggers,
        summary.rules
    );
    for file in &summary.files {
        println!("  Created: {}", file.display());
    }
    Ok(())
}

/// Write `manifest` and action sources for every entity owned by `project`.
pub fn export_project(client: &dyn WhiskClient, project: &str, manifest: &Path) -> Result<ExportSummary, String> {
    let owned = drift::managed_remote(client, project).map_err(|e| e.to_string())?;
    let base = match manifest.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let catalog = RuntimeCatalog::bundled();
    let mut summary = ExportSummary::default();
    let mut project_yaml = ProjectYaml {
        name: project.to_string(),
        ..Default::default()
    };
    let packages = &mut project_yaml.packages;

    let (bindings, plain): (Vec<&RemoteEntity>, Vec<&RemoteEntity>) = owned
        .iter()
        .filter(|e| e.kind == Some(EntityKind::Package))
        .partition(|e| e.binding.is_some());
    for pkg in &plain {
        packages.insert(
            pkg.name.clone(),
            PackageYaml {
                public: pkg.publish.then_some(true),
                inputs: inputs_yaml(&pkg.parameters)?,
                annotations: annotations_yaml(&pkg.annotations, &[])?,
                ..Default::default()
            },
        );
        summary.packages += 1;
    }
    // Namespace-level entities and bindings attach to the first exported package.
    let home = plain
        .first()
        .map(|p| p.name.clone())
        .unwrap_or_else(|| DEFAULT_PACKAGE.to_string());
    packages.entry(home.clone()).or_default();

    for binding in &bindings {
        if let Some(target) = &binding.binding {
            let location = format!("/{}/{}", target.namespace, target.name);
            debug_assert!(dependencies::is_binding(&location));
            packages.entry(home.clone()).or_default().dependencies.insert(
                binding.name.clone(),
                DependencyYaml {
                    location,
                    inputs: inputs_yaml(&binding.parameters)?,
                    ..Default::default()
                },
            );
        }
    }

    for entity in owned.iter().filter(|e| e.kind == Some(EntityKind::Action)) {
        let pkg_name = entity.package().unwrap_or(DEFAULT_PACKAGE).to_string();
        let remote = client
            .get_action(&entity.relative_name())
            .map_err(|e| format!("cannot fetch action {}: {}", entity.relative_name(), e))?;
        let exec = remote.exec.clone().unwrap_or_default();
        let target = packages.entry(pkg_name.clone()).or_default();
        if exec.kind == "sequence" {
            let components: Vec<String> = exec.components.iter().map(|c| strip_namespace(c)).collect();
            target.sequences.insert(
                entity.name.clone(),
                SequenceYaml {
                    actions: components.join(", "),
                    annotations: annotations_yaml(&remote.annotations, &[])?,
                    ..Default::default()
                },
            );
            summary.sequences += 1;
            continue;
        }

        let mut action = ActionYaml {
            inputs: inputs_yaml(&remote.parameters)?,
            annotations: annotations_yaml(&remote.annotations, &[])?,
            main: exec.main.clone().unwrap_or_default(),
            ..Default::default()
        };
        if let (Some(image), true) = (&exec.image, exec.kind == "blackbox") {
            action.docker = image.clone();
        } else if let Some(code) = &exec.code {
            let (rel, bytes) = if exec.binary {
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(code)
                    .map_err(|e| format!("action {} has invalid binary code: {}", entity.name, e))?;
                (format!("{}/{}.zip", pkg_name, entity.name), bytes)
            } else {
                let ext = catalog.extension_for_kind(&exec.kind);
                (format!("{}/{}.{}", pkg_name, entity.name, ext), code.clone().into_bytes())
            };
            let path = base.join(&rel);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| format!("cannot create {}: {}", parent.display(), e))?;
            }
            std::fs::write(&path, bytes).map_err(|e| format!("cannot write {}: {}", path.display(), e))?;
            summary.files.push(path);
            action.function = rel;
            action.runtime = exec.kind.clone();
        }
        target.actions.insert(entity.name.clone(), action);
        summary.actions += 1;
    }

    for trigger in owned.iter().filter(|e| e.kind == Some(EntityKind::Trigger)) {
        let feed = trigger
            .annotations
            .get("feed")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string();
        let yaml = TriggerYaml {
            feed,
            inputs: inputs_yaml(&trigger.parameters)?,
            annotations: annotations_yaml(&trigger.annotations, &["feed"])?,
            ..Default::default()
        };
        packages.entry(home.clone()).or_default().triggers.insert(trigger.name.clone(), yaml);
        summary.triggers += 1;
    }

    for rule in owned.iter().filter(|e| e.kind == Some(EntityKind::Rule)) {
        let trigger = rule.trigger.as_deref().map(strip_namespace).unwrap_or_default();
        let trigger = trigger.rsplit('/').next().unwrap_or_default().to_string();
        let yaml = RuleYaml {
            trigger,
            action: rule.action.as_deref().map(strip_namespace).unwrap_or_default(),
            annotations: annotations_yaml(&rule.annotations, &[])?,
        };
        packages.entry(home.clone()).or_default().rules.insert(rule.name.clone(), yaml);
        summary.rules += 1;
    }

    let doc = ManifestYaml {
        project: Some(project_yaml),
        ..Default::default()
    };
    scaffold::write_manifest(manifest, &doc)?;
    Ok(summary)
}

/// `/ns/pkg/action` → `pkg/action`; other forms are returned unchanged.
fn strip_namespace(name: &str) -> String {
    match name.strip_prefix('/').and_then(|rest| rest.split_once('/')) {
        Some((_, rest)) => rest.to_string(),
        None => name.to_string(),
    }
}

fn inputs_yaml(params: &[KeyValue]) -> Result<RawInputs, String> {
    params
        .iter()
        .map(|kv| {
            serde_yaml_ng::to_value(&kv.value)
                .map(|v| (kv.key.clone(), v))
                .map_err(|e| format!("parameter {}: {}", kv.key, e))
        })
        .collect()
}

/// Annotations minus the ownership marker and `skip` keys.
fn annotations_yaml(annotations: &Annotations, skip: &[&str]) -> Result<RawAnnotations, String> {
    annotations
        .iter()
        .filter(|(k, _)| k.as_str() != MANAGED_KEY && !skip.contains(&k.as_str()))
        .map(|(k, v)| {
            serde_yaml_ng::to_value(v)
                .map(|y| (k.clone(), y))
                .map_err(|e| format!("annotation {}: {}", k, e))
        })
        .collect()
}
