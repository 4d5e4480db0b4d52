//! WD-017: Project scaffolding for `init` and `add`.

use super::AddEntity;
use crate::core::filesystem::ACTIONS_DIR;
use crate::core::manifest::*;
use crate::core::parser;
use crate::core::runtimes::RuntimeCatalog;
use crate::core::types::DEFAULT_PACKAGE;
use std::path::Path;

const INIT_VERSION: &str = "0.0.1";
const INIT_LICENSE: &str = "Apache-2.0";

fn stub_source(ext: &str) -> Option<&'static str> {
    match ext {
        "js" => Some("function main(params) {\n  return { greeting: 'Hello, ' + (params.name || 'world') };\n}\n\nexports.main = main;\n"),
        "py" => Some("def main(args):\n    return {\"greeting\": \"Hello, \" + args.get(\"name\", \"world\")}\n"),
        _ => None,
    }
}

pub(crate) fn cmd_init(path: &Path) -> Result<(), String> {
    let manifest_path = path.join(parser::MANIFEST_FILE_NAMES[0]);
    if manifest_path.exists() {
        return Err(format!("{} already exists", manifest_path.display()));
    }
    std::fs::create_dir_all(path).map_err(|e| format!("cannot create {}: {}", path.display(), e))?;

    let name = project_name(path);
    let mut project = ProjectYaml {
        name: name.clone(),
        ..Default::default()
    };
    project.packages.insert(
        name,
        PackageYaml {
            version: INIT_VERSION.to_string(),
            license: INIT_LICENSE.to_string(),
            ..Default::default()
        },
    );
    let doc = ManifestYaml {
        project: Some(project),
        ..Default::default()
    };
    write_manifest(&manifest_path, &doc)?;

    let actions_dir = path.join(ACTIONS_DIR);
    std::fs::create_dir_all(&actions_dir)
        .map_err(|e| format!("cannot create {}: {}", actions_dir.display(), e))?;

    println!("Initialized project at {}", path.display());
    println!("  Created: {}", manifest_path.display());
    println!("  Created: {}/", actions_dir.display());
    Ok(())
}

/// Project name from the directory's last component.
fn project_name(path: &Path) -> String {
    std::fs::canonicalize(path)
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "project".to_string())
}

pub(crate) fn cmd_add(manifest_path: &Path, entity: &AddEntity) -> Result<(), String> {
    let mut doc = parser::parse_manifest_file(manifest_path).map_err(|e| e.to_string())?;
    let base = match manifest_path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => std::path::PathBuf::from("."),
    };

    match entity {
        AddEntity::Action {
            name,
            runtime,
            package,
        } => {
            let pkg = package_mut(&mut doc, package.as_deref())?;
            if pkg.actions.contains_key(name) || pkg.sequences.contains_key(name) {
                return Err(format!("action [{}] already exists", name));
            }
            let rel = format!("{}/{}", ACTIONS_DIR, name);
            let dir = base.join(&rel);
            std::fs::create_dir_all(&dir).map_err(|e| format!("cannot create {}: {}", dir.display(), e))?;
            let ext = RuntimeCatalog::bundled().extension_for_kind(runtime);
            if let Some(stub) = stub_source(ext) {
                let file = dir.join(format!("index.{}", ext));
                if !file.exists() {
                    std::fs::write(&file, stub).map_err(|e| format!("cannot write {}: {}", file.display(), e))?;
                }
            }
            pkg.actions.insert(
                name.clone(),
                ActionYaml {
                    function: rel,
                    runtime: runtime.clone(),
                    ..Default::default()
                },
            );
            println!("Added action {} ({})", name, dir.display());
        }
        AddEntity::Trigger { name, feed, package } => {
            let pkg = package_mut(&mut doc, package.as_deref())?;
            if pkg.triggers.contains_key(name) {
                return Err(format!("trigger [{}] already exists", name));
            }
            pkg.triggers.insert(
                name.clone(),
                TriggerYaml {
                    feed: feed.clone().unwrap_or_default(),
                    ..Default::default()
                },
            );
            println!("Added trigger {}", name);
        }
        AddEntity::Rule {
            name,
            trigger,
            action,
            package,
        } => {
            let pkg = package_mut(&mut doc, package.as_deref())?;
            if pkg.rules.contains_key(name) {
                return Err(format!("rule [{}] already exists", name));
            }
            pkg.rules.insert(
                name.clone(),
                RuleYaml {
                    trigger: trigger.clone(),
                    action: action.clone(),
                    ..Default::default()
                },
            );
            println!("Added rule {} ({} -> {})", name, trigger, action);
        }
    }

    write_manifest(manifest_path, &doc)
}

/// The package an added entity goes into, created on demand.
fn package_mut<'a>(doc: &'a mut ManifestYaml, name: Option<&str>) -> Result<&'a mut PackageYaml, String> {
    if let Some(pkg) = doc.package.as_mut() {
        return match name {
            Some(n) if n != pkg.name => Err(format!(
                "manifest declares only package [{}]; cannot add to [{}]",
                pkg.name, n
            )),
            _ => Ok(pkg),
        };
    }
    let use_project = doc
        .project
        .as_ref()
        .is_some_and(|p| !p.packages.is_empty() || doc.packages.is_empty());
    let packages = match doc.project.as_mut() {
        Some(project) if use_project => &mut project.packages,
        _ => &mut doc.packages,
    };
    let key = match name {
        Some(n) => n.to_string(),
        None => packages
            .keys()
            .next()
            .cloned()
            .unwrap_or_else(|| DEFAULT_PACKAGE.to_string()),
    };
    Ok(packages.entry(key).or_default())
}

pub(crate) fn write_manifest(path: &Path, doc: &ManifestYaml) -> Result<(), String> {
    let yaml = serde_yaml_ng::to_string(doc).map_err(|e| format!("cannot serialize manifest: {}", e))?;
    std::fs::write(path, yaml).map_err(|e| format!("cannot write {}: {}", path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wd017_init() {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("shop");
        cmd_init(&project).unwrap();
        assert!(project.join(ACTIONS_DIR).is_dir());
        let doc = parser::parse_manifest_file(&project.join("manifest.yaml")).unwrap();
        let p = doc.project.unwrap();
        assert_eq!(p.name, "shop");
        assert_eq!(p.packages["shop"].version, INIT_VERSION);
        assert_eq!(p.packages["shop"].license, INIT_LICENSE);
    }

    #[test]
    fn test_wd017_init_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        cmd_init(dir.path()).unwrap();
        assert!(cmd_init(dir.path()).is_err());
    }

    #[test]
    fn test_wd017_add_entities() {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("shop");
        cmd_init(&project).unwrap();
        let manifest = project.join("manifest.yaml");

        let action = AddEntity::Action {
            name: "checkout".into(),
            runtime: "nodejs:default".into(),
            package: None,
        };
        cmd_add(&manifest, &action).unwrap();
        assert!(project.join("actions/checkout/index.js").is_file());
        assert!(cmd_add(&manifest, &action).is_err());

        cmd_add(
            &manifest,
            &AddEntity::Trigger {
                name: "order".into(),
                feed: None,
                package: None,
            },
        )
        .unwrap();
        cmd_add(
            &manifest,
            &AddEntity::Rule {
                name: "on-order".into(),
                trigger: "order".into(),
                action: "checkout".into(),
                package: None,
            },
        )
        .unwrap();

        let doc = parser::parse_manifest_file(&manifest).unwrap();
        let pkg = &doc.project.unwrap().packages["shop"];
        assert_eq!(pkg.actions["checkout"].function, "actions/checkout");
        assert!(pkg.triggers.contains_key("order"));
        assert_eq!(pkg.rules["on-order"].action, "checkout");
    }

    #[test]
    fn test_wd017_add_to_new_package() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = dir.path().join("manifest.yaml");
        std::fs::write(&manifest, "packages:\n  a: {}\n").unwrap();
        cmd_add(
            &manifest,
            &AddEntity::Trigger {
                name: "t".into(),
                feed: Some("/whisk.system/alarms/alarm".into()),
                package: Some("b".into()),
            },
        )
        .unwrap();
        let doc = parser::parse_manifest_file(&manifest).unwrap();
        assert_eq!(doc.packages["b"].triggers["t"].feed, "/whisk.system/alarms/alarm");
    }
}
