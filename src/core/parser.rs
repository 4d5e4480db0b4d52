//! WD-002: Manifest and deployment parsing.
//!
//! Strict deserialization (unknown keys are errors with a line number),
//! shape checks, and one-time resolution of package name expressions.

use super::error::{Error, Result};
use super::manifest::*;
use super::params;
use indexmap::IndexMap;
use std::path::{Path, PathBuf};

/// File names probed when no manifest path is given.
pub const MANIFEST_FILE_NAMES: [&str; 2] = ["manifest.yaml", "manifest.yml"];

/// File names probed when no deployment path is given.
pub const DEPLOYMENT_FILE_NAMES: [&str; 2] = ["deployment.yaml", "deployment.yml"];

/// Parse a manifest file from disk.
pub fn parse_manifest_file(path: &Path) -> Result<ManifestYaml> {
    if !path.exists() {
        return Err(Error::ManifestNotFound {
            path: path.display().to_string(),
        });
    }
    let content = std::fs::read_to_string(path).map_err(|e| Error::file_read(path, e))?;
    parse_manifest(&content, &path.display().to_string())
}

/// Parse a manifest from a string. `file` is used in error messages.
pub fn parse_manifest(yaml: &str, file: &str) -> Result<ManifestYaml> {
    let mut doc: ManifestYaml = serde_yaml_ng::from_str(yaml).map_err(|e| Error::yaml(file, &e))?;

    let has_multi = !doc.packages.is_empty()
        || doc.project.as_ref().is_some_and(|p| !p.packages.is_empty());
    if doc.package.is_some() && has_multi {
        return Err(Error::YamlFormat {
            file: file.to_string(),
            line: None,
            message: "`package` and `packages` are mutually exclusive".to_string(),
        });
    }
    if let Some(pkg) = &doc.package {
        if pkg.name.is_empty() {
            return Err(Error::YamlFormat {
                file: file.to_string(),
                line: None,
                message: "legacy `package` requires a `name`".to_string(),
            });
        }
    }

    let project_inputs = doc
        .project
        .as_ref()
        .map(|p| p.inputs.clone())
        .unwrap_or_default();
    doc.packages = resolve_package_names(std::mem::take(&mut doc.packages), &project_inputs);
    if let Some(project) = doc.project.as_mut() {
        project.packages = resolve_package_names(std::mem::take(&mut project.packages), &project_inputs);
    }
    if let Some(pkg) = doc.package.as_mut() {
        pkg.name = resolve_name(&pkg.name, &project_inputs);
    }
    Ok(doc)
}

/// Parse a deployment file from disk.
pub fn parse_deployment_file(path: &Path) -> Result<DeploymentYaml> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::file_read(path, e))?;
    parse_deployment(&content, &path.display().to_string())
}

/// Parse a deployment document from a string.
pub fn parse_deployment(yaml: &str, file: &str) -> Result<DeploymentYaml> {
    let mut doc: DeploymentYaml = serde_yaml_ng::from_str(yaml).map_err(|e| Error::yaml(file, &e))?;
    let empty = IndexMap::new();
    doc.packages = resolve_package_names(std::mem::take(&mut doc.packages), &empty);
    if let Some(project) = doc.project.as_mut() {
        project.packages = resolve_package_names(std::mem::take(&mut project.packages), &empty);
    }
    Ok(doc)
}

/// Resolve a package name that is an env expression (`$X`, `${X}`):
/// project inputs first, then the process environment.
pub fn resolve_name(name: &str, project_inputs: &RawInputs) -> String {
    if !params::is_interpolable(name) {
        return name.to_string();
    }
    let var = params::env_var_name(name);
    if let Some(value) = project_inputs.get(&var) {
        if let Ok(p) = params::resolve(&var, value, "project inputs") {
            if let serde_json::Value::String(s) = p.value.to_json() {
                if !s.is_empty() {
                    return s;
                }
            }
        }
    }
    params::interpolate(name)
}

fn resolve_package_names<T>(packages: IndexMap<String, T>, inputs: &RawInputs) -> IndexMap<String, T> {
    packages
        .into_iter()
        .map(|(name, pkg)| (resolve_name(&name, inputs), pkg))
        .collect()
}

/// All package declarations of a manifest in declaration order.
/// Top-level `packages` win over `project.packages`; the legacy shape yields one entry.
pub fn manifest_packages(doc: &ManifestYaml) -> IndexMap<String, PackageYaml> {
    if let Some(pkg) = &doc.package {
        let mut one = IndexMap::new();
        one.insert(pkg.name.clone(), pkg.clone());
        return one;
    }
    if !doc.packages.is_empty() {
        return doc.packages.clone();
    }
    doc.project
        .as_ref()
        .map(|p| p.packages.clone())
        .unwrap_or_default()
}

/// All package overrides of a deployment document.
pub fn deployment_packages(doc: &DeploymentYaml) -> IndexMap<String, DeploymentPackageYaml> {
    let mut out = IndexMap::new();
    if let Some(pkg) = &doc.package {
        out.insert(pkg.name.clone(), pkg.clone());
    }
    if let Some(project) = &doc.project {
        out.extend(project.packages.clone());
    }
    out.extend(doc.packages.clone());
    out
}

/// Find the first existing file among `names` inside `dir`.
pub fn discover(dir: &Path, names: &[&str]) -> Option<PathBuf> {
    names.iter().map(|n| dir.join(n)).find(|p| p.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_wd002_parse_multi_package() {
        let yaml = r#"
packages:
  hello:
    version: 1.0.0
    actions:
      greet:
        function: src/greet.js
        inputs:
          name: world
    triggers:
      everyMinute:
        feed: /whisk.system/alarms/alarm
    rules:
      greetRule:
        trigger: everyMinute
        action: greet
"#;
        let doc = parse_manifest(yaml, "manifest.yaml").unwrap();
        let pkgs = manifest_packages(&doc);
        assert_eq!(pkgs.len(), 1);
        let hello = &pkgs["hello"];
        assert_eq!(hello.actions["greet"].source(), Some("src/greet.js"));
        assert_eq!(hello.rules["greetRule"].trigger, "everyMinute");
    }

    #[test]
    fn test_wd002_parse_project_packages() {
        let yaml = r#"
project:
  name: demo
  packages:
    p1: {}
    p2: {}
"#;
        let doc = parse_manifest(yaml, "manifest.yaml").unwrap();
        assert_eq!(doc.project.as_ref().unwrap().name, "demo");
        let names: Vec<_> = manifest_packages(&doc).keys().cloned().collect();
        assert_eq!(names, vec!["p1", "p2"]);
    }

    #[test]
    fn test_wd002_parse_legacy_package() {
        let yaml = r#"
package:
  name: legacy
  actions:
    a:
      location: a.js
"#;
        let doc = parse_manifest(yaml, "manifest.yaml").unwrap();
        let pkgs = manifest_packages(&doc);
        assert_eq!(pkgs["legacy"].actions["a"].source(), Some("a.js"));
    }

    #[test]
    fn test_wd002_unknown_key_has_line() {
        let yaml = "packages:\n  hello:\n    actions:\n      a:\n        functon: a.js\n";
        let err = parse_manifest(yaml, "manifest.yaml").unwrap_err();
        match err {
            Error::YamlFormat { line, message, .. } => {
                assert!(line.is_some_and(|l| l >= 4));
                assert!(message.contains("functon"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_wd002_package_and_packages_exclusive() {
        let yaml = "package:\n  name: a\npackages:\n  b: {}\n";
        let err = parse_manifest(yaml, "manifest.yaml").unwrap_err();
        assert!(err.to_string().contains("mutually exclusive"));
    }

    #[test]
    #[serial]
    fn test_wd002_package_name_from_env() {
        temp_env::with_var("WD_PKG", Some("from-env"), || {
            let doc = parse_manifest("packages:\n  ${WD_PKG}: {}\n", "m.yaml").unwrap();
            assert!(doc.packages.contains_key("from-env"));
        });
    }

    #[test]
    #[serial]
    fn test_wd002_package_name_from_project_inputs() {
        temp_env::with_var("WD_PKG", Some("from-env"), || {
            let yaml = r#"
project:
  name: demo
  inputs:
    WD_PKG: from-inputs
  packages:
    $WD_PKG: {}
"#;
            let doc = parse_manifest(yaml, "m.yaml").unwrap();
            let pkgs = manifest_packages(&doc);
            assert!(pkgs.contains_key("from-inputs"));
        });
    }

    #[test]
    fn test_wd002_deployment_application_alias() {
        let yaml = r#"
application:
  name: demo
  namespace: guest
  baseUrl: openwhisk.example.com
  packages:
    hello:
      inputs:
        name: deployment
      actions:
        greet:
          inputs:
            greeting: hi
"#;
        let doc = parse_deployment(yaml, "deployment.yaml").unwrap();
        let project = doc.project.as_ref().unwrap();
        assert_eq!(project.api_host, "openwhisk.example.com");
        let pkgs = deployment_packages(&doc);
        assert!(pkgs["hello"].actions.contains_key("greet"));
    }

    #[test]
    fn test_wd002_manifest_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = parse_manifest_file(&dir.path().join("manifest.yaml")).unwrap_err();
        assert!(matches!(err, Error::ManifestNotFound { .. }));
    }

    #[test]
    fn test_wd002_discover() {
        let dir = tempfile::tempdir().unwrap();
        assert!(discover(dir.path(), &MANIFEST_FILE_NAMES).is_none());
        std::fs::write(dir.path().join("manifest.yml"), "packages: {}\n").unwrap();
        let found = discover(dir.path(), &MANIFEST_FILE_NAMES).unwrap();
        assert!(found.ends_with("manifest.yml"));
        let doc = parse_manifest_file(&found).unwrap();
        assert!(manifest_packages(&doc).is_empty());
    }
}
