//! WD-009: Dependency resolution.
//!
//! Binding dependencies (`/whisk.system/...`) become binding packages.
//! External (GitHub) dependencies are fetched as a zip snapshot of the pinned
//! version into `<project>/Packages/<name>-<version>` and, when they carry a
//! manifest, composed recursively. Recursion is bounded by a visited set
//! keyed by `location@version` and a maximum depth.

use super::composer::{self, ComposeContext, DEFAULT_LICENSE, DEFAULT_VERSION};
use super::error::{Error, Result};
use super::manifest::DependencyYaml;
use super::params;
use super::parser;
use super::types::*;
use std::collections::HashSet;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

/// Directory under the project holding fetched dependencies.
pub const PACKAGES_DIR: &str = "Packages";

/// Maximum nesting of external dependencies.
pub const MAX_DEPTH: usize = 8;

/// Version used when an external dependency pins none.
pub const DEFAULT_BRANCH: &str = "master";

/// True for locations that name a package already on the platform.
pub fn is_binding(location: &str) -> bool {
    location.starts_with("/whisk.system") || location.starts_with("whisk.system") || location.starts_with('/')
}

/// True for locations hosted on GitHub.
pub fn is_github(location: &str) -> bool {
    let without_scheme = location.split("://").last().unwrap_or(location);
    without_scheme
        .split('/')
        .next()
        .is_some_and(|host| host.contains("github"))
}

/// Binding target of a `/namespace/package` location.
pub fn binding_target(location: &str) -> Option<Binding> {
    let (namespace, name) = location.trim_start_matches('/').split_once('/')?;
    if namespace.is_empty() || name.is_empty() {
        return None;
    }
    Some(Binding {
        namespace: namespace.to_string(),
        name: name.to_string(),
    })
}

/// Split `host/org/repo[/sub/folder]` into the repository URL and sub-folder.
fn split_repo(location: &str) -> Option<(String, String)> {
    let url = if location.contains("://") {
        location.to_string()
    } else {
        format!("https://{}", location)
    };
    let parts: Vec<&str> = url.trim_end_matches('/').split('/').collect();
    if parts.len() < 5 || parts[2..5].iter().any(|p| p.is_empty()) {
        return None;
    }
    Some((parts[..5].join("/"), parts[5..].join("/")))
}

/// Classify and record a declared dependency.
pub fn from_yaml(name: &str, yaml: &DependencyYaml, file: &str) -> Result<Dependency> {
    let location = params::interpolate(&yaml.location);
    if location.is_empty() {
        return Err(Error::validation(file, format!("dependency [{}] has no location", name)));
    }
    let mut dep = Dependency {
        name: name.to_string(),
        location: location.clone(),
        version: params::interpolate(&yaml.version),
        is_binding: is_binding(&location),
        parameters: params::resolve_all(&yaml.inputs, file)?,
        annotations: yaml
            .annotations
            .iter()
            .map(|(k, v)| (k.clone(), params::yaml_to_json(v, true)))
            .collect(),
        ..Default::default()
    };
    if dep.is_binding {
        if binding_target(&location).is_none() {
            return Err(Error::validation(
                file,
                format!("dependency [{}] location [{}] is not /namespace/package", name, location),
            ));
        }
        return Ok(dep);
    }
    if !is_github(&location) {
        return Err(Error::validation(
            file,
            format!("dependency [{}] location [{}] is not supported; use GitHub or /whisk.system", name, location),
        ));
    }
    let (base_repo, sub_folder) = split_repo(&location).ok_or_else(|| {
        Error::validation(file, format!("dependency [{}] location [{}] is not host/org/repo", name, location))
    })?;
    dep.base_repo = base_repo;
    dep.sub_folder = sub_folder;
    if dep.version.is_empty() {
        dep.version = DEFAULT_BRANCH.to_string();
    }
    Ok(dep)
}

// ============================================================================
// Fetching
// ============================================================================

/// Materializes an external dependency into a local directory.
pub trait DependencyFetcher {
    fn fetch(&self, dep: &Dependency, dest: &Path) -> std::result::Result<(), String>;
}

/// Downloads `<baseRepo>/zipball/<version>` and extracts it.
pub struct GithubFetcher;

impl DependencyFetcher for GithubFetcher {
    fn fetch(&self, dep: &Dependency, dest: &Path) -> std::result::Result<(), String> {
        let url = format!("{}/zipball/{}", dep.base_repo, dep.version);
        tracing::info!("fetching dependency [{}] from {}", dep.name, url);
        let response = reqwest::blocking::get(&url).map_err(|e| format!("GET {}: {}", url, e))?;
        let response = response
            .error_for_status()
            .map_err(|e| format!("GET {}: {}", url, e))?;
        let bytes = response.bytes().map_err(|e| format!("GET {}: {}", url, e))?;
        extract_zip(&bytes, dest)?;
        tracing::info!("dependency [{}] extracted to {}", dep.name, dest.display());
        Ok(())
    }
}

/// Extract a zip snapshot into `dest`, dropping the archive's root folder.
pub fn extract_zip(bytes: &[u8], dest: &Path) -> std::result::Result<(), String> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| format!("failed to open zip: {}", e))?;
    fs::create_dir_all(dest).map_err(|e| format!("cannot create {}: {}", dest.display(), e))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| format!("failed to read zip entry: {}", e))?;
        let path = entry
            .enclosed_name()
            .ok_or_else(|| "invalid zip entry name".to_string())?;
        let stripped: PathBuf = path.components().skip(1).collect();
        if stripped.as_os_str().is_empty() {
            continue;
        }
        let target = dest.join(&stripped);
        if entry.is_dir() {
            fs::create_dir_all(&target).map_err(|e| format!("cannot create {}: {}", target.display(), e))?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| format!("cannot create {}: {}", parent.display(), e))?;
        }
        let mut out =
            fs::File::create(&target).map_err(|e| format!("cannot write {}: {}", target.display(), e))?;
        std::io::copy(&mut entry, &mut out).map_err(|e| format!("cannot write {}: {}", target.display(), e))?;
    }
    Ok(())
}

// ============================================================================
// Resolution
// ============================================================================

/// Expand every dependency of the application.
pub fn resolve_dependencies(
    app: DeploymentApplication,
    ctx: &ComposeContext,
    fetcher: &dyn DependencyFetcher,
) -> Result<DeploymentApplication> {
    let mut visited = HashSet::new();
    resolve_level(app, ctx, fetcher, &mut visited, 0)
}

fn resolve_level(
    mut app: DeploymentApplication,
    ctx: &ComposeContext,
    fetcher: &dyn DependencyFetcher,
    visited: &mut HashSet<String>,
    depth: usize,
) -> Result<DeploymentApplication> {
    let deps: Vec<Dependency> = app
        .packages
        .values()
        .flat_map(|p| p.dependencies.values().cloned())
        .collect();

    for dep in deps {
        if dep.is_binding {
            add_binding_package(&mut app, &dep, ctx)?;
            continue;
        }
        let key = format!("{}@{}", dep.location, dep.version);
        if !visited.insert(key) {
            tracing::debug!("dependency [{}] already resolved; skipping", dep.name);
            continue;
        }
        if depth >= MAX_DEPTH {
            return Err(Error::Dependency {
                name: dep.name.clone(),
                message: format!("nesting exceeds the maximum depth of {}", MAX_DEPTH),
            });
        }

        let root = ctx
            .project_path
            .join(PACKAGES_DIR)
            .join(format!("{}-{}", dep.name, dep.version));
        if root.exists() {
            tracing::info!("dependency [{}] found at {}", dep.name, root.display());
        } else {
            fetcher.fetch(&dep, &root).map_err(|message| Error::Dependency {
                name: dep.name.clone(),
                message,
            })?;
        }
        let dir = if dep.sub_folder.is_empty() {
            root
        } else {
            root.join(&dep.sub_folder)
        };
        record_resolved_path(&mut app, &dep, &dir);

        let Some(manifest) = parser::discover(&dir, &parser::MANIFEST_FILE_NAMES) else {
            tracing::warn!("dependency [{}] has no manifest under {}", dep.name, dir.display());
            continue;
        };
        let doc = parser::parse_manifest_file(&manifest)?;
        let sub_ctx = ComposeContext {
            namespace: ctx.namespace.clone(),
            manifest_path: manifest,
            project_path: dir,
            catalog: ctx.catalog,
            allow_defaults: false,
            managed: ctx.managed.clone(),
        };
        let sub_app = composer::compose(&doc, &sub_ctx)?;
        let sub_app = resolve_level(sub_app, &sub_ctx, fetcher, visited, depth + 1)?;
        merge_dependency(&mut app, &dep, sub_app, ctx)?;
    }
    Ok(app)
}

fn record_resolved_path(app: &mut DeploymentApplication, dep: &Dependency, dir: &Path) {
    for pkg in app.packages.values_mut() {
        if let Some(d) = pkg.dependencies.get_mut(&dep.name) {
            if d.location == dep.location {
                d.resolved_path = Some(dir.to_path_buf());
            }
        }
    }
}

/// Join a dependency's packages into the application. When the dependency
/// name differs from its single package, a binding under that name is added.
fn merge_dependency(
    app: &mut DeploymentApplication,
    dep: &Dependency,
    sub_app: DeploymentApplication,
    ctx: &ComposeContext,
) -> Result<()> {
    let first = sub_app
        .packages
        .keys()
        .find(|k| k.as_str() != DEFAULT_PACKAGE)
        .cloned();
    let named_after_dep = sub_app.packages.contains_key(&dep.name);
    for (name, pkg) in sub_app.packages {
        if app.packages.contains_key(&name) {
            return Err(Error::DuplicateEntity {
                kind: "package".to_string(),
                name,
            });
        }
        app.packages.insert(name, pkg);
    }
    if let (false, Some(target)) = (named_after_dep, first) {
        let alias = Dependency {
            location: format!("/{}/{}", ctx.namespace, target),
            ..dep.clone()
        };
        add_binding_package(app, &alias, ctx)?;
    }
    Ok(())
}

fn add_binding_package(app: &mut DeploymentApplication, dep: &Dependency, ctx: &ComposeContext) -> Result<()> {
    let binding = binding_target(&dep.location).ok_or_else(|| Error::Dependency {
        name: dep.name.clone(),
        message: format!("cannot bind to [{}]", dep.location),
    })?;
    if let Some(existing) = app.packages.get(&dep.name) {
        if existing.package.binding.as_ref() == Some(&binding) {
            tracing::debug!("binding [{}] to {} already declared", dep.name, dep.location);
            return Ok(());
        }
        return Err(Error::DuplicateEntity {
            kind: "package".to_string(),
            name: dep.name.clone(),
        });
    }
    let mut package = Package {
        name: dep.name.clone(),
        namespace: ctx.namespace.clone(),
        version: if dep.version.is_empty() {
            DEFAULT_VERSION.to_string()
        } else {
            dep.version.clone()
        },
        license: DEFAULT_LICENSE.to_string(),
        publish: false,
        parameters: dep.parameters.clone(),
        annotations: dep.annotations.clone(),
        binding: Some(binding),
    };
    ctx.stamp(&mut package.annotations);
    tracing::debug!("dependency [{}] binds to {}", dep.name, dep.location);
    app.packages.insert(dep.name.clone(), DeploymentPackage::new(package));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::runtimes::RuntimeCatalog;
    use std::io::Write;
    use std::sync::Mutex;

    struct StubFetcher {
        calls: Mutex<Vec<String>>,
        manifest: fn(&Dependency) -> String,
    }

    impl StubFetcher {
        fn new(manifest: fn(&Dependency) -> String) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                manifest,
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl DependencyFetcher for StubFetcher {
        fn fetch(&self, dep: &Dependency, dest: &Path) -> std::result::Result<(), String> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("{}@{}", dep.base_repo, dep.version));
            fs::create_dir_all(dest).map_err(|e| e.to_string())?;
            fs::write(dest.join("manifest.yaml"), (self.manifest)(dep)).map_err(|e| e.to_string())
        }
    }

    fn ctx<'a>(dir: &Path, catalog: &'a RuntimeCatalog) -> ComposeContext<'a> {
        ComposeContext {
            namespace: "ns".to_string(),
            manifest_path: dir.join("manifest.yaml"),
            project_path: dir.to_path_buf(),
            catalog,
            allow_defaults: false,
            managed: None,
        }
    }

    fn compose_str(yaml: &str, ctx: &ComposeContext) -> DeploymentApplication {
        let doc = parser::parse_manifest(yaml, "manifest.yaml").unwrap();
        composer::compose(&doc, ctx).unwrap()
    }

    #[test]
    fn test_wd009_classification() {
        let yaml = DependencyYaml {
            location: "/whisk.system/cloudant".to_string(),
            ..Default::default()
        };
        let dep = from_yaml("cloudant", &yaml, "m.yaml").unwrap();
        assert!(dep.is_binding);
        assert!(dep.base_repo.is_empty());

        let yaml = DependencyYaml {
            location: "github.com/org/repo".to_string(),
            version: "1.0.0".to_string(),
            ..Default::default()
        };
        let dep = from_yaml("repo", &yaml, "m.yaml").unwrap();
        assert!(!dep.is_binding);
        assert_eq!(dep.base_repo, "https://github.com/org/repo");
        assert!(dep.sub_folder.is_empty());
        assert_eq!(dep.version, "1.0.0");
    }

    #[test]
    fn test_wd009_sub_folder_and_default_version() {
        let yaml = DependencyYaml {
            location: "https://github.com/org/repo/packages/util".to_string(),
            ..Default::default()
        };
        let dep = from_yaml("util", &yaml, "m.yaml").unwrap();
        assert_eq!(dep.base_repo, "https://github.com/org/repo");
        assert_eq!(dep.sub_folder, "packages/util");
        assert_eq!(dep.version, DEFAULT_BRANCH);
    }

    #[test]
    fn test_wd009_unsupported_locations() {
        let yaml = DependencyYaml {
            location: "gitlab.com/org/repo".to_string(),
            ..Default::default()
        };
        assert!(from_yaml("x", &yaml, "m.yaml").is_err());
        let yaml = DependencyYaml {
            location: "github.com/org".to_string(),
            ..Default::default()
        };
        assert!(from_yaml("x", &yaml, "m.yaml").is_err());
        assert!(is_github("https://github.ibm.com/org/repo"));
        assert!(!is_github("example.com/github/repo"));
    }

    #[test]
    fn test_wd009_binding_dependency_no_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = RuntimeCatalog::bundled();
        let c = ctx(dir.path(), &catalog);
        let yaml = r#"
packages:
  p:
    dependencies:
      cloudant:
        location: /whisk.system/cloudant
        inputs:
          dbname: test
"#;
        let app = compose_str(yaml, &c);
        let fetcher = StubFetcher::new(|_| String::new());
        let app = resolve_dependencies(app, &c, &fetcher).unwrap();
        assert!(fetcher.calls().is_empty());
        let bound = &app.packages["cloudant"].package;
        let binding = bound.binding.as_ref().unwrap();
        assert_eq!(binding.namespace, "whisk.system");
        assert_eq!(binding.name, "cloudant");
        assert!(bound.parameters.contains_key("dbname"));
    }

    #[test]
    fn test_wd009_shared_binding_dependency() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = RuntimeCatalog::bundled();
        let c = ctx(dir.path(), &catalog);
        let yaml = r#"
packages:
  p1:
    dependencies:
      cloudant:
        location: /whisk.system/cloudant
  p2:
    dependencies:
      cloudant:
        location: /whisk.system/cloudant
"#;
        let app = compose_str(yaml, &c);
        let fetcher = StubFetcher::new(|_| String::new());
        let app = resolve_dependencies(app, &c, &fetcher).unwrap();
        let bound = app.packages["cloudant"].package.binding.as_ref().unwrap();
        assert_eq!(bound.name, "cloudant");
        assert_eq!(app.packages.len(), 3);

        let clash = r#"
packages:
  p1:
    dependencies:
      cloudant:
        location: /whisk.system/cloudant
  p2:
    dependencies:
      cloudant:
        location: /whisk.system/alarms
"#;
        let app = compose_str(clash, &c);
        let err = resolve_dependencies(app, &c, &fetcher).unwrap_err();
        assert!(matches!(err, Error::DuplicateEntity { .. }));
    }

    #[test]
    fn test_wd009_external_dependency_fetched_and_composed() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = RuntimeCatalog::bundled();
        let c = ctx(dir.path(), &catalog);
        let yaml = r#"
packages:
  p:
    dependencies:
      lib:
        location: github.com/org/repo
        version: v1.0
"#;
        let app = compose_str(yaml, &c);
        let fetcher = StubFetcher::new(|_| "packages:\n  lib:\n    sequences:\n      s:\n        actions: x\n".to_string());
        let app = resolve_dependencies(app, &c, &fetcher).unwrap();
        assert_eq!(fetcher.calls(), vec!["https://github.com/org/repo@v1.0"]);
        assert!(dir.path().join("Packages/lib-v1.0/manifest.yaml").is_file());
        assert_eq!(app.packages["lib"].sequences["s"].exec.components, vec!["/ns/lib/x"]);
        let recorded = &app.packages["p"].dependencies["lib"];
        assert!(recorded.resolved_path.as_ref().unwrap().ends_with("lib-v1.0"));
    }

    #[test]
    fn test_wd009_alias_binding_for_renamed_package() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = RuntimeCatalog::bundled();
        let c = ctx(dir.path(), &catalog);
        let yaml = "packages:\n  p:\n    dependencies:\n      mylib:\n        location: github.com/org/repo\n        version: v2\n";
        let app = compose_str(yaml, &c);
        let fetcher = StubFetcher::new(|_| "packages:\n  upstream: {}\n".to_string());
        let app = resolve_dependencies(app, &c, &fetcher).unwrap();
        assert!(app.packages.contains_key("upstream"));
        let alias = app.packages["mylib"].package.binding.as_ref().unwrap();
        assert_eq!(alias.namespace, "ns");
        assert_eq!(alias.name, "upstream");
    }

    #[test]
    fn test_wd009_cycle_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = RuntimeCatalog::bundled();
        let c = ctx(dir.path(), &catalog);
        let yaml = "packages:\n  p:\n    dependencies:\n      lib:\n        location: github.com/org/repo\n        version: v1\n";
        let app = compose_str(yaml, &c);
        let fetcher = StubFetcher::new(|_| {
            "packages:\n  lib:\n    dependencies:\n      again:\n        location: github.com/org/repo\n        version: v1\n"
                .to_string()
        });
        let app = resolve_dependencies(app, &c, &fetcher).unwrap();
        assert_eq!(fetcher.calls().len(), 1);
        assert!(app.packages.contains_key("lib"));
    }

    #[test]
    fn test_wd009_depth_guard() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = RuntimeCatalog::bundled();
        let c = ctx(dir.path(), &catalog);
        let yaml = "packages:\n  p:\n    dependencies:\n      lib:\n        location: github.com/org/chain\n        version: v0\n";
        let app = compose_str(yaml, &c);
        let fetcher = StubFetcher::new(|dep| {
            let n: usize = dep.version.trim_start_matches('v').parse().unwrap();
            format!(
                "packages:\n  lib{n}:\n    dependencies:\n      lib:\n        location: github.com/org/chain\n        version: v{next}\n",
                n = n,
                next = n + 1
            )
        });
        let err = resolve_dependencies(app, &c, &fetcher).unwrap_err();
        assert!(matches!(err, Error::Dependency { .. }));
        assert_eq!(fetcher.calls().len(), MAX_DEPTH);
    }

    #[test]
    fn test_wd009_extract_zip_strips_root() {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default();
        writer.add_directory("org-repo-abc123/", options).unwrap();
        writer.start_file("org-repo-abc123/manifest.yaml", options).unwrap();
        writer.write_all(b"packages: {}\n").unwrap();
        writer.start_file("org-repo-abc123/src/a.js", options).unwrap();
        writer.write_all(b"x").unwrap();
        let bytes = writer.finish().unwrap().into_inner();

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("lib-v1");
        extract_zip(&bytes, &dest).unwrap();
        assert!(dest.join("manifest.yaml").is_file());
        assert_eq!(fs::read_to_string(dest.join("src/a.js")).unwrap(), "x");
        assert!(extract_zip(b"not a zip", &dest).is_err());
    }
}
