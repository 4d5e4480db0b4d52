//! WD-018: Pipeline: parse, configure, compose, resolve dependencies, bind.
//!
//! Produces the application graph and client configuration every remote
//! command starts from. Nothing here mutates remote state.

use super::binder;
use super::composer::{self, ComposeContext};
use super::config::{self, ClientConfig, CliCredentials, ConfigSources};
use super::dependencies::{self, DependencyFetcher};
use super::error::{Error, Result};
use super::parser;
use super::runtimes::RuntimeCatalog;
use super::types::DeploymentApplication;
use crate::tripwire::hasher;
use crate::tripwire::managed::ManagedAnnotation;
use std::path::{Path, PathBuf};

/// Inputs shared by deploy, sync and undeploy.
#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    pub project_path: PathBuf,
    pub manifest: Option<PathBuf>,
    pub deployment: Option<PathBuf>,
    pub allow_defaults: bool,
    /// Stamp ownership markers on every entity.
    pub managed: bool,
    /// Overrides the manifest's project name.
    pub project_name: Option<String>,
    pub cli: CliCredentials,
    pub props_path: Option<PathBuf>,
    /// Ask the API host for its runtime table instead of using the bundled one.
    pub refresh_runtimes: bool,
    /// Skip TLS certificate verification when refreshing runtimes.
    pub insecure: bool,
}

/// Result of the local stages.
#[derive(Debug)]
pub struct Prepared {
    pub app: DeploymentApplication,
    pub config: ClientConfig,
    pub manifest_path: PathBuf,
    pub managed: Option<ManagedAnnotation>,
}

/// Explicit manifest path, else `manifest.yaml|yml` in the project directory.
pub fn locate_manifest(opts: &PipelineOptions) -> Result<PathBuf> {
    if let Some(path) = &opts.manifest {
        return Ok(path.clone());
    }
    parser::discover(&opts.project_path, &parser::MANIFEST_FILE_NAMES).ok_or_else(|| {
        Error::ManifestNotFound {
            path: opts.project_path.join(parser::MANIFEST_FILE_NAMES[0]).display().to_string(),
        }
    })
}

/// Explicit deployment path, else `deployment.yaml|yml` next to the project.
pub fn locate_deployment(opts: &PipelineOptions) -> Option<PathBuf> {
    opts.deployment
        .clone()
        .or_else(|| parser::discover(&opts.project_path, &parser::DEPLOYMENT_FILE_NAMES))
}

/// Ownership marker for the current manifest, hashed fresh from its bytes.
pub fn managed_annotation(project: &str, manifest_path: &Path) -> Result<ManagedAnnotation> {
    let hash = hasher::hash_file(manifest_path).map_err(|e| Error::file_read(manifest_path, e))?;
    Ok(ManagedAnnotation::new(
        project,
        &hash,
        &manifest_path.display().to_string(),
    ))
}

/// Run every local stage and return the bound application.
pub fn prepare(opts: &PipelineOptions, fetcher: &dyn DependencyFetcher) -> Result<Prepared> {
    let manifest_path = locate_manifest(opts)?;
    let manifest = parser::parse_manifest_file(&manifest_path)?;
    tracing::info!("manifest: {}", manifest_path.display());

    let deployment = match locate_deployment(opts) {
        Some(path) => {
            tracing::info!("deployment: {}", path.display());
            Some((parser::parse_deployment_file(&path)?, path))
        }
        None => None,
    };

    let config = config::resolve_client_config(&ConfigSources {
        deployment: deployment.as_ref().map(|(d, _)| d),
        manifest: Some(&manifest),
        cli: opts.cli.clone(),
        props_path: opts.props_path.clone(),
    })?;

    let catalog = if opts.refresh_runtimes {
        RuntimeCatalog::load(Some(&config.api_host.value), opts.insecure)
    } else {
        RuntimeCatalog::bundled()
    };

    let project_name = opts.project_name.clone().filter(|n| !n.is_empty()).or_else(|| {
        manifest
            .project
            .as_ref()
            .map(|p| p.name.clone())
            .filter(|n| !n.is_empty())
    });
    let managed = if opts.managed {
        let name = project_name.as_deref().ok_or_else(|| {
            Error::validation(
                &manifest_path.display().to_string(),
                "managed deployment requires a project name",
            )
        })?;
        Some(managed_annotation(name, &manifest_path)?)
    } else {
        None
    };

    let ctx = ComposeContext {
        namespace: config.namespace.value.clone(),
        manifest_path: manifest_path.clone(),
        project_path: opts.project_path.clone(),
        catalog: &catalog,
        allow_defaults: opts.allow_defaults,
        managed: managed.clone(),
    };
    let mut app = composer::compose(&manifest, &ctx)?;
    app = dependencies::resolve_dependencies(app, &ctx, fetcher)?;
    if let Some((doc, path)) = &deployment {
        app = binder::bind(doc, app, &path.display().to_string())?;
    }
    if project_name.is_some() {
        app.project_name = project_name;
    }

    Ok(Prepared {
        app,
        config,
        manifest_path,
        managed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{ENV_API_HOST, ENV_API_KEY, ENV_CONFIG_FILE, ENV_NAMESPACE};
    use crate::core::types::Dependency;
    use serial_test::serial;

    struct NoFetch;

    impl DependencyFetcher for NoFetch {
        fn fetch(&self, dep: &Dependency, _dest: &Path) -> std::result::Result<(), String> {
            Err(format!("unexpected fetch of {}", dep.name))
        }
    }

    const MANIFEST: &str = r#"
project:
  name: demo
  packages:
    hello:
      actions:
        greet:
          function: greet.js
          inputs:
            name: world
"#;

    fn project() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("manifest.yaml"), MANIFEST).unwrap();
        std::fs::write(dir.path().join("greet.js"), "function main() {}").unwrap();
        dir
    }

    fn options(dir: &Path) -> PipelineOptions {
        PipelineOptions {
            project_path: dir.to_path_buf(),
            cli: CliCredentials {
                auth: Some("user:pass".into()),
                namespace: Some("guest".into()),
                api_host: Some("localhost".into()),
            },
            props_path: Some(dir.join("no-props")),
            ..Default::default()
        }
    }

    fn with_clean_env<R>(f: impl FnOnce() -> R) -> R {
        temp_env::with_vars(
            [
                (ENV_API_KEY, None::<&str>),
                (ENV_NAMESPACE, None),
                (ENV_API_HOST, None),
                (ENV_CONFIG_FILE, None),
            ],
            f,
        )
    }

    #[test]
    #[serial]
    fn test_wd018_prepare_discovers_files() {
        let dir = project();
        std::fs::write(
            dir.path().join("deployment.yaml"),
            "project:\n  name: demo\n  packages:\n    hello:\n      actions:\n        greet:\n          inputs:\n            name: deployed\n",
        )
        .unwrap();
        let prepared = with_clean_env(|| prepare(&options(dir.path()), &NoFetch)).unwrap();
        assert_eq!(prepared.app.namespace, "guest");
        assert_eq!(prepared.app.project_name.as_deref(), Some("demo"));
        let greet = &prepared.app.packages["hello"].actions["greet"];
        assert_eq!(
            greet.parameters["name"].value,
            crate::core::types::ParamValue::String("deployed".into())
        );
        assert!(prepared.managed.is_none());
    }

    #[test]
    #[serial]
    fn test_wd018_managed_stamps_entities() {
        let dir = project();
        let mut opts = options(dir.path());
        opts.managed = true;
        let prepared = with_clean_env(|| prepare(&opts, &NoFetch)).unwrap();
        let marker = prepared.managed.unwrap();
        assert_eq!(marker.project_name, "demo");
        assert_eq!(
            marker.project_hash,
            hasher::hash_bytes(MANIFEST.as_bytes())
        );
        let pkg = &prepared.app.packages["hello"];
        assert!(ManagedAnnotation::belongs_to(&pkg.package.annotations, "demo"));
        assert!(ManagedAnnotation::belongs_to(&pkg.actions["greet"].annotations, "demo"));
    }

    #[test]
    #[serial]
    fn test_wd018_project_name_override() {
        let dir = project();
        let mut opts = options(dir.path());
        opts.managed = true;
        opts.project_name = Some("renamed".into());
        let prepared = with_clean_env(|| prepare(&opts, &NoFetch)).unwrap();
        assert_eq!(prepared.app.project_name.as_deref(), Some("renamed"));
        assert_eq!(prepared.managed.unwrap().project_name, "renamed");
    }

    #[test]
    fn test_wd018_missing_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let err = locate_manifest(&options(dir.path())).unwrap_err();
        assert!(matches!(err, Error::ManifestNotFound { .. }));
    }

    #[test]
    #[serial]
    fn test_wd018_missing_credentials() {
        let dir = project();
        let mut opts = options(dir.path());
        opts.cli.auth = None;
        let err = with_clean_env(|| prepare(&opts, &NoFetch)).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }
}
