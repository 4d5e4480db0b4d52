//! WD-010: Client configuration (credential, namespace, API host).
//!
//! Sources in precedence order: deployment file, manifest file, command line,
//! properties file (`WSK_CONFIG_FILE` or `~/.wskprops`), environment.
//! Every value remembers where it came from.

use super::error::{Error, Result};
use super::manifest::{DeploymentYaml, ManifestYaml};
use super::parser;
use super::types::DEFAULT_NAMESPACE;
use indexmap::IndexMap;
use std::path::{Path, PathBuf};

pub const SOURCE_DEPLOYMENT: &str = "deployment file";
pub const SOURCE_MANIFEST: &str = "manifest file";
pub const SOURCE_CLI: &str = "command line";
pub const SOURCE_PROPS: &str = ".wskprops";
pub const SOURCE_ENV: &str = "environment";
pub const SOURCE_DEFAULT: &str = "default value";

/// Environment variables consulted last.
pub const ENV_API_KEY: &str = "__OW_API_KEY";
pub const ENV_NAMESPACE: &str = "__OW_NAMESPACE";
pub const ENV_API_HOST: &str = "__OW_API_HOST";
pub const ENV_CONFIG_FILE: &str = "WSK_CONFIG_FILE";

/// A configuration value and its origin.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyValue {
    pub value: String,
    pub source: String,
}

impl PropertyValue {
    pub fn is_set(&self) -> bool {
        !self.value.is_empty()
    }

    /// Fill the slot unless a higher-precedence source already did.
    fn offer(&mut self, value: &str, source: &str) {
        if !self.is_set() && !value.is_empty() {
            self.value = value.to_string();
            self.source = source.to_string();
        }
    }
}

/// Credentials given on the command line.
#[derive(Debug, Clone, Default)]
pub struct CliCredentials {
    pub auth: Option<String>,
    pub namespace: Option<String>,
    pub api_host: Option<String>,
}

/// Inputs to configuration resolution.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources<'a> {
    pub deployment: Option<&'a DeploymentYaml>,
    pub manifest: Option<&'a ManifestYaml>,
    pub cli: CliCredentials,
    /// Explicit properties file; falls back to [`default_props_path`].
    pub props_path: Option<PathBuf>,
}

/// Resolved client configuration.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub auth: PropertyValue,
    pub namespace: PropertyValue,
    pub api_host: PropertyValue,
    pub apigw_token: Option<String>,
}

/// `WSK_CONFIG_FILE`, else `$HOME/.wskprops`.
pub fn default_props_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(ENV_CONFIG_FILE) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }
    std::env::var("HOME")
        .ok()
        .map(|home| Path::new(&home).join(".wskprops"))
}

/// Parse `KEY=VALUE` lines; blank lines and `#` comments are skipped.
pub fn read_props(path: &Path) -> std::result::Result<IndexMap<String, String>, String> {
    let content =
        std::fs::read_to_string(path).map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter_map(|l| l.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect())
}

/// Resolve credential, namespace and API host from every source.
pub fn resolve_client_config(sources: &ConfigSources) -> Result<ClientConfig> {
    let mut cfg = ClientConfig::default();

    if let Some(doc) = sources.deployment {
        let (auth, ns, host) = deployment_values(doc);
        cfg.auth.offer(&auth, SOURCE_DEPLOYMENT);
        cfg.namespace.offer(&ns, SOURCE_DEPLOYMENT);
        cfg.api_host.offer(&host, SOURCE_DEPLOYMENT);
    }
    if let Some(doc) = sources.manifest {
        let (auth, ns, host) = manifest_values(doc);
        cfg.auth.offer(&auth, SOURCE_MANIFEST);
        cfg.namespace.offer(&ns, SOURCE_MANIFEST);
        cfg.api_host.offer(&host, SOURCE_MANIFEST);
    }

    let cli = &sources.cli;
    cfg.auth.offer(cli.auth.as_deref().unwrap_or_default(), SOURCE_CLI);
    cfg.namespace.offer(cli.namespace.as_deref().unwrap_or_default(), SOURCE_CLI);
    cfg.api_host.offer(cli.api_host.as_deref().unwrap_or_default(), SOURCE_CLI);

    let props_path = sources.props_path.clone().or_else(default_props_path);
    if let Some(path) = props_path.filter(|p| p.is_file()) {
        let props = read_props(&path).map_err(Error::InvalidConfig)?;
        let get = |k: &str| props.get(k).map(String::as_str).unwrap_or_default();
        cfg.auth.offer(get("AUTH"), SOURCE_PROPS);
        cfg.namespace.offer(get("NAMESPACE"), SOURCE_PROPS);
        cfg.api_host.offer(get("APIHOST"), SOURCE_PROPS);
        if let Some(token) = props.get("APIGW_ACCESS_TOKEN").filter(|t| !t.is_empty()) {
            cfg.apigw_token = Some(token.clone());
        }
    }

    let env = |k: &str| std::env::var(k).unwrap_or_default();
    cfg.auth.offer(&env(ENV_API_KEY), SOURCE_ENV);
    cfg.namespace.offer(&env(ENV_NAMESPACE), SOURCE_ENV);
    cfg.api_host.offer(&env(ENV_API_HOST), SOURCE_ENV);

    if cfg.auth.is_set() && cfg.api_host.is_set() {
        cfg.namespace.offer(DEFAULT_NAMESPACE, SOURCE_DEFAULT);
    }

    if !cfg.auth.is_set() || !cfg.api_host.is_set() {
        return Err(Error::InvalidConfig(describe(&cfg)));
    }
    tracing::info!("{}", describe(&cfg).replace('\n', "; "));
    Ok(cfg)
}

fn describe(cfg: &ClientConfig) -> String {
    let line = |name: &str, v: &PropertyValue, secret: bool| {
        if !v.is_set() {
            format!("  {}: <not set>", name)
        } else if secret {
            format!("  {}: ******** (from {})", name, v.source)
        } else {
            format!("  {}: {} (from {})", name, v.value, v.source)
        }
    };
    [
        line("apihost", &cfg.api_host, false),
        line("auth", &cfg.auth, true),
        line("namespace", &cfg.namespace, false),
    ]
    .join("\n")
}

fn deployment_values(doc: &DeploymentYaml) -> (String, String, String) {
    let mut values = (String::new(), String::new(), String::new());
    if let Some(p) = &doc.project {
        values = (p.credential.clone(), p.namespace.clone(), p.api_host.clone());
    }
    for pkg in parser::deployment_packages(doc).values() {
        fill(&mut values, &pkg.credential, &pkg.namespace, &pkg.api_host);
    }
    values
}

fn manifest_values(doc: &ManifestYaml) -> (String, String, String) {
    let mut values = (String::new(), String::new(), String::new());
    if let Some(p) = &doc.project {
        values = (p.credential.clone(), p.namespace.clone(), p.api_host.clone());
    }
    for pkg in parser::manifest_packages(doc).values() {
        fill(&mut values, &pkg.credential, &pkg.namespace, &pkg.api_host);
    }
    values
}

fn fill(values: &mut (String, String, String), auth: &str, ns: &str, host: &str) {
    for (slot, v) in [(&mut values.0, auth), (&mut values.1, ns), (&mut values.2, host)] {
        if slot.is_empty() && !v.is_empty() {
            *slot = v.to_string();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const NO_ENV: [(&str, Option<&str>); 4] = [
        (ENV_API_KEY, None),
        (ENV_NAMESPACE, None),
        (ENV_API_HOST, None),
        (ENV_CONFIG_FILE, None),
    ];

    fn props(dir: &Path, content: &str) -> PathBuf {
        let path = dir.join("wskprops");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_wd010_read_props() {
        let dir = tempfile::tempdir().unwrap();
        let path = props(dir.path(), "# comment\nAUTH=user:pass\n\nAPIHOST = host.example\nJUNK\n");
        let map = read_props(&path).unwrap();
        assert_eq!(map["AUTH"], "user:pass");
        assert_eq!(map["APIHOST"], "host.example");
        assert_eq!(map.len(), 2);
    }

    #[test]
    #[serial]
    fn test_wd010_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let path = props(dir.path(), "AUTH=props:auth\nAPIHOST=props.host\nNAMESPACE=props-ns\n");
        let manifest = parser::parse_manifest(
            "project:\n  name: p\n  namespace: manifest-ns\n  apiHost: manifest.host\n",
            "m.yaml",
        )
        .unwrap();
        let deployment = parser::parse_deployment("project:\n  namespace: deploy-ns\n", "d.yaml").unwrap();
        temp_env::with_vars(NO_ENV, || {
            let sources = ConfigSources {
                deployment: Some(&deployment),
                manifest: Some(&manifest),
                cli: CliCredentials {
                    auth: Some("cli:auth".into()),
                    namespace: Some("cli-ns".into()),
                    api_host: Some("cli.host".into()),
                },
                props_path: Some(path.clone()),
            };
            let cfg = resolve_client_config(&sources).unwrap();
            assert_eq!(cfg.namespace.value, "deploy-ns");
            assert_eq!(cfg.namespace.source, SOURCE_DEPLOYMENT);
            assert_eq!(cfg.api_host.value, "manifest.host");
            assert_eq!(cfg.auth.value, "cli:auth");
            assert_eq!(cfg.auth.source, SOURCE_CLI);
        });
    }

    #[test]
    #[serial]
    fn test_wd010_props_then_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = props(dir.path(), "AUTH=props:auth\nAPIGW_ACCESS_TOKEN=tok\n");
        temp_env::with_vars(
            [
                (ENV_API_KEY, Some("env:auth")),
                (ENV_API_HOST, Some("env.host")),
                (ENV_NAMESPACE, None),
                (ENV_CONFIG_FILE, None),
            ],
            || {
                let sources = ConfigSources {
                    props_path: Some(path.clone()),
                    ..Default::default()
                };
                let cfg = resolve_client_config(&sources).unwrap();
                assert_eq!(cfg.auth.value, "props:auth");
                assert_eq!(cfg.auth.source, SOURCE_PROPS);
                assert_eq!(cfg.api_host.value, "env.host");
                assert_eq!(cfg.api_host.source, SOURCE_ENV);
                assert_eq!(cfg.namespace.value, DEFAULT_NAMESPACE);
                assert_eq!(cfg.namespace.source, SOURCE_DEFAULT);
                assert_eq!(cfg.apigw_token.as_deref(), Some("tok"));
            },
        );
    }

    #[test]
    #[serial]
    fn test_wd010_missing_values() {
        let dir = tempfile::tempdir().unwrap();
        temp_env::with_vars(NO_ENV, || {
            let sources = ConfigSources {
                props_path: Some(dir.path().join("absent")),
                cli: CliCredentials {
                    api_host: Some("cli.host".into()),
                    ..Default::default()
                },
                ..Default::default()
            };
            let err = resolve_client_config(&sources).unwrap_err();
            let msg = err.to_string();
            assert!(msg.contains("auth: <not set>"));
            assert!(msg.contains("cli.host (from command line)"));
        });
    }

    #[test]
    #[serial]
    fn test_wd010_config_file_env() {
        temp_env::with_var(ENV_CONFIG_FILE, Some("/tmp/custom-wskprops"), || {
            assert_eq!(default_props_path(), Some(PathBuf::from("/tmp/custom-wskprops")));
        });
    }
}
