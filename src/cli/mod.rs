//! WD-017: CLI subcommands (init, add, deploy, sync, undeploy, export, report, version).

pub mod export;
pub mod report;
pub mod scaffold;

use crate::client::http::HttpClient;
use crate::client::WhiskClient;
use crate::core::config::{self, CliCredentials, ClientConfig, ConfigSources};
use crate::core::dependencies::GithubFetcher;
use crate::core::executor::{self, ExecConfig};
use crate::core::pipeline::{self, PipelineOptions, Prepared};
use crate::core::{parser, planner, types::*};
use crate::tripwire::drift;
use clap::{Args, Subcommand};
use std::collections::BTreeSet;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;

/// Where the project lives and how to treat it.
#[derive(Args, Debug, Clone, Default)]
pub struct ProjectArgs {
    /// Project directory
    #[arg(short = 'p', long = "project", default_value = ".")]
    pub project_path: PathBuf,

    /// Manifest file (default: manifest.yaml|yml in the project directory)
    #[arg(short, long)]
    pub manifest: Option<PathBuf>,

    /// Deployment file (default: deployment.yaml|yml in the project directory)
    #[arg(short, long)]
    pub deployment: Option<PathBuf>,

    /// Deploy source files found in the project directory as actions
    #[arg(long)]
    pub allow_defaults: bool,

    /// Show the plan and ask before changing anything
    #[arg(short = 'i', long)]
    pub allow_interactive: bool,

    /// Mark entities as owned by the project and remove ones it no longer declares
    #[arg(long)]
    pub managed: bool,

    /// Project name (overrides the manifest)
    #[arg(long = "projectname")]
    pub project_name: Option<String>,
}

/// Platform connection settings.
#[derive(Args, Debug, Clone, Default)]
pub struct ClientArgs {
    /// Authorization key (user:password)
    #[arg(short = 'u', long)]
    pub auth: Option<String>,

    /// Namespace
    #[arg(short, long)]
    pub namespace: Option<String>,

    /// API host
    #[arg(long = "apihost")]
    pub api_host: Option<String>,

    /// Properties file (default: $WSK_CONFIG_FILE or ~/.wskprops)
    #[arg(short = 'c', long = "config")]
    pub props_path: Option<PathBuf>,

    /// HTTP request timeout in seconds
    #[arg(short, long, default_value_t = 30)]
    pub timeout: u64,

    /// Skip TLS certificate verification
    #[arg(long)]
    pub insecure: bool,
}

impl ClientArgs {
    pub(crate) fn credentials(&self) -> CliCredentials {
        CliCredentials {
            auth: self.auth.clone(),
            namespace: self.namespace.clone(),
            api_host: self.api_host.clone(),
        }
    }

    pub(crate) fn connect(&self, cfg: &ClientConfig) -> Result<HttpClient, String> {
        HttpClient::new(cfg, self.insecure, Duration::from_secs(self.timeout))
            .map_err(|e| format!("cannot create client: {}", e))
    }
}

#[derive(Subcommand, Debug)]
pub enum AddEntity {
    /// Add an action and create actions/<name>/
    Action {
        name: String,
        /// Runtime kind
        #[arg(long, default_value = "nodejs:default")]
        runtime: String,
        /// Package to add to (default: the manifest's first package)
        #[arg(long)]
        package: Option<String>,
    },
    /// Add a trigger
    Trigger {
        name: String,
        /// Feed action
        #[arg(long)]
        feed: Option<String>,
        #[arg(long)]
        package: Option<String>,
    },
    /// Add a rule linking a trigger to an action
    Rule {
        name: String,
        #[arg(long)]
        trigger: String,
        #[arg(long)]
        action: String,
        #[arg(long)]
        package: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a starter manifest.yaml and actions/ directory
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Add an entity to an existing manifest
    Add {
        #[command(subcommand)]
        entity: AddEntity,

        /// Manifest to edit
        #[arg(short, long, default_value = "manifest.yaml", global = true)]
        manifest: PathBuf,
    },

    /// Deploy the project
    Deploy {
        #[command(flatten)]
        project: ProjectArgs,

        #[command(flatten)]
        client: ClientArgs,

        /// Print the plan without deploying
        #[arg(long)]
        preview: bool,
    },

    /// Deploy as a managed project and remove entities it no longer declares
    Sync {
        #[command(flatten)]
        project: ProjectArgs,

        #[command(flatten)]
        client: ClientArgs,
    },

    /// Remove the project's entities
    Undeploy {
        #[command(flatten)]
        project: ProjectArgs,

        #[command(flatten)]
        client: ClientArgs,
    },

    /// Write a manifest and sources for a managed project
    Export {
        /// Managed project to export
        #[arg(long = "projectname")]
        project_name: String,

        /// Manifest to write
        #[arg(short, long, default_value = "manifest.yaml")]
        manifest: PathBuf,

        #[command(flatten)]
        client: ClientArgs,
    },

    /// List packages, actions, triggers and rules in the namespace
    Report {
        #[command(flatten)]
        client: ClientArgs,
    },

    /// Print version
    Version,
}

/// How a deploy run treats entities the project no longer declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployMode {
    Plain,
    Managed,
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands) -> Result<(), String> {
    match cmd {
        Commands::Init { path } => scaffold::cmd_init(&path),
        Commands::Add { entity, manifest } => scaffold::cmd_add(&manifest, &entity),
        Commands::Deploy {
            project,
            client,
            preview,
        } => cmd_deploy(&project, &client, preview),
        Commands::Sync { mut project, client } => {
            project.managed = true;
            cmd_deploy(&project, &client, false)
        }
        Commands::Undeploy { project, client } => cmd_undeploy(&project, &client),
        Commands::Export {
            project_name,
            manifest,
            client,
        } => export::cmd_export(&project_name, &manifest, &client),
        Commands::Report { client } => report::cmd_report(&client),
        Commands::Version => {
            println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn pipeline_options(project: &ProjectArgs, client: &ClientArgs) -> PipelineOptions {
    PipelineOptions {
        project_path: project.project_path.clone(),
        manifest: project.manifest.clone(),
        deployment: project.deployment.clone(),
        allow_defaults: project.allow_defaults,
        managed: project.managed,
        project_name: project.project_name.clone(),
        cli: client.credentials(),
        props_path: client.props_path.clone(),
        refresh_runtimes: true,
        insecure: client.insecure,
    }
}

/// Configuration from flags, properties and environment, plus the manifest if one is found.
fn standalone_config(project: &ProjectArgs, client: &ClientArgs) -> Result<ClientConfig, String> {
    let opts = pipeline_options(project, client);
    let manifest = match pipeline::locate_manifest(&opts) {
        Ok(path) => Some(parser::parse_manifest_file(&path).map_err(|e| e.to_string())?),
        Err(_) => None,
    };
    config::resolve_client_config(&ConfigSources {
        deployment: None,
        manifest: manifest.as_ref(),
        cli: client.credentials(),
        props_path: client.props_path.clone(),
    })
    .map_err(|e| e.to_string())
}

/// Configuration from flags, properties and environment only.
pub(crate) fn client_config(client: &ClientArgs) -> Result<ClientConfig, String> {
    config::resolve_client_config(&ConfigSources {
        deployment: None,
        manifest: None,
        cli: client.credentials(),
        props_path: client.props_path.clone(),
    })
    .map_err(|e| e.to_string())
}

fn cmd_deploy(project: &ProjectArgs, client_args: &ClientArgs, preview: bool) -> Result<(), String> {
    let prepared = pipeline::prepare(&pipeline_options(project, client_args), &GithubFetcher)
        .map_err(|e| e.to_string())?;
    let client = client_args.connect(&prepared.config)?;
    let mode = if project.managed { DeployMode::Managed } else { DeployMode::Plain };
    let stdin = std::io::stdin();
    let mut input = stdin.lock();
    let mut output = std::io::stdout();
    let report = run_deploy(
        &prepared,
        &client,
        mode,
        project.allow_interactive || preview,
        preview,
        &mut input,
        &mut output,
    )
    .map_err(|e| e.to_string())?;
    if !preview {
        print_report("Deployment", &report);
    }
    Ok(())
}

/// Plan, optionally confirm, and execute a deployment against `client`.
///
/// Before confirmation only listings are issued (reconciliation and the
/// plan's view of remote names); nothing is written until the prompt is
/// accepted. Reconciliation failures abort before any mutation; per-entity
/// failures are recorded in the returned report.
pub fn run_deploy(
    prepared: &Prepared,
    client: &dyn WhiskClient,
    mode: DeployMode,
    interactive: bool,
    preview: bool,
    input: &mut dyn BufRead,
    output: &mut dyn Write,
) -> crate::core::error::Result<DeployReport> {
    let app = &prepared.app;
    let deletes = match mode {
        DeployMode::Managed => drift::reconcile(client, app)?,
        DeployMode::Plain => Vec::new(),
    };
    let cfg = ExecConfig::new(client, &prepared.config.auth.value);
    let execute = || match mode {
        DeployMode::Managed => executor::sync(app, &deletes, &cfg),
        DeployMode::Plain => executor::deploy(app, &cfg),
    };

    if !interactive {
        return Ok(execute());
    }
    let existing = remote_keys(client);
    let plan = planner::plan(app, &existing, &deletes);
    if preview {
        planner::write_plan(output, &plan).map_err(|e| crate::core::error::Error::validation("stdout", e.to_string()))?;
        return Ok(DeployReport::default());
    }
    Ok(executor::with_confirmation(&plan, input, output, execute))
}

/// Names already present remotely; an unreachable platform yields an empty set.
fn remote_keys(client: &dyn WhiskClient) -> BTreeSet<(EntityKind, String)> {
    match drift::list_remote(client) {
        Ok(entities) => entities
            .into_iter()
            .filter_map(|e| Some((e.kind?, e.relative_name())))
            .collect(),
        Err(e) => {
            tracing::warn!("cannot list remote entities: {}", e);
            BTreeSet::new()
        }
    }
}

fn cmd_undeploy(project: &ProjectArgs, client_args: &ClientArgs) -> Result<(), String> {
    if let Some(name) = project.project_name.as_deref().filter(|n| !n.is_empty()) {
        let cfg = standalone_config(project, client_args)?;
        let client = client_args.connect(&cfg)?;
        let report = undeploy_project(&client, name, &cfg.auth.value).map_err(|e| e.to_string())?;
        print_report("Undeployment", &report);
        return Ok(());
    }
    let prepared = pipeline::prepare(&pipeline_options(project, client_args), &GithubFetcher)
        .map_err(|e| e.to_string())?;
    let client = client_args.connect(&prepared.config)?;
    let cfg = ExecConfig::new(&client, &prepared.config.auth.value);
    let report = executor::undeploy(&prepared.app, &cfg);
    print_report("Undeployment", &report);
    Ok(())
}

/// Remove every remote entity owned by `project`.
pub fn undeploy_project(
    client: &dyn WhiskClient,
    project: &str,
    auth_key: &str,
) -> crate::core::error::Result<DeployReport> {
    let ops = drift::project_deletes(client, project)?;
    if ops.is_empty() {
        tracing::info!("project [{}] owns no remote entities", project);
    }
    let cfg = ExecConfig::new(client, auth_key);
    Ok(executor::delete_batch(&ops, &cfg))
}

/// Print a run summary to stdout.
fn print_report(what: &str, report: &DeployReport) {
    if report.cancelled {
        println!("{} cancelled.", what);
        return;
    }
    for failure in &report.failures {
        println!("  FAILED {} {}: {}", failure.label, failure.name, failure.error);
    }
    println!(
        "{} summary: {} deployed, {} removed, {} failed.",
        what,
        report.succeeded,
        report.deleted,
        report.failures.len()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::memory::MemoryClient;
    use crate::client::RemoteEntity;
    use crate::core::config::PropertyValue;
    use crate::tripwire::managed::ManagedAnnotation;

    fn prepared(project: &str) -> Prepared {
        let mut app = DeploymentApplication::new("guest");
        app.project_name = Some(project.into());
        let marker = ManagedAnnotation::new(project, "h2", "manifest.yaml");
        let mut pkg = DeploymentPackage::new(Package {
            name: "p".into(),
            ..Default::default()
        });
        marker.stamp(&mut pkg.package.annotations);
        let mut action = Action {
            name: "a".into(),
            ..Default::default()
        };
        marker.stamp(&mut action.annotations);
        pkg.actions.insert("a".into(), action);
        app.packages.insert("p".into(), pkg);
        Prepared {
            app,
            config: ClientConfig {
                auth: PropertyValue {
                    value: "user:pass".into(),
                    source: "test".into(),
                },
                ..Default::default()
            },
            manifest_path: PathBuf::from("manifest.yaml"),
            managed: Some(marker),
        }
    }

    fn owned(client: &MemoryClient, kind: EntityKind, ns: &str, name: &str) {
        let mut e = RemoteEntity::new(kind, ns, name);
        ManagedAnnotation::new("demo", "h1", "manifest.yaml").stamp(&mut e.annotations);
        client.seed(e);
    }

    #[test]
    fn test_wd017_managed_deploy_removes_stale() {
        let client = MemoryClient::new("guest");
        owned(&client, EntityKind::Package, "guest", "p");
        owned(&client, EntityKind::Action, "guest/p", "a");
        owned(&client, EntityKind::Action, "guest/p", "b");
        let mut input = std::io::empty();
        let mut output = Vec::new();
        let report = run_deploy(
            &prepared("demo"),
            &client,
            DeployMode::Managed,
            false,
            false,
            &mut input,
            &mut output,
        )
        .unwrap();
        assert!(report.is_clean());
        assert_eq!(report.deleted, 1);
        assert_eq!(client.names(EntityKind::Action), vec!["p/a"]);
        let calls = client.calls();
        assert_eq!(calls.last().map(String::as_str), Some("DELETE action p/b"));
    }

    #[test]
    fn test_wd017_preview_makes_no_calls() {
        let client = MemoryClient::new("guest");
        let mut input = std::io::empty();
        let mut output = Vec::new();
        let report = run_deploy(
            &prepared("demo"),
            &client,
            DeployMode::Plain,
            true,
            true,
            &mut input,
            &mut output,
        )
        .unwrap();
        assert_eq!(report.succeeded, 0);
        assert!(client.calls().is_empty());
        let text = String::from_utf8(output).unwrap();
        assert!(text.contains("+ action p/a"));
    }

    #[test]
    fn test_wd017_interactive_accept() {
        let client = MemoryClient::new("guest");
        let mut input = std::io::Cursor::new(b"yes\n".to_vec());
        let mut output = Vec::new();
        let report = run_deploy(
            &prepared("demo"),
            &client,
            DeployMode::Plain,
            true,
            false,
            &mut input,
            &mut output,
        )
        .unwrap();
        assert_eq!(report.succeeded, 2);
        assert!(!report.cancelled);
    }

    #[test]
    fn test_wd017_interactive_decline_only_reads() {
        let client = MemoryClient::new("guest");
        owned(&client, EntityKind::Package, "guest", "p");
        owned(&client, EntityKind::Action, "guest/p", "stale");
        let mut input = std::io::Cursor::new(b"n\n".to_vec());
        let mut output = Vec::new();
        let report = run_deploy(
            &prepared("demo"),
            &client,
            DeployMode::Managed,
            true,
            false,
            &mut input,
            &mut output,
        )
        .unwrap();
        assert!(report.cancelled);
        assert!(client.calls().is_empty());
        let reads = client.reads();
        assert!(!reads.is_empty());
        assert!(reads.iter().all(|r| r.starts_with("LIST ")));
        assert_eq!(client.names(EntityKind::Action), vec!["p/stale"]);
    }

    #[test]
    fn test_wd017_undeploy_project() {
        let client = MemoryClient::new("guest");
        owned(&client, EntityKind::Package, "guest", "p");
        owned(&client, EntityKind::Action, "guest/p", "a");
        client.seed(RemoteEntity::new(EntityKind::Action, "guest", "keep"));
        let report = undeploy_project(&client, "demo", "user:pass").unwrap();
        assert_eq!(report.deleted, 2);
        assert_eq!(client.names(EntityKind::Action), vec!["keep"]);
        assert!(client.names(EntityKind::Package).is_empty());
    }

    #[test]
    fn test_wd017_cli_parses() {
        use clap::Parser;

        #[derive(Parser)]
        struct Cli {
            #[command(subcommand)]
            command: Commands,
        }

        let cli = Cli::try_parse_from([
            "whiskdeploy",
            "deploy",
            "-m",
            "m.yaml",
            "--managed",
            "--projectname",
            "demo",
            "--apihost",
            "localhost",
        ])
        .unwrap();
        match cli.command {
            Commands::Deploy { project, client, preview } => {
                assert!(project.managed);
                assert_eq!(project.project_name.as_deref(), Some("demo"));
                assert_eq!(client.api_host.as_deref(), Some("localhost"));
                assert_eq!(client.timeout, 30);
                assert!(!preview);
            }
            other => panic!("unexpected {:?}", other),
        }

        let cli = Cli::try_parse_from(["whiskdeploy", "add", "rule", "r1", "--trigger", "t", "--action", "a"]).unwrap();
        assert!(matches!(cli.command, Commands::Add { entity: AddEntity::Rule { .. }, .. }));
    }
}
