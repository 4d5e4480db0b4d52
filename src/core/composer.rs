//! WD-005: Composition of manifest documents into the canonical entity graph.
//!
//! Walks a parsed manifest package by package: resolves inputs, infers
//! runtime kinds through the [`RuntimeCatalog`], expands sequences, and
//! merges everything into a [`DeploymentApplication`] under the duplicate
//! policy (error, or path-checked merge with `allow-defaults`).

use super::dependencies;
use super::error::{Error, Result};
use super::filesystem;
use super::manifest::*;
use super::params;
use super::parser;
use super::runtimes::RuntimeCatalog;
use super::types::*;
use super::webaction::{self, WebMode};
use crate::tripwire::managed::ManagedAnnotation;
use base64::Engine;
use indexmap::IndexMap;
use std::path::{Path, PathBuf};

/// Version assigned to packages that declare none.
pub const DEFAULT_VERSION: &str = "0.0.1";

/// License assigned to packages that declare none.
pub const DEFAULT_LICENSE: &str = "unlicensed";

/// Image used for `native` actions.
pub const SKELETON_IMAGE: &str = "openwhisk/dockerskeleton";

const HTTP_METHODS: [&str; 7] = ["GET", "PUT", "POST", "DELETE", "PATCH", "HEAD", "OPTIONS"];

/// Everything composition needs besides the document itself.
pub struct ComposeContext<'a> {
    pub namespace: String,
    /// Manifest file; relative source paths resolve against its directory.
    pub manifest_path: PathBuf,
    pub project_path: PathBuf,
    pub catalog: &'a RuntimeCatalog,
    pub allow_defaults: bool,
    /// Ownership marker stamped on every entity in managed mode.
    pub managed: Option<ManagedAnnotation>,
}

impl ComposeContext<'_> {
    pub fn file(&self) -> String {
        self.manifest_path.display().to_string()
    }

    fn manifest_dir(&self) -> PathBuf {
        match self.manifest_path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    pub fn stamp(&self, annotations: &mut Annotations) {
        if let Some(managed) = &self.managed {
            managed.stamp(annotations);
        }
    }
}

// ============================================================================
// Entry points
// ============================================================================

/// Compose a manifest into a fresh application. With `allow-defaults`,
/// filesystem-discovered actions are seeded into the root package first.
pub fn compose(doc: &ManifestYaml, ctx: &ComposeContext) -> Result<DeploymentApplication> {
    let mut app = DeploymentApplication::new(&ctx.namespace);
    app.project_name = doc
        .project
        .as_ref()
        .map(|p| p.name.clone())
        .filter(|n| !n.is_empty());

    if ctx.allow_defaults {
        let root = parser::manifest_packages(doc)
            .keys()
            .next()
            .cloned()
            .unwrap_or_else(|| DEFAULT_PACKAGE.to_string());
        seed_discovered(&mut app, &root, ctx)?;
    }
    compose_into(app, doc, ctx)
}

/// Compose a manifest on top of an existing application.
pub fn compose_into(
    mut app: DeploymentApplication,
    doc: &ManifestYaml,
    ctx: &ComposeContext,
) -> Result<DeploymentApplication> {
    for (name, pkg_yaml) in &parser::manifest_packages(doc) {
        let composed = compose_package(name, pkg_yaml, ctx)?;
        merge_package(&mut app, composed, ctx.allow_defaults)?;
    }
    validate(&app, &ctx.file())?;
    tracing::debug!(
        "composed {} package(s), {} action(s), {} sequence(s), {} trigger(s), {} rule(s)",
        app.packages.len(),
        app.action_count(),
        app.sequence_count(),
        app.trigger_count(),
        app.rule_count()
    );
    Ok(app)
}

fn seed_discovered(app: &mut DeploymentApplication, root: &str, ctx: &ComposeContext) -> Result<()> {
    let discovered = filesystem::discover_actions(&ctx.project_path, ctx.catalog)
        .map_err(|e| Error::file_read(&ctx.project_path, e))?;
    if discovered.is_empty() {
        return Ok(());
    }
    let package = base_package(root, ctx);
    let target = app
        .packages
        .entry(root.to_string())
        .or_insert_with(|| DeploymentPackage::new(package));
    for found in discovered {
        let code = std::fs::read_to_string(&found.path).map_err(|e| Error::file_read(&found.path, e))?;
        tracing::info!("discovered action [{}] at {}", found.name, found.path.display());
        let mut action = Action {
            name: found.name,
            exec: Exec {
                kind: found.kind,
                code: Some(code),
                ..Default::default()
            },
            source_path: Some(found.path),
            ..Default::default()
        };
        ctx.stamp(&mut action.annotations);
        insert_action(target, action, true)?;
    }
    Ok(())
}

fn base_package(name: &str, ctx: &ComposeContext) -> Package {
    let mut package = Package {
        name: name.to_string(),
        namespace: ctx.namespace.clone(),
        version: DEFAULT_VERSION.to_string(),
        license: DEFAULT_LICENSE.to_string(),
        ..Default::default()
    };
    if name != DEFAULT_PACKAGE {
        ctx.stamp(&mut package.annotations);
    }
    package
}

// ============================================================================
// Merge policy
// ============================================================================

fn merge_package(app: &mut DeploymentApplication, incoming: DeploymentPackage, allow_defaults: bool) -> Result<()> {
    let DeploymentPackage {
        package,
        actions,
        sequences,
        triggers,
        rules,
        dependencies,
        apis,
    } = incoming;
    let target = app
        .packages
        .entry(package.name.clone())
        .or_insert_with(|| DeploymentPackage::new(package.clone()));
    target.package = package;

    for (_, action) in actions {
        insert_action(target, action, allow_defaults)?;
    }
    for (_, sequence) in sequences {
        insert_sequence(target, sequence, allow_defaults)?;
    }
    for (name, trigger) in triggers {
        insert_unique(&mut target.triggers, "trigger", name, trigger)?;
    }
    for (name, rule) in rules {
        insert_unique(&mut target.rules, "rule", name, rule)?;
    }
    for (name, dependency) in dependencies {
        insert_unique(&mut target.dependencies, "dependency", name, dependency)?;
    }
    target.apis.extend(apis);
    Ok(())
}

/// Insert an action under the duplicate policy.
///
/// A second declaration is a `DuplicateEntity` error unless `allow_defaults`
/// is set; then it merges when both source paths agree or the incoming
/// declaration has none, and is a `Conflict` otherwise.
pub fn insert_action(target: &mut DeploymentPackage, action: Action, allow_defaults: bool) -> Result<()> {
    let name = action.name.clone();
    let prefix = target.entity_prefix();
    if target.sequences.contains_key(&name) {
        return Err(Error::Conflict {
            name: format!("{}{}", prefix, name),
            first: "sequence".to_string(),
            second: "action".to_string(),
        });
    }
    let Some(existing) = target.actions.get_mut(&name) else {
        target.actions.insert(name, action);
        return Ok(());
    };
    if !allow_defaults {
        return Err(Error::DuplicateEntity {
            kind: "action".to_string(),
            name: format!("{}{}", prefix, name),
        });
    }
    match (&existing.source_path, &action.source_path) {
        (_, None) => {}
        (Some(a), Some(b)) if a == b => {}
        (first, Some(second)) => {
            return Err(Error::Conflict {
                name,
                first: first
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "<no source>".to_string()),
                second: second.display().to_string(),
            });
        }
    }
    tracing::debug!("merging declarations of action [{}]", name);
    absorb(existing, action);
    Ok(())
}

/// Overlay a manifest declaration onto an existing (discovered) action.
fn absorb(existing: &mut Action, incoming: Action) {
    if !incoming.exec.kind.is_empty() {
        existing.exec = incoming.exec;
    }
    if incoming.source_path.is_some() {
        existing.source_path = incoming.source_path;
    }
    if !incoming.version.is_empty() {
        existing.version = incoming.version;
    }
    existing.parameters.extend(incoming.parameters);
    existing.annotations.extend(incoming.annotations);
    if incoming.limits.is_some() {
        existing.limits = incoming.limits;
    }
}

fn insert_sequence(target: &mut DeploymentPackage, sequence: Action, allow_defaults: bool) -> Result<()> {
    let name = sequence.name.clone();
    if target.actions.contains_key(&name) {
        return Err(Error::Conflict {
            name: format!("{}{}", target.entity_prefix(), name),
            first: "action".to_string(),
            second: "sequence".to_string(),
        });
    }
    if let Some(existing) = target.sequences.get(&name) {
        // Repeated declarations are tolerated only when they list the same components.
        if !allow_defaults || existing.exec.components != sequence.exec.components {
            return Err(Error::DuplicateEntity {
                kind: "sequence".to_string(),
                name: format!("{}{}", target.entity_prefix(), name),
            });
        }
        tracing::debug!("sequence [{}] declared again with the same components", name);
    }
    target.sequences.insert(name, sequence);
    Ok(())
}

fn insert_unique<T>(map: &mut IndexMap<String, T>, kind: &str, name: String, value: T) -> Result<()> {
    if map.contains_key(&name) {
        return Err(Error::DuplicateEntity {
            kind: kind.to_string(),
            name,
        });
    }
    map.insert(name, value);
    Ok(())
}

fn validate(app: &DeploymentApplication, file: &str) -> Result<()> {
    for pkg in app.packages.values() {
        for action in pkg.actions.values() {
            if action.exec.kind.is_empty() {
                return Err(Error::validation(
                    file,
                    format!(
                        "action [{}{}] has no function, code or docker image",
                        pkg.entity_prefix(),
                        action.name
                    ),
                ));
            }
        }
    }
    Ok(())
}

// ============================================================================
// Packages
// ============================================================================

/// Compose one package declaration with everything it owns.
pub fn compose_package(name: &str, yaml: &PackageYaml, ctx: &ComposeContext) -> Result<DeploymentPackage> {
    let file = ctx.file();
    let is_default = name == DEFAULT_PACKAGE;

    let version = if yaml.version.is_empty() {
        if !is_default {
            tracing::warn!("package [{}] has no version; using {}", name, DEFAULT_VERSION);
        }
        DEFAULT_VERSION.to_string()
    } else {
        yaml.version.clone()
    };
    let license = if yaml.license.is_empty() {
        DEFAULT_LICENSE.to_string()
    } else {
        yaml.license.clone()
    };
    let namespace = if yaml.namespace.is_empty() {
        ctx.namespace.clone()
    } else {
        params::interpolate(&yaml.namespace)
    };

    let mut package = Package {
        name: name.to_string(),
        namespace,
        version,
        license,
        publish: yaml.public.unwrap_or(false),
        parameters: params::resolve_all(&yaml.inputs, &file)?,
        annotations: to_annotations(&yaml.annotations),
        binding: None,
    };
    if !is_default {
        ctx.stamp(&mut package.annotations);
    }

    let mut pkg = DeploymentPackage::new(package);
    for (dep_name, dep_yaml) in &yaml.dependencies {
        let dep = dependencies::from_yaml(dep_name, dep_yaml, &file)?;
        pkg.dependencies.insert(dep_name.clone(), dep);
    }
    for (action_name, action_yaml) in &yaml.actions {
        let action = compose_action(action_name, action_yaml, ctx)?;
        pkg.actions.insert(action_name.clone(), action);
    }
    for (seq_name, seq_yaml) in &yaml.sequences {
        if pkg.actions.contains_key(seq_name) {
            return Err(Error::Conflict {
                name: format!("{}{}", pkg.entity_prefix(), seq_name),
                first: "action".to_string(),
                second: "sequence".to_string(),
            });
        }
        let sequence = compose_sequence(seq_name, seq_yaml, name, ctx)?;
        pkg.sequences.insert(seq_name.clone(), sequence);
    }
    for (trigger_name, trigger_yaml) in &yaml.triggers {
        let trigger = compose_trigger(trigger_name, trigger_yaml, ctx)?;
        pkg.triggers.insert(trigger_name.clone(), trigger);
    }
    for (rule_name, rule_yaml) in &yaml.rules {
        let rule = compose_rule(rule_name, rule_yaml, name, ctx)?;
        pkg.rules.insert(rule_name.clone(), rule);
    }
    compose_apis(&mut pkg, &yaml.apis, &file)?;
    if !yaml.feeds.is_empty() {
        tracing::debug!("package [{}]: {} feed declaration(s) ignored", name, yaml.feeds.len());
    }
    Ok(pkg)
}

fn to_annotations(raw: &RawAnnotations) -> Annotations {
    raw.iter()
        .map(|(k, v)| (k.clone(), params::yaml_to_json(v, true)))
        .collect()
}

// ============================================================================
// Actions
// ============================================================================

/// Compose one action declaration.
pub fn compose_action(name: &str, yaml: &ActionYaml, ctx: &ComposeContext) -> Result<Action> {
    let file = ctx.file();
    let parameters = params::resolve_all(&yaml.inputs, &file)?;
    // Outputs are declarative only; resolving them still validates their types.
    params::resolve_all(&yaml.outputs, &file)?;

    let (mut exec, source_path) = compose_exec(name, yaml, ctx)?;
    if !yaml.main.is_empty() {
        exec.main = Some(yaml.main.clone());
    } else if !exec.kind.is_empty() && ctx.catalog.requires_main(&exec.kind) {
        return Err(Error::validation(
            &file,
            format!("action [{}] of kind [{}] requires `main`", name, exec.kind),
        ));
    }

    let mut annotations = to_annotations(&yaml.annotations);
    if yaml.conductor {
        annotations.insert("conductor".to_string(), serde_json::Value::Bool(true));
    }
    if let Some(mode) = yaml.web_mode() {
        webaction::apply(&mut annotations, mode, name, &file)?;
    }
    ctx.stamp(&mut annotations);

    Ok(Action {
        name: name.to_string(),
        version: yaml.version.clone(),
        publish: false,
        exec,
        parameters,
        annotations,
        limits: yaml.limits.as_ref().and_then(|l| compose_limits(name, l)),
        source_path,
    })
}

fn compose_exec(name: &str, yaml: &ActionYaml, ctx: &ComposeContext) -> Result<(Exec, Option<PathBuf>)> {
    let file = ctx.file();
    let runtime = params::interpolate(&yaml.runtime);
    let source = yaml.source().map(params::interpolate);

    if !yaml.docker.is_empty() {
        if let Some(src) = &source {
            tracing::warn!("action [{}]: docker image set, ignoring function {}", name, src);
        }
        let exec = Exec {
            kind: "blackbox".to_string(),
            image: Some(params::interpolate(&yaml.docker)),
            ..Default::default()
        };
        return Ok((exec, None));
    }

    if yaml.native {
        let mut exec = Exec {
            kind: "blackbox".to_string(),
            image: Some(SKELETON_IMAGE.to_string()),
            ..Default::default()
        };
        let mut path = None;
        if let Some(src) = source {
            let resolved = filesystem::normalize(&ctx.manifest_dir().join(src));
            exec.code = Some(encode_binary(&resolved, yaml)?);
            exec.binary = true;
            path = Some(resolved);
        }
        return Ok((exec, path));
    }

    if let Some(src) = source {
        let resolved = filesystem::normalize(&ctx.manifest_dir().join(src));
        let exec = exec_from_path(name, &resolved, &runtime, yaml, ctx)?;
        return Ok((exec, Some(resolved)));
    }

    if !yaml.code.is_empty() {
        if runtime.is_empty() {
            return Err(Error::validation(
                &file,
                format!("action [{}] has inline code but no runtime", name),
            ));
        }
        let kind = supported_kind(name, &runtime, ctx)?;
        let exec = Exec {
            kind,
            code: Some(yaml.code.clone()),
            ..Default::default()
        };
        return Ok((exec, None));
    }

    // No source: only valid when it merges with a discovered action.
    Ok((Exec::default(), None))
}

fn exec_from_path(
    name: &str,
    path: &Path,
    runtime: &str,
    yaml: &ActionYaml,
    ctx: &ComposeContext,
) -> Result<Exec> {
    if !path.exists() {
        return Err(Error::file_read(path, "no such file or directory"));
    }
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_lowercase();

    if path.is_dir() || ext == "zip" || ext == "jar" {
        let kind = if !runtime.is_empty() {
            supported_kind(name, runtime, ctx)?
        } else if ext == "jar" {
            ctx.catalog.kind_for_extension("jar").ok_or_else(|| {
                Error::validation(&ctx.file(), format!("no java runtime available for action [{}]", name))
            })?
        } else {
            return Err(Error::validation(
                &ctx.file(),
                format!("action [{}] from {} needs a runtime", name, path.display()),
            ));
        };
        return Ok(Exec {
            kind,
            code: Some(encode_binary(path, yaml)?),
            binary: true,
            ..Default::default()
        });
    }

    let code = std::fs::read_to_string(path).map_err(|e| Error::file_read(path, e))?;
    Ok(Exec {
        kind: infer_kind(name, &ext, runtime, path, ctx)?,
        code: Some(code),
        ..Default::default()
    })
}

/// Base64 code of a zip archive, jar, or directory (zipped on the fly).
fn encode_binary(path: &Path, yaml: &ActionYaml) -> Result<String> {
    let bytes = if path.is_dir() {
        filesystem::zip_directory(path, &yaml.include, &yaml.exclude)
            .map_err(|e| Error::file_read(path, e))?
    } else {
        std::fs::read(path).map_err(|e| Error::file_read(path, e))?
    };
    Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
}

/// Runtime kind for a source file: the explicit runtime when it is supported
/// and fits the extension, otherwise the extension's default.
fn infer_kind(name: &str, ext: &str, runtime: &str, path: &Path, ctx: &ComposeContext) -> Result<String> {
    let by_extension = ctx.catalog.kind_for_extension(ext);
    if !runtime.is_empty() {
        if ctx.catalog.is_supported(runtime) && ctx.catalog.extension_matches(ext, runtime) {
            return Ok(ctx.catalog.canonical_kind(runtime));
        }
        if let Some(kind) = by_extension {
            tracing::warn!(
                "action [{}]: runtime [{}] is not valid for .{} sources; using [{}]",
                name,
                runtime,
                ext,
                kind
            );
            return Ok(kind);
        }
        return supported_kind(name, runtime, ctx);
    }
    by_extension.ok_or_else(|| {
        Error::validation(
            &ctx.file(),
            format!(
                "cannot infer a runtime for action [{}] from {}; set `runtime`",
                name,
                path.display()
            ),
        )
    })
}

fn supported_kind(name: &str, runtime: &str, ctx: &ComposeContext) -> Result<String> {
    if ctx.catalog.is_supported(runtime) {
        Ok(ctx.catalog.canonical_kind(runtime))
    } else {
        Err(Error::validation(
            &ctx.file(),
            format!("action [{}] uses unsupported runtime [{}]", name, runtime),
        ))
    }
}

/// Keep in-range limits, warn about the rest.
fn compose_limits(name: &str, yaml: &LimitsYaml) -> Option<Limits> {
    let limits = Limits {
        timeout: in_range(name, "timeout", yaml.timeout, 100, 300_000),
        memory: in_range(name, "memorySize", yaml.memory_size, 128, 512),
        logs: in_range(name, "logSize", yaml.log_size, 0, 10),
    };
    let ignored = [
        ("concurrentActivations", yaml.concurrent_activations),
        ("userInvocationRate", yaml.user_invocation_rate),
        ("codeSize", yaml.code_size),
        ("parameterSize", yaml.parameter_size),
    ];
    for (key, value) in ignored {
        if value.is_some() {
            tracing::warn!("action [{}]: limit [{}] is not configurable and is ignored", name, key);
        }
    }
    (!limits.is_empty()).then_some(limits)
}

fn in_range(name: &str, key: &str, value: Option<u64>, min: u64, max: u64) -> Option<u64> {
    let v = value?;
    if (min..=max).contains(&v) {
        Some(v)
    } else {
        tracing::warn!(
            "action [{}]: limit [{}] = {} outside {}..={}; using platform default",
            name,
            key,
            v,
            min,
            max
        );
        None
    }
}

// ============================================================================
// Sequences, triggers, rules
// ============================================================================

/// Compose a sequence; components become `/namespace/package/action` in order.
pub fn compose_sequence(name: &str, yaml: &SequenceYaml, package: &str, ctx: &ComposeContext) -> Result<Action> {
    let components: Vec<String> = yaml
        .actions
        .split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(|c| qualify(&package_relative(c, package), &ctx.namespace))
        .collect();
    if components.is_empty() {
        return Err(Error::validation(
            &ctx.file(),
            format!("sequence [{}] lists no actions", name),
        ));
    }

    let mut annotations = to_annotations(&yaml.annotations);
    if let Some(mode) = &yaml.web_export {
        webaction::apply(&mut annotations, mode, name, &ctx.file())?;
    }
    ctx.stamp(&mut annotations);

    Ok(Action {
        name: name.to_string(),
        exec: Exec {
            kind: "sequence".to_string(),
            components,
            ..Default::default()
        },
        annotations,
        ..Default::default()
    })
}

fn compose_trigger(name: &str, yaml: &TriggerYaml, ctx: &ComposeContext) -> Result<Trigger> {
    let feed = if !yaml.feed.is_empty() {
        Some(params::interpolate(&yaml.feed))
    } else if !yaml.source.is_empty() {
        tracing::warn!("trigger [{}]: `source` is deprecated; use `feed`", name);
        Some(params::interpolate(&yaml.source))
    } else {
        None
    };

    let mut annotations = to_annotations(&yaml.annotations);
    if let Some(feed) = &feed {
        annotations.insert("feed".to_string(), serde_json::Value::String(feed.clone()));
    }
    ctx.stamp(&mut annotations);

    Ok(Trigger {
        name: name.to_string(),
        namespace: if yaml.namespace.is_empty() {
            ctx.namespace.clone()
        } else {
            yaml.namespace.clone()
        },
        feed,
        parameters: params::resolve_all(&yaml.inputs, &ctx.file())?,
        annotations,
    })
}

fn compose_rule(name: &str, yaml: &RuleYaml, package: &str, ctx: &ComposeContext) -> Result<Rule> {
    if yaml.trigger.is_empty() || yaml.action.is_empty() {
        return Err(Error::validation(
            &ctx.file(),
            format!("rule [{}] needs both a trigger and an action", name),
        ));
    }
    let mut annotations = to_annotations(&yaml.annotations);
    ctx.stamp(&mut annotations);
    Ok(Rule {
        name: name.to_string(),
        trigger: yaml.trigger.clone(),
        action: package_relative(&yaml.action, package),
        enabled: true,
        annotations,
    })
}

// ============================================================================
// APIs
// ============================================================================

fn compose_apis(pkg: &mut DeploymentPackage, apis: &IndexMap<String, ApiYaml>, file: &str) -> Result<()> {
    let package = pkg.package.name.clone();
    for (api_name, base_paths) in apis {
        for (base_path, rel_paths) in base_paths {
            for (rel_path, actions) in rel_paths {
                for (action_name, route) in actions {
                    let method = route.method.to_uppercase();
                    if !HTTP_METHODS.contains(&method.as_str()) {
                        return Err(Error::validation(
                            file,
                            format!("api [{}] uses invalid HTTP method [{}]", api_name, route.method),
                        ));
                    }
                    let action = match pkg.actions.get_mut(action_name) {
                        Some(a) => a,
                        None => pkg.sequences.get_mut(action_name).ok_or_else(|| {
                            Error::validation(
                                file,
                                format!("api [{}] references unknown action [{}]", api_name, action_name),
                            )
                        })?,
                    };
                    if !action.is_web() {
                        tracing::warn!(
                            "action [{}] is exposed by api [{}]; marking it as a web action",
                            action_name,
                            api_name
                        );
                        webaction::set_mode(&mut action.annotations, WebMode::Enabled);
                    }
                    pkg.apis.push(ApiRoute {
                        api_name: api_name.clone(),
                        base_path: leading_slash(base_path),
                        rel_path: leading_slash(rel_path),
                        method,
                        action: package_relative(action_name, &package),
                        response: if route.response.is_empty() {
                            "json".to_string()
                        } else {
                            route.response.clone()
                        },
                    });
                }
            }
        }
    }
    Ok(())
}

fn leading_slash(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}
