//! WD-012: Executor for ordered remote mutations with retry.
//!
//! Deploy order: packages → actions → sequences → triggers → rules → APIs.
//! Undeploy runs the exact reverse. A terminal failure is recorded and the run
//! moves on to the next entity.

use super::error::Error;
use super::planner;
use super::retry::{self, CancelToken, RetryPolicy};
use super::types::*;
use crate::client::{ClientResult, WhiskClient};
use crate::tripwire::drift::{DeleteOp, DELETE_ORDER};
use serde_json::{json, Value};
use std::io::{BufRead, Write};

/// Prompt shown before an interactive deployment.
pub const DEPLOY_PROMPT: &str = "Do you really want to deploy this? (y/N): ";

/// Configuration for a deploy or undeploy run.
pub struct ExecConfig<'a> {
    pub client: &'a dyn WhiskClient,
    pub policy: RetryPolicy,
    pub token: CancelToken,
    /// Credential handed to feed actions.
    pub auth_key: String,
}

impl<'a> ExecConfig<'a> {
    pub fn new(client: &'a dyn WhiskClient, auth_key: &str) -> Self {
        Self {
            client,
            policy: RetryPolicy::default(),
            token: CancelToken::new(),
            auth_key: auth_key.to_string(),
        }
    }
}

/// Outcome of a single remote mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepOutcome {
    Done,
    /// Terminal failure, already recorded in the report.
    Failed,
    Cancelled,
}

/// Shared context for recording step outcomes.
struct RecordCtx<'a, 'b> {
    cfg: &'a ExecConfig<'b>,
    namespace: String,
    report: DeployReport,
}

impl<'a, 'b> RecordCtx<'a, 'b> {
    fn new(cfg: &'a ExecConfig<'b>, app_namespace: &str) -> Self {
        let namespace = if app_namespace.is_empty() {
            cfg.client.namespace().to_string()
        } else {
            app_namespace.to_string()
        };
        Self {
            cfg,
            namespace,
            report: DeployReport::default(),
        }
    }

    fn run(&mut self, label: &str, name: &str, op: impl FnMut() -> ClientResult<()>) -> StepOutcome {
        if self.report.cancelled {
            return StepOutcome::Cancelled;
        }
        let what = format!("{} [{}]", label, name);
        match retry::retry(&self.cfg.policy, &self.cfg.token, &what, op) {
            Ok(()) => StepOutcome::Done,
            Err(Error::Cancelled) => {
                tracing::warn!("{} cancelled", what);
                self.report.cancelled = true;
                StepOutcome::Cancelled
            }
            Err(e) => {
                tracing::error!("{} in namespace [{}]: {}", what, self.namespace, e);
                self.report.failures.push(EntityFailure {
                    label: label.to_string(),
                    name: name.to_string(),
                    error: e.to_string(),
                });
                StepOutcome::Failed
            }
        }
    }

    /// Create or update.
    fn put(&mut self, label: &str, name: &str, op: impl FnMut() -> ClientResult<()>) -> StepOutcome {
        let outcome = self.run(label, name, op);
        if outcome == StepOutcome::Done {
            tracing::info!("deployed {} [{}]", label, name);
            self.report.succeeded += 1;
        }
        outcome
    }

    /// Delete; an entity that is already gone counts as removed.
    fn remove(&mut self, label: &str, name: &str, mut op: impl FnMut() -> ClientResult<()>) -> StepOutcome {
        let outcome = self.run(label, name, || match op() {
            Err(e) if e.is_not_found() => {
                tracing::debug!("{} [{}] already absent", label, name);
                Ok(())
            }
            other => other,
        });
        if outcome == StepOutcome::Done {
            tracing::info!("removed {} [{}]", label, name);
            self.report.deleted += 1;
        }
        outcome
    }

    fn feed_params(&self, trigger: &str, event: &str, extra: &Parameters) -> Value {
        let mut params = serde_json::Map::new();
        for (k, p) in extra {
            params.insert(k.clone(), p.value.to_json());
        }
        params.insert("lifecycleEvent".into(), json!(event));
        params.insert("triggerName".into(), json!(qualify(trigger, &self.namespace)));
        params.insert("authKey".into(), json!(self.cfg.auth_key));
        Value::Object(params)
    }
}

/// Package argument for action calls: `None` for the default package.
fn owner(pkg: &DeploymentPackage) -> Option<&str> {
    (!pkg.is_default()).then_some(pkg.package.name.as_str())
}

/// Rule with trigger and action rewritten to qualified names.
pub fn qualified_rule(rule: &Rule, namespace: &str) -> Rule {
    Rule {
        trigger: qualify(&rule.trigger, namespace),
        action: qualify(&rule.action, namespace),
        ..rule.clone()
    }
}

/// Create or update every entity of the application.
pub fn deploy(app: &DeploymentApplication, cfg: &ExecConfig) -> DeployReport {
    let client = cfg.client;
    let mut ctx = RecordCtx::new(cfg, &app.namespace);

    for pkg in app.packages.values().filter(|p| !p.is_default()) {
        let label = if pkg.package.binding.is_some() { "binding" } else { "package" };
        ctx.put(label, &pkg.package.name, || client.put_package(&pkg.package));
    }

    for pkg in app.packages.values() {
        let prefix = pkg.entity_prefix();
        for action in pkg.actions.values() {
            let name = format!("{}{}", prefix, action.name);
            ctx.put("action", &name, || client.put_action(owner(pkg), action));
        }
    }

    for pkg in app.packages.values() {
        let prefix = pkg.entity_prefix();
        for seq in pkg.sequences.values() {
            let name = format!("{}{}", prefix, seq.name);
            ctx.put("sequence", &name, || client.put_action(owner(pkg), seq));
        }
    }

    for pkg in app.packages.values() {
        for trigger in pkg.triggers.values() {
            let outcome = ctx.put("trigger", &trigger.name, || client.put_trigger(trigger));
            if let (StepOutcome::Done, Some(feed)) = (outcome, &trigger.feed) {
                let feed = qualify(feed, &ctx.namespace);
                let params = ctx.feed_params(&trigger.name, "CREATE", &trigger.parameters);
                ctx.put("feed", &feed, || client.invoke_feed(&feed, &params));
            }
        }
    }

    for pkg in app.packages.values() {
        for rule in pkg.rules.values() {
            let wire = qualified_rule(rule, &ctx.namespace);
            let outcome = ctx.put("rule", &rule.name, || client.put_rule(&wire));
            if outcome == StepOutcome::Done {
                ctx.run("rule", &rule.name, || client.set_rule_state(&rule.name, rule.enabled));
            }
        }
    }

    for pkg in app.packages.values() {
        for api in &pkg.apis {
            let name = format!("{}{} {}", api.base_path, api.rel_path, api.method);
            ctx.put("api", &name, || client.put_api(api));
        }
    }

    ctx.report
}

/// Remove every entity of the application, in reverse deployment order.
pub fn undeploy(app: &DeploymentApplication, cfg: &ExecConfig) -> DeployReport {
    let client = cfg.client;
    let mut ctx = RecordCtx::new(cfg, &app.namespace);

    for pkg in app.packages.values() {
        for api in &pkg.apis {
            let name = format!("{}{} {}", api.base_path, api.rel_path, api.method);
            ctx.remove("api", &name, || client.delete_api(api));
        }
    }

    for pkg in app.packages.values() {
        for rule in pkg.rules.values() {
            ctx.remove("rule", &rule.name, || client.delete(EntityKind::Rule, &rule.name));
        }
    }

    for pkg in app.packages.values() {
        for trigger in pkg.triggers.values() {
            if let Some(feed) = &trigger.feed {
                let feed = qualify(feed, &ctx.namespace);
                let params = ctx.feed_params(&trigger.name, "DELETE", &trigger.parameters);
                ctx.run("feed", &feed, || client.invoke_feed(&feed, &params));
            }
            ctx.remove("trigger", &trigger.name, || {
                client.delete(EntityKind::Trigger, &trigger.name)
            });
        }
    }

    for pkg in app.packages.values() {
        let prefix = pkg.entity_prefix();
        for seq in pkg.sequences.values() {
            let name = format!("{}{}", prefix, seq.name);
            ctx.remove("sequence", &name, || client.delete(EntityKind::Action, &name));
        }
    }

    for pkg in app.packages.values() {
        let prefix = pkg.entity_prefix();
        for action in pkg.actions.values() {
            let name = format!("{}{}", prefix, action.name);
            ctx.remove("action", &name, || client.delete(EntityKind::Action, &name));
        }
    }

    for pkg in app.packages.values().filter(|p| !p.is_default()) {
        let label = if pkg.package.binding.is_some() { "binding" } else { "package" };
        ctx.remove(label, &pkg.package.name, || {
            client.delete(EntityKind::Package, &pkg.package.name)
        });
    }

    ctx.report
}

/// Execute reconciliation deletes. A failure abandons the rest of that kind's batch.
pub fn delete_batch(ops: &[DeleteOp], cfg: &ExecConfig) -> DeployReport {
    let client = cfg.client;
    let mut ctx = RecordCtx::new(cfg, "");
    for kind in DELETE_ORDER {
        for op in ops.iter().filter(|op| op.kind == kind) {
            if let Some(feed) = &op.feed {
                let feed = qualify(feed, &ctx.namespace);
                let params = ctx.feed_params(&op.name, "DELETE", &Parameters::new());
                ctx.run("feed", &feed, || client.invoke_feed(&feed, &params));
            }
            if ctx.remove(&op.label, &op.name, || client.delete(op.kind, &op.name)) != StepOutcome::Done {
                tracing::warn!("skipping remaining {} deletions", kind);
                break;
            }
        }
    }
    ctx.report
}

/// Deploy, then remove the entities the project no longer declares.
pub fn sync(app: &DeploymentApplication, deletes: &[DeleteOp], cfg: &ExecConfig) -> DeployReport {
    let mut report = deploy(app, cfg);
    if report.cancelled {
        return report;
    }
    let removed = delete_batch(deletes, cfg);
    report.deleted += removed.deleted;
    report.failures.extend(removed.failures);
    report.cancelled = removed.cancelled;
    report
}

/// Ask for confirmation; only `y` or `yes` (any case) proceed.
pub fn confirm(input: &mut dyn BufRead, output: &mut dyn Write) -> bool {
    if write!(output, "{}", DEPLOY_PROMPT).and_then(|_| output.flush()).is_err() {
        return false;
    }
    let mut line = String::new();
    if input.read_line(&mut line).is_err() {
        return false;
    }
    let answer = line.trim();
    answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes")
}

/// Print the plan, ask, and run `action` only when the user agrees.
pub fn with_confirmation(
    plan: &ExecutionPlan,
    input: &mut dyn BufRead,
    output: &mut dyn Write,
    action: impl FnOnce() -> DeployReport,
) -> DeployReport {
    if let Err(e) = planner::write_plan(output, plan) {
        tracing::warn!("cannot print plan: {}", e);
    }
    if confirm(input, output) {
        action()
    } else {
        tracing::info!("deployment declined");
        DeployReport {
            cancelled: true,
            ..Default::default()
        }
    }
}
