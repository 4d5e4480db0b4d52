//! WD-008: Overlay binding of deployment inputs and annotations onto composed entities.
//!
//! Matching is by name. Entities the deployment names but the manifest does
//! not declare are ignored. The graph is taken by value and returned.

use super::error::{Error, Result};
use super::manifest::{DeploymentYaml, RawAnnotations, RawInputs};
use super::params;
use super::parser;
use super::types::*;
use crate::tripwire::managed::MANAGED_KEY;

/// Apply a deployment document to a composed application.
pub fn bind(deployment: &DeploymentYaml, mut app: DeploymentApplication, file: &str) -> Result<DeploymentApplication> {
    if let Some(project) = &deployment.project {
        if !project.name.is_empty() {
            match &app.project_name {
                Some(name) if name != &project.name => {
                    return Err(Error::validation(
                        file,
                        format!(
                            "project name [{}] differs from the manifest's [{}]",
                            project.name, name
                        ),
                    ));
                }
                Some(_) => {}
                None => app.project_name = Some(project.name.clone()),
            }
        }
    }

    for (pkg_name, overlay) in parser::deployment_packages(deployment) {
        let Some(pkg) = app.packages.get_mut(&pkg_name) else {
            tracing::debug!("deployment package [{}] is not in the manifest; ignored", pkg_name);
            continue;
        };
        overlay_inputs(&mut pkg.package.parameters, &overlay.inputs, file)?;
        overlay_annotations(&mut pkg.package.annotations, &overlay.annotations);

        for (name, entity) in &overlay.actions {
            let target = match pkg.actions.get_mut(name) {
                Some(a) => a,
                None => match pkg.sequences.get_mut(name) {
                    Some(s) => s,
                    None => {
                        tracing::debug!("deployment action [{}/{}] is not in the manifest; ignored", pkg_name, name);
                        continue;
                    }
                },
            };
            overlay_inputs(&mut target.parameters, &entity.inputs, file)?;
            overlay_annotations(&mut target.annotations, &entity.annotations);
        }

        for (name, entity) in &overlay.triggers {
            let Some(target) = pkg.triggers.get_mut(name) else {
                tracing::debug!("deployment trigger [{}/{}] is not in the manifest; ignored", pkg_name, name);
                continue;
            };
            overlay_inputs(&mut target.parameters, &entity.inputs, file)?;
            overlay_annotations(&mut target.annotations, &entity.annotations);
        }
    }

    check_required(&app)?;
    Ok(app)
}

/// Deployment inputs replace same-named parameters; the rest are kept.
fn overlay_inputs(target: &mut Parameters, inputs: &RawInputs, file: &str) -> Result<()> {
    for (name, raw) in inputs {
        let param = params::resolve(name, raw, file)?;
        target.insert(name.clone(), param);
    }
    Ok(())
}

/// Deployment annotations replace the set; the ownership marker survives.
fn overlay_annotations(target: &mut Annotations, annotations: &RawAnnotations) {
    if annotations.is_empty() {
        return;
    }
    let managed = target.get(MANAGED_KEY).cloned();
    *target = annotations
        .iter()
        .map(|(k, v)| (k.clone(), params::yaml_to_json(v, true)))
        .collect();
    if let Some(marker) = managed {
        target.insert(MANAGED_KEY.to_string(), marker);
    }
}

/// Required inputs must have a value once every overlay has been applied.
fn check_required(app: &DeploymentApplication) -> Result<()> {
    let missing = |params: &Parameters| {
        params
            .iter()
            .find(|(_, p)| p.required && p.value.is_zero())
            .map(|(name, _)| name.clone())
    };
    for pkg in app.packages.values() {
        if let Some(name) = missing(&pkg.package.parameters) {
            return Err(Error::RequiredInput {
                entity: format!("package {}", pkg.package.name),
                name,
            });
        }
        for action in pkg.actions.values() {
            if let Some(name) = missing(&action.parameters) {
                return Err(Error::RequiredInput {
                    entity: format!("action {}{}", pkg.entity_prefix(), action.name),
                    name,
                });
            }
        }
        for trigger in pkg.triggers.values() {
            if let Some(name) = missing(&trigger.parameters) {
                return Err(Error::RequiredInput {
                    entity: format!("trigger {}", trigger.name),
                    name,
                });
            }
        }
    }
    Ok(())
}
