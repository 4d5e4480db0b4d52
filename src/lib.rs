//! whiskdeploy: declarative OpenWhisk deployment from manifest YAML.
//!
//! Packages, actions, sequences, triggers, rules and API routes are described
//! in a manifest, optionally overlaid by a deployment file, and applied to a
//! namespace in dependency order. Managed projects are reconciled on every run.

pub mod cli;
pub mod client;
pub mod core;
pub mod tripwire;
