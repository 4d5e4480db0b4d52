//! Core deployment logic: parsing, composition, binding, planning and execution.

pub mod binder;
pub mod composer;
pub mod config;
pub mod dependencies;
pub mod error;
pub mod executor;
pub mod filesystem;
pub mod manifest;
pub mod params;
pub mod parser;
pub mod pipeline;
pub mod planner;
pub mod retry;
pub mod runtimes;
pub mod types;
pub mod webaction;
