//! Tripwire: managed-project ownership markers and remote reconciliation.

pub mod drift;
pub mod hasher;
pub mod managed;
