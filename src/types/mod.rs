//! Core types for the Gantry deployment engine.
//!
//! This module provides foundational types used throughout the system:
//! - **IDs**: Strongly-typed identifiers (ArtifactId, InstanceId, etc.)
//! - **Errors**: Application error types with thiserror derives
//! - **Config**: Configuration structures for the watcher, cleanup, and layout

mod config;
mod errors;
mod ids;

pub use config::{
    ArtifactLayout, CleanupConfig, DeploymentMode, EngineConfig, WatcherConfig, ANCHOR_SUFFIX,
};
pub use errors::{Error, Result};
pub use ids::{ArtifactId, InstanceId, OperationId, PolicyId};
