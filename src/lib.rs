//! # Gantry Core - Deployment Engine
//!
//! Rust implementation of the Gantry deployment engine providing:
//! - Artifact discovery and hot reload from the filesystem
//! - Per-artifact lifecycle state machine with listener notification
//! - Isolated execution contexts with leak-free teardown across redeploys
//! - Bounded-retry cleanup of resources that cannot be released synchronously
//! - Domain-aware cascade undeployment
//! - Operation policy instance caching with drain-aware disposal
//!
//! ## Architecture
//!
//! The engine owns all subsystems as plain structs; the directory watcher is
//! the single writer of the deployed-artifact registries:
//! ```text
//!                  ┌────────────────────────────────────┐
//!   filesystem  →  │       Directory Watcher            │
//!                  │  ┌──────────┐  ┌──────────┐        │
//!                  │  │  Domain  │  │   App    │        │
//!                  │  │ Deployer │→ │ Deployer │        │
//!                  │  └──────────┘  └──────────┘        │
//!                  │       ↓              ↓             │
//!                  │  ┌──────────┐  ┌──────────┐        │
//!                  │  │Execution │  │ Cleanup  │        │
//!                  │  │ Contexts │  │Scheduler │        │
//!                  │  └──────────┘  └──────────┘        │
//!                  └────────────────────────────────────┘
//! ```

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

// Re-export public API
pub mod artifact;
pub mod cleanup;
pub mod context;
pub mod deployer;
pub mod engine;
pub mod policy;
pub mod types;
pub mod watcher;

// Internal utilities
pub mod observability;
pub mod recovery;

pub use engine::{DeploymentEngine, DeploymentService, DisabledDeploymentService};
pub use types::{EngineConfig, Error, Result};
