//! Core library for the Gantry task orchestrator
//!
//! Provides the repository model: configuration loading, workspace
//! detection and discovery, and the workspace dependency graph.

pub mod config;
pub mod error;
pub mod workspace;

pub use config::{Config, PipelineTask};
pub use error::{ConfigError, DiscoveryError, GantryError, GraphError, Result};
pub use workspace::{
    Workspace, WorkspaceDiscovery, WorkspaceGraph, WorkspaceLayout, WorkspaceNode, WorkspaceRoot,
};
