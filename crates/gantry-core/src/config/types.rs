//! Configuration types for Gantry

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Schema version for the config file
    #[serde(rename = "$schema", skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    /// Project name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Workspace discovery configuration
    #[serde(default)]
    pub workspaces: WorkspacesConfig,

    /// Task pipeline configuration
    #[serde(default)]
    pub tasks: TasksConfig,
}

/// Workspace discovery configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WorkspacesConfig {
    /// Glob patterns for workspace locations, overriding auto-detection
    #[serde(default)]
    pub patterns: Vec<String>,
}

/// Task pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TasksConfig {
    /// Maximum number of concurrently executing tasks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,

    /// Environment variable names folded into every task fingerprint
    #[serde(default)]
    pub env: Vec<String>,

    /// Pipeline task definitions keyed by task name
    ///
    /// Keys are plain task names, or `//#name` for tasks that run once
    /// at the repository root.
    #[serde(default)]
    pub pipeline: HashMap<String, PipelineTask>,

    /// Output cache configuration
    #[serde(default)]
    pub cache: CacheConfig,
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            concurrency: None,
            env: Vec::new(),
            pipeline: HashMap::new(),
            cache: CacheConfig::default(),
        }
    }
}

/// A single pipeline task definition
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PipelineTask {
    /// Shell command to run, overriding the workspace script of the same name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Task dependencies
    ///
    /// Entries are plain names (same workspace), `^name` (every direct
    /// dependency workspace) or `//#name` (root-scoped task).
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Glob patterns for files produced by the task, relative to the workspace
    #[serde(default)]
    pub outputs: Vec<String>,

    /// Glob patterns for files the task reads, relative to the workspace
    ///
    /// Patterns starting with `!` exclude matches. When empty, every file
    /// in the workspace is an input.
    #[serde(default)]
    pub inputs: Vec<String>,

    /// Extra environment variables set for the task
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Long-running task that never exits on its own
    ///
    /// Persistent tasks are never cached and cannot be depended on.
    #[serde(default)]
    pub persistent: bool,
}

/// Output cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Whether the output cache is enabled
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,

    /// Cache directory, relative to the repository root
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            dir: default_cache_dir(),
        }
    }
}

fn default_cache_enabled() -> bool {
    true
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".gantry/cache")
}
