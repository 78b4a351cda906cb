//! Configuration management for Gantry
//!
//! Loads `gantry.toml` or `gantry.yaml` from the repository root, applies
//! defaults and validates the result.

pub mod defaults;
pub mod loader;
pub mod types;
pub mod validation;

pub use loader::{find_config, load_config, load_config_from_dir, load_config_or_default};
pub use types::{CacheConfig, Config, PipelineTask, TasksConfig, WorkspacesConfig};
pub use validation::validate_config;
