//! Error types for Gantry

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using GantryError
pub type Result<T> = std::result::Result<T, GantryError>;

/// Main error type for Gantry operations
#[derive(Debug, Error)]
pub enum GantryError {
    /// Configuration-related errors
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Workspace discovery errors
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    /// Workspace graph errors
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic errors
    #[error("{0}")]
    Other(String),
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("Configuration file not found at {0}")]
    NotFound(PathBuf),

    /// Invalid configuration value
    #[error("Invalid configuration: {field} - {message}")]
    InvalidValue { field: String, message: String },

    /// Missing required field
    #[error("Missing required configuration field: {0}")]
    MissingField(String),

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// IO error
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),
}

/// Workspace discovery errors
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Two workspaces declare the same name
    #[error("Duplicate workspace name '{name}' declared by {first} and {second}")]
    DuplicateName {
        name: String,
        first: PathBuf,
        second: PathBuf,
    },

    /// A manifest file could not be parsed
    #[error("Malformed manifest at {path}: {reason}")]
    Manifest { path: PathBuf, reason: String },

    /// A workspace glob pattern is invalid
    #[error("Invalid workspace pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// IO error while walking the repository
    #[error("IO error during discovery: {0}")]
    Io(#[from] std::io::Error),
}

/// Workspace graph errors
#[derive(Debug, Error)]
pub enum GraphError {
    /// The workspace dependency graph contains a cycle
    #[error("Circular dependency between workspaces: {0}")]
    CircularDependency(String),

    /// A dependency names a workspace that was not discovered
    #[error("Unknown workspace: {0}")]
    UnknownWorkspace(String),
}

impl GantryError {
    /// Create a new "other" error with a message
    pub fn other<S: Into<String>>(msg: S) -> Self {
        Self::Other(msg.into())
    }
}
