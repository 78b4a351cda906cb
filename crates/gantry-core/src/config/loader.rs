//! Configuration loading and discovery

use crate::config::defaults::config_file_names;
use crate::config::types::Config;
use crate::config::validation::validate_config;
use crate::error::{ConfigError, GantryError, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Load and validate a configuration file
pub fn load_config(path: &Path) -> Result<Config> {
    debug!(path = %path.display(), "Loading configuration");

    let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;

    let config: Config = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => toml::from_str(&content).map_err(ConfigError::TomlError)?,
        Some("yaml") | Some("yml") => {
            serde_yaml::from_str(&content).map_err(ConfigError::YamlError)?
        }
        _ => {
            return Err(GantryError::other(format!(
                "Unsupported configuration format: {}",
                path.display()
            )))
        }
    };

    validate_config(&config)?;
    Ok(config)
}

/// Find a configuration file, walking up from the starting directory
///
/// The directory containing the configuration file is treated as the
/// repository root, so running from a nested workspace still resolves
/// the whole monorepo.
pub fn find_config(start_dir: &Path) -> Option<PathBuf> {
    let mut current = Some(start_dir);

    while let Some(dir) = current {
        for name in config_file_names() {
            let candidate = dir.join(name);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        current = dir.parent();
    }

    None
}

/// Load the configuration from a specific directory, without walking up
pub fn load_config_from_dir(dir: &Path) -> Result<Config> {
    for name in config_file_names() {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return load_config(&candidate);
        }
    }
    Err(ConfigError::NotFound(dir.to_path_buf()).into())
}

/// Load the configuration for the repository containing `start_dir`
///
/// Returns the configuration together with the inferred repository root.
/// When no configuration file exists anywhere above `start_dir`, defaults
/// are used and `start_dir` itself is the root. A configuration file that
/// exists but fails to parse or validate is an error, not a fallback.
pub fn load_config_or_default(start_dir: &Path) -> Result<(Config, PathBuf)> {
    match find_config(start_dir) {
        Some(path) => {
            let config = load_config(&path)?;
            let root = path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| start_dir.to_path_buf());
            Ok((config, root))
        }
        None => {
            debug!(
                dir = %start_dir.display(),
                "No configuration file found, using defaults"
            );
            Ok((Config::default(), start_dir.to_path_buf()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_toml_config() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("gantry.toml");
        std::fs::write(
            &path,
            r#"
name = "monorepo"

[tasks.pipeline.build]
command = "make build"
dependsOn = ["^build"]
outputs = ["dist/**"]
"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.name.as_deref(), Some("monorepo"));
        let build = config.tasks.pipeline.get("build").unwrap();
        assert_eq!(build.command.as_deref(), Some("make build"));
        assert_eq!(build.depends_on, vec!["^build"]);
        assert_eq!(build.outputs, vec!["dist/**"]);
    }

    #[test]
    fn test_load_yaml_config() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("gantry.yaml");
        std::fs::write(
            &path,
            r#"
name: monorepo
tasks:
  env:
    - CI
  pipeline:
    test:
      dependsOn:
        - build
"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.tasks.env, vec!["CI"]);
        let test = config.tasks.pipeline.get("test").unwrap();
        assert_eq!(test.depends_on, vec!["build"]);
        assert!(test.command.is_none());
    }

    #[test]
    fn test_load_invalid_toml_fails() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("gantry.toml");
        std::fs::write(&path, "tasks = not valid toml").unwrap();

        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_find_config_walks_up() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("gantry.toml"), "name = \"root\"").unwrap();

        let nested = temp.path().join("packages").join("app");
        std::fs::create_dir_all(&nested).unwrap();

        let found = find_config(&nested).unwrap();
        assert_eq!(found, temp.path().join("gantry.toml"));
    }

    #[test]
    fn test_find_config_missing() {
        let temp = TempDir::new().unwrap();
        // Parent directories of the tempdir may contain configs on a dev
        // machine, so only check the immediate directory here.
        assert!(load_config_from_dir(temp.path()).is_err());
    }

    #[test]
    fn test_load_config_or_default_infers_root() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("gantry.toml"), "name = \"root\"").unwrap();
        let nested = temp.path().join("packages").join("app");
        std::fs::create_dir_all(&nested).unwrap();

        let (config, root) = load_config_or_default(&nested).unwrap();
        assert_eq!(config.name.as_deref(), Some("root"));
        assert_eq!(root, temp.path());
    }

    #[test]
    fn test_load_config_or_default_propagates_parse_errors() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("gantry.toml"), "[tasks").unwrap();

        assert!(load_config_or_default(temp.path()).is_err());
    }
}
