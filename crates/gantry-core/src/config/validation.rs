//! Configuration validation

use crate::config::types::{Config, PipelineTask, TasksConfig, WorkspacesConfig};
use crate::error::ConfigError;
use std::collections::HashMap;

/// Validate a configuration
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    validate_workspaces(&config.workspaces)?;
    validate_tasks(&config.tasks)?;
    Ok(())
}

fn validate_workspaces(workspaces: &WorkspacesConfig) -> Result<(), ConfigError> {
    for pattern in &workspaces.patterns {
        if pattern.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "workspaces.patterns".to_string(),
                message: "pattern must not be empty".to_string(),
            });
        }
        if let Err(e) = glob::Pattern::new(pattern) {
            return Err(ConfigError::InvalidValue {
                field: "workspaces.patterns".to_string(),
                message: format!("invalid glob '{pattern}': {e}"),
            });
        }
    }
    Ok(())
}

fn validate_tasks(tasks: &TasksConfig) -> Result<(), ConfigError> {
    if tasks.concurrency == Some(0) {
        return Err(ConfigError::InvalidValue {
            field: "tasks.concurrency".to_string(),
            message: "must be at least 1".to_string(),
        });
    }

    for name in &tasks.env {
        if name.is_empty() || name.contains('=') {
            return Err(ConfigError::InvalidValue {
                field: "tasks.env".to_string(),
                message: format!("'{name}' is not a valid environment variable name"),
            });
        }
    }

    for (key, task) in &tasks.pipeline {
        validate_pipeline_key(key)?;
        validate_pipeline_task(key, task, &tasks.pipeline)?;
    }

    Ok(())
}

fn validate_pipeline_key(key: &str) -> Result<(), ConfigError> {
    let name = key.strip_prefix("//#").unwrap_or(key);
    check_task_name(name, key)
}

fn check_task_name(name: &str, key: &str) -> Result<(), ConfigError> {
    let field = format!("tasks.pipeline.{key}");
    if name.is_empty() {
        return Err(ConfigError::InvalidValue {
            field,
            message: "task name must not be empty".to_string(),
        });
    }
    if name.contains(char::is_whitespace)
        || name.contains(':')
        || name.contains('#')
        || name.contains('^')
    {
        return Err(ConfigError::InvalidValue {
            field,
            message: format!("'{name}' is not a valid task name"),
        });
    }
    Ok(())
}

fn validate_pipeline_task(
    key: &str,
    task: &PipelineTask,
    pipeline: &HashMap<String, PipelineTask>,
) -> Result<(), ConfigError> {
    let field = format!("tasks.pipeline.{key}");
    let is_root_task = key.starts_with("//#");

    if is_root_task && task.command.is_none() {
        return Err(ConfigError::InvalidValue {
            field,
            message: "root-scoped tasks require an explicit command".to_string(),
        });
    }

    for dep in &task.depends_on {
        if let Some(name) = dep.strip_prefix("//#") {
            check_task_name(name, key)?;
            let root_key = format!("//#{name}");
            match pipeline.get(&root_key) {
                Some(target) if target.persistent => {
                    return Err(ConfigError::InvalidValue {
                        field,
                        message: format!("cannot depend on persistent task '{dep}'"),
                    });
                }
                Some(_) => {}
                None => {
                    return Err(ConfigError::InvalidValue {
                        field,
                        message: format!("references unknown root task '{dep}'"),
                    });
                }
            }
        } else if let Some(name) = dep.strip_prefix('^') {
            if is_root_task {
                return Err(ConfigError::InvalidValue {
                    field,
                    message: "root-scoped tasks have no dependency workspaces, '^' references are not allowed".to_string(),
                });
            }
            check_task_name(name, key)?;
            check_not_persistent(name, dep, &field, pipeline)?;
        } else {
            if is_root_task {
                return Err(ConfigError::InvalidValue {
                    field,
                    message: format!(
                        "root-scoped tasks may only depend on other root tasks, use '//#{dep}'"
                    ),
                });
            }
            check_task_name(dep, key)?;
            check_not_persistent(dep, dep, &field, pipeline)?;
        }
    }

    for pattern in &task.outputs {
        check_glob(pattern, &format!("{field}.outputs"))?;
    }
    for pattern in &task.inputs {
        let pattern = pattern.strip_prefix('!').unwrap_or(pattern);
        check_glob(pattern, &format!("{field}.inputs"))?;
    }

    Ok(())
}

fn check_not_persistent(
    name: &str,
    dep: &str,
    field: &str,
    pipeline: &HashMap<String, PipelineTask>,
) -> Result<(), ConfigError> {
    if let Some(target) = pipeline.get(name) {
        if target.persistent {
            return Err(ConfigError::InvalidValue {
                field: field.to_string(),
                message: format!("cannot depend on persistent task '{dep}'"),
            });
        }
    }
    Ok(())
}

fn check_glob(pattern: &str, field: &str) -> Result<(), ConfigError> {
    if pattern.is_empty() {
        return Err(ConfigError::InvalidValue {
            field: field.to_string(),
            message: "pattern must not be empty".to_string(),
        });
    }
    if let Err(e) = glob::Pattern::new(pattern) {
        return Err(ConfigError::InvalidValue {
            field: field.to_string(),
            message: format!("invalid glob '{pattern}': {e}"),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::CacheConfig;

    fn pipeline_with(entries: Vec<(&str, PipelineTask)>) -> Config {
        let mut config = Config::default();
        for (key, task) in entries {
            config.tasks.pipeline.insert(key.to_string(), task);
        }
        config
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let mut config = Config::default();
        config.tasks.concurrency = Some(0);
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_invalid_task_name_rejected() {
        let config = pipeline_with(vec![("bad name", PipelineTask::default())]);
        assert!(validate_config(&config).is_err());

        let config = pipeline_with(vec![("build:dist", PipelineTask::default())]);
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_root_task_requires_command() {
        let config = pipeline_with(vec![("//#fmt", PipelineTask::default())]);
        assert!(validate_config(&config).is_err());

        let task = PipelineTask {
            command: Some("make fmt".to_string()),
            ..Default::default()
        };
        let config = pipeline_with(vec![("//#fmt", task)]);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_root_task_rejects_upstream_refs() {
        let task = PipelineTask {
            command: Some("make fmt".to_string()),
            depends_on: vec!["^build".to_string()],
            ..Default::default()
        };
        let config = pipeline_with(vec![("//#fmt", task)]);
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_root_task_rejects_plain_refs() {
        let codegen = PipelineTask {
            command: Some("protoc --gen".to_string()),
            ..Default::default()
        };
        let fmt = PipelineTask {
            command: Some("make fmt".to_string()),
            depends_on: vec!["codegen".to_string()],
            ..Default::default()
        };
        let config = pipeline_with(vec![("//#codegen", codegen.clone()), ("//#fmt", fmt)]);
        assert!(validate_config(&config).is_err());

        let fmt = PipelineTask {
            command: Some("make fmt".to_string()),
            depends_on: vec!["//#codegen".to_string()],
            ..Default::default()
        };
        let config = pipeline_with(vec![("//#codegen", codegen), ("//#fmt", fmt)]);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_unknown_root_reference_rejected() {
        let task = PipelineTask {
            depends_on: vec!["//#codegen".to_string()],
            ..Default::default()
        };
        let config = pipeline_with(vec![("build", task)]);
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_dependency_on_persistent_task_rejected() {
        let dev = PipelineTask {
            persistent: true,
            ..Default::default()
        };
        let test = PipelineTask {
            depends_on: vec!["dev".to_string()],
            ..Default::default()
        };
        let config = pipeline_with(vec![("dev", dev), ("test", test)]);
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_valid_pipeline_passes() {
        let build = PipelineTask {
            depends_on: vec!["^build".to_string()],
            outputs: vec!["dist/**".to_string()],
            inputs: vec!["src/**".to_string(), "!src/**/*.test.js".to_string()],
            ..Default::default()
        };
        let test = PipelineTask {
            depends_on: vec!["build".to_string()],
            ..Default::default()
        };
        let config = pipeline_with(vec![("build", build), ("test", test)]);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_invalid_output_glob_rejected() {
        let build = PipelineTask {
            outputs: vec!["dist/[".to_string()],
            ..Default::default()
        };
        let config = pipeline_with(vec![("build", build)]);
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_env_name_with_equals_rejected() {
        let mut config = Config::default();
        config.tasks.env = vec!["CI=1".to_string()];
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_cache_config_defaults() {
        let cache = CacheConfig::default();
        assert!(cache.enabled);
        assert_eq!(cache.dir, std::path::PathBuf::from(".gantry/cache"));
    }
}
