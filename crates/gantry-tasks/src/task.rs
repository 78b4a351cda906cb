//! Task identities and definitions

use gantry_core::PipelineTask;
use std::collections::HashMap;
use std::fmt;

/// Name of the pseudo-workspace for root-scoped tasks
pub const ROOT_WORKSPACE: &str = "//";

/// Identifies one task instance as a (workspace, task) pair
///
/// Ordering is workspace first, then task name, which is the tie-break
/// order used wherever instances are dispatched or listed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId {
    /// Workspace name, or `//` for root-scoped tasks
    pub workspace: String,
    /// Task name within the workspace
    pub task: String,
}

impl TaskId {
    pub fn new(workspace: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            workspace: workspace.into(),
            task: task.into(),
        }
    }

    /// Identity of a root-scoped task instance
    pub fn root(task: impl Into<String>) -> Self {
        Self::new(ROOT_WORKSPACE, task)
    }

    /// Whether this instance runs once at the repository root
    pub fn is_root(&self) -> bool {
        self.workspace == ROOT_WORKSPACE
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.workspace, self.task)
    }
}

/// One entry of a task's `dependsOn` list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyRef {
    /// Plain name: the task in the same workspace
    Task(String),
    /// `^name`: the task in every direct dependency workspace
    Upstream(String),
    /// `//#name`: the root-scoped singleton task
    Root(String),
}

impl DependencyRef {
    /// Parse one `dependsOn` entry
    pub fn parse(raw: &str) -> Option<Self> {
        if let Some(name) = raw.strip_prefix("//#") {
            (!name.is_empty()).then(|| Self::Root(name.to_string()))
        } else if let Some(name) = raw.strip_prefix('^') {
            (!name.is_empty()).then(|| Self::Upstream(name.to_string()))
        } else if raw.is_empty() {
            None
        } else {
            Some(Self::Task(raw.to_string()))
        }
    }

    /// The referenced task name, without its prefix
    pub fn task(&self) -> &str {
        match self {
            Self::Task(name) | Self::Upstream(name) | Self::Root(name) => name,
        }
    }
}

impl fmt::Display for DependencyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Task(name) => write!(f, "{name}"),
            Self::Upstream(name) => write!(f, "^{name}"),
            Self::Root(name) => write!(f, "//#{name}"),
        }
    }
}

/// How a task behaves, independent of any particular workspace
#[derive(Debug, Clone, Default)]
pub struct TaskDefinition {
    /// Task name
    pub name: String,
    /// Explicit shell command, overriding the workspace script
    pub command: Option<String>,
    /// Raw `dependsOn` entries
    pub depends_on: Vec<String>,
    /// Output globs, relative to the workspace
    pub outputs: Vec<String>,
    /// Input globs, relative to the workspace (`!` prefix excludes)
    pub inputs: Vec<String>,
    /// Extra environment variables for the command
    pub env: HashMap<String, String>,
    /// Long-running task, never cached
    pub persistent: bool,
}

impl TaskDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Build a definition from a pipeline config entry
    pub fn from_config(name: impl Into<String>, task: &PipelineTask) -> Self {
        Self {
            name: name.into(),
            command: task.command.clone(),
            depends_on: task.depends_on.clone(),
            outputs: task.outputs.clone(),
            inputs: task.inputs.clone(),
            env: task.env.clone(),
            persistent: task.persistent,
        }
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn with_depends_on(mut self, dep: impl Into<String>) -> Self {
        self.depends_on.push(dep.into());
        self
    }

    pub fn with_outputs(mut self, outputs: Vec<String>) -> Self {
        self.outputs = outputs;
        self
    }

    pub fn with_inputs(mut self, inputs: Vec<String>) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_id_display() {
        let id = TaskId::new("@acme/ui", "build");
        assert_eq!(id.to_string(), "@acme/ui:build");
        assert!(!id.is_root());
    }

    #[test]
    fn test_root_task_id() {
        let id = TaskId::root("format");
        assert_eq!(id.to_string(), "//:format");
        assert!(id.is_root());
    }

    #[test]
    fn test_task_id_ordering() {
        let mut ids = vec![
            TaskId::new("b", "test"),
            TaskId::new("a", "test"),
            TaskId::new("a", "build"),
        ];
        ids.sort();
        assert_eq!(ids[0], TaskId::new("a", "build"));
        assert_eq!(ids[1], TaskId::new("a", "test"));
        assert_eq!(ids[2], TaskId::new("b", "test"));
    }

    #[test]
    fn test_dependency_ref_parse() {
        assert_eq!(
            DependencyRef::parse("build"),
            Some(DependencyRef::Task("build".to_string()))
        );
        assert_eq!(
            DependencyRef::parse("^build"),
            Some(DependencyRef::Upstream("build".to_string()))
        );
        assert_eq!(
            DependencyRef::parse("//#format"),
            Some(DependencyRef::Root("format".to_string()))
        );
        assert_eq!(DependencyRef::parse(""), None);
        assert_eq!(DependencyRef::parse("^"), None);
        assert_eq!(DependencyRef::parse("//#"), None);
    }

    #[test]
    fn test_dependency_ref_display_round_trips() {
        for raw in ["build", "^build", "//#format"] {
            let parsed = DependencyRef::parse(raw).unwrap();
            assert_eq!(parsed.to_string(), raw);
        }
    }

    #[test]
    fn test_definition_builder() {
        let def = TaskDefinition::new("build")
            .with_command("tsc")
            .with_depends_on("^build")
            .with_outputs(vec!["dist/**".to_string()])
            .with_env("NODE_ENV", "production");

        assert_eq!(def.name, "build");
        assert_eq!(def.command.as_deref(), Some("tsc"));
        assert_eq!(def.depends_on, vec!["^build"]);
        assert_eq!(def.env.get("NODE_ENV").map(String::as_str), Some("production"));
        assert!(!def.persistent);
    }
}
