//! Task graph resolution
//!
//! Expands pipeline definitions against the workspace graph into concrete
//! task instances. Starting from the requested tasks in the selected
//! workspaces, `dependsOn` references are resolved transitively: a plain
//! name stays in the same workspace, `^name` fans out to every direct
//! dependency workspace and `//#name` points at the root-scoped singleton.
//! Workspaces that do not define a referenced task contribute no instance
//! and no edge.

use crate::task::{DependencyRef, TaskDefinition, TaskId};
use gantry_core::WorkspaceGraph;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, instrument};

/// A dependency cycle among task instances
#[derive(Debug)]
pub struct CycleError {
    /// Instances forming the cycle, in dependency order
    pub members: Vec<String>,
}

impl fmt::Display for CycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Circular dependency detected among tasks: ")?;
        for member in &self.members {
            write!(f, "{member} -> ")?;
        }
        match self.members.first() {
            Some(first) => write!(f, "{first}"),
            None => Ok(()),
        }
    }
}

impl std::error::Error for CycleError {}

/// Errors during task graph resolution
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The resolved graph contains a dependency cycle
    #[error(transparent)]
    Cycle(#[from] CycleError),

    /// A requested task is defined neither in the pipeline nor by any workspace
    #[error("Task '{0}' is not defined in the pipeline or any workspace")]
    TaskNotFound(String),

    /// A `dependsOn` entry could not be parsed or is not allowed here
    #[error("Invalid dependency reference '{reference}' in task '{task}'")]
    InvalidReference { task: String, reference: String },

    /// A root-scoped task has no command to run
    #[error("Root task '{0}' has no command")]
    MissingCommand(String),
}

/// One concrete task instance in the graph
#[derive(Debug, Clone)]
pub struct TaskNode {
    pub id: TaskId,
    pub definition: TaskDefinition,
    /// Resolved shell command
    pub command: String,
    /// Absolute directory the command runs in
    pub dir: PathBuf,
    /// Instances that must complete before this one
    pub dependencies: HashSet<TaskId>,
    /// Instances waiting on this one
    pub dependents: HashSet<TaskId>,
    /// Execution wave, one past the deepest dependency
    pub wave: usize,
}

/// The resolved task graph
#[derive(Debug, Clone, Default)]
pub struct TaskGraph {
    nodes: HashMap<TaskId, TaskNode>,
    waves: Vec<Vec<TaskId>>,
    sorted_order: Vec<TaskId>,
}

impl TaskGraph {
    /// Resolve the task graph for a set of requested tasks
    ///
    /// `requested` entries are task names, or `//#name` for root-scoped
    /// tasks. `selected` limits which workspaces the requested tasks are
    /// instantiated in; dependency references still reach outside the
    /// selection, so upstream builds run even for unselected workspaces.
    #[instrument(skip_all, fields(requested = ?requested, selected = selected.len()))]
    pub fn build(
        workspaces: &WorkspaceGraph,
        pipeline: &HashMap<String, TaskDefinition>,
        requested: &[String],
        selected: &[String],
    ) -> Result<Self, ResolveError> {
        let mut resolver = Resolver {
            workspaces,
            pipeline,
            nodes: HashMap::new(),
            queue: VecDeque::new(),
        };

        resolver.seed(requested, selected)?;
        resolver.expand()?;

        let mut nodes = resolver.nodes;
        let sorted_order = topological_sort(&nodes)?;
        let waves = compute_waves(&mut nodes, &sorted_order);

        debug!(tasks = nodes.len(), waves = waves.len(), "Resolved task graph");

        Ok(Self {
            nodes,
            waves,
            sorted_order,
        })
    }

    /// Look up a task instance
    pub fn get(&self, id: &TaskId) -> Option<&TaskNode> {
        self.nodes.get(id)
    }

    /// Instance ids in execution order (dependencies first)
    pub fn sorted(&self) -> &[TaskId] {
        &self.sorted_order
    }

    /// Instances grouped into waves that could start together
    pub fn waves(&self) -> &[Vec<TaskId>] {
        &self.waves
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Human-readable execution plan, wave by wave
    pub fn execution_plan(&self) -> Vec<Vec<String>> {
        self.waves
            .iter()
            .map(|wave| wave.iter().map(TaskId::to_string).collect())
            .collect()
    }
}

struct Resolver<'a> {
    workspaces: &'a WorkspaceGraph,
    pipeline: &'a HashMap<String, TaskDefinition>,
    nodes: HashMap<TaskId, TaskNode>,
    queue: VecDeque<TaskId>,
}

impl Resolver<'_> {
    /// Create the instances for the requested tasks
    fn seed(&mut self, requested: &[String], selected: &[String]) -> Result<(), ResolveError> {
        for raw in requested {
            if let Some(name) = raw.strip_prefix("//#") {
                self.ensure_root(name)?;
                continue;
            }

            let defined_somewhere = self.pipeline.contains_key(raw.as_str())
                || selected
                    .iter()
                    .filter_map(|w| self.workspaces.get(w))
                    .any(|w| w.tasks.iter().any(|t| t == raw));
            if !defined_somewhere {
                return Err(ResolveError::TaskNotFound(raw.clone()));
            }

            for workspace in selected {
                self.ensure_workspace_task(workspace, raw)?;
            }
        }
        Ok(())
    }

    /// Drain the worklist, materializing dependencies as edges and instances
    fn expand(&mut self) -> Result<(), ResolveError> {
        while let Some(id) = self.queue.pop_front() {
            let depends_on = match self.nodes.get(&id) {
                Some(node) => node.definition.depends_on.clone(),
                None => continue,
            };

            for raw in &depends_on {
                let reference =
                    DependencyRef::parse(raw).ok_or_else(|| ResolveError::InvalidReference {
                        task: id.to_string(),
                        reference: raw.clone(),
                    })?;

                match reference {
                    DependencyRef::Task(name) => {
                        if id.is_root() {
                            return Err(ResolveError::InvalidReference {
                                task: id.to_string(),
                                reference: raw.clone(),
                            });
                        }
                        if let Some(target) = self.ensure_workspace_task(&id.workspace, &name)? {
                            self.add_edge(&id, target);
                        }
                    }
                    DependencyRef::Upstream(name) => {
                        if id.is_root() {
                            return Err(ResolveError::InvalidReference {
                                task: id.to_string(),
                                reference: raw.clone(),
                            });
                        }
                        let deps: Vec<String> = self
                            .workspaces
                            .get(&id.workspace)
                            .map(|node| node.dependencies.clone())
                            .unwrap_or_default();
                        for dep_workspace in deps {
                            if let Some(target) =
                                self.ensure_workspace_task(&dep_workspace, &name)?
                            {
                                self.add_edge(&id, target);
                            }
                        }
                    }
                    DependencyRef::Root(name) => {
                        let target = self.ensure_root(&name)?;
                        self.add_edge(&id, target);
                    }
                }
            }
        }
        Ok(())
    }

    /// Definition for a task name, falling back to a bare script-only task
    fn definition_for(&self, name: &str) -> TaskDefinition {
        self.pipeline
            .get(name)
            .cloned()
            .unwrap_or_else(|| TaskDefinition::new(name))
    }

    /// Create the instance of `task` in `workspace` if the workspace defines it
    ///
    /// A workspace defines a task when its manifest declares a script of
    /// that name, or when the pipeline entry carries an explicit command
    /// that applies everywhere.
    fn ensure_workspace_task(
        &mut self,
        workspace: &str,
        task: &str,
    ) -> Result<Option<TaskId>, ResolveError> {
        let id = TaskId::new(workspace, task);
        if self.nodes.contains_key(&id) {
            return Ok(Some(id));
        }

        let Some(node) = self.workspaces.get(workspace) else {
            return Ok(None);
        };
        let definition = self.definition_for(task);
        let has_script = node.tasks.iter().any(|t| t == task);
        if !has_script && definition.command.is_none() {
            debug!(workspace, task, "Workspace does not define task, skipping");
            return Ok(None);
        }

        let command = match &definition.command {
            Some(command) => command.clone(),
            None => format!("{} {}", self.workspaces.script_runner(), task),
        };

        self.insert_node(id.clone(), definition, command, node.path.clone());
        Ok(Some(id))
    }

    /// Create the root-scoped singleton instance of a task
    fn ensure_root(&mut self, name: &str) -> Result<TaskId, ResolveError> {
        let id = TaskId::root(name);
        if self.nodes.contains_key(&id) {
            return Ok(id);
        }

        let key = format!("//#{name}");
        let definition = self
            .pipeline
            .get(&key)
            .cloned()
            .ok_or_else(|| ResolveError::TaskNotFound(key.clone()))?;
        let command = definition
            .command
            .clone()
            .ok_or_else(|| ResolveError::MissingCommand(key))?;

        self.insert_node(
            id.clone(),
            definition,
            command,
            self.workspaces.root_dir().to_path_buf(),
        );
        Ok(id)
    }

    fn insert_node(&mut self, id: TaskId, definition: TaskDefinition, command: String, dir: PathBuf) {
        self.nodes.insert(
            id.clone(),
            TaskNode {
                id: id.clone(),
                definition,
                command,
                dir,
                dependencies: HashSet::new(),
                dependents: HashSet::new(),
                wave: 0,
            },
        );
        self.queue.push_back(id);
    }

    fn add_edge(&mut self, from: &TaskId, to: TaskId) {
        if *from == to {
            // A task depending on itself is the smallest cycle
            if let Some(node) = self.nodes.get_mut(from) {
                node.dependencies.insert(to.clone());
                node.dependents.insert(to);
            }
            return;
        }
        if let Some(node) = self.nodes.get_mut(from) {
            node.dependencies.insert(to.clone());
        }
        if let Some(node) = self.nodes.get_mut(&to) {
            node.dependents.insert(from.clone());
        }
    }
}

/// Kahn's algorithm with a (workspace, task) ordered ready set
///
/// Instances that never reach in-degree zero sit in or behind a cycle;
/// one concrete cycle among them is reported.
fn topological_sort(nodes: &HashMap<TaskId, TaskNode>) -> Result<Vec<TaskId>, CycleError> {
    let mut in_degree: HashMap<&TaskId, usize> = nodes
        .values()
        .map(|node| (&node.id, node.dependencies.len()))
        .collect();

    let mut ready: BTreeSet<&TaskId> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(id, _)| *id)
        .collect();

    let mut sorted: Vec<TaskId> = Vec::with_capacity(nodes.len());
    while let Some(id) = ready.pop_first() {
        sorted.push(id.clone());
        if let Some(node) = nodes.get(id) {
            for dependent in &node.dependents {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(dependent);
                    }
                }
            }
        }
    }

    if sorted.len() == nodes.len() {
        return Ok(sorted);
    }

    let mut leftovers: Vec<&TaskId> = nodes
        .keys()
        .filter(|id| !sorted.contains(*id))
        .collect();
    leftovers.sort();

    let members = find_cycle(nodes, &leftovers).unwrap_or_else(|| {
        leftovers.iter().map(|id| id.to_string()).collect()
    });
    Err(CycleError { members })
}

/// Find one concrete cycle among the leftover instances
fn find_cycle(nodes: &HashMap<TaskId, TaskNode>, leftovers: &[&TaskId]) -> Option<Vec<String>> {
    fn visit<'a>(
        id: &'a TaskId,
        nodes: &'a HashMap<TaskId, TaskNode>,
        leftovers: &[&TaskId],
        path: &mut Vec<&'a TaskId>,
    ) -> Option<Vec<String>> {
        if let Some(pos) = path.iter().position(|p| *p == id) {
            return Some(path[pos..].iter().map(|p| p.to_string()).collect());
        }

        path.push(id);
        if let Some(node) = nodes.get(id) {
            let mut deps: Vec<&TaskId> = node
                .dependencies
                .iter()
                .filter(|dep| leftovers.contains(dep))
                .collect();
            deps.sort();
            for dep in deps {
                if let Some(cycle) = visit(dep, nodes, leftovers, path) {
                    return Some(cycle);
                }
            }
        }
        path.pop();
        None
    }

    for start in leftovers {
        let mut path = Vec::new();
        if let Some(cycle) = visit(start, nodes, leftovers, &mut path) {
            return Some(cycle);
        }
    }
    None
}

/// Assign each instance to a wave, one past its deepest dependency
fn compute_waves(nodes: &mut HashMap<TaskId, TaskNode>, sorted: &[TaskId]) -> Vec<Vec<TaskId>> {
    for id in sorted {
        let wave = nodes
            .get(id)
            .map(|node| {
                node.dependencies
                    .iter()
                    .filter_map(|dep| nodes.get(dep))
                    .map(|dep| dep.wave + 1)
                    .max()
                    .unwrap_or(0)
            })
            .unwrap_or(0);
        if let Some(node) = nodes.get_mut(id) {
            node.wave = wave;
        }
    }

    let wave_count = nodes.values().map(|n| n.wave + 1).max().unwrap_or(0);
    let mut waves: Vec<Vec<TaskId>> = vec![Vec::new(); wave_count];
    for id in sorted {
        if let Some(node) = nodes.get(id) {
            waves[node.wave].push(id.clone());
        }
    }
    waves
}
