//! Workspace dependency graph

use crate::error::{GraphError, Result};
use crate::workspace::detect::{WorkspaceLayout, WorkspaceRoot};
use crate::workspace::discovery::Workspace;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

/// A node in the workspace dependency graph
#[derive(Debug, Clone)]
pub struct WorkspaceNode {
    /// Workspace name
    pub name: String,
    /// Absolute path to the workspace directory
    pub path: PathBuf,
    /// Manifest kind ("npm" or "cargo")
    pub kind: String,
    /// Script names the workspace declares
    pub tasks: Vec<String>,
    /// Names of workspaces this one depends on
    pub dependencies: Vec<String>,
    /// Names of workspaces that depend on this one
    pub dependents: Vec<String>,
    /// Distance from the dependency roots (workspaces without dependencies)
    pub depth: usize,
}

/// Dependency graph over the discovered workspaces
#[derive(Debug, Clone)]
pub struct WorkspaceGraph {
    root: PathBuf,
    layout: WorkspaceLayout,
    nodes: HashMap<String, WorkspaceNode>,
    sorted_order: Vec<String>,
    cycles: Vec<String>,
}

impl WorkspaceGraph {
    /// Build the graph from discovered workspaces
    ///
    /// Only dependencies pointing at sibling workspaces become edges.
    /// The topological order breaks ties by workspace name so repeated
    /// runs over the same repository produce the same order.
    #[instrument(skip_all, fields(count = workspaces.len()))]
    pub fn build(root: &WorkspaceRoot, workspaces: &[Workspace]) -> Self {
        let mut nodes: HashMap<String, WorkspaceNode> = HashMap::new();

        for workspace in workspaces {
            nodes.insert(
                workspace.name.clone(),
                WorkspaceNode {
                    name: workspace.name.clone(),
                    path: workspace.path.clone(),
                    kind: workspace.kind.clone(),
                    tasks: workspace.tasks.clone(),
                    dependencies: Vec::new(),
                    dependents: Vec::new(),
                    depth: 0,
                },
            );
        }

        // Wire edges in both directions
        for workspace in workspaces {
            for dep in &workspace.workspace_dependencies {
                if !nodes.contains_key(dep) {
                    continue;
                }
                if let Some(node) = nodes.get_mut(&workspace.name) {
                    node.dependencies.push(dep.clone());
                }
                if let Some(dep_node) = nodes.get_mut(dep) {
                    dep_node.dependents.push(workspace.name.clone());
                }
            }
        }
        for node in nodes.values_mut() {
            node.dependencies.sort();
            node.dependents.sort();
        }

        let (sorted_order, cycles) = topological_sort(&nodes);
        compute_depths(&mut nodes, &sorted_order);

        debug!(
            sorted = sorted_order.len(),
            cycles = cycles.len(),
            "Built workspace graph"
        );

        Self {
            root: root.root.clone(),
            layout: root.layout,
            nodes,
            sorted_order,
            cycles,
        }
    }

    /// Repository root directory
    pub fn root_dir(&self) -> &Path {
        &self.root
    }

    /// Command prefix for running workspace scripts, e.g. "pnpm run"
    pub fn script_runner(&self) -> &'static str {
        self.layout.script_runner()
    }

    /// Workspace names in dependency order (dependencies first)
    pub fn sorted(&self) -> &[String] {
        &self.sorted_order
    }

    /// Whether the graph contains at least one dependency cycle
    pub fn has_cycles(&self) -> bool {
        !self.cycles.is_empty()
    }

    /// Workspaces involved in (or downstream of) a cycle
    pub fn cycles(&self) -> &[String] {
        &self.cycles
    }

    /// Look up a workspace node by name
    pub fn get(&self, name: &str) -> Option<&WorkspaceNode> {
        self.nodes.get(name)
    }

    /// Direct dependencies of a workspace
    pub fn get_dependencies(&self, name: &str) -> Vec<&WorkspaceNode> {
        self.nodes
            .get(name)
            .map(|node| {
                node.dependencies
                    .iter()
                    .filter_map(|dep| self.nodes.get(dep))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Direct dependents of a workspace
    pub fn get_dependents(&self, name: &str) -> Vec<&WorkspaceNode> {
        self.nodes
            .get(name)
            .map(|node| {
                node.dependents
                    .iter()
                    .filter_map(|dep| self.nodes.get(dep))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Fail if the workspace graph contains cycles
    pub fn validate(&self) -> Result<()> {
        if self.has_cycles() {
            let description = find_cycle(&self.nodes, &self.cycles)
                .map(|cycle| cycle.join(" -> "))
                .unwrap_or_else(|| self.cycles.join(", "));
            return Err(GraphError::CircularDependency(description).into());
        }
        Ok(())
    }
}

/// Kahn's algorithm with a name-ordered ready set
///
/// Returns the topological order and the nodes that never reached
/// in-degree zero, which are the cycle members and everything
/// downstream of them.
fn topological_sort(nodes: &HashMap<String, WorkspaceNode>) -> (Vec<String>, Vec<String>) {
    let mut in_degree: HashMap<&str, usize> = nodes
        .values()
        .map(|node| (node.name.as_str(), node.dependencies.len()))
        .collect();

    let mut ready: BTreeSet<&str> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(name, _)| *name)
        .collect();

    let mut sorted = Vec::with_capacity(nodes.len());
    while let Some(name) = ready.pop_first() {
        sorted.push(name.to_string());
        if let Some(node) = nodes.get(name) {
            for dependent in &node.dependents {
                if let Some(degree) = in_degree.get_mut(dependent.as_str()) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(dependent);
                    }
                }
            }
        }
    }

    let mut cycles: Vec<String> = nodes
        .keys()
        .filter(|name| !sorted.contains(*name))
        .cloned()
        .collect();
    cycles.sort();

    (sorted, cycles)
}

/// Find one concrete cycle among the leftover nodes
///
/// Walks dependency edges restricted to the leftovers until a node
/// repeats. The returned path ends with the starting node again, so it
/// reads as a loop.
fn find_cycle(nodes: &HashMap<String, WorkspaceNode>, leftovers: &[String]) -> Option<Vec<String>> {
    fn visit(
        name: &str,
        nodes: &HashMap<String, WorkspaceNode>,
        leftovers: &[String],
        path: &mut Vec<String>,
    ) -> Option<Vec<String>> {
        if let Some(pos) = path.iter().position(|p| p == name) {
            let mut cycle = path[pos..].to_vec();
            cycle.push(name.to_string());
            return Some(cycle);
        }

        path.push(name.to_string());
        if let Some(node) = nodes.get(name) {
            let mut deps: Vec<&String> = node
                .dependencies
                .iter()
                .filter(|dep| leftovers.contains(*dep))
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

/// Depth of each node is one more than the deepest dependency
fn compute_depths(nodes: &mut HashMap<String, WorkspaceNode>, sorted: &[String]) {
    for name in sorted {
        let depth = nodes
            .get(name)
            .map(|node| {
                node.dependencies
                    .iter()
                    .filter_map(|dep| nodes.get(dep))
                    .map(|dep| dep.depth + 1)
                    .max()
                    .unwrap_or(0)
            })
            .unwrap_or(0);
        if let Some(node) = nodes.get_mut(name) {
            node.depth = depth;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workspace(name: &str, deps: Vec<&str>) -> Workspace {
        Workspace {
            name: name.to_string(),
            path: PathBuf::from("/repo").join(name),
            manifest_path: PathBuf::from("/repo").join(name).join("package.json"),
            kind: "npm".to_string(),
            tasks: vec!["build".to_string()],
            workspace_dependencies: deps.into_iter().map(String::from).collect(),
        }
    }

    fn test_root() -> WorkspaceRoot {
        WorkspaceRoot::new("/repo", WorkspaceLayout::Npm, vec!["*".to_string()])
    }

    #[test]
    fn test_build_graph() {
        let workspaces = vec![
            workspace("app", vec!["lib"]),
            workspace("lib", vec![]),
        ];
        let graph = WorkspaceGraph::build(&test_root(), &workspaces);

        assert_eq!(graph.sorted(), &["lib", "app"]);
        assert!(!graph.has_cycles());
        assert_eq!(graph.get("app").unwrap().dependencies, vec!["lib"]);
        assert_eq!(graph.get("lib").unwrap().dependents, vec!["app"]);
    }

    #[test]
    fn test_sorted_order_is_deterministic() {
        let workspaces = vec![
            workspace("zeta", vec![]),
            workspace("alpha", vec![]),
            workspace("mid", vec!["alpha", "zeta"]),
        ];
        let graph = WorkspaceGraph::build(&test_root(), &workspaces);
        assert_eq!(graph.sorted(), &["alpha", "zeta", "mid"]);
    }

    #[test]
    fn test_depths() {
        let workspaces = vec![
            workspace("base", vec![]),
            workspace("mid", vec!["base"]),
            workspace("top", vec!["mid", "base"]),
        ];
        let graph = WorkspaceGraph::build(&test_root(), &workspaces);

        assert_eq!(graph.get("base").unwrap().depth, 0);
        assert_eq!(graph.get("mid").unwrap().depth, 1);
        assert_eq!(graph.get("top").unwrap().depth, 2);
    }

    #[test]
    fn test_cycle_detection() {
        let workspaces = vec![
            workspace("a", vec!["b"]),
            workspace("b", vec!["a"]),
            workspace("c", vec![]),
        ];
        let graph = WorkspaceGraph::build(&test_root(), &workspaces);

        assert!(graph.has_cycles());
        assert_eq!(graph.cycles(), &["a", "b"]);
        assert_eq!(graph.sorted(), &["c"]);

        let err = graph.validate().unwrap_err();
        let message = err.to_string();
        assert!(message.contains("Circular dependency"));
        assert!(message.contains("a -> b -> a") || message.contains("b -> a -> b"));
    }

    #[test]
    fn test_external_dependencies_ignored() {
        let mut ws = workspace("app", vec![]);
        ws.workspace_dependencies = vec!["react".to_string()];
        let graph = WorkspaceGraph::build(&test_root(), &[ws]);

        assert!(graph.get("app").unwrap().dependencies.is_empty());
        assert!(!graph.has_cycles());
    }

    #[test]
    fn test_get_dependencies_and_dependents() {
        let workspaces = vec![
            workspace("app", vec!["lib", "util"]),
            workspace("lib", vec!["util"]),
            workspace("util", vec![]),
        ];
        let graph = WorkspaceGraph::build(&test_root(), &workspaces);

        let deps: Vec<&str> = graph
            .get_dependencies("app")
            .iter()
            .map(|n| n.name.as_str())
            .collect();
        assert_eq!(deps, vec!["lib", "util"]);

        let dependents: Vec<&str> = graph
            .get_dependents("util")
            .iter()
            .map(|n| n.name.as_str())
            .collect();
        assert_eq!(dependents, vec!["app", "lib"]);
    }
}
