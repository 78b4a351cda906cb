//! Graph command: inspect the workspace dependency graph

use anyhow::Context;
use clap::Args;
use console::style;

use gantry_core::config::load_config_or_default;
use gantry_core::{WorkspaceDiscovery, WorkspaceGraph, WorkspaceLayout, WorkspaceRoot};

use crate::cli::{Cli, OutputFormat};

/// Show the workspace dependency graph
#[derive(Debug, Args)]
pub struct GraphCommand {
    /// Show only this workspace and its direct neighbors
    #[arg(long)]
    pub focus: Option<String>,
}

impl GraphCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let cwd = std::env::current_dir()?;
        let (config, root) = load_config_or_default(&cwd)?;

        let workspace_root = if config.workspaces.patterns.is_empty() {
            WorkspaceRoot::detect(&root)?
                .context("No workspace found; add a root manifest or a [workspaces] section")?
        } else {
            WorkspaceRoot::new(
                &root,
                WorkspaceLayout::Explicit,
                config.workspaces.patterns.clone(),
            )
        };
        let layout = workspace_root.layout;

        let discovered = WorkspaceDiscovery::new(workspace_root.clone()).discover()?;
        let graph = WorkspaceGraph::build(&workspace_root, &discovered);
        graph.validate()?;

        let names: Vec<&String> = match &self.focus {
            Some(focus) => {
                let node = graph
                    .get(focus)
                    .with_context(|| format!("Unknown workspace '{focus}'"))?;
                let mut names: Vec<&String> = node
                    .dependencies
                    .iter()
                    .chain(std::iter::once(&node.name))
                    .chain(node.dependents.iter())
                    .collect();
                names.dedup();
                names
            }
            None => graph.sorted().iter().collect(),
        };

        if cli.format == OutputFormat::Json {
            let nodes: Vec<serde_json::Value> = names
                .iter()
                .filter_map(|name| graph.get(name))
                .map(|node| {
                    serde_json::json!({
                        "name": node.name,
                        "path": relative_path(&node.path, graph.root_dir()),
                        "kind": node.kind,
                        "depth": node.depth,
                        "dependencies": node.dependencies,
                        "dependents": node.dependents,
                        "tasks": node.tasks,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&nodes)?);
            return Ok(());
        }

        if !cli.quiet {
            println!(
                "{} ({} layout, {} workspace{})",
                style("Workspace Graph").bold(),
                layout,
                names.len(),
                if names.len() == 1 { "" } else { "s" },
            );
            println!();

            for name in &names {
                let Some(node) = graph.get(name) else { continue };
                let location = relative_path(&node.path, graph.root_dir());
                if node.dependencies.is_empty() {
                    println!(
                        "  {}  {}",
                        style(&node.name).bold(),
                        style(&location).dim()
                    );
                } else {
                    println!(
                        "  {}  {}  {} {}",
                        style(&node.name).bold(),
                        style(&location).dim(),
                        style("←").dim(),
                        node.dependencies.join(", ")
                    );
                }
                if cli.verbose && !node.tasks.is_empty() {
                    println!("      {}", style(node.tasks.join(", ")).dim());
                }
            }
        }

        Ok(())
    }
}

fn relative_path(path: &std::path::Path, root: &std::path::Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .display()
        .to_string()
}
