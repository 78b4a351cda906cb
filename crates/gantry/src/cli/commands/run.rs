//! Run command: execute tasks across the workspace

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use console::style;

use gantry_core::config::{find_config, load_config_or_default};
use gantry_core::{
    PipelineTask, WorkspaceDiscovery, WorkspaceGraph, WorkspaceLayout, WorkspaceRoot,
};
use gantry_tasks::scheduler::SchedulerOptions;
use gantry_tasks::{
    TaskCache, TaskDefinition, TaskEvent, TaskGraph, TaskReporter, TaskScheduler, TaskStatus,
    TracingReporter,
};

use crate::cli::{Cli, OutputFormat};
use crate::exit_codes;

/// Run tasks across the workspace
#[derive(Debug, Args)]
pub struct RunCommand {
    /// Tasks to run (e.g., build test lint)
    #[arg(required = true)]
    pub tasks: Vec<String>,

    /// Only run in workspaces matching a glob (can be repeated)
    #[arg(long)]
    pub filter: Vec<String>,

    /// Maximum concurrent tasks
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Show the execution plan without running
    #[arg(long)]
    pub dry_run: bool,

    /// Disable the task cache
    #[arg(long)]
    pub no_cache: bool,
}

impl RunCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let runtime = tokio::runtime::Runtime::new()?;
        runtime.block_on(self.execute_async(cli))
    }

    async fn execute_async(&self, cli: &Cli) -> anyhow::Result<()> {
        let cwd = std::env::current_dir()?;

        if find_config(&cwd).is_none() && !cli.quiet && cli.format == OutputFormat::Text {
            println!(
                "{} No configuration found, using defaults.",
                style("!").yellow().bold()
            );
        }
        let (config, root) = load_config_or_default(&cwd)?;

        // Explicit patterns in the config override layout detection
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

        let discovered = WorkspaceDiscovery::new(workspace_root.clone()).discover()?;
        if discovered.is_empty() {
            anyhow::bail!("No workspaces found under {}", root.display());
        }

        let graph = WorkspaceGraph::build(&workspace_root, &discovered);
        graph.validate()?;

        let selected = select_workspaces(&graph, &self.filter)?;
        if selected.is_empty() {
            if !cli.quiet {
                println!("{} No workspaces match the filter.", style("✓").green());
            }
            return Ok(());
        }

        let pipeline = build_pipeline(&config.tasks.pipeline, &self.tasks);
        let task_graph = TaskGraph::build(&graph, &pipeline, &self.tasks, &selected)
            .map_err(|e| anyhow::anyhow!("{}", e))?;

        if task_graph.is_empty() {
            if !cli.quiet {
                println!("{} No tasks to run.", style("✓").green());
            }
            return Ok(());
        }

        // Show plan
        let workspace_count = task_graph
            .sorted()
            .iter()
            .map(|id| id.workspace.as_str())
            .collect::<HashSet<_>>()
            .len();

        if !cli.quiet && cli.format == OutputFormat::Text {
            println!();
            println!(
                "{} {} task{} across {} workspace{}",
                style("→").blue(),
                task_graph.len(),
                if task_graph.len() == 1 { "" } else { "s" },
                workspace_count,
                if workspace_count == 1 { "" } else { "s" },
            );

            if cli.verbose || self.dry_run {
                println!();
                for (i, wave) in task_graph.execution_plan().iter().enumerate() {
                    println!("  {} {}", style(format!("wave {i}")).dim(), wave.join(", "));
                }
            }

            if self.dry_run {
                println!();
                println!(
                    "{}",
                    style("[DRY RUN - no tasks will be executed]").yellow().bold()
                );
                return Ok(());
            }

            println!();
        }

        if self.dry_run {
            if cli.format == OutputFormat::Json {
                let plan: Vec<serde_json::Value> = task_graph
                    .execution_plan()
                    .iter()
                    .enumerate()
                    .map(|(i, wave)| {
                        serde_json::json!({
                            "wave": i,
                            "tasks": wave,
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&plan)?);
            }
            return Ok(());
        }

        // Set up cache
        let cache = if !self.no_cache && config.tasks.cache.enabled {
            Some(TaskCache::local(root.join(&config.tasks.cache.dir)))
        } else {
            None
        };

        // Set up reporter
        let reporter: Arc<dyn TaskReporter> = if cli.quiet || cli.format == OutputFormat::Json {
            Arc::new(TracingReporter)
        } else {
            Arc::new(ConsoleReporter::new(cli.verbose))
        };

        // Configure scheduler
        let concurrency = self
            .concurrency
            .or(config.tasks.concurrency)
            .unwrap_or(SchedulerOptions::default().concurrency);
        let options = SchedulerOptions {
            concurrency,
            pass_env: config.tasks.env.clone(),
        };

        let scheduler = TaskScheduler::new(options, cache, reporter);

        // Ctrl-C cancels the run and kills whatever is still executing
        let cancel = scheduler.cancel_handle();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });

        let results = scheduler.execute(&task_graph).await;

        let succeeded = results.iter().filter(|r| r.status.is_success()).count();
        let cached = results
            .iter()
            .filter(|r| matches!(r.status, TaskStatus::CacheHit))
            .count();
        let skipped = results
            .iter()
            .filter(|r| matches!(r.status, TaskStatus::Skipped))
            .count();
        let cancelled = results
            .iter()
            .filter(|r| matches!(r.status, TaskStatus::Cancelled))
            .count();
        let failed: Vec<_> = results
            .iter()
            .filter(|r| matches!(r.status, TaskStatus::Failed(_)))
            .collect();

        if cli.format == OutputFormat::Json {
            let summary = serde_json::json!({
                "total": results.len(),
                "succeeded": succeeded,
                "failed": failed.len(),
                "cached": cached,
                "skipped": skipped,
                "cancelled": cancelled,
                "tasks": results.iter().map(|r| {
                    serde_json::json!({
                        "id": r.id.to_string(),
                        "status": format!("{:?}", r.status),
                        "duration_ms": r.duration.as_millis(),
                    })
                }).collect::<Vec<_>>(),
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }

        if cancelled > 0 {
            if !cli.quiet && cli.format == OutputFormat::Text {
                println!();
                println!(
                    "  {} Run cancelled, {} task{} did not finish",
                    style("○").yellow().bold(),
                    cancelled,
                    if cancelled == 1 { "" } else { "s" }
                );
            }
            std::process::exit(exit_codes::CANCELLED);
        }

        if !failed.is_empty() {
            if !cli.quiet && cli.format == OutputFormat::Text {
                println!();
                println!(
                    "  {} {}/{} tasks failed:",
                    style("✗").red().bold(),
                    failed.len(),
                    results.len()
                );
                for r in &failed {
                    if let TaskStatus::Failed(ref err) = r.status {
                        println!("    {} {}: {}", style("✗").red(), r.id, err);
                    }
                }
            }
            anyhow::bail!(
                "{} task{} failed",
                failed.len(),
                if failed.len() == 1 { "" } else { "s" }
            );
        }

        Ok(())
    }
}

/// Expand filter globs against the workspace names, keeping graph order
fn select_workspaces(graph: &WorkspaceGraph, filters: &[String]) -> anyhow::Result<Vec<String>> {
    if filters.is_empty() {
        return Ok(graph.sorted().to_vec());
    }

    let mut patterns = Vec::new();
    for filter in filters {
        let pattern = glob::Pattern::new(filter)
            .with_context(|| format!("Invalid filter pattern '{filter}'"))?;
        patterns.push(pattern);
    }

    Ok(graph
        .sorted()
        .iter()
        .filter(|name| patterns.iter().any(|p| p.matches(name)))
        .cloned()
        .collect())
}

/// Build task definitions from the configured pipeline
///
/// The whole pipeline is converted so that referenced tasks and root-scoped
/// entries are available to the resolver, not just the requested names.
/// Requested names missing from the pipeline get sensible defaults.
fn build_pipeline(
    config_pipeline: &HashMap<String, PipelineTask>,
    requested: &[String],
) -> HashMap<String, TaskDefinition> {
    let mut pipeline: HashMap<String, TaskDefinition> = config_pipeline
        .iter()
        .map(|(name, task)| (name.clone(), TaskDefinition::from_config(name.clone(), task)))
        .collect();

    for task_name in requested {
        if pipeline.contains_key(task_name) {
            continue;
        }
        let def = match task_name.as_str() {
            "build" => TaskDefinition::new("build").with_depends_on("^build"),
            "test" => TaskDefinition::new("test").with_depends_on("build"),
            _ => TaskDefinition::new(task_name),
        };
        pipeline.insert(task_name.clone(), def);
    }

    pipeline
}

/// Console reporter with live output
struct ConsoleReporter {
    verbose: bool,
}

impl ConsoleReporter {
    fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl TaskReporter for ConsoleReporter {
    fn report(&self, event: TaskEvent) {
        match event {
            TaskEvent::Started { id, command } => {
                println!(
                    "  {} {} {}",
                    style("▸").dim(),
                    style(&id).bold(),
                    if self.verbose {
                        style(format!("({})", command)).dim().to_string()
                    } else {
                        String::new()
                    }
                );
            }
            TaskEvent::Output {
                id,
                line,
                is_stderr,
            } => {
                if self.verbose {
                    if is_stderr {
                        println!("    {} {}", style(format!("[{}]", id)).red().dim(), line);
                    } else {
                        println!("    {} {}", style(format!("[{}]", id)).dim(), line);
                    }
                }
            }
            TaskEvent::Completed {
                id,
                duration,
                cached,
            } => {
                if cached {
                    println!(
                        "  {} {} {} {}",
                        style("✓").green(),
                        style(&id).green(),
                        style("(cached)").cyan(),
                        style(format!("{:.1}s", duration.as_secs_f64())).dim()
                    );
                } else {
                    println!(
                        "  {} {} {}",
                        style("✓").green(),
                        style(&id).green(),
                        style(format!("{:.1}s", duration.as_secs_f64())).dim()
                    );
                }
            }
            TaskEvent::Failed {
                id,
                duration,
                error,
            } => {
                println!(
                    "  {} {} {} {}",
                    style("✗").red(),
                    style(&id).red(),
                    style(format!("{:.1}s", duration.as_secs_f64())).dim(),
                    style(error).red().dim()
                );
            }
            TaskEvent::Skipped { id, reason } => {
                println!(
                    "  {} {} {}",
                    style("○").yellow(),
                    style(&id).yellow(),
                    style(format!("({})", reason)).dim()
                );
            }
            TaskEvent::Cancelled { id } => {
                println!(
                    "  {} {} {}",
                    style("○").yellow(),
                    style(&id).yellow(),
                    style("(cancelled)").dim()
                );
            }
            TaskEvent::AllCompleted {
                total,
                succeeded,
                failed,
                cached,
                skipped,
                cancelled,
                duration,
            } => {
                println!();
                let mut line = format!(
                    "{}/{} succeeded, {} failed, {} cached",
                    succeeded + cached,
                    total,
                    failed,
                    cached
                );
                if skipped > 0 {
                    line.push_str(&format!(", {} skipped", skipped));
                }
                if cancelled > 0 {
                    line.push_str(&format!(", {} cancelled", cancelled));
                }
                println!(
                    "  {} {} ({:.1}s)",
                    if failed == 0 && cancelled == 0 {
                        style("✓").green().bold()
                    } else {
                        style("✗").red().bold()
                    },
                    line,
                    duration.as_secs_f64()
                );
            }
        }
    }
}
