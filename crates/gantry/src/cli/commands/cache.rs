//! Cache management command

use clap::{Args, Subcommand};
use console::style;

use gantry_core::config::load_config_or_default;
use gantry_tasks::cache::LocalCacheBackend;

use crate::cli::{Cli, OutputFormat};

/// Task cache management
#[derive(Debug, Args)]
pub struct CacheCommand {
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache subcommands
#[derive(Debug, Subcommand)]
pub enum CacheAction {
    /// Remove old cache entries
    Prune(CachePruneCommand),
    /// Show cache statistics
    Status(CacheStatusCommand),
    /// Clear all cached entries
    Clean(CacheCleanCommand),
}

/// Prune old cache entries
#[derive(Debug, Args)]
pub struct CachePruneCommand {
    /// Maximum age in days (default: 7)
    #[arg(long, default_value = "7")]
    pub max_age_days: u64,
}

/// Show cache statistics
#[derive(Debug, Args)]
pub struct CacheStatusCommand;

/// Clear all cached entries
#[derive(Debug, Args)]
pub struct CacheCleanCommand {
    /// Skip confirmation
    #[arg(short = 'y', long)]
    pub yes: bool,
}

impl CacheCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        match &self.action {
            CacheAction::Prune(cmd) => cmd.execute(cli),
            CacheAction::Status(cmd) => cmd.execute(cli),
            CacheAction::Clean(cmd) => cmd.execute(cli),
        }
    }
}

/// The configured local cache backend for the surrounding repository
fn local_backend() -> anyhow::Result<LocalCacheBackend> {
    let cwd = std::env::current_dir()?;
    let (config, root) = load_config_or_default(&cwd)?;
    Ok(LocalCacheBackend::new(root.join(&config.tasks.cache.dir)))
}

impl CachePruneCommand {
    fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let backend = local_backend()?;
        let max_age = chrono::Duration::days(self.max_age_days as i64);

        if !cli.quiet && cli.format == OutputFormat::Text {
            println!(
                "{} Pruning cache entries older than {} day{}...",
                style("→").blue(),
                self.max_age_days,
                if self.max_age_days == 1 { "" } else { "s" }
            );
        }

        let stats = backend.prune(max_age)?;

        if cli.format == OutputFormat::Json {
            let result = serde_json::json!({
                "removed": stats.removed,
                "reclaimed_bytes": stats.reclaimed_bytes,
            });
            println!("{}", serde_json::to_string_pretty(&result)?);
        } else if !cli.quiet {
            println!(
                "  {} Removed {} entr{}, reclaimed {}",
                style("✓").green(),
                stats.removed,
                if stats.removed == 1 { "y" } else { "ies" },
                stats.formatted_reclaimed()
            );
        }

        Ok(())
    }
}

impl CacheStatusCommand {
    fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let backend = local_backend()?;
        let stats = backend.status()?;

        if cli.format == OutputFormat::Json {
            println!("{}", serde_json::to_string_pretty(&stats)?);
        } else if !cli.quiet {
            println!("{}", style("Task Cache Status").bold());
            println!();
            println!("  Location: {}", style(stats.cache_dir.display()).cyan());
            println!("  Entries:  {}", stats.entries);
            println!("  Size:     {}", style(stats.formatted_size()).yellow());
        }

        Ok(())
    }
}

impl CacheCleanCommand {
    fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let backend = local_backend()?;
        let cache_dir = backend.cache_dir().to_path_buf();

        if !cache_dir.exists() {
            if !cli.quiet {
                println!("{} Cache directory does not exist.", style("✓").green());
            }
            return Ok(());
        }

        if !self.yes {
            let confirmed = dialoguer::Confirm::new()
                .with_prompt(format!(
                    "Remove all cached entries at {}?",
                    cache_dir.display()
                ))
                .default(false)
                .interact()?;

            if !confirmed {
                println!("{}", style("Aborted.").yellow());
                return Ok(());
            }
        }

        let removed = backend.clear()?;

        if cli.format == OutputFormat::Json {
            let result = serde_json::json!({ "removed": removed });
            println!("{}", serde_json::to_string_pretty(&result)?);
        } else if !cli.quiet {
            println!(
                "{} Removed {} entr{} from {}",
                style("✓").green(),
                removed,
                if removed == 1 { "y" } else { "ies" },
                style(cache_dir.display()).cyan()
            );
        }

        Ok(())
    }
}
