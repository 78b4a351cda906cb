//! Monorepo layout detection
//!
//! Figures out what kind of monorepo a directory is by probing for the
//! well-known marker files of each tool, and extracts the workspace
//! member patterns the tool declares.

use crate::error::{DiscoveryError, Result};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// The tool layout a repository root follows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceLayout {
    /// Member patterns come from the Gantry configuration
    Explicit,
    /// pnpm workspace (pnpm-workspace.yaml)
    Pnpm,
    /// Yarn workspaces (package.json + yarn.lock)
    Yarn,
    /// npm workspaces (package.json)
    Npm,
    /// Cargo workspace (Cargo.toml)
    Cargo,
}

impl WorkspaceLayout {
    /// The marker file that identifies this layout
    pub fn config_file(&self) -> &'static str {
        match self {
            Self::Explicit => "gantry.toml",
            Self::Pnpm => "pnpm-workspace.yaml",
            Self::Yarn | Self::Npm => "package.json",
            Self::Cargo => "Cargo.toml",
        }
    }

    /// Manifest file names workspace members are recognized by
    pub fn manifest_candidates(&self) -> &'static [&'static str] {
        match self {
            Self::Cargo => &["Cargo.toml"],
            Self::Pnpm | Self::Yarn | Self::Npm => &["package.json"],
            Self::Explicit => &["package.json", "Cargo.toml"],
        }
    }

    /// The command prefix used to invoke a workspace script by name
    pub fn script_runner(&self) -> &'static str {
        match self {
            Self::Pnpm => "pnpm run",
            Self::Yarn => "yarn run",
            _ => "npm run",
        }
    }
}

impl fmt::Display for WorkspaceLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Explicit => "explicit",
            Self::Pnpm => "pnpm",
            Self::Yarn => "yarn",
            Self::Npm => "npm",
            Self::Cargo => "cargo",
        };
        write!(f, "{name}")
    }
}

/// A detected repository root
#[derive(Debug, Clone)]
pub struct WorkspaceRoot {
    /// Absolute path to the repository root
    pub root: PathBuf,
    /// Detected layout
    pub layout: WorkspaceLayout,
    /// Glob patterns for member directories, relative to the root
    pub patterns: Vec<String>,
    /// The root itself is the only workspace
    pub is_single_workspace: bool,
}

impl WorkspaceRoot {
    /// Create a workspace root with explicit member patterns
    pub fn new(root: impl Into<PathBuf>, layout: WorkspaceLayout, patterns: Vec<String>) -> Self {
        Self {
            root: root.into(),
            layout,
            patterns,
            is_single_workspace: false,
        }
    }

    /// Detect the monorepo layout of a directory
    ///
    /// Probes for each supported tool in order of specificity. Returns
    /// `Ok(None)` when the directory holds no recognizable manifest at all.
    pub fn detect(path: &Path) -> Result<Option<Self>> {
        let detectors = [
            detect_pnpm_workspace,
            detect_npm_or_yarn_workspace,
            detect_cargo_workspace,
            detect_single_workspace,
        ];

        for detect in detectors {
            if let Some(root) = detect(path)? {
                debug!(
                    layout = %root.layout,
                    patterns = ?root.patterns,
                    "Detected workspace layout"
                );
                return Ok(Some(root));
            }
        }

        Ok(None)
    }
}

fn manifest_error(path: &Path, err: impl fmt::Display) -> DiscoveryError {
    DiscoveryError::Manifest {
        path: path.to_path_buf(),
        reason: err.to_string(),
    }
}

fn detect_pnpm_workspace(path: &Path) -> Result<Option<WorkspaceRoot>> {
    let manifest = path.join("pnpm-workspace.yaml");
    if !manifest.exists() {
        return Ok(None);
    }

    #[derive(Deserialize)]
    struct PnpmWorkspace {
        packages: Option<Vec<String>>,
    }

    let content = std::fs::read_to_string(&manifest).map_err(DiscoveryError::Io)?;
    let parsed: PnpmWorkspace =
        serde_yaml::from_str(&content).map_err(|e| manifest_error(&manifest, e))?;

    Ok(Some(WorkspaceRoot::new(
        path,
        WorkspaceLayout::Pnpm,
        parsed.packages.unwrap_or_default(),
    )))
}

fn detect_npm_or_yarn_workspace(path: &Path) -> Result<Option<WorkspaceRoot>> {
    let manifest = path.join("package.json");
    if !manifest.exists() {
        return Ok(None);
    }

    #[derive(Deserialize)]
    struct PackageJson {
        workspaces: Option<WorkspacesField>,
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum WorkspacesField {
        Patterns(Vec<String>),
        Config { packages: Vec<String> },
    }

    let content = std::fs::read_to_string(&manifest).map_err(DiscoveryError::Io)?;
    let parsed: PackageJson =
        serde_json::from_str(&content).map_err(|e| manifest_error(&manifest, e))?;

    let patterns = match parsed.workspaces {
        Some(WorkspacesField::Patterns(patterns)) => patterns,
        Some(WorkspacesField::Config { packages }) => packages,
        None => return Ok(None),
    };

    let layout = if path.join("yarn.lock").exists() {
        WorkspaceLayout::Yarn
    } else {
        WorkspaceLayout::Npm
    };

    Ok(Some(WorkspaceRoot::new(path, layout, patterns)))
}

fn detect_cargo_workspace(path: &Path) -> Result<Option<WorkspaceRoot>> {
    let manifest = path.join("Cargo.toml");
    if !manifest.exists() {
        return Ok(None);
    }

    #[derive(Deserialize)]
    struct CargoToml {
        workspace: Option<WorkspaceSection>,
    }

    #[derive(Deserialize)]
    struct WorkspaceSection {
        members: Option<Vec<String>>,
    }

    let content = std::fs::read_to_string(&manifest).map_err(DiscoveryError::Io)?;
    let parsed: CargoToml =
        toml::from_str(&content).map_err(|e| manifest_error(&manifest, e))?;

    match parsed.workspace {
        Some(workspace) => Ok(Some(WorkspaceRoot::new(
            path,
            WorkspaceLayout::Cargo,
            workspace.members.unwrap_or_default(),
        ))),
        None => Ok(None),
    }
}

/// Fallback for repositories that are a single package rather than a monorepo
fn detect_single_workspace(path: &Path) -> Result<Option<WorkspaceRoot>> {
    for (manifest, layout) in [
        ("package.json", WorkspaceLayout::Npm),
        ("Cargo.toml", WorkspaceLayout::Cargo),
    ] {
        if path.join(manifest).exists() {
            let mut root = WorkspaceRoot::new(path, layout, vec![".".to_string()]);
            root.is_single_workspace = true;
            return Ok(Some(root));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_detect_pnpm_workspace() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("pnpm-workspace.yaml"),
            "packages:\n  - \"packages/*\"\n  - \"apps/*\"\n",
        )
        .unwrap();

        let root = WorkspaceRoot::detect(temp.path()).unwrap().unwrap();
        assert_eq!(root.layout, WorkspaceLayout::Pnpm);
        assert_eq!(root.patterns, vec!["packages/*", "apps/*"]);
        assert!(!root.is_single_workspace);
    }

    #[test]
    fn test_detect_npm_workspaces_array() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("package.json"),
            r#"{"name": "root", "workspaces": ["packages/*"]}"#,
        )
        .unwrap();

        let root = WorkspaceRoot::detect(temp.path()).unwrap().unwrap();
        assert_eq!(root.layout, WorkspaceLayout::Npm);
        assert_eq!(root.patterns, vec!["packages/*"]);
    }

    #[test]
    fn test_detect_npm_workspaces_config_object() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("package.json"),
            r#"{"name": "root", "workspaces": {"packages": ["libs/*"]}}"#,
        )
        .unwrap();

        let root = WorkspaceRoot::detect(temp.path()).unwrap().unwrap();
        assert_eq!(root.patterns, vec!["libs/*"]);
    }

    #[test]
    fn test_detect_yarn_via_lockfile() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("package.json"),
            r#"{"name": "root", "workspaces": ["packages/*"]}"#,
        )
        .unwrap();
        std::fs::write(temp.path().join("yarn.lock"), "").unwrap();

        let root = WorkspaceRoot::detect(temp.path()).unwrap().unwrap();
        assert_eq!(root.layout, WorkspaceLayout::Yarn);
        assert_eq!(root.layout.script_runner(), "yarn run");
    }

    #[test]
    fn test_detect_cargo_workspace() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("Cargo.toml"),
            "[workspace]\nmembers = [\"crates/*\"]\n",
        )
        .unwrap();

        let root = WorkspaceRoot::detect(temp.path()).unwrap().unwrap();
        assert_eq!(root.layout, WorkspaceLayout::Cargo);
        assert_eq!(root.patterns, vec!["crates/*"]);
    }

    #[test]
    fn test_detect_single_package_fallback() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("package.json"), r#"{"name": "solo"}"#).unwrap();

        let root = WorkspaceRoot::detect(temp.path()).unwrap().unwrap();
        assert!(root.is_single_workspace);
        assert_eq!(root.patterns, vec!["."]);
    }

    #[test]
    fn test_detect_nothing() {
        let temp = TempDir::new().unwrap();
        assert!(WorkspaceRoot::detect(temp.path()).unwrap().is_none());
    }

    #[test]
    fn test_detect_malformed_root_manifest() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("package.json"), "{not json").unwrap();

        assert!(WorkspaceRoot::detect(temp.path()).is_err());
    }

    #[test]
    fn test_layout_display() {
        assert_eq!(WorkspaceLayout::Pnpm.to_string(), "pnpm");
        assert_eq!(WorkspaceLayout::Cargo.to_string(), "cargo");
    }
}
