//! Workspace member discovery
//!
//! Expands the root's member patterns, parses each manifest found and
//! resolves which dependencies point at sibling workspaces.

use crate::error::{DiscoveryError, Result};
use crate::workspace::detect::WorkspaceRoot;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

pub const KIND_NPM: &str = "npm";
pub const KIND_CARGO: &str = "cargo";

/// A discovered workspace member
#[derive(Debug, Clone)]
pub struct Workspace {
    /// Workspace name as declared in its manifest
    pub name: String,
    /// Absolute path to the workspace directory
    pub path: PathBuf,
    /// Absolute path to the manifest file
    pub manifest_path: PathBuf,
    /// Manifest kind ("npm" or "cargo")
    pub kind: String,
    /// Script names the workspace declares (npm `scripts` keys)
    pub tasks: Vec<String>,
    /// Names of sibling workspaces this one depends on
    pub workspace_dependencies: Vec<String>,
}

/// Discovers workspace members under a detected root
pub struct WorkspaceDiscovery {
    root: WorkspaceRoot,
}

impl WorkspaceDiscovery {
    pub fn new(root: WorkspaceRoot) -> Self {
        Self { root }
    }

    /// Discover all workspaces in the repository
    ///
    /// Works in two passes: first every member manifest is parsed, then
    /// dependency names are intersected with the set of discovered names
    /// to find the internal edges. The result is sorted by name.
    #[instrument(skip_all, fields(root = %self.root.root.display()))]
    pub fn discover(&self) -> Result<Vec<Workspace>> {
        let mut workspaces: Vec<Workspace> = Vec::new();
        let mut seen_names: HashMap<String, PathBuf> = HashMap::new();
        let mut seen_dirs: HashSet<PathBuf> = HashSet::new();

        for pattern in &self.root.patterns {
            for dir in self.expand_pattern(pattern)? {
                if !seen_dirs.insert(dir.clone()) {
                    continue;
                }
                let Some(workspace) = self.parse_member(&dir)? else {
                    continue;
                };

                if let Some(first) = seen_names.get(&workspace.name) {
                    return Err(DiscoveryError::DuplicateName {
                        name: workspace.name,
                        first: first.clone(),
                        second: workspace.path,
                    }
                    .into());
                }
                seen_names.insert(workspace.name.clone(), workspace.path.clone());
                workspaces.push(workspace);
            }
        }

        let names: HashSet<String> = workspaces.iter().map(|w| w.name.clone()).collect();
        for workspace in &mut workspaces {
            workspace.workspace_dependencies = match workspace.kind.as_str() {
                KIND_NPM => find_npm_workspace_deps(&workspace.manifest_path, &names)?,
                KIND_CARGO => find_cargo_workspace_deps(&workspace.manifest_path, &names)?,
                _ => Vec::new(),
            };
        }

        workspaces.sort_by(|a, b| a.name.cmp(&b.name));

        info!(count = workspaces.len(), "Discovered workspaces");
        Ok(workspaces)
    }

    /// Expand one member pattern into candidate directories
    fn expand_pattern(&self, pattern: &str) -> Result<Vec<PathBuf>> {
        if pattern == "." {
            return Ok(vec![self.root.root.clone()]);
        }

        let full = self.root.root.join(pattern);
        let full = full.to_string_lossy();
        let paths = glob::glob(&full).map_err(|e| DiscoveryError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;

        Ok(paths
            .filter_map(std::result::Result::ok)
            .filter(|p| p.is_dir())
            .collect())
    }

    /// Parse the manifest of a member directory, if it has one
    fn parse_member(&self, dir: &Path) -> Result<Option<Workspace>> {
        for candidate in self.root.layout.manifest_candidates() {
            let manifest = dir.join(candidate);
            if !manifest.is_file() {
                continue;
            }
            let workspace = match *candidate {
                "package.json" => parse_npm_manifest(dir, &manifest)?,
                "Cargo.toml" => parse_cargo_manifest(dir, &manifest)?,
                _ => continue,
            };
            return Ok(Some(workspace));
        }

        debug!(dir = %dir.display(), "No manifest in matched directory, skipping");
        Ok(None)
    }
}

fn manifest_error(path: &Path, reason: impl std::fmt::Display) -> DiscoveryError {
    DiscoveryError::Manifest {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

fn parse_npm_manifest(dir: &Path, manifest: &Path) -> Result<Workspace> {
    #[derive(Deserialize)]
    struct PackageJson {
        name: Option<String>,
        scripts: Option<HashMap<String, String>>,
    }

    let content = std::fs::read_to_string(manifest).map_err(DiscoveryError::Io)?;
    let parsed: PackageJson =
        serde_json::from_str(&content).map_err(|e| manifest_error(manifest, e))?;

    let name = parsed
        .name
        .ok_or_else(|| manifest_error(manifest, "missing \"name\" field"))?;

    let mut tasks: Vec<String> = parsed
        .scripts
        .map(|s| s.into_keys().collect())
        .unwrap_or_default();
    tasks.sort();

    Ok(Workspace {
        name,
        path: dir.to_path_buf(),
        manifest_path: manifest.to_path_buf(),
        kind: KIND_NPM.to_string(),
        tasks,
        workspace_dependencies: Vec::new(),
    })
}

fn parse_cargo_manifest(dir: &Path, manifest: &Path) -> Result<Workspace> {
    #[derive(Deserialize)]
    struct CargoToml {
        package: Option<CargoPackage>,
    }

    #[derive(Deserialize)]
    struct CargoPackage {
        name: String,
    }

    let content = std::fs::read_to_string(manifest).map_err(DiscoveryError::Io)?;
    let parsed: CargoToml =
        toml::from_str(&content).map_err(|e| manifest_error(manifest, e))?;

    let package = parsed
        .package
        .ok_or_else(|| manifest_error(manifest, "missing [package] section"))?;

    Ok(Workspace {
        name: package.name,
        path: dir.to_path_buf(),
        manifest_path: manifest.to_path_buf(),
        kind: KIND_CARGO.to_string(),
        tasks: Vec::new(),
        workspace_dependencies: Vec::new(),
    })
}

/// Find dependencies of an npm workspace that are sibling workspaces
fn find_npm_workspace_deps(manifest: &Path, names: &HashSet<String>) -> Result<Vec<String>> {
    #[derive(Deserialize)]
    struct PackageJson {
        dependencies: Option<HashMap<String, serde_json::Value>>,
        #[serde(rename = "devDependencies")]
        dev_dependencies: Option<HashMap<String, serde_json::Value>>,
        #[serde(rename = "peerDependencies")]
        peer_dependencies: Option<HashMap<String, serde_json::Value>>,
    }

    let content = std::fs::read_to_string(manifest).map_err(DiscoveryError::Io)?;
    let parsed: PackageJson =
        serde_json::from_str(&content).map_err(|e| manifest_error(manifest, e))?;

    let mut deps: Vec<String> = [
        parsed.dependencies,
        parsed.dev_dependencies,
        parsed.peer_dependencies,
    ]
    .into_iter()
    .flatten()
    .flat_map(HashMap::into_keys)
    .filter(|name| names.contains(name))
    .collect();

    deps.sort();
    deps.dedup();
    Ok(deps)
}

/// Find dependencies of a Cargo workspace member that are sibling workspaces
fn find_cargo_workspace_deps(manifest: &Path, names: &HashSet<String>) -> Result<Vec<String>> {
    #[derive(Deserialize)]
    struct CargoToml {
        dependencies: Option<HashMap<String, toml::Value>>,
        #[serde(rename = "dev-dependencies")]
        dev_dependencies: Option<HashMap<String, toml::Value>>,
        #[serde(rename = "build-dependencies")]
        build_dependencies: Option<HashMap<String, toml::Value>>,
    }

    let content = std::fs::read_to_string(manifest).map_err(DiscoveryError::Io)?;
    let parsed: CargoToml =
        toml::from_str(&content).map_err(|e| manifest_error(manifest, e))?;

    let mut deps: Vec<String> = [
        parsed.dependencies,
        parsed.dev_dependencies,
        parsed.build_dependencies,
    ]
    .into_iter()
    .flatten()
    .flat_map(HashMap::into_keys)
    .filter(|name| names.contains(name))
    .collect();

    deps.sort();
    deps.dedup();
    Ok(deps)
}
