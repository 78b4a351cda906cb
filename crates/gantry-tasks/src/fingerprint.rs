//! Task fingerprints
//!
//! A fingerprint identifies one unit of work: the resolved command, the
//! hashed contents of the declared input files, the environment the task
//! sees and the fingerprints of its upstream dependencies. Instances with
//! equal fingerprints would do identical work, so the fingerprint doubles
//! as the cache key. A change in any input, or in any transitive
//! dependency's inputs, changes the fingerprint.

use crate::cache::CacheError;
use globset::{Glob, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use walkdir::WalkDir;

/// Directory names never hashed as inputs
const EXCLUDED_DIRS: &[&str] = [".git", "node_modules", ".gantry", "target"].as_slice();

/// A content hash identifying one unit of task work
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Combine the parts of a task's identity into its fingerprint
    ///
    /// Environment and input maps are ordered, and upstream fingerprints
    /// are sorted before hashing, so the result does not depend on
    /// traversal or completion order.
    pub fn compute(
        command: &str,
        env: &BTreeMap<String, String>,
        input_hashes: &BTreeMap<String, String>,
        upstream: &[Fingerprint],
    ) -> Self {
        let mut hasher = Sha256::new();

        hasher.update(b"command:");
        hasher.update(command.as_bytes());
        hasher.update(b"\n");

        for (key, value) in env {
            hasher.update(b"env:");
            hasher.update(key.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
            hasher.update(b"\n");
        }

        for (path, hash) in input_hashes {
            hasher.update(b"input:");
            hasher.update(path.as_bytes());
            hasher.update(b"=");
            hasher.update(hash.as_bytes());
            hasher.update(b"\n");
        }

        let mut upstream: Vec<&Fingerprint> = upstream.iter().collect();
        upstream.sort();
        for fingerprint in upstream {
            hasher.update(b"upstream:");
            hasher.update(fingerprint.0.as_bytes());
            hasher.update(b"\n");
        }

        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hash the declared input files of a workspace
///
/// `inputs` are globs relative to the workspace directory; a leading `!`
/// excludes matches. An empty include set means every file under the
/// workspace, minus the standing exclusions and the task's own outputs.
/// Keys of the returned map are workspace-relative paths with `/`
/// separators, so fingerprints agree across platforms.
pub fn hash_inputs(
    workspace_dir: &Path,
    inputs: &[String],
    outputs: &[String],
) -> Result<BTreeMap<String, String>, CacheError> {
    let mut include = GlobSetBuilder::new();
    let mut exclude = GlobSetBuilder::new();
    let mut has_includes = false;

    for pattern in inputs {
        if let Some(negated) = pattern.strip_prefix('!') {
            exclude.add(parse_glob(negated)?);
        } else {
            include.add(parse_glob(pattern)?);
            has_includes = true;
        }
    }
    for pattern in outputs {
        exclude.add(parse_glob(pattern)?);
    }

    let include = include.build().map_err(|e| CacheError::Glob(e.to_string()))?;
    let exclude = exclude.build().map_err(|e| CacheError::Glob(e.to_string()))?;

    let mut hashes = BTreeMap::new();
    let walker = WalkDir::new(workspace_dir).into_iter().filter_entry(|entry| {
        entry.depth() == 0
            || !entry
                .file_name()
                .to_str()
                .map(|name| EXCLUDED_DIRS.contains(&name))
                .unwrap_or(false)
    });

    for entry in walker {
        let entry = entry.map_err(|e| CacheError::Io(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(workspace_dir) else {
            continue;
        };
        let key = unix_path(relative);
        if has_includes && !include.is_match(&key) {
            continue;
        }
        if exclude.is_match(&key) {
            continue;
        }
        hashes.insert(key, hash_file(entry.path())?);
    }

    Ok(hashes)
}

/// Resolve the environment a task's fingerprint covers
///
/// Global pass-through names contribute their current values, with unset
/// variables recorded as empty so set-to-empty and unset agree. The
/// task's own env entries override.
pub fn resolve_env(
    task_env: &HashMap<String, String>,
    pass_env: &[String],
) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    for name in pass_env {
        let value = std::env::var(name).unwrap_or_default();
        env.insert(name.clone(), value);
    }
    for (key, value) in task_env {
        env.insert(key.clone(), value.clone());
    }
    env
}

fn parse_glob(pattern: &str) -> Result<Glob, CacheError> {
    Glob::new(pattern).map_err(|e| CacheError::Glob(format!("'{pattern}': {e}")))
}

fn hash_file(path: &Path) -> Result<String, CacheError> {
    let contents = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&contents);
    Ok(format!("{:x}", hasher.finalize()))
}

fn unix_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn no_env() -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let mut env = BTreeMap::new();
        env.insert("NODE_ENV".to_string(), "production".to_string());
        let mut inputs = BTreeMap::new();
        inputs.insert("src/index.js".to_string(), "abc123".to_string());

        let a = Fingerprint::compute("npm run build", &env, &inputs, &[]);
        let b = Fingerprint::compute("npm run build", &env, &inputs, &[]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_changes_with_command() {
        let a = Fingerprint::compute("npm run build", &no_env(), &BTreeMap::new(), &[]);
        let b = Fingerprint::compute("npm run test", &no_env(), &BTreeMap::new(), &[]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_fingerprint_changes_with_env_value() {
        let mut env = BTreeMap::new();
        env.insert("NODE_ENV".to_string(), "production".to_string());
        let a = Fingerprint::compute("build", &env, &BTreeMap::new(), &[]);
        env.insert("NODE_ENV".to_string(), "development".to_string());
        let b = Fingerprint::compute("build", &env, &BTreeMap::new(), &[]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_fingerprint_changes_with_upstream() {
        let upstream_a = Fingerprint::compute("dep", &no_env(), &BTreeMap::new(), &[]);
        let upstream_b = Fingerprint::compute("dep2", &no_env(), &BTreeMap::new(), &[]);

        let a = Fingerprint::compute("build", &no_env(), &BTreeMap::new(), &[upstream_a.clone()]);
        let b = Fingerprint::compute("build", &no_env(), &BTreeMap::new(), &[upstream_b]);
        let c = Fingerprint::compute("build", &no_env(), &BTreeMap::new(), &[upstream_a]);
        assert_ne!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn test_fingerprint_ignores_upstream_order() {
        let x = Fingerprint::compute("x", &no_env(), &BTreeMap::new(), &[]);
        let y = Fingerprint::compute("y", &no_env(), &BTreeMap::new(), &[]);

        let a = Fingerprint::compute("build", &no_env(), &BTreeMap::new(), &[x.clone(), y.clone()]);
        let b = Fingerprint::compute("build", &no_env(), &BTreeMap::new(), &[y, x]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_hash_inputs_walks_everything_by_default() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("src")).unwrap();
        std::fs::write(temp.path().join("src/index.js"), "a").unwrap();
        std::fs::write(temp.path().join("package.json"), "{}").unwrap();

        let hashes = hash_inputs(temp.path(), &[], &[]).unwrap();
        let keys: Vec<&str> = hashes.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["package.json", "src/index.js"]);
    }

    #[test]
    fn test_hash_inputs_skips_excluded_dirs() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("node_modules/react")).unwrap();
        std::fs::write(temp.path().join("node_modules/react/index.js"), "x").unwrap();
        std::fs::write(temp.path().join("index.js"), "a").unwrap();

        let hashes = hash_inputs(temp.path(), &[], &[]).unwrap();
        assert_eq!(hashes.len(), 1);
        assert!(hashes.contains_key("index.js"));
    }

    #[test]
    fn test_hash_inputs_honors_include_and_exclude() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("src")).unwrap();
        std::fs::write(temp.path().join("src/app.js"), "a").unwrap();
        std::fs::write(temp.path().join("src/app.test.js"), "t").unwrap();
        std::fs::write(temp.path().join("README.md"), "r").unwrap();

        let inputs = vec!["src/**/*.js".to_string(), "!**/*.test.js".to_string()];
        let hashes = hash_inputs(temp.path(), &inputs, &[]).unwrap();
        let keys: Vec<&str> = hashes.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["src/app.js"]);
    }

    #[test]
    fn test_hash_inputs_excludes_outputs() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("dist")).unwrap();
        std::fs::write(temp.path().join("dist/bundle.js"), "b").unwrap();
        std::fs::write(temp.path().join("index.js"), "a").unwrap();

        let outputs = vec!["dist/**".to_string()];
        let hashes = hash_inputs(temp.path(), &[], &outputs).unwrap();
        assert_eq!(hashes.len(), 1);
        assert!(hashes.contains_key("index.js"));
    }

    #[test]
    fn test_hash_inputs_reflects_content_changes() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("input.txt"), "one").unwrap();
        let before = hash_inputs(temp.path(), &[], &[]).unwrap();

        std::fs::write(temp.path().join("input.txt"), "two").unwrap();
        let after = hash_inputs(temp.path(), &[], &[]).unwrap();

        assert_ne!(before.get("input.txt"), after.get("input.txt"));
    }

    #[test]
    fn test_resolve_env_records_unset_as_empty() {
        let pass = vec!["GANTRY_TEST_SURELY_UNSET".to_string()];
        let env = resolve_env(&HashMap::new(), &pass);
        assert_eq!(env.get("GANTRY_TEST_SURELY_UNSET").map(String::as_str), Some(""));
    }

    #[test]
    fn test_resolve_env_task_overrides() {
        let mut task_env = HashMap::new();
        task_env.insert("NODE_ENV".to_string(), "production".to_string());
        let env = resolve_env(&task_env, &[]);
        assert_eq!(env.get("NODE_ENV").map(String::as_str), Some("production"));
    }
}
