//! Output cache for task results
//!
//! Successful task runs are stored under their fingerprint: the recorded
//! logs plus a copy of every file matched by the task's output globs. A
//! later run with the same fingerprint restores the outputs and replays
//! the logs instead of executing. Backends are pluggable through
//! [`CacheBackend`]; the local backend keeps entries as plain directories
//! under `.gantry/cache`. Cache failures are never fatal: [`TaskCache`]
//! degrades them to a miss with a warning.

use crate::fingerprint::Fingerprint;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, warn};

/// Cache operation errors
#[derive(Debug, Error)]
pub enum CacheError {
    /// IO error
    #[error("Cache IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Metadata serialization error
    #[error("Cache metadata error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid glob pattern
    #[error("Invalid glob pattern {0}")]
    Glob(String),

    /// A stored entry names a path outside its workspace
    #[error("Malformed path in cache entry: {0}")]
    MalformedPath(String),
}

/// A cached task result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Fingerprint the entry is stored under
    pub fingerprint: Fingerprint,
    /// Display id of the task instance that produced the entry
    pub task: String,
    /// Workspace-relative paths of the stored output files
    pub output_files: Vec<String>,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
    /// How long the original execution took
    pub duration_ms: u64,
    /// When the entry was stored
    pub created_at: DateTime<Utc>,
}

/// Storage for task results, keyed by fingerprint
pub trait CacheBackend: Send + Sync {
    /// Fetch an entry and restore its output files into the workspace
    fn get(
        &self,
        fingerprint: &Fingerprint,
        workspace_dir: &Path,
    ) -> Result<Option<CacheEntry>, CacheError>;

    /// Store an entry together with the output files it names
    fn put(
        &self,
        fingerprint: &Fingerprint,
        workspace_dir: &Path,
        entry: &CacheEntry,
    ) -> Result<(), CacheError>;
}

/// Filesystem cache backend
///
/// Each entry is a directory named after the fingerprint, holding the
/// copied output files under `outputs/` and an `entry.json` with the
/// metadata and logs.
pub struct LocalCacheBackend {
    cache_dir: PathBuf,
}

impl LocalCacheBackend {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn entry_dir(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.cache_dir.join(fingerprint.as_str())
    }

    /// Remove entries older than `max_age`
    pub fn prune(&self, max_age: Duration) -> Result<PruneStats, CacheError> {
        let cutoff = Utc::now() - max_age;
        let mut stats = PruneStats::default();

        if !self.cache_dir.exists() {
            return Ok(stats);
        }

        for dir_entry in std::fs::read_dir(&self.cache_dir)? {
            let path = dir_entry?.path();
            if !path.is_dir() {
                continue;
            }
            let metadata_path = path.join("entry.json");
            let created_at = std::fs::read_to_string(&metadata_path)
                .ok()
                .and_then(|content| serde_json::from_str::<CacheEntry>(&content).ok())
                .map(|entry| entry.created_at);

            // Entries without readable metadata are junk and get removed too
            let expired = created_at.map(|at| at < cutoff).unwrap_or(true);
            if expired {
                stats.reclaimed_bytes += dir_size(&path);
                std::fs::remove_dir_all(&path)?;
                stats.removed += 1;
            }
        }

        debug!(
            removed = stats.removed,
            reclaimed = stats.reclaimed_bytes,
            "Pruned cache"
        );
        Ok(stats)
    }

    /// Summarize what the cache currently holds
    pub fn status(&self) -> Result<CacheStats, CacheError> {
        let mut stats = CacheStats {
            cache_dir: self.cache_dir.clone(),
            entries: 0,
            total_size_bytes: 0,
        };

        if !self.cache_dir.exists() {
            return Ok(stats);
        }

        for dir_entry in std::fs::read_dir(&self.cache_dir)? {
            let path = dir_entry?.path();
            if !path.is_dir() {
                continue;
            }
            stats.entries += 1;
            stats.total_size_bytes += dir_size(&path);
        }

        Ok(stats)
    }

    /// Remove every entry
    pub fn clear(&self) -> Result<usize, CacheError> {
        let mut removed = 0;
        if !self.cache_dir.exists() {
            return Ok(removed);
        }
        for dir_entry in std::fs::read_dir(&self.cache_dir)? {
            let path = dir_entry?.path();
            if path.is_dir() {
                std::fs::remove_dir_all(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

impl CacheBackend for LocalCacheBackend {
    fn get(
        &self,
        fingerprint: &Fingerprint,
        workspace_dir: &Path,
    ) -> Result<Option<CacheEntry>, CacheError> {
        let entry_dir = self.entry_dir(fingerprint);
        let metadata_path = entry_dir.join("entry.json");
        if !metadata_path.is_file() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&metadata_path)?;
        let entry: CacheEntry = serde_json::from_str(&content)?;

        let outputs_dir = entry_dir.join("outputs");
        for relative in &entry.output_files {
            check_member_path(relative)?;
            let stored = outputs_dir.join(relative);
            if !stored.is_file() {
                // Entry is incomplete, likely an interrupted store
                debug!(
                    fingerprint = %fingerprint,
                    file = relative,
                    "Stored output missing, treating entry as a miss"
                );
                return Ok(None);
            }
            copy_file(&stored, &workspace_dir.join(relative))?;
        }

        Ok(Some(entry))
    }

    fn put(
        &self,
        fingerprint: &Fingerprint,
        workspace_dir: &Path,
        entry: &CacheEntry,
    ) -> Result<(), CacheError> {
        let entry_dir = self.entry_dir(fingerprint);
        let outputs_dir = entry_dir.join("outputs");
        std::fs::create_dir_all(&outputs_dir)?;

        for relative in &entry.output_files {
            check_member_path(relative)?;
            copy_file(&workspace_dir.join(relative), &outputs_dir.join(relative))?;
        }

        // entry.json is written last so a partially stored entry is never
        // visible as a hit
        let metadata = serde_json::to_string_pretty(entry)?;
        std::fs::write(entry_dir.join("entry.json"), metadata)?;

        Ok(())
    }
}

/// Expand a task's output globs into workspace-relative file paths
pub fn collect_outputs(
    workspace_dir: &Path,
    patterns: &[String],
) -> Result<Vec<String>, CacheError> {
    let mut files = Vec::new();

    for pattern in patterns {
        let full = workspace_dir.join(pattern);
        let matches = glob::glob(&full.to_string_lossy())
            .map_err(|e| CacheError::Glob(format!("'{pattern}': {e}")))?;
        for path in matches.filter_map(std::result::Result::ok) {
            if !path.is_file() {
                continue;
            }
            if let Ok(relative) = path.strip_prefix(workspace_dir) {
                files.push(unix_path(relative));
            }
        }
    }

    files.sort();
    files.dedup();
    Ok(files)
}

/// Front for cache access during a run
///
/// Wraps a backend with two policies: errors degrade to a miss with a
/// warning instead of failing the task, and each fingerprint carries a
/// lock so identical work is executed at most once concurrently.
pub struct TaskCache {
    backend: Arc<dyn CacheBackend>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl TaskCache {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// A cache over the local filesystem backend
    pub fn local(cache_dir: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(LocalCacheBackend::new(cache_dir)))
    }

    /// The lock serializing work on one fingerprint
    ///
    /// Holders of the lock should look up the fingerprint again before
    /// executing, since the previous holder may have stored the result.
    pub fn lock(&self, fingerprint: &Fingerprint) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(fingerprint.as_str().to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Look up a fingerprint, degrading backend errors to a miss
    pub fn lookup(&self, fingerprint: &Fingerprint, workspace_dir: &Path) -> Option<CacheEntry> {
        match self.backend.get(fingerprint, workspace_dir) {
            Ok(Some(entry)) => {
                debug!(fingerprint = %fingerprint, "Cache hit");
                Some(entry)
            }
            Ok(None) => {
                debug!(fingerprint = %fingerprint, "Cache miss");
                None
            }
            Err(e) => {
                warn!(
                    fingerprint = %fingerprint,
                    error = %e,
                    "Cache read failed, treating as miss"
                );
                None
            }
        }
    }

    /// Store a result, degrading backend errors to a warning
    pub fn store(&self, fingerprint: &Fingerprint, workspace_dir: &Path, entry: &CacheEntry) {
        if let Err(e) = self.backend.put(fingerprint, workspace_dir, entry) {
            warn!(
                fingerprint = %fingerprint,
                error = %e,
                "Cache write failed, result will not be reused"
            );
        }
    }
}

/// Statistics from a prune pass
#[derive(Debug, Default, Clone, Serialize)]
pub struct PruneStats {
    /// Entries removed
    pub removed: usize,
    /// Bytes reclaimed
    pub reclaimed_bytes: u64,
}

impl PruneStats {
    /// Human-readable reclaimed size
    pub fn formatted_reclaimed(&self) -> String {
        format_bytes(self.reclaimed_bytes)
    }
}

/// Current cache contents
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    /// Cache directory
    pub cache_dir: PathBuf,
    /// Number of entries
    pub entries: usize,
    /// Total size of all entries in bytes
    pub total_size_bytes: u64,
}

impl CacheStats {
    /// Human-readable total size
    pub fn formatted_size(&self) -> String {
        format_bytes(self.total_size_bytes)
    }
}

fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

/// Reject entry paths that would escape the workspace
fn check_member_path(relative: &str) -> Result<(), CacheError> {
    let path = Path::new(relative);
    let malformed = relative.is_empty()
        || path.is_absolute()
        || path
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)));
    if malformed {
        return Err(CacheError::MalformedPath(relative.to_string()));
    }
    Ok(())
}

fn copy_file(src: &Path, dst: &Path) -> Result<(), CacheError> {
    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::copy(src, dst)?;
    Ok(())
}

fn dir_size(path: &Path) -> u64 {
    walkdir::WalkDir::new(path)
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|meta| meta.len())
        .sum()
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

    fn entry_for(fingerprint: &Fingerprint, outputs: Vec<&str>) -> CacheEntry {
        CacheEntry {
            fingerprint: fingerprint.clone(),
            task: "app:build".to_string(),
            output_files: outputs.into_iter().map(String::from).collect(),
            stdout: "built ok\n".to_string(),
            stderr: String::new(),
            duration_ms: 1200,
            created_at: Utc::now(),
        }
    }

    fn fingerprint(seed: &str) -> Fingerprint {
        Fingerprint::compute(seed, &Default::default(), &Default::default(), &[])
    }

    #[test]
    fn test_put_get_round_trip_restores_outputs() {
        let cache_dir = TempDir::new().unwrap();
        let workspace = TempDir::new().unwrap();
        std::fs::create_dir_all(workspace.path().join("dist")).unwrap();
        std::fs::write(workspace.path().join("dist/bundle.js"), "bundle").unwrap();

        let backend = LocalCacheBackend::new(cache_dir.path());
        let fp = fingerprint("build");
        let entry = entry_for(&fp, vec!["dist/bundle.js"]);
        backend.put(&fp, workspace.path(), &entry).unwrap();

        // Restore into a fresh directory, as if the outputs were cleaned
        let fresh = TempDir::new().unwrap();
        let restored = backend.get(&fp, fresh.path()).unwrap().unwrap();

        assert_eq!(restored.stdout, "built ok\n");
        let content = std::fs::read_to_string(fresh.path().join("dist/bundle.js")).unwrap();
        assert_eq!(content, "bundle");
    }

    #[test]
    fn test_get_unknown_fingerprint_is_a_miss() {
        let cache_dir = TempDir::new().unwrap();
        let workspace = TempDir::new().unwrap();
        let backend = LocalCacheBackend::new(cache_dir.path());

        assert!(backend
            .get(&fingerprint("nothing"), workspace.path())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_entry_without_outputs_round_trips() {
        let cache_dir = TempDir::new().unwrap();
        let workspace = TempDir::new().unwrap();
        let backend = LocalCacheBackend::new(cache_dir.path());

        let fp = fingerprint("lint");
        backend
            .put(&fp, workspace.path(), &entry_for(&fp, vec![]))
            .unwrap();
        let restored = backend.get(&fp, workspace.path()).unwrap().unwrap();
        assert!(restored.output_files.is_empty());
    }

    #[test]
    fn test_incomplete_entry_is_a_miss() {
        let cache_dir = TempDir::new().unwrap();
        let workspace = TempDir::new().unwrap();
        let backend = LocalCacheBackend::new(cache_dir.path());

        let fp = fingerprint("build");
        let entry_dir = cache_dir.path().join(fp.as_str());
        std::fs::create_dir_all(&entry_dir).unwrap();
        let entry = entry_for(&fp, vec!["dist/missing.js"]);
        std::fs::write(
            entry_dir.join("entry.json"),
            serde_json::to_string(&entry).unwrap(),
        )
        .unwrap();

        assert!(backend.get(&fp, workspace.path()).unwrap().is_none());
    }

    #[test]
    fn test_escaping_output_path_rejected() {
        let cache_dir = TempDir::new().unwrap();
        let workspace = TempDir::new().unwrap();
        let backend = LocalCacheBackend::new(cache_dir.path());

        let fp = fingerprint("build");
        let entry = entry_for(&fp, vec!["../evil.sh"]);
        assert!(matches!(
            backend.put(&fp, workspace.path(), &entry),
            Err(CacheError::MalformedPath(_))
        ));
    }

    #[test]
    fn test_collect_outputs() {
        let workspace = TempDir::new().unwrap();
        std::fs::create_dir_all(workspace.path().join("dist/assets")).unwrap();
        std::fs::write(workspace.path().join("dist/bundle.js"), "b").unwrap();
        std::fs::write(workspace.path().join("dist/assets/logo.svg"), "l").unwrap();
        std::fs::write(workspace.path().join("notes.txt"), "n").unwrap();

        let patterns = vec!["dist/**/*".to_string()];
        let files = collect_outputs(workspace.path(), &patterns).unwrap();
        assert_eq!(files, vec!["dist/assets/logo.svg", "dist/bundle.js"]);
    }

    #[test]
    fn test_task_cache_degrades_backend_errors() {
        struct FailingBackend;

        impl CacheBackend for FailingBackend {
            fn get(
                &self,
                _fingerprint: &Fingerprint,
                _workspace_dir: &Path,
            ) -> Result<Option<CacheEntry>, CacheError> {
                Err(CacheError::Io(std::io::Error::other("disk on fire")))
            }

            fn put(
                &self,
                _fingerprint: &Fingerprint,
                _workspace_dir: &Path,
                _entry: &CacheEntry,
            ) -> Result<(), CacheError> {
                Err(CacheError::Io(std::io::Error::other("disk on fire")))
            }
        }

        let cache = TaskCache::new(Arc::new(FailingBackend));
        let workspace = TempDir::new().unwrap();
        let fp = fingerprint("build");

        // Both directions degrade without failing
        assert!(cache.lookup(&fp, workspace.path()).is_none());
        cache.store(&fp, workspace.path(), &entry_for(&fp, vec![]));
    }

    #[test]
    fn test_malformed_entry_degrades_to_miss() {
        let cache_dir = TempDir::new().unwrap();
        let workspace = TempDir::new().unwrap();

        let fp = fingerprint("build");
        let entry_dir = cache_dir.path().join(fp.as_str());
        std::fs::create_dir_all(&entry_dir).unwrap();
        std::fs::write(entry_dir.join("entry.json"), "{not json").unwrap();

        let cache = TaskCache::local(cache_dir.path());
        assert!(cache.lookup(&fp, workspace.path()).is_none());
    }

    #[tokio::test]
    async fn test_fingerprint_locks_are_exclusive() {
        let cache_dir = TempDir::new().unwrap();
        let cache = TaskCache::local(cache_dir.path());
        let fp = fingerprint("build");
        let other = fingerprint("test");

        let lock = cache.lock(&fp);
        assert!(Arc::ptr_eq(&lock, &cache.lock(&fp)));
        assert!(!Arc::ptr_eq(&lock, &cache.lock(&other)));

        let guard = lock.lock().await;
        assert!(cache.lock(&fp).try_lock().is_err());
        drop(guard);
        assert!(cache.lock(&fp).try_lock().is_ok());
    }

    #[test]
    fn test_prune_removes_old_entries() {
        let cache_dir = TempDir::new().unwrap();
        let workspace = TempDir::new().unwrap();
        let backend = LocalCacheBackend::new(cache_dir.path());

        let old_fp = fingerprint("old");
        let mut old_entry = entry_for(&old_fp, vec![]);
        old_entry.created_at = Utc::now() - Duration::days(30);
        backend.put(&old_fp, workspace.path(), &old_entry).unwrap();

        let new_fp = fingerprint("new");
        backend
            .put(&new_fp, workspace.path(), &entry_for(&new_fp, vec![]))
            .unwrap();

        let stats = backend.prune(Duration::days(7)).unwrap();
        assert_eq!(stats.removed, 1);
        assert!(backend.get(&old_fp, workspace.path()).unwrap().is_none());
        assert!(backend.get(&new_fp, workspace.path()).unwrap().is_some());
    }

    #[test]
    fn test_status_counts_entries() {
        let cache_dir = TempDir::new().unwrap();
        let workspace = TempDir::new().unwrap();
        let backend = LocalCacheBackend::new(cache_dir.path());

        let stats = backend.status().unwrap();
        assert_eq!(stats.entries, 0);

        for seed in ["a", "b"] {
            let fp = fingerprint(seed);
            backend
                .put(&fp, workspace.path(), &entry_for(&fp, vec![]))
                .unwrap();
        }

        let stats = backend.status().unwrap();
        assert_eq!(stats.entries, 2);
        assert!(stats.total_size_bytes > 0);
    }

    #[test]
    fn test_clear_removes_everything() {
        let cache_dir = TempDir::new().unwrap();
        let workspace = TempDir::new().unwrap();
        let backend = LocalCacheBackend::new(cache_dir.path());

        let fp = fingerprint("a");
        backend
            .put(&fp, workspace.path(), &entry_for(&fp, vec![]))
            .unwrap();

        assert_eq!(backend.clear().unwrap(), 1);
        assert_eq!(backend.status().unwrap().entries, 0);
    }

    #[test]
    fn test_formatted_size() {
        let stats = |bytes| CacheStats {
            cache_dir: PathBuf::from("/tmp/cache"),
            entries: 1,
            total_size_bytes: bytes,
        };
        assert_eq!(stats(512).formatted_size(), "512 B");
        assert_eq!(stats(2048).formatted_size(), "2.00 KB");
        assert_eq!(stats(5 * 1024 * 1024).formatted_size(), "5.00 MB");
        assert_eq!(stats(3 * 1024 * 1024 * 1024).formatted_size(), "3.00 GB");
    }
}
