//! Task resolution, caching, and execution for gantry
//!
//! This crate turns a workspace graph and a pipeline configuration into a
//! task graph, then executes it: bounded concurrency, failure propagation,
//! cancellation, and a content-addressed output cache keyed by task
//! fingerprints.

pub mod cache;
pub mod dag;
pub mod fingerprint;
pub mod reporter;
pub mod scheduler;
pub mod task;

pub use cache::{
    CacheBackend, CacheEntry, CacheError, CacheStats, LocalCacheBackend, PruneStats, TaskCache,
};
pub use dag::{CycleError, ResolveError, TaskGraph, TaskNode};
pub use fingerprint::Fingerprint;
pub use reporter::{CollectingReporter, TaskEvent, TaskReporter, TracingReporter};
pub use scheduler::{
    CancelHandle, SchedulerOptions, TaskResult, TaskScheduler, TaskStatus,
};
pub use task::{DependencyRef, TaskDefinition, TaskId, ROOT_WORKSPACE};
