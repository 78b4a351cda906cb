//! Task scheduling and execution
//!
//! Executes a resolved [`TaskGraph`] with a bounded worker pool. Instances
//! are dispatched the moment their dependencies succeed, in (workspace,
//! task) order when several become ready together. A failure marks every
//! transitive dependent as skipped while unrelated branches keep running.
//! Cancellation stops dispatch and kills the commands in flight.
//!
//! With a cache attached, each instance computes its fingerprint before
//! running, takes the per-fingerprint lock, and either restores the cached
//! result or executes and stores it.

use crate::cache::{collect_outputs, CacheEntry, CacheError, TaskCache};
use crate::dag::{TaskGraph, TaskNode};
use crate::fingerprint::{hash_inputs, resolve_env, Fingerprint};
use crate::reporter::{TaskEvent, TaskReporter};
use crate::task::TaskId;
use chrono::Utc;
use std::collections::{BTreeSet, HashMap};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, watch, Semaphore};
use tracing::{instrument, warn};

/// Errors from executing a single command
#[derive(Debug, Error)]
pub enum TaskExecutionError {
    /// The command could not be spawned
    #[error("Failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    /// Waiting for the command failed
    #[error("Failed to wait for '{command}': {source}")]
    Wait {
        command: String,
        source: std::io::Error,
    },

    /// The command exited with a non-zero code
    #[error("Command exited with code {code}")]
    NonZeroExit { code: i32 },

    /// The run was cancelled while the command was executing
    #[error("Cancelled")]
    Cancelled,
}

/// Final state of one task instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    /// Executed successfully
    Success,
    /// Result restored from the cache
    CacheHit,
    /// Execution failed
    Failed(String),
    /// Not run because an upstream dependency failed
    Skipped,
    /// Not run, or killed mid-run, because the run was cancelled
    Cancelled,
}

impl TaskStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success | Self::CacheHit)
    }
}

/// Outcome of one task instance
#[derive(Debug, Clone)]
pub struct TaskResult {
    pub id: TaskId,
    pub status: TaskStatus,
    pub duration: Duration,
    pub stdout: String,
    pub stderr: String,
}

/// Scheduler options
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Maximum number of concurrently executing tasks
    pub concurrency: usize,
    /// Environment variable names every fingerprint covers
    pub pass_env: Vec<String>,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            concurrency: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            pass_env: Vec::new(),
        }
    }
}

/// Requests cancellation of a running schedule
#[derive(Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    /// Stop dispatching new tasks and kill the ones in flight
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Executes task graphs
pub struct TaskScheduler {
    options: SchedulerOptions,
    cache: Option<Arc<TaskCache>>,
    reporter: Arc<dyn TaskReporter>,
    cancel_tx: Arc<watch::Sender<bool>>,
    cancel_rx: watch::Receiver<bool>,
}

/// Mutable bookkeeping for one run
struct RunState {
    results: HashMap<TaskId, TaskResult>,
    fingerprints: HashMap<TaskId, Fingerprint>,
    pending: HashMap<TaskId, usize>,
    ready: BTreeSet<TaskId>,
    cancelled: bool,
}

impl TaskScheduler {
    pub fn new(
        options: SchedulerOptions,
        cache: Option<TaskCache>,
        reporter: Arc<dyn TaskReporter>,
    ) -> Self {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        Self {
            options,
            cache: cache.map(Arc::new),
            reporter,
            cancel_tx: Arc::new(cancel_tx),
            cancel_rx,
        }
    }

    /// Handle for cancelling this scheduler's runs, e.g. from a signal handler
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            tx: Arc::clone(&self.cancel_tx),
        }
    }

    /// Execute every instance in the graph
    ///
    /// Returns one result per instance, in dependency order.
    #[instrument(skip_all, fields(tasks = graph.len(), concurrency = self.options.concurrency))]
    pub async fn execute(&self, graph: &TaskGraph) -> Vec<TaskResult> {
        let run_started = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.options.concurrency.max(1)));
        let pass_env = Arc::new(self.options.pass_env.clone());

        let mut state = RunState {
            results: HashMap::new(),
            fingerprints: HashMap::new(),
            pending: HashMap::new(),
            ready: BTreeSet::new(),
            cancelled: *self.cancel_rx.borrow(),
        };
        for id in graph.sorted() {
            let degree = graph.get(id).map(|n| n.dependencies.len()).unwrap_or(0);
            if degree == 0 {
                state.ready.insert(id.clone());
            } else {
                state.pending.insert(id.clone(), degree);
            }
        }

        let (done_tx, mut done_rx) =
            mpsc::unbounded_channel::<(TaskResult, Option<Fingerprint>)>();
        let mut cancel_rx = self.cancel_rx.clone();
        let mut running = 0usize;

        loop {
            // Dispatch everything ready, in (workspace, task) order
            while let Some(id) = state.ready.pop_first() {
                if state.results.contains_key(&id) {
                    continue;
                }
                if state.cancelled {
                    self.reporter.report(TaskEvent::Cancelled { id: id.clone() });
                    self.finish(graph, &mut state, empty_result(id, TaskStatus::Cancelled), None);
                    continue;
                }
                let Some(node) = graph.get(&id) else { continue };

                // Upstream fingerprints; the chain breaks if any is missing
                let upstream: Option<Vec<Fingerprint>> = if self.cache.is_some() {
                    node.dependencies
                        .iter()
                        .map(|dep| state.fingerprints.get(dep).cloned())
                        .collect()
                } else {
                    None
                };

                let worker = Worker {
                    node: node.clone(),
                    cache: self.cache.clone(),
                    reporter: Arc::clone(&self.reporter),
                    pass_env: Arc::clone(&pass_env),
                    semaphore: Arc::clone(&semaphore),
                    cancel_rx: self.cancel_rx.clone(),
                    upstream,
                };
                let done_tx = done_tx.clone();
                tokio::spawn(async move {
                    let outcome = worker.run().await;
                    let _ = done_tx.send(outcome);
                });
                running += 1;
            }

            if running == 0 {
                break;
            }

            tokio::select! {
                message = done_rx.recv() => {
                    let Some((result, fingerprint)) = message else { break };
                    running -= 1;
                    self.finish(graph, &mut state, result, fingerprint);
                }
                _ = cancel_rx.changed(), if !state.cancelled => {
                    state.cancelled = true;
                }
            }
        }

        // Anything left without a result never became ready
        for id in graph.sorted() {
            if state.results.contains_key(id) {
                continue;
            }
            let status = if state.cancelled {
                self.reporter.report(TaskEvent::Cancelled { id: id.clone() });
                TaskStatus::Cancelled
            } else {
                self.reporter.report(TaskEvent::Skipped {
                    id: id.clone(),
                    reason: "upstream did not complete".to_string(),
                });
                TaskStatus::Skipped
            };
            state
                .results
                .insert(id.clone(), empty_result(id.clone(), status));
        }

        let ordered: Vec<TaskResult> = graph
            .sorted()
            .iter()
            .filter_map(|id| state.results.remove(id))
            .collect();

        let mut succeeded = 0;
        let mut failed = 0;
        let mut cached = 0;
        let mut skipped = 0;
        let mut cancelled = 0;
        for result in &ordered {
            match result.status {
                TaskStatus::Success => succeeded += 1,
                TaskStatus::CacheHit => cached += 1,
                TaskStatus::Failed(_) => failed += 1,
                TaskStatus::Skipped => skipped += 1,
                TaskStatus::Cancelled => cancelled += 1,
            }
        }
        self.reporter.report(TaskEvent::AllCompleted {
            total: ordered.len(),
            succeeded,
            failed,
            cached,
            skipped,
            cancelled,
            duration: run_started.elapsed(),
        });

        ordered
    }

    /// Record a result and propagate its consequences
    fn finish(
        &self,
        graph: &TaskGraph,
        state: &mut RunState,
        result: TaskResult,
        fingerprint: Option<Fingerprint>,
    ) {
        let id = result.id.clone();
        let status = result.status.clone();
        if let Some(fingerprint) = fingerprint {
            state.fingerprints.insert(id.clone(), fingerprint);
        }
        state.results.insert(id.clone(), result);

        match status {
            TaskStatus::Success | TaskStatus::CacheHit => {
                self.unlock_dependents(graph, &id, state);
            }
            TaskStatus::Failed(_) => {
                self.mark_downstream(graph, &id, state, TaskStatus::Skipped);
            }
            TaskStatus::Cancelled => {
                self.mark_downstream(graph, &id, state, TaskStatus::Cancelled);
            }
            TaskStatus::Skipped => {}
        }
    }

    fn unlock_dependents(&self, graph: &TaskGraph, id: &TaskId, state: &mut RunState) {
        let Some(node) = graph.get(id) else { return };
        for dependent in &node.dependents {
            if state.results.contains_key(dependent) {
                continue;
            }
            if let Some(degree) = state.pending.get_mut(dependent) {
                *degree -= 1;
                if *degree == 0 {
                    state.pending.remove(dependent);
                    state.ready.insert(dependent.clone());
                }
            }
        }
    }

    /// Mark every transitive dependent as skipped or cancelled
    fn mark_downstream(
        &self,
        graph: &TaskGraph,
        cause: &TaskId,
        state: &mut RunState,
        status: TaskStatus,
    ) {
        let mut queue: Vec<TaskId> = graph
            .get(cause)
            .map(|node| node.dependents.iter().cloned().collect())
            .unwrap_or_default();

        while let Some(id) = queue.pop() {
            if state.results.contains_key(&id) {
                continue;
            }
            state.pending.remove(&id);
            state.ready.remove(&id);

            match status {
                TaskStatus::Cancelled => {
                    self.reporter.report(TaskEvent::Cancelled { id: id.clone() });
                }
                _ => {
                    self.reporter.report(TaskEvent::Skipped {
                        id: id.clone(),
                        reason: format!("upstream {cause} failed"),
                    });
                }
            }
            state
                .results
                .insert(id.clone(), empty_result(id.clone(), status.clone()));

            if let Some(node) = graph.get(&id) {
                queue.extend(node.dependents.iter().cloned());
            }
        }
    }
}

fn empty_result(id: TaskId, status: TaskStatus) -> TaskResult {
    TaskResult {
        id,
        status,
        duration: Duration::ZERO,
        stdout: String::new(),
        stderr: String::new(),
    }
}

/// Executes one task instance on the pool
struct Worker {
    node: TaskNode,
    cache: Option<Arc<TaskCache>>,
    reporter: Arc<dyn TaskReporter>,
    pass_env: Arc<Vec<String>>,
    semaphore: Arc<Semaphore>,
    cancel_rx: watch::Receiver<bool>,
    upstream: Option<Vec<Fingerprint>>,
}

impl Worker {
    async fn run(mut self) -> (TaskResult, Option<Fingerprint>) {
        let id = self.node.id.clone();

        // Waiting for a slot is not executing; the bound covers execution only
        let Ok(_permit) = Arc::clone(&self.semaphore).acquire_owned().await else {
            return (empty_result(id, TaskStatus::Cancelled), None);
        };

        if *self.cancel_rx.borrow() {
            self.reporter.report(TaskEvent::Cancelled { id: id.clone() });
            return (empty_result(id, TaskStatus::Cancelled), None);
        }

        let started = Instant::now();

        let fingerprint = match (&self.cache, &self.upstream) {
            (Some(_), Some(upstream)) if !self.node.definition.persistent => {
                match compute_fingerprint(&self.node, &self.pass_env, upstream) {
                    Ok(fingerprint) => Some(fingerprint),
                    Err(e) => {
                        warn!(task = %id, error = %e, "Input hashing failed, skipping cache");
                        None
                    }
                }
            }
            _ => None,
        };

        if let (Some(cache), Some(fingerprint)) = (self.cache.clone(), fingerprint.clone()) {
            // Hold the fingerprint lock across lookup and execution so
            // identical work runs at most once at a time; a second instance
            // waits here and then hits what the first stored
            let lock = cache.lock(&fingerprint);
            let _guard = lock.lock().await;

            if let Some(entry) = cache.lookup(&fingerprint, &self.node.dir) {
                self.replay_logs(&entry);
                let duration = started.elapsed();
                self.reporter.report(TaskEvent::Completed {
                    id: id.clone(),
                    duration,
                    cached: true,
                });
                let result = TaskResult {
                    id,
                    status: TaskStatus::CacheHit,
                    duration,
                    stdout: entry.stdout,
                    stderr: entry.stderr,
                };
                return (result, Some(fingerprint));
            }

            let result = self.execute_command(started).await;
            if matches!(result.status, TaskStatus::Success) {
                self.store_result(&cache, &fingerprint, &result);
            }
            return (result, Some(fingerprint));
        }

        let result = self.execute_command(started).await;
        (result, None)
    }

    async fn execute_command(&mut self, started: Instant) -> TaskResult {
        let id = self.node.id.clone();
        self.reporter.report(TaskEvent::Started {
            id: id.clone(),
            command: self.node.command.clone(),
        });

        match run_shell_command(&self.node, Arc::clone(&self.reporter), &mut self.cancel_rx).await
        {
            Ok(output) if output.exit_code == 0 => {
                let duration = started.elapsed();
                self.reporter.report(TaskEvent::Completed {
                    id: id.clone(),
                    duration,
                    cached: false,
                });
                TaskResult {
                    id,
                    status: TaskStatus::Success,
                    duration,
                    stdout: output.stdout,
                    stderr: output.stderr,
                }
            }
            Ok(output) => {
                let duration = started.elapsed();
                let error = TaskExecutionError::NonZeroExit {
                    code: output.exit_code,
                }
                .to_string();
                self.reporter.report(TaskEvent::Failed {
                    id: id.clone(),
                    duration,
                    error: error.clone(),
                });
                TaskResult {
                    id,
                    status: TaskStatus::Failed(error),
                    duration,
                    stdout: output.stdout,
                    stderr: output.stderr,
                }
            }
            Err(TaskExecutionError::Cancelled) => {
                self.reporter.report(TaskEvent::Cancelled { id: id.clone() });
                TaskResult {
                    id,
                    status: TaskStatus::Cancelled,
                    duration: started.elapsed(),
                    stdout: String::new(),
                    stderr: String::new(),
                }
            }
            Err(e) => {
                let duration = started.elapsed();
                let error = e.to_string();
                self.reporter.report(TaskEvent::Failed {
                    id: id.clone(),
                    duration,
                    error: error.clone(),
                });
                TaskResult {
                    id,
                    status: TaskStatus::Failed(error),
                    duration,
                    stdout: String::new(),
                    stderr: String::new(),
                }
            }
        }
    }

    fn replay_logs(&self, entry: &CacheEntry) {
        for line in entry.stdout.lines() {
            self.reporter.report(TaskEvent::Output {
                id: self.node.id.clone(),
                line: line.to_string(),
                is_stderr: false,
            });
        }
        for line in entry.stderr.lines() {
            self.reporter.report(TaskEvent::Output {
                id: self.node.id.clone(),
                line: line.to_string(),
                is_stderr: true,
            });
        }
    }

    fn store_result(&self, cache: &TaskCache, fingerprint: &Fingerprint, result: &TaskResult) {
        let output_files = match collect_outputs(&self.node.dir, &self.node.definition.outputs) {
            Ok(files) => files,
            Err(e) => {
                warn!(task = %self.node.id, error = %e, "Output collection failed, not caching");
                return;
            }
        };

        let entry = CacheEntry {
            fingerprint: fingerprint.clone(),
            task: self.node.id.to_string(),
            output_files,
            stdout: result.stdout.clone(),
            stderr: result.stderr.clone(),
            duration_ms: result.duration.as_millis() as u64,
            created_at: Utc::now(),
        };
        cache.store(fingerprint, &self.node.dir, &entry);
    }
}

fn compute_fingerprint(
    node: &TaskNode,
    pass_env: &[String],
    upstream: &[Fingerprint],
) -> Result<Fingerprint, CacheError> {
    let env = resolve_env(&node.definition.env, pass_env);
    let inputs = hash_inputs(&node.dir, &node.definition.inputs, &node.definition.outputs)?;
    Ok(Fingerprint::compute(&node.command, &env, &inputs, upstream))
}

struct CommandOutput {
    exit_code: i32,
    stdout: String,
    stderr: String,
}

/// Run the node's command through the shell, streaming output lines
///
/// Cancellation kills the child process and drains the readers before
/// returning.
async fn run_shell_command(
    node: &TaskNode,
    reporter: Arc<dyn TaskReporter>,
    cancel_rx: &mut watch::Receiver<bool>,
) -> Result<CommandOutput, TaskExecutionError> {
    let mut command = Command::new("sh");
    command
        .arg("-c")
        .arg(&node.command)
        .current_dir(&node.dir)
        .envs(&node.definition.env)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn().map_err(|e| TaskExecutionError::Spawn {
        command: node.command.clone(),
        source: e,
    })?;

    let stdout_task = spawn_line_reader(
        child.stdout.take(),
        node.id.clone(),
        false,
        Arc::clone(&reporter),
    );
    let stderr_task = spawn_line_reader(child.stderr.take(), node.id.clone(), true, reporter);

    let status = tokio::select! {
        status = child.wait() => status.map_err(|e| TaskExecutionError::Wait {
            command: node.command.clone(),
            source: e,
        })?,
        _ = cancel_rx.changed() => {
            let _ = child.kill().await;
            let _ = stdout_task.await;
            let _ = stderr_task.await;
            return Err(TaskExecutionError::Cancelled);
        }
    };

    let stdout = stdout_task.await.unwrap_or_default().join("\n");
    let stderr = stderr_task.await.unwrap_or_default().join("\n");

    Ok(CommandOutput {
        exit_code: status.code().unwrap_or(-1),
        stdout,
        stderr,
    })
}

fn spawn_line_reader<R>(
    stream: Option<R>,
    id: TaskId,
    is_stderr: bool,
    reporter: Arc<dyn TaskReporter>,
) -> tokio::task::JoinHandle<Vec<String>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = Vec::new();
        let Some(stream) = stream else { return lines };
        let mut reader = BufReader::new(stream).lines();
        while let Ok(Some(line)) = reader.next_line().await {
            reporter.report(TaskEvent::Output {
                id: id.clone(),
                line: line.clone(),
                is_stderr,
            });
            lines.push(line);
        }
        lines
    })
}
