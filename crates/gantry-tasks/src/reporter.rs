//! Task execution reporting
//!
//! The scheduler emits [`TaskEvent`]s through a [`TaskReporter`] as tasks
//! start, stream output and finish. The CLI installs its own console
//! reporter; [`TracingReporter`] forwards events to the log and
//! [`CollectingReporter`] records them for inspection in tests.

use crate::task::TaskId;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Events emitted during a run
#[derive(Debug, Clone)]
pub enum TaskEvent {
    /// A task started executing
    Started { id: TaskId, command: String },
    /// A task produced a line of output
    Output {
        id: TaskId,
        line: String,
        is_stderr: bool,
    },
    /// A task finished successfully
    Completed {
        id: TaskId,
        duration: Duration,
        /// Whether the result came from the cache
        cached: bool,
    },
    /// A task failed
    Failed {
        id: TaskId,
        duration: Duration,
        error: String,
    },
    /// A task was skipped because something upstream failed
    Skipped { id: TaskId, reason: String },
    /// A task was cancelled before or during execution
    Cancelled { id: TaskId },
    /// The whole run finished
    AllCompleted {
        total: usize,
        succeeded: usize,
        failed: usize,
        cached: usize,
        skipped: usize,
        cancelled: usize,
        duration: Duration,
    },
}

/// Receives task events during a run
pub trait TaskReporter: Send + Sync {
    fn report(&self, event: TaskEvent);
}

/// Reporter that forwards events to the tracing log
#[derive(Debug, Default)]
pub struct TracingReporter;

impl TaskReporter for TracingReporter {
    fn report(&self, event: TaskEvent) {
        match event {
            TaskEvent::Started { id, command } => {
                info!(task = %id, command = %command, "Task started");
            }
            TaskEvent::Output { id, line, is_stderr } => {
                debug!(task = %id, stderr = is_stderr, "{line}");
            }
            TaskEvent::Completed { id, duration, cached } => {
                info!(task = %id, duration_ms = duration.as_millis() as u64, cached, "Task completed");
            }
            TaskEvent::Failed { id, duration, error } => {
                error!(task = %id, duration_ms = duration.as_millis() as u64, error = %error, "Task failed");
            }
            TaskEvent::Skipped { id, reason } => {
                warn!(task = %id, reason = %reason, "Task skipped");
            }
            TaskEvent::Cancelled { id } => {
                warn!(task = %id, "Task cancelled");
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
                info!(
                    total,
                    succeeded,
                    failed,
                    cached,
                    skipped,
                    cancelled,
                    duration_ms = duration.as_millis() as u64,
                    "Run completed"
                );
            }
        }
    }
}

/// Reporter that records every event, for tests
#[derive(Debug, Default)]
pub struct CollectingReporter {
    events: Mutex<Vec<TaskEvent>>,
}

impl CollectingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events reported so far
    pub fn events(&self) -> Vec<TaskEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl TaskReporter for CollectingReporter {
    fn report(&self, event: TaskEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collecting_reporter_records_events() {
        let reporter = CollectingReporter::new();
        reporter.report(TaskEvent::Started {
            id: TaskId::new("app", "build"),
            command: "npm run build".to_string(),
        });
        reporter.report(TaskEvent::Completed {
            id: TaskId::new("app", "build"),
            duration: Duration::from_millis(250),
            cached: false,
        });

        let events = reporter.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], TaskEvent::Started { id, .. } if id.task == "build"));
        assert!(matches!(&events[1], TaskEvent::Completed { cached: false, .. }));
    }

    #[test]
    fn test_tracing_reporter_handles_all_events() {
        let reporter = TracingReporter;
        let id = TaskId::new("app", "build");
        reporter.report(TaskEvent::Started {
            id: id.clone(),
            command: "true".to_string(),
        });
        reporter.report(TaskEvent::Output {
            id: id.clone(),
            line: "hello".to_string(),
            is_stderr: false,
        });
        reporter.report(TaskEvent::Failed {
            id: id.clone(),
            duration: Duration::from_secs(1),
            error: "exit 1".to_string(),
        });
        reporter.report(TaskEvent::Skipped {
            id: id.clone(),
            reason: "dependency failed".to_string(),
        });
        reporter.report(TaskEvent::Cancelled { id });
        reporter.report(TaskEvent::AllCompleted {
            total: 5,
            succeeded: 1,
            failed: 1,
            cached: 1,
            skipped: 1,
            cancelled: 1,
            duration: Duration::from_secs(2),
        });
    }
}
