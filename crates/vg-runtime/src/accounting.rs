//! The ACCOUNTING worker's bookkeeping (spec §5, §11.5): tracks submitted
//! callables' start times and warns when one runs past the connection's
//! `long_task_warn_after` threshold. Never cancels anything — it only logs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
use std::sync::Mutex;
use std::time::{Duration, Instant};

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque handle returned by [`RunningTaskRegistry::start`], passed back to
/// [`RunningTaskRegistry::finish`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

/// Live registry of in-flight worker callables, keyed by [`TaskId`].
/// Shared (via `Arc`) between the worker submitting callables and the
/// ACCOUNTING worker polling for stragglers.
#[derive(Default)]
pub struct RunningTaskRegistry {
    tasks: Mutex<HashMap<TaskId, RunningTask>>,
}

struct RunningTask {
    label: String,
    started_at: Instant,
    warned: bool,
}

impl RunningTaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a newly-submitted callable, identified by `label` (the
    /// worker name plus a short description, for the eventual warn log).
    pub fn start(&self, label: impl Into<String>) -> TaskId {
        let id = TaskId(NEXT_TASK_ID.fetch_add(1, Relaxed));
        let task = RunningTask { label: label.into(), started_at: Instant::now(), warned: false };
        self.tasks.lock().expect("task registry lock poisoned").insert(id, task);
        id
    }

    /// Marks a callable as complete, removing it from the registry.
    pub fn finish(&self, id: TaskId) {
        self.tasks.lock().expect("task registry lock poisoned").remove(&id);
    }

    /// Scans for tasks that have run past `threshold` and haven't already
    /// been warned about, marking them warned and returning their labels
    /// and elapsed durations for the caller to log.
    pub fn sweep_overdue(&self, threshold: Duration, now: Instant) -> Vec<(String, Duration)> {
        let mut tasks = self.tasks.lock().expect("task registry lock poisoned");
        let mut overdue = Vec::new();
        for task in tasks.values_mut() {
            if task.warned {
                continue;
            }
            let elapsed = now.duration_since(task.started_at);
            if elapsed >= threshold {
                task.warned = true;
                overdue.push((task.label.clone(), elapsed));
            }
        }
        overdue
    }

    pub fn in_flight(&self) -> usize {
        self.tasks.lock().expect("task registry lock poisoned").len()
    }
}
