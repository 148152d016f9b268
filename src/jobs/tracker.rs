//! Registry of running checkpoint tasks, keyed by signal id

use crate::jobs::context::JobContext;
use crate::jobs::tracking::{CheckpointTask, TrackReport};
use crate::metrics::Metrics;
use crate::models::{Signal, SignalId};
use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const REPORT_CHANNEL_CAPACITY: usize = 256;

struct TaskEntry {
    generation: u64,
    handle: JoinHandle<()>,
}

type Registry = Arc<Mutex<HashMap<SignalId, TaskEntry>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Releases the registry slot and the active gauge however the task ends,
/// including abort.
struct SlotGuard {
    id: SignalId,
    generation: u64,
    registry: Registry,
    metrics: Option<Arc<Metrics>>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let mut tasks = lock(&self.registry);
        if tasks
            .get(&self.id)
            .is_some_and(|entry| entry.generation == self.generation)
        {
            tasks.remove(&self.id);
        }
        if let Some(ref m) = self.metrics {
            m.tracking_tasks_active.dec();
        }
    }
}

pub struct Tracker {
    ctx: Arc<JobContext>,
    tasks: Registry,
    generation: AtomicU64,
    shutdown: watch::Sender<bool>,
    reports: broadcast::Sender<TrackReport>,
}

impl Tracker {
    pub fn new(ctx: Arc<JobContext>) -> Self {
        let (shutdown, _) = watch::channel(false);
        let (reports, _) = broadcast::channel(REPORT_CHANNEL_CAPACITY);
        Self {
            ctx,
            tasks: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
            shutdown,
            reports,
        }
    }

    pub fn context(&self) -> &Arc<JobContext> {
        &self.ctx
    }

    /// Start tracking `signal` in the background and return immediately.
    ///
    /// Returns `false` when the signal already has a live task or the tracker
    /// is shutting down.
    pub fn track(&self, signal: Signal) -> bool {
        let mut tasks = lock(&self.tasks);

        if *self.shutdown.borrow() {
            warn!(signal_id = %signal.id, "Tracker is shutting down, not tracking signal");
            return false;
        }
        if tasks
            .get(&signal.id)
            .is_some_and(|entry| !entry.handle.is_finished())
        {
            debug!(signal_id = %signal.id, "Signal already tracked");
            return false;
        }

        let id = signal.id.clone();
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let guard = SlotGuard {
            id: id.clone(),
            generation,
            registry: self.tasks.clone(),
            metrics: self.ctx.metrics.clone(),
        };
        if let Some(ref m) = self.ctx.metrics {
            m.tracking_tasks_active.inc();
        }

        let task = CheckpointTask::new(signal, self.ctx.clone(), self.shutdown.subscribe());
        let reports = self.reports.clone();
        let handle = tokio::spawn(async move {
            let _guard = guard;
            let report = task.run().await;
            // no subscribers is fine
            let _ = reports.send(report);
        });

        tasks.insert(id, TaskEntry { generation, handle });
        true
    }

    /// Abort the task for `id`; checkpoints already written stay written
    pub fn cancel(&self, id: &SignalId) -> bool {
        match lock(&self.tasks).remove(id) {
            Some(entry) => {
                entry.handle.abort();
                info!(signal_id = %id, "Tracking cancelled");
                true
            }
            None => false,
        }
    }

    pub fn is_tracking(&self, id: &SignalId) -> bool {
        lock(&self.tasks)
            .get(id)
            .is_some_and(|entry| !entry.handle.is_finished())
    }

    pub fn active(&self) -> usize {
        lock(&self.tasks)
            .values()
            .filter(|entry| !entry.handle.is_finished())
            .count()
    }

    /// Reports of tasks that finish after this call
    pub fn subscribe(&self) -> broadcast::Receiver<TrackReport> {
        self.reports.subscribe()
    }

    /// Wake every task with the shutdown signal, wait up to `grace` for them
    /// to stop, then abort the rest. Returns the number aborted.
    pub async fn shutdown(&self, grace: Duration) -> usize {
        self.shutdown.send_replace(true);

        let mut handles: Vec<JoinHandle<()>> = lock(&self.tasks)
            .drain()
            .map(|(_, entry)| entry.handle)
            .collect();
        if handles.is_empty() {
            return 0;
        }
        info!(tasks = handles.len(), grace_secs = grace.as_secs(), "Stopping tracking tasks");

        if tokio::time::timeout(grace, join_all(handles.iter_mut()))
            .await
            .is_ok()
        {
            return 0;
        }

        let mut aborted = 0;
        for handle in &handles {
            if !handle.is_finished() {
                handle.abort();
                aborted += 1;
            }
        }
        warn!(aborted = aborted, "Grace period elapsed, aborted remaining tracking tasks");
        aborted
    }
}
