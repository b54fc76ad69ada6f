//! Concurrent download queue.
//!
//! [`DownloadScheduler`] owns a FIFO of [`DownloadRequest`]s and a small pool
//! of worker threads that drain it through a [`BulkFetch`]. Callers may
//! reprioritize or withdraw queued requests while workers run.
//!
//! All queue state lives behind one `parking_lot::Mutex`. Workers park on a
//! `Condvar` while the queue is empty; every enqueue wakes exactly one of
//! them. Events are sent while the lock is held, so the event stream is in
//! the same order as the state changes that caused it.

mod task;

use std::collections::{HashSet, VecDeque};
use std::fs;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};

use crate::api::BulkFetch;
use crate::error::{SchedulerError, TransportError};
use crate::storage;

pub use task::{DownloadEvent, DownloadRequest, EnqueueOutcome, Priority, StopReport, TaskState};
use task::QueuedTask;

/// Scheduler tuning.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Number of worker threads. The camera serves one transfer at a time
    /// well; more than a couple rarely helps.
    pub workers: usize,
    /// How long `Drop` waits for busy workers.
    pub join_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            join_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Default)]
struct QueueState {
    queue: VecDeque<QueuedTask>,
    queued: HashSet<String>,
    in_flight: HashSet<String>,
    stopped: bool,
}

impl QueueState {
    fn position(&self, remote_path: &str) -> Option<usize> {
        self.queue
            .iter()
            .position(|t| t.request.remote_path == remote_path)
    }
}

struct Shared {
    state: Mutex<QueueState>,
    wake: Condvar,
    events: Sender<DownloadEvent>,
    fetch: Arc<dyn BulkFetch>,
}

impl Shared {
    /// Caller must hold the state lock.
    fn emit(&self, event: DownloadEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }
}

pub struct DownloadScheduler {
    shared: Arc<Shared>,
    events: Receiver<DownloadEvent>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    exited: Receiver<()>,
    config: SchedulerConfig,
}

impl DownloadScheduler {
    /// Start `config.workers` worker threads draining into `fetch`.
    pub fn new(fetch: Arc<dyn BulkFetch>, config: SchedulerConfig) -> Result<Self, SchedulerError> {
        let (event_tx, event_rx) = crossbeam_channel::unbounded();
        let (exit_tx, exit_rx) = crossbeam_channel::unbounded();

        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState::default()),
            wake: Condvar::new(),
            events: event_tx,
            fetch,
        });

        let scheduler = Self {
            shared: shared.clone(),
            events: event_rx,
            workers: Mutex::new(Vec::new()),
            exited: exit_rx,
            config,
        };

        let count = scheduler.config.workers.max(1);
        for id in 0..count {
            let shared = shared.clone();
            let exit_tx: Sender<()> = exit_tx.clone();
            let handle = thread::Builder::new()
                .name(format!("download-worker-{id}"))
                .spawn(move || {
                    worker_loop(id, &shared);
                    let _ = exit_tx.send(());
                })
                .map_err(SchedulerError::Spawn)?;
            scheduler.workers.lock().push(handle);
        }

        tracing::info!(workers = count, "download scheduler started");
        Ok(scheduler)
    }

    /// Event stream. Every clone of the receiver competes for the same
    /// events, so normally only one consumer should read it.
    pub fn events(&self) -> Receiver<DownloadEvent> {
        self.events.clone()
    }

    /// Submit a request.
    ///
    /// Submitting a path that is already queued or in flight never creates a
    /// second task. A destination that already holds a complete copy is
    /// reported as finished immediately without touching the camera.
    pub fn enqueue(
        &self,
        request: DownloadRequest,
        priority: Priority,
    ) -> Result<EnqueueOutcome, SchedulerError> {
        let present = storage::is_complete(&request.local_path, request.expected_size);

        let mut state = self.shared.state.lock();
        if state.stopped {
            return Err(SchedulerError::QueueClosed);
        }

        if state.in_flight.contains(&request.remote_path) {
            return Ok(EnqueueOutcome::InFlight);
        }

        if state.queued.contains(&request.remote_path) {
            if priority == Priority::Normal {
                return Ok(EnqueueOutcome::AlreadyQueued);
            }
            if let Some(index) = state.position(&request.remote_path)
                && let Some(task) = state.queue.remove(index)
            {
                state.queue.push_front(task);
            }
            return Ok(EnqueueOutcome::Promoted);
        }

        if present {
            tracing::debug!(remote_path = %request.remote_path, "already downloaded");
            self.shared.emit(DownloadEvent::Finished {
                remote_path: request.remote_path,
                local_path: request.local_path,
                success: true,
                reused: true,
                error: None,
            });
            return Ok(EnqueueOutcome::AlreadyPresent);
        }

        tracing::debug!(remote_path = %request.remote_path, ?priority, "queued download");
        state.queued.insert(request.remote_path.clone());
        let task = QueuedTask {
            request,
            enqueued_at: Instant::now(),
        };
        match priority {
            Priority::Normal => state.queue.push_back(task),
            Priority::Front => state.queue.push_front(task),
        }
        self.shared.wake.notify_one();
        Ok(EnqueueOutcome::Queued)
    }

    /// Move a queued request to the head. Returns `false` (and changes
    /// nothing) if the path is in flight, finished, or unknown.
    pub fn requeue_front(&self, remote_path: &str) -> bool {
        let mut state = self.shared.state.lock();
        let Some(index) = state.position(remote_path) else {
            return false;
        };
        if let Some(task) = state.queue.remove(index) {
            state.queue.push_front(task);
        }
        true
    }

    /// Withdraw a queued request before a worker picks it up.
    pub fn remove(&self, remote_path: &str) -> bool {
        let mut state = self.shared.state.lock();
        let Some(index) = state.position(remote_path) else {
            return false;
        };
        state.queue.remove(index);
        state.queued.remove(remote_path);
        true
    }

    /// Queued remote paths, head first.
    pub fn pending(&self) -> Vec<String> {
        self.shared
            .state
            .lock()
            .queue
            .iter()
            .map(|t| t.request.remote_path.clone())
            .collect()
    }

    /// State of a live task. Tasks leave the live set once their
    /// [`DownloadEvent::Finished`] is emitted, after which this is `None`.
    pub fn state(&self, remote_path: &str) -> Option<TaskState> {
        let state = self.shared.state.lock();
        if state.in_flight.contains(remote_path) {
            Some(TaskState::InFlight)
        } else if state.queued.contains(remote_path) {
            Some(TaskState::Queued)
        } else {
            None
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.state.lock().stopped
    }

    /// Close the queue, drop everything not yet started, and wait up to
    /// `timeout` for workers to finish their current transfer.
    ///
    /// Calling it again returns an empty report.
    pub fn stop(&self, timeout: Duration) -> StopReport {
        let dropped: Vec<DownloadRequest> = {
            let mut state = self.shared.state.lock();
            if state.stopped {
                return StopReport::default();
            }
            state.stopped = true;
            state.queued.clear();
            let dropped = state.queue.drain(..).map(|t| t.request).collect();
            self.shared.wake.notify_all();
            dropped
        };

        let mut handles = std::mem::take(&mut *self.workers.lock());
        let deadline = Instant::now() + timeout;
        let mut exited = 0;
        while exited < handles.len() {
            match self.exited.recv_deadline(deadline) {
                Ok(()) => exited += 1,
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => {
                    exited = handles.len();
                }
            }
        }

        let unfinished_workers = handles.len() - exited;
        if unfinished_workers == 0 {
            for handle in handles.drain(..) {
                let _ = handle.join();
            }
        } else {
            tracing::warn!(unfinished_workers, "download workers did not exit in time");
        }

        tracing::info!(dropped = dropped.len(), "download scheduler stopped");
        StopReport {
            dropped,
            unfinished_workers,
        }
    }
}

impl Drop for DownloadScheduler {
    fn drop(&mut self) {
        self.stop(self.config.join_timeout);
    }
}

fn worker_loop(id: usize, shared: &Shared) {
    tracing::debug!(worker = id, "download worker started");
    loop {
        let request = {
            let mut state = shared.state.lock();
            let task = loop {
                if state.stopped {
                    tracing::debug!(worker = id, "download worker exiting");
                    return;
                }
                if let Some(task) = state.queue.pop_front() {
                    break task;
                }
                shared.wake.wait(&mut state);
            };

            let remote_path = task.request.remote_path.clone();
            state.queued.remove(&remote_path);
            state.in_flight.insert(remote_path.clone());
            tracing::info!(
                worker = id,
                remote_path = %remote_path,
                waited_ms = task.enqueued_at.elapsed().as_millis() as u64,
                "download started"
            );
            shared.emit(DownloadEvent::Started {
                remote_path,
                local_path: task.request.local_path.clone(),
            });
            task.request
        };

        let started = Instant::now();
        let result = transfer(shared.fetch.as_ref(), &request);

        let mut state = shared.state.lock();
        state.in_flight.remove(&request.remote_path);
        let (success, error) = match result {
            Ok(()) => {
                tracing::info!(
                    worker = id,
                    remote_path = %request.remote_path,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "download finished"
                );
                (true, None)
            }
            Err(e) => {
                tracing::warn!(worker = id, remote_path = %request.remote_path, error = %e, "download failed");
                (false, Some(e))
            }
        };
        shared.emit(DownloadEvent::Finished {
            remote_path: request.remote_path,
            local_path: request.local_path,
            success,
            reused: false,
            error,
        });
    }
}

/// Fetch into `<local>.part`, then rename into place. The partial file is
/// removed on failure.
fn transfer(fetch: &dyn BulkFetch, request: &DownloadRequest) -> Result<(), TransportError> {
    if let Some(parent) = request.local_path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }

    let partial = storage::partial_path(&request.local_path);
    if let Err(e) = fetch.fetch_to_file(&request.remote_path, &partial) {
        let _ = fs::remove_file(&partial);
        return Err(e);
    }

    if let (Some(expected), Some(actual)) = (request.expected_size, storage::existing_size(&partial))
        && expected != actual
    {
        tracing::warn!(
            remote_path = %request.remote_path,
            expected,
            actual,
            "downloaded size differs from announced size"
        );
    }

    if let Err(e) = fs::rename(&partial, &request.local_path) {
        let _ = fs::remove_file(&partial);
        return Err(e.into());
    }
    Ok(())
}
