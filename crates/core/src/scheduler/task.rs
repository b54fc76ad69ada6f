use std::path::PathBuf;
use std::time::Instant;

use crate::error::TransportError;

/// One file to copy from the camera.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    /// Camera-side path; the de-duplication key.
    pub remote_path: String,
    pub local_path: PathBuf,
    /// Size announced by the camera. When known, an existing local file only
    /// counts as complete if its length matches.
    pub expected_size: Option<u64>,
}

impl DownloadRequest {
    pub fn new(remote_path: impl Into<String>, local_path: impl Into<PathBuf>) -> Self {
        Self {
            remote_path: remote_path.into(),
            local_path: local_path.into(),
            expected_size: None,
        }
    }

    pub fn with_expected_size(mut self, size: u64) -> Self {
        self.expected_size = Some(size);
        self
    }
}

/// Where a new request enters the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
    #[default]
    Normal,
    /// Head of the queue; next to be picked up by an idle worker.
    Front,
}

/// What [`enqueue`](super::DownloadScheduler::enqueue) did with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Added to the queue.
    Queued,
    /// Already queued; moved to the head.
    Promoted,
    /// Already queued; left where it was.
    AlreadyQueued,
    /// A worker is transferring it right now.
    InFlight,
    /// The destination already holds a complete copy. A reused
    /// [`DownloadEvent::Finished`] was emitted and nothing was fetched.
    AlreadyPresent,
}

/// Where a live task is. Terminal outcomes are only reported through
/// [`DownloadEvent::Finished`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Queued,
    InFlight,
}

/// Progress notification, delivered in the order the scheduler changed state.
#[derive(Debug)]
pub enum DownloadEvent {
    Started {
        remote_path: String,
        local_path: PathBuf,
    },
    Finished {
        remote_path: String,
        local_path: PathBuf,
        success: bool,
        /// The file was already present and no transfer happened.
        reused: bool,
        error: Option<TransportError>,
    },
}

impl DownloadEvent {
    pub fn remote_path(&self) -> &str {
        match self {
            Self::Started { remote_path, .. } | Self::Finished { remote_path, .. } => remote_path,
        }
    }
}

/// Outcome of [`stop`](super::DownloadScheduler::stop).
#[derive(Debug, Default)]
pub struct StopReport {
    /// Requests that were still queued and will never run.
    pub dropped: Vec<DownloadRequest>,
    /// Workers still busy when the join timeout expired. They finish their
    /// current transfer in the background and then exit.
    pub unfinished_workers: usize,
}

#[derive(Debug)]
pub(super) struct QueuedTask {
    pub request: DownloadRequest,
    pub enqueued_at: Instant,
}
