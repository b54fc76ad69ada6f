//! Search → schedule → download against a fake recorder.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use reolink::api::{BulkFetch, CommandTransport};
use reolink::scheduler::TaskState;
use reolink::{
    DownloadEvent, DownloadRequest, DownloadScheduler, EnqueueOutcome, Priority, SchedulerConfig,
    SegmentLocator, StreamKind, TransportError,
};
use serde_json::{Value, json};

const CLIPS: [&str; 3] = [
    "Mp4Record/2024-08-12/RecM13_DST20240812_214255_214348_1F1E828_4DDA4D.mp4",
    "Mp4Record/2024-08-12/RecM13_DST20240812_080102_080230_1F1E828_12AB.mp4",
    "Mp4Record/2024-08-12/not-a-recording.mp4",
];

/// Answers `Search` with a fixed listing and serves each clip's name as its
/// content. With a gate, every transfer waits for one token.
#[derive(Default)]
struct FakeRecorder {
    fetches: Mutex<HashMap<String, usize>>,
    gate: Option<Receiver<()>>,
}

impl FakeRecorder {
    fn gated() -> (Arc<Self>, Sender<()>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let recorder = Self {
            gate: Some(rx),
            ..Self::default()
        };
        (Arc::new(recorder), tx)
    }

    fn fetch_count(&self, remote_path: &str) -> usize {
        self.fetches.lock().get(remote_path).copied().unwrap_or(0)
    }

    fn total_fetches(&self) -> usize {
        self.fetches.lock().values().sum()
    }
}

impl CommandTransport for FakeRecorder {
    fn execute(&self, command: &str, _payload: Value) -> Result<Value, TransportError> {
        assert_eq!(command, "Search");
        let files: Vec<Value> = CLIPS
            .iter()
            .map(|name| json!({"name": name, "size": name.len().to_string()}))
            .collect();
        Ok(json!([{"cmd": "Search", "code": 0, "value": {"SearchResult": {"File": files}}}]))
    }
}

impl BulkFetch for FakeRecorder {
    fn fetch_to_file(&self, remote_path: &str, local_path: &Path) -> Result<(), TransportError> {
        *self.fetches.lock().entry(remote_path.to_string()).or_default() += 1;
        if let Some(gate) = &self.gate {
            gate.recv_timeout(Duration::from_secs(10))
                .map_err(|_| TransportError::Timeout)?;
        }
        fs::write(local_path, remote_path.as_bytes())?;
        Ok(())
    }
}

fn day() -> std::ops::Range<NaiveDateTime> {
    let date = NaiveDate::from_ymd_opt(2024, 8, 12).unwrap();
    date.and_hms_opt(0, 0, 0).unwrap()..date.and_hms_opt(23, 59, 59).unwrap()
}

fn wait_started(events: &Receiver<DownloadEvent>, remote_path: &str) {
    loop {
        match events.recv_timeout(Duration::from_secs(5)).unwrap() {
            DownloadEvent::Started { remote_path: p, .. } if p == remote_path => return,
            _ => {}
        }
    }
}

fn wait_finished(events: &Receiver<DownloadEvent>, count: usize) -> Vec<DownloadEvent> {
    let mut finished = Vec::new();
    while finished.len() < count {
        let event = events.recv_timeout(Duration::from_secs(5)).unwrap();
        if matches!(event, DownloadEvent::Finished { .. }) {
            finished.push(event);
        }
    }
    finished
}

/// Collects events until `count` transfers finish. Returns the paths of the
/// `Started` and `Finished` events seen, in order.
fn drain(events: &Receiver<DownloadEvent>, count: usize) -> (Vec<String>, Vec<String>) {
    let (mut started, mut finished) = (Vec::new(), Vec::new());
    while finished.len() < count {
        let event = events.recv_timeout(Duration::from_secs(5)).unwrap();
        let path = event.remote_path().to_string();
        match event {
            DownloadEvent::Started { .. } => started.push(path),
            DownloadEvent::Finished { .. } => finished.push(path),
        }
    }
    (started, finished)
}

#[test]
fn searched_segments_download_once() {
    let recorder = Arc::new(FakeRecorder::default());
    let locator = SegmentLocator::new(recorder.clone());
    let report = locator.find_detailed(day(), 0, StreamKind::Main).unwrap();
    assert_eq!(report.segments.len(), 2);
    assert_eq!(report.skipped.len(), 1);

    let dir = tempfile::tempdir().unwrap();
    let scheduler = DownloadScheduler::new(
        recorder.clone(),
        SchedulerConfig {
            workers: 2,
            ..SchedulerConfig::default()
        },
    )
    .unwrap();
    let events = scheduler.events();

    for segment in &report.segments {
        let outcome = scheduler
            .enqueue(segment.download_request(dir.path()), Priority::Normal)
            .unwrap();
        assert_eq!(outcome, EnqueueOutcome::Queued);
    }
    for event in wait_finished(&events, 2) {
        let DownloadEvent::Finished { success, local_path, remote_path, .. } = event else {
            unreachable!()
        };
        assert!(success, "{remote_path}");
        assert_eq!(fs::read_to_string(&local_path).unwrap(), remote_path);
    }

    // A second pass finds everything on disk with the announced size.
    for segment in &report.segments {
        let outcome = scheduler
            .enqueue(segment.download_request(dir.path()), Priority::Normal)
            .unwrap();
        assert_eq!(outcome, EnqueueOutcome::AlreadyPresent);
    }
    for event in wait_finished(&events, 2) {
        assert!(matches!(event, DownloadEvent::Finished { success: true, reused: true, .. }));
    }
    assert_eq!(recorder.total_fetches(), 2);
}

#[test]
fn duplicate_submissions_never_make_a_second_task() {
    let (recorder, gate) = FakeRecorder::gated();
    let dir = tempfile::tempdir().unwrap();
    let scheduler = DownloadScheduler::new(recorder.clone(), SchedulerConfig::default()).unwrap();
    let events = scheduler.events();
    let request = |name: &str| DownloadRequest::new(name, dir.path().join(name));

    assert_eq!(scheduler.enqueue(request("a"), Priority::Normal).unwrap(), EnqueueOutcome::Queued);
    wait_started(&events, "a");

    assert_eq!(scheduler.enqueue(request("a"), Priority::Front).unwrap(), EnqueueOutcome::InFlight);
    assert!(!scheduler.requeue_front("a"));
    assert_eq!(scheduler.state("a"), Some(TaskState::InFlight));

    assert_eq!(scheduler.enqueue(request("b"), Priority::Normal).unwrap(), EnqueueOutcome::Queued);
    assert_eq!(scheduler.enqueue(request("b"), Priority::Normal).unwrap(), EnqueueOutcome::AlreadyQueued);
    assert_eq!(scheduler.enqueue(request("c"), Priority::Normal).unwrap(), EnqueueOutcome::Queued);
    assert_eq!(scheduler.pending(), ["b", "c"]);
    assert_eq!(scheduler.state("b"), Some(TaskState::Queued));

    assert!(scheduler.requeue_front("c"));
    assert_eq!(scheduler.pending(), ["c", "b"]);
    assert_eq!(scheduler.enqueue(request("b"), Priority::Front).unwrap(), EnqueueOutcome::Promoted);
    assert_eq!(scheduler.pending(), ["b", "c"]);
    assert!(!scheduler.requeue_front("unknown"));

    for _ in 0..3 {
        gate.send(()).unwrap();
    }
    let (started, finished) = drain(&events, 3);
    // "a" already announced its start above.
    assert_eq!(started, ["b", "c"]);
    assert_eq!(finished, ["a", "b", "c"]);
    for name in ["a", "b", "c"] {
        assert_eq!(recorder.fetch_count(name), 1);
        assert_eq!(scheduler.state(name), None);
    }

    // Completed tasks cannot be moved and produce no further events.
    assert!(!scheduler.requeue_front("a"));
    assert!(scheduler.pending().is_empty());
    assert!(events.try_recv().is_err());
}

#[test]
fn existing_file_is_never_fetched() {
    let recorder = Arc::new(FakeRecorder::default());
    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("clip.mp4");
    fs::write(&local, b"12345").unwrap();

    let scheduler = DownloadScheduler::new(recorder.clone(), SchedulerConfig::default()).unwrap();
    let events = scheduler.events();
    let outcome = scheduler
        .enqueue(
            DownloadRequest::new("clip.mp4", &local).with_expected_size(5),
            Priority::Normal,
        )
        .unwrap();
    assert_eq!(outcome, EnqueueOutcome::AlreadyPresent);
    assert!(matches!(
        events.recv_timeout(Duration::from_secs(1)).unwrap(),
        DownloadEvent::Finished { success: true, reused: true, .. }
    ));

    // A short file does not count as present.
    let outcome = scheduler
        .enqueue(
            DownloadRequest::new("other.mp4", dir.path().join("clip.mp4")).with_expected_size(9),
            Priority::Normal,
        )
        .unwrap();
    assert_eq!(outcome, EnqueueOutcome::Queued);
    wait_finished(&events, 1);
    assert_eq!(recorder.fetch_count("clip.mp4"), 0);
    assert_eq!(recorder.fetch_count("other.mp4"), 1);
}

#[test]
fn stop_drops_queued_work_without_fetching_it() {
    let (recorder, gate) = FakeRecorder::gated();
    let dir = tempfile::tempdir().unwrap();
    let scheduler = DownloadScheduler::new(recorder.clone(), SchedulerConfig::default()).unwrap();
    let events = scheduler.events();

    scheduler
        .enqueue(DownloadRequest::new("busy", dir.path().join("busy")), Priority::Normal)
        .unwrap();
    wait_started(&events, "busy");
    for name in ["q1", "q2", "q3"] {
        scheduler
            .enqueue(DownloadRequest::new(name, dir.path().join(name)), Priority::Normal)
            .unwrap();
    }

    let report = scheduler.stop(Duration::from_millis(200));
    let dropped: Vec<&str> = report.dropped.iter().map(|r| r.remote_path.as_str()).collect();
    assert_eq!(dropped, ["q1", "q2", "q3"]);
    assert_eq!(report.unfinished_workers, 1);
    assert!(scheduler.pending().is_empty());

    gate.send(()).unwrap();
    wait_finished(&events, 1);
    assert_eq!(recorder.total_fetches(), 1);
    assert!(
        scheduler
            .enqueue(DownloadRequest::new("late", dir.path().join("late")), Priority::Normal)
            .is_err()
    );
}
