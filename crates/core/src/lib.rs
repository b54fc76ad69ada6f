//! Client library for Reolink cameras and NVRs.
//!
//! - [`metadata`]: decode packed recording filenames.
//! - [`locator`]: search a time range for recorded segments.
//! - [`scheduler`]: download segments on a worker pool.
//! - [`stream`]: live RTSP frames, pulled or pushed.

pub mod api;
pub mod config;
pub mod error;
pub mod locator;
pub mod media;
pub mod metadata;
pub mod protocol;
pub mod scheduler;
pub mod storage;
pub mod stream;
pub mod transport;

pub use api::{BulkFetch, CommandTransport, DownloadMethod, HttpClient};
pub use config::{CameraConfig, Credentials, ProxyConfig, ProxyType};
pub use error::{
    DepacketizeError, MetadataError, Result, SchedulerError, StreamError, TransportError,
};
pub use locator::{SearchReport, Segment, SegmentLocator};
pub use media::{VideoCodec, VideoFrame};
pub use metadata::{RecordingMetadata, StreamKind, TriggerField, TriggerFlags, decode};
pub use scheduler::{
    DownloadEvent, DownloadRequest, DownloadScheduler, EnqueueOutcome, Priority, SchedulerConfig,
};
pub use stream::{Mode, StreamHandle, StreamOptions, StreamPump, StreamStopper, TransportMode};
