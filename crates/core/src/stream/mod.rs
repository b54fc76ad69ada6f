//! Live video from the camera's RTSP server.
//!
//! [`StreamPump::open`] runs the RTSP handshake and returns a
//! [`StreamHandle`]. In [`Mode::Pull`] the handle is an iterator of
//! [`VideoFrame`]s; in [`Mode::Push`] a background thread hands each frame
//! to a callback. Both modes share one read loop.
//!
//! ```no_run
//! use reolink::{CameraConfig, Credentials, StreamKind};
//! use reolink::stream::{Mode, StreamOptions, StreamPump};
//!
//! let camera = CameraConfig::new("192.168.1.20", Credentials::new("admin", "secret"));
//! let options = StreamOptions::for_camera(&camera, 0, StreamKind::Sub);
//! let handle = StreamPump::open(options, Mode::Pull)?;
//! for frame in handle.take(50) {
//!     println!("{} bytes, keyframe={}", frame.data.len(), frame.keyframe);
//! }
//! # Ok::<(), reolink::StreamError>(())
//! ```

mod reader;
mod session;

use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::{CameraConfig, Credentials};
use crate::error::{Result, StreamError};
use crate::media::{VideoCodec, VideoFrame};
use crate::metadata::StreamKind;
use reader::{Control, FrameReader};

/// How RTP reaches us. Fixed for the lifetime of a stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransportMode {
    /// Interleaved on the RTSP connection (RFC 2326 §10.12).
    #[default]
    Tcp,
    /// Unicast to a local RTP/RTCP port pair.
    Udp,
}

/// Everything needed to open one stream.
#[derive(Debug, Clone)]
pub struct StreamOptions {
    /// `rtsp://` URL. Embedded user info is used as credentials unless
    /// [`credentials`](Self::credentials) is set.
    pub url: String,
    pub credentials: Option<Credentials>,
    pub transport: TransportMode,
    pub connect_timeout: Duration,
    /// Socket read timeout while streaming. Bounds how long a read blocks
    /// before the loop checks for keepalive.
    pub read_timeout: Duration,
    /// Keepalive period. Defaults to half the session timeout.
    pub keepalive: Option<Duration>,
}

impl StreamOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            credentials: None,
            transport: TransportMode::Tcp,
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(2),
            keepalive: None,
        }
    }

    /// Options for `channel` (0-based) and `profile` on a configured camera.
    pub fn for_camera(camera: &CameraConfig, channel: u8, profile: StreamKind) -> Self {
        let mut options = Self::new(camera.rtsp_url(channel, profile));
        options.credentials = Some(camera.credentials.clone());
        options.connect_timeout = camera.connect_timeout;
        options
    }

    pub fn with_transport(mut self, transport: TransportMode) -> Self {
        self.transport = transport;
        self
    }
}

type FrameCallback = Box<dyn FnMut(VideoFrame) + Send + 'static>;

/// Delivery mode chosen at open.
pub enum Mode {
    /// Caller iterates the handle.
    Pull,
    /// A background thread calls the callback for every frame.
    Push(FrameCallback),
}

impl Mode {
    pub fn push(callback: impl FnMut(VideoFrame) + Send + 'static) -> Self {
        Self::Push(Box::new(callback))
    }
}

impl fmt::Debug for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pull => f.write_str("Pull"),
            Self::Push(_) => f.write_str("Push(..)"),
        }
    }
}

pub struct StreamPump;

impl StreamPump {
    /// Connect, negotiate and start playing.
    pub fn open(options: StreamOptions, mode: Mode) -> Result<StreamHandle> {
        let (conn, negotiated, udp) = session::handshake(&options)?;
        let codec = negotiated.video.codec;
        let control = Arc::new(Control::new(
            conn.writer(),
            negotiated.aggregate_uri.clone(),
        ));

        let reader = match FrameReader::new(
            conn,
            negotiated,
            udp,
            control.clone(),
            options.read_timeout,
            options.keepalive,
        ) {
            Ok(reader) => reader,
            Err(e) => {
                control.release();
                return Err(e);
            }
        };

        match mode {
            Mode::Pull => Ok(StreamHandle {
                control,
                codec,
                reader: Some(reader),
                worker: None,
            }),
            Mode::Push(callback) => {
                let worker = spawn_push(reader, callback, control.clone()).inspect_err(|_| {
                    control.release();
                })?;
                Ok(StreamHandle {
                    control,
                    codec,
                    reader: None,
                    worker: Some(worker),
                })
            }
        }
    }
}

fn spawn_push(
    mut reader: FrameReader,
    mut callback: FrameCallback,
    control: Arc<Control>,
) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("rtsp-push".into())
        .spawn(move || {
            loop {
                match reader.read_frame() {
                    Ok(Some(frame)) => callback(frame),
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "push stream ended");
                        break;
                    }
                }
            }
            control.release();
        })
        .map_err(StreamError::Spawn)
}

/// An open live stream.
///
/// Dropping the handle stops the stream and waits for the push thread.
pub struct StreamHandle {
    control: Arc<Control>,
    codec: VideoCodec,
    reader: Option<FrameReader>,
    worker: Option<JoinHandle<()>>,
}

impl StreamHandle {
    pub fn codec(&self) -> VideoCodec {
        self.codec
    }

    /// Stop streaming. Safe to call repeatedly and from any thread holding
    /// a [`StreamStopper`].
    pub fn stop(&self) {
        self.control.request_stop();
    }

    /// False once the stream was stopped or the camera closed it.
    pub fn is_open(&self) -> bool {
        self.control.is_open()
    }

    pub fn stopper(&self) -> StreamStopper {
        StreamStopper(self.control.clone())
    }

    /// Next frame in pull mode, surfacing the error that ended the stream.
    ///
    /// Returns `Ok(None)` after a stop, after the stream ended, and always
    /// in push mode.
    pub fn next_frame(&mut self) -> Result<Option<VideoFrame>> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };
        let result = reader.read_frame();
        if !matches!(result, Ok(Some(_))) {
            self.control.release();
        }
        result
    }
}

impl Iterator for StreamHandle {
    type Item = VideoFrame;

    fn next(&mut self) -> Option<VideoFrame> {
        self.next_frame().unwrap_or_default()
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.control.request_stop();
        if let Some(worker) = self.worker.take()
            && worker.thread().id() != thread::current().id()
        {
            let _ = worker.join();
        }
    }
}

impl fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamHandle")
            .field("codec", &self.codec)
            .field("open", &self.is_open())
            .field("push", &self.worker.is_some())
            .finish()
    }
}

/// Cloneable stop switch for a [`StreamHandle`].
#[derive(Clone)]
pub struct StreamStopper(Arc<Control>);

impl StreamStopper {
    pub fn stop(&self) {
        self.0.request_stop();
    }

    pub fn is_open(&self) -> bool {
        self.0.is_open()
    }
}

impl fmt::Debug for StreamStopper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamStopper")
            .field("open", &self.is_open())
            .finish()
    }
}
