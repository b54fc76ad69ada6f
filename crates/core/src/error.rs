//! Error types for the camera client library.
//!
//! Each layer of the pipeline has its own error enum so callers can match
//! on the failures that layer can actually produce:
//!
//! - **Metadata**: [`MetadataError`]: a recording filename did not follow
//!   the packed grammar.
//! - **Transport**: [`TransportError`]: HTTP command and download failures.
//! - **Scheduler**: [`SchedulerError`]: the download queue refused work.
//! - **Media**: [`DepacketizeError`]: one RTP packet was unusable.
//! - **Stream**: [`StreamError`]: RTSP handshake and live-frame failures.

use std::fmt;

/// Failure decoding a packed recording identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MetadataError {
    /// The date/channel/time prefix did not match, or held impossible
    /// calendar values.
    #[error("malformed recording identifier: {0}")]
    MalformedIdentifier(String),

    /// The suffix does not match the grammar of the embedded version digit,
    /// or the version digit is not one we know how to read.
    #[error("unsupported identifier suffix (version {version}): {suffix}")]
    UnsupportedSuffix { version: u8, suffix: String },

    /// A token that must be hexadecimal was not (or does not fit in 64 bits).
    #[error("invalid hex token: {0}")]
    InvalidHex(String),
}

/// Failure talking to the camera's HTTP command API or bulk download
/// endpoint.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// No session token is held; call [`HttpClient::login`](crate::api::HttpClient::login) first.
    #[error("not authenticated")]
    Unauthenticated,

    /// The camera answered with a non-success HTTP status.
    #[error("HTTP status {0}")]
    HttpStatus(u16),

    /// The connection dropped mid-request or could not be established.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// The request did not complete within the configured timeout.
    #[error("request timed out")]
    Timeout,

    /// The camera returned a non-zero `code` in its JSON envelope.
    #[error("camera rejected {command} (code {code}): {detail}")]
    Api {
        command: String,
        code: i64,
        detail: String,
    },

    /// The reply body was not the JSON shape we expected.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Local I/O failure while writing a download.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if let Some(status) = err.status() {
            Self::HttpStatus(status.as_u16())
        } else if err.is_decode() {
            Self::InvalidResponse(err.to_string())
        } else {
            Self::ConnectionLost(err.to_string())
        }
    }
}

/// Failure submitting work to the [`DownloadScheduler`](crate::scheduler::DownloadScheduler).
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// The scheduler has been stopped and accepts no further work.
    #[error("download queue is closed")]
    QueueClosed,

    /// A worker thread could not be spawned.
    #[error("failed to spawn download worker: {0}")]
    Spawn(#[source] std::io::Error),
}

/// A received RTP packet could not be turned into NAL units. The stream
/// skips the packet and carries on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DepacketizeError {
    #[error("RTP packet truncated ({0} bytes)")]
    Truncated(usize),

    #[error("unsupported RTP version {0}")]
    BadVersion(u8),

    #[error("unsupported {codec} packet type {nal_type}")]
    UnsupportedPacketType { codec: &'static str, nal_type: u8 },

    #[error("malformed aggregation packet")]
    BadAggregation,
}

/// Failure opening or reading a live stream.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Socket-level failure on the RTSP or RTP connection.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The camera answered an RTSP request with a non-2xx status.
    #[error("RTSP {method} failed: {status} {reason}")]
    Rtsp {
        method: &'static str,
        status: u16,
        reason: String,
    },

    /// Failed to parse an RTSP message (RFC 2326 §6, §7).
    #[error("RTSP parse error: {kind}")]
    Parse { kind: ParseErrorKind },

    /// The DESCRIBE body had no usable video media section.
    #[error("SDP error: {0}")]
    Sdp(String),

    /// The video track uses a codec we cannot depacketize.
    #[error("unsupported codec: {0}")]
    UnsupportedCodec(String),

    /// The stream URL could not be parsed.
    #[error("invalid stream URL: {0}")]
    InvalidUrl(String),

    /// The camera rejected our credentials after a challenge.
    #[error("authentication rejected by camera")]
    AuthenticationFailed,

    /// The push-mode background thread could not be spawned.
    #[error("failed to spawn stream thread: {0}")]
    Spawn(#[source] std::io::Error),
}

impl StreamError {
    /// Errors a live read loop logs and skips instead of ending the stream.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transport(TransportError::Timeout) | Self::Parse { .. }
        )
    }
}

impl From<std::io::Error> for StreamError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(TransportError::from_io(err))
    }
}

impl TransportError {
    /// Classify a socket error: timeouts and dropped peers get their own
    /// variants, everything else stays an I/O error.
    pub fn from_io(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::TimedOut | ErrorKind::WouldBlock => Self::Timeout,
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof
            | ErrorKind::NotConnected => Self::ConnectionLost(err.to_string()),
            _ => Self::Io(err),
        }
    }
}

/// Specific kind of RTSP parse failure.
#[derive(Debug)]
pub enum ParseErrorKind {
    /// Input was empty (no start line).
    EmptyMessage,
    /// The request or status line did not have three parts.
    InvalidStartLine,
    /// A header line did not contain a colon separator.
    InvalidHeader,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyMessage => write!(f, "empty message"),
            Self::InvalidStartLine => write!(f, "invalid start line"),
            Self::InvalidHeader => write!(f, "invalid header"),
        }
    }
}

/// Convenience alias for `Result<T, StreamError>`.
pub type Result<T> = std::result::Result<T, StreamError>;
