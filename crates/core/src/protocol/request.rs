use crate::error::{ParseErrorKind, StreamError};

/// Client identification sent with every request (RFC 2326 §12.41).
pub const USER_AGENT: &str = "reolink-rs/0.1";

/// An RTSP request (RFC 2326 §6).
///
/// Built by the client and serialized to the wire:
///
/// ```text
/// Method SP Request-URI SP RTSP-Version CRLF
/// *(Header: Value CRLF)
/// CRLF
/// ```
///
/// [`parse`](Self::parse) reads the same format back, which is what an
/// in-process test server needs. Header lookup is case-insensitive per
/// RFC 2326 §4.2.
#[derive(Debug, Clone)]
#[must_use]
pub struct RtspRequest {
    /// RTSP method (OPTIONS, DESCRIBE, SETUP, PLAY, etc.).
    pub method: String,
    /// Request-URI (e.g. `rtsp://host:port/stream/track1`).
    pub uri: String,
    /// Protocol version (always `RTSP/1.0` when we build it).
    pub version: String,
    /// Headers as ordered (name, value) pairs.
    pub headers: Vec<(String, String)>,
}

impl RtspRequest {
    pub fn new(method: &str, uri: &str) -> Self {
        RtspRequest {
            method: method.to_string(),
            uri: uri.to_string(),
            version: "RTSP/1.0".to_string(),
            headers: Vec::new(),
        }
    }

    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Serialize to the RTSP text wire format.
    pub fn serialize(&self) -> String {
        let mut request = format!("{} {} {}\r\n", self.method, self.uri, self.version);
        for (name, value) in &self.headers {
            request.push_str(&format!("{}: {}\r\n", name, value));
        }
        request.push_str("\r\n");
        request
    }

    /// Parse a request head: request line, headers, and trailing blank line.
    pub fn parse(raw: &str) -> crate::error::Result<Self> {
        let mut lines = raw.lines();

        let request_line = lines.next().ok_or(StreamError::Parse {
            kind: ParseErrorKind::EmptyMessage,
        })?;

        let parts: Vec<&str> = request_line.split_whitespace().collect();
        if parts.len() != 3 {
            return Err(StreamError::Parse {
                kind: ParseErrorKind::InvalidStartLine,
            });
        }

        let mut request = RtspRequest::new(parts[0], parts[1]);
        request.version = parts[2].to_string();
        request.headers = super::parse_headers(lines)?;
        Ok(request)
    }

    /// Look up a header value by name (case-insensitive).
    pub fn get_header(&self, name: &str) -> Option<&str> {
        super::find_header(&self.headers, name)
    }

    /// The CSeq header, which pairs requests with responses (RFC 2326 §12.17).
    pub fn cseq(&self) -> Option<&str> {
        self.get_header("CSeq")
    }
}
