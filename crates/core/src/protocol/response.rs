use std::time::Duration;

use crate::error::{ParseErrorKind, StreamError};

/// An RTSP response (RFC 2326 §7).
///
/// A camera's SETUP reply looks like:
///
/// ```text
/// RTSP/1.0 200 OK\r\n
/// CSeq: 4\r\n
/// Session: 3A9F01C2;timeout=60\r\n
/// Transport: RTP/AVP/TCP;unicast;interleaved=0-1\r\n
/// \r\n
/// ```
///
/// Read with [`parse_head`](Self::parse_head); any body follows according
/// to `Content-Length`. The builder methods produce replies for fake
/// cameras in tests.
#[derive(Debug, Clone)]
#[must_use]
pub struct RtspResponse {
    pub status_code: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl RtspResponse {
    pub fn new(status_code: u16, status_text: &str) -> Self {
        RtspResponse {
            status_code,
            status_text: status_text.to_string(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// 200 OK (RFC 2326 §7.1.1).
    pub fn ok() -> Self {
        Self::new(200, "OK")
    }

    /// 401 Unauthorized, carrying a `WWW-Authenticate` challenge.
    pub fn unauthorized() -> Self {
        Self::new(401, "Unauthorized")
    }

    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: String) -> Self {
        self.body = Some(body);
        self
    }

    /// Serialize to the RTSP text wire format. `Content-Length` is appended
    /// when a body is present (RFC 2326 §12.14).
    pub fn serialize(&self) -> String {
        let mut response = format!("RTSP/1.0 {} {}\r\n", self.status_code, self.status_text);

        for (name, value) in &self.headers {
            response.push_str(&format!("{}: {}\r\n", name, value));
        }

        if let Some(body) = &self.body {
            response.push_str(&format!("Content-Length: {}\r\n", body.len()));
            response.push_str("\r\n");
            response.push_str(body);
        } else {
            response.push_str("\r\n");
        }
        response
    }

    /// Parse a status line and headers. The body, if any, is not part of
    /// `raw`; see [`content_length`](Self::content_length).
    pub fn parse_head(raw: &str) -> crate::error::Result<Self> {
        let mut lines = raw.lines();

        let status_line = lines.next().ok_or(StreamError::Parse {
            kind: ParseErrorKind::EmptyMessage,
        })?;

        let mut parts = status_line.splitn(3, ' ');
        let version = parts.next().unwrap_or_default();
        let code = parts.next().and_then(|c| c.parse::<u16>().ok());
        let reason = parts.next().unwrap_or_default();

        let Some(status_code) = code.filter(|_| version.starts_with("RTSP/")) else {
            return Err(StreamError::Parse {
                kind: ParseErrorKind::InvalidStartLine,
            });
        };

        let mut response = RtspResponse::new(status_code, reason.trim());
        response.headers = super::parse_headers(lines)?;
        Ok(response)
    }

    pub fn get_header(&self, name: &str) -> Option<&str> {
        super::find_header(&self.headers, name)
    }

    pub fn cseq(&self) -> Option<u32> {
        self.get_header("CSeq")?.trim().parse().ok()
    }

    pub fn content_length(&self) -> usize {
        self.get_header("Content-Length")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// Session identifier without its parameters (RFC 2326 §12.37):
    /// `Session: 12345678;timeout=60` → `12345678`.
    pub fn session_id(&self) -> Option<&str> {
        let value = self.get_header("Session")?;
        value.split(';').next().map(str::trim)
    }

    /// Server-announced session timeout, if any.
    pub fn session_timeout(&self) -> Option<Duration> {
        let value = self.get_header("Session")?;
        value
            .split(';')
            .skip(1)
            .filter_map(|p| p.trim().strip_prefix("timeout="))
            .find_map(|t| t.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
    }
}
