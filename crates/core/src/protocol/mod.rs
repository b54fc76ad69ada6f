//! RTSP client signaling (RFC 2326).
//!
//! This module handles the text side of RTSP: building requests, parsing
//! responses, answering authentication challenges, negotiating the RTP
//! transport, and reading the SDP returned by DESCRIBE.
//!
//! ## RTSP message format (RFC 2326 §4)
//!
//! RTSP messages follow HTTP/1.1 syntax with a different method set:
//!
//! ```text
//! DESCRIBE rtsp://camera:554//h264Preview_01_main RTSP/1.0\r\n
//! CSeq: 2\r\n
//! Accept: application/sdp\r\n
//! \r\n
//! ```
//!
//! ## Methods the client sends
//!
//! | Method | RFC section | Purpose |
//! |--------|-------------|---------|
//! | OPTIONS | §10.1 | Capability discovery |
//! | DESCRIBE | §10.2 | Retrieve SDP session description |
//! | SETUP | §10.4 | Negotiate transport (interleaved or UDP) |
//! | PLAY | §10.5 | Start media delivery |
//! | TEARDOWN | §10.7 | Destroy session |
//! | GET_PARAMETER | §10.8 | Keepalive |

pub mod auth;
pub mod request;
pub mod response;
pub mod sdp;
pub mod transport;

pub use auth::{Authenticator, Challenge};
pub use request::RtspRequest;
pub use response::RtspResponse;
pub use transport::TransportSpec;

use crate::error::{ParseErrorKind, StreamError};

/// Parse `Name: value` lines up to the first blank line.
fn parse_headers<'a>(lines: impl Iterator<Item = &'a str>) -> crate::error::Result<Vec<(String, String)>> {
    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            break;
        }

        let colon_pos = line.find(':').ok_or(StreamError::Parse {
            kind: ParseErrorKind::InvalidHeader,
        })?;

        let name = line[..colon_pos].trim().to_string();
        let value = line[colon_pos + 1..].trim().to_string();
        headers.push((name, value));
    }
    Ok(headers)
}

/// Header lookup is case-insensitive per RFC 2326 §4.2.
fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}
