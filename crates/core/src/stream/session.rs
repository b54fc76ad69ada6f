//! RTSP session setup: OPTIONS → DESCRIBE → SETUP → PLAY.

use std::time::Duration;

use url::Url;

use super::{StreamOptions, TransportMode};
use crate::config::{Credentials, DEFAULT_RTSP_PORT};
use crate::error::{Result, StreamError};
use crate::protocol::sdp::{self, VideoMedia};
use crate::protocol::{Authenticator, Challenge, RtspRequest, RtspResponse, TransportSpec};
use crate::transport::{RtspConnection, UdpReceiver};

/// RFC 2326 §12.37 default when SETUP does not announce a timeout.
const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(60);

/// Read timeout while waiting for handshake replies.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Where to connect and what to put in request lines.
#[derive(Debug)]
pub(crate) struct Target {
    pub host: String,
    pub port: u16,
    /// Presentation URL with any user info removed.
    pub uri: String,
    pub credentials: Option<Credentials>,
}

/// Split a stream URL into connection target and credentials. Explicit
/// credentials win over ones embedded in the URL.
pub(crate) fn parse_url(raw: &str, explicit: Option<&Credentials>) -> Result<Target> {
    let mut url = Url::parse(raw).map_err(|e| StreamError::InvalidUrl(format!("{raw}: {e}")))?;
    if url.scheme() != "rtsp" {
        return Err(StreamError::InvalidUrl(format!("unsupported scheme '{}'", url.scheme())));
    }
    let host = url
        .host_str()
        .ok_or_else(|| StreamError::InvalidUrl(format!("{raw}: missing host")))?
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_string();
    let port = url.port().unwrap_or(DEFAULT_RTSP_PORT);

    let embedded = if url.username().is_empty() {
        None
    } else {
        let decode = |s: &str| {
            urlencoding::decode(s)
                .map(|d| d.into_owned())
                .map_err(|e| StreamError::InvalidUrl(format!("user info is not UTF-8: {e}")))
        };
        Some(Credentials::new(
            decode(url.username())?,
            decode(url.password().unwrap_or_default())?,
        ))
    };
    let credentials = explicit.cloned().or(embedded);

    // Both only fail for URLs that cannot carry user info, which we have
    // already ruled out by requiring a host.
    let _ = url.set_username("");
    let _ = url.set_password(None);

    Ok(Target {
        host,
        port,
        uri: url.to_string(),
        credentials,
    })
}

/// What the handshake agreed on.
#[derive(Debug)]
pub(crate) struct Negotiated {
    pub video: VideoMedia,
    /// URI for session-wide requests (PLAY, GET_PARAMETER, TEARDOWN).
    pub aggregate_uri: String,
    pub transport: TransportSpec,
    pub session_timeout: Duration,
}

pub(crate) fn handshake(
    options: &StreamOptions,
) -> Result<(RtspConnection, Negotiated, Option<UdpReceiver>)> {
    let target = parse_url(&options.url, options.credentials.as_ref())?;
    let creds = target.credentials.as_ref();

    let mut conn = RtspConnection::connect(&target.host, target.port, options.connect_timeout)?;
    conn.set_read_timeout(Some(HANDSHAKE_TIMEOUT))?;

    let reply = send(&mut conn, "OPTIONS", &target.uri, &[], creds)?;
    if !reply.is_success() {
        tracing::warn!(status = reply.status_code, "OPTIONS not accepted, continuing");
    }

    let describe = expect_success(
        "DESCRIBE",
        send(
            &mut conn,
            "DESCRIBE",
            &target.uri,
            &[("Accept", "application/sdp")],
            creds,
        )?,
    )?;
    let body = describe.body.as_deref().unwrap_or_default();
    let video = sdp::parse_video(body)?;

    let base = describe
        .get_header("Content-Base")
        .or_else(|| describe.get_header("Content-Location"))
        .unwrap_or(&target.uri)
        .to_string();
    let track_uri = sdp::resolve_control(&base, video.control.as_deref());
    let aggregate_uri = sdp::resolve_control(&base, sdp::session_control(body).as_deref());

    let (requested, udp) = match options.transport {
        TransportMode::Tcp => (
            TransportSpec::Interleaved {
                rtp_channel: 0,
                rtcp_channel: 1,
            },
            None,
        ),
        TransportMode::Udp => {
            let receiver = UdpReceiver::bind_pair(conn.local_addr().ip(), conn.peer_addr().ip())?;
            let (rtp, rtcp) = receiver.ports()?;
            (
                TransportSpec::Udp {
                    client_rtp_port: rtp,
                    client_rtcp_port: rtcp,
                    server_rtp_port: None,
                    server_rtcp_port: None,
                },
                Some(receiver),
            )
        }
    };

    let transport_header = requested.request_header();
    let setup = expect_success(
        "SETUP",
        send(
            &mut conn,
            "SETUP",
            &track_uri,
            &[("Transport", transport_header.as_str())],
            creds,
        )?,
    )?;
    let session_id = setup.session_id().ok_or_else(|| StreamError::Rtsp {
        method: "SETUP",
        status: setup.status_code,
        reason: "reply carried no Session header".into(),
    })?;
    conn.writer().lock().set_session(Some(session_id.to_string()));

    let transport = setup
        .get_header("Transport")
        .and_then(TransportSpec::parse)
        .unwrap_or(requested);
    let session_timeout = setup.session_timeout().unwrap_or(DEFAULT_SESSION_TIMEOUT);

    expect_success(
        "PLAY",
        send(
            &mut conn,
            "PLAY",
            &aggregate_uri,
            &[("Range", "npt=0.000-")],
            creds,
        )?,
    )?;

    tracing::info!(
        uri = %target.uri,
        codec = %video.codec,
        transport = ?transport,
        session = session_id,
        "stream playing"
    );

    Ok((
        conn,
        Negotiated {
            video,
            aggregate_uri,
            transport,
            session_timeout,
        },
        udp,
    ))
}

/// Send a request, answering one `401` challenge if credentials are known.
fn send(
    conn: &mut RtspConnection,
    method: &'static str,
    uri: &str,
    headers: &[(&str, &str)],
    credentials: Option<&Credentials>,
) -> Result<RtspResponse> {
    let build = || {
        headers
            .iter()
            .fold(RtspRequest::new(method, uri), |req, (name, value)| {
                req.add_header(name, value)
            })
    };

    let response = conn.request(build())?;
    if response.status_code != 401 {
        return Ok(response);
    }

    let writer = conn.writer();
    let Some(credentials) = credentials else {
        tracing::warn!(method, "camera requires credentials");
        return Err(StreamError::AuthenticationFailed);
    };
    if writer.lock().has_authenticator() {
        return Err(StreamError::AuthenticationFailed);
    }

    let challenges = response
        .headers
        .iter()
        .filter(|(name, _)| name.eq_ignore_ascii_case("WWW-Authenticate"))
        .map(|(_, value)| value.as_str());
    let challenge = Challenge::select(challenges).ok_or(StreamError::AuthenticationFailed)?;
    tracing::debug!(method, scheme = ?challenge, "answering RTSP auth challenge");
    writer
        .lock()
        .set_authenticator(Authenticator::new(credentials.clone(), challenge));

    let retry = conn.request(build())?;
    if retry.status_code == 401 {
        return Err(StreamError::AuthenticationFailed);
    }
    Ok(retry)
}

fn expect_success(method: &'static str, response: RtspResponse) -> Result<RtspResponse> {
    if response.is_success() {
        Ok(response)
    } else {
        Err(StreamError::Rtsp {
            method,
            status: response.status_code,
            reason: response.status_text,
        })
    }
}
