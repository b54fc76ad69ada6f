//! SDP (Session Description Protocol) parsing (RFC 4566 / RFC 8866).
//!
//! The camera's DESCRIBE body looks like:
//!
//! ```text
//! v=0
//! o=- 1109162014219182 0 IN IP4 0.0.0.0
//! s=Session streamed by "preview"
//! t=0 0
//! a=control:*
//! m=video 0 RTP/AVP 96                          ← media description
//! a=control:trackID=1                           ← track control URL
//! a=rtpmap:96 H264/90000                        ← codec/clock rate
//! a=fmtp:96 packetization-mode=1;sprop-parameter-sets=Z2QAM6w...,aO48sA==
//! m=audio 0 RTP/AVP 97
//! ...
//! ```
//!
//! Only the first video section matters to us. Audio is ignored.

use base64::prelude::{BASE64_STANDARD, Engine as _};

use crate::error::StreamError;
use crate::media::VideoCodec;

/// The video track announced by DESCRIBE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoMedia {
    pub payload_type: u8,
    pub codec: VideoCodec,
    pub clock_rate: u32,
    /// Value of the media-level `a=control:` attribute.
    pub control: Option<String>,
    /// Decoded `sprop-*` parameter sets (VPS/SPS/PPS) in announce order.
    pub parameter_sets: Vec<Vec<u8>>,
}

/// Find and parse the first video media section.
pub fn parse_video(sdp: &str) -> crate::error::Result<VideoMedia> {
    let mut payload_type: Option<u8> = None;
    let mut in_video = false;
    let mut codec_name: Option<(String, u32)> = None;
    let mut control = None;
    let mut fmtp: Option<String> = None;

    for line in sdp.lines().map(str::trim) {
        if let Some(media) = line.strip_prefix("m=") {
            if payload_type.is_some() {
                // next section after the video one
                break;
            }
            let mut fields = media.split_whitespace();
            in_video = fields.next() == Some("video");
            if in_video {
                let pt = fields
                    .nth(2)
                    .and_then(|pt| pt.parse::<u8>().ok())
                    .ok_or_else(|| StreamError::Sdp(format!("bad media line: {line}")))?;
                payload_type = Some(pt);
            }
            continue;
        }
        if !in_video {
            continue;
        }
        let Some(pt) = payload_type else { continue };

        if let Some(value) = line.strip_prefix("a=control:") {
            control = Some(value.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("a=rtpmap:") {
            if let Some((map_pt, encoding)) = rest.split_once(' ')
                && map_pt.trim().parse::<u8>().ok() == Some(pt)
            {
                let mut parts = encoding.trim().split('/');
                let name = parts.next().unwrap_or_default().to_ascii_uppercase();
                let clock = parts.next().and_then(|c| c.parse().ok()).unwrap_or(90_000);
                codec_name = Some((name, clock));
            }
        } else if let Some(rest) = line.strip_prefix("a=fmtp:")
            && let Some((fmtp_pt, params)) = rest.split_once(' ')
            && fmtp_pt.trim().parse::<u8>().ok() == Some(pt)
        {
            fmtp = Some(params.trim().to_string());
        }
    }

    let payload_type = payload_type.ok_or_else(|| StreamError::Sdp("no video media section".into()))?;
    let (name, clock_rate) = codec_name.ok_or_else(|| StreamError::Sdp("video track has no rtpmap".into()))?;
    let codec = match name.as_str() {
        "H264" => VideoCodec::H264,
        "H265" | "HEVC" => VideoCodec::H265,
        _ => return Err(StreamError::UnsupportedCodec(name)),
    };

    let parameter_sets = fmtp
        .as_deref()
        .map(|params| parameter_sets(codec, params))
        .unwrap_or_default();

    tracing::debug!(
        payload_type,
        codec = ?codec,
        clock_rate,
        control = ?control,
        parameter_sets = parameter_sets.len(),
        "parsed SDP video track"
    );

    Ok(VideoMedia {
        payload_type,
        codec,
        clock_rate,
        control,
        parameter_sets,
    })
}

/// Session-level `a=control:` value (before the first `m=` line).
pub fn session_control(sdp: &str) -> Option<String> {
    sdp.lines()
        .map(str::trim)
        .take_while(|l| !l.starts_with("m="))
        .find_map(|l| l.strip_prefix("a=control:"))
        .map(|c| c.trim().to_string())
}

/// Pull parameter sets out of an fmtp attribute (RFC 6184 §8.1,
/// RFC 7798 §7.1).
fn parameter_sets(codec: VideoCodec, params: &str) -> Vec<Vec<u8>> {
    let keys: &[&str] = match codec {
        VideoCodec::H264 => &["sprop-parameter-sets"],
        VideoCodec::H265 => &["sprop-vps", "sprop-sps", "sprop-pps"],
    };

    let mut sets = Vec::new();
    for key in keys {
        let Some(value) = params
            .split(';')
            .filter_map(|p| p.trim().split_once('='))
            .find(|(k, _)| k.trim().eq_ignore_ascii_case(key))
            .map(|(_, v)| v.trim())
        else {
            continue;
        };
        for encoded in value.split(',').filter(|s| !s.is_empty()) {
            match BASE64_STANDARD.decode(encoded) {
                Ok(bytes) if !bytes.is_empty() => sets.push(bytes),
                Ok(_) => {}
                Err(e) => tracing::warn!(key, error = %e, "ignoring undecodable parameter set"),
            }
        }
    }
    sets
}

/// Resolve a track control attribute against the presentation URL
/// (RFC 2326 §C.1.1).
pub fn resolve_control(base: &str, control: Option<&str>) -> String {
    match control {
        None | Some("*") | Some("") => base.to_string(),
        Some(c) if c.starts_with("rtsp://") || c.starts_with("rtsps://") => c.to_string(),
        Some(c) => format!("{}/{}", base.trim_end_matches('/'), c.trim_start_matches('/')),
    }
}
