//! RTP depacketization for live video.
//!
//! This module turns received RTP packets back into complete access units
//! (one per video frame) in Annex B byte-stream format, ready to hand to
//! any H.264/H.265 decoder.
//!
//! ## RTP overview (RFC 3550)
//!
//! An encoded frame arrives as one or more RTP packets ([`rtp::RtpPacket`])
//! sharing a timestamp. The marker bit is set on the last packet of the
//! frame. Codec payload formats carry NAL units either whole, aggregated
//! several per packet, or fragmented across packets.
//!
//! ## Supported codecs
//!
//! | Codec | Module | RFC |
//! |-------|--------|-----|
//! | H.264 | [`h264`] | [RFC 6184](https://tools.ietf.org/html/rfc6184) |
//! | H.265 | [`h265`] | [RFC 7798](https://tools.ietf.org/html/rfc7798) |

pub mod h264;
pub mod h265;
pub mod rtp;

use std::collections::VecDeque;
use std::fmt;

use crate::error::DepacketizeError;
use rtp::RtpPacket;

const START_CODE: [u8; 4] = [0, 0, 0, 1];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VideoCodec {
    H264,
    H265,
}

impl fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::H264 => f.write_str("H264"),
            Self::H265 => f.write_str("H265"),
        }
    }
}

/// One complete access unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    pub codec: VideoCodec,
    /// NAL units, each preceded by a 4-byte start code.
    pub data: Vec<u8>,
    pub rtp_timestamp: u32,
    /// Contains an IDR/IRAP picture; decoding can start here.
    pub keyframe: bool,
}

/// Codec-specific RTP payload reader.
///
/// Feed every packet of the video track to [`push`](Self::push) in arrival
/// order, then drain finished frames with [`pop_frame`](Self::pop_frame).
/// A packet that cannot be read is reported and otherwise ignored; the
/// depacketizer stays usable.
pub trait Depacketizer: Send {
    fn codec(&self) -> VideoCodec;

    fn push(&mut self, packet: &RtpPacket<'_>) -> Result<(), DepacketizeError>;

    fn pop_frame(&mut self) -> Option<VideoFrame>;
}

/// Create the depacketizer for `codec`. `parameter_sets` (from SDP) are
/// prepended to the first keyframe.
pub fn depacketizer_for(codec: VideoCodec, parameter_sets: Vec<Vec<u8>>) -> Box<dyn Depacketizer> {
    match codec {
        VideoCodec::H264 => Box::new(h264::H264Depacketizer::new(parameter_sets)),
        VideoCodec::H265 => Box::new(h265::H265Depacketizer::new(parameter_sets)),
    }
}

/// Extract NAL units from an Annex B bitstream.
///
/// Scans for start codes (both 4-byte `00 00 00 01` and 3-byte
/// `00 00 01`) and returns the NAL data between them, excluding the start
/// codes themselves. The start code length is tracked per NAL so mixed
/// 3- and 4-byte codes split correctly.
pub fn split_annex_b(data: &[u8]) -> Vec<&[u8]> {
    let mut i = 0usize;

    // (nal_data_start_index, start_code_length)
    let mut start_entries: Vec<(usize, usize)> = Vec::new();

    while i < data.len() {
        if i + 3 < data.len() && data[i..i + 4] == START_CODE {
            start_entries.push((i + 4, 4));
            i += 4;
        } else if i + 2 < data.len() && data[i..i + 3] == [0, 0, 1] {
            start_entries.push((i + 3, 3));
            i += 3;
        } else {
            i += 1;
        }
    }

    let mut nal_units = Vec::with_capacity(start_entries.len());
    for (idx, &(start, _)) in start_entries.iter().enumerate() {
        let end = match start_entries.get(idx + 1) {
            Some(&(next_start, next_sc_len)) => next_start - next_sc_len,
            None => data.len(),
        };
        if start < end {
            nal_units.push(&data[start..end]);
        }
    }
    nal_units
}

/// How a codec classifies one NAL unit for frame assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NalKind {
    ParameterSet,
    Keyframe,
    Other,
}

/// Groups NAL units into access units.
///
/// A frame ends on the marker bit, or when a packet with a new timestamp
/// arrives first (lost marker packet). Shared by both codecs; the codec
/// modules only deal with their payload formats.
pub(crate) struct FrameAssembler {
    codec: VideoCodec,
    parameter_sets: Vec<Vec<u8>>,
    parameter_sets_sent: bool,
    timestamp: Option<u32>,
    data: Vec<u8>,
    keyframe: bool,
    has_parameter_sets: bool,
    last_sequence: Option<u16>,
    ready: VecDeque<VideoFrame>,
}

impl FrameAssembler {
    pub(crate) fn new(codec: VideoCodec, parameter_sets: Vec<Vec<u8>>) -> Self {
        Self {
            codec,
            parameter_sets,
            parameter_sets_sent: false,
            timestamp: None,
            data: Vec::new(),
            keyframe: false,
            has_parameter_sets: false,
            last_sequence: None,
            ready: VecDeque::new(),
        }
    }

    /// Start processing `packet`. Returns `true` if packets were lost since
    /// the previous one.
    pub(crate) fn begin_packet(&mut self, packet: &RtpPacket<'_>) -> bool {
        if self.timestamp.is_some_and(|ts| ts != packet.timestamp) {
            self.flush();
        }
        self.timestamp = Some(packet.timestamp);

        let lost = self
            .last_sequence
            .is_some_and(|last| packet.sequence != last.wrapping_add(1));
        if lost {
            tracing::debug!(
                codec = %self.codec,
                expected = self.last_sequence.map(|s| s.wrapping_add(1)),
                got = packet.sequence,
                "RTP sequence gap"
            );
        }
        self.last_sequence = Some(packet.sequence);
        lost
    }

    pub(crate) fn push_nal(&mut self, nal: &[u8], kind: NalKind) {
        if nal.is_empty() {
            return;
        }
        match kind {
            NalKind::ParameterSet => self.has_parameter_sets = true,
            NalKind::Keyframe => self.keyframe = true,
            NalKind::Other => {}
        }
        self.data.extend_from_slice(&START_CODE);
        self.data.extend_from_slice(nal);
    }

    pub(crate) fn end_packet(&mut self, marker: bool) {
        if marker {
            self.flush();
        }
    }

    fn flush(&mut self) {
        let Some(rtp_timestamp) = self.timestamp.take() else {
            return;
        };
        if self.data.is_empty() {
            return;
        }

        let mut data = std::mem::take(&mut self.data);
        if self.keyframe && !self.parameter_sets_sent {
            if !self.has_parameter_sets && !self.parameter_sets.is_empty() {
                let mut prefixed = Vec::with_capacity(data.len() + 64);
                for set in &self.parameter_sets {
                    prefixed.extend_from_slice(&START_CODE);
                    prefixed.extend_from_slice(set);
                }
                prefixed.extend_from_slice(&data);
                data = prefixed;
            }
            self.parameter_sets_sent = true;
        }

        tracing::trace!(
            codec = %self.codec,
            rtp_timestamp,
            bytes = data.len(),
            keyframe = self.keyframe,
            "access unit complete"
        );

        self.ready.push_back(VideoFrame {
            codec: self.codec,
            data,
            rtp_timestamp,
            keyframe: self.keyframe,
        });
        self.keyframe = false;
        self.has_parameter_sets = false;
    }

    pub(crate) fn pop_frame(&mut self) -> Option<VideoFrame> {
        self.ready.pop_front()
    }
}

/// Walk the `(u16 size, NAL)` entries of an aggregation packet
/// (STAP-A, RFC 6184 §5.7.1; AP, RFC 7798 §4.4.2).
pub(crate) fn aggregated_units(mut body: &[u8]) -> Result<Vec<&[u8]>, DepacketizeError> {
    let mut units = Vec::new();
    while !body.is_empty() {
        if body.len() < 2 {
            return Err(DepacketizeError::BadAggregation);
        }
        let size = usize::from(u16::from_be_bytes([body[0], body[1]]));
        let unit = body
            .get(2..2 + size)
            .ok_or(DepacketizeError::BadAggregation)?;
        units.push(unit);
        body = &body[2 + size..];
    }
    Ok(units)
}
