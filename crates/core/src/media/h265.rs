//! H.265 (HEVC) RTP depacketizer (RFC 7798).
//!
//! Key differences from H.264 (RFC 6184):
//!
//! - **2-byte NAL unit header**. The NAL type is in bits 1..6 of the first
//!   byte: `(b0 >> 1) & 0x3f`.
//!
//! - **Aggregation Packet** (§4.4.2), type 48: 2-byte payload header, then
//!   `(u16 size, NAL)` entries, same as STAP-A.
//!
//! - **Fragmentation Unit** (§4.4.3), type 49: 2-byte payload header plus a
//!   1-byte FU header `[S|E|FuType(6)]`. The original NAL header is the
//!   payload header with its type field replaced by `FuType`.
//!
//! DONL fields are never present because cameras do not signal
//! `sprop-max-don-diff`. PACI packets (type 50) are rejected.

use super::rtp::RtpPacket;
use super::{Depacketizer, FrameAssembler, NalKind, VideoCodec, VideoFrame, aggregated_units};
use crate::error::DepacketizeError;

const AP: u8 = 48;
const FU: u8 = 49;

pub struct H265Depacketizer {
    assembler: FrameAssembler,
    fragment: Option<Vec<u8>>,
}

impl H265Depacketizer {
    pub fn new(parameter_sets: Vec<Vec<u8>>) -> Self {
        Self {
            assembler: FrameAssembler::new(VideoCodec::H265, parameter_sets),
            fragment: None,
        }
    }

    fn classify(nal: &[u8]) -> NalKind {
        match nal.first().map(|b| (b >> 1) & 0x3f) {
            Some(32..=34) => NalKind::ParameterSet,
            // IRAP pictures: BLA, IDR, CRA
            Some(16..=23) => NalKind::Keyframe,
            _ => NalKind::Other,
        }
    }

    fn push_nal(&mut self, nal: &[u8]) {
        self.assembler.push_nal(nal, Self::classify(nal));
    }

    fn read_payload(&mut self, payload: &[u8]) -> Result<(), DepacketizeError> {
        if payload.len() < 2 {
            return Err(DepacketizeError::Truncated(payload.len()));
        }

        match (payload[0] >> 1) & 0x3f {
            0..=47 => {
                self.push_nal(payload);
                Ok(())
            }
            AP => {
                for nal in aggregated_units(&payload[2..])? {
                    self.push_nal(nal);
                }
                Ok(())
            }
            FU => {
                if payload.len() < 3 {
                    return Err(DepacketizeError::Truncated(payload.len()));
                }
                let fu_header = payload[2];
                let start = fu_header & 0x80 != 0;
                let end = fu_header & 0x40 != 0;
                let fu_type = fu_header & 0x3f;
                let data = &payload[3..];

                if start {
                    if self.fragment.is_some() {
                        tracing::debug!("H.265 FU restarted before end bit, dropping partial NAL");
                    }
                    let mut nal = Vec::with_capacity(data.len() * 4);
                    nal.push((payload[0] & 0x81) | (fu_type << 1));
                    nal.push(payload[1]);
                    nal.extend_from_slice(data);
                    self.fragment = Some(nal);
                } else if let Some(nal) = self.fragment.as_mut() {
                    nal.extend_from_slice(data);
                } else {
                    tracing::trace!("H.265 FU continuation without start, skipping");
                    return Ok(());
                }

                if end && let Some(nal) = self.fragment.take() {
                    self.push_nal(&nal);
                }
                Ok(())
            }
            nal_type => Err(DepacketizeError::UnsupportedPacketType {
                codec: "H265",
                nal_type,
            }),
        }
    }
}

impl Depacketizer for H265Depacketizer {
    fn codec(&self) -> VideoCodec {
        VideoCodec::H265
    }

    fn push(&mut self, packet: &RtpPacket<'_>) -> Result<(), DepacketizeError> {
        let lost = self.assembler.begin_packet(packet);
        if lost && self.fragment.take().is_some() {
            tracing::debug!("dropping H.265 FU after packet loss");
        }
        let result = self.read_payload(packet.payload);
        self.assembler.end_packet(packet.marker);
        result
    }

    fn pop_frame(&mut self) -> Option<VideoFrame> {
        self.assembler.pop_frame()
    }
}
