use super::rtp::RtpPacket;
use super::{Depacketizer, FrameAssembler, NalKind, VideoCodec, VideoFrame, aggregated_units};
use crate::error::DepacketizeError;

const STAP_A: u8 = 24;
const FU_A: u8 = 28;

/// H.264 RTP depacketizer (RFC 6184).
///
/// Handles the three payload structures cameras use in
/// non-interleaved mode (`packetization-mode=1`):
///
/// - **Single NAL Unit** (§5.6): payload is one NAL, types 1–23.
///
/// - **STAP-A** (§5.7.1): type 24; several small NALs (typically SPS, PPS
///   and SEI) each prefixed with a 16-bit size.
///
/// - **FU-A** (§5.8): type 28; one large NAL split across packets:
///
///   ```text
///   FU indicator:  [F|NRI|Type=28]     (1 byte)
///   FU header:     [S|E|R|NAL_Type]    (1 byte)
///   Fragment data: [...]
///   ```
///
///   The original NAL header is rebuilt as `F|NRI` from the indicator plus
///   the type from the FU header. A fragment run broken by packet loss is
///   discarded.
///
/// STAP-B, MTAP and FU-B (interleaved mode) are rejected.
pub struct H264Depacketizer {
    assembler: FrameAssembler,
    fragment: Option<Vec<u8>>,
}

impl H264Depacketizer {
    pub fn new(parameter_sets: Vec<Vec<u8>>) -> Self {
        Self {
            assembler: FrameAssembler::new(VideoCodec::H264, parameter_sets),
            fragment: None,
        }
    }

    fn classify(nal: &[u8]) -> NalKind {
        match nal.first().map(|b| b & 0x1f) {
            Some(7 | 8) => NalKind::ParameterSet,
            Some(5) => NalKind::Keyframe,
            _ => NalKind::Other,
        }
    }

    fn push_nal(&mut self, nal: &[u8]) {
        self.assembler.push_nal(nal, Self::classify(nal));
    }

    fn read_payload(&mut self, payload: &[u8]) -> Result<(), DepacketizeError> {
        let Some(&indicator) = payload.first() else {
            return Err(DepacketizeError::Truncated(0));
        };

        match indicator & 0x1f {
            1..=23 => {
                self.push_nal(payload);
                Ok(())
            }
            STAP_A => {
                for nal in aggregated_units(&payload[1..])? {
                    self.push_nal(nal);
                }
                Ok(())
            }
            FU_A => {
                if payload.len() < 2 {
                    return Err(DepacketizeError::Truncated(payload.len()));
                }
                let fu_header = payload[1];
                let start = fu_header & 0x80 != 0;
                let end = fu_header & 0x40 != 0;
                let data = &payload[2..];

                if start {
                    if self.fragment.is_some() {
                        tracing::debug!("FU-A restarted before end bit, dropping partial NAL");
                    }
                    let mut nal = Vec::with_capacity(data.len() * 4);
                    nal.push((indicator & 0xe0) | (fu_header & 0x1f));
                    nal.extend_from_slice(data);
                    self.fragment = Some(nal);
                } else if let Some(nal) = self.fragment.as_mut() {
                    nal.extend_from_slice(data);
                } else {
                    tracing::trace!("FU-A continuation without start, skipping");
                    return Ok(());
                }

                if end && let Some(nal) = self.fragment.take() {
                    self.push_nal(&nal);
                }
                Ok(())
            }
            nal_type => Err(DepacketizeError::UnsupportedPacketType {
                codec: "H264",
                nal_type,
            }),
        }
    }
}

impl Depacketizer for H264Depacketizer {
    fn codec(&self) -> VideoCodec {
        VideoCodec::H264
    }

    fn push(&mut self, packet: &RtpPacket<'_>) -> Result<(), DepacketizeError> {
        let lost = self.assembler.begin_packet(packet);
        if lost && self.fragment.take().is_some() {
            tracing::debug!("dropping FU-A fragment after packet loss");
        }
        let result = self.read_payload(packet.payload);
        self.assembler.end_packet(packet.marker);
        result
    }

    fn pop_frame(&mut self) -> Option<VideoFrame> {
        self.assembler.pop_frame()
    }
}
