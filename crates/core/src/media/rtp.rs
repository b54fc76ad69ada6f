use crate::error::DepacketizeError;

const FIXED_HEADER_LEN: usize = 12;

/// A received RTP packet (RFC 3550 §5.1), borrowing its payload.
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           Timestamp                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                             SSRC                              |
/// +=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+
/// |            CSRC list (CC × 32 bits), extension (if X)         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// CSRCs and header extensions are skipped; padding (P) is stripped from
/// the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpPacket<'a> {
    pub payload_type: u8,
    /// Set on the last packet of an access unit (RFC 6184 §5.1).
    pub marker: bool,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub payload: &'a [u8],
}

impl<'a> RtpPacket<'a> {
    pub fn parse(buf: &'a [u8]) -> Result<Self, DepacketizeError> {
        if buf.len() < FIXED_HEADER_LEN {
            return Err(DepacketizeError::Truncated(buf.len()));
        }

        let version = buf[0] >> 6;
        if version != 2 {
            return Err(DepacketizeError::BadVersion(version));
        }
        let padding = buf[0] & 0x20 != 0;
        let extension = buf[0] & 0x10 != 0;
        let csrc_count = usize::from(buf[0] & 0x0f);

        let mut offset = FIXED_HEADER_LEN + csrc_count * 4;
        if extension {
            let ext = buf
                .get(offset..offset + 4)
                .ok_or(DepacketizeError::Truncated(buf.len()))?;
            let words = usize::from(u16::from_be_bytes([ext[2], ext[3]]));
            offset += 4 + words * 4;
        }

        let mut end = buf.len();
        if padding {
            let pad = usize::from(buf[end - 1]);
            end = end.saturating_sub(pad);
        }
        if offset > end {
            return Err(DepacketizeError::Truncated(buf.len()));
        }

        Ok(Self {
            payload_type: buf[1] & 0x7f,
            marker: buf[1] & 0x80 != 0,
            sequence: u16::from_be_bytes([buf[2], buf[3]]),
            timestamp: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            ssrc: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
            payload: &buf[offset..end],
        })
    }
}

/// Serialize a minimal RTP packet; used by the depacketizer tests.
#[cfg(test)]
pub(crate) fn build(pt: u8, marker: bool, sequence: u16, timestamp: u32, payload: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(FIXED_HEADER_LEN + payload.len());
    packet.push(2 << 6);
    packet.push((u8::from(marker) << 7) | pt);
    packet.extend_from_slice(&sequence.to_be_bytes());
    packet.extend_from_slice(&timestamp.to_be_bytes());
    packet.extend_from_slice(&0xAABBCCDDu32.to_be_bytes());
    packet.extend_from_slice(payload);
    packet
}
