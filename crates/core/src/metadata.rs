//! Packed recording-identifier decoding.
//!
//! The camera names every recorded clip with a positional identifier that
//! carries the recording window and a hex bitfield describing why the clip
//! was recorded:
//!
//! ```text
//! Mp4Record/2024-08-12/RecM13_DST20240812_214255_214348_1F1E828_4DDA4D.mp4
//!                      │  ││ │  │        │      │      │       └ file size (hex)
//!                      │  ││ │  │        │      │      └ trigger bitfield (hex)
//!                      │  ││ │  │        │      └ end time HHMMSS
//!                      │  ││ │  │        └ start time HHMMSS
//!                      │  ││ │  └ start date YYYYMMDD
//!                      │  ││ └ daylight-saving marker (optional)
//!                      │  │└ format version
//!                      │  └ channel
//!                      └ M = main stream, S = sub stream
//! ```
//!
//! The suffix after the end time depends on the version digit:
//!
//! | Version | Suffix |
//! |---------|--------|
//! | 2, 3 | `<flags>_<size>` |
//! | 9 | `<animal>_<flags part 1>_<flags part 2>_<size>` |
//!
//! Any other version digit is rejected with
//! [`MetadataError::UnsupportedSuffix`]; the grammar was reverse-engineered
//! from firmware output and we do not guess at layouts we have not seen.

use std::sync::LazyLock;

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;

use crate::error::MetadataError;

static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?:^|[/_])Rec(?P<kind>[MS])(?P<channel>[0-9])(?P<version>[0-9])_(?:DST)?(?P<date>[0-9]{8})_(?P<start>[0-9]{6})_(?P<end>[0-9]{6})(?:_(?P<suffix>[^./]*))?(?:\.mp4)?$",
    )
    .expect("identifier regex is valid")
});

/// Encoding profile of a recording or live feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StreamKind {
    /// High-resolution "clear" profile.
    #[default]
    Main,
    /// Low-resolution "fluent" profile.
    Sub,
}

impl StreamKind {
    /// Wire name used by the search command and RTSP paths.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Sub => "sub",
        }
    }
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StreamKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "main" => Ok(Self::Main),
            "sub" => Ok(Self::Sub),
            other => Err(format!("unknown stream kind '{other}', expected main or sub")),
        }
    }
}

/// A named field of the trigger bitfield.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerField {
    ResolutionIndex,
    TvSystem,
    FrameRate,
    AudioIndex,
    Person,
    Face,
    Vehicle,
    Animal,
    EncoderTypeIndex,
    Schedule,
    Motion,
    Rf,
    Doorbell,
    OtherAi,
}

/// `(field, bit position, bit width)` for every interpreted bit.
///
/// Together the entries cover bits 0..=27 exactly once.
pub const FLAG_TABLE: [(TriggerField, u32, u32); 14] = [
    (TriggerField::ResolutionIndex, 21, 7),
    (TriggerField::TvSystem, 20, 1),
    (TriggerField::FrameRate, 13, 7),
    (TriggerField::AudioIndex, 11, 2),
    (TriggerField::Person, 10, 1),
    (TriggerField::Face, 9, 1),
    (TriggerField::Vehicle, 8, 1),
    (TriggerField::Animal, 7, 1),
    (TriggerField::EncoderTypeIndex, 5, 2),
    (TriggerField::Schedule, 4, 1),
    (TriggerField::Motion, 3, 1),
    (TriggerField::Rf, 2, 1),
    (TriggerField::Doorbell, 1, 1),
    (TriggerField::OtherAi, 0, 1),
];

const fn field_mask(pos: u32, width: u32) -> u64 {
    ((1u64 << width) - 1) << pos
}

const fn table_mask() -> u64 {
    let mut mask = 0u64;
    let mut i = 0;
    while i < FLAG_TABLE.len() {
        mask |= field_mask(FLAG_TABLE[i].1, FLAG_TABLE[i].2);
        i += 1;
    }
    mask
}

/// Bits of the trigger word that [`FLAG_TABLE`] interprets.
pub const INTERPRETED_BITS: u64 = table_mask();

/// Decoded trigger bitfield: why a clip was recorded and how it was encoded.
///
/// Bits outside [`FLAG_TABLE`] are kept in `reserved` so that
/// [`to_bits`](Self::to_bits) reproduces the original word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TriggerFlags {
    pub resolution_index: u8,
    /// PAL (true) vs NTSC (false).
    pub tv_system: bool,
    pub frame_rate: u8,
    pub audio_index: u8,
    pub person: bool,
    pub face: bool,
    pub vehicle: bool,
    pub animal: bool,
    pub encoder_type_index: u8,
    pub schedule: bool,
    pub motion: bool,
    /// Passive infrared sensor trigger.
    pub rf: bool,
    pub doorbell: bool,
    pub other_ai: bool,
    /// Uninterpreted bits, in their original positions.
    pub reserved: u64,
}

impl TriggerFlags {
    /// Split a raw trigger word into its fields. Never fails.
    pub fn from_bits(bits: u64) -> Self {
        let mut flags = Self {
            reserved: bits & !INTERPRETED_BITS,
            ..Self::default()
        };
        for &(field, pos, width) in FLAG_TABLE.iter() {
            flags.set(field, (bits >> pos) & ((1u64 << width) - 1));
        }
        flags
    }

    /// Pack the fields back into a trigger word.
    pub fn to_bits(&self) -> u64 {
        FLAG_TABLE
            .iter()
            .fold(self.reserved & !INTERPRETED_BITS, |acc, &(field, pos, width)| {
                acc | ((self.get(field) & ((1u64 << width) - 1)) << pos)
            })
    }

    /// Read one field as an integer.
    pub fn get(&self, field: TriggerField) -> u64 {
        match field {
            TriggerField::ResolutionIndex => self.resolution_index as u64,
            TriggerField::TvSystem => self.tv_system as u64,
            TriggerField::FrameRate => self.frame_rate as u64,
            TriggerField::AudioIndex => self.audio_index as u64,
            TriggerField::Person => self.person as u64,
            TriggerField::Face => self.face as u64,
            TriggerField::Vehicle => self.vehicle as u64,
            TriggerField::Animal => self.animal as u64,
            TriggerField::EncoderTypeIndex => self.encoder_type_index as u64,
            TriggerField::Schedule => self.schedule as u64,
            TriggerField::Motion => self.motion as u64,
            TriggerField::Rf => self.rf as u64,
            TriggerField::Doorbell => self.doorbell as u64,
            TriggerField::OtherAi => self.other_ai as u64,
        }
    }

    fn set(&mut self, field: TriggerField, value: u64) {
        let flag = value != 0;
        match field {
            TriggerField::ResolutionIndex => self.resolution_index = value as u8,
            TriggerField::TvSystem => self.tv_system = flag,
            TriggerField::FrameRate => self.frame_rate = value as u8,
            TriggerField::AudioIndex => self.audio_index = value as u8,
            TriggerField::Person => self.person = flag,
            TriggerField::Face => self.face = flag,
            TriggerField::Vehicle => self.vehicle = flag,
            TriggerField::Animal => self.animal = flag,
            TriggerField::EncoderTypeIndex => self.encoder_type_index = value as u8,
            TriggerField::Schedule => self.schedule = flag,
            TriggerField::Motion => self.motion = flag,
            TriggerField::Rf => self.rf = flag,
            TriggerField::Doorbell => self.doorbell = flag,
            TriggerField::OtherAi => self.other_ai = flag,
        }
    }

    /// True if any AI detector (person, face, vehicle, animal, other) fired.
    pub fn any_ai(&self) -> bool {
        self.person || self.face || self.vehicle || self.animal || self.other_ai
    }

    /// Parse a hex token and decode it.
    pub fn from_hex(token: &str) -> Result<Self, MetadataError> {
        parse_hex(token).map(Self::from_bits)
    }
}

/// Everything packed into a recording identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingMetadata {
    pub start: NaiveDateTime,
    pub end_time: NaiveTime,
    pub channel: u8,
    pub stream_kind: StreamKind,
    pub version: u8,
    pub trigger_flags: TriggerFlags,
    pub file_size: Option<u64>,
    /// Animal classifier code (long suffix only).
    pub animal_type: Option<u8>,
    /// Second trigger word (long suffix only), preserved uninterpreted.
    pub extended_flags: Option<u64>,
}

impl RecordingMetadata {
    /// End of the recording as a full timestamp. Clips that cross midnight
    /// end on the following day.
    pub fn end_datetime(&self) -> NaiveDateTime {
        let end = self.start.date().and_time(self.end_time);
        if end < self.start {
            end + Duration::days(1)
        } else {
            end
        }
    }
}

/// Decode a recording identifier.
///
/// Accepts the camera path (`Mp4Record/2024-08-12/RecM13_…mp4`), the
/// sanitized local file name (`Mp4Record_2024-08-12_RecM13_…mp4`), or the
/// bare identifier.
pub fn decode(raw_identifier: &str) -> Result<RecordingMetadata, MetadataError> {
    let malformed = || MetadataError::MalformedIdentifier(raw_identifier.to_string());

    let caps = IDENTIFIER.captures(raw_identifier).ok_or_else(malformed)?;

    let stream_kind = if &caps["kind"] == "M" {
        StreamKind::Main
    } else {
        StreamKind::Sub
    };
    let channel = digit(&caps["channel"]);
    let version = digit(&caps["version"]);

    let date = NaiveDate::parse_from_str(&caps["date"], "%Y%m%d").map_err(|_| malformed())?;
    let start_time = NaiveTime::parse_from_str(&caps["start"], "%H%M%S").map_err(|_| malformed())?;
    let end_time = NaiveTime::parse_from_str(&caps["end"], "%H%M%S").map_err(|_| malformed())?;

    let suffix = caps.name("suffix").map_or("", |m| m.as_str());
    let tokens: Vec<&str> = if suffix.is_empty() {
        Vec::new()
    } else {
        suffix.split('_').collect()
    };
    let unsupported = || MetadataError::UnsupportedSuffix {
        version,
        suffix: suffix.to_string(),
    };

    let mut metadata = RecordingMetadata {
        start: date.and_time(start_time),
        end_time,
        channel,
        stream_kind,
        version,
        trigger_flags: TriggerFlags::default(),
        file_size: None,
        animal_type: None,
        extended_flags: None,
    };

    match (version, tokens.as_slice()) {
        (2 | 3, [flags, size]) => {
            metadata.trigger_flags = TriggerFlags::from_hex(flags)?;
            metadata.file_size = Some(parse_hex(size)?);
        }
        (9, [animal, flags, extended, size]) => {
            if animal.len() != 1 || !animal.bytes().all(|b| b.is_ascii_digit()) {
                return Err(unsupported());
            }
            metadata.animal_type = Some(digit(animal));
            metadata.trigger_flags = TriggerFlags::from_hex(flags)?;
            metadata.extended_flags = Some(parse_hex(extended)?);
            metadata.file_size = Some(parse_hex(size)?);
        }
        _ => return Err(unsupported()),
    }

    tracing::trace!(
        identifier = raw_identifier,
        channel,
        version,
        start = %metadata.start,
        "decoded recording identifier"
    );

    Ok(metadata)
}

fn digit(s: &str) -> u8 {
    s.as_bytes()[0] - b'0'
}

/// Parse 1 to 16 hex digits. Rejects signs and anything else
/// `from_str_radix` would tolerate.
fn parse_hex(token: &str) -> Result<u64, MetadataError> {
    if token.is_empty() || token.len() > 16 || !token.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(MetadataError::InvalidHex(token.to_string()));
    }
    u64::from_str_radix(token, 16).map_err(|_| MetadataError::InvalidHex(token.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "RecM13_DST20240812_214255_214348_1F1E828_4DDA4D";

    fn dt(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    #[test]
    fn decodes_reference_identifier() {
        let meta = decode(SAMPLE).unwrap();
        assert_eq!(meta.start, dt("2024-08-12 21:42:55"));
        assert_eq!(meta.end_time, NaiveTime::from_hms_opt(21, 43, 48).unwrap());
        assert_eq!(meta.channel, 1);
        assert_eq!(meta.version, 3);
        assert_eq!(meta.stream_kind, StreamKind::Main);
        assert_eq!(meta.file_size, Some(0x4DDA4D));
        assert_eq!(meta.trigger_flags.to_bits(), 0x1F1E828);

        let flags = meta.trigger_flags;
        assert!(flags.motion);
        assert!(!flags.person && !flags.vehicle && !flags.animal && !flags.face);
        assert!(!flags.schedule && !flags.doorbell && !flags.other_ai);
        assert_eq!(flags.encoder_type_index, 1);
        assert_eq!(flags.audio_index, 1);
        assert_eq!(flags.frame_rate, 15);
        assert!(flags.tv_system);
        assert_eq!(flags.resolution_index, 15);
        assert_eq!(flags.reserved, 0);
    }

    #[test]
    fn accepts_camera_path_and_sanitized_name() {
        let camera = decode("Mp4Record/2024-08-12/RecM13_DST20240812_214255_214348_1F1E828_4DDA4D.mp4")
            .unwrap();
        let local = decode("Mp4Record_2024-08-12_RecM13_DST20240812_214255_214348_1F1E828_4DDA4D.mp4")
            .unwrap();
        let bare = decode(SAMPLE).unwrap();
        assert_eq!(camera, bare);
        assert_eq!(local, bare);
    }

    #[test]
    fn dst_marker_is_optional() {
        let meta = decode("RecS02_20201222_075939_080140_6D28808_1A468F9.mp4").unwrap();
        assert_eq!(meta.stream_kind, StreamKind::Sub);
        assert_eq!(meta.channel, 0);
        assert_eq!(meta.version, 2);
        assert_eq!(meta.start, dt("2020-12-22 07:59:39"));
    }

    #[test]
    fn long_suffix_version_nine() {
        let meta = decode("RecM09_DST20250104_180503_180514_2_A2A6408_3F_216D94.mp4").unwrap();
        assert_eq!(meta.version, 9);
        assert_eq!(meta.animal_type, Some(2));
        assert_eq!(meta.trigger_flags.to_bits(), 0xA2A6408);
        assert_eq!(meta.extended_flags, Some(0x3F));
        assert_eq!(meta.file_size, Some(0x216D94));
    }

    #[test]
    fn malformed_prefix_is_rejected() {
        for bad in [
            "",
            "not a recording",
            "RecX13_DST20240812_214255_214348_1F1E828_4DDA4D",
            "RecM13_DST2024081_214255_214348_1F1E828_4DDA4D",
            "RecM13_DST20241312_214255_214348_1F1E828_4DDA4D",
            "RecM13_DST20240812_256000_214348_1F1E828_4DDA4D",
        ] {
            assert!(
                matches!(decode(bad), Err(MetadataError::MalformedIdentifier(_))),
                "{bad:?} should be malformed"
            );
        }
    }

    #[test]
    fn non_ascii_digits_are_malformed() {
        for bad in [
            "RecM\u{0663}3_DST20240812_214255_214348_1F1E828_4DDA4D",
            "RecM1\u{0663}_DST20240812_214255_214348_1F1E828_4DDA4D",
            "RecM13_DST2024081\u{0662}_214255_214348_1F1E828_4DDA4D",
            "RecM13_DST20240812_21425\u{FF15}_214348_1F1E828_4DDA4D",
        ] {
            assert!(
                matches!(decode(bad), Err(MetadataError::MalformedIdentifier(_))),
                "{bad:?} should be malformed"
            );
        }
    }

    #[test]
    fn unknown_version_is_unsupported() {
        let err = decode("RecM15_DST20240812_214255_214348_1F1E828_4DDA4D").unwrap_err();
        assert_eq!(
            err,
            MetadataError::UnsupportedSuffix {
                version: 5,
                suffix: "1F1E828_4DDA4D".into()
            }
        );
    }

    #[test]
    fn suffix_shape_must_match_version() {
        // Short grammar with long-form tokens, and the reverse.
        assert!(matches!(
            decode("RecM13_DST20240812_214255_214348_2_1F1E828_0_4DDA4D"),
            Err(MetadataError::UnsupportedSuffix { version: 3, .. })
        ));
        assert!(matches!(
            decode("RecM09_DST20240812_214255_214348_1F1E828_4DDA4D"),
            Err(MetadataError::UnsupportedSuffix { version: 9, .. })
        ));
        assert!(matches!(
            decode("RecM13_DST20240812_214255_214348"),
            Err(MetadataError::UnsupportedSuffix { .. })
        ));
        assert!(matches!(
            decode("RecM09_DST20250104_180503_180514_X_A2A6408_3F_216D94"),
            Err(MetadataError::UnsupportedSuffix { .. })
        ));
    }

    #[test]
    fn non_hex_tokens_are_invalid_hex() {
        assert_eq!(
            decode("RecM13_DST20240812_214255_214348_1F1EZ28_4DDA4D").unwrap_err(),
            MetadataError::InvalidHex("1F1EZ28".into())
        );
        assert_eq!(
            decode("RecM13_DST20240812_214255_214348_1F1E828_+4DDA4").unwrap_err(),
            MetadataError::InvalidHex("+4DDA4".into())
        );
    }

    #[test]
    fn hex_extraction_is_total_for_expected_width() {
        let mut state = 0x9E37_79B9_7F4A_7C15u64;
        for _ in 0..2000 {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            let token = format!("{:07X}", state & 0x0FFF_FFFF);
            let id = format!("RecM13_DST20240812_214255_214348_{token}_4DDA4D");
            let meta = decode(&id).expect("every 7-digit hex decodes");
            assert_eq!(meta.trigger_flags.to_bits(), state & 0x0FFF_FFFF);
        }
    }

    #[test]
    fn flag_table_covers_each_bit_once() {
        let mut seen = 0u64;
        for &(field, pos, width) in FLAG_TABLE.iter() {
            let mask = field_mask(pos, width);
            assert_eq!(seen & mask, 0, "{field:?} overlaps another field");
            seen |= mask;
        }
        assert_eq!(seen, (1 << 28) - 1);
        assert_eq!(seen, INTERPRETED_BITS);
    }

    #[test]
    fn reserved_bits_survive_round_trip() {
        let bits = 0xF000_0000_0000_0001 | 0x1F1E828;
        let flags = TriggerFlags::from_bits(bits);
        assert_eq!(flags.reserved, 0xF000_0000_0000_0000);
        assert_eq!(flags.to_bits(), bits);
    }

    #[test]
    fn single_bit_fields() {
        assert!(TriggerFlags::from_bits(1 << 10).person);
        assert!(TriggerFlags::from_bits(1 << 9).face);
        assert!(TriggerFlags::from_bits(1 << 8).vehicle);
        assert!(TriggerFlags::from_bits(1 << 7).animal);
        assert!(TriggerFlags::from_bits(1 << 4).schedule);
        assert!(TriggerFlags::from_bits(1 << 1).doorbell);
        assert!(TriggerFlags::from_bits(1).other_ai);
        assert!(TriggerFlags::from_bits(1 << 10).any_ai());
        assert!(!TriggerFlags::from_bits(1 << 3).any_ai());
    }

    #[test]
    fn end_datetime_rolls_past_midnight() {
        let meta = decode("RecM13_DST20240812_235817_000210_1F1E828_4DDA4D").unwrap();
        assert_eq!(meta.end_datetime(), dt("2024-08-13 00:02:10"));

        let same_day = decode(SAMPLE).unwrap();
        assert_eq!(same_day.end_datetime(), dt("2024-08-12 21:43:48"));
    }

    #[test]
    fn stream_kind_parses() {
        assert_eq!("MAIN".parse::<StreamKind>().unwrap(), StreamKind::Main);
        assert_eq!("sub".parse::<StreamKind>().unwrap(), StreamKind::Sub);
        assert!("clear".parse::<StreamKind>().is_err());
    }
}
