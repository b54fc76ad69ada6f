//! Recorded segment discovery.
//!
//! [`SegmentLocator`] shapes the camera's `Search` command, sends it through a
//! [`CommandTransport`], and turns each returned file entry into a
//! [`Segment`] by decoding its packed name.

use std::ops::Range;
use std::path::Path;
use std::sync::Arc;

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use serde_json::{Value, json};

use crate::api::CommandTransport;
use crate::error::{MetadataError, TransportError};
use crate::metadata::{self, StreamKind, TriggerFlags};
use crate::scheduler::DownloadRequest;
use crate::storage;

/// One recorded clip on the camera.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Camera-side path; the identity of the segment.
    pub remote_path: String,
    pub channel: u8,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub stream_kind: StreamKind,
    pub trigger_flags: TriggerFlags,
    pub byte_size: Option<u64>,
}

impl Segment {
    /// Duration of the clip.
    pub fn duration(&self) -> chrono::Duration {
        self.end - self.start
    }

    /// Download request placing this segment flat inside `dir`.
    pub fn download_request(&self, dir: &Path) -> DownloadRequest {
        DownloadRequest {
            remote_path: self.remote_path.clone(),
            local_path: storage::local_path_for(dir, &self.remote_path),
            expected_size: self.byte_size,
        }
    }
}

/// A file entry that could not be turned into a [`Segment`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedEntry {
    pub name: String,
    pub error: MetadataError,
}

/// Result of a search, including entries whose names did not decode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchReport {
    pub segments: Vec<Segment>,
    pub skipped: Vec<SkippedEntry>,
}

pub struct SegmentLocator {
    transport: Arc<dyn CommandTransport>,
}

impl SegmentLocator {
    pub fn new(transport: Arc<dyn CommandTransport>) -> Self {
        Self { transport }
    }

    /// Segments recorded on `channel` within `range`, in reply order.
    ///
    /// Entries whose names fail to decode are logged and left out; use
    /// [`find_detailed`](Self::find_detailed) to see them.
    pub fn find(
        &self,
        range: Range<NaiveDateTime>,
        channel: u8,
        stream_kind: StreamKind,
    ) -> Result<Vec<Segment>, TransportError> {
        self.find_detailed(range, channel, stream_kind)
            .map(|report| report.segments)
    }

    pub fn find_detailed(
        &self,
        range: Range<NaiveDateTime>,
        channel: u8,
        stream_kind: StreamKind,
    ) -> Result<SearchReport, TransportError> {
        let body = json!([{
            "cmd": "Search",
            "action": 1,
            "param": {
                "Search": {
                    "channel": channel,
                    "streamType": stream_kind.as_str(),
                    "onlyStatus": 0,
                    "StartTime": time_object(range.start),
                    "EndTime": time_object(range.end),
                }
            }
        }]);

        let reply = self.transport.execute("Search", body)?;
        let files = reply
            .pointer("/0/value/SearchResult/File")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        let mut report = SearchReport::default();
        for entry in files {
            match segment_from_entry(entry, channel, stream_kind) {
                Ok(segment) => report.segments.push(segment),
                Err(skipped) => {
                    tracing::warn!(name = %skipped.name, error = %skipped.error, "skipping recording");
                    report.skipped.push(skipped);
                }
            }
        }

        tracing::debug!(
            channel,
            stream = %stream_kind,
            found = report.segments.len(),
            skipped = report.skipped.len(),
            "search complete"
        );
        Ok(report)
    }

    /// Search several `(channel, kind)` pairs and merge the results,
    /// ordered by start time.
    ///
    /// A transport failure on any query fails the whole call.
    pub fn find_all(
        &self,
        range: Range<NaiveDateTime>,
        targets: &[(u8, StreamKind)],
    ) -> Result<Vec<Segment>, TransportError> {
        let mut segments = Vec::new();
        for &(channel, kind) in targets {
            segments.extend(self.find(range.clone(), channel, kind)?);
        }
        segments.sort_by(|a, b| a.start.cmp(&b.start));
        Ok(segments)
    }

    /// File names the camera offers through its `NvrDownload` listing.
    pub fn find_playback_files(
        &self,
        range: Range<NaiveDateTime>,
        channel: u8,
        stream_kind: StreamKind,
    ) -> Result<Vec<String>, TransportError> {
        let body = json!([{
            "cmd": "NvrDownload",
            "action": 1,
            "param": {
                "NvrDownload": {
                    "channel": channel,
                    "iLogicChannel": 0,
                    "streamType": stream_kind.as_str(),
                    "StartTime": time_object(range.start),
                    "EndTime": time_object(range.end),
                }
            }
        }]);

        let reply = self.transport.execute("NvrDownload", body)?;
        let names = reply
            .pointer("/0/value/fileList")
            .and_then(Value::as_array)
            .map(|files| {
                files
                    .iter()
                    .filter_map(|f| f.get("fileName").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Ok(names)
    }
}

fn time_object(t: NaiveDateTime) -> Value {
    json!({
        "year": t.year(),
        "mon": t.month(),
        "day": t.day(),
        "hour": t.hour(),
        "min": t.minute(),
        "sec": t.second(),
    })
}

fn parse_time_object(value: &Value) -> Option<NaiveDateTime> {
    let field = |key: &str| value.get(key).and_then(Value::as_u64);
    let date = NaiveDate::from_ymd_opt(
        i32::try_from(field("year")?).ok()?,
        u32::try_from(field("mon")?).ok()?,
        u32::try_from(field("day")?).ok()?,
    )?;
    date.and_hms_opt(
        u32::try_from(field("hour")?).ok()?,
        u32::try_from(field("min")?).ok()?,
        u32::try_from(field("sec")?).ok()?,
    )
}

/// Sizes appear both as numbers and as decimal strings depending on firmware.
fn parse_size(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn segment_from_entry(
    entry: &Value,
    channel: u8,
    stream_kind: StreamKind,
) -> Result<Segment, SkippedEntry> {
    let name = entry.get("name").and_then(Value::as_str).unwrap_or_default();
    let decoded = metadata::decode(name).map_err(|error| SkippedEntry {
        name: name.to_string(),
        error,
    })?;

    let start = entry
        .get("StartTime")
        .and_then(parse_time_object)
        .unwrap_or(decoded.start);
    let end = entry
        .get("EndTime")
        .and_then(parse_time_object)
        .unwrap_or_else(|| decoded.end_datetime());
    let byte_size = entry.get("size").and_then(parse_size).or(decoded.file_size);

    Ok(Segment {
        remote_path: name.to_string(),
        channel,
        start,
        end,
        stream_kind,
        trigger_flags: decoded.trigger_flags,
        byte_size,
    })
}
