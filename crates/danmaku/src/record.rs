//! Comment record types.
//!
//! Core structures for danmaku decoded from video comment segments, plus the
//! document handed to the exporter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::DanmakuError;

/// Length of one comment segment in seconds.
pub const SEGMENT_DURATION_SECS: u64 = 360;

/// Display mode of a danmaku.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum DanmakuMode {
    /// Right-to-left scrolling (modes 1, 2 and 3)
    Scroll(u8),
    /// Pinned to the bottom
    Bottom,
    /// Pinned to the top
    Top,
    /// Left-to-right scrolling
    Reverse,
    /// Positioned (advanced) danmaku
    Positioned,
    /// Code danmaku
    Code,
    /// BAS script danmaku
    Bas,
    /// Any value not known to this crate, preserved as-is
    Other(i32),
}

impl Default for DanmakuMode {
    fn default() -> Self {
        Self::Scroll(1)
    }
}

impl From<i32> for DanmakuMode {
    fn from(value: i32) -> Self {
        match value {
            1..=3 => Self::Scroll(value as u8),
            4 => Self::Bottom,
            5 => Self::Top,
            6 => Self::Reverse,
            7 => Self::Positioned,
            8 => Self::Code,
            9 => Self::Bas,
            other => Self::Other(other),
        }
    }
}

impl From<DanmakuMode> for i32 {
    fn from(mode: DanmakuMode) -> Self {
        match mode {
            DanmakuMode::Scroll(n) => n as i32,
            DanmakuMode::Bottom => 4,
            DanmakuMode::Top => 5,
            DanmakuMode::Reverse => 6,
            DanmakuMode::Positioned => 7,
            DanmakuMode::Code => 8,
            DanmakuMode::Bas => 9,
            DanmakuMode::Other(n) => n,
        }
    }
}

/// Comment pool a danmaku was posted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum DanmakuPool {
    #[default]
    Normal,
    Subtitle,
    Special,
    Other(i32),
}

impl From<i32> for DanmakuPool {
    fn from(value: i32) -> Self {
        match value {
            0 => Self::Normal,
            1 => Self::Subtitle,
            2 => Self::Special,
            other => Self::Other(other),
        }
    }
}

impl From<DanmakuPool> for i32 {
    fn from(pool: DanmakuPool) -> Self {
        match pool {
            DanmakuPool::Normal => 0,
            DanmakuPool::Subtitle => 1,
            DanmakuPool::Special => 2,
            DanmakuPool::Other(n) => n,
        }
    }
}

/// A single decoded danmaku.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentRecord {
    /// Danmaku id, unique within one video part
    pub id: i64,
    /// Playback offset in milliseconds
    pub timestamp_ms: i32,
    pub mode: DanmakuMode,
    pub font_size: i32,
    /// Packed 0xRRGGBB
    pub color: u32,
    /// Unix time the danmaku was posted
    pub send_time_unix: i64,
    pub pool: DanmakuPool,
    /// CRC32 hash of the sender's uid, as published by the platform
    pub sender_hash: String,
    /// String form of the id used by newer clients
    pub row_id: String,
    pub text: String,
    #[serde(default)]
    pub weight: i32,
    #[serde(default)]
    pub attr: i32,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub animation: String,
}

impl CommentRecord {
    /// Playback offset in seconds.
    pub fn seconds(&self) -> f64 {
        f64::from(self.timestamp_ms) / 1000.0
    }

    /// Send time as a UTC datetime, if representable.
    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.send_time_unix, 0)
    }
}

/// Records decoded from one segment payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SegmentBatch {
    /// 1-based segment index
    pub index: u32,
    pub records: Vec<CommentRecord>,
}

impl SegmentBatch {
    pub fn new(index: u32, records: Vec<CommentRecord>) -> Self {
        Self { index, records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Number of segments to request for a part.
///
/// `ceil(duration / 360)` capped by `max_segments`, never below 1. A zero
/// duration (unknown) yields a single segment.
pub fn segment_count(duration_secs: u64, max_segments: u32) -> u32 {
    let by_duration = duration_secs.div_ceil(SEGMENT_DURATION_SECS);
    let by_duration = u32::try_from(by_duration).unwrap_or(u32::MAX);
    by_duration.min(max_segments).max(1)
}

/// Supported export formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Xml,
    Json,
    Csv,
    Txt,
}

impl ExportFormat {
    pub const ALL: [ExportFormat; 4] = [Self::Xml, Self::Json, Self::Csv, Self::Txt];

    /// File extension, without the dot.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Xml => "xml",
            Self::Json => "json",
            Self::Csv => "csv",
            Self::Txt => "txt",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = DanmakuError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "xml" => Ok(Self::Xml),
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            "txt" | "text" => Ok(Self::Txt),
            _ => Err(DanmakuError::UnsupportedFormat(s.to_string())),
        }
    }
}

/// Aggregated records of one invocation, ready for export.
#[derive(Debug, Clone)]
pub struct ExportDocument {
    /// Identifier the user asked for, e.g. `av170001`
    pub source: String,
    pub format: ExportFormat,
    pub generated_at: DateTime<Utc>,
    /// Chat id (cid) when the document covers exactly one part
    pub chat_id: Option<u64>,
    pub records: Vec<CommentRecord>,
}

impl ExportDocument {
    pub fn new(source: impl Into<String>, format: ExportFormat, records: Vec<CommentRecord>) -> Self {
        Self {
            source: source.into(),
            format,
            generated_at: Utc::now(),
            chat_id: None,
            records,
        }
    }

    pub fn with_chat_id(mut self, chat_id: u64) -> Self {
        self.chat_id = Some(chat_id);
        self
    }

    /// Output file name: identifier plus format extension.
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.source, self.format.extension())
    }
}
