//! Danmaku: decoding, merging and export of video comment segments.
//!
//! This crate is network-free. It turns raw segment payloads into
//! [`CommentRecord`]s, merges the segments of a part into one timeline and
//! serializes the result.
//!
//! ## Core Types
//!
//! - [`CommentRecord`] - A single decoded danmaku
//! - [`SegmentBatch`] - Records decoded from one six-minute segment
//! - [`ExportDocument`] - The merged records of one invocation plus metadata
//!
//! ## Pipeline
//!
//! - [`decode_segment`] - Decode one segment payload
//! - [`RecordAggregator`] / [`aggregate`] - Sort and deduplicate a part's batches
//! - [`export`] - Serialize to XML, JSON, CSV or plain text

pub mod aggregator;
pub mod decoder;
pub mod error;
pub mod export;
pub mod record;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use aggregator::{RecordAggregator, aggregate, concat_parts};
pub use decoder::decode_segment;
pub use error::{DanmakuError, Result};
pub use export::{export, export_named, records_from_csv, records_from_json};
pub use record::{
    CommentRecord, DanmakuMode, DanmakuPool, ExportDocument, ExportFormat, SEGMENT_DURATION_SECS,
    SegmentBatch, segment_count,
};
