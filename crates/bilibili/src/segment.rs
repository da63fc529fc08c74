//! Segment fetching.
//!
//! A part's danmaku are split in six-minute segments, one request each. All
//! segments of a part are requested concurrently; a semaphore shared by every
//! fetch of a [`SegmentFetcher`] bounds the number of requests in flight, also
//! across parts. Segment 1 is mandatory, later segments are best effort.

use danmaku::{CommentRecord, SegmentBatch, decode_segment, segment_count};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::client::{HttpTransport, build_query};
use crate::error::{ApiError, Result};
use crate::resolver::MediaTarget;
use crate::wbi::WbiSigner;

pub const WBI_SEGMENT_URL: &str = "https://api.bilibili.com/x/v2/dm/wbi/web/seg.so";
pub const LEGACY_SEGMENT_URL: &str = "https://api.bilibili.com/x/v2/dm/web/seg.so";

pub const DEFAULT_MAX_SEGMENTS: u32 = 10;
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Progress notifications, keyed by the target's `part_index`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchEvent {
    Planned { part_index: usize, segments: u32 },
    SegmentDone { part_index: usize, segment: u32, records: usize },
    SegmentFailed { part_index: usize, segment: u32 },
}

/// A non-first segment that could not be fetched or decoded.
#[derive(Debug)]
pub struct SegmentFailure {
    pub index: u32,
    pub error: ApiError,
}

/// Everything fetched for one target.
#[derive(Debug)]
pub struct TargetFetch {
    pub target: MediaTarget,
    /// Number of segments requested
    pub planned: u32,
    /// Successful batches in segment order
    pub batches: Vec<SegmentBatch>,
    pub failures: Vec<SegmentFailure>,
}

impl TargetFetch {
    pub fn is_truncated(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Records received, duplicates included.
    pub fn received(&self) -> usize {
        self.batches.iter().map(SegmentBatch::len).sum()
    }

    /// e.g. `segments 2,3 of 5 failed`
    pub fn failure_summary(&self) -> Option<String> {
        if self.failures.is_empty() {
            return None;
        }
        let indices = self
            .failures
            .iter()
            .map(|f| f.index.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let noun = if self.failures.len() == 1 {
            "segment"
        } else {
            "segments"
        };
        Some(format!("{noun} {indices} of {} failed", self.planned))
    }
}

impl fmt::Display for SegmentFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "segment {}: {}", self.index, self.error)
    }
}

#[derive(Clone)]
pub struct SegmentFetcher {
    transport: Arc<dyn HttpTransport>,
    signer: Arc<WbiSigner>,
    permits: Arc<Semaphore>,
    max_segments: u32,
    events: Option<mpsc::UnboundedSender<FetchEvent>>,
}

impl SegmentFetcher {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            transport,
            signer: Arc::new(WbiSigner::new()),
            permits: Arc::new(Semaphore::new(DEFAULT_CONCURRENCY)),
            max_segments: DEFAULT_MAX_SEGMENTS,
            events: None,
        }
    }

    /// Cap on segments per target. Zero is treated as one.
    pub fn with_max_segments(mut self, max_segments: u32) -> Self {
        self.max_segments = max_segments.max(1);
        self
    }

    /// Ceiling on concurrent segment requests across all targets, clamped to
    /// `1..=Semaphore::MAX_PERMITS`.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        let permits = concurrency.clamp(1, Semaphore::MAX_PERMITS);
        self.permits = Arc::new(Semaphore::new(permits));
        self
    }

    pub fn with_events(mut self, events: mpsc::UnboundedSender<FetchEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn max_segments(&self) -> u32 {
        self.max_segments
    }

    fn emit(&self, event: FetchEvent) {
        if let Some(tx) = &self.events {
            // Nobody listening is fine.
            let _ = tx.send(event);
        }
    }

    /// Fetch every segment of `target`.
    ///
    /// Fails only when segment 1 fails; other failures are returned in
    /// [`TargetFetch::failures`].
    pub async fn fetch(&self, target: &MediaTarget) -> Result<TargetFetch> {
        let planned = segment_count(target.duration_secs, self.max_segments);
        debug!(cid = target.cid, planned, "Fetching segments");
        self.emit(FetchEvent::Planned {
            part_index: target.part_index,
            segments: planned,
        });

        // Dropping the set aborts the remaining tasks.
        let mut tasks = JoinSet::new();
        for index in 1..=planned {
            let fetcher = self.clone();
            let target = target.clone();
            tasks.spawn(async move {
                let result = fetcher.fetch_segment(&target, index).await;
                (index, result)
            });
        }

        let mut batches = Vec::with_capacity(planned as usize);
        let mut failures = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let (index, result) = match joined {
                Ok(pair) => pair,
                Err(join_err) => {
                    warn!(error = ?join_err, "Segment task did not complete");
                    return Err(ApiError::Other(format!("segment task failed: {join_err}")));
                }
            };
            match result {
                Ok(batch) => {
                    self.emit(FetchEvent::SegmentDone {
                        part_index: target.part_index,
                        segment: index,
                        records: batch.len(),
                    });
                    batches.push(batch);
                }
                Err(error) => {
                    self.emit(FetchEvent::SegmentFailed {
                        part_index: target.part_index,
                        segment: index,
                    });
                    failures.push(SegmentFailure { index, error });
                }
            }
        }

        batches.sort_by_key(|b| b.index);
        failures.sort_by_key(|f| f.index);

        if let Some(pos) = failures.iter().position(|f| f.index == 1) {
            let first = failures.swap_remove(pos);
            return Err(first.error);
        }

        let fetch = TargetFetch {
            target: target.clone(),
            planned,
            batches,
            failures,
        };
        if let Some(summary) = fetch.failure_summary() {
            warn!(cid = target.cid, "{summary}, comments truncated");
        }
        Ok(fetch)
    }

    /// Fetch every target, keeping the input order in the output.
    pub async fn fetch_all(&self, targets: &[MediaTarget]) -> Vec<Result<TargetFetch>> {
        futures::future::join_all(targets.iter().map(|t| self.fetch(t))).await
    }

    async fn fetch_segment(&self, target: &MediaTarget, index: u32) -> Result<SegmentBatch> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| ApiError::Other("segment semaphore closed".to_string()))?;

        let mut params = vec![("type", "1".to_string()), ("oid", target.cid.to_string())];
        if let Some(aid) = target.aid {
            params.push(("pid", aid.to_string()));
        }
        params.push(("segment_index", index.to_string()));

        let signed = match self
            .signer
            .sign(self.transport.as_ref(), params.clone())
            .await
        {
            Ok(query) => {
                debug!(segment = index, query = %query, "Signed segment request");
                self.try_endpoint(&format!("{WBI_SEGMENT_URL}?{query}"))
                    .await
            }
            Err(e) => Err(e),
        };

        let records = match signed {
            Ok(records) => records,
            Err(e) => {
                // Risk control answers 200 with a JSON body, so a payload that
                // does not decode also falls through.
                debug!(
                    cid = target.cid,
                    segment = index,
                    error = %e,
                    "Signed request failed, trying legacy endpoint"
                );
                let url = format!("{LEGACY_SEGMENT_URL}?{}", build_query(&params));
                self.try_endpoint(&url).await?
            }
        };
        debug!(
            cid = target.cid,
            segment = index,
            records = records.len(),
            "Segment decoded"
        );
        Ok(SegmentBatch::new(index, records))
    }

    /// One request plus decode; either failing fails the attempt.
    async fn try_endpoint(&self, url: &str) -> Result<Vec<CommentRecord>> {
        let body = self.transport.get(url).await?;
        Ok(decode_segment(&body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeTransport, nav_json};
    use danmaku::testing::{encode_segment, record};

    fn target(duration_secs: u64) -> MediaTarget {
        MediaTarget {
            aid: Some(7),
            cid: 70,
            part_index: 0,
            duration_secs,
            title: "t".to_string(),
        }
    }

    fn fetcher(fake: FakeTransport) -> (SegmentFetcher, Arc<FakeTransport>) {
        let fake = Arc::new(fake);
        (SegmentFetcher::new(fake.clone()), fake)
    }

    #[tokio::test]
    async fn test_segment_count_follows_duration_and_cap() {
        let fake = FakeTransport::new()
            .with_json("nav", nav_json())
            .with_body("seg.so", encode_segment(&[record(1, 10, "a")]));
        let (fetcher, fake) = fetcher(fake);

        let fetch = fetcher.fetch(&target(13 * 60)).await.unwrap();
        assert_eq!(fetch.planned, 3);
        assert_eq!(fake.count("seg.so"), 3);

        let fetcher = fetcher.with_max_segments(2);
        let fetch = fetcher.fetch(&target(60 * 60)).await.unwrap();
        assert_eq!(fetch.planned, 2);
        let indices: Vec<_> = fetch.batches.iter().map(|b| b.index).collect();
        assert_eq!(indices, [1, 2]);
    }

    #[tokio::test]
    async fn test_signed_request_carries_parameters() {
        let fake = FakeTransport::new()
            .with_json("nav", nav_json())
            .with_body("seg.so", Vec::new());
        let (fetcher, fake) = fetcher(fake);

        let fetch = fetcher.fetch(&target(0)).await.unwrap();
        assert_eq!(fetch.planned, 1);
        assert_eq!(fetch.received(), 0);

        let url = fake
            .calls()
            .into_iter()
            .find(|u| u.starts_with(WBI_SEGMENT_URL))
            .unwrap();
        assert!(url.contains("oid=70&pid=7&segment_index=1&type=1&wts="));
        assert!(url.contains("&w_rid="));
    }

    #[tokio::test]
    async fn test_falls_back_to_legacy_endpoint() {
        let fake = FakeTransport::new()
            .with_json("nav", nav_json())
            .with_status("wbi/web/seg.so", 412)
            .with_body("web/seg.so", encode_segment(&[record(5, 100, "legacy")]));
        let (fetcher, fake) = fetcher(fake);

        let fetch = fetcher.fetch(&target(60)).await.unwrap();
        assert_eq!(fetch.batches[0].records[0].text, "legacy");
        assert!(
            fake.calls()
                .iter()
                .any(|u| u == &format!("{LEGACY_SEGMENT_URL}?type=1&oid=70&pid=7&segment_index=1"))
        );
    }

    #[tokio::test]
    async fn test_undecodable_signed_reply_falls_back_to_legacy() {
        let fake = FakeTransport::new()
            .with_json("nav", nav_json())
            .with_json(
                "wbi/web/seg.so",
                serde_json::json!({"code": -352, "message": "风控校验失败"}),
            )
            .with_body("web/seg.so", encode_segment(&[record(9, 100, "legacy")]));
        let (fetcher, fake) = fetcher(fake);

        let fetch = fetcher.fetch(&target(60)).await.unwrap();
        assert_eq!(fake.count(LEGACY_SEGMENT_URL), 1);
        assert!(fetch.failures.is_empty());
        assert_eq!(fetch.batches[0].records[0].text, "legacy");
    }

    #[tokio::test]
    async fn test_undecodable_on_both_endpoints_fails_segment() {
        let fake = FakeTransport::new()
            .with_json("nav", nav_json())
            .with_body("seg.so", b"{}".to_vec());
        let (fetcher, fake) = fetcher(fake);

        let err = fetcher.fetch(&target(60)).await.unwrap_err();
        assert!(matches!(err, ApiError::Decode(_)));
        assert_eq!(fake.count(LEGACY_SEGMENT_URL), 1);
    }

    #[tokio::test]
    async fn test_first_segment_failure_is_fatal() {
        let fake = FakeTransport::new()
            .with_json("nav", nav_json())
            .with_status("segment_index=1", 500)
            .with_body("seg.so", Vec::new());
        let (fetcher, _) = fetcher(fake);

        let err = fetcher.fetch(&target(20 * 60)).await.unwrap_err();
        assert!(matches!(err, ApiError::Status { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_later_failures_are_reported() {
        let fake = FakeTransport::new()
            .with_json("nav", nav_json())
            .with_status("segment_index=2", 500)
            .with_body("segment_index=3", vec![0x0A, 0x05, 0x08])
            .with_body("seg.so", encode_segment(&[record(1, 10, "a")]));
        let (fetcher, _) = fetcher(fake);

        let fetch = fetcher.fetch(&target(30 * 60)).await.unwrap();
        assert_eq!(fetch.planned, 5);
        let failed: Vec<_> = fetch.failures.iter().map(|f| f.index).collect();
        assert_eq!(failed, [2, 3]);
        assert!(matches!(fetch.failures[1].error, ApiError::Decode(_)));
        assert_eq!(
            fetch.failure_summary().as_deref(),
            Some("segments 2,3 of 5 failed")
        );
        assert_eq!(fetch.batches.len(), 3);
    }

    #[tokio::test]
    async fn test_events_are_emitted() {
        let fake = FakeTransport::new()
            .with_json("nav", nav_json())
            .with_body("seg.so", encode_segment(&[record(1, 10, "a"), record(2, 20, "b")]));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let fake = Arc::new(fake);
        let fetcher = SegmentFetcher::new(fake).with_events(tx);

        fetcher.fetch(&target(60)).await.unwrap();
        drop(fetcher);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert_eq!(
            events,
            vec![
                FetchEvent::Planned { part_index: 0, segments: 1 },
                FetchEvent::SegmentDone { part_index: 0, segment: 1, records: 2 },
            ]
        );
    }

    #[tokio::test]
    async fn test_concurrency_is_clamped() {
        let (fetcher, _) = fetcher(FakeTransport::new());
        let fetcher = fetcher.with_concurrency(usize::MAX);
        assert_eq!(fetcher.permits.available_permits(), Semaphore::MAX_PERMITS);
        let fetcher = fetcher.with_concurrency(0);
        assert_eq!(fetcher.permits.available_permits(), 1);
    }

    #[tokio::test]
    async fn test_fetch_all_keeps_target_order() {
        let fake = FakeTransport::new()
            .with_json("nav", nav_json())
            .with_body("oid=2&", encode_segment(&[record(20, 1, "second")]))
            .with_body("oid=1&", encode_segment(&[record(10, 1, "first")]));
        let (fetcher, _) = fetcher(fake);
        let fetcher = fetcher.with_concurrency(1);

        let targets: Vec<_> = [1u64, 2]
            .into_iter()
            .enumerate()
            .map(|(i, cid)| MediaTarget {
                aid: None,
                cid,
                part_index: i,
                duration_secs: 60,
                title: String::new(),
            })
            .collect();
        let results = fetcher.fetch_all(&targets).await;
        let texts: Vec<_> = results
            .iter()
            .map(|r| r.as_ref().unwrap().batches[0].records[0].text.clone())
            .collect();
        assert_eq!(texts, ["first", "second"]);
    }
}
