//! End-to-end flow: resolve, fetch, aggregate and build the export document.

use danmaku::{CommentRecord, ExportDocument, ExportFormat, aggregate, concat_parts};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::client::HttpTransport;
use crate::error::{ApiError, Result};
use crate::resolver::{MediaTarget, Resolver};
use crate::resource::ResourceIdentifier;
use crate::segment::{FetchEvent, SegmentFetcher};

#[derive(Debug)]
pub enum PartOutcome {
    Fetched {
        /// Records kept after deduplication
        records: usize,
        /// Set when non-first segments failed
        truncated: Option<String>,
    },
    Failed(ApiError),
}

#[derive(Debug)]
pub struct PartReport {
    pub target: MediaTarget,
    pub outcome: PartOutcome,
}

impl PartReport {
    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, PartOutcome::Failed(_))
    }
}

/// Result of one download: the document to write plus per-part outcomes.
#[derive(Debug)]
pub struct DownloadReport {
    pub id: ResourceIdentifier,
    pub parts: Vec<PartReport>,
    pub document: ExportDocument,
}

impl DownloadReport {
    pub fn total_records(&self) -> usize {
        self.document.records.len()
    }

    pub fn failed_parts(&self) -> usize {
        self.parts.iter().filter(|p| p.is_failed()).count()
    }

    pub fn render(&self) -> danmaku::Result<Vec<u8>> {
        danmaku::export(&self.document, self.document.format)
    }
}

pub struct Downloader {
    resolver: Resolver,
    fetcher: SegmentFetcher,
}

impl Downloader {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            resolver: Resolver::new(transport.clone()),
            fetcher: SegmentFetcher::new(transport),
        }
    }

    pub fn with_max_segments(mut self, max_segments: u32) -> Self {
        self.fetcher = self.fetcher.with_max_segments(max_segments);
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.fetcher = self.fetcher.with_concurrency(concurrency);
        self
    }

    pub fn with_events(mut self, events: mpsc::UnboundedSender<FetchEvent>) -> Self {
        self.fetcher = self.fetcher.with_events(events);
        self
    }

    pub async fn resolve(&self, id: &ResourceIdentifier) -> Result<Vec<MediaTarget>> {
        self.resolver.resolve(id).await
    }

    pub async fn download(
        &self,
        id: &ResourceIdentifier,
        format: ExportFormat,
    ) -> Result<DownloadReport> {
        let targets = self.resolve(id).await?;
        self.fetch(id, targets, format).await
    }

    /// Fetch already-resolved targets.
    ///
    /// A part whose first segment fails is skipped and reported; the call
    /// fails only when no part succeeded.
    pub async fn fetch(
        &self,
        id: &ResourceIdentifier,
        targets: Vec<MediaTarget>,
        format: ExportFormat,
    ) -> Result<DownloadReport> {
        let results = self.fetcher.fetch_all(&targets).await;

        let mut parts = Vec::with_capacity(targets.len());
        let mut timelines: Vec<Vec<CommentRecord>> = Vec::with_capacity(targets.len());
        for (target, result) in targets.into_iter().zip(results) {
            match result {
                Ok(fetch) => {
                    let truncated = fetch.failure_summary();
                    let records = aggregate(fetch.batches);
                    parts.push(PartReport {
                        target,
                        outcome: PartOutcome::Fetched {
                            records: records.len(),
                            truncated,
                        },
                    });
                    timelines.push(records);
                }
                Err(error) => {
                    warn!(part = %target, error = %error, "Skipping part");
                    parts.push(PartReport {
                        target,
                        outcome: PartOutcome::Failed(error),
                    });
                }
            }
        }

        if timelines.is_empty() {
            return Err(all_failed(id, parts));
        }

        let mut document = ExportDocument::new(id.to_string(), format, concat_parts(timelines));
        if let [only] = parts.as_slice() {
            document = document.with_chat_id(only.target.cid);
        }

        info!(
            id = %id,
            parts = parts.len(),
            records = document.records.len(),
            "Download finished"
        );
        Ok(DownloadReport {
            id: id.clone(),
            parts,
            document,
        })
    }
}

fn all_failed(id: &ResourceIdentifier, mut parts: Vec<PartReport>) -> ApiError {
    if parts.len() == 1 {
        if let Some(PartReport {
            target,
            outcome: PartOutcome::Failed(error),
        }) = parts.pop()
        {
            return error.in_part(id, target);
        }
    }

    let reasons = parts
        .iter()
        .filter_map(|p| match &p.outcome {
            PartOutcome::Failed(e) => Some(format!("{}: {e}", p.target)),
            PartOutcome::Fetched { .. } => None,
        })
        .collect::<Vec<_>>()
        .join("; ");
    ApiError::Other(format!("{id}: all {} parts failed ({reasons})", parts.len()))
}
