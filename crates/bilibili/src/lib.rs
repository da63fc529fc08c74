//! Bilibili side of the danmaku downloader.
//!
//! Parses the five identifier schemes, resolves them to video parts and
//! fetches their danmaku segments. Decoding, merging and export live in the
//! network-free [`danmaku`] crate.
//!
//! ```no_run
//! use std::sync::Arc;
//! use bilibili_api::{BiliClient, Downloader, ResourceIdentifier, default_client, DEFAULT_TIMEOUT};
//! use danmaku::ExportFormat;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let client = BiliClient::new(default_client(DEFAULT_TIMEOUT)?);
//! let downloader = Downloader::new(Arc::new(client)).with_max_segments(10);
//! let id: ResourceIdentifier = "BV17x411w7KC".parse()?;
//! let report = downloader.download(&id, ExportFormat::Xml).await?;
//! std::fs::write(report.document.file_name(), report.render()?)?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod cookie;
pub mod downloader;
pub mod error;
pub mod models;
pub mod resolver;
pub mod resource;
pub mod segment;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;
pub mod wbi;

pub use client::{BiliClient, DEFAULT_TIMEOUT, DEFAULT_UA, HttpTransport, default_client};
pub use cookie::load_cookie_file;
pub use downloader::{DownloadReport, Downloader, PartOutcome, PartReport};
pub use error::{ApiError, Result};
pub use resolver::{MediaTarget, Resolver};
pub use resource::{ResourceIdentifier, av2bv, bv2av};
pub use segment::{FetchEvent, SegmentFailure, SegmentFetcher, TargetFetch};
