//! Resource resolution: identifier → ordered list of parts to fetch.
//!
//! Every scheme has its own lookup; the returned targets keep the order in
//! which the upstream catalog lists them. Any failed lookup aborts the whole
//! resolution, and an empty catalog is reported as [`ApiError::NotFound`].

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::client::{HttpTransport, build_query, get_json};
use crate::error::{ApiError, Result};
use crate::models::{ApiResponse, Episode, MediaReview, SeasonView, VideoView};
use crate::resource::{ResourceIdentifier, bv2av};

const VIEW_URL: &str = "https://api.bilibili.com/x/web-interface/view";
const SEASON_URL: &str = "https://api.bilibili.com/pgc/view/web/season";
const REVIEW_URL: &str = "https://api.bilibili.com/pgc/review/user";

/// One part (video page or episode) whose danmaku are fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaTarget {
    /// Video id, when the catalog provides it
    pub aid: Option<u64>,
    /// Part id, the `oid` of segment requests
    pub cid: u64,
    /// 0-based position in the resolved list
    pub part_index: usize,
    pub duration_secs: u64,
    pub title: String,
}

impl MediaTarget {
    /// `M:SS`
    pub fn duration_label(&self) -> String {
        format!("{}:{:02}", self.duration_secs / 60, self.duration_secs % 60)
    }
}

impl fmt::Display for MediaTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{} {} (cid {})", self.part_index + 1, self.title, self.cid)
    }
}

pub struct Resolver {
    transport: Arc<dyn HttpTransport>,
}

impl Resolver {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }

    /// Resolve `id`; failures carry the identifier in their message.
    pub async fn resolve(&self, id: &ResourceIdentifier) -> Result<Vec<MediaTarget>> {
        let targets = self.lookup_targets(id).await.map_err(|e| e.resolving(id))?;
        if targets.is_empty() {
            return Err(ApiError::NotFound(format!("{id} has no playable parts")));
        }
        info!(id = %id, parts = targets.len(), "Resolved identifier");
        Ok(targets)
    }

    async fn lookup_targets(&self, id: &ResourceIdentifier) -> Result<Vec<MediaTarget>> {
        match id {
            ResourceIdentifier::Avid(aid) => self.resolve_video("aid", aid.to_string()).await,
            ResourceIdentifier::Bvid(bvid) => {
                // Fail early on identifiers that cannot exist.
                bv2av(bvid)?;
                self.resolve_video("bvid", bvid.clone()).await
            }
            ResourceIdentifier::Epid(ep_id) => self.resolve_episode(*ep_id).await,
            ResourceIdentifier::Ssid(season_id) => self.resolve_season(*season_id).await,
            ResourceIdentifier::Mdid(media_id) => self.resolve_media(*media_id).await,
        }
    }

    async fn lookup<T>(&self, base: &str, params: &[(&str, String)]) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let url = format!("{base}?{}", build_query(params));
        let response: ApiResponse<T> = get_json(self.transport.as_ref(), &url).await?;
        response.into_data()
    }

    async fn resolve_video(&self, key: &str, value: String) -> Result<Vec<MediaTarget>> {
        let view: VideoView = self.lookup(VIEW_URL, &[(key, value)]).await?;
        debug!(aid = view.aid, bvid = %view.bvid, pages = view.pages.len(), "Video view");

        let single = view.pages.len() == 1;
        Ok(view
            .pages
            .into_iter()
            .enumerate()
            .map(|(part_index, page)| MediaTarget {
                aid: Some(view.aid),
                cid: page.cid,
                part_index,
                duration_secs: page.duration,
                title: if single || page.part.is_empty() {
                    view.title.clone()
                } else {
                    page.part
                },
            })
            .collect())
    }

    async fn resolve_episode(&self, ep_id: u64) -> Result<Vec<MediaTarget>> {
        let season: SeasonView = self.lookup(SEASON_URL, &[("ep_id", ep_id.to_string())]).await?;
        let episode = season
            .all_episodes()
            .find(|e| e.episode_id() == ep_id)
            .ok_or_else(|| ApiError::NotFound(format!("ep{ep_id} not in its season")))?;
        Ok(vec![episode_target(episode, 0)])
    }

    async fn resolve_season(&self, season_id: u64) -> Result<Vec<MediaTarget>> {
        let season: SeasonView = self
            .lookup(SEASON_URL, &[("season_id", season_id.to_string())])
            .await?;
        debug!(season_id, title = %season.title, "Season view");

        let mut seen = HashSet::new();
        Ok(season
            .all_episodes()
            .filter(|e| seen.insert(e.cid))
            .enumerate()
            .map(|(index, episode)| episode_target(episode, index))
            .collect())
    }

    async fn resolve_media(&self, media_id: u64) -> Result<Vec<MediaTarget>> {
        let review: MediaReview = self
            .lookup(REVIEW_URL, &[("media_id", media_id.to_string())])
            .await?;
        debug!(media_id, season_id = review.media.season_id, "Media review");
        self.resolve_season(review.media.season_id).await
    }
}

fn episode_target(episode: Episode, part_index: usize) -> MediaTarget {
    MediaTarget {
        aid: (episode.aid != 0).then_some(episode.aid),
        cid: episode.cid,
        part_index,
        duration_secs: episode.duration / 1000,
        title: episode.display_title(),
    }
}
