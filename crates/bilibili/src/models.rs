use serde::Deserialize;

use crate::error::{ApiError, Result};

/// Common envelope. The `x/` endpoints put the payload under `data`, the
/// `pgc/` endpoints under `result`.
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(alias = "result")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    /// Unwrap the payload, mapping a non-zero `code` to an error.
    pub fn into_data(self) -> Result<T> {
        if self.code != 0 {
            return Err(ApiError::from_code(self.code, self.message));
        }
        self.data
            .ok_or_else(|| ApiError::NotFound("response carries no payload".to_string()))
    }
}

/// `x/web-interface/view`
#[derive(Debug, Deserialize)]
pub struct VideoView {
    pub aid: u64,
    #[serde(default)]
    pub bvid: String,
    #[serde(default)]
    pub title: String,
    /// Total duration in seconds
    #[serde(default)]
    pub duration: u64,
    #[serde(default)]
    pub pages: Vec<VideoPage>,
}

#[derive(Debug, Deserialize)]
pub struct VideoPage {
    pub cid: u64,
    /// 1-based
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub part: String,
    /// Seconds
    #[serde(default)]
    pub duration: u64,
}

/// `pgc/view/web/season`
#[derive(Debug, Deserialize)]
pub struct SeasonView {
    #[serde(default)]
    pub season_id: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub episodes: Vec<Episode>,
    #[serde(default)]
    pub section: Vec<Section>,
}

impl SeasonView {
    /// Main episodes followed by every section's episodes, in catalog order.
    pub fn all_episodes(self) -> impl Iterator<Item = Episode> {
        self.episodes
            .into_iter()
            .chain(self.section.into_iter().flat_map(|s| s.episodes))
    }
}

#[derive(Debug, Deserialize)]
pub struct Section {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub episodes: Vec<Episode>,
}

#[derive(Debug, Deserialize)]
pub struct Episode {
    /// Episode id (the number behind `ep`)
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub ep_id: u64,
    #[serde(default)]
    pub aid: u64,
    pub cid: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub long_title: String,
    /// Milliseconds
    #[serde(default)]
    pub duration: u64,
}

impl Episode {
    /// Some payloads only fill `ep_id`.
    pub fn episode_id(&self) -> u64 {
        if self.id != 0 { self.id } else { self.ep_id }
    }

    pub fn display_title(&self) -> String {
        match (self.title.is_empty(), self.long_title.is_empty()) {
            (false, false) => format!("{} {}", self.title, self.long_title),
            (true, false) => self.long_title.clone(),
            _ => self.title.clone(),
        }
    }
}

/// `pgc/review/user`
#[derive(Debug, Deserialize)]
pub struct MediaReview {
    pub media: MediaInfo,
}

#[derive(Debug, Deserialize)]
pub struct MediaInfo {
    pub season_id: u64,
    #[serde(default)]
    pub title: String,
}
