//! In-memory [`HttpTransport`] for tests, here and in downstream crates.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Mutex;

use crate::client::HttpTransport;
use crate::error::{ApiError, Result};

const NAV_PATH: &str = "x/web-interface/nav";

enum Reply {
    Body(Bytes),
    Status(u16),
}

/// Answers each request with the first route whose pattern the URL contains.
#[derive(Default)]
pub struct FakeTransport {
    routes: Vec<(String, Reply)>,
    calls: Mutex<Vec<String>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_body(mut self, pattern: &str, body: impl Into<Bytes>) -> Self {
        self.routes
            .push((pattern.to_string(), Reply::Body(body.into())));
        self
    }

    pub fn with_json(self, pattern: &str, value: serde_json::Value) -> Self {
        self.with_body(pattern, value.to_string())
    }

    /// Answer the WBI key lookup with [`nav_json`].
    pub fn with_nav(self) -> Self {
        self.with_json(NAV_PATH, nav_json())
    }

    pub fn with_status(mut self, pattern: &str, status: u16) -> Self {
        self.routes.push((pattern.to_string(), Reply::Status(status)));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn count(&self, pattern: &str) -> usize {
        self.calls().iter().filter(|u| u.contains(pattern)).count()
    }
}

#[async_trait]
impl HttpTransport for FakeTransport {
    async fn get(&self, url: &str) -> Result<Bytes> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(url.to_string());
        match self.routes.iter().find(|(p, _)| url.contains(p.as_str())) {
            Some((_, Reply::Body(body))) => Ok(body.clone()),
            Some((_, Reply::Status(status))) => Err(ApiError::Status {
                status: *status,
                url: url.to_string(),
            }),
            None => Err(ApiError::Status {
                status: 404,
                url: url.to_string(),
            }),
        }
    }
}

/// Canned `nav` reply carrying the documented WBI key pair.
pub fn nav_json() -> serde_json::Value {
    serde_json::json!({
        "code": -101,
        "message": "账号未登录",
        "data": {
            "isLogin": false,
            "wbi_img": {
                "img_url": "https://i0.hdslb.com/bfs/wbi/7cd084941338484aae1ad9425b84077c.png",
                "sub_url": "https://i0.hdslb.com/bfs/wbi/4932caff0ff746eab6f01bf08b70ac45.png"
            }
        }
    })
}
