//! HTTP plumbing shared by the resolver and the segment fetcher.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use reqwest::header::{
    ACCEPT, ACCEPT_LANGUAGE, COOKIE, HeaderMap, HeaderName, HeaderValue, REFERER, USER_AGENT,
};
use rustls::ClientConfig;
use rustls_platform_verifier::BuilderVerifierExt;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::error::{ApiError, Result};
use crate::wbi::get_url_encoded;

pub const DEFAULT_UA: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/136.0.0.0 Safari/537.36 Edg/136.0.0.0";

pub const BASE_URL: &str = "https://www.bilibili.com";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// The network collaborator: issues a GET and returns the raw body.
///
/// Implementations attach whatever headers (cookie included) they were
/// configured with and fail on non-2xx statuses.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(&self, url: &str) -> Result<Bytes>;
}

/// Build a reqwest client with the platform certificate verifier.
pub fn default_client(timeout: Duration) -> Result<Client> {
    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let tls_config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_platform_verifier()?
        .with_no_client_auth();

    Ok(Client::builder()
        .use_preconfigured_tls(tls_config)
        .timeout(timeout)
        .gzip(true)
        .build()?)
}

/// [`HttpTransport`] backed by reqwest, sending browser-like headers.
#[derive(Debug, Clone)]
pub struct BiliClient {
    client: Client,
    headers: HeaderMap,
}

impl BiliClient {
    pub fn new(client: Client) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_UA));
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static("zh-CN,zh;q=0.9,en-US;q=0.8,en;q=0.7"),
        );
        headers.insert(REFERER, HeaderValue::from_static(BASE_URL));
        Self { client, headers }
    }

    /// Set a header, replacing any previous value.
    pub fn add_header(&mut self, key: &str, value: &str) -> Result<()> {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|e| ApiError::Other(format!("invalid header name {key}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| ApiError::Other(format!("invalid value for header {key}: {e}")))?;
        self.headers.insert(name, value);
        Ok(())
    }

    pub fn set_user_agent(&mut self, user_agent: &str) -> Result<()> {
        self.add_header(USER_AGENT.as_str(), user_agent)
    }

    /// Send `cookie` verbatim as the `Cookie` header on every request.
    pub fn set_cookie(&mut self, cookie: &str) -> Result<()> {
        let mut value = HeaderValue::from_str(cookie).map_err(|_| {
            ApiError::Other("cookie contains characters not allowed in a header".to_string())
        })?;
        value.set_sensitive(true);
        self.headers.insert(COOKIE, value);
        Ok(())
    }

    pub fn has_cookie(&self) -> bool {
        self.headers.contains_key(COOKIE)
    }
}

#[async_trait]
impl HttpTransport for BiliClient {
    async fn get(&self, url: &str) -> Result<Bytes> {
        debug!(url, "GET");
        let response = self
            .client
            .get(url)
            .headers(self.headers.clone())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                url: strip_query(url).to_string(),
            });
        }

        Ok(response.bytes().await?)
    }
}

fn strip_query(url: &str) -> &str {
    url.split_once('?').map_or(url, |(path, _)| path)
}

/// Percent-encode `params` into a query string, keeping their order.
pub fn build_query(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", get_url_encoded(k), get_url_encoded(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Fetch `url` and deserialize the JSON body.
pub async fn get_json<T: DeserializeOwned>(transport: &dyn HttpTransport, url: &str) -> Result<T> {
    let body = transport.get(url).await?;
    Ok(serde_json::from_slice(&body)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_query() {
        let query = build_query(&[("season_id", "42".to_string()), ("q", "a b".to_string())]);
        assert_eq!(query, "season_id=42&q=a%20b");
    }

    #[test]
    fn test_strip_query() {
        assert_eq!(
            strip_query("https://api.bilibili.com/x/v2/dm/web/seg.so?oid=1"),
            "https://api.bilibili.com/x/v2/dm/web/seg.so"
        );
        assert_eq!(strip_query("https://example.com"), "https://example.com");
    }

    fn plain_client() -> Client {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
        Client::new()
    }

    #[test]
    fn test_cookie_header_is_set() {
        let mut client = BiliClient::new(plain_client());
        assert!(!client.has_cookie());
        client.set_cookie("SESSDATA=abc; bili_jct=def").unwrap();
        assert!(client.has_cookie());
        assert!(client.set_cookie("bad\ncookie").is_err());
    }

    #[tokio::test]
    #[ignore]
    async fn test_live_nav_request() {
        let client = BiliClient::new(default_client(DEFAULT_TIMEOUT).unwrap());
        let body = client
            .get("https://api.bilibili.com/x/web-interface/nav")
            .await;
        assert!(body.is_ok());
    }
}
