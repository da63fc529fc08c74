use md5::Digest;
use serde::Deserialize;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tracing::debug;

use crate::client::{HttpTransport, get_json};
use crate::error::{ApiError, Result};

const NAV_URL: &str = "https://api.bilibili.com/x/web-interface/nav";

const CACHE_EXPIRATION: Duration = Duration::from_secs(2 * 60 * 60); // 2 hours

const MIXIN_KEY_ENC_TAB: [usize; 64] = [
    46, 47, 18, 2, 53, 8, 23, 32, 15, 50, 10, 31, 58, 3, 45, 35, 27, 43, 5, 49, 33, 9, 42, 19, 29,
    28, 14, 39, 12, 38, 41, 13, 37, 48, 7, 16, 24, 55, 40, 61, 26, 17, 0, 1, 60, 51, 30, 4, 22, 25,
    54, 21, 56, 59, 6, 63, 57, 62, 11, 36, 20, 34, 44, 52,
];

#[derive(Clone, Debug)]
pub struct WbiKeys {
    img_key: String,
    sub_key: String,
    timestamp: Instant,
}

impl WbiKeys {
    fn new(img_key: String, sub_key: String) -> Self {
        Self {
            img_key,
            sub_key,
            timestamp: Instant::now(),
        }
    }

    fn is_stale(&self) -> bool {
        self.timestamp.elapsed() > CACHE_EXPIRATION
    }
}

#[derive(Deserialize)]
struct WbiImg {
    img_url: String,
    sub_url: String,
}

#[derive(Deserialize)]
struct Data {
    wbi_img: WbiImg,
}

// `code` is -101 for anonymous sessions but `wbi_img` is still present.
#[derive(Deserialize)]
struct ResWbi {
    data: Option<Data>,
}

// 对 imgKey 和 subKey 进行字符顺序打乱编码
fn get_mixin_key(orig: &[u8]) -> String {
    MIXIN_KEY_ENC_TAB
        .iter()
        .take(32)
        .filter_map(|&i| orig.get(i).map(|&b| b as char))
        .collect::<String>()
}

pub(crate) fn get_url_encoded(s: &str) -> String {
    let mut encoded = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            // Unreserved characters that do not need to be encoded.
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' | '~' => {
                encoded.push(c);
            }
            // Characters that are explicitly filtered out and not included in the output.
            '!' | '\'' | '(' | ')' | '*' => {}
            // All other characters are percent-encoded.
            _ => {
                let mut buf = [0; 4];
                for b in c.encode_utf8(&mut buf).bytes() {
                    encoded.push_str(&format!("%{b:02X}"));
                }
            }
        }
    }
    encoded
}

// 为请求参数进行 wbi 签名
pub(crate) fn encode_wbi(params: Vec<(&str, String)>, keys: &WbiKeys) -> Result<String> {
    let cur_time = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| ApiError::Other("SystemTime before UNIX EPOCH!".to_string()))?
        .as_secs();
    Ok(_encode_wbi(
        params,
        (&keys.img_key, &keys.sub_key),
        cur_time,
    ))
}

fn _encode_wbi(
    mut params: Vec<(&str, String)>,
    (img_key, sub_key): (&str, &str),
    timestamp: u64,
) -> String {
    let mixin_key = get_mixin_key((img_key.to_owned() + sub_key).as_bytes());
    // 添加当前时间戳
    params.push(("wts", timestamp.to_string()));
    // 重新排序
    params.sort_by(|a, b| a.0.cmp(b.0));
    // 拼接参数
    let query = params
        .iter()
        .map(|(k, v)| format!("{}={}", get_url_encoded(k), get_url_encoded(v)))
        .collect::<Vec<_>>()
        .join("&");
    // 计算签名
    let mut hasher = md5::Md5::new();
    hasher.update(query.clone() + &mixin_key);
    let md5_hash = hasher.finalize();
    let web_sign = format!("{md5_hash:x}");
    // 返回最终的 query
    query + &format!("&w_rid={web_sign}")
}

fn take_filename(url: &str) -> Option<String> {
    url.rsplit_once('/')
        .and_then(|(_, s)| s.rsplit_once('.'))
        .map(|(s, _)| s.to_string())
}

async fn fetch_new_keys(transport: &dyn HttpTransport) -> Result<WbiKeys> {
    let res: ResWbi = get_json(transport, NAV_URL).await?;
    let wbi_img = res
        .data
        .ok_or_else(|| ApiError::Other("nav response carries no wbi_img".to_string()))?
        .wbi_img;

    let img_key = take_filename(&wbi_img.img_url)
        .ok_or_else(|| ApiError::Other(format!("bad img_url: {}", wbi_img.img_url)))?;
    let sub_key = take_filename(&wbi_img.sub_url)
        .ok_or_else(|| ApiError::Other(format!("bad sub_url: {}", wbi_img.sub_url)))?;

    Ok(WbiKeys::new(img_key, sub_key))
}

/// Signs query parameters, caching the key pair for two hours.
#[derive(Debug, Default)]
pub struct WbiSigner {
    keys: Mutex<Option<WbiKeys>>,
}

impl WbiSigner {
    pub fn new() -> Self {
        Self::default()
    }

    async fn keys(&self, transport: &dyn HttpTransport) -> Result<WbiKeys> {
        // Held across the fetch: concurrent callers wait on one refresh.
        let mut cached = self.keys.lock().await;
        if let Some(keys) = cached.as_ref().filter(|k| !k.is_stale()) {
            return Ok(keys.clone());
        }

        debug!("Refreshing WBI keys");
        let keys = fetch_new_keys(transport).await?;
        *cached = Some(keys.clone());
        Ok(keys)
    }

    /// Return the signed query string (`...&wts=..&w_rid=..`) for `params`.
    pub async fn sign(
        &self,
        transport: &dyn HttpTransport,
        params: Vec<(&str, String)>,
    ) -> Result<String> {
        let keys = self.keys(transport).await?;
        encode_wbi(params, &keys)
    }
}

// 取自文档描述的测试用例
#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NavOnly {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl HttpTransport for NavOnly {
        async fn get(&self, url: &str) -> Result<Bytes> {
            assert_eq!(url, NAV_URL);
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Bytes::from_static(
                br#"{"code":-101,"message":"not logged in","data":{"isLogin":false,"wbi_img":{"img_url":"https://i0.hdslb.com/bfs/wbi/7cd084941338484aae1ad9425b84077c.png","sub_url":"https://i0.hdslb.com/bfs/wbi/4932caff0ff746eab6f01bf08b70ac45.png"}}}"#,
            ))
        }
    }

    #[test]
    fn test_get_filename() {
        assert_eq!(
            take_filename("https://i0.hdslb.com/bfs/wbi/7cd084941338484aae1ad9425b84077c.png"),
            Some("7cd084941338484aae1ad9425b84077c".to_string())
        );
        assert_eq!(take_filename("no-slash"), None);
    }

    #[test]
    fn test_get_mixin_key() {
        let concat_key =
            "7cd084941338484aae1ad9425b84077c".to_string() + "4932caff0ff746eab6f01bf08b70ac45";
        assert_eq!(
            get_mixin_key(concat_key.as_bytes()),
            "ea1db124af3c7062474693fa704f4ff8"
        );
    }

    #[test]
    fn test_encode_wbi() {
        let params = vec![
            ("foo", String::from("114")),
            ("bar", String::from("514")),
            ("zab", String::from("1919810")),
        ];
        let keys = (
            "7cd084941338484aae1ad9425b84077c",
            "4932caff0ff746eab6f01bf08b70ac45",
        );
        assert_eq!(
            _encode_wbi(params, keys, 1702204169),
            "bar=514&foo=114&wts=1702204169&zab=1919810&w_rid=8f6f2b5b3d485fe1886cec6a0be8c5d4"
                .to_string()
        )
    }

    #[test]
    fn test_url_encoding_filters_reserved() {
        assert_eq!(get_url_encoded("a!b'c(d)e*f"), "abcdef");
        assert_eq!(get_url_encoded("弹"), "%E5%BC%B9");
    }

    #[tokio::test]
    async fn test_signer_caches_keys() {
        let transport = NavOnly {
            calls: AtomicUsize::new(0),
        };
        let signer = WbiSigner::new();

        let first = signer
            .sign(&transport, vec![("oid", "1".to_string())])
            .await
            .unwrap();
        let second = signer
            .sign(&transport, vec![("oid", "2".to_string())])
            .await
            .unwrap();

        assert!(first.starts_with("oid=1&wts="));
        assert!(first.contains("&w_rid="));
        assert!(second.starts_with("oid=2&wts="));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }
}
