//! Cookie file loading.
//!
//! The file is plain text. Lines starting with `#` and blank lines are
//! ignored; the remaining lines form the literal `Cookie` header value.

use std::io::ErrorKind;
use std::path::Path;
use tracing::debug;

use crate::error::Result;

/// Read a cookie file. A missing file or one without content yields `None`.
pub async fn load_cookie_file(path: impl AsRef<Path>) -> Result<Option<String>> {
    let path = path.as_ref();
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "No cookie file, requests stay anonymous");
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    };

    let cookie = parse_cookie_text(&text);
    if let Some(cookie) = &cookie {
        debug!(
            path = %path.display(),
            logged_in = extract_cookie_value(cookie, "SESSDATA").is_some(),
            "Loaded cookie file"
        );
    }
    Ok(cookie)
}

/// Strip comments and join the remaining lines with `; `.
pub fn parse_cookie_text(text: &str) -> Option<String> {
    let cookie = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| line.trim_end_matches(';'))
        .collect::<Vec<_>>()
        .join("; ");
    (!cookie.is_empty()).then_some(cookie)
}

/// Extract a specific cookie value from a cookie string.
///
/// # Example
/// ```
/// use bilibili_api::cookie::extract_cookie_value;
///
/// let cookies = "SESSDATA=abc123; bili_jct=xyz789";
/// assert_eq!(extract_cookie_value(cookies, "SESSDATA"), Some("abc123".to_string()));
/// ```
pub fn extract_cookie_value(cookies: &str, name: &str) -> Option<String> {
    cookies.split(';').find_map(|cookie| {
        let (key, value) = cookie.trim().split_once('=')?;
        (key == name).then(|| value.to_string())
    })
}
