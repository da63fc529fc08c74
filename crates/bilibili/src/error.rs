use thiserror::Error;

/// Result alias for API operations.
pub type Result<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("upstream error {code}: {message}")]
    Upstream { code: i64, message: String },
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status} for {url}")]
    Status { status: u16, url: String },
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("decode error: {0}")]
    Decode(#[from] danmaku::DanmakuError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("tls error: {0}")]
    Tls(#[from] rustls::Error),
    #[error("cannot resolve {id}: {source}")]
    Resolve {
        id: String,
        #[source]
        source: Box<ApiError>,
    },
    #[error("{id} {part}: {source}")]
    Part {
        id: String,
        part: String,
        #[source]
        source: Box<ApiError>,
    },
    #[error("{0}")]
    Other(String),
}

/// API codes that mean the requested resource does not exist.
const NOT_FOUND_CODES: [i64; 4] = [-404, -400, 62002, 62004];

impl ApiError {
    /// Map a non-zero API `code` to an error.
    pub fn from_code(code: i64, message: impl Into<String>) -> Self {
        let message = message.into();
        if NOT_FOUND_CODES.contains(&code) {
            Self::NotFound(message)
        } else {
            Self::Upstream { code, message }
        }
    }

    /// Failures of the transport itself, as opposed to lookups or payloads.
    pub fn is_fetch_error(&self) -> bool {
        matches!(self.root(), Self::Http(_) | Self::Status { .. })
    }

    /// Attach the identifier whose lookup failed.
    pub fn resolving(self, id: impl ToString) -> Self {
        Self::Resolve {
            id: id.to_string(),
            source: Box::new(self),
        }
    }

    /// Attach the identifier and part whose download failed.
    pub fn in_part(self, id: impl ToString, part: impl ToString) -> Self {
        Self::Part {
            id: id.to_string(),
            part: part.to_string(),
            source: Box::new(self),
        }
    }

    /// The innermost error, past any identifier or part context.
    pub fn root(&self) -> &ApiError {
        match self {
            Self::Resolve { source, .. } | Self::Part { source, .. } => source.root(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_names_identifier_and_part() {
        let err = ApiError::from_code(-404, "啥都木有").resolving("av42");
        assert_eq!(err.to_string(), "cannot resolve av42: not found: 啥都木有");
        assert!(matches!(err.root(), ApiError::NotFound(_)));

        let err = ApiError::Status {
            status: 502,
            url: "https://api.bilibili.com/x/v2/dm/web/seg.so".to_string(),
        }
        .in_part("av42", "P1 Video (cid 7)");
        assert!(err.to_string().starts_with("av42 P1 Video (cid 7): unexpected status 502"));
        assert!(err.is_fetch_error());
    }
}
