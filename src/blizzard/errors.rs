//! Error types for the Blizzard API client.

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Non-2xx response that isn't a 404 or 429.
    #[error("request to {url} failed with status {status}")]
    Transport {
        status: u16,
        url: String,
        body: String,
    },
    /// Two consecutive 429s on the same request.
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    /// 404. Profile endpoints return this for characters that transferred,
    /// renamed, or have privacy settings enabled.
    #[error("resource not found: {url}")]
    NotFound { url: String },
    #[error("failed to decode response from {url}")]
    Decode {
        url: String,
        #[source]
        source: anyhow::Error,
    },
    #[error(transparent)]
    Request(#[from] reqwest::Error),
}

impl ApiError {
    /// Whether a retry at the job layer is worthwhile.
    ///
    /// Not-found and decode failures won't heal on their own; transport
    /// errors and rate limits will.
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Transport { .. } | ApiError::RateLimited { .. } | ApiError::Request(_) => {
                true
            }
            ApiError::NotFound { .. } | ApiError::Decode { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transience_classification() {
        let transport = ApiError::Transport {
            status: 502,
            url: "https://us.api.blizzard.com/x".into(),
            body: String::new(),
        };
        let limited = ApiError::RateLimited { retry_after_secs: 3 };
        let missing = ApiError::NotFound {
            url: "https://us.api.blizzard.com/x".into(),
        };
        let decode = ApiError::Decode {
            url: "https://us.api.blizzard.com/x".into(),
            source: anyhow::anyhow!("bad json"),
        };

        assert!(transport.is_transient());
        assert!(limited.is_transient());
        assert!(!missing.is_transient());
        assert!(!decode.is_transient());
    }
}
