//! Shared HTTP plumbing for the concrete adapters: client construction and
//! the mapping from transport/status failures onto [`SourceError`].

use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;

use crate::error::SourceError;

pub fn client() -> Result<reqwest::Client, SourceError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(20))
        .user_agent(concat!("rove/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| SourceError::Transient(format!("failed to build HTTP client: {e}")))
}

pub fn transport(err: reqwest::Error) -> SourceError {
    if err.is_decode() {
        SourceError::Malformed(err.to_string())
    } else {
        SourceError::Transient(err.to_string())
    }
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Map a non-success status to the error taxonomy.
pub fn classify_status(status: StatusCode, headers: &HeaderMap, what: &str) -> SourceError {
    let exhausted = headers
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim() == "0")
        .unwrap_or(false);
    match status {
        StatusCode::TOO_MANY_REQUESTS => SourceError::RateLimited {
            retry_after: retry_after(headers),
        },
        StatusCode::FORBIDDEN if exhausted => SourceError::RateLimited {
            retry_after: retry_after(headers),
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SourceError::AuthInvalid,
        StatusCode::NOT_FOUND | StatusCode::GONE => SourceError::NotFound(what.to_string()),
        s if s.is_server_error() || s == StatusCode::REQUEST_TIMEOUT => {
            SourceError::Transient(format!("{what}: HTTP {s}"))
        }
        s => SourceError::Malformed(format!("{what}: HTTP {s}")),
    }
}

/// Check the status and decode the JSON body.
pub async fn json<T: DeserializeOwned>(resp: Response, what: &str) -> Result<T, SourceError> {
    let status = resp.status();
    if !status.is_success() {
        return Err(classify_status(status, resp.headers(), what));
    }
    let text = resp.text().await.map_err(transport)?;
    serde_json::from_str(&text).map_err(|e| SourceError::Malformed(format!("{what}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_status_mapping() {
        let empty = HeaderMap::new();
        assert_eq!(
            classify_status(StatusCode::UNAUTHORIZED, &empty, "x"),
            SourceError::AuthInvalid
        );
        assert_eq!(
            classify_status(StatusCode::NOT_FOUND, &empty, "T-1"),
            SourceError::NotFound("T-1".into())
        );
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, &empty, "x"),
            SourceError::Transient(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::UNPROCESSABLE_ENTITY, &empty, "x"),
            SourceError::Malformed(_)
        ));
    }

    #[test]
    fn test_rate_limit_hint() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("12"));
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, &headers, "x"),
            SourceError::RateLimited {
                retry_after: Some(Duration::from_secs(12))
            }
        );

        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
        assert_eq!(
            classify_status(StatusCode::FORBIDDEN, &headers, "x"),
            SourceError::RateLimited { retry_after: None }
        );
    }
}
