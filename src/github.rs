//! GitHub REST access: the transport seam, the Octocrab-backed transport, and
//! the rate-limit aware client the fetch stages share.

use crate::error::FetchError;
use http::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use http::{StatusCode, Uri};
use octocrab::Octocrab;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_retry::strategy::ExponentialBackoff;
use tokio_retry::RetryIf;

/// Rate limit budget reported by the `x-ratelimit-*` response headers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct RateLimitInfo {
    /// Maximum requests allowed in the current window.
    pub limit: u32,
    /// Requests left in the current window.
    pub remaining: u32,
    /// Unix timestamp when the window resets.
    pub reset_at: u64,
}

impl RateLimitInfo {
    /// Returns `None` unless the response carries a remaining-budget header.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let read = |name: &str| -> Option<u64> {
            headers.get(name)?.to_str().ok()?.trim().parse().ok()
        };

        let remaining = read("x-ratelimit-remaining")?;
        Some(Self {
            limit: read("x-ratelimit-limit").map_or(0, saturating_u32),
            remaining: saturating_u32(remaining),
            reset_at: read("x-ratelimit-reset").unwrap_or(0),
        })
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }
}

fn saturating_u32(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

/// A raw response: status, body text and the rate limit headers.
#[derive(Clone, Debug)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: String,
    pub rate_limit: Option<RateLimitInfo>,
}

impl ApiResponse {
    /// 429 always; 403 only when the budget is spent or GitHub says so.
    pub fn is_rate_limited(&self) -> bool {
        match self.status {
            StatusCode::TOO_MANY_REQUESTS => true,
            StatusCode::FORBIDDEN => {
                self.rate_limit.is_some_and(|info| info.is_exhausted())
                    || self.body.to_lowercase().contains("rate limit")
            }
            _ => false,
        }
    }
}

/// Black-box request/response function over the GitHub REST API.
///
/// `path` is relative to the API root and includes the query string. A
/// transport only fails for requests that never produced a response; HTTP
/// error statuses are returned as regular responses.
pub trait GitHubTransport: Send + Sync {
    fn get(
        &self,
        path: &str,
        token: Option<&str>,
    ) -> impl Future<Output = Result<ApiResponse, FetchError>> + Send;
}

/// Transport backed by an unauthenticated Octocrab client. The token travels
/// per request so one client serves every caller.
#[derive(Clone)]
pub struct OctocrabTransport {
    octocrab: Octocrab,
}

impl OctocrabTransport {
    /// Builds the transport, optionally against a non-default API root
    /// (GitHub Enterprise, or a local mock server in tests).
    pub fn new(api_url: Option<&str>) -> anyhow::Result<Self> {
        let mut builder = Octocrab::builder();
        if let Some(api_url) = api_url {
            let base_uri: Uri = api_url.parse()?;
            builder = builder.base_uri(base_uri)?;
        }

        Ok(Self {
            octocrab: builder.build()?,
        })
    }
}

impl GitHubTransport for OctocrabTransport {
    async fn get(&self, path: &str, token: Option<&str>) -> Result<ApiResponse, FetchError> {
        let network_error = |message: String| FetchError::Network {
            path: path.to_string(),
            message,
        };

        let uri: Uri = path.parse().map_err(|e: http::uri::InvalidUri| network_error(e.to_string()))?;

        let mut headers = HeaderMap::new();
        if let Some(token) = token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| network_error("token is not a valid header value".to_string()))?;
            headers.insert(AUTHORIZATION, value);
        }

        let response = self
            .octocrab
            ._get_with_headers(uri, Some(headers))
            .await
            .map_err(|e| network_error(e.to_string()))?;

        let status = response.status();
        let rate_limit = RateLimitInfo::from_headers(response.headers());
        let body = self
            .octocrab
            .body_to_string(response)
            .await
            .map_err(|e| network_error(e.to_string()))?;

        Ok(ApiResponse {
            status,
            body,
            rate_limit,
        })
    }
}

/// Backoff applied to rate-limited responses.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: usize,
    /// The first retry waits twice this long; each later one doubles.
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

enum Attempt {
    Failed(FetchError),
    RateLimited(ApiResponse),
}

/// Sends a GET, retrying with exponential backoff while GitHub reports a rate
/// limit. Any other response is returned as-is.
pub async fn get_with_retry<T: GitHubTransport>(
    transport: &T,
    path: &str,
    token: Option<&str>,
    policy: &RetryPolicy,
) -> Result<ApiResponse, FetchError> {
    let factor = u64::try_from(policy.base_delay.as_millis()).unwrap_or(u64::MAX);
    let strategy = ExponentialBackoff::from_millis(2)
        .factor(factor)
        .max_delay(policy.max_delay)
        .take(policy.max_retries);

    let mut attempts = 0;
    let outcome = RetryIf::start(
        strategy,
        || {
            attempts += 1;
            let attempt = attempts;
            async move {
                let response = transport.get(path, token).await.map_err(Attempt::Failed)?;
                if response.is_rate_limited() {
                    tracing::warn!(
                        path,
                        attempt,
                        status = %response.status,
                        remaining = response.rate_limit.map(|info| info.remaining),
                        "GitHub rate limit hit"
                    );
                    return Err(Attempt::RateLimited(response));
                }
                Ok(response)
            }
        },
        |attempt: &Attempt| matches!(attempt, Attempt::RateLimited(_)),
    )
    .await;

    match outcome {
        Ok(response) => Ok(response),
        Err(Attempt::Failed(error)) => Err(error),
        Err(Attempt::RateLimited(response)) => Err(FetchError::RateLimited {
            status: response.status,
            attempts,
            rate_limit: response.rate_limit,
        }),
    }
}

/// Per-request view of the API: a shared transport, the caller's token, the
/// retry policy, and the latest rate limit budget seen.
pub struct GitHubClient<T> {
    transport: Arc<T>,
    token: Option<String>,
    retry: RetryPolicy,
    rate_limit: Mutex<Option<RateLimitInfo>>,
}

impl<T: GitHubTransport> GitHubClient<T> {
    pub fn new(transport: Arc<T>, token: Option<String>, retry: RetryPolicy) -> Self {
        Self {
            transport,
            token,
            retry,
            rate_limit: Mutex::new(None),
        }
    }

    /// GETs `path` and decodes a successful body as JSON.
    pub async fn get_json<R: DeserializeOwned>(&self, path: &str) -> Result<R, FetchError> {
        let result =
            get_with_retry(&*self.transport, path, self.token.as_deref(), &self.retry).await;

        let response = match result {
            Ok(response) => response,
            Err(error) => {
                if let FetchError::RateLimited { rate_limit, .. } = &error {
                    self.observe(*rate_limit);
                }
                return Err(error);
            }
        };
        self.observe(response.rate_limit);

        if !response.status.is_success() {
            tracing::debug!(path, status = %response.status, "GitHub API returned an error");
            return Err(FetchError::Transport {
                status: response.status,
                body: response.body,
            });
        }

        serde_json::from_str(&response.body).map_err(|source| FetchError::Decode {
            path: path.to_string(),
            source,
        })
    }

    /// The most recent rate limit budget any response reported.
    pub fn rate_limit(&self) -> Option<RateLimitInfo> {
        self.rate_limit.lock().ok().and_then(|guard| *guard)
    }

    fn observe(&self, info: Option<RateLimitInfo>) {
        if let (Some(info), Ok(mut guard)) = (info, self.rate_limit.lock()) {
            *guard = Some(info);
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::FakeTransport;
    use super::*;
    use serde_json::json;

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    fn rate_limited(status: u16, remaining: Option<u32>, body: &str) -> ApiResponse {
        ApiResponse {
            status: StatusCode::from_u16(status).unwrap(),
            body: body.to_string(),
            rate_limit: remaining.map(|remaining| RateLimitInfo {
                limit: 5000,
                remaining,
                reset_at: 1_700_000_000,
            }),
        }
    }

    #[test]
    fn test_rate_limit_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-limit", HeaderValue::from_static("5000"));
        headers.insert("x-ratelimit-remaining", HeaderValue::from_static("42"));
        headers.insert("x-ratelimit-reset", HeaderValue::from_static("1700000000"));

        let info = RateLimitInfo::from_headers(&headers).unwrap();
        assert_eq!(info.limit, 5000);
        assert_eq!(info.remaining, 42);
        assert_eq!(info.reset_at, 1_700_000_000);
        assert!(!info.is_exhausted());

        assert!(RateLimitInfo::from_headers(&HeaderMap::new()).is_none());
    }

    #[test]
    fn test_rate_limited_classification() {
        assert!(rate_limited(429, None, "").is_rate_limited());
        assert!(rate_limited(403, Some(0), "").is_rate_limited());
        assert!(rate_limited(403, None, "API rate limit exceeded for user").is_rate_limited());
        assert!(!rate_limited(403, Some(10), "Resource not accessible").is_rate_limited());
        assert!(!rate_limited(404, Some(0), "Not Found").is_rate_limited());
    }

    #[tokio::test]
    async fn test_retry_recovers_after_rate_limit() {
        let transport = FakeTransport::new();
        transport.respond_with("/x", rate_limited(429, Some(0), "slow down"));
        transport.respond("/x", 200, json!({"ok": true}));

        let response = get_with_retry(&transport, "/x", None, &fast_retry())
            .await
            .unwrap();

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(transport.request_count("/x"), 2);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_retries() {
        let transport = FakeTransport::new();
        transport.respond_with("/x", rate_limited(403, Some(0), "rate limit"));

        let err = get_with_retry(&transport, "/x", None, &fast_retry())
            .await
            .unwrap_err();

        match err {
            FetchError::RateLimited {
                attempts,
                rate_limit,
                ..
            } => {
                assert_eq!(attempts, 3);
                assert_eq!(rate_limit.map(|info| info.remaining), Some(0));
            }
            other => panic!("expected rate limit error, got {other:?}"),
        }
        assert_eq!(transport.request_count("/x"), 3);
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let transport = FakeTransport::new();
        transport.respond("/x", 404, json!({"message": "Not Found"}));

        let client = GitHubClient::new(Arc::new(transport), None, fast_retry());
        let err = client.get_json::<serde_json::Value>("/x").await.unwrap_err();

        match err {
            FetchError::Transport { status, body } => {
                assert_eq!(status, StatusCode::NOT_FOUND);
                assert!(body.contains("Not Found"));
            }
            other => panic!("expected transport error, got {other:?}"),
        }
        assert_eq!(client.transport.request_count("/x"), 1);
    }

    #[tokio::test]
    async fn test_client_sends_token_and_tracks_budget() {
        let transport = Arc::new(FakeTransport::new());
        transport.respond_with(
            "/x",
            ApiResponse {
                status: StatusCode::OK,
                body: "[1, 2]".to_string(),
                rate_limit: Some(RateLimitInfo {
                    limit: 60,
                    remaining: 59,
                    reset_at: 0,
                }),
            },
        );

        let client = GitHubClient::new(transport.clone(), Some("secret".to_string()), fast_retry());
        let values: Vec<u32> = client.get_json("/x").await.unwrap();

        assert_eq!(values, vec![1, 2]);
        assert_eq!(client.rate_limit().map(|info| info.remaining), Some(59));
        assert_eq!(
            transport.requests(),
            vec![("/x".to_string(), Some("secret".to_string()))]
        );
    }

    #[tokio::test]
    async fn test_client_reports_decode_errors() {
        let transport = FakeTransport::new();
        transport.respond("/x", 200, json!({"not": "a list"}));

        let client = GitHubClient::new(Arc::new(transport), None, fast_retry());
        let err = client.get_json::<Vec<u32>>("/x").await.unwrap_err();
        assert!(matches!(err, FetchError::Decode { .. }));
    }
}
