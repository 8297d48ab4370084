//! Application configuration and environment variable parsing.
//!
//! This module handles loading configuration settings from the environment (e.g., .env file).
//! It defines the `AppConfig` struct which governs behavior such as GitHub API limits,
//! fetch concurrency, retry backoff, and the report cache TTL.

use crate::aggregator::AggregatorSettings;
use crate::github::RetryPolicy;
use serde::Deserialize;
use std::time::Duration as StdDuration;

/// Application configuration loaded from environment variables.
///
/// Every field has a default, so an empty environment is a valid configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    /// Optional GitHub Personal Access Token for higher rate limits.
    /// Used when a report request does not carry its own token.
    pub github_token: Option<String>,

    /// API root override, e.g. a GitHub Enterprise `https://host/api/v3`.
    pub github_api_url: Option<String>,

    /// Time to live for cached fetch results in seconds.
    #[serde(default = "default_cache_ttl_seconds")]
    pub cache_ttl_seconds: u64,

    /// Maximum number of entries to keep in the result cache.
    #[serde(default = "default_cache_max_capacity")]
    pub cache_max_capacity: u64,

    /// Repositories fetched at the same time.
    #[serde(default = "default_repo_concurrency_limit")]
    pub repo_concurrency_limit: usize,

    /// Review lookups and stats requests in flight per repository.
    #[serde(default = "default_review_concurrency_limit")]
    pub review_concurrency_limit: usize,

    /// Hard limit on the number of paginated requests per listing.
    #[serde(default = "default_max_github_api_pages")]
    pub max_github_api_pages: u32,

    /// Retries for rate-limited (403/429) responses.
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Backoff unit in milliseconds; the first retry waits twice this long.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    #[serde(default = "default_port")]
    pub port: u16,

    /// `json` switches log output to JSON lines.
    #[serde(default)]
    pub log_format: Option<String>,
}

fn default_cache_ttl_seconds() -> u64 {
    300
}

fn default_cache_max_capacity() -> u64 {
    100
}

fn default_repo_concurrency_limit() -> usize {
    4
}

fn default_review_concurrency_limit() -> usize {
    8
}

fn default_max_github_api_pages() -> u32 {
    100
}

fn default_max_retries() -> usize {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

fn default_port() -> u16 {
    3000
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            github_token: None,
            github_api_url: None,
            cache_ttl_seconds: default_cache_ttl_seconds(),
            cache_max_capacity: default_cache_max_capacity(),
            repo_concurrency_limit: default_repo_concurrency_limit(),
            review_concurrency_limit: default_review_concurrency_limit(),
            max_github_api_pages: default_max_github_api_pages(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            port: default_port(),
            log_format: None,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::from_env()
    }

    pub fn cache_ttl(&self) -> StdDuration {
        StdDuration::from_secs(self.cache_ttl_seconds)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: StdDuration::from_millis(self.retry_base_delay_ms),
            ..RetryPolicy::default()
        }
    }

    pub fn aggregator_settings(&self) -> AggregatorSettings {
        AggregatorSettings {
            repo_concurrency: self.repo_concurrency_limit,
            review_concurrency: self.review_concurrency_limit,
            max_pages: self.max_github_api_pages,
        }
    }

    /// The token to use when a request does not bring its own.
    pub fn default_token(&self) -> Option<&str> {
        self.github_token.as_deref().filter(|token| !token.trim().is_empty())
    }
}
