//! Error taxonomy for the report pipeline.

use crate::aggregator::RepoWarning;
use crate::github::RateLimitInfo;
use http::StatusCode;
use std::sync::Arc;
use thiserror::Error;

/// Failures while talking to GitHub. Fatal to a single repository's fetch.
#[derive(Debug, Error)]
pub enum FetchError {
    /// GitHub answered with a non-success status.
    #[error("GitHub API error: {status} - {body}")]
    Transport { status: StatusCode, body: String },

    /// GitHub kept answering with a rate-limit response after every retry.
    #[error("GitHub API rate limit exceeded after {attempts} attempts ({status})")]
    RateLimited {
        status: StatusCode,
        attempts: usize,
        rate_limit: Option<RateLimitInfo>,
    },

    /// The request never produced a response.
    #[error("request to {path} failed: {message}")]
    Network { path: String, message: String },

    /// The response body was not the expected JSON shape.
    #[error("unexpected response from {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Malformed date-filter input.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DateParseError {
    #[error("Invalid date format: {input}. Expected format: dd.mm.yyyy")]
    InvalidDottedDate { input: String },

    #[error("Month must be between 1 and 12, got: {month}")]
    MonthOutOfRange { month: i64 },

    #[error(
        "Invalid date format: {input}. Expected: dd.mm.yyyy, month number (1-12), or 'last-month'"
    )]
    Unrecognized { input: String },
}

/// The whole aggregation failed: no repository could be fetched.
#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("all {} repository fetches failed", warnings.len())]
    AllRepositoriesFailed { warnings: Vec<RepoWarning> },
}

/// Errors that abort a report before anything is produced.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Error parsing date: {0}")]
    DateFilter(#[from] DateParseError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("{0}")]
    Aggregate(Arc<AggregateError>),
}

impl From<Arc<AggregateError>> for ReportError {
    fn from(error: Arc<AggregateError>) -> Self {
        ReportError::Aggregate(error)
    }
}
