//! Entry point for producing pull request reports.
//!
//! This module implements `ReportQuerier`, which drives the pipeline for one
//! report request. It handles:
//! 1. Validating the request and resolving the date filter before any network activity.
//! 2. Checking the result cache for an identical fetch.
//! 3. Fetching and aggregating the repositories on a miss.
//! 4. Filtering, ordering and totalling the records for the renderer.

use crate::aggregator::{AggregateRequest, Aggregator, FetchMode, RepoWarning};
use crate::cache::{CacheKey, ReportCache};
use crate::config::AppConfig;
use crate::dates::{DateFilterParser, DateRange};
use crate::error::ReportError;
use crate::github::{GitHubClient, GitHubTransport, RateLimitInfo};
use crate::report::{self, ReportTotals, SortKey};
use crate::types::{PrStatus, PullRequest, RepoId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

const LAST_MONTH: &str = "last-month";

/// Everything a caller can ask for in one report.
#[derive(Clone, Deserialize)]
pub struct ReportRequest {
    /// `owner/repo` identifiers; at least one.
    pub repos: Vec<String>,
    pub username: String,
    /// Overrides the configured token for this request.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub mode: FetchMode,
    #[serde(default)]
    pub include_stats: bool,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    /// Shortcut for the whole previous calendar month; overrides both dates.
    #[serde(default)]
    pub last_month: bool,
    #[serde(default = "default_statuses")]
    pub statuses: BTreeSet<PrStatus>,
    #[serde(default)]
    pub sort: SortKey,
}

fn default_statuses() -> BTreeSet<PrStatus> {
    PrStatus::ALL.into_iter().collect()
}

impl fmt::Debug for ReportRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReportRequest")
            .field("repos", &self.repos)
            .field("username", &self.username)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("mode", &self.mode)
            .field("include_stats", &self.include_stats)
            .field("start_date", &self.start_date)
            .field("end_date", &self.end_date)
            .field("last_month", &self.last_month)
            .field("statuses", &self.statuses)
            .field("sort", &self.sort)
            .finish()
    }
}

impl ReportRequest {
    pub fn new(repos: Vec<String>, username: impl Into<String>) -> Self {
        Self {
            repos,
            username: username.into(),
            token: None,
            mode: FetchMode::default(),
            include_stats: false,
            start_date: None,
            end_date: None,
            last_month: false,
            statuses: default_statuses(),
            sort: SortKey::default(),
        }
    }
}

/// Whether a report has rows, and if not, why.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Ready,
    /// The fetch itself returned no pull requests.
    NothingFetched,
    /// Pull requests were fetched but the filters removed all of them.
    NoneMatchedFilters,
}

/// The pipeline's output, ready for an external renderer.
#[derive(Clone, Debug, Serialize)]
pub struct Report {
    pub status: ReportStatus,
    pub message: String,
    pub username: String,
    pub date_range: DateRange,
    pub records: Vec<PullRequest>,
    pub totals: ReportTotals,
    pub warnings: Vec<RepoWarning>,
    pub rate_limit: Option<RateLimitInfo>,
}

/// A request that passed validation.
struct ReportPlan {
    aggregate: AggregateRequest,
    range: DateRange,
}

fn plan(request: &ReportRequest, parser: &DateFilterParser) -> Result<ReportPlan, ReportError> {
    let (start, end) = if request.last_month {
        (Some(LAST_MONTH), Some(LAST_MONTH))
    } else {
        (request.start_date.as_deref(), request.end_date.as_deref())
    };
    let range = parser.resolve_range(start, end)?;

    if request.repos.is_empty() {
        return Err(ReportError::InvalidRequest(
            "at least one repository is required".to_string(),
        ));
    }
    let mut repos: Vec<RepoId> = Vec::with_capacity(request.repos.len());
    for raw in &request.repos {
        let repo: RepoId = raw.parse().map_err(ReportError::InvalidRequest)?;
        if !repos.contains(&repo) {
            repos.push(repo);
        }
    }

    let username = request.username.trim();
    if username.is_empty() {
        return Err(ReportError::InvalidRequest("username is required".to_string()));
    }

    Ok(ReportPlan {
        aggregate: AggregateRequest {
            repos,
            username: username.to_string(),
            mode: request.mode,
            include_stats: request.include_stats,
        },
        range,
    })
}

pub struct ReportQuerier<T> {
    transport: Arc<T>,
    cache: ReportCache,
    config: AppConfig,
}

impl<T: GitHubTransport> ReportQuerier<T> {
    pub fn new(transport: Arc<T>, cache: ReportCache, config: AppConfig) -> Self {
        Self {
            transport,
            cache,
            config,
        }
    }

    /// Produces a report with dates resolved against today's date.
    pub async fn generate(&self, request: &ReportRequest) -> Result<Report, ReportError> {
        self.generate_with(request, DateFilterParser::for_today()).await
    }

    /// Produces a report with dates resolved by `parser`.
    pub async fn generate_with(
        &self,
        request: &ReportRequest,
        parser: DateFilterParser,
    ) -> Result<Report, ReportError> {
        let plan = plan(request, &parser)?;

        let token = request
            .token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .or_else(|| self.config.default_token())
            .map(str::to_string);

        let key = CacheKey::new(
            &plan.aggregate.repos,
            &plan.aggregate.username,
            token.as_deref(),
            plan.aggregate.mode,
            plan.aggregate.include_stats,
        );

        tracing::info!(
            username = %plan.aggregate.username,
            repos = plan.aggregate.repos.len(),
            mode = ?plan.aggregate.mode,
            include_stats = plan.aggregate.include_stats,
            "Generating report"
        );

        let client = GitHubClient::new(self.transport.clone(), token, self.config.retry_policy());
        let aggregator = Aggregator::new(&client, self.config.aggregator_settings());
        let outcome = self
            .cache
            .get_or_fetch(key, aggregator.aggregate(&plan.aggregate))
            .await?;

        let fetched = outcome.records.len();
        let rendered = report::render(
            outcome.records.clone(),
            &plan.range,
            &request.statuses,
            request.sort,
        );

        let username = plan.aggregate.username;
        let (status, message) = if fetched == 0 {
            (
                ReportStatus::NothingFetched,
                format!("No pull requests found for {username}"),
            )
        } else if rendered.records.is_empty() {
            (
                ReportStatus::NoneMatchedFilters,
                "No pull requests found matching the filters".to_string(),
            )
        } else {
            (
                ReportStatus::Ready,
                format!("Found {} pull requests", rendered.totals.count),
            )
        };

        tracing::info!(
            fetched,
            after_filtering = rendered.totals.count,
            warnings = outcome.warnings.len(),
            "{}",
            message
        );

        Ok(Report {
            status,
            message,
            username,
            date_range: plan.range,
            records: rendered.records,
            totals: rendered.totals,
            warnings: outcome.warnings.clone(),
            rate_limit: outcome.rate_limit,
        })
    }

    pub async fn clear_cache(&self) {
        self.cache.invalidate_all().await;
    }
}
