//! Multi-repository aggregation.
//!
//! Repositories are fetched concurrently and each one is an independent unit
//! of work: a failure becomes a warning for that repository and never touches
//! its siblings. A listing cut short by the page cap keeps its records and
//! also gets a warning. Once everything has finished the records are put back in a
//! deterministic order (repository input order, authored before reviewed,
//! then fetch order) so completion order never leaks into the report.

use crate::error::{AggregateError, FetchError};
use crate::fetcher::{PullRequestFetcher, RepoListing};
use crate::github::{GitHubClient, GitHubTransport, RateLimitInfo};
use crate::stats::StatsEnricher;
use crate::types::{FetchedPullRequest, PrStats, PrType, PullRequest, RepoId};
pub use crate::types::FetchMode;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// A recoverable, per-repository failure.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RepoWarning {
    pub repo: RepoId,
    pub message: String,
}

impl fmt::Display for RepoWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.repo, self.message)
    }
}

#[derive(Clone, Debug)]
pub struct AggregateRequest {
    pub repos: Vec<RepoId>,
    pub username: String,
    pub mode: FetchMode,
    pub include_stats: bool,
}

#[derive(Clone, Debug, Default)]
pub struct AggregateOutcome {
    pub records: Vec<PullRequest>,
    pub warnings: Vec<RepoWarning>,
    /// Latest rate limit budget observed while fetching.
    pub rate_limit: Option<RateLimitInfo>,
}

/// Concurrency and paging limits.
#[derive(Clone, Copy, Debug)]
pub struct AggregatorSettings {
    pub repo_concurrency: usize,
    pub review_concurrency: usize,
    pub max_pages: u32,
}

impl Default for AggregatorSettings {
    fn default() -> Self {
        Self {
            repo_concurrency: 4,
            review_concurrency: 8,
            max_pages: 100,
        }
    }
}

/// One repository's tagged records.
struct RepoFetch {
    records: Vec<PullRequest>,
    truncated_at: Option<u32>,
}

pub struct Aggregator<'a, T> {
    client: &'a GitHubClient<T>,
    settings: AggregatorSettings,
}

impl<'a, T: GitHubTransport> Aggregator<'a, T> {
    pub fn new(client: &'a GitHubClient<T>, settings: AggregatorSettings) -> Self {
        Self { client, settings }
    }

    /// Fetches every repository and merges the tagged records.
    ///
    /// Fails only when every repository failed.
    pub async fn aggregate(
        &self,
        request: &AggregateRequest,
    ) -> Result<AggregateOutcome, AggregateError> {
        let mut results: Vec<(usize, Result<RepoFetch, FetchError>)> =
            stream::iter(0..request.repos.len())
                .map(|index| async move {
                    let result = self.fetch_repository(&request.repos[index], request).await;
                    (index, result)
                })
                .buffer_unordered(self.settings.repo_concurrency.max(1))
                .collect()
                .await;
        results.sort_by_key(|(index, _)| *index);

        let mut outcome = AggregateOutcome::default();
        let mut succeeded = 0;

        for (index, result) in results {
            let repo = &request.repos[index];
            match result {
                Ok(fetched) => {
                    tracing::info!(repo = %repo, count = fetched.records.len(), "Fetched PRs");
                    succeeded += 1;
                    outcome.records.extend(fetched.records);
                    if let Some(pages) = fetched.truncated_at {
                        outcome.warnings.push(RepoWarning {
                            repo: repo.clone(),
                            message: format!(
                                "listing truncated at {pages} pages; data may be incomplete"
                            ),
                        });
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to fetch PRs for {}: {}", repo, e);
                    outcome.warnings.push(RepoWarning {
                        repo: repo.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        if succeeded == 0 && !request.repos.is_empty() {
            return Err(AggregateError::AllRepositoriesFailed {
                warnings: outcome.warnings,
            });
        }

        outcome.rate_limit = self.client.rate_limit();
        Ok(outcome)
    }

    async fn fetch_repository(
        &self,
        repo: &RepoId,
        request: &AggregateRequest,
    ) -> Result<RepoFetch, FetchError> {
        let fetcher = PullRequestFetcher::new(
            self.client,
            self.settings.max_pages,
            self.settings.review_concurrency,
        );

        let RepoListing {
            authored,
            reviewed,
            truncated_at,
        } = fetcher.fetch(repo, &request.username, request.mode).await?;

        let stats = if request.include_stats {
            let mut seen = HashSet::new();
            let numbers: Vec<u64> = authored
                .iter()
                .chain(&reviewed)
                .map(|pr| pr.number)
                .filter(|number| seen.insert(*number))
                .collect();
            self.enrich(repo, &numbers).await
        } else {
            HashMap::new()
        };

        let stats = &stats;
        let tag = |pr_type: PrType, fetched: Vec<FetchedPullRequest>| {
            fetched.into_iter().map(move |pr| {
                let pr_stats = stats.get(&pr.number).copied().unwrap_or_default();
                PullRequest::from_fetched(pr, repo.clone(), pr_type, pr_stats)
            })
        };

        let mut records: Vec<PullRequest> = tag(PrType::Authored, authored).collect();
        records.extend(tag(PrType::Reviewed, reviewed));
        Ok(RepoFetch {
            records,
            truncated_at,
        })
    }

    /// Stats per PR number. Callers pass each number once, so a PR both
    /// authored and reviewed is only fetched once.
    async fn enrich(&self, repo: &RepoId, numbers: &[u64]) -> HashMap<u64, PrStats> {
        let enrichments = StatsEnricher::new(self.client, self.settings.review_concurrency)
            .enrich_all(repo, numbers)
            .await;

        numbers
            .iter()
            .copied()
            .zip(enrichments.iter().map(|enrichment| enrichment.stats()))
            .collect()
    }
}
