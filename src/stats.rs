//! Best-effort per-PR change statistics.

use crate::github::{GitHubClient, GitHubTransport};
use crate::types::{PrStats, RepoId};
use futures::stream::{self, StreamExt};
use serde::Deserialize;

/// The detail fields of `GET /repos/{owner}/{repo}/pulls/{number}`.
#[derive(Debug, Deserialize)]
struct ApiPullRequestDetail {
    #[serde(default)]
    commits: u64,
    #[serde(default)]
    additions: u64,
    #[serde(default)]
    deletions: u64,
    #[serde(default)]
    changed_files: u64,
}

/// Outcome of enriching one PR.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Enrichment {
    Fetched(PrStats),
    /// The detail request failed; the PR reports zero stats.
    Degraded { reason: String },
}

impl Enrichment {
    pub fn stats(&self) -> PrStats {
        match self {
            Enrichment::Fetched(stats) => *stats,
            Enrichment::Degraded { .. } => PrStats::default(),
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Enrichment::Degraded { .. })
    }
}

pub struct StatsEnricher<'a, T> {
    client: &'a GitHubClient<T>,
    concurrency: usize,
}

impl<'a, T: GitHubTransport> StatsEnricher<'a, T> {
    pub fn new(client: &'a GitHubClient<T>, concurrency: usize) -> Self {
        Self {
            client,
            concurrency: concurrency.max(1),
        }
    }

    /// Fetches stats for one PR. Never fails; errors degrade to zeros.
    pub async fn enrich(&self, repo: &RepoId, number: u64) -> Enrichment {
        let path = format!("/repos/{}/{}/pulls/{}", repo.owner, repo.repo, number);

        match self.client.get_json::<ApiPullRequestDetail>(&path).await {
            Ok(detail) => Enrichment::Fetched(PrStats {
                commits: detail.commits,
                additions: detail.additions,
                deletions: detail.deletions,
                changed_files: detail.changed_files,
            }),
            Err(e) => {
                tracing::warn!(repo = %repo, number, error = %e, "Failed to fetch PR stats, using zeros");
                Enrichment::Degraded {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Enriches many PRs concurrently. Output order matches `numbers`.
    pub async fn enrich_all(&self, repo: &RepoId, numbers: &[u64]) -> Vec<Enrichment> {
        let enrichments: Vec<Enrichment> = stream::iter(numbers.iter().copied())
            .map(|number| self.enrich(repo, number))
            .buffered(self.concurrency)
            .collect()
            .await;

        let degraded = enrichments.iter().filter(|e| e.is_degraded()).count();
        if degraded > 0 {
            tracing::info!(repo = %repo, degraded, total = numbers.len(), "Some PR stats unavailable");
        }

        enrichments
    }
}
