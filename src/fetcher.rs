//! Pull request acquisition for a single repository.
//!
//! GitHub has no server-side "PRs authored by X" or "PRs reviewed by X" filter
//! on the pulls listing, so the full listing is walked once (newest first,
//! 100 per page) and filtered client side for every requested mode. Reviewed
//! mode additionally asks the review listing of every PR on a page; those
//! lookups run concurrently and are joined in page order before the next page
//! is requested.

use crate::error::FetchError;
use crate::github::{GitHubClient, GitHubTransport};
use crate::types::{FetchMode, FetchedPullRequest, PrState, PrType, RepoId};
use chrono::{DateTime, SubsecRound, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Deserialize;

/// Items requested per listing page. A shorter page is the last one.
pub const PAGE_SIZE: usize = 100;

#[derive(Clone, Debug, Deserialize)]
struct ApiUser {
    login: String,
}

#[derive(Clone, Debug, Deserialize)]
struct ApiPullRequest {
    number: u64,
    title: String,
    body: Option<String>,
    state: PrState,
    created_at: DateTime<Utc>,
    merged_at: Option<DateTime<Utc>>,
    html_url: String,
    user: Option<ApiUser>,
}

impl ApiPullRequest {
    fn is_by(&self, login: &str) -> bool {
        self.user
            .as_ref()
            .is_some_and(|user| user.login.eq_ignore_ascii_case(login))
    }

    fn into_fetched(self) -> FetchedPullRequest {
        let merged_at = self.merged_at.map(|at| at.trunc_subsecs(0));
        let merged = merged_at.is_some();

        FetchedPullRequest {
            number: self.number,
            title: self.title,
            description: self.body.unwrap_or_default(),
            state: if merged { PrState::Closed } else { self.state },
            merged,
            created_at: self.created_at.trunc_subsecs(0),
            merged_at,
            url: self.html_url,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiReview {
    user: Option<ApiUser>,
}

/// One walk over a repository's PR listing.
#[derive(Debug, Default)]
pub struct RepoListing {
    pub authored: Vec<FetchedPullRequest>,
    pub reviewed: Vec<FetchedPullRequest>,
    /// Set to the last page read when the page cap stopped pagination early.
    pub truncated_at: Option<u32>,
}

pub struct PullRequestFetcher<'a, T> {
    client: &'a GitHubClient<T>,
    max_pages: u32,
    review_concurrency: usize,
}

impl<'a, T: GitHubTransport> PullRequestFetcher<'a, T> {
    pub fn new(client: &'a GitHubClient<T>, max_pages: u32, review_concurrency: usize) -> Self {
        Self {
            client,
            max_pages: max_pages.max(1),
            review_concurrency: review_concurrency.max(1),
        }
    }

    /// All PRs in `repo` opened by `author`, newest first.
    pub async fn fetch_authored(
        &self,
        repo: &RepoId,
        author: &str,
    ) -> Result<Vec<FetchedPullRequest>, FetchError> {
        Ok(self.fetch(repo, author, FetchMode::Authored).await?.authored)
    }

    /// All PRs in `repo` carrying at least one review by `reviewer`, newest
    /// first.
    pub async fn fetch_reviewed(
        &self,
        repo: &RepoId,
        reviewer: &str,
    ) -> Result<Vec<FetchedPullRequest>, FetchError> {
        Ok(self.fetch(repo, reviewer, FetchMode::Reviewed).await?.reviewed)
    }

    /// Walks the listing once, collecting the PRs `login` authored and/or
    /// reviewed depending on `mode`.
    pub async fn fetch(
        &self,
        repo: &RepoId,
        login: &str,
        mode: FetchMode,
    ) -> Result<RepoListing, FetchError> {
        let want_authored = mode.includes(PrType::Authored);
        let want_reviewed = mode.includes(PrType::Reviewed);
        let mut listing = RepoListing::default();
        let mut page = 1;

        loop {
            let items = self.list_page(repo, page).await?;
            let count = items.len();

            let reviewed_by: Vec<bool> = if want_reviewed {
                let numbers: Vec<u64> = items.iter().map(|pr| pr.number).collect();
                stream::iter(numbers)
                    .map(|number| self.has_review_by(repo, number, login))
                    .buffered(self.review_concurrency)
                    .try_collect()
                    .await?
            } else {
                vec![false; count]
            };

            for (pr, reviewed) in items.into_iter().zip(reviewed_by) {
                if want_authored && pr.is_by(login) {
                    listing.authored.push(pr.clone().into_fetched());
                }
                if reviewed {
                    listing.reviewed.push(pr.into_fetched());
                }
            }

            if count < PAGE_SIZE {
                break;
            }
            if page >= self.max_pages {
                tracing::warn!(
                    "Hit max_github_api_pages ({}) for repo {}. Data may be incomplete.",
                    self.max_pages,
                    repo
                );
                listing.truncated_at = Some(page);
                break;
            }
            page += 1;
        }

        tracing::debug!(
            repo = %repo,
            login,
            pages = page,
            authored = listing.authored.len(),
            reviewed = listing.reviewed.len(),
            "Fetched PR listing"
        );
        Ok(listing)
    }

    async fn list_page(&self, repo: &RepoId, page: u32) -> Result<Vec<ApiPullRequest>, FetchError> {
        let path = format!(
            "/repos/{}/{}/pulls?state=all&per_page={PAGE_SIZE}&page={page}&sort=created&direction=desc",
            repo.owner, repo.repo
        );
        tracing::trace!(repo = %repo, page, "Requesting PR page");
        self.client.get_json(&path).await
    }

    async fn has_review_by(
        &self,
        repo: &RepoId,
        number: u64,
        reviewer: &str,
    ) -> Result<bool, FetchError> {
        let mut page = 1;

        loop {
            let path = format!(
                "/repos/{}/{}/pulls/{}/reviews?per_page={PAGE_SIZE}&page={page}",
                repo.owner, repo.repo, number
            );
            let reviews: Vec<ApiReview> = self.client.get_json(&path).await?;

            let found = reviews.iter().any(|review| {
                review
                    .user
                    .as_ref()
                    .is_some_and(|user| user.login.eq_ignore_ascii_case(reviewer))
            });
            if found {
                return Ok(true);
            }
            if reviews.len() < PAGE_SIZE || page >= self.max_pages {
                return Ok(false);
            }
            page += 1;
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! JSON builders for GitHub API payloads.

    use serde_json::{json, Value};

    pub fn pulls_path(owner: &str, repo: &str, page: u32) -> String {
        format!(
            "/repos/{owner}/{repo}/pulls?state=all&per_page=100&page={page}&sort=created&direction=desc"
        )
    }

    pub fn reviews_path(owner: &str, repo: &str, number: u64) -> String {
        format!("/repos/{owner}/{repo}/pulls/{number}/reviews?per_page=100&page=1")
    }

    pub fn pr_json(
        number: u64,
        author: &str,
        state: &str,
        created_at: &str,
        merged_at: Option<&str>,
    ) -> Value {
        json!({
            "number": number,
            "title": format!("PR #{number}"),
            "body": null,
            "state": state,
            "created_at": created_at,
            "merged_at": merged_at,
            "html_url": format!("https://github.com/octo/demo/pull/{number}"),
            "user": { "login": author },
        })
    }

    pub fn reviews_json(reviewers: &[&str]) -> Value {
        Value::Array(
            reviewers
                .iter()
                .map(|login| json!({ "user": { "login": login }, "state": "APPROVED" }))
                .collect(),
        )
    }
}
