//! Normalized pull request records shared by every pipeline stage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A unique identifier for a GitHub repository.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RepoId {
    /// The owner of the repository (e.g., "facebook").
    pub owner: String,
    /// The name of the repository (e.g., "react").
    pub repo: String,
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

impl FromStr for RepoId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split('/').collect();
        match parts.as_slice() {
            [owner, repo] if is_valid_segment(owner) && is_valid_segment(repo) && !s.contains("..") => {
                Ok(Self {
                    owner: (*owner).to_string(),
                    repo: (*repo).to_string(),
                })
            }
            _ => Err(format!("expected owner/repo, got '{}'", s.trim())),
        }
    }
}

/// GitHub owner and repository names only use `[A-Za-z0-9._-]`.
fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
}

/// Raw lifecycle state as reported by the API.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrState {
    Open,
    Closed,
}

/// How the requested user relates to a record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PrType {
    Authored,
    Reviewed,
}

impl fmt::Display for PrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrType::Authored => f.write_str("authored"),
            PrType::Reviewed => f.write_str("reviewed"),
        }
    }
}

/// Which relationships to the user are fetched.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchMode {
    #[default]
    Authored,
    Reviewed,
    Both,
}

impl FetchMode {
    pub fn includes(&self, pr_type: PrType) -> bool {
        matches!(
            (self, pr_type),
            (FetchMode::Both, _)
                | (FetchMode::Authored, PrType::Authored)
                | (FetchMode::Reviewed, PrType::Reviewed)
        )
    }
}

/// Report classification. Declaration order is the status sort priority.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PrStatus {
    Merged,
    Open,
    Closed,
}

impl PrStatus {
    pub const ALL: [PrStatus; 3] = [PrStatus::Merged, PrStatus::Open, PrStatus::Closed];
}

/// Per-PR change statistics. All zero unless enrichment succeeded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrStats {
    pub commits: u64,
    pub additions: u64,
    pub deletions: u64,
    pub changed_files: u64,
}

/// A pull request as produced by the fetcher, before provenance is attached.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchedPullRequest {
    pub number: u64,
    pub title: String,
    pub description: String,
    pub state: PrState,
    pub merged: bool,
    pub created_at: DateTime<Utc>,
    pub merged_at: Option<DateTime<Utc>>,
    pub url: String,
}

/// A report row: a fetched pull request tagged with its repository and
/// provenance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    pub description: String,
    pub state: PrState,
    pub merged: bool,
    pub created_at: DateTime<Utc>,
    pub merged_at: Option<DateTime<Utc>>,
    pub url: String,
    pub repo: RepoId,
    pub pr_type: PrType,
    pub stats: PrStats,
}

impl PullRequest {
    pub fn from_fetched(
        fetched: FetchedPullRequest,
        repo: RepoId,
        pr_type: PrType,
        stats: PrStats,
    ) -> Self {
        Self {
            number: fetched.number,
            title: fetched.title,
            description: fetched.description,
            state: fetched.state,
            merged: fetched.merged,
            created_at: fetched.created_at,
            merged_at: fetched.merged_at,
            url: fetched.url,
            repo,
            pr_type,
            stats,
        }
    }

    /// The merge time for merged PRs, the creation time otherwise.
    pub fn effective_date(&self) -> DateTime<Utc> {
        match (self.merged, self.merged_at) {
            (true, Some(merged_at)) => merged_at,
            _ => self.created_at,
        }
    }

    pub fn status(&self) -> PrStatus {
        if self.merged {
            return PrStatus::Merged;
        }
        match self.state {
            PrState::Open => PrStatus::Open,
            PrState::Closed => PrStatus::Closed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(state: PrState, merged_at: Option<DateTime<Utc>>) -> PullRequest {
        PullRequest {
            number: 1,
            title: "t".to_string(),
            description: String::new(),
            state,
            merged: merged_at.is_some(),
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap(),
            merged_at,
            url: "https://github.com/o/r/pull/1".to_string(),
            repo: RepoId {
                owner: "o".to_string(),
                repo: "r".to_string(),
            },
            pr_type: PrType::Authored,
            stats: PrStats::default(),
        }
    }

    #[test]
    fn test_repo_id_parse() {
        let id: RepoId = " octo/demo ".parse().unwrap();
        assert_eq!(id.owner, "octo");
        assert_eq!(id.repo, "demo");
        assert_eq!(id.to_string(), "octo/demo");

        assert!("octo".parse::<RepoId>().is_err());
        assert!("octo/".parse::<RepoId>().is_err());
        assert!("a/b/c".parse::<RepoId>().is_err());
        assert!("../etc".parse::<RepoId>().is_err());
    }

    #[test]
    fn test_repo_id_rejects_characters_outside_github_names() {
        let ok: RepoId = "rust-lang/rust.vim_2".parse().unwrap();
        assert_eq!(ok.repo, "rust.vim_2");

        for raw in ["octo/demo?x", "octo/demo#1", "octo/de mo", "oc to/demo", "octo/démo", "octo/demo%2F"] {
            assert!(raw.parse::<RepoId>().is_err(), "input {raw}");
        }
    }

    #[test]
    fn test_merged_is_always_merged_status() {
        let merged_at = Utc.with_ymd_and_hms(2024, 1, 2, 8, 0, 0).unwrap();
        assert_eq!(
            record(PrState::Closed, Some(merged_at)).status(),
            PrStatus::Merged
        );
        // Inconsistent upstream data still classifies as merged.
        assert_eq!(
            record(PrState::Open, Some(merged_at)).status(),
            PrStatus::Merged
        );
        assert_eq!(record(PrState::Open, None).status(), PrStatus::Open);
        assert_eq!(record(PrState::Closed, None).status(), PrStatus::Closed);
    }

    #[test]
    fn test_effective_date() {
        let merged_at = Utc.with_ymd_and_hms(2024, 1, 2, 8, 0, 0).unwrap();
        let merged = record(PrState::Closed, Some(merged_at));
        assert_eq!(merged.effective_date(), merged_at);

        let open = record(PrState::Open, None);
        assert_eq!(open.effective_date(), open.created_at);
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&PrStatus::ALL).unwrap();
        assert_eq!(json, r#"["MERGED","OPEN","CLOSED"]"#);
    }
}
