//! Short-lived, read-through cache of aggregated fetch results.
//!
//! Keys are built from the normalized request shape (repository set, user,
//! token identity, stats flag, fetch mode). Concurrent requests for the same
//! uncached key collapse into a single fetch; failed fetches are not stored.

use crate::aggregator::{AggregateOutcome, FetchMode};
use crate::error::AggregateError;
use crate::types::RepoId;
use moka::future::Cache;
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeSet;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub repos: BTreeSet<RepoId>,
    pub username: String,
    /// Hash of the token, so the secret itself is never kept as a key.
    pub token_fingerprint: Option<u64>,
    pub include_stats: bool,
    pub mode: FetchMode,
}

impl CacheKey {
    pub fn new(
        repos: &[RepoId],
        username: &str,
        token: Option<&str>,
        mode: FetchMode,
        include_stats: bool,
    ) -> Self {
        Self {
            repos: repos.iter().cloned().collect(),
            username: username.trim().to_lowercase(),
            token_fingerprint: token.map(fingerprint),
            include_stats,
            mode,
        }
    }
}

fn fingerprint(token: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    token.hash(&mut hasher);
    hasher.finish()
}

#[derive(Clone)]
pub struct ReportCache {
    cache: Cache<CacheKey, Arc<AggregateOutcome>>,
}

impl ReportCache {
    pub fn new(ttl: Duration, max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(ttl)
            .build();

        Self { cache }
    }

    /// Returns the cached outcome for `key`, running `fetch` on a miss. While
    /// one caller runs `fetch`, other callers for the same key wait for its
    /// result instead of fetching again.
    pub async fn get_or_fetch<F>(
        &self,
        key: CacheKey,
        fetch: F,
    ) -> Result<Arc<AggregateOutcome>, Arc<AggregateError>>
    where
        F: Future<Output = Result<AggregateOutcome, AggregateError>>,
    {
        let username = key.username.clone();
        self.cache
            .try_get_with(key, async move {
                tracing::debug!(username = %username, "Cache miss, fetching");
                fetch.await.map(Arc::new)
            })
            .await
    }

    pub async fn invalidate_all(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn repo(name: &str) -> RepoId {
        RepoId {
            owner: "octo".to_string(),
            repo: name.to_string(),
        }
    }

    fn key() -> CacheKey {
        CacheKey::new(&[repo("demo")], "alice", None, FetchMode::Authored, false)
    }

    async fn counted(calls: &AtomicUsize) -> Result<AggregateOutcome, AggregateError> {
        calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(AggregateOutcome::default())
    }

    #[test]
    fn test_key_normalization() {
        let a = CacheKey::new(
            &[repo("b"), repo("a")],
            "Alice ",
            Some("token"),
            FetchMode::Both,
            true,
        );
        let b = CacheKey::new(
            &[repo("a"), repo("b")],
            "alice",
            Some("token"),
            FetchMode::Both,
            true,
        );
        assert_eq!(a, b);

        let other_token = CacheKey::new(
            &[repo("a"), repo("b")],
            "alice",
            Some("other"),
            FetchMode::Both,
            true,
        );
        assert_ne!(a, other_token);

        let no_stats = CacheKey::new(&[repo("a"), repo("b")], "alice", Some("token"), FetchMode::Both, false);
        assert_ne!(a, no_stats);

        let other_mode = CacheKey::new(&[repo("a"), repo("b")], "alice", Some("token"), FetchMode::Reviewed, true);
        assert_ne!(a, other_mode);
    }

    #[tokio::test]
    async fn test_hit_skips_fetch() {
        let cache = ReportCache::new(Duration::from_secs(60), 10);
        let calls = AtomicUsize::new(0);

        cache.get_or_fetch(key(), counted(&calls)).await.unwrap();
        cache.get_or_fetch(key(), counted(&calls)).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_misses_collapse() {
        let cache = ReportCache::new(Duration::from_secs(60), 10);
        let calls = AtomicUsize::new(0);

        let (a, b, c) = tokio::join!(
            cache.get_or_fetch(key(), counted(&calls)),
            cache.get_or_fetch(key(), counted(&calls)),
            cache.get_or_fetch(key(), counted(&calls)),
        );

        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_entries_expire() {
        let cache = ReportCache::new(Duration::from_millis(100), 10);
        let calls = AtomicUsize::new(0);

        cache.get_or_fetch(key(), counted(&calls)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;
        cache.get_or_fetch(key(), counted(&calls)).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let cache = ReportCache::new(Duration::from_secs(60), 10);
        let calls = AtomicUsize::new(0);

        let failing = async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(AggregateError::AllRepositoriesFailed { warnings: vec![] })
        };
        assert!(cache.get_or_fetch(key(), failing).await.is_err());

        cache.get_or_fetch(key(), counted(&calls)).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidate_all() {
        let cache = ReportCache::new(Duration::from_secs(60), 10);
        let calls = AtomicUsize::new(0);

        cache.get_or_fetch(key(), counted(&calls)).await.unwrap();
        cache.invalidate_all().await;
        cache.get_or_fetch(key(), counted(&calls)).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
