//! Filtering, ordering and rollups over aggregated records.

use crate::dates::DateRange;
use crate::types::{PrStatus, PullRequest};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;

/// Report ordering.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    DateAsc,
    #[default]
    DateDesc,
    NumberAsc,
    /// MERGED, then OPEN, then CLOSED.
    Status,
}

/// Sums over the final, filtered sequence.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReportTotals {
    pub count: usize,
    pub commits: u64,
    pub additions: u64,
    pub deletions: u64,
}

impl ReportTotals {
    pub fn from_records(records: &[PullRequest]) -> Self {
        records.iter().fold(
            Self {
                count: records.len(),
                ..Self::default()
            },
            |totals, pr| Self {
                commits: totals.commits + pr.stats.commits,
                additions: totals.additions + pr.stats.additions,
                deletions: totals.deletions + pr.stats.deletions,
                ..totals
            },
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RenderedReport {
    pub records: Vec<PullRequest>,
    pub totals: ReportTotals,
}

/// Keeps records inside `range` whose status is in `statuses`, in their
/// original relative order.
pub fn filter_records(
    records: Vec<PullRequest>,
    range: &DateRange,
    statuses: &BTreeSet<PrStatus>,
) -> Vec<PullRequest> {
    records
        .into_iter()
        .filter(|pr| range.is_unbounded() || range.contains(pr.effective_date()))
        .filter(|pr| statuses.contains(&pr.status()))
        .collect()
}

/// Stable sort: records with equal keys keep their incoming order.
pub fn sort_records(records: &mut [PullRequest], key: SortKey) {
    let compare: fn(&PullRequest, &PullRequest) -> Ordering = match key {
        SortKey::DateAsc => |a, b| a.effective_date().cmp(&b.effective_date()),
        SortKey::DateDesc => |a, b| b.effective_date().cmp(&a.effective_date()),
        SortKey::NumberAsc => |a, b| a.number.cmp(&b.number),
        SortKey::Status => |a, b| a.status().cmp(&b.status()),
    };
    records.sort_by(compare);
}

/// Applies the date and status filters, orders the survivors, and totals them.
pub fn render(
    records: Vec<PullRequest>,
    range: &DateRange,
    statuses: &BTreeSet<PrStatus>,
    key: SortKey,
) -> RenderedReport {
    let before = records.len();
    let mut records = filter_records(records, range, statuses);
    sort_records(&mut records, key);

    let totals = ReportTotals::from_records(&records);
    tracing::debug!(before, after = totals.count, sort = ?key, "Rendered report");

    RenderedReport { records, totals }
}
