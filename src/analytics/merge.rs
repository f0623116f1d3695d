//! Combines partial per-group aggregates from rollup buckets and raw-range
//! queries into one result per group.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::models::{GroupAggregate, GroupKey};

/// Additive per-group state.
///
/// Latency is held as `sum(avg * count)` so that merging is plain addition and
/// the mean is only materialized at the end.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateStats {
    pub request_count: i64,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub total_tokens: i64,
    pub total_cost: f64,
    latency_weighted_sum: f64,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
}

impl AggregateStats {
    pub fn from_partial(partial: &GroupAggregate) -> Self {
        Self {
            request_count: partial.request_count,
            input_tokens: partial.input_tokens,
            output_tokens: partial.output_tokens,
            total_tokens: partial.total_tokens,
            total_cost: partial.total_cost,
            latency_weighted_sum: partial.avg_latency_ms * partial.request_count as f64,
            first_seen: partial.first_seen,
            last_seen: partial.last_seen,
        }
    }

    pub fn merge(&mut self, other: &AggregateStats) {
        self.request_count += other.request_count;
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.total_tokens += other.total_tokens;
        self.total_cost += other.total_cost;
        self.latency_weighted_sum += other.latency_weighted_sum;
        self.first_seen = min_opt(self.first_seen, other.first_seen);
        self.last_seen = max_opt(self.last_seen, other.last_seen);
    }

    /// Count-weighted mean latency; 0 for an empty group.
    pub fn avg_latency_ms(&self) -> f64 {
        if self.request_count == 0 {
            0.0
        } else {
            self.latency_weighted_sum / self.request_count as f64
        }
    }

    fn into_aggregate(self, key: GroupKey) -> GroupAggregate {
        GroupAggregate {
            key,
            request_count: self.request_count,
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            total_tokens: self.total_tokens,
            total_cost: self.total_cost,
            avg_latency_ms: self.avg_latency_ms(),
            first_seen: self.first_seen,
            last_seen: self.last_seen,
        }
    }
}

fn min_opt(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

fn max_opt(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

/// Keyed accumulator over partial aggregates.
#[derive(Debug, Default)]
pub struct GroupAccumulator {
    groups: BTreeMap<GroupKey, AggregateStats>,
}

impl GroupAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, partial: &GroupAggregate) {
        let stats = AggregateStats::from_partial(partial);
        match self.groups.get_mut(&partial.key) {
            Some(existing) => existing.merge(&stats),
            None => {
                self.groups.insert(partial.key.clone(), stats);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Final rows ordered by total cost descending, ties broken by group key
    /// ascending. Groups that ended up with no requests are dropped.
    pub fn finish(self) -> Vec<GroupAggregate> {
        let mut rows: Vec<GroupAggregate> = self
            .groups
            .into_iter()
            .filter(|(_, stats)| stats.request_count > 0)
            .map(|(key, stats)| stats.into_aggregate(key))
            .collect();
        rows.sort_by(|a, b| {
            b.total_cost
                .total_cmp(&a.total_cost)
                .then_with(|| a.key.cmp(&b.key))
        });
        rows
    }
}

impl<'a> Extend<&'a GroupAggregate> for GroupAccumulator {
    fn extend<I: IntoIterator<Item = &'a GroupAggregate>>(&mut self, iter: I) {
        for partial in iter {
            self.add(partial);
        }
    }
}

/// Merge any number of partial lists into sorted final rows.
pub fn merge_partials<'a>(parts: impl IntoIterator<Item = &'a [GroupAggregate]>) -> Vec<GroupAggregate> {
    let mut acc = GroupAccumulator::new();
    for part in parts {
        acc.extend(part);
    }
    acc.finish()
}
