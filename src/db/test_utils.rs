//! In-memory repositories for service-level tests.
//!
//! These mirror the SQL repos closely enough that service tests can compare
//! the rollup path against the raw path, and they expose failure switches for
//! the fail-open and partial-run cases.
#![allow(dead_code)]

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::{DbError, DbResult, EventRepo, LeaseRepo, RollupRepo, TimeRange, nearest_rank_offset};
use crate::{
    analytics::window::covering_days,
    models::{
        CostRow, CostUpdate, GroupAggregate, GroupField, GroupKey, Grouping, RollupVariant,
        UsageEvent, WindowStats,
    },
};

/// A plain event with small token counts and no cost.
pub fn event(tenant_id: &str, timestamp: DateTime<Utc>, model: &str, provider: &str) -> UsageEvent {
    UsageEvent {
        tenant_id: tenant_id.to_string(),
        timestamp,
        trace_id: format!("trace-{}", timestamp.timestamp_micros()),
        call_sequence: 0,
        model: model.to_string(),
        provider: provider.to_string(),
        agent: None,
        user_id: None,
        usage_input_tokens: 100,
        usage_output_tokens: 50,
        usage_cached_tokens: 0,
        usage_total_tokens: None,
        cost_total: 0.0,
        latency_ms: 100,
        finish_reason: None,
        tool_call_count: 0,
        stream: false,
    }
}

fn group_key(grouping: &Grouping, e: &UsageEvent) -> GroupKey {
    GroupKey(
        grouping
            .fields()
            .map(|field| match field {
                GroupField::Model => Some(e.model.clone()),
                GroupField::Provider => Some(e.provider.clone()),
                GroupField::Agent => e.agent.clone(),
            })
            .collect(),
    )
}

fn summarize(key: GroupKey, rows: &[&UsageEvent]) -> GroupAggregate {
    let count = rows.len() as i64;
    let latency: i64 = rows.iter().map(|e| e.latency_ms).sum();
    GroupAggregate {
        key,
        request_count: count,
        input_tokens: rows.iter().map(|e| e.usage_input_tokens).sum(),
        output_tokens: rows.iter().map(|e| e.usage_output_tokens).sum(),
        total_tokens: rows.iter().map(|e| e.total_tokens()).sum(),
        total_cost: rows.iter().map(|e| e.cost_total).sum(),
        avg_latency_ms: if count == 0 { 0.0 } else { latency as f64 / count as f64 },
        first_seen: rows.iter().map(|e| e.timestamp).min(),
        last_seen: rows.iter().map(|e| e.timestamp).max(),
    }
}

type FetchHook = Box<dyn FnMut(u64) + Send>;

#[derive(Default)]
pub struct MemoryEventRepo {
    events: Mutex<Vec<UsageEvent>>,
    fail_fetch_at: Mutex<Option<u64>>,
    fail_update_calls: Mutex<HashSet<usize>>,
    update_calls: AtomicUsize,
    fetch_hook: Mutex<Option<FetchHook>>,
}

impl MemoryEventRepo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert events, skipping duplicate natural keys. Returns rows inserted.
    pub fn insert(&self, batch: Vec<UsageEvent>) -> usize {
        let mut events = self.events.lock();
        let mut inserted = 0;
        for e in batch {
            let dup = events
                .iter()
                .any(|x| x.tenant_id == e.tenant_id && x.key() == e.key());
            if !dup {
                events.push(e);
                inserted += 1;
            }
        }
        inserted
    }

    pub fn all(&self) -> Vec<UsageEvent> {
        self.events.lock().clone()
    }

    /// Make `fetch_cost_rows` fail when asked for this offset.
    pub fn fail_fetch_at(&self, offset: u64) {
        *self.fail_fetch_at.lock() = Some(offset);
    }

    /// Make the `n`th (0-based) call to `update_costs` fail.
    pub fn fail_update_call(&self, n: usize) {
        self.fail_update_calls.lock().insert(n);
    }

    /// Run `hook` with the offset of every `fetch_cost_rows` call.
    pub fn on_fetch(&self, hook: impl FnMut(u64) + Send + 'static) {
        *self.fetch_hook.lock() = Some(Box::new(hook));
    }

    pub fn update_call_count(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }

    fn aggregate_sync(&self, tenant_id: &str, grouping: &Grouping, ranges: &[TimeRange]) -> Vec<GroupAggregate> {
        let events = self.events.lock();
        let mut groups: BTreeMap<GroupKey, Vec<&UsageEvent>> = BTreeMap::new();
        for e in events
            .iter()
            .filter(|e| e.tenant_id == tenant_id && ranges.iter().any(|r| r.contains(e.timestamp)))
        {
            groups.entry(group_key(grouping, e)).or_default().push(e);
        }
        groups
            .into_iter()
            .map(|(key, rows)| summarize(key, &rows))
            .collect()
    }
}

#[async_trait]
impl EventRepo for MemoryEventRepo {
    async fn insert_batch(&self, events: &[UsageEvent]) -> DbResult<usize> {
        Ok(self.insert(events.to_vec()))
    }

    async fn aggregate(
        &self,
        tenant_id: &str,
        grouping: &Grouping,
        ranges: &[TimeRange],
    ) -> DbResult<Vec<GroupAggregate>> {
        Ok(self.aggregate_sync(tenant_id, grouping, ranges))
    }

    async fn fetch_cost_rows(
        &self,
        tenant_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        offset: u64,
        limit: u32,
    ) -> DbResult<Vec<CostRow>> {
        if let Some(hook) = self.fetch_hook.lock().as_mut() {
            hook(offset);
        }
        if *self.fail_fetch_at.lock() == Some(offset) {
            return Err(DbError::Internal("injected fetch failure".into()));
        }

        let events = self.events.lock();
        let mut rows: Vec<&UsageEvent> = events
            .iter()
            .filter(|e| e.tenant_id == tenant_id && e.timestamp >= start && e.timestamp <= end)
            .collect();
        rows.sort_by_key(|e| e.key());

        Ok(rows
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .map(|e| CostRow {
                key: e.key(),
                model: e.model.clone(),
                provider: e.provider.clone(),
                usage_input_tokens: e.usage_input_tokens,
                usage_output_tokens: e.usage_output_tokens,
                usage_cached_tokens: e.usage_cached_tokens,
                cost_total: e.cost_total,
            })
            .collect())
    }

    async fn update_costs(&self, tenant_id: &str, updates: &[CostUpdate]) -> DbResult<u64> {
        let call = self.update_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_update_calls.lock().contains(&call) {
            return Err(DbError::Internal("injected write failure".into()));
        }

        let mut events = self.events.lock();
        let mut changed = 0;
        for update in updates {
            if let Some(e) = events
                .iter_mut()
                .find(|e| e.tenant_id == tenant_id && e.key() == update.key)
            {
                e.cost_total = update.cost_total;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn window_stats(&self, tenant_id: &str, range: TimeRange) -> DbResult<WindowStats> {
        let events = self.events.lock();
        let rows: Vec<&UsageEvent> = events
            .iter()
            .filter(|e| e.tenant_id == tenant_id && range.contains(e.timestamp))
            .collect();

        let n = rows.len() as i64;
        let mut latencies: Vec<i64> = rows.iter().map(|e| e.latency_ms).collect();
        latencies.sort_unstable();
        let pct = |p: f64| {
            if latencies.is_empty() {
                0.0
            } else {
                latencies[nearest_rank_offset(p, n) as usize] as f64
            }
        };

        Ok(WindowStats {
            request_count: n,
            total_cost: rows.iter().map(|e| e.cost_total).sum(),
            input_tokens: rows.iter().map(|e| e.usage_input_tokens).sum(),
            output_tokens: rows.iter().map(|e| e.usage_output_tokens).sum(),
            cached_tokens: rows.iter().map(|e| e.usage_cached_tokens).sum(),
            total_tokens: rows.iter().map(|e| e.total_tokens()).sum(),
            unique_traces: rows.iter().map(|e| &e.trace_id).collect::<HashSet<_>>().len() as i64,
            unique_users: rows
                .iter()
                .filter_map(|e| e.user_id.as_ref())
                .collect::<HashSet<_>>()
                .len() as i64,
            streaming_count: rows.iter().filter(|e| e.stream).count() as i64,
            tool_call_count: rows.iter().map(|e| i64::from(e.tool_call_count)).sum(),
            error_count: rows
                .iter()
                .filter(|e| e.finish_reason.as_deref() == Some("error"))
                .count() as i64,
            avg_latency_ms: if n == 0 {
                0.0
            } else {
                latencies.iter().sum::<i64>() as f64 / n as f64
            },
            p50_latency_ms: pct(0.5),
            p95_latency_ms: pct(0.95),
            p99_latency_ms: pct(0.99),
        })
    }
}

type RollupRows = BTreeMap<DateTime<Utc>, Vec<GroupAggregate>>;

/// Rollups materialized from a [`MemoryEventRepo`] on refresh.
pub struct MemoryRollupRepo {
    events: Arc<MemoryEventRepo>,
    rows: Mutex<HashMap<(String, RollupVariant), RollupRows>>,
    fail_fetch: AtomicBool,
    fail_refresh: Mutex<HashSet<RollupVariant>>,
    fetch_calls: AtomicUsize,
    refresh_calls: Mutex<Vec<(RollupVariant, TimeRange)>>,
}

impl MemoryRollupRepo {
    pub fn new(events: Arc<MemoryEventRepo>) -> Self {
        Self {
            events,
            rows: Mutex::new(HashMap::new()),
            fail_fetch: AtomicBool::new(false),
            fail_refresh: Mutex::new(HashSet::new()),
            fetch_calls: AtomicUsize::new(0),
            refresh_calls: Mutex::new(Vec::new()),
        }
    }

    pub fn set_fail_fetch(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    pub fn fail_refresh_for(&self, variant: RollupVariant) {
        self.fail_refresh.lock().insert(variant);
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> Vec<(RollupVariant, TimeRange)> {
        self.refresh_calls.lock().clone()
    }
}

#[async_trait]
impl RollupRepo for MemoryRollupRepo {
    async fn fetch(
        &self,
        tenant_id: &str,
        variant: RollupVariant,
        range: TimeRange,
    ) -> DbResult<Vec<GroupAggregate>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(DbError::Internal(format!("{} unavailable", variant.table_name())));
        }

        let rows = self.rows.lock();
        Ok(rows
            .get(&(tenant_id.to_string(), variant))
            .map(|buckets| {
                buckets
                    .range(range.start..range.end)
                    .flat_map(|(_, groups)| groups.iter().cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn refresh(
        &self,
        tenant_id: &str,
        variant: RollupVariant,
        range: TimeRange,
    ) -> DbResult<u64> {
        self.refresh_calls.lock().push((variant, range));
        if self.fail_refresh.lock().contains(&variant) {
            return Err(DbError::Internal(format!("{} refresh failed", variant.table_name())));
        }

        let days = covering_days(range);
        let grouping = variant.grouping();
        let mut written = 0;
        let mut rows = self.rows.lock();
        let buckets = rows.entry((tenant_id.to_string(), variant)).or_default();

        let mut day = days.start;
        while day < days.end {
            let next = day + chrono::Duration::days(1);
            let groups = self
                .events
                .aggregate_sync(tenant_id, &grouping, &[TimeRange::new(day, next)]);
            written += groups.len() as u64;
            if groups.is_empty() {
                buckets.remove(&day);
            } else {
                buckets.insert(day, groups);
            }
            day = next;
        }
        Ok(written)
    }
}

#[derive(Default)]
pub struct MemoryLeaseRepo {
    leases: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryLeaseRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn holder(&self, key: &str) -> Option<String> {
        self.leases.lock().get(key).map(|(holder, _)| holder.clone())
    }
}

#[async_trait]
impl LeaseRepo for MemoryLeaseRepo {
    async fn try_acquire(&self, key: &str, holder: &str, ttl: Duration) -> DbResult<bool> {
        let mut leases = self.leases.lock();
        let now = Instant::now();
        if let Some((current, expires)) = leases.get(key)
            && current != holder
            && *expires > now
        {
            return Ok(false);
        }
        leases.insert(key.to_string(), (holder.to_string(), now + ttl));
        Ok(true)
    }

    async fn release(&self, key: &str, holder: &str) -> DbResult<()> {
        let mut leases = self.leases.lock();
        if leases.get(key).is_some_and(|(current, _)| current == holder) {
            leases.remove(key);
        }
        Ok(())
    }
}
