use std::{collections::BTreeSet, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A column that analytics queries may group by.
///
/// The declaration order is the canonical column order used for group keys,
/// rollup table keys and the lexical tie-break.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupField {
    Model,
    Provider,
    Agent,
}

impl GroupField {
    pub const ALL: [GroupField; 3] = [GroupField::Model, GroupField::Provider, GroupField::Agent];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Model => "model",
            Self::Provider => "provider",
            Self::Agent => "agent",
        }
    }

    /// Column name in both the event table and the rollup tables.
    pub fn column(&self) -> &'static str {
        self.as_str()
    }
}

impl fmt::Display for GroupField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GroupField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "model" => Ok(Self::Model),
            "provider" => Ok(Self::Provider),
            "agent" => Ok(Self::Agent),
            other => Err(format!(
                "unsupported group_by field '{other}' (expected one of: model, provider, agent)"
            )),
        }
    }
}

/// The set of fields a query groups by, held in canonical order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Grouping(BTreeSet<GroupField>);

impl Grouping {
    pub fn new(fields: impl IntoIterator<Item = GroupField>) -> Self {
        Self(fields.into_iter().collect())
    }

    /// Parse a comma-separated list such as `"model,provider"`.
    ///
    /// Empty input yields the empty grouping (a single overall total).
    pub fn parse(input: &str) -> Result<Self, String> {
        input
            .split(',')
            .filter(|part| !part.trim().is_empty())
            .map(GroupField::from_str)
            .collect::<Result<BTreeSet<_>, _>>()
            .map(Self)
    }

    pub fn fields(&self) -> impl Iterator<Item = GroupField> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, field: GroupField) -> bool {
        self.0.contains(&field)
    }
}

impl fmt::Display for Grouping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.fields().map(|g| g.as_str()).collect();
        f.write_str(&names.join(","))
    }
}

/// Values of the grouped columns for one result group, in canonical field
/// order. `None` is a NULL column value and sorts before any string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupKey(pub Vec<Option<String>>);

/// A precomputed per-day rollup shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollupVariant {
    ByModel,
    ByModelProvider,
    ByAgent,
}

impl RollupVariant {
    pub const ALL: [RollupVariant; 3] = [
        RollupVariant::ByModel,
        RollupVariant::ByModelProvider,
        RollupVariant::ByAgent,
    ];

    pub fn table_name(&self) -> &'static str {
        match self {
            Self::ByModel => "usage_rollup_daily_model",
            Self::ByModelProvider => "usage_rollup_daily_model_provider",
            Self::ByAgent => "usage_rollup_daily_agent",
        }
    }

    pub fn grouping(&self) -> Grouping {
        match self {
            Self::ByModel => Grouping::new([GroupField::Model]),
            Self::ByModelProvider => Grouping::new([GroupField::Model, GroupField::Provider]),
            Self::ByAgent => Grouping::new([GroupField::Agent]),
        }
    }

    /// The variant whose key shape is exactly `grouping`, if any.
    pub fn for_grouping(grouping: &Grouping) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|variant| &variant.grouping() == grouping)
    }
}

impl fmt::Display for RollupVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table_name())
    }
}

/// One partial aggregate for a group, as produced by either a rollup bucket
/// or a raw-table range query.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupAggregate {
    pub key: GroupKey,
    pub request_count: i64,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub total_tokens: i64,
    pub total_cost: f64,
    /// Mean latency over `request_count` requests
    pub avg_latency_ms: f64,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
}

/// Which store served an analytics query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    /// Daily rollups for the full-day span, raw rows for the edges
    ContinuousAggregate,
    /// Raw event table only
    BaseTable,
}

impl DataSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ContinuousAggregate => "continuous_aggregate",
            Self::BaseTable => "base_table",
        }
    }
}

/// Totals for one time window, used by the period comparison.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WindowStats {
    pub request_count: i64,
    pub total_cost: f64,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cached_tokens: i64,
    pub total_tokens: i64,
    pub unique_traces: i64,
    pub unique_users: i64,
    pub streaming_count: i64,
    pub tool_call_count: i64,
    pub error_count: i64,
    pub avg_latency_ms: f64,
    pub p50_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub p99_latency_ms: f64,
}
