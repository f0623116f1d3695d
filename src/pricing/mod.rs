//! Pricing lookup used to (re)compute event costs.
//!
//! Prices are USD per one million tokens. The lookup is served from an
//! in-memory [`PricingCache`] that only changes when [`PricingCache::refresh`]
//! is called; stale reads between refreshes are expected.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::db::{DbError, PricingRepo};

/// Provider key that matches any provider for a given model.
pub const ANY_PROVIDER: &str = "*";

/// Pricing for a single model.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ModelPricing {
    /// USD per 1M uncached input tokens
    #[serde(default)]
    pub input_per_1m: f64,

    /// USD per 1M output tokens
    #[serde(default)]
    pub output_per_1m: f64,

    /// USD per 1M cached input tokens. Cached tokens are billed at the input
    /// rate when this is unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_input_per_1m: Option<f64>,
}

impl ModelPricing {
    pub fn new(input_per_1m: f64, output_per_1m: f64) -> Self {
        Self {
            input_per_1m,
            output_per_1m,
            cached_input_per_1m: None,
        }
    }

    pub fn with_cached(mut self, cached_input_per_1m: f64) -> Self {
        self.cached_input_per_1m = Some(cached_input_per_1m);
        self
    }

    /// Compute the cost of one call.
    ///
    /// `cached_tokens` is a subset of `input_tokens`; it is clamped so a bad
    /// provider report can never produce a negative uncached count.
    pub fn compute(&self, input_tokens: i64, output_tokens: i64, cached_tokens: i64) -> CostBreakdown {
        let input_tokens = input_tokens.max(0);
        let cached = cached_tokens.clamp(0, input_tokens);
        let uncached = input_tokens - cached;

        let input = uncached as f64 * self.input_per_1m / 1_000_000.0;
        let cached = cached as f64 * self.cached_input_per_1m.unwrap_or(self.input_per_1m)
            / 1_000_000.0;
        let output = output_tokens.max(0) as f64 * self.output_per_1m / 1_000_000.0;

        CostBreakdown {
            input,
            cached,
            output,
            total: input + cached + output,
        }
    }
}

/// Cost of one call split by token class, in USD.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CostBreakdown {
    pub input: f64,
    pub cached: f64,
    pub output: f64,
    pub total: f64,
}

/// A catalog row as stored in the `model_pricing` table.
#[derive(Debug, Clone, PartialEq)]
pub struct PricingEntry {
    pub provider: String,
    pub model: String,
    pub pricing: ModelPricing,
}

/// Synchronous cost lookup.
pub trait PricingLookup: Send + Sync {
    /// Cost of a call, or `None` when no price is known for the model.
    fn cost(
        &self,
        model: &str,
        provider: &str,
        input_tokens: i64,
        output_tokens: i64,
        cached_tokens: i64,
    ) -> Option<CostBreakdown>;
}

/// Prices keyed by provider, then model.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PricingTable {
    models: HashMap<String, HashMap<String, ModelPricing>>,
}

impl PricingTable {
    pub fn from_entries(entries: impl IntoIterator<Item = PricingEntry>) -> Self {
        let mut table = Self::default();
        for entry in entries {
            table.set(&entry.provider, &entry.model, entry.pricing);
        }
        table
    }

    pub fn set(&mut self, provider: &str, model: &str, pricing: ModelPricing) {
        self.models
            .entry(provider.to_string())
            .or_default()
            .insert(model.to_string(), pricing);
    }

    /// Exact `(provider, model)` match first, then the provider wildcard.
    pub fn get(&self, provider: &str, model: &str) -> Option<&ModelPricing> {
        self.models
            .get(provider)
            .and_then(|models| models.get(model))
            .or_else(|| self.models.get(ANY_PROVIDER)?.get(model))
    }

    pub fn len(&self) -> usize {
        self.models.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PricingLookup for PricingTable {
    fn cost(
        &self,
        model: &str,
        provider: &str,
        input_tokens: i64,
        output_tokens: i64,
        cached_tokens: i64,
    ) -> Option<CostBreakdown> {
        self.get(provider, model)
            .map(|p| p.compute(input_tokens, output_tokens, cached_tokens))
    }
}

/// Where pricing is loaded from.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PricingSourceKind {
    /// The `[pricing.models]` table in the config file
    #[default]
    Config,
    /// The `model_pricing` table maintained by the catalog service
    Database,
}

/// `[pricing]` config section.
///
/// ```toml
/// [pricing]
/// source = "config"
///
/// [pricing.models.openai."gpt-4o"]
/// input_per_1m = 2.5
/// output_per_1m = 10.0
/// cached_input_per_1m = 1.25
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PricingConfig {
    #[serde(default)]
    pub source: PricingSourceKind,

    /// Pricing by provider and model: `models[provider][model]`
    #[serde(default)]
    pub models: HashMap<String, HashMap<String, ModelPricing>>,
}

impl PricingConfig {
    pub fn table(&self) -> PricingTable {
        PricingTable {
            models: self.models.clone(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PricingError {
    #[error("Failed to load pricing: {0}")]
    Database(#[from] DbError),
}

/// Produces a fresh pricing table on refresh.
#[async_trait]
pub trait PricingSource: Send + Sync {
    async fn load(&self) -> Result<PricingTable, PricingError>;
}

/// A fixed table, typically from the config file.
pub struct StaticPricingSource(PricingTable);

impl StaticPricingSource {
    pub fn new(table: PricingTable) -> Self {
        Self(table)
    }
}

#[async_trait]
impl PricingSource for StaticPricingSource {
    async fn load(&self) -> Result<PricingTable, PricingError> {
        Ok(self.0.clone())
    }
}

/// Reads the catalog's `model_pricing` table.
pub struct DbPricingSource {
    repo: Arc<dyn PricingRepo>,
}

impl DbPricingSource {
    pub fn new(repo: Arc<dyn PricingRepo>) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl PricingSource for DbPricingSource {
    async fn load(&self) -> Result<PricingTable, PricingError> {
        let entries = self.repo.list().await?;
        Ok(PricingTable::from_entries(entries))
    }
}

/// Read-mostly pricing cache shared by the query and recalculation paths.
pub struct PricingCache {
    source: Arc<dyn PricingSource>,
    table: RwLock<Arc<PricingTable>>,
}

impl PricingCache {
    /// Build a cache and populate it from `source`.
    pub async fn load(source: Arc<dyn PricingSource>) -> Result<Self, PricingError> {
        let table = source.load().await?;
        Ok(Self {
            source,
            table: RwLock::new(Arc::new(table)),
        })
    }

    /// A cache over a fixed table, refreshable back to the same table.
    pub fn from_table(table: PricingTable) -> Self {
        Self {
            source: Arc::new(StaticPricingSource::new(table.clone())),
            table: RwLock::new(Arc::new(table)),
        }
    }

    /// Reload from the source. On failure the previous table stays in place.
    /// Returns the number of priced models now cached.
    #[tracing::instrument(name = "pricing.refresh", skip(self))]
    pub async fn refresh(&self) -> Result<usize, PricingError> {
        let table = self.source.load().await?;
        let count = table.len();
        *self.table.write() = Arc::new(table);
        tracing::info!(models = count, "Pricing cache refreshed");
        Ok(count)
    }

    /// The current table. Holding the snapshot does not block refreshes.
    pub fn snapshot(&self) -> Arc<PricingTable> {
        self.table.read().clone()
    }
}

impl PricingLookup for PricingCache {
    fn cost(
        &self,
        model: &str,
        provider: &str,
        input_tokens: i64,
        output_tokens: i64,
        cached_tokens: i64,
    ) -> Option<CostBreakdown> {
        self.snapshot()
            .cost(model, provider, input_tokens, output_tokens, cached_tokens)
    }
}
