//! Hybrid analytics over the event table and its daily rollups.
//!
//! Queries are split by [`window::partition`] into whole UTC days, served from
//! a rollup table when one matches the grouping, and the edge fragments, which
//! always come from raw events. [`merge`] recombines the pieces.

pub mod merge;
mod refresh;
mod router;
mod summary;
pub mod window;

use std::sync::Arc;

pub use refresh::*;
pub use router::*;
pub use summary::*;
use thiserror::Error;

use crate::{
    config::QueryConfig,
    db::{DbError, DbPool, EventRepo, RollupRepo},
};

#[derive(Debug, Error)]
pub enum AnalyticsError {
    /// Bad caller input. Never retried.
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Database(#[from] DbError),
}

impl AnalyticsError {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

/// Read side of the analytics engine plus explicit rollup maintenance.
#[derive(Clone)]
pub struct AnalyticsService {
    events: Arc<dyn EventRepo>,
    rollups: Arc<dyn RollupRepo>,
    config: QueryConfig,
}

impl AnalyticsService {
    pub fn new(events: Arc<dyn EventRepo>, rollups: Arc<dyn RollupRepo>, config: QueryConfig) -> Self {
        Self {
            events,
            rollups,
            config,
        }
    }

    pub fn from_db(db: &DbPool, config: QueryConfig) -> Self {
        Self::new(db.events(), db.rollups(), config)
    }

    pub fn config(&self) -> &QueryConfig {
        &self.config
    }
}
