use std::time::Duration;

use async_trait::async_trait;

use crate::db::error::DbResult;

/// Advisory leases that keep two long-running jobs off the same key.
///
/// A lease expires after its TTL so a crashed holder cannot block the key
/// forever.
#[async_trait]
pub trait LeaseRepo: Send + Sync {
    /// Take `key` for `holder` unless someone else holds an unexpired lease.
    /// Returns `true` when the lease was acquired.
    async fn try_acquire(&self, key: &str, holder: &str, ttl: Duration) -> DbResult<bool>;

    /// Drop the lease if `holder` still owns it.
    async fn release(&self, key: &str, holder: &str) -> DbResult<()>;
}
