use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

use crate::db::{
    error::{DbError, DbResult},
    repos::LeaseRepo,
};

pub struct SqliteLeaseRepo {
    pool: SqlitePool,
}

impl SqliteLeaseRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LeaseRepo for SqliteLeaseRepo {
    async fn try_acquire(&self, key: &str, holder: &str, ttl: Duration) -> DbResult<bool> {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| DbError::Validation(format!("Invalid lease TTL: {e}")))?;

        // The conflicting row is only overwritten when it has expired or is
        // already ours; otherwise the upsert changes nothing.
        let result = sqlx::query(
            r#"
            INSERT INTO recalculation_leases (lease_key, holder, expires_at)
            VALUES (?, ?, ?)
            ON CONFLICT (lease_key) DO UPDATE
                SET holder = excluded.holder, expires_at = excluded.expires_at
                WHERE recalculation_leases.expires_at <= ?
                    OR recalculation_leases.holder = excluded.holder
            "#,
        )
        .bind(key)
        .bind(holder)
        .bind(now + ttl)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn release(&self, key: &str, holder: &str) -> DbResult<()> {
        sqlx::query("DELETE FROM recalculation_leases WHERE lease_key = ? AND holder = ?")
            .bind(key)
            .bind(holder)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
