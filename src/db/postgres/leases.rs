use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;

use crate::db::{
    error::{DbError, DbResult},
    repos::LeaseRepo,
};

pub struct PostgresLeaseRepo {
    write_pool: PgPool,
}

impl PostgresLeaseRepo {
    pub fn new(write_pool: PgPool) -> Self {
        Self { write_pool }
    }
}

#[async_trait]
impl LeaseRepo for PostgresLeaseRepo {
    async fn try_acquire(&self, key: &str, holder: &str, ttl: Duration) -> DbResult<bool> {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| DbError::Validation(format!("Invalid lease TTL: {e}")))?;

        let result = sqlx::query(
            r#"
            INSERT INTO recalculation_leases (lease_key, holder, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (lease_key) DO UPDATE
                SET holder = EXCLUDED.holder, expires_at = EXCLUDED.expires_at
                WHERE recalculation_leases.expires_at <= $4
                    OR recalculation_leases.holder = EXCLUDED.holder
            "#,
        )
        .bind(key)
        .bind(holder)
        .bind(now + ttl)
        .bind(now)
        .execute(&self.write_pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn release(&self, key: &str, holder: &str) -> DbResult<()> {
        sqlx::query("DELETE FROM recalculation_leases WHERE lease_key = $1 AND holder = $2")
            .bind(key)
            .bind(holder)
            .execute(&self.write_pool)
            .await?;
        Ok(())
    }
}
