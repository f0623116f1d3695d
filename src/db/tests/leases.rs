//! Shared tests for LeaseRepo implementations

use std::time::Duration;

use crate::db::repos::LeaseRepo;

const HOUR: Duration = Duration::from_secs(3600);

pub async fn test_acquire_free_key(repo: &dyn LeaseRepo) {
    assert!(repo.try_acquire("recalc:t1", "run-a", HOUR).await.unwrap());
}

pub async fn test_held_key_is_refused(repo: &dyn LeaseRepo) {
    assert!(repo.try_acquire("recalc:t1", "run-a", HOUR).await.unwrap());
    assert!(!repo.try_acquire("recalc:t1", "run-b", HOUR).await.unwrap());
    // Other keys are independent.
    assert!(repo.try_acquire("recalc:t2", "run-b", HOUR).await.unwrap());
}

pub async fn test_holder_can_renew(repo: &dyn LeaseRepo) {
    assert!(repo.try_acquire("recalc:t1", "run-a", HOUR).await.unwrap());
    assert!(repo.try_acquire("recalc:t1", "run-a", HOUR).await.unwrap());
}

pub async fn test_release_frees_key(repo: &dyn LeaseRepo) {
    assert!(repo.try_acquire("recalc:t1", "run-a", HOUR).await.unwrap());
    repo.release("recalc:t1", "run-a").await.unwrap();
    assert!(repo.try_acquire("recalc:t1", "run-b", HOUR).await.unwrap());
}

pub async fn test_release_by_other_holder_is_noop(repo: &dyn LeaseRepo) {
    assert!(repo.try_acquire("recalc:t1", "run-a", HOUR).await.unwrap());
    repo.release("recalc:t1", "run-b").await.unwrap();
    assert!(!repo.try_acquire("recalc:t1", "run-b", HOUR).await.unwrap());
}

pub async fn test_expired_lease_can_be_taken(repo: &dyn LeaseRepo) {
    assert!(
        repo.try_acquire("recalc:t1", "run-a", Duration::ZERO)
            .await
            .unwrap()
    );
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert!(repo.try_acquire("recalc:t1", "run-b", HOUR).await.unwrap());
}

// ============================================================================
// SQLite Tests - Fast, in-memory
// ============================================================================

#[cfg(all(test, feature = "database-sqlite"))]
mod sqlite_tests {
    use crate::db::{
        sqlite::SqliteLeaseRepo,
        tests::harness::migrated_sqlite_pool,
    };

    macro_rules! sqlite_test {
        ($name:ident) => {
            #[tokio::test]
            async fn $name() {
                let pool = migrated_sqlite_pool().await;
                let repo = SqliteLeaseRepo::new(pool);
                super::$name(&repo).await;
            }
        };
    }

    sqlite_test!(test_acquire_free_key);
    sqlite_test!(test_held_key_is_refused);
    sqlite_test!(test_holder_can_renew);
    sqlite_test!(test_release_frees_key);
    sqlite_test!(test_release_by_other_holder_is_noop);
    sqlite_test!(test_expired_lease_can_be_taken);
}

// ============================================================================
// PostgreSQL Tests - Require Docker, run with `cargo test -- --ignored`
// ============================================================================

#[cfg(all(test, feature = "database-postgres"))]
mod postgres_tests {
    use crate::db::{
        postgres::PostgresLeaseRepo,
        tests::harness::postgres::migrated_postgres_pool,
    };

    macro_rules! postgres_test {
        ($name:ident) => {
            #[tokio::test]
            #[ignore = "Requires Docker - run with `cargo test -- --ignored`"]
            async fn $name() {
                let pool = migrated_postgres_pool().await;
                let repo = PostgresLeaseRepo::new(pool);
                super::$name(&repo).await;
            }
        };
    }

    postgres_test!(test_acquire_free_key);
    postgres_test!(test_held_key_is_refused);
    postgres_test!(test_holder_can_renew);
    postgres_test!(test_release_frees_key);
    postgres_test!(test_release_by_other_holder_is_noop);
    postgres_test!(test_expired_lease_can_be_taken);
}
