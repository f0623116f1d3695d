//! Shared repository tests
//!
//! Each module holds backend-agnostic test functions that take `&dyn XxxRepo`
//! plus two runners:
//!
//! - **SQLite**: in-memory databases with real migrations, run with every `cargo test`
//! - **PostgreSQL**: testcontainers instances, run with `cargo test -- --ignored`
//!
//! ```bash
//! cargo test                       # Run fast SQLite tests only
//! cargo test -- --ignored          # Run PostgreSQL integration tests (requires Docker)
//! cargo test -- --include-ignored  # Run all tests
//! ```

pub mod harness;
mod leases;
