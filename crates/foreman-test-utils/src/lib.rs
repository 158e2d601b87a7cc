//! Shared test utilities for foreman integration tests.
//!
//! Each test gets its own file-backed SQLite database inside a `TempDir`,
//! with all migrations applied. Keep the returned `TempDir` alive for the
//! duration of the test; dropping it deletes the database.

use sqlx::SqlitePool;
use tempfile::TempDir;

use foreman_db::config::DbConfig;
use foreman_db::pool;

/// Create a temporary database with migrations applied.
///
/// Returns `(pool, dir)`. The pool points at a `foreman-test.db` file
/// inside `dir`; the database disappears when `dir` is dropped.
pub async fn create_test_db() -> (SqlitePool, TempDir) {
    let dir = TempDir::new().expect("failed to create temp dir for test database");
    let db_path = dir.path().join("foreman-test.db");
    let config = DbConfig::new(format!("sqlite://{}", db_path.display()));

    let db_pool = pool::create_pool(&config)
        .await
        .expect("failed to open test database");

    pool::run_migrations(&db_pool, pool::default_migrations_path())
        .await
        .expect("migrations should succeed");

    (db_pool, dir)
}
