/// Shared Test Helpers for Cross-Crate Use
///
/// Centralized test utilities used across the workspace to avoid code
/// duplication in integration tests.
use sqlx::PgPool;
use std::error::Error;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

// Global counter for truly unique test identifiers across parallel tests
static GLOBAL_TEST_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Generate globally unique test identifiers that won't conflict across parallel tests
///
/// Combines timestamp + atomic counter so identifiers stay unique even when
/// tests run in parallel across multiple threads and crates.
pub fn generate_unique_id(prefix: &str) -> String {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis();
    let counter = GLOBAL_TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("{}-{}-{}", prefix, timestamp, counter)
}

/// Generate a unique numeric id for rows seeded by tests (user ids and the
/// like), safe across parallel test threads.
pub fn generate_unique_numeric_id() -> i64 {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64;
    let counter = GLOBAL_TEST_COUNTER.fetch_add(1, Ordering::SeqCst) as i64;
    timestamp * 1_000 + (counter % 1_000)
}

/// Database URL for integration tests.
///
/// Reads `DATABASE_URL`; tests that need a live store should skip themselves
/// when this returns `None` so the suite stays green on machines without
/// Postgres.
pub fn get_test_database_url() -> Option<String> {
    std::env::var("DATABASE_URL").ok()
}

/// Connect a pool against the test database.
pub async fn create_test_pool(database_url: &str) -> Result<PgPool, Box<dyn Error + Send + Sync>> {
    let pool = PgPool::connect(database_url).await?;
    Ok(pool)
}
