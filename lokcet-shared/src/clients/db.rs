use diesel::pg::PgConnection;
use diesel::r2d2::{ConnectionManager, Pool, PoolError};
use std::time::Duration;

pub type DbPool = Pool<ConnectionManager<PgConnection>>;

/// Pool backing the Postgres document store. Every connection is checked on
/// checkout since the store holds long-lived transactions during batches.
pub fn create_pool(database_url: &str, max_size: u32) -> Result<DbPool, PoolError> {
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    let pool = Pool::builder()
        .max_size(max_size.max(1))
        .min_idle(Some(max_size.clamp(1, 2)))
        .connection_timeout(Duration::from_secs(5))
        .test_on_check_out(true)
        .build(manager)?;

    tracing::info!(max_size, "document store pool created");
    Ok(pool)
}
