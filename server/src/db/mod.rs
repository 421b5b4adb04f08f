pub mod models;
pub mod store_impl;

pub use store_impl::{PgStore, UserRepo};

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

pub async fn connect(database_url: &str) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new().max_connections(10).connect(database_url).await?;
    MIGRATOR.run(&pool).await.map_err(|e| sqlx::Error::Migrate(Box::new(e)))?;
    Ok(pool)
}

/// Shared migrator, also used by `#[sqlx::test(migrator = "reelqueue_server::db::MIGRATOR")]`
/// in the integration suite to provision an ephemeral test database.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
