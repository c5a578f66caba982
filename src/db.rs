use anyhow::{Context, Result};
use sqlx::{postgres::PgPoolOptions, Pool, Postgres};

use crate::config::Config;

pub type Db = Pool<Postgres>;

pub async fn connect(config: &Config) -> Result<Db> {
    let url = config
        .database_url
        .as_deref()
        .context("DATABASE_URL not set")?;
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(url)
        .await
        .context("connecting to postgres")?;
    // crate-relative path for sqlx migrations
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("running migrations")?;
    Ok(pool)
}
