//! Database bootstrap: create the database if missing, open the pool, create entity tables.

use crate::config::DatabaseSettings;
use crate::entity::Entity;
use crate::error::{AppError, ConfigError, StoreError};
use crate::sql::{create_table, quoted};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{ConnectOptions, PgPool};
use std::str::FromStr;

/// Connect to the `postgres` maintenance database on the same server and create the database
/// named in `database_url` if it does not exist. A URL naming `postgres` itself, or naming no
/// database, is left alone.
pub async fn ensure_database_exists(database_url: &str) -> Result<(), AppError> {
    let (admin, db_name) = maintenance_target(database_url)?;
    let Some(db_name) = db_name.filter(|n| !n.is_empty() && n != "postgres") else {
        return Ok(());
    };
    let mut conn = admin.connect().await?;
    let exists: (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
        .bind(&db_name)
        .fetch_one(&mut conn)
        .await?;
    if !exists.0 {
        sqlx::query(&format!("CREATE DATABASE {}", quoted(&db_name)))
            .execute(&mut conn)
            .await?;
        tracing::info!(database = %db_name, "database created");
    }
    Ok(())
}

fn invalid_url(url: &str) -> AppError {
    AppError::Config(ConfigError::Invalid {
        key: "DATABASE_URL",
        value: url.to_string(),
    })
}

/// Options for the `postgres` database on the same server (credentials, host and query
/// options kept), plus the database name the URL targets.
fn maintenance_target(url: &str) -> Result<(PgConnectOptions, Option<String>), AppError> {
    let opts = PgConnectOptions::from_str(url).map_err(|_| invalid_url(url))?;
    let db_name = opts.get_database().map(|n| n.trim().to_string());
    Ok((opts.database("postgres"), db_name))
}

/// Ensure the database exists, then open a pool sized per settings.
pub async fn connect(settings: &DatabaseSettings) -> Result<PgPool, AppError> {
    ensure_database_exists(&settings.url).await?;
    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .connect(&settings.url)
        .await?;
    Ok(pool)
}

/// Create the entity's schema and table when missing. Existing tables are not altered.
pub async fn ensure_table<E: Entity>(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", quoted(E::SCHEMA)))
        .execute(pool)
        .await?;
    sqlx::query(&create_table::<E>()).execute(pool).await?;
    tracing::debug!(table = E::TABLE, schema = E::SCHEMA, "table ensured");
    Ok(())
}
