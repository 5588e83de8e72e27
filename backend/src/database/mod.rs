//! Module for database connection setup and common utilities.
//!
//! This module initializes the SQLite connection pool, creates the schema and
//! hands out connections and transactions to the store functions in
//! [`queries`].

pub mod models;
pub mod queries;

use std::str::FromStr;

use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction};

use crate::config::DatabaseConfig;
use crate::errors::ServiceResult;

pub use queries::IdentityStore;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS identities (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        username      TEXT    NOT NULL UNIQUE,
        password_hash TEXT    NOT NULL,
        email         TEXT,
        phone_number  TEXT,
        mentor_id     INTEGER REFERENCES identities(id) ON DELETE SET NULL,
        created_at    INTEGER NOT NULL,
        CHECK (mentor_id IS NULL OR mentor_id <> id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_identities_mentor_id ON identities(mentor_id)",
    r#"
    CREATE TABLE IF NOT EXISTS revoked_tokens (
        token_id   TEXT    PRIMARY KEY,
        subject_id INTEGER NOT NULL,
        reason     TEXT    NOT NULL,
        revoked_at INTEGER NOT NULL,
        expires_at INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_revoked_tokens_expires_at ON revoked_tokens(expires_at)",
];

/// Shared handle to the connection pool. Cheap to clone.
#[derive(Clone, Debug)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens the pool and makes sure the schema exists.
    pub async fn connect(config: &DatabaseConfig) -> ServiceResult<Self> {
        let options = SqliteConnectOptions::from_str(&config.url)?
            .busy_timeout(config.busy_timeout())
            .foreign_keys(true);

        let mut pool_options = SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .acquire_timeout(config.acquire_timeout());

        // An in-memory database lives only as long as its connection.
        if config.url.contains(":memory:") {
            pool_options = pool_options.idle_timeout(None).max_lifetime(None);
        }

        let pool = pool_options.connect_with(options).await?;
        let database = Self { pool };
        database.migrate().await?;

        tracing::info!(url = %config.url, "database ready");
        Ok(database)
    }

    /// Creates tables and indexes if they do not exist yet.
    pub async fn migrate(&self) -> ServiceResult<()> {
        let mut conn = self.pool.acquire().await?;
        for statement in SCHEMA {
            sqlx::query(statement).execute(&mut *conn).await?;
        }
        Ok(())
    }

    pub async fn acquire(&self) -> ServiceResult<PoolConnection<Sqlite>> {
        Ok(self.pool.acquire().await?)
    }

    pub async fn begin(&self) -> ServiceResult<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
