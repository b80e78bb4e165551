use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use super::AuthRepository;
use crate::error::Result;
use crate::record::AuthRecord;

type Row = (
    String,
    bool,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<i64>,
    Option<i64>,
    i64,
);

/// SQLite-backed repository (one row per organization).
#[derive(Clone)]
pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);
    const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

    /// Open (or create) the database at `path` and apply migrations.
    /// `":memory:"` gives an isolated in-memory database.
    pub async fn connect(path: &str) -> Result<Self> {
        let pool = if path == ":memory:" {
            // Every parse of `sqlite::memory:` names a fresh database.  The
            // single connection is pinned open so the data outlives idle
            // periods.
            let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .acquire_timeout(Self::ACQUIRE_TIMEOUT)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            if let Some(parent) = Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    if let Err(e) = std::fs::create_dir_all(parent) {
                        tracing::warn!(path = %parent.display(), error = %e, "failed to create database directory");
                    }
                }
            }
            let options = SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true);
            SqlitePoolOptions::new()
                .max_connections(5)
                .acquire_timeout(Self::ACQUIRE_TIMEOUT)
                .idle_timeout(Some(Self::IDLE_TIMEOUT))
                .connect_with(options)
                .await?
        };

        sqlx::migrate!("./migrations").run(&pool).await?;

        sqlx::query("PRAGMA journal_mode=WAL").execute(&pool).await?;
        sqlx::query("PRAGMA synchronous=NORMAL").execute(&pool).await?;

        tracing::info!(path = %path, "auth-state database ready");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn to_ts(at: DateTime<Utc>) -> i64 {
    at.timestamp()
}

fn from_ts(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

fn row_to_record(row: Row) -> AuthRecord {
    let (org, connected, identifier, creds, keys, last_conn, last_disc, updated) = row;
    AuthRecord {
        organization_id: org,
        is_connected: connected,
        connected_identifier: identifier,
        auth_credentials: creds,
        auth_keys: keys,
        last_connected_at: last_conn.map(from_ts),
        last_disconnected_at: last_disc.map(from_ts),
        updated_at: from_ts(updated),
    }
}

#[async_trait::async_trait]
impl AuthRepository for SqliteRepository {
    async fn fetch(&self, org_id: &str) -> Result<Option<AuthRecord>> {
        let row: Option<Row> = sqlx::query_as(
            r#"
            SELECT organization_id, is_connected, connected_identifier, auth_credentials,
                   auth_keys, last_connected_at, last_disconnected_at, updated_at
            FROM bridge_auth_state
            WHERE organization_id = ?
            "#,
        )
        .bind(org_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(row_to_record))
    }

    async fn replace_auth(&self, org_id: &str, credentials: &str, keys: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO bridge_auth_state
                (organization_id, is_connected, connected_identifier, auth_credentials, auth_keys, updated_at)
            VALUES (?, 0, NULL, ?, ?, ?)
            ON CONFLICT(organization_id) DO UPDATE SET
                is_connected = 0,
                connected_identifier = NULL,
                auth_credentials = excluded.auth_credentials,
                auth_keys = excluded.auth_keys,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(org_id)
        .bind(credentials)
        .bind(keys)
        .bind(to_ts(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save_credentials(&self, org_id: &str, credentials: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO bridge_auth_state (organization_id, auth_credentials, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(organization_id) DO UPDATE SET
                auth_credentials = excluded.auth_credentials,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(org_id)
        .bind(credentials)
        .bind(to_ts(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save_keys(&self, org_id: &str, keys: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO bridge_auth_state (organization_id, auth_keys, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(organization_id) DO UPDATE SET
                auth_keys = excluded.auth_keys,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(org_id)
        .bind(keys)
        .bind(to_ts(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_connected(
        &self,
        org_id: &str,
        identifier: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO bridge_auth_state
                (organization_id, is_connected, connected_identifier, last_connected_at, updated_at)
            VALUES (?, 1, ?, ?, ?)
            ON CONFLICT(organization_id) DO UPDATE SET
                is_connected = 1,
                connected_identifier = COALESCE(excluded.connected_identifier, connected_identifier),
                last_connected_at = excluded.last_connected_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(org_id)
        .bind(identifier)
        .bind(to_ts(at))
        .bind(to_ts(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_disconnected(&self, org_id: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO bridge_auth_state
                (organization_id, is_connected, last_disconnected_at, updated_at)
            VALUES (?, 0, ?, ?)
            ON CONFLICT(organization_id) DO UPDATE SET
                is_connected = 0,
                last_disconnected_at = excluded.last_disconnected_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(org_id)
        .bind(to_ts(at))
        .bind(to_ts(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_connected(&self) -> Result<Vec<String>> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT organization_id FROM bridge_auth_state WHERE is_connected = 1 ORDER BY organization_id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn delete(&self, org_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM bridge_auth_state WHERE organization_id = ?")
            .bind(org_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
