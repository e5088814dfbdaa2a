//! SQLite implementation of [`MessageStore`].
//!
//! Token uniqueness is enforced by the `UNIQUE` constraint on
//! `message_versions.client_request_token`; unique violations surface as
//! [`StoreError::DuplicateToken`]. The schema is applied inline via
//! `include_str!` on open.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{debug, trace};

use super::{
    Message, MessageId, MessageStore, MessageVersion, RemoteId, RequestToken, StoreError,
};
use crate::content::{Embed, RenderedContent};

/// Schema applied on every open; all statements are idempotent.
const SCHEMA_SQL: &str = include_str!("../../migrations/001_schema.sql");

/// Maximum pooled connections for file-backed databases.
const MAX_CONNECTIONS: u32 = 4;

/// Message store backed by a SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteMessageStore {
    pool: SqlitePool,
}

/// Raw `messages` row: id, remote_id, last_published_token, created_at.
type MessageRow = (String, Option<String>, Option<String>, String);

/// Raw `message_versions` row: token, text, embeds JSON, created_at.
type VersionRow = (String, String, String, String);

impl SqliteMessageStore {
    /// Open (or create) the database at `path` and apply the schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent directory cannot be created, the
    /// database cannot be opened, or the schema fails to apply.
    pub async fn open(path: &Path, busy_timeout: Duration) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create database directory {}", parent.display())
                })?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(busy_timeout)
            .pragma("trusted_schema", "OFF")
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to open message store at {}", path.display()))?;

        let store = Self::from_pool(pool).await?;
        debug!(path = %path.display(), "message store opened");
        Ok(store)
    }

    /// Open a private in-memory database.
    ///
    /// In-memory databases are per-connection, so the pool is limited to a
    /// single connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or schema migration fails.
    pub async fn in_memory() -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("failed to open in-memory message store")?;

        Self::from_pool(pool).await
    }

    /// Wrap an existing pool, applying the schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema migration fails.
    pub async fn from_pool(pool: SqlitePool) -> anyhow::Result<Self> {
        sqlx::raw_sql(SCHEMA_SQL)
            .execute(&pool)
            .await
            .context("failed to apply message store schema")?;
        Ok(Self { pool })
    }

    /// Returns a reference to the underlying SQLite pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Explain why a pointer update matched no row.
    async fn pointer_miss(&self, id: &MessageId, token: &RequestToken) -> StoreError {
        let exists: Result<Option<(i64,)>, sqlx::Error> =
            sqlx::query_as("SELECT 1 FROM messages WHERE id = ?1")
                .bind(id.as_str())
                .fetch_optional(&self.pool)
                .await;
        match exists {
            Ok(Some(_)) => StoreError::UnknownVersion {
                id: id.clone(),
                token: token.clone(),
            },
            Ok(None) => StoreError::NotFound(id.clone()),
            Err(err) => StoreError::Database(err),
        }
    }
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn find_by_token(&self, token: &RequestToken) -> Result<Option<Message>, StoreError> {
        let owner: Option<(String,)> = sqlx::query_as(
            "SELECT message_id FROM message_versions WHERE client_request_token = ?1",
        )
        .bind(token.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match owner {
            Some((message_id,)) => self.get_by_id(&MessageId::from(message_id)).await,
            None => Ok(None),
        }
    }

    async fn create_message(
        &self,
        token: &RequestToken,
        content: &RenderedContent,
    ) -> Result<MessageId, StoreError> {
        let id = MessageId::generate();
        let now = format_timestamp(Utc::now());
        let embeds = serde_json::to_string(&content.embeds)?;

        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT INTO messages (id, created_at) VALUES (?1, ?2)")
            .bind(id.as_str())
            .bind(&now)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "INSERT INTO message_versions \
             (message_id, client_request_token, content_text, embeds, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(id.as_str())
        .bind(token.as_str())
        .bind(&content.text)
        .bind(&embeds)
        .bind(&now)
        .execute(&mut *tx)
        .await
        .map_err(|err| duplicate_or_database(err, token))?;

        tx.commit().await?;

        trace!(message_id = %id, token = %token, "message created");
        Ok(id)
    }

    async fn append_version(
        &self,
        id: &MessageId,
        token: &RequestToken,
        content: &RenderedContent,
    ) -> Result<(), StoreError> {
        let now = format_timestamp(Utc::now());
        let embeds = serde_json::to_string(&content.embeds)?;

        // Existence check, timestamp clamp and insert in one statement.
        let result = sqlx::query(
            "INSERT INTO message_versions \
             (message_id, client_request_token, content_text, embeds, created_at) \
             SELECT ?1, ?2, ?3, ?4, \
                    MAX(?5, COALESCE((SELECT MAX(created_at) FROM message_versions \
                                      WHERE message_id = ?1), '')) \
             WHERE EXISTS (SELECT 1 FROM messages WHERE id = ?1)",
        )
        .bind(id.as_str())
        .bind(token.as_str())
        .bind(&content.text)
        .bind(&embeds)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|err| duplicate_or_database(err, token))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.clone()));
        }

        trace!(message_id = %id, token = %token, "version appended");
        Ok(())
    }

    async fn get_by_id(&self, id: &MessageId) -> Result<Option<Message>, StoreError> {
        // One read transaction so the aggregate comes from a single snapshot.
        let mut tx = self.pool.begin().await?;

        let row: Option<MessageRow> = sqlx::query_as(
            "SELECT id, remote_id, last_published_token, created_at \
             FROM messages WHERE id = ?1",
        )
        .bind(id.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let Some((message_id, remote_id, last_published_token, created_at)) = row else {
            return Ok(None);
        };

        let version_rows: Vec<VersionRow> = sqlx::query_as(
            "SELECT client_request_token, content_text, embeds, created_at \
             FROM message_versions \
             WHERE message_id = ?1 \
             ORDER BY seq ASC",
        )
        .bind(id.as_str())
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        let versions = version_rows
            .into_iter()
            .map(decode_version)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(Message {
            id: MessageId::from(message_id),
            remote_id: remote_id.map(RemoteId::new),
            last_published_token: last_published_token.map(RequestToken::new),
            versions,
            created_at: parse_timestamp(created_at)?,
        }))
    }

    async fn set_remote_id_and_last_published(
        &self,
        id: &MessageId,
        remote_id: &RemoteId,
        token: &RequestToken,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE messages SET remote_id = ?2, last_published_token = ?3 \
             WHERE id = ?1 AND EXISTS (SELECT 1 FROM message_versions \
                                       WHERE message_id = ?1 AND client_request_token = ?3)",
        )
        .bind(id.as_str())
        .bind(remote_id.as_str())
        .bind(token.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.pointer_miss(id, token).await);
        }

        trace!(message_id = %id, remote_id = %remote_id, token = %token, "publish pointer set");
        Ok(())
    }

    async fn set_last_published(
        &self,
        id: &MessageId,
        token: &RequestToken,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE messages SET last_published_token = ?2 \
             WHERE id = ?1 AND EXISTS (SELECT 1 FROM message_versions \
                                       WHERE message_id = ?1 AND client_request_token = ?2)",
        )
        .bind(id.as_str())
        .bind(token.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.pointer_miss(id, token).await);
        }

        trace!(message_id = %id, token = %token, "last published token advanced");
        Ok(())
    }
}

/// Map a unique-constraint violation to [`StoreError::DuplicateToken`].
fn duplicate_or_database(err: sqlx::Error, token: &RequestToken) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return StoreError::DuplicateToken(token.clone());
        }
    }
    StoreError::Database(err)
}

fn decode_version(row: VersionRow) -> Result<MessageVersion, StoreError> {
    let (token, text, embeds, created_at) = row;
    let embeds: Vec<Embed> = serde_json::from_str(&embeds)?;
    Ok(MessageVersion {
        client_request_token: RequestToken::new(token),
        content: RenderedContent { text, embeds },
        created_at: parse_timestamp(created_at)?,
    })
}

/// Fixed-width RFC 3339 so stored timestamps compare correctly as text.
fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: String) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(&value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|source| StoreError::InvalidTimestamp { value, source })
}
