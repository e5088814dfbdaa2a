//! Versioned message store: domain types and the repository contract.
//!
//! The [`MessageStore`] trait is the only way the rest of the crate touches
//! durable state. Implementations must:
//!
//! - enforce uniqueness of [`RequestToken`] across every version of every
//!   message at the storage level (the [`MessageStore::find_by_token`]
//!   pre-check is only a fast path);
//! - apply publish-pointer updates as a single atomic write per message.
//!
//! [`sqlite::SqliteMessageStore`] is the production implementation.

pub mod sqlite;

use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::content::RenderedContent;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Store-assigned identifier of a logical message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Allocate a fresh identifier (UUID v4, simple hex form).
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for MessageId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for MessageId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Caller-supplied idempotency token identifying one submission.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestToken(String);

impl RequestToken {
    /// Wrap a raw token.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the token as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if the token is empty or whitespace only.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl From<&str> for RequestToken {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl fmt::Display for RequestToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a post on the remote platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteId(String);

impl RemoteId {
    /// Wrap a raw remote identifier.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RemoteId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Aggregate
// ---------------------------------------------------------------------------

/// One edit submission of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageVersion {
    /// Idempotency token of the submission that produced this version.
    pub client_request_token: RequestToken,
    /// Payload handed to the publisher.
    pub content: RenderedContent,
    /// Persistence time; non-decreasing along a message's version list.
    pub created_at: DateTime<Utc>,
}

/// A logical message: full edit history plus the publish pointer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Store-assigned identifier.
    pub id: MessageId,
    /// Remote post id, set after the first successful publish.
    pub remote_id: Option<RemoteId>,
    /// Token of the version last propagated to the remote platform.
    pub last_published_token: Option<RequestToken>,
    /// Edit history, oldest first. Never empty.
    pub versions: Vec<MessageVersion>,
    /// Creation time of the aggregate.
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// The most recent version, which is what the remote post should show.
    pub fn latest_version(&self) -> Option<&MessageVersion> {
        self.versions.last()
    }

    /// Returns `true` if the latest version has been propagated.
    pub fn is_up_to_date(&self) -> bool {
        match (self.latest_version(), &self.last_published_token) {
            (Some(latest), Some(published)) => &latest.client_request_token == published,
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from repository operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The message id does not resolve to a message.
    #[error("message not found: {0}")]
    NotFound(MessageId),

    /// The token is already used by some version of some message.
    #[error("duplicate client request token: {0}")]
    DuplicateToken(RequestToken),

    /// A publish pointer named a token that is not a version of the message.
    #[error("token {token} is not a version of message {id}")]
    UnknownVersion {
        /// Message being updated.
        id: MessageId,
        /// Offending token.
        token: RequestToken,
    },

    /// The operation did not finish within its time limit.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// Repository operation name.
        operation: &'static str,
        /// Configured limit.
        after: Duration,
    },

    /// Database operation failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Stored content could not be encoded or decoded.
    #[error("content encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// A stored timestamp could not be parsed.
    #[error("invalid timestamp {value:?}: {source}")]
    InvalidTimestamp {
        /// Raw stored value.
        value: String,
        /// Parse failure.
        source: chrono::ParseError,
    },
}

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

/// Durable storage of message versions and publish pointers.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Find the message owning a version with this token.
    async fn find_by_token(&self, token: &RequestToken) -> Result<Option<Message>, StoreError>;

    /// Create a message whose single initial version carries `token`.
    ///
    /// Fails with [`StoreError::DuplicateToken`] if the token exists anywhere.
    async fn create_message(
        &self,
        token: &RequestToken,
        content: &RenderedContent,
    ) -> Result<MessageId, StoreError>;

    /// Append a version to an existing message.
    ///
    /// Fails with [`StoreError::NotFound`] for an unknown id and with
    /// [`StoreError::DuplicateToken`] if the token exists on any message.
    async fn append_version(
        &self,
        id: &MessageId,
        token: &RequestToken,
        content: &RenderedContent,
    ) -> Result<(), StoreError>;

    /// Load a message with its full version history.
    async fn get_by_id(&self, id: &MessageId) -> Result<Option<Message>, StoreError>;

    /// Record the first successful publish: remote id and published token in
    /// one atomic write.
    async fn set_remote_id_and_last_published(
        &self,
        id: &MessageId,
        remote_id: &RemoteId,
        token: &RequestToken,
    ) -> Result<(), StoreError>;

    /// Record a successful update of an already published message.
    async fn set_last_published(
        &self,
        id: &MessageId,
        token: &RequestToken,
    ) -> Result<(), StoreError>;
}

/// Run a repository call under a time limit.
///
/// # Errors
///
/// Returns [`StoreError::Timeout`] if `fut` does not complete within `limit`,
/// otherwise whatever `fut` returns.
pub async fn bounded<T, F>(limit: Duration, operation: &'static str, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout {
            operation,
            after: limit,
        }),
    }
}
