//! Remote-platform publish capability.
//!
//! The scheduler only sees the [`Publisher`] trait: one call creates a remote
//! post, the other overwrites it. Both are single attempts with no retry.
//!
//! [`discord::DiscordPublisher`] is the Discord REST implementation.

pub mod discord;

use async_trait::async_trait;

use crate::content::RenderedContent;
use crate::store::RemoteId;

/// Errors from remote publish/update calls.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// The platform answered with a non-success status.
    #[error("remote API error (status {status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The create response did not carry a message id.
    #[error("remote response did not include a message id")]
    MissingId,

    /// The call did not finish within its time limit.
    #[error("remote call timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Create or edit a post on the remote platform.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Create a new remote post and return its id.
    async fn publish(&self, content: &RenderedContent) -> Result<RemoteId, PublishError>;

    /// Overwrite an existing remote post with `content`.
    async fn update(&self, remote_id: &RemoteId, content: &RenderedContent)
        -> Result<(), PublishError>;
}
