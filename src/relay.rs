//! Request-facing core API.
//!
//! [`MessageRelay`] is what transport code calls. It owns the publish
//! scheduler and exposes the two idempotent entry points:
//!
//! - [`MessageRelay::create`]: a repeated token returns the original id
//!   without writing or enqueueing anything;
//! - [`MessageRelay::append_version`]: a repeated token is rejected.
//!
//! Both return as soon as the store write and the enqueue are done; remote
//! propagation happens later on the scheduler task.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::content::RenderedContent;
use crate::health::{HealthReport, HealthStatus, Readiness};
use crate::publisher::Publisher;
use crate::scheduler::{PublishScheduler, SchedulerConfig, SchedulerError};
use crate::store::{bounded, Message, MessageId, MessageStore, RequestToken, StoreError};

/// Errors surfaced to callers of the core API.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The request is malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// No message has this id.
    #[error("message not found: {0}")]
    NotFound(MessageId),

    /// The token was already used for another submission.
    #[error("client request token already used: {0}")]
    DuplicateToken(RequestToken),

    /// Infrastructure failure in the store.
    #[error(transparent)]
    Store(StoreError),

    /// The scheduler refused the work.
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

impl From<StoreError> for RelayError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => Self::NotFound(id),
            StoreError::DuplicateToken(token) => Self::DuplicateToken(token),
            other => Self::Store(other),
        }
    }
}

/// Core entry points: versioned writes plus asynchronous publishing.
pub struct MessageRelay {
    store: Arc<dyn MessageStore>,
    scheduler: PublishScheduler,
    store_timeout: Duration,
}

impl std::fmt::Debug for MessageRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageRelay")
            .field("scheduler", &self.scheduler)
            .field("store_timeout", &self.store_timeout)
            .finish_non_exhaustive()
    }
}

impl MessageRelay {
    /// Build the relay and spawn its publish scheduler.
    pub fn new(
        store: Arc<dyn MessageStore>,
        publisher: Arc<dyn Publisher>,
        config: SchedulerConfig,
    ) -> Self {
        let store_timeout = config.store_timeout;
        let scheduler = PublishScheduler::spawn(Arc::clone(&store), publisher, config);
        Self {
            store,
            scheduler,
            store_timeout,
        }
    }

    /// Create a message, or return the existing one for a repeated token.
    ///
    /// # Errors
    ///
    /// - [`RelayError::InvalidArgument`] for a blank token or invalid content;
    /// - [`RelayError::Store`] / [`RelayError::Scheduler`] on infrastructure
    ///   failure.
    pub async fn create(
        &self,
        token: &RequestToken,
        content: &RenderedContent,
    ) -> Result<MessageId, RelayError> {
        if token.is_blank() {
            return Err(RelayError::InvalidArgument(
                "client request token is required".to_owned(),
            ));
        }

        if let Some(existing) = self.find_by_token(token).await? {
            info!(message_id = %existing.id, token = %token, "message already exists");
            return Ok(existing.id);
        }

        content
            .validate()
            .map_err(|err| RelayError::InvalidArgument(err.to_string()))?;

        let created = bounded(
            self.store_timeout,
            "create_message",
            self.store.create_message(token, content),
        )
        .await;

        let id = match created {
            Ok(id) => id,
            Err(StoreError::DuplicateToken(_)) => {
                // A concurrent create with the same token won the insert.
                return match self.find_by_token(token).await? {
                    Some(winner) => {
                        debug!(message_id = %winner.id, token = %token, "lost create race");
                        Ok(winner.id)
                    }
                    None => Err(RelayError::DuplicateToken(token.clone())),
                };
            }
            Err(err) => return Err(err.into()),
        };

        self.scheduler.schedule(id.clone()).await?;

        info!(message_id = %id, token = %token, "message written");
        Ok(id)
    }

    /// Append a new version to an existing message and schedule publishing.
    ///
    /// # Errors
    ///
    /// - [`RelayError::InvalidArgument`] for a blank id/token or invalid content;
    /// - [`RelayError::NotFound`] if the message does not exist;
    /// - [`RelayError::DuplicateToken`] if the token was used before, on any
    ///   message;
    /// - [`RelayError::Store`] / [`RelayError::Scheduler`] on infrastructure
    ///   failure.
    pub async fn append_version(
        &self,
        id: &MessageId,
        token: &RequestToken,
        content: &RenderedContent,
    ) -> Result<(), RelayError> {
        if id.as_str().trim().is_empty() {
            return Err(RelayError::InvalidArgument("message id is required".to_owned()));
        }
        if token.is_blank() {
            return Err(RelayError::InvalidArgument(
                "client request token is required".to_owned(),
            ));
        }
        content
            .validate()
            .map_err(|err| RelayError::InvalidArgument(err.to_string()))?;

        let appended = bounded(
            self.store_timeout,
            "append_version",
            self.store.append_version(id, token, content),
        )
        .await;
        if let Err(err) = appended {
            match &err {
                StoreError::NotFound(_) | StoreError::DuplicateToken(_) => {
                    warn!(message_id = %id, token = %token, error = %err, "update rejected");
                }
                _ => {}
            }
            return Err(err.into());
        }

        self.scheduler.schedule(id.clone()).await?;

        info!(message_id = %id, token = %token, "message version written");
        Ok(())
    }

    /// Load a message with its full history.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Store`] on infrastructure failure.
    pub async fn get(&self, id: &MessageId) -> Result<Option<Message>, RelayError> {
        Ok(bounded(self.store_timeout, "get_by_id", self.store.get_by_id(id)).await?)
    }

    /// Read-only view of the scheduler's readiness gate.
    pub fn readiness(&self) -> Readiness {
        self.scheduler.readiness()
    }

    /// Current health snapshot.
    pub fn health(&self) -> HealthReport {
        HealthReport {
            status: HealthStatus::from_readiness(&self.scheduler.readiness()),
            outstanding: self.scheduler.outstanding(),
        }
    }

    /// Wait until all scheduled publish work has finished.
    pub async fn wait_idle(&self) {
        self.scheduler.wait_idle().await;
    }

    /// Drain queued work and stop the scheduler.
    pub async fn shutdown(self) {
        self.scheduler.shutdown().await;
    }

    async fn find_by_token(&self, token: &RequestToken) -> Result<Option<Message>, RelayError> {
        Ok(bounded(self.store_timeout, "find_by_token", self.store.find_by_token(token)).await?)
    }
}
