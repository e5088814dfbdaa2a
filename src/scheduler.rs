//! Single-consumer publish scheduler.
//!
//! Producers enqueue message ids on a bounded [`mpsc`] channel and return
//! immediately; one background task drains the queue in order. For each id
//! the consumer re-reads the message, takes its **latest** version, and either
//! publishes it (no remote id yet) or updates the existing remote post, then
//! records the publish pointer.
//!
//! Because every run re-resolves the latest version, overlapping enqueues for
//! the same message collapse into idempotent work: the second run re-sends the
//! same winning content instead of an older one.
//!
//! Failures at any stage are logged and the unit is dropped. Nothing is
//! retried or re-queued.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::health::{readiness_gate, Readiness, ReadinessSignal};
use crate::publisher::{PublishError, Publisher};
use crate::store::{bounded, MessageId, MessageStore, RemoteId, RequestToken, StoreError};

/// Default work queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 50;

/// Runtime settings for [`PublishScheduler`].
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Bounded queue capacity; producers block when it is full.
    pub queue_capacity: usize,
    /// Time limit for each repository call made by the consumer.
    pub store_timeout: Duration,
    /// Time limit for each publisher call.
    pub publish_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            store_timeout: Duration::from_secs(5),
            publish_timeout: Duration::from_secs(15),
        }
    }
}

/// Errors returned to producers.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// The consumer loop is gone; nothing can be enqueued.
    #[error("publish scheduler has stopped")]
    Stopped,
}

/// Processing stage of one unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Reading the message from the store.
    Fetching,
    /// Creating the remote post.
    Publishing,
    /// Editing the existing remote post.
    Updating,
    /// Writing the publish pointer back to the store.
    Recording,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Fetching => "fetching",
            Self::Publishing => "publishing",
            Self::Updating => "updating",
            Self::Recording => "recording",
        })
    }
}

/// Why a unit of work was abandoned.
#[derive(Debug, thiserror::Error)]
pub enum WorkError {
    /// The enqueued id does not resolve to a message.
    #[error("message {0} not found")]
    MessageNotFound(MessageId),

    /// The message has no versions to publish.
    #[error("message {0} has no versions")]
    NoVersions(MessageId),

    /// A repository call failed.
    #[error("{stage} failed: {source}")]
    Store {
        /// Stage that failed.
        stage: Stage,
        /// Underlying error.
        #[source]
        source: StoreError,
    },

    /// A publisher call failed.
    #[error("{stage} failed: {source}")]
    Remote {
        /// Stage that failed.
        stage: Stage,
        /// Underlying error.
        #[source]
        source: PublishError,
    },
}

/// What a successful unit of work did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkOutcome {
    /// A new remote post was created.
    Published {
        /// Id of the new remote post.
        remote_id: RemoteId,
        /// Token of the version that was published.
        token: RequestToken,
    },
    /// The existing remote post was overwritten.
    Updated {
        /// Id of the edited remote post.
        remote_id: RemoteId,
        /// Token of the version that was published.
        token: RequestToken,
    },
}

// ---------------------------------------------------------------------------
// Outstanding-work counter
// ---------------------------------------------------------------------------

/// Wait-group style count of queued plus in-flight units.
#[derive(Debug)]
struct Outstanding {
    tx: watch::Sender<usize>,
}

impl Outstanding {
    fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self { tx }
    }

    fn increment(&self) {
        self.tx.send_modify(|n| *n = n.saturating_add(1));
    }

    fn decrement(&self) {
        self.tx.send_modify(|n| *n = n.saturating_sub(1));
    }

    fn count(&self) -> usize {
        *self.tx.borrow()
    }

    async fn wait_idle(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

/// Counts a unit from enqueue until it is handed to the channel; undone on
/// drop unless committed, so a cancelled `schedule` leaves the count intact.
struct Reservation<'a> {
    outstanding: &'a Outstanding,
    committed: bool,
}

impl<'a> Reservation<'a> {
    fn new(outstanding: &'a Outstanding) -> Self {
        outstanding.increment();
        Self {
            outstanding,
            committed: false,
        }
    }

    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.outstanding.decrement();
        }
    }
}

/// Decrements the counter when a unit finishes, whatever the outcome.
struct Completion<'a>(&'a Outstanding);

impl Drop for Completion<'_> {
    fn drop(&mut self) {
        self.0.decrement();
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Handle to the background publish pipeline.
pub struct PublishScheduler {
    tx: mpsc::Sender<MessageId>,
    outstanding: Arc<Outstanding>,
    readiness: Readiness,
    handle: JoinHandle<()>,
}

impl fmt::Debug for PublishScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublishScheduler")
            .field("outstanding", &self.outstanding.count())
            .field("ready", &self.readiness.is_ready())
            .finish_non_exhaustive()
    }
}

impl PublishScheduler {
    /// Spawn the consumer task and return a handle to it.
    ///
    /// The readiness gate flips to ready once the task starts running, not
    /// when this function returns. A zero capacity is raised to one.
    pub fn spawn(
        store: Arc<dyn MessageStore>,
        publisher: Arc<dyn Publisher>,
        config: SchedulerConfig,
    ) -> Self {
        let capacity = config.queue_capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let (signal, readiness) = readiness_gate();
        let outstanding = Arc::new(Outstanding::new());

        let worker = Worker {
            store,
            publisher,
            store_timeout: config.store_timeout,
            publish_timeout: config.publish_timeout,
        };
        let handle = tokio::spawn(run_consumer(worker, rx, signal, Arc::clone(&outstanding)));

        debug!(capacity, "publish scheduler spawned");

        Self {
            tx,
            outstanding,
            readiness,
            handle,
        }
    }

    /// Enqueue a message for publishing.
    ///
    /// Waits for queue space when the queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Stopped`] if the consumer loop has exited.
    pub async fn schedule(&self, id: MessageId) -> Result<(), SchedulerError> {
        info!(message_id = %id, "scheduling message");
        let reservation = Reservation::new(&self.outstanding);
        self.tx
            .send(id)
            .await
            .map_err(|_| SchedulerError::Stopped)?;
        reservation.commit();
        Ok(())
    }

    /// Read-only view of the readiness gate.
    pub fn readiness(&self) -> Readiness {
        self.readiness.clone()
    }

    /// Returns `true` while the consumer loop is running.
    pub fn is_ready(&self) -> bool {
        self.readiness.is_ready()
    }

    /// Units of work queued or in flight.
    pub fn outstanding(&self) -> usize {
        self.outstanding.count()
    }

    /// Wait until every enqueued unit has completed or failed.
    pub async fn wait_idle(&self) {
        self.outstanding.wait_idle().await;
    }

    /// Close the queue, let the consumer drain what is already queued, and
    /// wait for it to exit.
    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(err) = self.handle.await {
            error!(error = %err, "publish scheduler task failed");
        }
        info!("publish scheduler shut down");
    }
}

async fn run_consumer(
    worker: Worker,
    mut rx: mpsc::Receiver<MessageId>,
    signal: ReadinessSignal,
    outstanding: Arc<Outstanding>,
) {
    signal.mark_ready();
    info!("publish scheduler started");

    while let Some(id) = rx.recv().await {
        let _completion = Completion(&outstanding);
        debug!(message_id = %id, "processing message");

        match worker.process(&id).await {
            Ok(WorkOutcome::Published { remote_id, token }) => {
                info!(message_id = %id, remote_id = %remote_id, token = %token, "published new message");
            }
            Ok(WorkOutcome::Updated { remote_id, token }) => {
                info!(message_id = %id, remote_id = %remote_id, token = %token, "updated message");
            }
            Err(err) => {
                error!(message_id = %id, error = %err, "publish work abandoned");
            }
        }
    }

    signal.mark_stopped();
    info!("publish scheduler stopped");
}

// ---------------------------------------------------------------------------
// Unit of work
// ---------------------------------------------------------------------------

struct Worker {
    store: Arc<dyn MessageStore>,
    publisher: Arc<dyn Publisher>,
    store_timeout: Duration,
    publish_timeout: Duration,
}

impl Worker {
    async fn process(&self, id: &MessageId) -> Result<WorkOutcome, WorkError> {
        let message = bounded(self.store_timeout, "get_by_id", self.store.get_by_id(id))
            .await
            .map_err(|source| WorkError::Store {
                stage: Stage::Fetching,
                source,
            })?
            .ok_or_else(|| WorkError::MessageNotFound(id.clone()))?;

        // Always the latest version, whichever enqueue triggered this run.
        let version = message
            .latest_version()
            .ok_or_else(|| WorkError::NoVersions(id.clone()))?;
        let token = version.client_request_token.clone();

        match &message.remote_id {
            None => {
                let remote_id = self
                    .remote(Stage::Publishing, self.publisher.publish(&version.content))
                    .await?;

                let recorded = bounded(
                    self.store_timeout,
                    "set_remote_id_and_last_published",
                    self.store
                        .set_remote_id_and_last_published(id, &remote_id, &token),
                )
                .await;
                if let Err(source) = recorded {
                    warn!(
                        message_id = %id,
                        remote_id = %remote_id,
                        "remote post created but its id was not recorded"
                    );
                    return Err(WorkError::Store {
                        stage: Stage::Recording,
                        source,
                    });
                }

                Ok(WorkOutcome::Published { remote_id, token })
            }
            Some(remote_id) => {
                self.remote(
                    Stage::Updating,
                    self.publisher.update(remote_id, &version.content),
                )
                .await?;

                bounded(
                    self.store_timeout,
                    "set_last_published",
                    self.store.set_last_published(id, &token),
                )
                .await
                .map_err(|source| WorkError::Store {
                    stage: Stage::Recording,
                    source,
                })?;

                Ok(WorkOutcome::Updated {
                    remote_id: remote_id.clone(),
                    token,
                })
            }
        }
    }

    async fn remote<T, F>(&self, stage: Stage, fut: F) -> Result<T, WorkError>
    where
        F: Future<Output = Result<T, PublishError>>,
    {
        match tokio::time::timeout(self.publish_timeout, fut).await {
            Ok(result) => result.map_err(|source| WorkError::Remote { stage, source }),
            Err(_) => Err(WorkError::Remote {
                stage,
                source: PublishError::Timeout(self.publish_timeout),
            }),
        }
    }
}
