//! Partition source: delivers id-range partitions of a table at least once
//!
//! # Lifecycle
//!
//! [`PartitionSource::start`] plans the partitions, bootstraps the checkpoint
//! (write if absent, then read back) and spawns two background tasks:
//!
//! - a seeder pushing every incomplete partition, then one [`WorkItem::Done`],
//!   onto the bounded work queue
//! - the [`CommitLoop`], which receives acknowledged partitions and persists
//!   the shrinking completion map
//!
//! The host pulls with `read_batch`, processes each partition, and calls `ack`
//! or `retry`. When the terminal item is the only thing left, the source
//! reports itself drained and the host calls `close`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::checkpoint::CheckpointLog;
use crate::commit::CommitLoop;
use crate::config::SourceConfig;
use crate::error::{ConnectorError, Result};
use crate::partitioner::plan_partitions;
use crate::pipeline::Pipeline;
use crate::pool::ConnectionPool;
use crate::query::QueryBuilder;
use crate::tracker::PendingWorkTracker;
use crate::types::{CompletionMap, MessageId, Partition, PendingMessage, WorkItem};

/// What the task runtime hands a source: identity, settings, checkpoint store
#[derive(Clone)]
pub struct TaskContext {
    pub task_id: String,
    pub source: SourceConfig,
    pub checkpoint_log: Arc<dyn CheckpointLog>,
}

impl TaskContext {
    pub fn new(
        task_id: impl Into<String>,
        source: SourceConfig,
        checkpoint_log: Arc<dyn CheckpointLog>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            source,
            checkpoint_log,
        }
    }
}

impl std::fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskContext")
            .field("task_id", &self.task_id)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

pub struct PartitionSource {
    task_id: String,
    config: SourceConfig,
    pool: Arc<dyn ConnectionPool>,
    tracker: PendingWorkTracker,
    work_tx: mpsc::Sender<WorkItem>,
    work_rx: tokio::sync::Mutex<mpsc::Receiver<WorkItem>>,
    /// Dropped on close; the commit loop stops once every clone is gone
    ack_tx: Mutex<Option<mpsc::Sender<Partition>>>,
    seeder: Mutex<Option<JoinHandle<Result<()>>>>,
    seed_failure: Mutex<Option<String>>,
    commit_loop: tokio::sync::Mutex<Option<CommitLoop>>,
    drained: AtomicBool,
    closed: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl PartitionSource {
    /// Plan, bootstrap the checkpoint, and begin seeding the work queue
    pub async fn start(
        context: TaskContext,
        pool: Arc<dyn ConnectionPool>,
        builder: Arc<dyn QueryBuilder>,
    ) -> Result<Self> {
        let TaskContext {
            task_id,
            source: config,
            checkpoint_log,
        } = context;
        config.validate()?;

        info!(
            task_id = %task_id,
            table = %config.table,
            id_column = %config.id_column,
            rows_per_partition = config.rows_per_partition,
            "Starting partition source"
        );

        let partitions = plan_partitions(&config, pool.as_ref(), builder.as_ref())
            .await
            .map_err(|e| e.during_init("planning partitions"))?;
        let planned = partitions.len();

        let created = checkpoint_log
            .write_if_absent(&task_id, &CompletionMap::from_partitions(partitions))
            .await
            .map_err(|e| e.during_init("initializing checkpoint"))?;
        let completion = checkpoint_log
            .read(&task_id)
            .await
            .map_err(|e| e.during_init("reading checkpoint"))?
            .ok_or_else(|| {
                ConnectorError::init(format!(
                    "checkpoint for task '{}' missing after initialization",
                    task_id
                ))
            })?;

        if created {
            info!(task_id = %task_id, partitions = planned, "Created checkpoint");
        } else {
            info!(
                task_id = %task_id,
                planned,
                remaining = completion.len(),
                "Resuming from existing checkpoint"
            );
        }

        let items: Vec<WorkItem> = completion
            .incomplete()
            .cloned()
            .map(WorkItem::Partition)
            .chain(std::iter::once(WorkItem::Done))
            .collect();

        let (work_tx, work_rx) = mpsc::channel(config.work_buffer_size);
        let (ack_tx, ack_rx) = mpsc::channel(config.ack_buffer_size);

        let commit_loop = CommitLoop::spawn(
            task_id.clone(),
            completion,
            checkpoint_log,
            ack_rx,
            config.checkpoint_interval(),
        );
        let seeder = tokio::spawn(seed(task_id.clone(), items, work_tx.clone()));

        Ok(Self {
            task_id,
            config,
            pool,
            tracker: PendingWorkTracker::new(),
            work_tx,
            work_rx: tokio::sync::Mutex::new(work_rx),
            ack_tx: Mutex::new(Some(ack_tx)),
            seeder: Mutex::new(Some(seeder)),
            seed_failure: Mutex::new(None),
            commit_loop: tokio::sync::Mutex::new(Some(commit_loop)),
            drained: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Pull up to `max_items` work items, bounded by the pending and batch limits
    ///
    /// A pull that times out ends the batch early; an empty batch is not an
    /// error.
    pub async fn read_batch(&self, max_items: usize) -> Result<Vec<PendingMessage>> {
        self.ensure_open()?;
        self.check_seeder().await?;

        // Capacity is computed under the receiver lock so concurrent reads
        // see each other's inserts
        let mut work_rx = self.work_rx.lock().await;
        let available = self
            .config
            .max_pending
            .saturating_sub(self.tracker.len())
            .min(self.config.batch_size)
            .min(max_items);

        let mut batch = Vec::with_capacity(available);
        while batch.len() < available && self.tracker.len() < self.config.max_pending {
            match timeout(self.config.pull_timeout(), work_rx.recv()).await {
                Ok(Some(item)) => {
                    let id = MessageId::new();
                    self.tracker.insert(id, item.clone());
                    batch.push(PendingMessage { id, item });
                }
                Ok(None) | Err(_) => break,
            }
        }

        let queue_empty = work_rx.is_empty();
        drop(work_rx);

        let only_done_left = batch.len() == 1
            && batch[0].item.is_done()
            && queue_empty
            && self.tracker.sole_item().is_some_and(|item| item.is_done());
        if only_done_left && !self.drained.swap(true, Ordering::SeqCst) {
            info!(task_id = %self.task_id, "All partitions delivered and acknowledged");
        }

        if !batch.is_empty() {
            debug!(
                task_id = %self.task_id,
                pulled = batch.len(),
                pending = self.tracker.len(),
                "Read batch"
            );
        }

        Ok(batch)
    }

    /// Acknowledge a pulled item; its partition is forwarded to the commit loop
    ///
    /// Returns `Ok(false)` if `id` is not pending. If the commit loop does not
    /// accept the partition within the ack timeout the item stays pending and
    /// [`ConnectorError::AckTimeout`] is returned so the host can ack again.
    pub async fn ack(&self, id: &MessageId) -> Result<bool> {
        let Some(item) = self.tracker.remove(id) else {
            return Ok(false);
        };

        let WorkItem::Partition(partition) = &item else {
            debug!(task_id = %self.task_id, message_id = %id, "Terminal item acknowledged");
            return Ok(true);
        };

        let sender = lock(&self.ack_tx).clone();
        let Some(sender) = sender else {
            self.tracker.insert(*id, item);
            return Err(ConnectorError::Closed(format!("cannot ack {} after close", id)));
        };

        match timeout(self.config.ack_timeout(), sender.send(partition.clone())).await {
            Ok(Ok(())) => {
                debug!(task_id = %self.task_id, message_id = %id, partition = %partition, "Acknowledged");
                Ok(true)
            }
            Ok(Err(_)) => {
                self.tracker.insert(*id, item);
                Err(ConnectorError::Closed("commit loop is no longer running".to_string()))
            }
            Err(_) => {
                warn!(task_id = %self.task_id, message_id = %id, partition = %partition, "Acknowledgement timed out");
                self.tracker.insert(*id, item);
                Err(ConnectorError::AckTimeout(id.to_string()))
            }
        }
    }

    /// Put a pulled item back on the work queue for redelivery
    ///
    /// The terminal item is re-enqueued like any partition. If the queue stays
    /// full for the ack timeout the item stays pending and
    /// [`ConnectorError::QueueFull`] is returned.
    pub async fn retry(&self, id: &MessageId) -> Result<bool> {
        let Some(item) = self.tracker.remove(id) else {
            return Ok(false);
        };

        match timeout(self.config.ack_timeout(), self.work_tx.send(item.clone())).await {
            Ok(Ok(())) => {
                debug!(task_id = %self.task_id, message_id = %id, item = %item, "Re-enqueued for retry");
                Ok(true)
            }
            Ok(Err(_)) => {
                self.tracker.insert(*id, item);
                Err(ConnectorError::Closed("work queue is closed".to_string()))
            }
            Err(_) => {
                self.tracker.insert(*id, item);
                Err(ConnectorError::QueueFull(id.to_string()))
            }
        }
    }

    pub fn pending(&self, id: &MessageId) -> Option<WorkItem> {
        self.tracker.get(id)
    }

    pub fn pending_count(&self) -> usize {
        self.tracker.len()
    }

    pub fn is_drained(&self) -> bool {
        self.drained.load(Ordering::SeqCst)
    }

    /// Stop seeding, flush the checkpoint, and close the pool
    ///
    /// Returns the completion map as last written, or `None` if the source was
    /// already closed.
    pub async fn shutdown(&self) -> Result<Option<CompletionMap>> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(None);
        }

        if let Some(seeder) = lock(&self.seeder).take() {
            seeder.abort();
        }
        lock(&self.ack_tx).take();

        let flushed = match self.commit_loop.lock().await.take() {
            Some(commit_loop) => commit_loop.join().await.map(Some),
            None => Ok(None),
        };

        self.pool.close().await;

        let remaining = flushed?;
        info!(
            task_id = %self.task_id,
            remaining = remaining.as_ref().map_or(0, CompletionMap::len),
            drained = self.is_drained(),
            "Partition source closed"
        );
        Ok(remaining)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ConnectorError::Closed(format!(
                "partition source for task '{}' is closed",
                self.task_id
            )));
        }
        Ok(())
    }

    /// Surface a seeding failure; it stays fatal for every later read
    async fn check_seeder(&self) -> Result<()> {
        let failed = lock(&self.seed_failure).clone();
        if let Some(reason) = failed {
            return Err(ConnectorError::Seeding(reason));
        }

        let finished = {
            let mut seeder = lock(&self.seeder);
            match seeder.as_ref() {
                Some(handle) if handle.is_finished() => seeder.take(),
                _ => None,
            }
        };
        let Some(handle) = finished else {
            return Ok(());
        };

        let failure = match handle.await {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(ConnectorError::Seeding(reason))) => reason,
            Ok(Err(e)) => e.to_string(),
            Err(e) => format!("seeding task terminated abnormally: {}", e),
        };

        error!(task_id = %self.task_id, error = %failure, "Seeding the work queue failed");
        *lock(&self.seed_failure) = Some(failure.clone());
        Err(ConnectorError::Seeding(failure))
    }
}

/// Push every item onto the work queue, waiting whenever it is full
async fn seed(task_id: String, items: Vec<WorkItem>, work_tx: mpsc::Sender<WorkItem>) -> Result<()> {
    let total = items.len();
    for item in items {
        work_tx
            .send(item)
            .await
            .map_err(|e| ConnectorError::Seeding(format!("work queue closed before {} was queued", e.0)))?;
    }
    debug!(task_id = %task_id, items = total, "Work queue seeded");
    Ok(())
}

#[async_trait]
impl Pipeline for PartitionSource {
    async fn read_batch(&self, max_items: usize) -> Result<Vec<PendingMessage>> {
        PartitionSource::read_batch(self, max_items).await
    }

    async fn ack(&self, id: &MessageId) -> Result<bool> {
        PartitionSource::ack(self, id).await
    }

    async fn retry(&self, id: &MessageId) -> Result<bool> {
        PartitionSource::retry(self, id).await
    }

    fn pending(&self, id: &MessageId) -> Option<WorkItem> {
        PartitionSource::pending(self, id)
    }

    fn is_drained(&self) -> bool {
        PartitionSource::is_drained(self)
    }

    async fn close(&self) -> Result<()> {
        self.shutdown().await.map(|_| ())
    }
}
