//! Background reconciliation of acknowledgements into the checkpoint log
//!
//! The loop owns the in-memory [`CompletionMap`]. Acknowledged partitions are
//! removed from it as they arrive; the map is written to the checkpoint log on
//! every timer tick and once more when the acknowledgement channel closes.
//! Acknowledgements that arrive between the last tick and a crash are lost and
//! their partitions are delivered again on restart.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::checkpoint::CheckpointLog;
use crate::error::{ConnectorError, Result};
use crate::types::{CompletionMap, Partition};

/// Handle to a running commit loop
#[derive(Debug)]
pub struct CommitLoop {
    handle: JoinHandle<CompletionMap>,
}

impl CommitLoop {
    /// Spawn the loop; it runs until every sender of `acks` is dropped
    pub fn spawn(
        task_id: String,
        completion: CompletionMap,
        log: Arc<dyn CheckpointLog>,
        acks: mpsc::Receiver<Partition>,
        period: Duration,
    ) -> Self {
        let handle = tokio::spawn(run(task_id, completion, log, acks, period));
        Self { handle }
    }

    /// Wait for the loop to finish its final write and return the map
    pub async fn join(self) -> Result<CompletionMap> {
        self.handle
            .await
            .map_err(|e| ConnectorError::Closed(format!("commit loop terminated abnormally: {}", e)))
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

async fn run(
    task_id: String,
    mut completion: CompletionMap,
    log: Arc<dyn CheckpointLog>,
    mut acks: mpsc::Receiver<Partition>,
    period: Duration,
) -> CompletionMap {
    let mut timer = interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        task_id = %task_id,
        remaining = completion.len(),
        period_ms = period.as_millis() as u64,
        "Commit loop started"
    );

    loop {
        tokio::select! {
            biased;

            _ = timer.tick() => {
                write_checkpoint(&task_id, &completion, log.as_ref()).await;
            }

            ack = acks.recv() => match ack {
                Some(partition) => {
                    if completion.remove(&partition) {
                        debug!(task_id = %task_id, partition = %partition, "Partition completed");
                    } else {
                        // A re-delivered partition acked twice, or acked after restart
                        debug!(task_id = %task_id, partition = %partition, "Ack for partition not in checkpoint");
                    }
                }
                None => {
                    write_checkpoint(&task_id, &completion, log.as_ref()).await;
                    info!(task_id = %task_id, remaining = completion.len(), "Commit loop stopped");
                    break;
                }
            },
        }
    }

    completion
}

/// Persist the map; failures are logged and the next tick tries again
async fn write_checkpoint(task_id: &str, completion: &CompletionMap, log: &dyn CheckpointLog) {
    match log.force_write(task_id, completion).await {
        Ok(()) => debug!(task_id, remaining = completion.len(), "Checkpoint persisted"),
        Err(e) => warn!(task_id, error = %e, "Checkpoint write failed, retrying at next tick"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::checkpoint::MemoryCheckpointLog;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const PERIOD: Duration = Duration::from_millis(1000);

    fn partition(low: i64, high: i64) -> Partition {
        Partition::new("orders", "id", low, high)
    }

    fn initial() -> CompletionMap {
        CompletionMap::from_partitions(vec![partition(1, 3), partition(4, 6), partition(7, 10)])
    }

    async fn seeded_log() -> Arc<MemoryCheckpointLog> {
        let log = Arc::new(MemoryCheckpointLog::new());
        log.write_if_absent("task", &initial()).await.unwrap();
        log
    }

    /// Fails the first `failures` writes, then delegates
    struct FlakyLog {
        inner: MemoryCheckpointLog,
        failures: AtomicUsize,
        writes: AtomicUsize,
    }

    #[async_trait]
    impl CheckpointLog for FlakyLog {
        async fn write_if_absent(&self, key: &str, value: &CompletionMap) -> Result<bool> {
            self.inner.write_if_absent(key, value).await
        }

        async fn read(&self, key: &str) -> Result<Option<CompletionMap>> {
            self.inner.read(key).await
        }

        async fn force_write(&self, key: &str, value: &CompletionMap) -> Result<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(ConnectorError::Checkpoint("log unavailable".into()));
            }
            self.inner.force_write(key, value).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_acks_are_persisted_on_tick_not_immediately() {
        let log = seeded_log().await;
        let (tx, rx) = mpsc::channel(8);
        let commit = CommitLoop::spawn("task".into(), initial(), log.clone(), rx, PERIOD);

        tx.send(partition(4, 6)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(log.read("task").await.unwrap().unwrap().len(), 3);

        tokio::time::sleep(Duration::from_millis(600)).await;
        let stored = log.read("task").await.unwrap().unwrap();
        assert_eq!(stored.len(), 2);
        assert!(!stored.contains(&partition(4, 6)));

        drop(tx);
        commit.join().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_flushes_before_next_tick() {
        let log = seeded_log().await;
        let (tx, rx) = mpsc::channel(8);
        let commit = CommitLoop::spawn("task".into(), initial(), log.clone(), rx, Duration::from_secs(3600));

        tx.send(partition(1, 3)).await.unwrap();
        tx.send(partition(7, 10)).await.unwrap();
        drop(tx);

        let remaining = commit.join().await.unwrap();
        assert_eq!(remaining, CompletionMap::from_partitions(vec![partition(4, 6)]));
        assert_eq!(log.read("task").await.unwrap(), Some(remaining));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_write_is_retried_next_tick() {
        let log = Arc::new(FlakyLog {
            inner: MemoryCheckpointLog::new(),
            failures: AtomicUsize::new(1),
            writes: AtomicUsize::new(0),
        });
        log.write_if_absent("task", &initial()).await.unwrap();
        let (tx, rx) = mpsc::channel(8);
        let commit = CommitLoop::spawn("task".into(), initial(), log.clone(), rx, PERIOD);

        tx.send(partition(1, 3)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(log.read("task").await.unwrap().unwrap().len(), 3);

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(log.read("task").await.unwrap().unwrap().len(), 2);
        assert!(!commit.is_finished());

        drop(tx);
        commit.join().await.unwrap();
        assert_eq!(log.writes.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_ack_is_ignored() {
        let log = seeded_log().await;
        let (tx, rx) = mpsc::channel(8);
        let commit = CommitLoop::spawn("task".into(), initial(), log, rx, PERIOD);

        tx.send(partition(100, 200)).await.unwrap();
        drop(tx);

        assert_eq!(commit.join().await.unwrap(), initial());
    }
}
