//! Host-facing pipeline interface
//!
//! One trait covers both sides of a connector. An input ([`PartitionSource`])
//! overrides the read/ack/retry half; an output ([`TransactionalWriter`],
//! [`TransactionalUpserter`]) overrides `write_batch`. The defaults describe a
//! pipeline with no input and an output that accepts everything.
//!
//! [`PartitionSource`]: crate::source::PartitionSource
//! [`TransactionalWriter`]: crate::writer::TransactionalWriter
//! [`TransactionalUpserter`]: crate::writer::TransactionalUpserter

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{MessageId, PendingMessage, WorkItem, WriteMessage};

#[async_trait]
pub trait Pipeline: Send + Sync {
    /// Pull up to `max_items` work items; may return fewer, or none
    async fn read_batch(&self, _max_items: usize) -> Result<Vec<PendingMessage>> {
        Ok(Vec::new())
    }

    /// Apply one message to the output atomically; true once it is committed
    async fn write_batch(&self, _message: &WriteMessage) -> Result<bool> {
        Ok(true)
    }

    /// Mark a pulled item complete; false if `id` was not pending
    async fn ack(&self, _id: &MessageId) -> Result<bool> {
        Ok(false)
    }

    /// Return a pulled item to the queue; false if `id` was not pending
    async fn retry(&self, _id: &MessageId) -> Result<bool> {
        Ok(false)
    }

    fn pending(&self, _id: &MessageId) -> Option<WorkItem> {
        None
    }

    /// True once every unit has been delivered and acknowledged
    fn is_drained(&self) -> bool {
        true
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    struct Nothing;

    impl Pipeline for Nothing {}

    #[tokio::test]
    async fn test_defaults_describe_empty_pipeline() {
        let pipeline = Nothing;
        let id = MessageId::new();

        assert!(pipeline.read_batch(10).await.unwrap().is_empty());
        assert!(!pipeline.ack(&id).await.unwrap());
        assert!(!pipeline.retry(&id).await.unwrap());
        assert!(pipeline.pending(&id).is_none());
        assert!(pipeline.is_drained());
        assert!(pipeline.write_batch(&WriteMessage::rows(Vec::new())).await.unwrap());
        pipeline.close().await.unwrap();
    }
}
