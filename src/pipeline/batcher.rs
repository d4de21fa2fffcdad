use crate::event::EventRecord;
use crate::pipeline::batch::Batch;
use crate::pipeline::queue::IngestionQueue;
use std::sync::Arc;

/// Assembles batches from the ingestion queue.
///
/// Owned by the flush scheduler task; only touches memory, never the network.
pub struct Batcher {
    queue: Arc<IngestionQueue>,
    max_batch_size: usize,
    sequence_counter: u64,
}

impl Batcher {
    pub fn new(queue: Arc<IngestionQueue>, max_batch_size: usize) -> Self {
        Self {
            queue,
            max_batch_size: max_batch_size.max(1),
            sequence_counter: 0,
        }
    }

    /// Take up to `max_batch_size` queued records as a new batch.
    ///
    /// Returns `None` when the queue is empty.
    pub fn drain_batch(&mut self) -> Option<Batch> {
        let records = self.queue.drain(self.max_batch_size);
        self.seal(records)
    }

    /// Take a batch only if a full `max_batch_size` worth of records is queued.
    pub fn drain_full_batch(&mut self) -> Option<Batch> {
        let records = self.queue.drain_exact(self.max_batch_size)?;
        self.seal(records)
    }

    /// Get current sequence counter
    pub fn sequence_counter(&self) -> u64 {
        self.sequence_counter
    }

    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    fn seal(&mut self, records: Vec<EventRecord>) -> Option<Batch> {
        let batch = Batch::new(self.sequence_counter, records)?;
        self.sequence_counter += 1;
        Some(batch)
    }
}
