//! Buffered adapter making `process` cheap and off-thread.
//!
//! Messages land in a fixed-capacity accumulator; when it fills, the full
//! buffer is atomically swapped out and its batch is flushed to a
//! shard-affine worker. Barrier operations take the semaphore's exclusive
//! lock so that a deref after `flush` observes every buffered message.

use std::sync::Arc;

use crossbeam::queue::ArrayQueue;
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::trace;

use streamfuse_executor::{exclusive_held, TaskSemaphore, WorkerPool};

use crate::error::{Error, Result};
use crate::generator::Generator;
use crate::message::{EmitFn, Message};
use crate::operator::StreamOperator;

/// Configuration for the buffered adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferConfig {
    /// Messages held before a swap-and-flush is forced.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

fn default_capacity() -> usize {
    1024
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
        }
    }
}

impl BufferConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(Error::Configuration {
                reason: "buffer capacity must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}

/// Adapter batching single-message ingest in front of a downstream
/// aggregator. Presents itself as an aggregator to enclosing compilation.
pub struct BufferedAggregator {
    downstream: Arc<dyn StreamOperator>,
    capacity: usize,
    semaphore: Arc<TaskSemaphore>,
    hash: Option<u64>,
    accumulator: Mutex<Arc<ArrayQueue<Message>>>,
}

impl BufferedAggregator {
    pub fn builder(downstream: Arc<dyn StreamOperator>) -> BufferedBuilder {
        BufferedBuilder {
            downstream,
            config: BufferConfig::default(),
            semaphore: None,
            hash: None,
        }
    }

    /// The semaphore governing this adapter's in-flight batches.
    pub fn semaphore(&self) -> &Arc<TaskSemaphore> {
        &self.semaphore
    }

    /// Swap the accumulator for a fresh one iff it is still the observed
    /// one, returning the full buffer to flush. Another thread winning the
    /// swap returns `None` and the caller retries its push.
    fn swap_if_current(&self, observed: &Arc<ArrayQueue<Message>>) -> Option<Arc<ArrayQueue<Message>>> {
        let mut current = self.accumulator.lock();
        if Arc::ptr_eq(&*current, observed) {
            Some(std::mem::replace(
                &mut *current,
                Arc::new(ArrayQueue::new(self.capacity)),
            ))
        } else {
            None
        }
    }

    fn take_accumulator(&self) -> Arc<ArrayQueue<Message>> {
        let mut current = self.accumulator.lock();
        std::mem::replace(&mut *current, Arc::new(ArrayQueue::new(self.capacity)))
    }

    fn dispatch(&self, batch: Vec<Message>) -> Result<()> {
        let pool = WorkerPool::global();
        let worker = match self.hash {
            Some(hash) => (hash as usize) % pool.workers(),
            None => rand::thread_rng().gen_range(0..pool.workers()),
        };
        trace!(worker, messages = batch.len(), "dispatching buffered batch");
        let downstream = Arc::clone(&self.downstream);
        pool.submit(&self.semaphore, worker, move || {
            let _ = downstream.process_batch(batch);
        })?;
        Ok(())
    }
}

fn drain(queue: &ArrayQueue<Message>) -> Vec<Message> {
    let mut batch = Vec::with_capacity(queue.len());
    while let Some(message) = queue.pop() {
        batch.push(message);
    }
    batch
}

impl StreamOperator for BufferedAggregator {
    fn process_batch(&self, batch: Vec<Message>) -> Result<()> {
        for message in batch {
            self.process(message)?;
        }
        Ok(())
    }

    fn process(&self, message: Message) -> Result<()> {
        let mut message = message;
        loop {
            let queue = Arc::clone(&*self.accumulator.lock());
            match queue.push(message) {
                Ok(()) => return Ok(()),
                Err(rejected) => {
                    message = rejected;
                    if let Some(full) = self.swap_if_current(&queue) {
                        let batch = drain(&full);
                        if batch.is_empty() {
                            continue;
                        }
                        if exclusive_held(self.semaphore.id()) {
                            // Inside a barrier the swap is flushed in place.
                            self.downstream.process_batch(batch)?;
                        } else {
                            self.dispatch(batch)?;
                        }
                    }
                }
            }
        }
    }

    fn flush(&self) -> Result<()> {
        self.semaphore.with_exclusive(|| {
            let batch = drain(&self.take_accumulator());
            if !batch.is_empty() {
                self.downstream.process_batch(batch)?;
            }
            self.downstream.flush()
        })
    }

    fn reset(&self) {
        self.downstream.reset();
    }

    /// Forwarded to the downstream operator; callers should `flush` first
    /// for a consistent view.
    fn snapshot(&self) -> Message {
        self.downstream.snapshot()
    }

    fn is_buffered(&self) -> bool {
        true
    }

    fn emitter(&self) -> Option<EmitFn> {
        self.downstream.emitter()
    }
}

impl std::fmt::Debug for BufferedAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferedAggregator")
            .field("capacity", &self.capacity)
            .field("hash", &self.hash)
            .finish()
    }
}

/// Builder for [`BufferedAggregator`].
pub struct BufferedBuilder {
    downstream: Arc<dyn StreamOperator>,
    config: BufferConfig,
    semaphore: Option<Arc<TaskSemaphore>>,
    hash: Option<u64>,
}

impl BufferedBuilder {
    pub fn config(mut self, config: BufferConfig) -> Self {
        self.config = config;
        self
    }

    /// Share a semaphore with the other buffered operators of a pipeline.
    pub fn semaphore(mut self, semaphore: Arc<TaskSemaphore>) -> Self {
        self.semaphore = Some(semaphore);
        self
    }

    /// Routing hash pinning dispatch to a stable worker.
    pub fn hash(mut self, hash: u64) -> Self {
        self.hash = Some(hash);
        self
    }

    pub fn build(self) -> Result<BufferedAggregator> {
        self.config.validate()?;
        let capacity = self.config.capacity;
        let semaphore = self
            .semaphore
            .unwrap_or_else(|| Arc::new(TaskSemaphore::for_workers(WorkerPool::global().workers())));
        Ok(BufferedAggregator {
            downstream: self.downstream,
            capacity,
            semaphore,
            hash: self.hash,
            accumulator: Mutex::new(Arc::new(ArrayQueue::new(capacity))),
        })
    }
}

/// Wrap an aggregator generator so its instances ingest through a buffer.
///
/// `CreateOptions::execution_affinity` (injected by `split` around
/// non-concurrent sub-pipelines) flows into the buffer's routing hash.
pub fn buffered(inner: Arc<Generator>, config: BufferConfig) -> Arc<Generator> {
    let name = format!("buffered({})", inner.name());
    let create_inner = Arc::clone(&inner);
    let create = Arc::new(move |options: &crate::pipeline::CreateOptions| {
        let downstream = create_inner.create(options)?;
        let mut builder = BufferedAggregator::builder(downstream).config(config.clone());
        if let Some(affinity) = options.execution_affinity {
            builder = builder.hash(affinity);
        }
        Ok(Arc::new(builder.build()?) as Arc<dyn StreamOperator>)
    });

    let mut builder = Generator::aggregator(name, create)
        .concurrent(inner.is_concurrent())
        .emitter(inner.emitter())
        .serializer(inner.serializer())
        .deserializer(inner.deserializer());
    if let Some(combiner) = inner.combiner() {
        builder = builder.combiner(combiner);
    }
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::accumulator::accumulator;
    use crate::pipeline::CreateOptions;
    use serde_json::json;

    fn collected(op: &dyn StreamOperator) -> Vec<i64> {
        let Message::Array(items) = op.snapshot() else {
            panic!("accumulator snapshot must be an array");
        };
        let mut values: Vec<i64> = items.iter().map(|v| v.as_i64().unwrap()).collect();
        values.sort_unstable();
        values
    }

    #[test]
    fn test_flush_observes_every_buffered_message() {
        let downstream = accumulator().create(&CreateOptions::default()).unwrap();
        let buffered = BufferedAggregator::builder(downstream)
            .config(BufferConfig { capacity: 2 })
            .build()
            .unwrap();

        for i in 0..5 {
            buffered.process(json!(i)).unwrap();
        }
        buffered.flush().unwrap();
        assert_eq!(collected(&buffered), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_zero_capacity_is_rejected() {
        let downstream = accumulator().create(&CreateOptions::default()).unwrap();
        let result = BufferedAggregator::builder(downstream)
            .config(BufferConfig { capacity: 0 })
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_reset_forwards_downstream() {
        let downstream = accumulator().create(&CreateOptions::default()).unwrap();
        let buffered = BufferedAggregator::builder(downstream).build().unwrap();
        buffered.process(json!(1)).unwrap();
        buffered.flush().unwrap();
        buffered.reset();
        assert_eq!(buffered.snapshot(), json!([]));
    }

    #[test]
    fn test_generator_wrapper_keeps_inner_metadata() {
        let gen = buffered(accumulator(), BufferConfig::default());
        assert!(gen.is_aggregator());
        assert!(gen.is_concurrent());
        assert!(gen.combiner().is_some());
        assert_eq!(gen.name(), "buffered(accumulator)");

        let op = gen.create(&CreateOptions::default()).unwrap();
        assert!(op.is_buffered());
    }
}
