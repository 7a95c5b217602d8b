//! Runtime operator contracts and the closure-built aggregator.
//!
//! Every operator that exists at runtime is an aggregator: processor stages
//! are fused into reducer chains at compile time and never materialize as
//! operators of their own.

pub mod accumulator;
pub mod buffered;
pub mod monoid;
pub mod split;

use crate::error::{Error, Result};
use crate::message::{EmitFn, Message};

/// Trait for all runtime stream operators.
///
/// Operators are mutated only by their owning thread or under the executor's
/// permit discipline; callers must treat snapshots as read-only.
pub trait StreamOperator: Send + Sync {
    /// Fold a batch of messages into internal state.
    fn process_batch(&self, batch: Vec<Message>) -> Result<()>;

    /// Single-message entry point; a batch of one by default.
    fn process(&self, message: Message) -> Result<()> {
        self.process_batch(vec![message])
    }

    /// Force any buffered state downstream. No-op for unbuffered operators.
    fn flush(&self) -> Result<()> {
        Ok(())
    }

    /// Return to the post-construction state.
    fn reset(&self);

    /// Snapshot of everything observed since the last reset, without the
    /// emit transform applied.
    fn snapshot(&self) -> Message;

    /// Whether this operator buffers between `process` and `flush`.
    fn is_buffered(&self) -> bool {
        false
    }

    /// The emit transform attached at instantiation, if any.
    fn emitter(&self) -> Option<EmitFn> {
        None
    }
}

type ProcessFn = Box<dyn Fn(Vec<Message>) -> Result<()> + Send + Sync>;
type DerefFn = Box<dyn Fn() -> Message + Send + Sync>;
type ResetFn = Box<dyn Fn() + Send + Sync>;
type FlushFn = Box<dyn Fn() -> Result<()> + Send + Sync>;

/// A stateful sink assembled from user callbacks.
///
/// `process` is authoritative; the single-message entry point is defined as
/// a batch of one. `flush` runs before any deref that must observe all
/// buffered state.
pub struct FnAggregator {
    process: ProcessFn,
    deref: DerefFn,
    reset: Option<ResetFn>,
    flush: Option<FlushFn>,
    emit: Option<EmitFn>,
}

impl FnAggregator {
    pub fn builder() -> FnAggregatorBuilder {
        FnAggregatorBuilder::default()
    }
}

impl StreamOperator for FnAggregator {
    fn process_batch(&self, batch: Vec<Message>) -> Result<()> {
        (self.process)(batch)
    }

    fn flush(&self) -> Result<()> {
        match &self.flush {
            Some(flush) => flush(),
            None => Ok(()),
        }
    }

    fn reset(&self) {
        if let Some(reset) = &self.reset {
            reset();
        }
    }

    fn snapshot(&self) -> Message {
        (self.deref)()
    }

    fn emitter(&self) -> Option<EmitFn> {
        self.emit.clone()
    }
}

impl std::fmt::Debug for FnAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnAggregator")
            .field("resettable", &self.reset.is_some())
            .field("flushable", &self.flush.is_some())
            .finish()
    }
}

/// Builder for [`FnAggregator`].
///
/// `process` and `deref` are required; everything else is optional.
#[derive(Default)]
pub struct FnAggregatorBuilder {
    process: Option<ProcessFn>,
    deref: Option<DerefFn>,
    reset: Option<ResetFn>,
    flush: Option<FlushFn>,
    emit: Option<EmitFn>,
}

impl FnAggregatorBuilder {
    pub fn process(mut self, f: impl Fn(Vec<Message>) -> Result<()> + Send + Sync + 'static) -> Self {
        self.process = Some(Box::new(f));
        self
    }

    pub fn deref(mut self, f: impl Fn() -> Message + Send + Sync + 'static) -> Self {
        self.deref = Some(Box::new(f));
        self
    }

    pub fn reset(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.reset = Some(Box::new(f));
        self
    }

    pub fn flush(mut self, f: impl Fn() -> Result<()> + Send + Sync + 'static) -> Self {
        self.flush = Some(Box::new(f));
        self
    }

    pub fn emitter(mut self, emit: EmitFn) -> Self {
        self.emit = Some(emit);
        self
    }

    pub fn build(self) -> Result<FnAggregator> {
        let process = self
            .process
            .ok_or_else(|| Error::usage("stream aggregator requires a process callback"))?;
        let deref = self
            .deref
            .ok_or_else(|| Error::usage("stream aggregator requires a deref callback"))?;
        Ok(FnAggregator {
            process,
            deref,
            reset: self.reset,
            flush: self.flush,
            emit: self.emit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_builder_requires_process_and_deref() {
        assert!(FnAggregator::builder().build().is_err());
        assert!(FnAggregator::builder()
            .process(|_| Ok(()))
            .build()
            .is_err());
        assert!(FnAggregator::builder()
            .process(|_| Ok(()))
            .deref(|| Message::Null)
            .build()
            .is_ok());
    }

    #[test]
    fn test_process_is_a_batch_of_one() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let agg = FnAggregator::builder()
            .process(move |batch| {
                sink.lock().extend(batch);
                Ok(())
            })
            .deref(|| Message::Null)
            .build()
            .unwrap();

        agg.process(json!(1)).unwrap();
        agg.process_batch(vec![json!(2), json!(3)]).unwrap();
        assert_eq!(*seen.lock(), vec![json!(1), json!(2), json!(3)]);
    }

    #[test]
    fn test_reset_defaults_to_noop() {
        let agg = FnAggregator::builder()
            .process(|_| Ok(()))
            .deref(|| json!(42))
            .build()
            .unwrap();
        agg.reset();
        assert_eq!(agg.snapshot(), json!(42));
    }
}
