//! Generic aggregator built from a monoid.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;
use crate::generator::Generator;
use crate::message::{CombineFn, EmitFn, Message};
use crate::operator::StreamOperator;

type InitialFn = Arc<dyn Fn() -> Message + Send + Sync>;
type PreProcessFn = Arc<dyn Fn(Message) -> Message + Send + Sync>;

/// Start building a monoid aggregator generator from `initial` and
/// `combine`.
///
/// The aggregator itself runs single-threaded per instance; concurrency
/// comes from running one instance per shard and combining results through
/// the generator-level combiner.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use streamfuse_engine::operator::monoid::monoid;
///
/// let sum = monoid(
///     || json!(0),
///     |a, b| json!(a.as_i64().unwrap_or(0) + b.as_i64().unwrap_or(0)),
/// )
/// .build();
/// assert!(sum.is_aggregator());
/// assert!(!sum.is_concurrent());
/// ```
pub fn monoid<I, C>(initial: I, combine: C) -> MonoidBuilder
where
    I: Fn() -> Message + Send + Sync + 'static,
    C: Fn(Message, Message) -> Message + Send + Sync + 'static,
{
    MonoidBuilder {
        initial: Arc::new(initial),
        combine: Arc::new(combine),
        pre_process: None,
        emit: None,
        clear_on_reset: true,
    }
}

/// Builder for monoid aggregator generators.
pub struct MonoidBuilder {
    initial: InitialFn,
    combine: CombineFn,
    pre_process: Option<PreProcessFn>,
    emit: Option<EmitFn>,
    clear_on_reset: bool,
}

impl MonoidBuilder {
    /// Transform each message into the monoid's value domain before folding.
    pub fn pre_process(mut self, f: impl Fn(Message) -> Message + Send + Sync + 'static) -> Self {
        self.pre_process = Some(Arc::new(f));
        self
    }

    /// Emit transform applied at the pipeline's emit boundary.
    pub fn emit(mut self, f: impl Fn(Message) -> Message + Send + Sync + 'static) -> Self {
        self.emit = Some(Arc::new(f));
        self
    }

    /// Whether `reset` restores `initial()` (default true).
    pub fn clear_on_reset(mut self, clear: bool) -> Self {
        self.clear_on_reset = clear;
        self
    }

    pub fn build(self) -> Arc<Generator> {
        let MonoidBuilder {
            initial,
            combine,
            pre_process,
            emit,
            clear_on_reset,
        } = self;

        let create_initial = Arc::clone(&initial);
        let create_combine = Arc::clone(&combine);
        let create = Arc::new(move |_options: &crate::pipeline::CreateOptions| {
            Ok(Arc::new(MonoidAggregator {
                cell: Mutex::new((create_initial)()),
                initial: Arc::clone(&create_initial),
                combine: Arc::clone(&create_combine),
                pre_process: pre_process.clone(),
                clear_on_reset,
            }) as Arc<dyn StreamOperator>)
        });

        let mut builder = Generator::aggregator("monoid", create).combiner(combine);
        if let Some(emit) = emit {
            builder = builder.emitter(emit);
        }
        builder.build()
    }
}

struct MonoidAggregator {
    cell: Mutex<Message>,
    initial: InitialFn,
    combine: CombineFn,
    pre_process: Option<PreProcessFn>,
    clear_on_reset: bool,
}

impl StreamOperator for MonoidAggregator {
    fn process_batch(&self, batch: Vec<Message>) -> Result<()> {
        // Fold the batch on its own first, then merge into the cell once.
        let mut folded = (self.initial)();
        for message in batch {
            let value = match &self.pre_process {
                Some(pre) => pre(message),
                None => message,
            };
            folded = (self.combine)(folded, value);
        }
        let mut cell = self.cell.lock();
        let current = std::mem::replace(&mut *cell, Message::Null);
        *cell = (self.combine)(current, folded);
        Ok(())
    }

    fn reset(&self) {
        if self.clear_on_reset {
            *self.cell.lock() = (self.initial)();
        }
    }

    fn snapshot(&self) -> Message {
        self.cell.lock().clone()
    }
}
