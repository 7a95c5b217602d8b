//! Operator generators: factories plus static, queriable metadata.
//!
//! A generator describes how to instantiate an operator and what the
//! compiler may assume about it: whether it aggregates, whether its prefix
//! may run on worker threads, how shard snapshots merge, and how snapshots
//! are emitted and (de)serialized. Generators are immutable after
//! construction; the only mutable slot is the windowing back-reference
//! installed by `recur_to`, stored weakly to break the cycle.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::message::{identity, CodecFn, CombineFn, EmitFn, Message, ReduceFn};
use crate::operator::StreamOperator;
use crate::pipeline::{CreateOptions, Descriptor};

/// Instantiation callback packaged by aggregator generators.
pub type CreateFn = Arc<dyn Fn(&CreateOptions) -> Result<Arc<dyn StreamOperator>> + Send + Sync>;

/// Reset callback of a self-contained processor stage.
pub type ResetHook = Arc<dyn Fn() + Send + Sync>;

enum RecurSlot {
    Empty,
    Target(Weak<Generator>),
    /// Compiled generators forward `recur_to` to their aggregator.
    Proxy(Arc<Generator>),
}

/// Factory for a stream operator plus its static metadata.
pub struct Generator {
    name: String,
    aggregator: bool,
    concurrent: bool,
    compiled: bool,
    combiner: Option<CombineFn>,
    emit: EmitFn,
    serializer: CodecFn,
    deserializer: CodecFn,
    descriptor: Option<Descriptor>,
    reducer: Option<ReduceFn>,
    reset_hook: Option<ResetHook>,
    create: Option<CreateFn>,
    recur: Mutex<RecurSlot>,
}

impl Generator {
    /// Start building a processor generator from its reducer transformation.
    ///
    /// Processor stages have no operator of their own: they participate by
    /// being composed into the pre-aggregation reducer chain.
    pub fn processor(name: impl Into<String>, reducer: ReduceFn) -> ProcessorBuilder {
        ProcessorBuilder {
            name: name.into(),
            reducer,
            concurrent: true,
            reset_hook: None,
        }
    }

    /// Start building an aggregator generator from its create callback.
    pub fn aggregator(name: impl Into<String>, create: CreateFn) -> AggregatorBuilder {
        AggregatorBuilder {
            name: name.into(),
            create,
            concurrent: false,
            compiled: false,
            combiner: None,
            emit: identity(),
            serializer: identity(),
            deserializer: identity(),
            descriptor: None,
            recur_proxy: None,
        }
    }

    /// The generator's name, used for introspection and logging.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_aggregator(&self) -> bool {
        self.aggregator
    }

    /// Whether prefix stages may run on worker threads.
    pub fn is_concurrent(&self) -> bool {
        self.concurrent
    }

    /// Whether this generator is the output of the compiler.
    pub fn is_compiled(&self) -> bool {
        self.compiled
    }

    /// Binary merge over dereferenced snapshots; absence means the stage is
    /// not shard-mergeable.
    pub fn combiner(&self) -> Option<CombineFn> {
        self.combiner.clone()
    }

    /// Post-processing transform applied when dereferencing.
    pub fn emitter(&self) -> EmitFn {
        self.emit.clone()
    }

    pub fn serializer(&self) -> CodecFn {
        self.serializer.clone()
    }

    pub fn deserializer(&self) -> CodecFn {
        self.deserializer.clone()
    }

    /// The user-facing description this generator was compiled from.
    pub fn descriptor(&self) -> Option<&Descriptor> {
        self.descriptor.as_ref()
    }

    /// The composable reducer of a processor generator.
    pub fn reducer(&self) -> Option<ReduceFn> {
        self.reducer.clone()
    }

    /// The reset callback of a self-contained processor stage.
    pub fn reset_hook(&self) -> Option<ResetHook> {
        self.reset_hook.clone()
    }

    /// Instantiate the operator.
    pub fn create(&self, options: &CreateOptions) -> Result<Arc<dyn StreamOperator>> {
        match &self.create {
            Some(create) => create(options),
            None => Err(Error::usage(format!(
                "processor generator '{}' does not instantiate operators",
                self.name
            ))),
        }
    }

    /// Install a back-reference to the outer (windowing) generator.
    ///
    /// The reference is held weakly and looked up on demand.
    pub fn recur_to(&self, outer: &Arc<Generator>) {
        let proxy = match &*self.recur.lock() {
            RecurSlot::Proxy(inner) => Some(Arc::clone(inner)),
            _ => None,
        };
        match proxy {
            Some(inner) => inner.recur_to(outer),
            None => *self.recur.lock() = RecurSlot::Target(Arc::downgrade(outer)),
        }
    }

    /// Resolve the installed back-reference, if it is still alive.
    pub fn recur_target(&self) -> Option<Arc<Generator>> {
        let slot = self.recur.lock();
        match &*slot {
            RecurSlot::Empty => None,
            RecurSlot::Target(weak) => weak.upgrade(),
            RecurSlot::Proxy(inner) => {
                let inner = Arc::clone(inner);
                drop(slot);
                inner.recur_target()
            }
        }
    }
}

impl std::fmt::Debug for Generator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Generator")
            .field("name", &self.name)
            .field("aggregator", &self.aggregator)
            .field("concurrent", &self.concurrent)
            .field("compiled", &self.compiled)
            .field("mergeable", &self.combiner.is_some())
            .finish()
    }
}

/// Builder for processor generators.
pub struct ProcessorBuilder {
    name: String,
    reducer: ReduceFn,
    concurrent: bool,
    reset_hook: Option<ResetHook>,
}

impl ProcessorBuilder {
    /// Whether this stage may run on worker threads (default true).
    pub fn concurrent(mut self, concurrent: bool) -> Self {
        self.concurrent = concurrent;
        self
    }

    /// Reset callback for a stage whose reducer closes over state.
    pub fn reset(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.reset_hook = Some(Arc::new(f));
        self
    }

    pub fn build(self) -> Arc<Generator> {
        Arc::new(Generator {
            name: self.name,
            aggregator: false,
            concurrent: self.concurrent,
            compiled: false,
            combiner: None,
            emit: identity(),
            serializer: identity(),
            deserializer: identity(),
            descriptor: None,
            reducer: Some(self.reducer),
            reset_hook: self.reset_hook,
            create: None,
            recur: Mutex::new(RecurSlot::Empty),
        })
    }
}

/// Builder for aggregator generators.
pub struct AggregatorBuilder {
    name: String,
    create: CreateFn,
    concurrent: bool,
    compiled: bool,
    combiner: Option<CombineFn>,
    emit: EmitFn,
    serializer: CodecFn,
    deserializer: CodecFn,
    descriptor: Option<Descriptor>,
    recur_proxy: Option<Arc<Generator>>,
}

impl AggregatorBuilder {
    /// Whether this aggregator tolerates concurrent prefix stages
    /// (default false).
    pub fn concurrent(mut self, concurrent: bool) -> Self {
        self.concurrent = concurrent;
        self
    }

    pub fn combiner(mut self, combiner: CombineFn) -> Self {
        self.combiner = Some(combiner);
        self
    }

    pub fn emitter(mut self, emit: EmitFn) -> Self {
        self.emit = emit;
        self
    }

    pub fn serializer(mut self, serializer: CodecFn) -> Self {
        self.serializer = serializer;
        self
    }

    pub fn deserializer(mut self, deserializer: CodecFn) -> Self {
        self.deserializer = deserializer;
        self
    }

    pub fn descriptor(mut self, descriptor: Descriptor) -> Self {
        self.descriptor = Some(descriptor);
        self
    }

    pub(crate) fn compiled(mut self, aggregator: Arc<Generator>) -> Self {
        self.compiled = true;
        self.recur_proxy = Some(aggregator);
        self
    }

    pub fn build(self) -> Arc<Generator> {
        let recur = match self.recur_proxy {
            Some(inner) => RecurSlot::Proxy(inner),
            None => RecurSlot::Empty,
        };
        Arc::new(Generator {
            name: self.name,
            aggregator: true,
            concurrent: self.concurrent,
            compiled: self.compiled,
            combiner: self.combiner,
            emit: self.emit,
            serializer: self.serializer,
            deserializer: self.deserializer,
            descriptor: self.descriptor,
            reducer: None,
            reset_hook: None,
            create: Some(self.create),
            recur: Mutex::new(recur),
        })
    }
}

/// A concurrent stage described entirely by a reducer transformation.
pub fn reducer_op(name: impl Into<String>, reducer: ReduceFn) -> Arc<Generator> {
    Generator::processor(name, reducer).build()
}

/// Point-wise transformation of each message.
pub fn map_op<F>(f: F) -> Arc<Generator>
where
    F: Fn(Message) -> Message + Send + Sync + 'static,
{
    reducer_op("map", Arc::new(move |message| vec![f(message)]))
}

/// Expansion of each message into zero or more messages.
pub fn mapcat_op<F>(f: F) -> Arc<Generator>
where
    F: Fn(Message) -> Vec<Message> + Send + Sync + 'static,
{
    reducer_op("mapcat", Arc::new(f))
}

/// Selection of messages satisfying a predicate.
pub fn filter_op<F>(predicate: F) -> Arc<Generator>
where
    F: Fn(&Message) -> bool + Send + Sync + 'static,
{
    reducer_op(
        "filter",
        Arc::new(move |message| {
            if predicate(&message) {
                vec![message]
            } else {
                Vec::new()
            }
        }),
    )
}
