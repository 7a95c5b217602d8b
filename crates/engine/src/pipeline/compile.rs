//! Descriptor compilation: partition at the aggregation frontier, fuse the
//! prefix into one reducer chain, wire the post-aggregation emitter chain,
//! and decide concurrency eligibility.

use std::sync::Arc;

use crossbeam::channel;
use tracing::{debug, warn};

use streamfuse_executor::{current_worker, TaskSemaphore, WorkerPool};

use crate::error::Result;
use crate::generator::{map_op, Generator, ResetHook};
use crate::message::{EmitFn, Message, ReduceFn};
use crate::operator::accumulator::accumulator;
use crate::operator::split::split;
use crate::operator::StreamOperator;
use crate::pipeline::{CreateOptions, Descriptor, Stage};

/// Compile a descriptor into a single fused generator.
///
/// Idempotent: a descriptor that is already a compiled generator is returned
/// unchanged.
pub fn compile(descriptor: &Descriptor) -> Result<Arc<Generator>> {
    if let Descriptor::Stage(Stage::Generator(gen)) = descriptor {
        if gen.is_compiled() {
            return Ok(Arc::clone(gen));
        }
    }
    let stages = normalize(descriptor)?;
    fuse(stages, descriptor.clone())
}

/// Coerce a descriptor into an ordered run of generators.
fn normalize(descriptor: &Descriptor) -> Result<Vec<Arc<Generator>>> {
    match descriptor {
        Descriptor::Stage(stage) => Ok(vec![coerce(stage)]),
        Descriptor::Seq(items) => {
            let mut generators = Vec::with_capacity(items.len());
            for item in items {
                generators.extend(normalize(item)?);
            }
            Ok(generators)
        }
        Descriptor::Split(branches) => Ok(vec![split(branches.clone())?]),
    }
}

fn coerce(stage: &Stage) -> Arc<Generator> {
    match stage {
        Stage::Generator(gen) => Arc::clone(gen),
        Stage::GeneratorFn(factory) => factory(),
        Stage::Map(f) => {
            let f = Arc::clone(f);
            map_op(move |message| f(message))
        }
    }
}

fn fuse(generators: Vec<Arc<Generator>>, original: Descriptor) -> Result<Arc<Generator>> {
    let frontier = generators.iter().position(|gen| gen.is_aggregator());
    let (pre, aggregator, post, descriptor) = match frontier {
        Some(index) => {
            let pre = generators[..index].to_vec();
            let aggregator = Arc::clone(&generators[index]);
            let post = generators[index + 1..].to_vec();
            (pre, aggregator, post, original)
        }
        None => {
            // No aggregator declared: terminate with an accumulator.
            let terminal = accumulator();
            let descriptor = Descriptor::seq([original, Descriptor::from(Arc::clone(&terminal))]);
            (generators, terminal, Vec::new(), descriptor)
        }
    };

    let prefix_concurrent = pre.iter().all(|gen| gen.is_concurrent());
    let concurrent =
        prefix_concurrent && aggregator.is_concurrent() && aggregator.combiner().is_some();
    let combiner = if prefix_concurrent {
        aggregator.combiner()
    } else {
        None
    };
    debug!(
        descriptor = %descriptor.describe(),
        pre = pre.len(),
        post = post.len(),
        concurrent,
        "compiled pipeline"
    );

    let emit = fused_emit(&aggregator, &post);

    let reset_hooks: Vec<ResetHook> = pre
        .iter()
        .chain(post.iter())
        .filter_map(|gen| gen.reset_hook())
        .collect();

    let create_pre = pre;
    let create_aggregator = Arc::clone(&aggregator);
    let create_emit = emit.clone();
    let create = Arc::new(move |options: &CreateOptions| {
        let aggregator_gen = match &options.aggregator_generator_wrapper {
            Some(wrap) => wrap(Arc::clone(&create_aggregator)),
            None => Arc::clone(&create_aggregator),
        };
        let operator = aggregator_gen.create(options)?;

        let pre_chain = if create_pre.is_empty() {
            None
        } else {
            Some(compose_steps(
                create_pre.iter().map(stage_reducer).collect(),
            ))
        };

        let compiled = Arc::new(CompiledOperator {
            pre_chain,
            concurrent,
            semaphore: Arc::new(TaskSemaphore::for_workers(WorkerPool::global().workers())),
            aggregator: operator,
            reset_hooks: reset_hooks.clone(),
            emit: create_emit.clone(),
        }) as Arc<dyn StreamOperator>;

        Ok(match &options.compiled_operator_wrapper {
            Some(wrap) => wrap(compiled, options),
            None => compiled,
        })
    });

    let mut builder = Generator::aggregator("compiled", create)
        .concurrent(concurrent)
        .emitter(emit)
        .serializer(aggregator.serializer())
        .deserializer(aggregator.deserializer())
        .descriptor(descriptor)
        .compiled(Arc::clone(&aggregator));
    if let Some(combiner) = combiner {
        builder = builder.combiner(combiner);
    }
    Ok(builder.build())
}

/// The compiled emit: the aggregator's emitter, extended by the composition
/// of the post-stage reducers, leftmost post-stage acting first on the
/// snapshot.
fn fused_emit(aggregator: &Arc<Generator>, post: &[Arc<Generator>]) -> EmitFn {
    let aggregator_emit = aggregator.emitter();
    if post.is_empty() {
        return aggregator_emit;
    }
    let chain = compose_steps(post.iter().map(stage_reducer).collect());
    Arc::new(move |snapshot| {
        chain(aggregator_emit(snapshot))
            .into_iter()
            .next()
            .unwrap_or(Message::Null)
    })
}

/// A generator reinterpreted as one step of a reducer chain.
///
/// Processor generators contribute their reducer directly. An aggregator
/// generator used mid-chain condenses each element independently: a fresh
/// instance is reset, fed the element, flushed, dereferenced and emitted,
/// which keeps the step pure across calls.
fn stage_reducer(generator: &Arc<Generator>) -> ReduceFn {
    if let Some(reducer) = generator.reducer() {
        return reducer;
    }
    let generator = Arc::clone(generator);
    Arc::new(move |message| {
        let operator = match generator.create(&CreateOptions::default()) {
            Ok(operator) => operator,
            Err(error) => {
                warn!(stage = generator.name(), %error, "chain stage instantiation failed");
                return Vec::new();
            }
        };
        operator.reset();
        if operator.process(message).is_err() || operator.flush().is_err() {
            return Vec::new();
        }
        vec![(generator.emitter())(operator.snapshot())]
    })
}

/// Reverse-function-compose reducer steps: the leftmost step acts first.
fn compose_steps(steps: Vec<ReduceFn>) -> ReduceFn {
    Arc::new(move |message| {
        let mut items = vec![message];
        for step in &steps {
            items = items.into_iter().flat_map(|item| step(item)).collect();
            if items.is_empty() {
                break;
            }
        }
        items
    })
}

/// The runnable operator tree produced by a compiled generator.
struct CompiledOperator {
    pre_chain: Option<ReduceFn>,
    concurrent: bool,
    semaphore: Arc<TaskSemaphore>,
    aggregator: Arc<dyn StreamOperator>,
    reset_hooks: Vec<ResetHook>,
    emit: EmitFn,
}

impl StreamOperator for CompiledOperator {
    fn process_batch(&self, batch: Vec<Message>) -> Result<()> {
        let transformed = match &self.pre_chain {
            None => batch,
            Some(chain) if self.concurrent && batch.len() > 1 => {
                parallel_realize(chain, batch, &self.semaphore)?
            }
            Some(chain) => batch.into_iter().flat_map(|item| chain(item)).collect(),
        };
        self.aggregator.process_batch(transformed)
    }

    fn flush(&self) -> Result<()> {
        self.aggregator.flush()
    }

    fn reset(&self) {
        for hook in &self.reset_hooks {
            hook();
        }
        self.aggregator.reset();
    }

    fn snapshot(&self) -> Message {
        self.aggregator.snapshot()
    }

    fn is_buffered(&self) -> bool {
        self.aggregator.is_buffered()
    }

    fn emitter(&self) -> Option<EmitFn> {
        Some(self.emit.clone())
    }
}

/// Realize the transformed batch via a parallel fold across the workers,
/// then reassemble the chunks in order.
fn parallel_realize(
    chain: &ReduceFn,
    batch: Vec<Message>,
    semaphore: &Arc<TaskSemaphore>,
) -> Result<Vec<Message>> {
    let pool = WorkerPool::global();
    // Never queue a chunk on the worker this thread is blocking on.
    let own = current_worker();
    let targets: Vec<usize> = (0..pool.workers()).filter(|index| Some(*index) != own).collect();
    if targets.is_empty() || batch.len() <= 1 {
        return Ok(batch.into_iter().flat_map(|item| chain(item)).collect());
    }

    let chunk_size = batch.len().div_ceil(targets.len());
    let chunks: Vec<Vec<Message>> = batch
        .chunks(chunk_size)
        .map(<[Message]>::to_vec)
        .collect();

    let (tx, rx) = channel::unbounded::<(usize, Vec<Message>)>();
    for (index, chunk) in chunks.into_iter().enumerate() {
        let worker = targets[index % targets.len()];
        let chain = Arc::clone(chain);
        let tx = tx.clone();
        pool.submit(semaphore, worker, move || {
            let out: Vec<Message> = chunk.into_iter().flat_map(|item| chain(item)).collect();
            let _ = tx.send((index, out));
        })?;
    }
    drop(tx);

    // The channel disconnects once every chunk job has finished; a panicked
    // chunk simply never reports and leaves a gap.
    let mut parts: Vec<(usize, Vec<Message>)> = rx.iter().collect();
    parts.sort_by_key(|(index, _)| *index);
    Ok(parts.into_iter().flat_map(|(_, items)| items).collect())
}
