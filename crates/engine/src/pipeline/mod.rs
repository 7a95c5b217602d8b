//! Pipeline compilation and the public engine API.
//!
//! A user builds a [`Descriptor`] (a sequence of operators, possibly with a
//! split map), [`compile`]s it into one fused generator, and
//! [`instantiate`]s that into a runnable operator tree. Inbound messages
//! traverse the concurrent pre-processors, arrive at the single aggregator
//! of each pipeline, and results are read back with [`snapshot`].

mod compile;
mod descriptor;

pub use compile::compile;
pub use descriptor::{Descriptor, Stage};

use std::sync::Arc;

use crate::error::Result;
use crate::generator::Generator;
use crate::message::{CodecFn, Message};
use crate::operator::StreamOperator;

type AggregatorWrapperFn = Arc<dyn Fn(Arc<Generator>) -> Arc<Generator> + Send + Sync>;
type OperatorWrapperFn =
    Arc<dyn Fn(Arc<dyn StreamOperator>, &CreateOptions) -> Arc<dyn StreamOperator> + Send + Sync>;

/// Options recognized by `create`.
#[derive(Clone, Default)]
pub struct CreateOptions {
    /// Transforms the aggregator generator just before its `create`; used by
    /// windowing decorators. Identity when absent.
    pub aggregator_generator_wrapper: Option<AggregatorWrapperFn>,

    /// Transforms the final compiled operator, with access to the options.
    /// Identity when absent.
    pub compiled_operator_wrapper: Option<OperatorWrapperFn>,

    /// Routing hint injected by `split` around non-concurrent sub-pipelines;
    /// flows into the buffered aggregator's hash.
    pub execution_affinity: Option<u64>,

    /// Passed through to aggregators' create functions.
    pub serialize: Option<CodecFn>,

    /// Passed through to aggregators' create functions.
    pub deserialize: Option<CodecFn>,
}

impl CreateOptions {
    pub fn aggregator_generator_wrapper(
        mut self,
        wrap: impl Fn(Arc<Generator>) -> Arc<Generator> + Send + Sync + 'static,
    ) -> Self {
        self.aggregator_generator_wrapper = Some(Arc::new(wrap));
        self
    }

    pub fn compiled_operator_wrapper(
        mut self,
        wrap: impl Fn(Arc<dyn StreamOperator>, &CreateOptions) -> Arc<dyn StreamOperator>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.compiled_operator_wrapper = Some(Arc::new(wrap));
        self
    }

    pub fn execution_affinity(mut self, affinity: u64) -> Self {
        self.execution_affinity = Some(affinity);
        self
    }

    pub fn serialize(mut self, codec: CodecFn) -> Self {
        self.serialize = Some(codec);
        self
    }

    pub fn deserialize(mut self, codec: CodecFn) -> Self {
        self.deserialize = Some(codec);
        self
    }
}

impl std::fmt::Debug for CreateOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreateOptions")
            .field(
                "aggregator_generator_wrapper",
                &self.aggregator_generator_wrapper.is_some(),
            )
            .field(
                "compiled_operator_wrapper",
                &self.compiled_operator_wrapper.is_some(),
            )
            .field("execution_affinity", &self.execution_affinity)
            .finish()
    }
}

/// Compile a descriptor and instantiate the resulting generator.
pub fn instantiate(
    descriptor: &Descriptor,
    options: CreateOptions,
) -> Result<Arc<dyn StreamOperator>> {
    compile(descriptor)?.create(&options)
}

/// Feed a batch of messages into an operator.
pub fn process(operator: &dyn StreamOperator, batch: Vec<Message>) -> Result<()> {
    operator.process_batch(batch)
}

/// Barrier: force all buffered state downstream.
pub fn flush(operator: &dyn StreamOperator) -> Result<()> {
    operator.flush()
}

/// Return an operator to its initial state.
pub fn reset(operator: &dyn StreamOperator) {
    operator.reset();
}

/// Dereference an operator with its attached emit transform applied.
pub fn snapshot(operator: &dyn StreamOperator) -> Message {
    let raw = operator.snapshot();
    match operator.emitter() {
        Some(emit) => emit(raw),
        None => raw,
    }
}
