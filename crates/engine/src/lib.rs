//! Compositional stream analysis engine.
//!
//! User-declared pipelines of operators ingest unbounded message streams and
//! produce periodically-queriable aggregate results. A small algebra of
//! operator generators compiles into a single fused stream operator whose
//! prefix stages can run concurrently across worker threads while the
//! aggregation boundary keeps a well-defined merge semantics.
//!
//! - [`generator`]: the operator algebra and its constructors.
//! - [`operator`]: runtime contracts plus the built-in monoid, accumulator,
//!   split and buffered operators.
//! - [`pipeline`]: descriptor compilation and the public API
//!   (`compile` / `instantiate` / `process` / `flush` / `reset` /
//!   `snapshot`).
//!
//! Statistical aggregators, windowing policies, wire formats and query
//! syntax are clients of this crate: they build descriptors, supply reducer
//! functions, and read results through the interfaces defined here.

pub mod error;
pub mod generator;
pub mod message;
pub mod operator;
pub mod pipeline;
pub mod prelude;

pub use error::{Error, Result};
pub use generator::{filter_op, map_op, mapcat_op, reducer_op, Generator};
pub use message::{CodecFn, CombineFn, EmitFn, Message, ReduceFn};
pub use operator::accumulator::accumulator;
pub use operator::buffered::{buffered, BufferConfig, BufferedAggregator};
pub use operator::monoid::monoid;
pub use operator::split::split;
pub use operator::{FnAggregator, StreamOperator};
pub use pipeline::{
    compile, flush, instantiate, process, reset, snapshot, CreateOptions, Descriptor, Stage,
};
