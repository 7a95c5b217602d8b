//! Convenience re-exports of the common engine surface.

pub use crate::error::{Error, Result};
pub use crate::generator::{filter_op, map_op, mapcat_op, reducer_op, Generator};
pub use crate::message::{CombineFn, EmitFn, Message, ReduceFn};
pub use crate::operator::accumulator::accumulator;
pub use crate::operator::buffered::{buffered, BufferConfig, BufferedAggregator};
pub use crate::operator::monoid::monoid;
pub use crate::operator::split::split;
pub use crate::operator::{FnAggregator, StreamOperator};
pub use crate::pipeline::{
    compile, flush, instantiate, process, reset, snapshot, CreateOptions, Descriptor, Stage,
};
