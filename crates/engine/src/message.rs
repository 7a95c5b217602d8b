//! The engine's value domain and callback shapes.
//!
//! Messages are opaque JSON values: the engine never inspects them except
//! through user-supplied callbacks, and snapshots (scalars, ordered lists,
//! keyed maps) share the same domain so that post-aggregation stages can be
//! applied to a dereferenced snapshot like any other message.

use std::sync::Arc;

/// A single stream message (or a snapshot derived from messages).
pub type Message = serde_json::Value;

/// One step of a reducer chain: expands a message into zero or more messages.
pub type ReduceFn = Arc<dyn Fn(Message) -> Vec<Message> + Send + Sync>;

/// Binary merge over dereferenced snapshots across shards. Must be
/// associative and commutative up to observable semantics.
pub type CombineFn = Arc<dyn Fn(Message, Message) -> Message + Send + Sync>;

/// Post-processing transform applied when dereferencing. Pure and idempotent
/// on snapshots.
pub type EmitFn = Arc<dyn Fn(Message) -> Message + Send + Sync>;

/// Snapshot serializer/deserializer hook. Identity by default; the engine
/// does not choose a wire format.
pub type CodecFn = Arc<dyn Fn(Message) -> Message + Send + Sync>;

/// The identity transform used as the default emitter and codec.
pub fn identity() -> EmitFn {
    Arc::new(|message| message)
}
