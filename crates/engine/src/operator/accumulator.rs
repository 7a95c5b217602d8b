//! Terminal aggregator collecting all seen messages.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;
use crate::generator::Generator;
use crate::message::Message;
use crate::operator::StreamOperator;

/// A concurrent aggregator whose snapshot is the ordered concatenation of
/// all messages seen since the last reset. The compiler auto-appends one
/// when a descriptor carries no aggregator of its own.
pub fn accumulator() -> Arc<Generator> {
    Generator::aggregator(
        "accumulator",
        Arc::new(|_options| Ok(Arc::new(Accumulator::default()) as Arc<dyn StreamOperator>)),
    )
    .concurrent(true)
    .combiner(Arc::new(concat))
    .build()
}

fn concat(left: Message, right: Message) -> Message {
    let mut items = match left {
        Message::Array(items) => items,
        other => vec![other],
    };
    match right {
        Message::Array(more) => items.extend(more),
        other => items.push(other),
    }
    Message::Array(items)
}

#[derive(Default)]
struct Accumulator {
    items: Mutex<Vec<Message>>,
}

impl StreamOperator for Accumulator {
    fn process_batch(&self, batch: Vec<Message>) -> Result<()> {
        // Short critical section: append only.
        self.items.lock().extend(batch);
        Ok(())
    }

    fn reset(&self) {
        *self.items.lock() = Vec::new();
    }

    fn snapshot(&self) -> Message {
        Message::Array(self.items.lock().clone())
    }
}
