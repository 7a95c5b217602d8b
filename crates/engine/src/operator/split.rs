//! Parallel fan-out to a named map of sub-pipelines.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Map;

use crate::error::{Error, Result};
use crate::generator::Generator;
use crate::message::{CodecFn, CombineFn, EmitFn, Message};
use crate::operator::StreamOperator;
use crate::pipeline::{compile, CreateOptions, Descriptor};

/// Build a split generator from a keyed mapping of sub-descriptors.
///
/// Every sub-descriptor is compiled independently. The generator's combine,
/// emit, serialize and deserialize are point-wise per key; a combiner is
/// exposed only when every sub-pipeline has one, and `is_concurrent` is the
/// conjunction across sub-pipelines.
pub fn split(branches: BTreeMap<String, Descriptor>) -> Result<Arc<Generator>> {
    if branches.is_empty() {
        return Err(Error::compilation("split mapping has no branches"));
    }

    let mut compiled = BTreeMap::new();
    for (key, sub) in &branches {
        compiled.insert(key.clone(), compile(sub)?);
    }

    let concurrent = compiled.values().all(|gen| gen.is_concurrent());
    let combiner = pointwise_combiner(&compiled);
    let emit = pointwise_transform(
        compiled
            .iter()
            .map(|(k, g)| (k.clone(), g.emitter()))
            .collect(),
    );
    let serializer = pointwise_transform(
        compiled
            .iter()
            .map(|(k, g)| (k.clone(), g.serializer()))
            .collect(),
    );
    let deserializer = pointwise_transform(
        compiled
            .iter()
            .map(|(k, g)| (k.clone(), g.deserializer()))
            .collect(),
    );

    let create_subs = compiled;
    let create = Arc::new(move |options: &CreateOptions| {
        let mut operators = BTreeMap::new();
        for (key, gen) in &create_subs {
            let mut sub_options = options.clone();
            if !gen.is_concurrent() {
                // Pin the sub-pipeline's buffered dispatch to a stable shard.
                sub_options.execution_affinity = Some(rand::random::<u64>());
            }
            operators.insert(key.clone(), gen.create(&sub_options)?);
        }
        Ok(Arc::new(SplitOperator { operators }) as Arc<dyn StreamOperator>)
    });

    let mut builder = Generator::aggregator("split", create)
        .concurrent(concurrent)
        .emitter(emit)
        .serializer(serializer)
        .deserializer(deserializer)
        .descriptor(Descriptor::Split(branches));
    if let Some(combiner) = combiner {
        builder = builder.combiner(combiner);
    }
    Ok(builder.build())
}

/// Point-wise merge over keyed snapshots. Keys missing a counterpart on
/// either side are dropped from the merge inputs.
fn pointwise_combiner(subs: &BTreeMap<String, Arc<Generator>>) -> Option<CombineFn> {
    let mut combiners = BTreeMap::new();
    for (key, gen) in subs {
        combiners.insert(key.clone(), gen.combiner()?);
    }
    Some(Arc::new(move |left: Message, right: Message| {
        let (Message::Object(left), Message::Object(right)) = (left, right) else {
            return Message::Null;
        };
        let mut merged = Map::new();
        for (key, combine) in &combiners {
            if let (Some(a), Some(b)) = (left.get(key), right.get(key)) {
                merged.insert(key.clone(), combine(a.clone(), b.clone()));
            }
        }
        Message::Object(merged)
    }))
}

fn pointwise_transform(transforms: BTreeMap<String, EmitFn>) -> CodecFn {
    Arc::new(move |snapshot: Message| match snapshot {
        Message::Object(map) => Message::Object(
            map.into_iter()
                .map(|(key, value)| {
                    let transformed = match transforms.get(&key) {
                        Some(transform) => transform(value),
                        None => value,
                    };
                    (key, transformed)
                })
                .collect(),
        ),
        other => other,
    })
}

struct SplitOperator {
    operators: BTreeMap<String, Arc<dyn StreamOperator>>,
}

impl StreamOperator for SplitOperator {
    fn process_batch(&self, batch: Vec<Message>) -> Result<()> {
        // The last branch takes the batch by value, the rest get clones.
        let mut remaining = self.operators.len();
        for operator in self.operators.values() {
            remaining -= 1;
            if remaining == 0 {
                return operator.process_batch(batch);
            }
            operator.process_batch(batch.clone())?;
        }
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        for operator in self.operators.values() {
            operator.flush()?;
        }
        Ok(())
    }

    fn reset(&self) {
        for operator in self.operators.values() {
            operator.reset();
        }
    }

    fn snapshot(&self) -> Message {
        Message::Object(
            self.operators
                .iter()
                .map(|(key, operator)| (key.clone(), operator.snapshot()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::map_op;
    use crate::operator::monoid::monoid;
    use serde_json::json;

    fn sum_branch() -> Descriptor {
        monoid(
            || json!(0),
            |a, b| json!(a.as_i64().unwrap_or(0) + b.as_i64().unwrap_or(0)),
        )
        .build()
        .into()
    }

    #[test]
    fn test_empty_split_is_a_compilation_error() {
        assert!(split(BTreeMap::new()).is_err());
    }

    #[test]
    fn test_fans_the_same_batch_to_every_branch() {
        let mut branches = BTreeMap::new();
        branches.insert("raw".to_string(), sum_branch());
        branches.insert(
            "doubled".to_string(),
            Descriptor::seq([map_op(|m| json!(m.as_i64().unwrap() * 2)).into(), sum_branch()]),
        );
        let gen = split(branches).unwrap();
        let op = gen.create(&CreateOptions::default()).unwrap();
        op.process_batch(vec![json!(1), json!(2)]).unwrap();
        assert_eq!(op.snapshot(), json!({"raw": 3, "doubled": 6}));
    }

    #[test]
    fn test_combiner_requires_every_branch() {
        let mut branches = BTreeMap::new();
        branches.insert("summed".to_string(), sum_branch());
        assert!(split(branches.clone()).unwrap().combiner().is_some());

        let unmergeable = Generator::aggregator(
            "opaque",
            Arc::new(|_| {
                Ok(Arc::new(crate::operator::FnAggregator::builder()
                    .process(|_| Ok(()))
                    .deref(|| Message::Null)
                    .build()?) as Arc<dyn StreamOperator>)
            }),
        )
        .build();
        branches.insert("opaque".to_string(), unmergeable.into());
        assert!(split(branches).unwrap().combiner().is_none());
    }

    #[test]
    fn test_merge_drops_keys_without_counterpart() {
        let mut branches = BTreeMap::new();
        branches.insert("a".to_string(), sum_branch());
        branches.insert("b".to_string(), sum_branch());
        let combine = split(branches).unwrap().combiner().unwrap();

        let merged = combine(json!({"a": 1, "b": 2}), json!({"a": 10}));
        assert_eq!(merged, json!({"a": 11}));
    }

    #[test]
    fn test_concurrency_is_the_conjunction() {
        let mut branches = BTreeMap::new();
        branches.insert("collected".to_string(), Descriptor::seq([map_op(|m| m).into()]));
        assert!(split(branches.clone()).unwrap().is_concurrent());

        branches.insert("summed".to_string(), sum_branch());
        assert!(!split(branches).unwrap().is_concurrent());
    }
}
