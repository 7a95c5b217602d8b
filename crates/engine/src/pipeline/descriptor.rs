//! User-level pipeline declarations.
//!
//! A descriptor is a single stage, an ordered sequence of descriptors, or a
//! keyed mapping denoting a split. Admissible stage forms are a generator, a
//! marker-tagged generator factory (the [`Stage::generator_fn`] constructor
//! is the marker), or a plain unary function treated as a point-wise map.
//! The closed enum makes every other shape unrepresentable; structural
//! problems (such as an empty split mapping) still surface as compilation
//! errors.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::generator::Generator;
use crate::message::Message;

/// One admissible element of a pipeline sequence.
#[derive(Clone)]
pub enum Stage {
    /// An operator generator used as-is.
    Generator(Arc<Generator>),
    /// A factory the compiler invokes to obtain a generator.
    GeneratorFn(Arc<dyn Fn() -> Arc<Generator> + Send + Sync>),
    /// A plain unary function, coerced to a point-wise map stage.
    Map(Arc<dyn Fn(Message) -> Message + Send + Sync>),
}

impl Stage {
    /// Tag a factory so the compiler invokes it rather than treating it as a
    /// mapping function.
    pub fn generator_fn(f: impl Fn() -> Arc<Generator> + Send + Sync + 'static) -> Self {
        Stage::GeneratorFn(Arc::new(f))
    }

    /// A point-wise map stage.
    pub fn map(f: impl Fn(Message) -> Message + Send + Sync + 'static) -> Self {
        Stage::Map(Arc::new(f))
    }

    fn describe(&self) -> String {
        match self {
            Stage::Generator(gen) => gen.name().to_string(),
            Stage::GeneratorFn(_) => "generator-fn".to_string(),
            Stage::Map(_) => "map".to_string(),
        }
    }
}

impl From<Arc<Generator>> for Stage {
    fn from(gen: Arc<Generator>) -> Self {
        Stage::Generator(gen)
    }
}

/// User-level declaration of a pipeline.
#[derive(Clone)]
pub enum Descriptor {
    Stage(Stage),
    Seq(Vec<Descriptor>),
    Split(BTreeMap<String, Descriptor>),
}

impl Descriptor {
    /// An ordered sequence of stages.
    pub fn seq(items: impl IntoIterator<Item = Descriptor>) -> Self {
        Descriptor::Seq(items.into_iter().collect())
    }

    /// A parallel fan-out to a named map of sub-pipelines.
    pub fn split(branches: BTreeMap<String, Descriptor>) -> Self {
        Descriptor::Split(branches)
    }

    /// Human-readable shape of the declaration, used in logs and `Debug`.
    pub fn describe(&self) -> String {
        match self {
            Descriptor::Stage(stage) => stage.describe(),
            Descriptor::Seq(items) => {
                let parts: Vec<String> = items.iter().map(Descriptor::describe).collect();
                format!("[{}]", parts.join(" "))
            }
            Descriptor::Split(branches) => {
                let parts: Vec<String> = branches
                    .iter()
                    .map(|(key, sub)| format!("{key}: {}", sub.describe()))
                    .collect();
                format!("{{{}}}", parts.join(", "))
            }
        }
    }
}

impl From<Arc<Generator>> for Descriptor {
    fn from(gen: Arc<Generator>) -> Self {
        Descriptor::Stage(Stage::Generator(gen))
    }
}

impl From<Stage> for Descriptor {
    fn from(stage: Stage) -> Self {
        Descriptor::Stage(stage)
    }
}

impl std::fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Descriptor({})", self.describe())
    }
}

impl std::fmt::Debug for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Stage({})", self.describe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::{filter_op, map_op};

    #[test]
    fn test_describe_sequence() {
        let descriptor = Descriptor::seq([map_op(|m| m).into(), filter_op(|_| true).into()]);
        assert_eq!(descriptor.describe(), "[map filter]");
    }

    #[test]
    fn test_describe_split() {
        let mut branches = BTreeMap::new();
        branches.insert("evens".to_string(), map_op(|m| m).into());
        branches.insert("odds".to_string(), map_op(|m| m).into());
        let descriptor = Descriptor::split(branches);
        assert_eq!(descriptor.describe(), "{evens: map, odds: map}");
    }
}
