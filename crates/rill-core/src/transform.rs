//! Transforms: what a pipeline stage does.

use crate::aggregate::AggregateOperation;
use crate::function::{FlatMapFn, KeyFn, LogFn, MapFn, PredicateFn, ToStringFn};
use crate::join::JoinClause;
use crate::processor::ProcessorMetaSupplier;
use std::fmt;

/// The closed set of stage operations.
#[derive(Debug, Clone)]
pub enum Transform {
    Source(SourceTransform),
    Sink(SinkTransform),
    Map(MapTransform),
    Filter(FilterTransform),
    FlatMap(FlatMapTransform),
    /// A user-supplied processor used as-is.
    Processor(ProcessorTransform),
    GroupBy(GroupByTransform),
    CoGroup(CoGroupTransform),
    HashJoin(HashJoinTransform),
    Peek(PeekTransform),
}

impl Transform {
    pub fn name(&self) -> &str {
        match self {
            Transform::Source(t) => &t.name,
            Transform::Sink(t) => &t.name,
            Transform::Map(t) => &t.name,
            Transform::Filter(t) => &t.name,
            Transform::FlatMap(t) => &t.name,
            Transform::Processor(t) => &t.name,
            Transform::GroupBy(t) => &t.name,
            Transform::CoGroup(t) => &t.name,
            Transform::HashJoin(t) => &t.name,
            Transform::Peek(t) => &t.name,
        }
    }

    /// Short label of the variant, for messages and descriptions.
    pub fn kind(&self) -> &'static str {
        match self {
            Transform::Source(_) => "source",
            Transform::Sink(_) => "sink",
            Transform::Map(_) => "map",
            Transform::Filter(_) => "filter",
            Transform::FlatMap(_) => "flatMap",
            Transform::Processor(_) => "processor",
            Transform::GroupBy(_) => "groupBy",
            Transform::CoGroup(_) => "coGroup",
            Transform::HashJoin(_) => "hashJoin",
            Transform::Peek(_) => "peek",
        }
    }

    /// Sinks are the only stages allowed to have no downstream consumer.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Transform::Sink(_))
    }
}

/// Produces items from outside the pipeline.
#[derive(Debug, Clone)]
pub struct SourceTransform {
    pub name: String,
    pub meta_supplier: ProcessorMetaSupplier,
}

impl SourceTransform {
    pub fn new(name: impl Into<String>, meta_supplier: ProcessorMetaSupplier) -> Self {
        Self {
            name: name.into(),
            meta_supplier,
        }
    }
}

/// Consumes items at the end of the pipeline.
#[derive(Debug, Clone)]
pub struct SinkTransform {
    pub name: String,
    pub meta_supplier: ProcessorMetaSupplier,
}

impl SinkTransform {
    pub fn new(name: impl Into<String>, meta_supplier: ProcessorMetaSupplier) -> Self {
        Self {
            name: name.into(),
            meta_supplier,
        }
    }
}

#[derive(Clone)]
pub struct MapTransform {
    pub name: String,
    pub map_fn: MapFn,
}

#[derive(Clone)]
pub struct FilterTransform {
    pub name: String,
    pub filter_fn: PredicateFn,
}

#[derive(Clone)]
pub struct FlatMapTransform {
    pub name: String,
    pub flat_map_fn: FlatMapFn,
}

#[derive(Debug, Clone)]
pub struct ProcessorTransform {
    pub name: String,
    pub meta_supplier: ProcessorMetaSupplier,
}

/// Grouped aggregation of a single input.
#[derive(Clone)]
pub struct GroupByTransform {
    pub name: String,
    pub key_fn: KeyFn,
    pub aggregate: AggregateOperation,
}

/// Grouped aggregation of several inputs, each with its own key function.
/// `key_fns[i]` applies to upstream `i`.
#[derive(Clone)]
pub struct CoGroupTransform {
    pub name: String,
    pub key_fns: Vec<KeyFn>,
    pub aggregate: AggregateOperation,
}

/// Enriches the primary (first) upstream with lookups into the remaining
/// upstreams; `clauses[i]` describes upstream `i + 1`.
#[derive(Debug, Clone)]
pub struct HashJoinTransform {
    pub name: String,
    pub clauses: Vec<JoinClause>,
}

/// Reports items flowing out of the upstream stage without changing them.
#[derive(Clone)]
pub struct PeekTransform {
    pub name: String,
    pub should_log_fn: PredicateFn,
    pub to_string_fn: ToStringFn,
    /// Where rendered items go; `None` logs them through `tracing`.
    pub log_fn: Option<LogFn>,
}

macro_rules! opaque_debug {
    ($($ty:ident),*) => {
        $(
            impl fmt::Debug for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.debug_struct(stringify!($ty))
                        .field("name", &self.name)
                        .finish_non_exhaustive()
                }
            }
        )*
    };
}

opaque_debug!(
    MapTransform,
    FilterTransform,
    FlatMapTransform,
    GroupByTransform,
    CoGroupTransform,
    PeekTransform
);
