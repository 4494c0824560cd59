//! Rill: logical pipeline to physical DAG compiler.
//!
//! A [`Pipeline`] is a graph of logical stages (sources, maps, grouped
//! aggregations, joins, ...). [`Planner`] lowers it into a [`Dag`] of
//! vertices wrapping processor factories, joined by edges that say how
//! items are routed between instances: local or distributed, unicast,
//! partitioned or broadcast, and in which priority order inputs drain.

mod aggregate;
mod config;
mod dag;
mod error;
pub mod function;
mod join;
mod pipeline;
mod planner;
mod processor;
pub mod processors;
mod topology;
mod transform;
mod value;
mod workflow;

pub use aggregate::AggregateOperation;
pub use config::PlannerConfig;
pub use dag::{
    Dag, DagDescription, Edge, EdgeBuilder, EdgeDescription, PartitionKey, Routing, Vertex,
    VertexDescription, VertexId,
};
pub use error::{PlanError, Result};
pub use join::JoinClause;
pub use pipeline::{Pipeline, Stage, StageId};
pub use planner::Planner;
pub use processor::{Outbox, Processor, ProcessorContext, ProcessorMetaSupplier, run_to_completion};
pub use topology::{topological_order, topological_sort};
pub use transform::{
    CoGroupTransform, FilterTransform, FlatMapTransform, GroupByTransform, HashJoinTransform,
    MapTransform, PeekTransform, ProcessorTransform, SinkTransform, SourceTransform, Transform,
};
pub use value::Value;
pub use workflow::{JoinSpec, KeyedInput, SinkKind, StageKind, StageSpec, Workflow, WorkflowError};
