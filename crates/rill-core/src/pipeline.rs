//! The logical stage graph.
//!
//! A `Pipeline` is an arena of stages. Each stage holds a transform and
//! the ordered ids of its upstream stages; list position is the logical
//! input index.

use crate::aggregate::AggregateOperation;
use crate::config::PlannerConfig;
use crate::dag::Dag;
use crate::error::Result;
use crate::function::{self, FlatMapFn, KeyFn, LogFn, MapFn, PredicateFn, ToStringFn};
use crate::join::JoinClause;
use crate::planner::Planner;
use crate::processor::ProcessorMetaSupplier;
use crate::transform::{
    CoGroupTransform, FilterTransform, FlatMapTransform, GroupByTransform, HashJoinTransform,
    MapTransform, PeekTransform, ProcessorTransform, SinkTransform, SourceTransform, Transform,
};
use indexmap::IndexMap;
use std::fmt;

/// Identity of a stage within its pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StageId(pub(crate) usize);

impl StageId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A node of the logical graph.
#[derive(Debug, Clone)]
pub struct Stage {
    id: StageId,
    transform: Transform,
    upstream: Vec<StageId>,
}

impl Stage {
    pub fn id(&self) -> StageId {
        self.id
    }

    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    pub fn upstream(&self) -> &[StageId] {
        &self.upstream
    }

    /// Deterministic tie-break key for topological ordering.
    pub(crate) fn sort_key(&self) -> (String, usize) {
        (self.transform.name().to_string(), self.id.0)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.transform.name(), self.id)
    }
}

/// A logical pipeline under construction.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    /// Create an empty pipeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a stage with an arbitrary transform and upstream list.
    ///
    /// Upstream ids are checked when the pipeline is compiled, not here.
    pub fn add_stage(&mut self, transform: Transform, upstream: Vec<StageId>) -> StageId {
        let id = StageId(self.stages.len());
        self.stages.push(Stage {
            id,
            transform,
            upstream,
        });
        id
    }

    pub fn stage(&self, id: StageId) -> Option<&Stage> {
        self.stages.get(id.0)
    }

    pub fn stages(&self) -> impl Iterator<Item = &Stage> {
        self.stages.iter()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Forward adjacency: each stage mapped to the stages consuming it, in
    /// stage order. Every stage has an entry. Unknown upstream ids are
    /// skipped.
    pub fn adjacency_map(&self) -> IndexMap<StageId, Vec<StageId>> {
        let mut adjacency: IndexMap<StageId, Vec<StageId>> =
            self.stages.iter().map(|s| (s.id, Vec::new())).collect();
        for stage in &self.stages {
            for upstream in &stage.upstream {
                if let Some(downstream) = adjacency.get_mut(upstream) {
                    downstream.push(stage.id);
                }
            }
        }
        adjacency
    }

    /// Compile into a physical DAG with the default planner settings.
    pub fn to_dag(&self) -> Result<Dag> {
        self.to_dag_with(&PlannerConfig::default())
    }

    /// Compile into a physical DAG.
    pub fn to_dag_with(&self, config: &PlannerConfig) -> Result<Dag> {
        Planner::new(self, config)?.create_dag()
    }

    // ------------------------------------------------------------------
    // Builder shortcuts
    // ------------------------------------------------------------------

    pub fn draw_from(
        &mut self,
        name: impl Into<String>,
        meta_supplier: ProcessorMetaSupplier,
    ) -> StageId {
        self.add_stage(
            Transform::Source(SourceTransform::new(name, meta_supplier)),
            vec![],
        )
    }

    pub fn drain_to(
        &mut self,
        upstream: StageId,
        name: impl Into<String>,
        meta_supplier: ProcessorMetaSupplier,
    ) -> StageId {
        self.add_stage(
            Transform::Sink(SinkTransform::new(name, meta_supplier)),
            vec![upstream],
        )
    }

    pub fn map(&mut self, upstream: StageId, map_fn: MapFn) -> StageId {
        self.add_stage(
            Transform::Map(MapTransform {
                name: "map".into(),
                map_fn,
            }),
            vec![upstream],
        )
    }

    pub fn filter(&mut self, upstream: StageId, filter_fn: PredicateFn) -> StageId {
        self.add_stage(
            Transform::Filter(FilterTransform {
                name: "filter".into(),
                filter_fn,
            }),
            vec![upstream],
        )
    }

    pub fn flat_map(&mut self, upstream: StageId, flat_map_fn: FlatMapFn) -> StageId {
        self.add_stage(
            Transform::FlatMap(FlatMapTransform {
                name: "flatMap".into(),
                flat_map_fn,
            }),
            vec![upstream],
        )
    }

    /// Apply a custom processor to one or more upstreams.
    pub fn custom_transform(
        &mut self,
        upstream: Vec<StageId>,
        name: impl Into<String>,
        meta_supplier: ProcessorMetaSupplier,
    ) -> StageId {
        self.add_stage(
            Transform::Processor(ProcessorTransform {
                name: name.into(),
                meta_supplier,
            }),
            upstream,
        )
    }

    pub fn group_by(
        &mut self,
        upstream: StageId,
        key_fn: KeyFn,
        aggregate: AggregateOperation,
    ) -> StageId {
        self.add_stage(
            Transform::GroupBy(GroupByTransform {
                name: "groupBy".into(),
                key_fn,
                aggregate,
            }),
            vec![upstream],
        )
    }

    /// Co-group several upstreams, each paired with its own key function.
    pub fn co_group(
        &mut self,
        inputs: Vec<(StageId, KeyFn)>,
        aggregate: AggregateOperation,
    ) -> StageId {
        let (upstream, key_fns): (Vec<StageId>, Vec<KeyFn>) = inputs.into_iter().unzip();
        self.add_stage(
            Transform::CoGroup(CoGroupTransform {
                name: "coGroup".into(),
                key_fns,
                aggregate,
            }),
            upstream,
        )
    }

    /// Join `primary` against side inputs, each with its clause. Side
    /// inputs get joiner ordinals in the order given.
    pub fn hash_join(&mut self, primary: StageId, sides: Vec<(StageId, JoinClause)>) -> StageId {
        let mut upstream = vec![primary];
        let mut clauses = Vec::with_capacity(sides.len());
        for (stage, clause) in sides {
            upstream.push(stage);
            clauses.push(clause);
        }
        self.add_stage(
            Transform::HashJoin(HashJoinTransform {
                name: "hashJoin".into(),
                clauses,
            }),
            upstream,
        )
    }

    /// Report every item leaving `upstream` through `tracing`.
    pub fn peek(&mut self, upstream: StageId) -> StageId {
        self.peek_with(upstream, function::always(), function::display(), None)
    }

    /// Report the items leaving `upstream` that pass `should_log_fn`.
    pub fn peek_with(
        &mut self,
        upstream: StageId,
        should_log_fn: PredicateFn,
        to_string_fn: ToStringFn,
        log_fn: Option<LogFn>,
    ) -> StageId {
        self.add_stage(
            Transform::Peek(PeekTransform {
                name: "peek".into(),
                should_log_fn,
                to_string_fn,
                log_fn,
            }),
            vec![upstream],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processors;

    #[test]
    fn test_adjacency_map() {
        let mut p = Pipeline::new();
        let src = p.draw_from("src", processors::list_source_p(vec![]));
        let a = p.map(src, function::identity());
        let b = p.filter(src, function::always());
        let sink = p.drain_to(a, "sink", processors::noop_p());

        let adjacency = p.adjacency_map();
        assert_eq!(adjacency.len(), 4);
        assert_eq!(adjacency[&src], vec![a, b]);
        assert_eq!(adjacency[&a], vec![sink]);
        assert!(adjacency[&b].is_empty());
        assert!(adjacency[&sink].is_empty());
    }

    #[test]
    fn test_hash_join_upstream_order() {
        let mut p = Pipeline::new();
        let primary = p.draw_from("orders", processors::list_source_p(vec![]));
        let users = p.draw_from("users", processors::list_source_p(vec![]));
        let join = p.hash_join(primary, vec![(users, JoinClause::on_key(function::identity()))]);

        let stage = p.stage(join).unwrap();
        assert_eq!(stage.upstream(), &[primary, users]);
        assert_eq!(stage.to_string(), "hashJoin#2");
    }
}
