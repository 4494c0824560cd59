//! Planning: compile a logical pipeline into a physical DAG.
//!
//! Stages are visited in topological order. Each transform handler adds
//! the vertices for its stage and draws edges from the vertices of the
//! stage's upstreams, recording partitioning, broadcast, distribution and
//! priority on every edge.

use crate::config::PlannerConfig;
use crate::dag::{Dag, Edge, VertexId};
use crate::error::{PlanError, Result};
use crate::pipeline::{Pipeline, Stage, StageId};
use crate::processor::ProcessorMetaSupplier;
use crate::processors;
use crate::topology::topological_order;
use crate::transform::{
    CoGroupTransform, GroupByTransform, HashJoinTransform, PeekTransform, Transform,
};
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

/// Single-use compiler from a [`Pipeline`] to a [`Dag`].
pub struct Planner<'a> {
    pipeline: &'a Pipeline,
    config: &'a PlannerConfig,
    dag: Dag,
    stage_to_vertex: HashMap<StageId, VertexId>,
    /// Next free output ordinal of every vertex.
    next_ordinal: HashMap<VertexId, usize>,
    vertex_names: HashSet<String>,
}

impl<'a> Planner<'a> {
    pub fn new(pipeline: &'a Pipeline, config: &'a PlannerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            pipeline,
            config,
            dag: Dag::new(),
            stage_to_vertex: HashMap::new(),
            next_ordinal: HashMap::new(),
            vertex_names: HashSet::new(),
        })
    }

    /// Validate the pipeline and build its DAG. Nothing is returned unless
    /// every stage compiles.
    pub fn create_dag(mut self) -> Result<Dag> {
        let pipeline = self.pipeline;
        for stage in pipeline.stages() {
            check_stage(pipeline, stage)?;
        }
        let adjacency = pipeline.adjacency_map();
        validate_no_leakage(pipeline, &adjacency)?;

        let sorted = topological_order(&adjacency, |id| pipeline.stage(*id).map(Stage::sort_key))
            .map_err(|stuck| PlanError::CyclicGraph {
                stages: stuck.iter().map(|id| stage_label(pipeline, *id)).collect(),
            })?;
        for id in sorted {
            let stage = stage_at(pipeline, id)?;
            match stage.transform() {
                Transform::Source(source) => {
                    self.handle_vertex_stage(stage, &source.name, source.meta_supplier.clone())?
                }
                Transform::Sink(sink) => {
                    self.handle_vertex_stage(stage, &sink.name, sink.meta_supplier.clone())?
                }
                Transform::Map(map) => {
                    self.handle_vertex_stage(stage, &map.name, processors::map_p(map.map_fn.clone()))?
                }
                Transform::Filter(filter) => self.handle_vertex_stage(
                    stage,
                    &filter.name,
                    processors::filter_p(filter.filter_fn.clone()),
                )?,
                Transform::FlatMap(flat_map) => self.handle_vertex_stage(
                    stage,
                    &flat_map.name,
                    processors::flat_map_p(flat_map.flat_map_fn.clone()),
                )?,
                Transform::Processor(custom) => {
                    self.handle_vertex_stage(stage, &custom.name, custom.meta_supplier.clone())?
                }
                Transform::GroupBy(group_by) => self.handle_group_by(stage, group_by)?,
                Transform::CoGroup(co_group) => self.handle_co_group(stage, co_group)?,
                Transform::HashJoin(hash_join) => self.handle_hash_join(stage, hash_join)?,
                Transform::Peek(peek) => self.handle_peek(stage, peek)?,
            }
        }

        info!(
            stages = pipeline.len(),
            vertices = self.dag.vertex_count(),
            edges = self.dag.edges().len(),
            "compiled pipeline"
        );
        Ok(self.dag)
    }

    // ------------------------------------------------------------------
    // Transform handlers
    // ------------------------------------------------------------------

    /// One vertex, local unicast edges from every upstream. Sources have no
    /// upstream and so get no edges.
    fn handle_vertex_stage(
        &mut self,
        stage: &Stage,
        name: &str,
        meta_supplier: ProcessorMetaSupplier,
    ) -> Result<()> {
        let prefix = self.vertex_name(name, &[""]);
        let vertex = self.add_vertex(stage.id(), prefix, meta_supplier)?;
        self.add_edges(stage, vertex, |edge, _| edge)
    }

    //     upstream
    //         | partitioned (local)
    //         v
    //     <name>-stage1   accumulate by key
    //         | distributed, partitioned by entry key
    //         v
    //     <name>-stage2   combine by key
    fn handle_group_by(&mut self, stage: &Stage, group_by: &GroupByTransform) -> Result<()> {
        let prefix = self.vertex_name(&group_by.name, &["-stage1", "-stage2"]);
        let stage1 = self.add_internal_vertex(
            format!("{prefix}-stage1"),
            processors::accumulate_by_key_p(group_by.key_fn.clone(), group_by.aggregate.clone()),
        )?;
        let stage2 = self.add_vertex(
            stage.id(),
            format!("{prefix}-stage2"),
            processors::combine_by_key_p(group_by.aggregate.clone()),
        )?;
        let key_fn = group_by.key_fn.clone();
        self.add_edges(stage, stage1, |edge, _| edge.partitioned(key_fn.clone()))?;
        self.add_shuffle(stage1, stage2);
        Ok(())
    }

    //   input-0   input-1  ...
    //       \        /        partitioned by key_fns[ordinal] (local)
    //        v      v
    //     <name>-stage1       co-accumulate by key
    //           | distributed, partitioned by entry key
    //           v
    //     <name>-stage2       combine by key
    fn handle_co_group(&mut self, stage: &Stage, co_group: &CoGroupTransform) -> Result<()> {
        let prefix = self.vertex_name(&co_group.name, &["-stage1", "-stage2"]);
        let stage1 = self.add_internal_vertex(
            format!("{prefix}-stage1"),
            processors::co_accumulate_by_key_p(
                co_group.key_fns.clone(),
                co_group.aggregate.clone(),
            ),
        )?;
        let stage2 = self.add_vertex(
            stage.id(),
            format!("{prefix}-stage2"),
            processors::combine_by_key_p(co_group.aggregate.clone()),
        )?;
        let key_fns = &co_group.key_fns;
        self.add_edges(stage, stage1, |edge, ordinal| {
            edge.partitioned(key_fns[ordinal].clone())
        })?;
        self.add_shuffle(stage1, stage2);
        Ok(())
    }

    //   primary        side-1                 side-k
    //      |             | distributed          | distributed
    //      |             | broadcast            | broadcast
    //      |             v                      v
    //      |     <name>-collector-1  ...  <name>-collector-k   (one per member)
    //      |             | broadcast            | broadcast
    //      | ordinal 0   | ordinal 1, prio < 0  | ordinal k, prio < 0
    //      v             v                      v
    //     --------------- <name>-joiner ---------------
    fn handle_hash_join(&mut self, stage: &Stage, hash_join: &HashJoinTransform) -> Result<()> {
        let side_count = hash_join.clauses.len();
        let mut suffixes = vec!["-joiner".to_string()];
        suffixes.extend((1..=side_count).map(|k| format!("-collector-{k}")));
        let suffix_refs: Vec<&str> = suffixes.iter().map(String::as_str).collect();
        let prefix = self.vertex_name(&hash_join.name, &suffix_refs);

        let left_key_fns = hash_join
            .clauses
            .iter()
            .map(|clause| clause.left_key_fn().clone())
            .collect();
        let joiner = self.add_vertex(
            stage.id(),
            format!("{prefix}-joiner"),
            processors::hash_join_p(left_key_fns),
        )?;

        let upstream = stage.upstream();
        let primary = self.vertex_of(stage, upstream[0])?;
        let edge = self.draw_edge(primary, joiner, 0);
        self.add_edge(edge);

        for (index, (side, clause)) in upstream[1..].iter().zip(&hash_join.clauses).enumerate() {
            let ordinal = index + 1;
            let side_vertex = self.vertex_of(stage, *side)?;
            let collector = self.add_internal_vertex(
                format!("{prefix}-collector-{ordinal}"),
                processors::hash_join_collect_p(
                    clause.right_key_fn().clone(),
                    clause.right_project_fn().clone(),
                ),
            )?;
            self.dag
                .set_local_parallelism(collector, self.config.collector_local_parallelism);

            let into_collector = self.draw_edge(side_vertex, collector, 0).distributed().broadcast();
            self.add_edge(into_collector);
            let into_joiner = self
                .draw_edge(collector, joiner, ordinal)
                .broadcast()
                .priority(self.config.side_input_priority);
            self.add_edge(into_joiner);
        }
        Ok(())
    }

    /// A peek adds no vertex: it aliases the upstream's vertex and wraps
    /// that vertex's factory.
    fn handle_peek(&mut self, stage: &Stage, peek: &PeekTransform) -> Result<()> {
        let peeked = self.vertex_of(stage, stage.upstream()[0])?;
        self.stage_to_vertex.insert(stage.id(), peeked);

        let vertex_name = self
            .dag
            .vertex(peeked)
            .map(|v| v.name().to_string())
            .ok_or_else(|| PlanError::malformed(stage, "peeked vertex is missing from the DAG"))?;
        debug!(stage = %stage, vertex = %vertex_name, "peek wraps upstream vertex");
        self.dag.update_meta_supplier(peeked, |inner| {
            processors::peek_output_p(
                &vertex_name,
                peek.to_string_fn.clone(),
                peek.should_log_fn.clone(),
                peek.log_fn.clone(),
                inner,
            )
        });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Vertex and edge building
    // ------------------------------------------------------------------

    /// Reserve names for a stage: the first of `base`, `base-2`, `base-3`,
    /// ... for which `candidate + suffix` is free for every suffix. Returns
    /// the chosen candidate.
    fn vertex_name(&mut self, base: &str, suffixes: &[&str]) -> String {
        let mut index = 1;
        loop {
            let candidate = if index == 1 {
                base.to_string()
            } else {
                format!("{base}-{index}")
            };
            let names: Vec<String> = suffixes.iter().map(|s| format!("{candidate}{s}")).collect();
            if names.iter().all(|n| !self.vertex_names.contains(n)) {
                self.vertex_names.extend(names);
                return candidate;
            }
            index += 1;
        }
    }

    /// Add the primary vertex of `stage`.
    fn add_vertex(
        &mut self,
        stage: StageId,
        name: String,
        meta_supplier: ProcessorMetaSupplier,
    ) -> Result<VertexId> {
        let vertex = self.add_internal_vertex(name, meta_supplier)?;
        self.stage_to_vertex.insert(stage, vertex);
        Ok(vertex)
    }

    /// Add a vertex no stage maps to.
    fn add_internal_vertex(
        &mut self,
        name: String,
        meta_supplier: ProcessorMetaSupplier,
    ) -> Result<VertexId> {
        debug!(vertex = %name, "add vertex");
        let vertex = self.dag.new_vertex(name, meta_supplier)?;
        self.next_ordinal.insert(vertex, 0);
        Ok(vertex)
    }

    fn vertex_of(&self, stage: &Stage, upstream: StageId) -> Result<VertexId> {
        self.stage_to_vertex.get(&upstream).copied().ok_or_else(|| {
            PlanError::malformed(stage, format!("upstream {upstream} has not been compiled"))
        })
    }

    /// Start an edge at the next free output ordinal of `from`.
    fn draw_edge(&mut self, from: VertexId, to: VertexId, to_ordinal: usize) -> Edge {
        let cursor = self.next_ordinal.entry(from).or_insert(0);
        let from_ordinal = *cursor;
        *cursor += 1;
        Edge::from(from, from_ordinal).to(to, to_ordinal)
    }

    /// Draw one edge per upstream of `stage` into `to`, upstream `i` landing
    /// on ordinal `i`, and let `configure` set its routing.
    fn add_edges<F>(&mut self, stage: &Stage, to: VertexId, configure: F) -> Result<()>
    where
        F: Fn(Edge, usize) -> Edge,
    {
        for (ordinal, upstream) in stage.upstream().iter().enumerate() {
            let from = self.vertex_of(stage, *upstream)?;
            let edge = configure(self.draw_edge(from, to, ordinal), ordinal);
            self.add_edge(edge);
        }
        Ok(())
    }

    /// The keyed network shuffle between the two aggregation phases.
    fn add_shuffle(&mut self, stage1: VertexId, stage2: VertexId) {
        let edge = self
            .draw_edge(stage1, stage2, 0)
            .distributed()
            .partitioned_by_entry_key();
        self.add_edge(edge);
    }

    fn add_edge(&mut self, edge: Edge) {
        debug!(
            from = edge.source().index(),
            from_ordinal = edge.source_ordinal(),
            to = edge.destination().index(),
            to_ordinal = edge.destination_ordinal(),
            routing = edge.routing().label(),
            distributed = edge.is_distributed(),
            priority = edge.drain_priority(),
            "add edge"
        );
        self.dag.edge(edge);
    }
}

fn stage_at(pipeline: &Pipeline, id: StageId) -> Result<&Stage> {
    pipeline
        .stage(id)
        .ok_or_else(|| PlanError::malformed(id, "stage is not part of this pipeline"))
}

/// `name#index` for stages of `pipeline`, the bare id otherwise.
fn stage_label(pipeline: &Pipeline, id: StageId) -> String {
    pipeline
        .stage(id)
        .map_or_else(|| id.to_string(), |stage| stage.to_string())
}

/// Check a stage against the planner's expectations: its upstreams exist
/// and its transform has the right number of them.
fn check_stage(pipeline: &Pipeline, stage: &Stage) -> Result<()> {
    if let Some(unknown) = stage
        .upstream()
        .iter()
        .find(|id| pipeline.stage(**id).is_none())
    {
        return Err(PlanError::malformed(
            stage,
            format!("upstream {unknown} is not part of this pipeline"),
        ));
    }

    let inputs = stage.upstream().len();
    let expect = |ok: bool, what: String| {
        if ok {
            Ok(())
        } else {
            Err(PlanError::malformed(
                stage,
                format!("{} expects {what}, got {inputs}", stage.transform().kind()),
            ))
        }
    };
    match stage.transform() {
        Transform::Source(_) => expect(inputs == 0, "no upstream".into()),
        Transform::Sink(_)
        | Transform::Map(_)
        | Transform::Filter(_)
        | Transform::FlatMap(_)
        | Transform::GroupBy(_)
        | Transform::Peek(_) => expect(inputs == 1, "exactly one upstream".into()),
        Transform::Processor(_) => expect(inputs >= 1, "at least one upstream".into()),
        Transform::CoGroup(co_group) => expect(
            inputs >= 1 && inputs == co_group.key_fns.len(),
            format!("{} upstreams (one per key function)", co_group.key_fns.len()),
        ),
        Transform::HashJoin(hash_join) => expect(
            !hash_join.clauses.is_empty() && inputs == hash_join.clauses.len() + 1,
            format!(
                "{} upstreams (primary plus one per join clause)",
                hash_join.clauses.len() + 1
            ),
        ),
    }
}

/// Reject stages whose output nobody consumes. Only sinks may be terminal.
fn validate_no_leakage(pipeline: &Pipeline, adjacency: &IndexMap<StageId, Vec<StageId>>) -> Result<()> {
    let leaking: Vec<String> = adjacency
        .iter()
        .filter(|(_, downstream)| downstream.is_empty())
        .filter_map(|(id, _)| pipeline.stage(*id))
        .filter(|stage| !stage.transform().is_terminal())
        .map(|stage| stage.to_string())
        .collect();
    if leaking.is_empty() {
        Ok(())
    } else {
        Err(PlanError::PipelineValidation { stages: leaking })
    }
}
