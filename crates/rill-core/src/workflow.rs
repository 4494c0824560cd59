//! Declarative pipeline files.
//!
//! A workflow lists stages by id; every stage except a source names the
//! stage(s) it reads from. User functions come from a small vocabulary:
//! - keys: an object field, or the whole item when no field is given
//! - filters: keep items whose field is truthy
//! - flat-map: emit the elements of an array field
//! - aggregates: `count` or `sum:<field>`
//!
//! ```yaml
//! stages:
//!   - id: orders
//!     kind: source
//!     items: [{customer: a, total: 3}, {customer: b, total: 4}]
//!   - id: totals
//!     kind: group_by
//!     input: orders
//!     key: customer
//!     aggregate: sum:total
//!   - id: out
//!     kind: sink
//!     input: totals
//! ```

use crate::aggregate::AggregateOperation;
use crate::function::{self, FlatMapFn, KeyFn, MapFn, PredicateFn};
use crate::join::JoinClause;
use crate::pipeline::{Pipeline, StageId};
use crate::processors;
use crate::transform::{
    CoGroupTransform, FilterTransform, FlatMapTransform, GroupByTransform, HashJoinTransform,
    MapTransform, PeekTransform, SinkTransform, SourceTransform, Transform,
};
use crate::value::Value;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Workflow {
    /// Optional human-readable title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Stages in declaration order. Inputs must be declared earlier.
    #[serde(default)]
    pub stages: Vec<StageSpec>,
}

/// One stage of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageSpec {
    /// Identifier other stages use to refer to this one.
    pub id: String,

    /// Overrides the stage name used for vertex naming.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(flatten)]
    pub kind: StageKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageKind {
    /// Emits inline items, spread across instances.
    Source {
        #[serde(default)]
        items: Vec<Value>,
    },
    Sink {
        input: String,
        #[serde(default)]
        sink: SinkKind,
    },
    /// Replaces each item with one of its fields.
    Map { input: String, field: String },
    /// Keeps items whose field is truthy.
    Filter { input: String, field: String },
    /// Emits the elements of an array field.
    FlatMap { input: String, field: String },
    GroupBy {
        input: String,
        #[serde(default)]
        key: Option<String>,
        aggregate: String,
    },
    CoGroup {
        inputs: Vec<KeyedInput>,
        aggregate: String,
    },
    /// Enriches `input` with lookups into every `join` side.
    HashJoin { input: String, join: Vec<JoinSpec> },
    /// Logs items leaving `input`; with `when`, only items whose field is
    /// truthy.
    Peek {
        input: String,
        #[serde(default)]
        when: Option<String>,
    },
}

/// Where a sink sends its items.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    #[default]
    Log,
    Noop,
}

/// A co-group input and the field it is keyed by.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyedInput {
    pub input: String,
    #[serde(default)]
    pub key: Option<String>,
}

/// A hash-join side input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinSpec {
    pub input: String,
    /// Field of the primary item; the whole item when absent.
    #[serde(default)]
    pub left_key: Option<String>,
    /// Field of the side item; defaults to `left_key`.
    #[serde(default)]
    pub right_key: Option<String>,
    /// Field of the side item to attach instead of the whole item.
    #[serde(default)]
    pub project: Option<String>,
}

impl StageKind {
    /// Ids this stage reads from, in input-ordinal order.
    pub fn inputs(&self) -> Vec<&str> {
        match self {
            StageKind::Source { .. } => vec![],
            StageKind::Sink { input, .. }
            | StageKind::Map { input, .. }
            | StageKind::Filter { input, .. }
            | StageKind::FlatMap { input, .. }
            | StageKind::GroupBy { input, .. }
            | StageKind::Peek { input, .. } => vec![input.as_str()],
            StageKind::CoGroup { inputs, .. } => inputs.iter().map(|i| i.input.as_str()).collect(),
            StageKind::HashJoin { input, join } => std::iter::once(input.as_str())
                .chain(join.iter().map(|j| j.input.as_str()))
                .collect(),
        }
    }
}

impl Workflow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage.
    pub fn stage(mut self, id: impl Into<String>, kind: StageKind) -> Self {
        self.stages.push(StageSpec {
            id: id.into(),
            name: None,
            kind,
        });
        self
    }

    /// Build the pipeline this workflow describes.
    pub fn to_pipeline(&self) -> Result<Pipeline, WorkflowError> {
        let mut pipeline = Pipeline::new();
        let mut ids: IndexMap<&str, StageId> = IndexMap::new();

        for spec in &self.stages {
            if ids.contains_key(spec.id.as_str()) {
                return Err(WorkflowError::Invalid(format!(
                    "duplicate stage id '{}'",
                    spec.id
                )));
            }
            let upstream = spec
                .kind
                .inputs()
                .into_iter()
                .map(|input| {
                    ids.get(input)
                        .copied()
                        .ok_or_else(|| WorkflowError::UnknownStage {
                            stage: spec.id.clone(),
                            input: input.to_string(),
                        })
                })
                .collect::<Result<Vec<_>, _>>()?;

            let transform = spec.to_transform()?;
            let id = pipeline.add_stage(transform, upstream);
            ids.insert(spec.id.as_str(), id);
        }

        Ok(pipeline)
    }

    /// Parse workflow from bytes, detecting the format from `path`'s
    /// extension (YAML when unknown).
    pub fn from_bytes(data: &[u8], path: Option<&str>) -> Result<Self, WorkflowError> {
        let format = path
            .and_then(detect_format)
            .unwrap_or_else(|| "yaml".to_string());

        Self::from_bytes_format(data, &format)
    }

    /// Parse workflow from bytes with explicit format.
    pub fn from_bytes_format(data: &[u8], format: &str) -> Result<Self, WorkflowError> {
        match format {
            "json" => serde_json::from_slice(data).map_err(|e| WorkflowError::Parse(e.to_string())),
            "yaml" | "yml" => {
                serde_yaml::from_slice(data).map_err(|e| WorkflowError::Parse(e.to_string()))
            }
            "toml" => {
                let s = std::str::from_utf8(data)
                    .map_err(|e| WorkflowError::Parse(format!("invalid UTF-8: {}", e)))?;
                toml::from_str(s).map_err(|e| WorkflowError::Parse(e.to_string()))
            }
            _ => Err(WorkflowError::Parse(format!(
                "unsupported workflow format: {}",
                format
            ))),
        }
    }

    /// Serialize workflow to bytes.
    pub fn to_bytes(&self, format: &str) -> Result<Vec<u8>, WorkflowError> {
        match format {
            "json" => {
                serde_json::to_vec_pretty(self).map_err(|e| WorkflowError::Parse(e.to_string()))
            }
            "yaml" | "yml" => serde_yaml::to_string(self)
                .map(|s| s.into_bytes())
                .map_err(|e| WorkflowError::Parse(e.to_string())),
            "toml" => toml::to_string_pretty(self)
                .map(|s| s.into_bytes())
                .map_err(|e| WorkflowError::Parse(e.to_string())),
            _ => Err(WorkflowError::Parse(format!(
                "unsupported workflow format: {}",
                format
            ))),
        }
    }
}

impl StageSpec {
    fn name_or(&self, default: &str) -> String {
        self.name.clone().unwrap_or_else(|| default.to_string())
    }

    fn to_transform(&self) -> Result<Transform, WorkflowError> {
        let transform = match &self.kind {
            StageKind::Source { items } => Transform::Source(SourceTransform::new(
                self.name_or(&self.id),
                processors::list_source_p(items.clone()),
            )),
            StageKind::Sink { sink, .. } => {
                let name = self.name_or(&self.id);
                let meta_supplier = match sink {
                    SinkKind::Log => processors::log_sink_p(&name),
                    SinkKind::Noop => processors::noop_p(),
                };
                Transform::Sink(SinkTransform::new(name, meta_supplier))
            }
            StageKind::Map { field, .. } => {
                let map_fn: MapFn = function::field(field.as_str());
                Transform::Map(MapTransform {
                    name: self.name_or("map"),
                    map_fn,
                })
            }
            StageKind::Filter { field, .. } => Transform::Filter(FilterTransform {
                name: self.name_or("filter"),
                filter_fn: truthy(field),
            }),
            StageKind::FlatMap { field, .. } => Transform::FlatMap(FlatMapTransform {
                name: self.name_or("flatMap"),
                flat_map_fn: elements(field),
            }),
            StageKind::GroupBy { key, aggregate, .. } => Transform::GroupBy(GroupByTransform {
                name: self.name_or("groupBy"),
                key_fn: key_fn(key.as_deref()),
                aggregate: parse_aggregate(&self.id, aggregate)?,
            }),
            StageKind::CoGroup { inputs, aggregate } => {
                if inputs.is_empty() {
                    return Err(self.invalid("co_group needs at least one input"));
                }
                Transform::CoGroup(CoGroupTransform {
                    name: self.name_or("coGroup"),
                    key_fns: inputs.iter().map(|i| key_fn(i.key.as_deref())).collect(),
                    aggregate: parse_aggregate(&self.id, aggregate)?,
                })
            }
            StageKind::HashJoin { join, .. } => {
                if join.is_empty() {
                    return Err(self.invalid("hash_join needs at least one side input"));
                }
                let clauses = join
                    .iter()
                    .map(|side| {
                        let right = side.right_key.as_deref().or(side.left_key.as_deref());
                        let clause =
                            JoinClause::on(key_fn(side.left_key.as_deref()), key_fn(right));
                        match &side.project {
                            Some(project) => clause.project_right(function::field(project.as_str())),
                            None => clause,
                        }
                    })
                    .collect();
                Transform::HashJoin(HashJoinTransform {
                    name: self.name_or("hashJoin"),
                    clauses,
                })
            }
            StageKind::Peek { when, .. } => Transform::Peek(PeekTransform {
                name: self.name_or("peek"),
                should_log_fn: when.as_deref().map(truthy).unwrap_or_else(function::always),
                to_string_fn: function::display(),
                log_fn: None,
            }),
        };
        Ok(transform)
    }

    fn invalid(&self, reason: &str) -> WorkflowError {
        WorkflowError::Invalid(format!("stage '{}': {}", self.id, reason))
    }
}

fn key_fn(field: Option<&str>) -> KeyFn {
    match field {
        Some(field) => function::field(field),
        None => function::identity(),
    }
}

fn truthy(field: &str) -> PredicateFn {
    let field = field.to_string();
    Arc::new(move |item: &Value| item.field(&field).is_some_and(Value::is_truthy))
}

fn elements(field: &str) -> FlatMapFn {
    let field = field.to_string();
    Arc::new(move |item: &Value| {
        item.field(&field)
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
    })
}

/// `count` or `sum:<field>`.
fn parse_aggregate(stage: &str, spec: &str) -> Result<AggregateOperation, WorkflowError> {
    match spec.split_once(':') {
        None if spec == "count" => Ok(AggregateOperation::counting()),
        Some(("sum", field)) if !field.is_empty() => {
            Ok(AggregateOperation::summing(function::field(field)))
        }
        _ => Err(WorkflowError::Invalid(format!(
            "stage '{}': unknown aggregate '{}'",
            stage, spec
        ))),
    }
}

/// Errors related to workflow parsing and conversion.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("failed to parse workflow: {0}")]
    Parse(String),

    #[error("stage '{stage}' reads from unknown stage '{input}'")]
    UnknownStage { stage: String, input: String },

    #[error("invalid workflow: {0}")]
    Invalid(String),
}

/// Detect format from file path extension.
fn detect_format(path: &str) -> Option<String> {
    let ext = path.rsplit('.').next()?;
    match ext.to_lowercase().as_str() {
        "json" => Some("json".into()),
        "yaml" | "yml" => Some("yaml".into()),
        "toml" => Some("toml".into()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::{ProcessorContext, run_to_completion};

    const ORDERS: &str = r#"
stages:
  - id: orders
    kind: source
    items:
      - {customer: a, total: 3, lines: [1, 2]}
      - {customer: b, total: 4, lines: []}
  - id: big
    kind: filter
    input: orders
    field: total
  - id: totals
    kind: group_by
    input: big
    key: customer
    aggregate: sum:total
  - id: out
    kind: sink
    input: totals
"#;

    #[test]
    fn test_yaml_to_dag() {
        let workflow = Workflow::from_bytes(ORDERS.as_bytes(), Some("orders.yaml")).unwrap();
        assert_eq!(workflow.stages.len(), 4);

        let dag = workflow.to_pipeline().unwrap().to_dag().unwrap();
        assert_eq!(dag.vertex_count(), 5);
        assert!(dag.vertex_id("orders").is_some());
        assert!(dag.vertex_id("groupBy-stage1").is_some());
        assert!(dag.vertex_id("groupBy-stage2").is_some());
        assert!(dag.vertex_id("out").is_some());
    }

    #[test]
    fn test_json_and_toml() {
        let json = r#"{"stages": [
            {"id": "src", "kind": "source", "items": [1, 2]},
            {"id": "sink", "kind": "sink", "input": "src", "sink": "noop"}
        ]}"#;
        let workflow = Workflow::from_bytes(json.as_bytes(), Some("w.json")).unwrap();
        assert_eq!(workflow.to_pipeline().unwrap().len(), 2);

        let toml = r#"
[[stages]]
id = "src"
kind = "source"
items = [1, 2]

[[stages]]
id = "sink"
kind = "sink"
input = "src"
"#;
        let workflow = Workflow::from_bytes(toml.as_bytes(), Some("w.toml")).unwrap();
        assert_eq!(workflow.to_pipeline().unwrap().len(), 2);
    }

    #[test]
    fn test_unknown_input() {
        let workflow = Workflow::new()
            .stage("src", StageKind::Source { items: vec![] })
            .stage(
                "sink",
                StageKind::Sink {
                    input: "missing".into(),
                    sink: SinkKind::Noop,
                },
            );

        match workflow.to_pipeline() {
            Err(WorkflowError::UnknownStage { stage, input }) => {
                assert_eq!(stage, "sink");
                assert_eq!(input, "missing");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_id() {
        let workflow = Workflow::new()
            .stage("src", StageKind::Source { items: vec![] })
            .stage("src", StageKind::Source { items: vec![] });
        assert!(matches!(
            workflow.to_pipeline(),
            Err(WorkflowError::Invalid(_))
        ));
    }

    #[test]
    fn test_unknown_aggregate() {
        assert!(parse_aggregate("s", "count").is_ok());
        assert!(parse_aggregate("s", "sum:total").is_ok());
        assert!(parse_aggregate("s", "sum:").is_err());
        assert!(parse_aggregate("s", "median").is_err());
    }

    #[test]
    fn test_vocabulary_functions() {
        let item: Value =
            serde_json::from_str(r#"{"ok": true, "tags": ["x", "y"], "zero": 0}"#).unwrap();

        assert!(truthy("ok")(&item));
        assert!(!truthy("zero")(&item));
        assert!(!truthy("missing")(&item));
        assert_eq!(elements("tags")(&item), vec![Value::from("x"), Value::from("y")]);
        assert!(elements("ok")(&item).is_empty());
    }

    #[test]
    fn test_hash_join_workflow() {
        let yaml = r#"
stages:
  - id: orders
    kind: source
    items: [{customer: a}]
  - id: customers
    kind: source
    items: [{id: a, name: Alice}]
  - id: joined
    kind: hash_join
    input: orders
    join:
      - input: customers
        left_key: customer
        right_key: id
        project: name
  - id: out
    kind: sink
    input: joined
"#;
        let workflow = Workflow::from_bytes_format(yaml.as_bytes(), "yaml").unwrap();
        let dag = workflow.to_pipeline().unwrap().to_dag().unwrap();
        // 2 sources + joiner + 1 collector + sink
        assert_eq!(dag.vertex_count(), 5);
        assert!(dag.vertex_id("hashJoin-joiner").is_some());
        assert!(dag.vertex_id("hashJoin-collector-1").is_some());
    }

    #[test]
    fn test_source_items_reach_instances() {
        let workflow = Workflow::from_bytes(ORDERS.as_bytes(), None).unwrap();
        let dag = workflow.to_pipeline().unwrap().to_dag().unwrap();
        let source = dag.vertex_by_name("orders").unwrap();

        let mut processor = source.meta_supplier().get(&ProcessorContext::single());
        assert_eq!(run_to_completion(processor.as_mut(), vec![]).len(), 2);
    }

    #[test]
    fn test_yaml_roundtrip() {
        let workflow = Workflow::from_bytes(ORDERS.as_bytes(), None).unwrap();
        let bytes = workflow.to_bytes("yaml").unwrap();
        let parsed = Workflow::from_bytes_format(&bytes, "yaml").unwrap();
        assert_eq!(parsed.stages.len(), 4);
        assert_eq!(parsed.stages[2].id, "totals");
    }
}
