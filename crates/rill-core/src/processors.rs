//! Stock processors the planner wires into vertices.

use crate::aggregate::AggregateOperation;
use crate::function::{FlatMapFn, KeyFn, LogFn, MapFn, PredicateFn, ToStringFn};
use crate::processor::{Outbox, Processor, ProcessorContext, ProcessorMetaSupplier};
use crate::value::Value;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

// ============================================================================
// Stateless
// ============================================================================

struct MapP(MapFn);

impl Processor for MapP {
    fn process(&mut self, _ordinal: usize, item: Value, outbox: &mut Outbox) {
        outbox.offer((self.0)(&item));
    }
}

struct FilterP(PredicateFn);

impl Processor for FilterP {
    fn process(&mut self, _ordinal: usize, item: Value, outbox: &mut Outbox) {
        if (self.0)(&item) {
            outbox.offer(item);
        }
    }
}

struct FlatMapP(FlatMapFn);

impl Processor for FlatMapP {
    fn process(&mut self, _ordinal: usize, item: Value, outbox: &mut Outbox) {
        for out in (self.0)(&item) {
            outbox.offer(out);
        }
    }
}

pub fn map_p(map_fn: MapFn) -> ProcessorMetaSupplier {
    ProcessorMetaSupplier::of_simple(move || Box::new(MapP(map_fn.clone())))
}

pub fn filter_p(filter_fn: PredicateFn) -> ProcessorMetaSupplier {
    ProcessorMetaSupplier::of_simple(move || Box::new(FilterP(filter_fn.clone())))
}

pub fn flat_map_p(flat_map_fn: FlatMapFn) -> ProcessorMetaSupplier {
    ProcessorMetaSupplier::of_simple(move || Box::new(FlatMapP(flat_map_fn.clone())))
}

// ============================================================================
// Two-phase aggregation
// ============================================================================

/// First phase: accumulate items per key, one key function per input
/// ordinal. Emits `[key, accumulator]` entries once all inputs complete.
struct AccumulateByKeyP {
    key_fns: Vec<KeyFn>,
    op: AggregateOperation,
    groups: IndexMap<Value, Value>,
}

impl Processor for AccumulateByKeyP {
    fn process(&mut self, ordinal: usize, item: Value, _outbox: &mut Outbox) {
        let Some(key_fn) = self.key_fns.get(ordinal).or_else(|| self.key_fns.first()) else {
            tracing::warn!(ordinal, %item, "accumulate stage has no key function; dropping item");
            return;
        };
        let key = key_fn(&item);
        let acc = self
            .groups
            .entry(key)
            .or_insert_with(|| self.op.create());
        self.op.accumulate(ordinal, acc, &item);
    }

    fn complete(&mut self, outbox: &mut Outbox) {
        for (key, acc) in self.groups.drain(..) {
            outbox.offer(Value::entry(key, acc));
        }
    }
}

/// Second phase: combine partial accumulators per entry key and emit
/// finished results.
struct CombineByKeyP {
    op: AggregateOperation,
    groups: IndexMap<Value, Value>,
}

impl Processor for CombineByKeyP {
    fn process(&mut self, _ordinal: usize, item: Value, _outbox: &mut Outbox) {
        let Some((key, partial)) = item.as_entry() else {
            tracing::warn!(%item, "combine stage received a non-entry item; dropping it");
            return;
        };
        let acc = self
            .groups
            .entry(key.clone())
            .or_insert_with(|| self.op.create());
        self.op.combine(acc, partial);
    }

    fn complete(&mut self, outbox: &mut Outbox) {
        for (key, acc) in self.groups.drain(..) {
            let result = self.op.finish(&acc);
            outbox.offer(Value::entry(key, result));
        }
    }
}

pub fn accumulate_by_key_p(key_fn: KeyFn, op: AggregateOperation) -> ProcessorMetaSupplier {
    co_accumulate_by_key_p(vec![key_fn], op)
}

pub fn co_accumulate_by_key_p(key_fns: Vec<KeyFn>, op: AggregateOperation) -> ProcessorMetaSupplier {
    ProcessorMetaSupplier::of_simple(move || {
        Box::new(AccumulateByKeyP {
            key_fns: key_fns.clone(),
            op: op.clone(),
            groups: IndexMap::new(),
        })
    })
}

pub fn combine_by_key_p(op: AggregateOperation) -> ProcessorMetaSupplier {
    ProcessorMetaSupplier::of_simple(move || {
        Box::new(CombineByKeyP {
            op: op.clone(),
            groups: IndexMap::new(),
        })
    })
}

// ============================================================================
// Hash join
// ============================================================================

/// Materializes one side input into a lookup table, emitted as a single
/// array of `[key, projected]` entries when the input completes.
struct HashJoinCollectP {
    key_fn: KeyFn,
    project_fn: MapFn,
    table: IndexMap<Value, Value>,
}

impl Processor for HashJoinCollectP {
    fn process(&mut self, _ordinal: usize, item: Value, _outbox: &mut Outbox) {
        let key = (self.key_fn)(&item);
        let projected = (self.project_fn)(&item);
        self.table.insert(key, projected);
    }

    fn complete(&mut self, outbox: &mut Outbox) {
        let entries = self
            .table
            .drain(..)
            .map(|(key, value)| Value::entry(key, value))
            .collect();
        outbox.offer(Value::Array(entries));
    }
}

/// Probes primary items (ordinal 0) against the lookup tables received on
/// ordinals `1..=k`, emitting `[item, match_1, ..., match_k]`.
struct HashJoinP {
    left_key_fns: Vec<KeyFn>,
    tables: Vec<HashMap<Value, Value>>,
}

impl HashJoinP {
    fn load_table(&mut self, ordinal: usize, table: Value) {
        let Some(slot) = self.tables.get_mut(ordinal - 1) else {
            tracing::warn!(ordinal, "hash join received a table on an unknown ordinal");
            return;
        };
        if let Value::Array(entries) = table {
            for entry in entries {
                if let Value::Array(mut pair) = entry
                    && pair.len() == 2
                {
                    let value = pair.pop().unwrap_or(Value::Null);
                    let key = pair.pop().unwrap_or(Value::Null);
                    slot.insert(key, value);
                }
            }
        }
    }
}

impl Processor for HashJoinP {
    fn process(&mut self, ordinal: usize, item: Value, outbox: &mut Outbox) {
        if ordinal > 0 {
            self.load_table(ordinal, item);
            return;
        }
        let mut joined = Vec::with_capacity(self.tables.len() + 1);
        for (key_fn, table) in self.left_key_fns.iter().zip(&self.tables) {
            let key = key_fn(&item);
            joined.push(table.get(&key).cloned().unwrap_or(Value::Null));
        }
        joined.insert(0, item);
        outbox.offer(Value::Array(joined));
    }
}

pub fn hash_join_collect_p(key_fn: KeyFn, project_fn: MapFn) -> ProcessorMetaSupplier {
    ProcessorMetaSupplier::of_simple(move || {
        Box::new(HashJoinCollectP {
            key_fn: key_fn.clone(),
            project_fn: project_fn.clone(),
            table: IndexMap::new(),
        })
    })
}

pub fn hash_join_p(left_key_fns: Vec<KeyFn>) -> ProcessorMetaSupplier {
    ProcessorMetaSupplier::of_simple(move || {
        Box::new(HashJoinP {
            tables: vec![HashMap::new(); left_key_fns.len()],
            left_key_fns: left_key_fns.clone(),
        })
    })
}

// ============================================================================
// Peek
// ============================================================================

/// Forwards everything the inner processor emits and reports the items
/// accepted by `should_log`.
struct PeekOutputP {
    inner: Box<dyn Processor>,
    vertex: Arc<str>,
    to_string_fn: ToStringFn,
    should_log_fn: PredicateFn,
    log_fn: Option<LogFn>,
}

impl PeekOutputP {
    fn inspect_from(&self, outbox: &Outbox, start: usize) {
        // The inner processor may have drained the outbox.
        for item in outbox.items().get(start..).unwrap_or_default() {
            if !(self.should_log_fn)(item) {
                continue;
            }
            let text = (self.to_string_fn)(item);
            match &self.log_fn {
                Some(log_fn) => log_fn(&text),
                None => tracing::info!(vertex = %self.vertex, "{text}"),
            }
        }
    }
}

impl Processor for PeekOutputP {
    fn init(&mut self, ctx: &ProcessorContext) {
        self.inner.init(ctx);
    }

    fn process(&mut self, ordinal: usize, item: Value, outbox: &mut Outbox) {
        let start = outbox.len();
        self.inner.process(ordinal, item, outbox);
        self.inspect_from(outbox, start);
    }

    fn complete_edge(&mut self, ordinal: usize, outbox: &mut Outbox) {
        let start = outbox.len();
        self.inner.complete_edge(ordinal, outbox);
        self.inspect_from(outbox, start);
    }

    fn complete(&mut self, outbox: &mut Outbox) {
        let start = outbox.len();
        self.inner.complete(outbox);
        self.inspect_from(outbox, start);
    }
}

/// Decorate `inner` so that its output is also reported. Without a
/// `log_fn`, rendered items go to a `tracing` info event tagged with the
/// vertex name.
pub fn peek_output_p(
    vertex: &str,
    to_string_fn: ToStringFn,
    should_log_fn: PredicateFn,
    log_fn: Option<LogFn>,
    inner: ProcessorMetaSupplier,
) -> ProcessorMetaSupplier {
    let vertex: Arc<str> = Arc::from(vertex);
    inner.wrap(move |processor| {
        Box::new(PeekOutputP {
            inner: processor,
            vertex: vertex.clone(),
            to_string_fn: to_string_fn.clone(),
            should_log_fn: should_log_fn.clone(),
            log_fn: log_fn.clone(),
        })
    })
}

// ============================================================================
// Sources and sinks
// ============================================================================

/// Emits its share of a fixed list: instance `i` of `n` emits the items at
/// positions `i`, `i + n`, ...
struct ListSourceP {
    items: Arc<Vec<Value>>,
    global_index: usize,
    total_parallelism: usize,
}

impl Processor for ListSourceP {
    fn process(&mut self, _ordinal: usize, _item: Value, _outbox: &mut Outbox) {}

    fn complete(&mut self, outbox: &mut Outbox) {
        let stride = self.total_parallelism.max(1);
        for item in self.items.iter().skip(self.global_index).step_by(stride) {
            outbox.offer(item.clone());
        }
    }
}

struct CollectSinkP(Arc<Mutex<Vec<Value>>>);

impl Processor for CollectSinkP {
    fn process(&mut self, _ordinal: usize, item: Value, _outbox: &mut Outbox) {
        let mut buffer = self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        buffer.push(item);
    }
}

struct LogSinkP(Arc<str>);

impl Processor for LogSinkP {
    fn process(&mut self, _ordinal: usize, item: Value, _outbox: &mut Outbox) {
        tracing::info!(sink = %self.0, "{item}");
    }
}

struct NoopP;

impl Processor for NoopP {
    fn process(&mut self, _ordinal: usize, _item: Value, _outbox: &mut Outbox) {}
}

pub fn list_source_p(items: Vec<Value>) -> ProcessorMetaSupplier {
    let items = Arc::new(items);
    ProcessorMetaSupplier::of(move |ctx| {
        Box::new(ListSourceP {
            items: items.clone(),
            global_index: ctx.global_index(),
            total_parallelism: ctx.total_parallelism(),
        })
    })
}

pub fn collect_sink_p(buffer: Arc<Mutex<Vec<Value>>>) -> ProcessorMetaSupplier {
    ProcessorMetaSupplier::of_simple(move || Box::new(CollectSinkP(buffer.clone())))
}

pub fn log_sink_p(name: &str) -> ProcessorMetaSupplier {
    let name: Arc<str> = Arc::from(name);
    ProcessorMetaSupplier::of_simple(move || Box::new(LogSinkP(name.clone())))
}

pub fn noop_p() -> ProcessorMetaSupplier {
    ProcessorMetaSupplier::of_simple(|| Box::new(NoopP))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function;
    use crate::processor::run_to_completion;

    fn instantiate(meta: &ProcessorMetaSupplier) -> Box<dyn Processor> {
        meta.get(&ProcessorContext::single())
    }

    fn word(w: &str, n: i64) -> Value {
        let mut obj = IndexMap::new();
        obj.insert("word".to_string(), Value::from(w));
        obj.insert("n".to_string(), Value::from(n));
        Value::Object(obj)
    }

    #[test]
    fn test_map_filter_flat_map() {
        let double = map_p(Arc::new(|v: &Value| Value::from(v.as_i64().unwrap_or(0) * 2)));
        let out = run_to_completion(instantiate(&double).as_mut(), vec![1.into(), 2.into()]);
        assert_eq!(out, vec![Value::from(2), Value::from(4)]);

        let odd = filter_p(Arc::new(|v: &Value| v.as_i64().unwrap_or(0) % 2 == 1));
        let out = run_to_completion(instantiate(&odd).as_mut(), vec![1.into(), 2.into(), 3.into()]);
        assert_eq!(out, vec![Value::from(1), Value::from(3)]);

        let explode = flat_map_p(Arc::new(|v: &Value| v.as_array().cloned().unwrap_or_default()));
        let out = run_to_completion(
            instantiate(&explode).as_mut(),
            vec![Value::from(vec![1, 2]), Value::from(vec![3])],
        );
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn test_two_phase_aggregation() {
        let op = AggregateOperation::summing(function::field("n"));
        let stage1 = accumulate_by_key_p(function::field("word"), op.clone());
        let stage2 = combine_by_key_p(op);

        // Two accumulating instances, each sees part of the input.
        let partial_a = run_to_completion(
            instantiate(&stage1).as_mut(),
            vec![word("a", 1), word("b", 2), word("a", 3)],
        );
        let partial_b = run_to_completion(instantiate(&stage1).as_mut(), vec![word("a", 10)]);

        let mut partials = partial_a;
        partials.extend(partial_b);
        let combined = run_to_completion(instantiate(&stage2).as_mut(), partials);

        assert_eq!(
            combined,
            vec![Value::entry("a", 14), Value::entry("b", 2)]
        );
    }

    #[test]
    fn test_co_accumulate_uses_per_ordinal_keys() {
        let op = AggregateOperation::counting();
        let meta = co_accumulate_by_key_p(vec![function::field("word"), function::identity()], op);
        let mut p = instantiate(&meta);
        let mut outbox = Outbox::new();
        p.process(0, word("x", 1), &mut outbox);
        p.process(1, Value::from("x"), &mut outbox);
        p.process(1, Value::from("y"), &mut outbox);
        p.complete(&mut outbox);

        assert_eq!(
            outbox.drain(),
            vec![Value::entry("x", 2), Value::entry("y", 1)]
        );
    }

    #[test]
    fn test_hash_join_collect_and_probe() {
        let collector = hash_join_collect_p(
            function::field("word"),
            Arc::new(|v: &Value| v.field("n").cloned().unwrap_or(Value::Null)),
        );
        let table = run_to_completion(
            instantiate(&collector).as_mut(),
            vec![word("a", 1), word("b", 2)],
        );
        assert_eq!(table.len(), 1);

        let joiner = hash_join_p(vec![function::identity()]);
        let mut p = instantiate(&joiner);
        let mut outbox = Outbox::new();
        for t in table {
            p.process(1, t, &mut outbox);
        }
        p.complete_edge(1, &mut outbox);
        assert!(outbox.is_empty());

        p.process(0, Value::from("b"), &mut outbox);
        p.process(0, Value::from("z"), &mut outbox);
        assert_eq!(
            outbox.drain(),
            vec![
                Value::from(vec![Value::from("b"), Value::from(2)]),
                Value::from(vec![Value::from("z"), Value::Null]),
            ]
        );
    }

    #[test]
    fn test_peek_forwards_and_reports() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let log_fn: LogFn = Arc::new(move |s: &str| sink.lock().unwrap().push(s.to_string()));

        let meta = peek_output_p(
            "numbers",
            function::display(),
            Arc::new(|v: &Value| v.as_i64().unwrap_or(0) > 1),
            Some(log_fn),
            list_source_p(vec![1.into(), 2.into(), 3.into()]),
        );
        let out = run_to_completion(instantiate(&meta).as_mut(), vec![]);

        assert_eq!(out, vec![Value::from(1), Value::from(2), Value::from(3)]);
        assert_eq!(*seen.lock().unwrap(), vec!["2".to_string(), "3".to_string()]);
    }

    #[test]
    fn test_list_source_splits_across_instances() {
        let meta = list_source_p((0..5).map(Value::from).collect());
        let mut all = Vec::new();
        for local_index in 0..2 {
            let ctx = ProcessorContext {
                local_index,
                local_parallelism: 2,
                ..ProcessorContext::single()
            };
            let mut p = meta.get(&ctx);
            all.push(run_to_completion(p.as_mut(), vec![]));
        }
        assert_eq!(all[0], vec![Value::from(0), Value::from(2), Value::from(4)]);
        assert_eq!(all[1], vec![Value::from(1), Value::from(3)]);
    }

    #[test]
    fn test_collect_sink() {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let meta = collect_sink_p(buffer.clone());
        let out = run_to_completion(instantiate(&meta).as_mut(), vec!["a".into(), "b".into()]);
        assert!(out.is_empty());
        assert_eq!(buffer.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_accumulate_without_key_fns_drops_items() {
        let meta = co_accumulate_by_key_p(vec![], AggregateOperation::counting());
        let out = run_to_completion(instantiate(&meta).as_mut(), vec![1.into(), 2.into()]);
        assert!(out.is_empty());
    }

    /// Emits items as they arrive, then throws them all away on completion.
    struct Retracting;

    impl Processor for Retracting {
        fn process(&mut self, _ordinal: usize, item: Value, outbox: &mut Outbox) {
            outbox.offer(item);
        }

        fn complete(&mut self, outbox: &mut Outbox) {
            outbox.drain();
        }
    }

    #[test]
    fn test_peek_survives_inner_drain() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let log_fn: LogFn = Arc::new(move |s: &str| sink.lock().unwrap().push(s.to_string()));

        let meta = peek_output_p(
            "retracting",
            function::display(),
            function::always(),
            Some(log_fn),
            ProcessorMetaSupplier::of_simple(|| Box::new(Retracting)),
        );
        let out = run_to_completion(instantiate(&meta).as_mut(), vec![1.into(), 2.into()]);

        assert!(out.is_empty());
        assert_eq!(*seen.lock().unwrap(), vec!["1".to_string(), "2".to_string()]);
    }
}
