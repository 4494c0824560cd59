//! Processor interface: what a vertex's factory produces.
//!
//! The execution runtime (outside this crate) instantiates one processor per
//! parallel unit on every member, feeds it items per input ordinal and
//! forwards whatever it puts in its outbox along the vertex's outbound
//! edges. The planner only deals in factories (`ProcessorMetaSupplier`).

use crate::value::Value;
use std::fmt;
use std::sync::Arc;

/// Collects items emitted by a processor during one call.
#[derive(Debug, Default)]
pub struct Outbox {
    items: Vec<Value>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit an item downstream.
    pub fn offer(&mut self, item: Value) {
        self.items.push(item);
    }

    /// Items emitted so far, in emission order.
    pub fn items(&self) -> &[Value] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Take all emitted items, leaving the outbox empty.
    pub fn drain(&mut self) -> Vec<Value> {
        std::mem::take(&mut self.items)
    }
}

/// Where a processor instance runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorContext {
    /// Index of the cluster member running this instance.
    pub member_index: usize,
    /// Number of cluster members.
    pub member_count: usize,
    /// Index of this instance among the vertex's instances on its member.
    pub local_index: usize,
    /// Number of instances of the vertex on each member.
    pub local_parallelism: usize,
}

impl ProcessorContext {
    /// Context for a single instance on a single member.
    pub fn single() -> Self {
        Self {
            member_index: 0,
            member_count: 1,
            local_index: 0,
            local_parallelism: 1,
        }
    }

    /// Index of this instance across the whole cluster.
    pub fn global_index(&self) -> usize {
        self.member_index * self.local_parallelism + self.local_index
    }

    /// Number of instances of the vertex across the whole cluster.
    pub fn total_parallelism(&self) -> usize {
        self.member_count * self.local_parallelism
    }
}

impl Default for ProcessorContext {
    fn default() -> Self {
        Self::single()
    }
}

/// A unit of processing logic.
///
/// Input ordinals are drained in edge-priority order by the runtime: all
/// items of lower-priority edges arrive, followed by `complete_edge`,
/// before any item of a higher-priority edge.
pub trait Processor: Send {
    /// Called once before any item.
    fn init(&mut self, ctx: &ProcessorContext) {
        let _ = ctx;
    }

    /// Handle an item received on input `ordinal`.
    fn process(&mut self, ordinal: usize, item: Value, outbox: &mut Outbox);

    /// Input `ordinal` is exhausted.
    fn complete_edge(&mut self, ordinal: usize, outbox: &mut Outbox) {
        let _ = (ordinal, outbox);
    }

    /// All inputs are exhausted. Sources emit their items here.
    fn complete(&mut self, outbox: &mut Outbox) {
        let _ = outbox;
    }
}

type SupplierFn = Arc<dyn Fn(&ProcessorContext) -> Box<dyn Processor> + Send + Sync>;

/// Factory producing processors for every member and parallel unit of a
/// vertex.
#[derive(Clone)]
pub struct ProcessorMetaSupplier {
    supplier: SupplierFn,
    preferred_local_parallelism: Option<usize>,
}

impl ProcessorMetaSupplier {
    /// Factory calling `f` for every processor instance.
    pub fn of<F>(f: F) -> Self
    where
        F: Fn(&ProcessorContext) -> Box<dyn Processor> + Send + Sync + 'static,
    {
        Self {
            supplier: Arc::new(f),
            preferred_local_parallelism: None,
        }
    }

    /// Factory for processors that don't care where they run.
    pub fn of_simple<F>(f: F) -> Self
    where
        F: Fn() -> Box<dyn Processor> + Send + Sync + 'static,
    {
        Self::of(move |_| f())
    }

    /// Ask the runtime for a fixed number of instances per member.
    pub fn with_preferred_local_parallelism(mut self, parallelism: usize) -> Self {
        self.preferred_local_parallelism = Some(parallelism);
        self
    }

    pub fn preferred_local_parallelism(&self) -> Option<usize> {
        self.preferred_local_parallelism
    }

    /// Create and initialize the processor for `ctx`.
    pub fn get(&self, ctx: &ProcessorContext) -> Box<dyn Processor> {
        let mut processor = (self.supplier)(ctx);
        processor.init(ctx);
        processor
    }

    /// Wrap every processor this factory produces.
    pub fn wrap<F>(self, decorate: F) -> Self
    where
        F: Fn(Box<dyn Processor>) -> Box<dyn Processor> + Send + Sync + 'static,
    {
        let inner = self.supplier;
        Self {
            supplier: Arc::new(move |ctx: &ProcessorContext| decorate(inner(ctx))),
            preferred_local_parallelism: self.preferred_local_parallelism,
        }
    }
}

impl fmt::Debug for ProcessorMetaSupplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessorMetaSupplier")
            .field("preferred_local_parallelism", &self.preferred_local_parallelism)
            .finish_non_exhaustive()
    }
}

/// Feed `items` through a processor on ordinal 0 and complete it, returning
/// everything it emitted. Handy for driving stock processors in tests.
pub fn run_to_completion(processor: &mut dyn Processor, items: Vec<Value>) -> Vec<Value> {
    let mut outbox = Outbox::new();
    for item in items {
        processor.process(0, item, &mut outbox);
    }
    processor.complete_edge(0, &mut outbox);
    processor.complete(&mut outbox);
    outbox.drain()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Echo;

    impl Processor for Echo {
        fn process(&mut self, _ordinal: usize, item: Value, outbox: &mut Outbox) {
            outbox.offer(item);
        }
    }

    struct Doubler(Box<dyn Processor>);

    impl Processor for Doubler {
        fn process(&mut self, ordinal: usize, item: Value, outbox: &mut Outbox) {
            self.0.process(ordinal, item.clone(), outbox);
            self.0.process(ordinal, item, outbox);
        }
    }

    #[test]
    fn test_context_indices() {
        let ctx = ProcessorContext {
            member_index: 2,
            member_count: 3,
            local_index: 1,
            local_parallelism: 4,
        };
        assert_eq!(ctx.global_index(), 9);
        assert_eq!(ctx.total_parallelism(), 12);
    }

    #[test]
    fn test_meta_supplier_creates_per_instance() {
        let created = Arc::new(AtomicUsize::new(0));
        let counter = created.clone();
        let meta = ProcessorMetaSupplier::of_simple(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Box::new(Echo)
        });

        let _a = meta.get(&ProcessorContext::single());
        let _b = meta.get(&ProcessorContext::single());
        assert_eq!(created.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_wrap_keeps_parallelism() {
        let meta = ProcessorMetaSupplier::of_simple(|| Box::new(Echo))
            .with_preferred_local_parallelism(1)
            .wrap(|inner| Box::new(Doubler(inner)));

        assert_eq!(meta.preferred_local_parallelism(), Some(1));
        let mut p = meta.get(&ProcessorContext::single());
        let out = run_to_completion(p.as_mut(), vec![Value::from(1)]);
        assert_eq!(out, vec![Value::from(1), Value::from(1)]);
    }
}
