//! Aggregate operations: create/accumulate/combine/finish bundles.
//!
//! The accumulator is itself a `Value`, so partial results can travel over
//! distributed edges like any other item.

use crate::function::KeyFn;
use crate::value::Value;
use std::fmt;
use std::sync::Arc;

pub type CreateFn = Arc<dyn Fn() -> Value + Send + Sync>;
pub type AccumulateFn = Arc<dyn Fn(&mut Value, &Value) + Send + Sync>;
pub type CombineFn = Arc<dyn Fn(&mut Value, &Value) + Send + Sync>;
pub type FinishFn = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// A function bundle describing an aggregation.
///
/// Co-grouping aggregations carry one accumulate function per input
/// ordinal; single-input aggregations carry exactly one.
#[derive(Clone)]
pub struct AggregateOperation {
    name: String,
    create: CreateFn,
    accumulate: Vec<AccumulateFn>,
    combine: CombineFn,
    finish: FinishFn,
}

impl AggregateOperation {
    /// Create a single-input aggregate operation.
    pub fn new(
        name: impl Into<String>,
        create: impl Fn() -> Value + Send + Sync + 'static,
        accumulate: impl Fn(&mut Value, &Value) + Send + Sync + 'static,
        combine: impl Fn(&mut Value, &Value) + Send + Sync + 'static,
        finish: impl Fn(&Value) -> Value + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            create: Arc::new(create),
            accumulate: vec![Arc::new(accumulate)],
            combine: Arc::new(combine),
            finish: Arc::new(finish),
        }
    }

    /// Add an accumulate function for the next input ordinal.
    pub fn and_accumulate(
        mut self,
        accumulate: impl Fn(&mut Value, &Value) + Send + Sync + 'static,
    ) -> Self {
        self.accumulate.push(Arc::new(accumulate));
        self
    }

    /// Counts items.
    pub fn counting() -> Self {
        Self::new(
            "count",
            || Value::Int(0),
            |acc, _| *acc = Value::Int(acc.as_i64().unwrap_or(0) + 1),
            |acc, other| *acc = Value::Int(acc.as_i64().unwrap_or(0) + other.as_i64().unwrap_or(0)),
            |acc| acc.clone(),
        )
    }

    /// Sums the numeric value extracted by `get_fn`. Integers stay integers
    /// until a float is seen.
    pub fn summing(get_fn: KeyFn) -> Self {
        Self::new(
            "sum",
            || Value::Int(0),
            move |acc, item| add_into(acc, &get_fn(item)),
            add_into,
            |acc| acc.clone(),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of input ordinals this operation accumulates.
    pub fn arity(&self) -> usize {
        self.accumulate.len()
    }

    pub fn create(&self) -> Value {
        (self.create)()
    }

    /// Accumulate an item arriving on `ordinal`.
    ///
    /// Ordinals beyond the declared arity reuse the first function.
    pub fn accumulate(&self, ordinal: usize, acc: &mut Value, item: &Value) {
        let f = self.accumulate.get(ordinal).unwrap_or(&self.accumulate[0]);
        f(acc, item)
    }

    pub fn combine(&self, acc: &mut Value, other: &Value) {
        (self.combine)(acc, other)
    }

    pub fn finish(&self, acc: &Value) -> Value {
        (self.finish)(acc)
    }
}

impl fmt::Debug for AggregateOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregateOperation")
            .field("name", &self.name)
            .field("arity", &self.arity())
            .finish()
    }
}

fn add_into(acc: &mut Value, other: &Value) {
    *acc = match (&*acc, other) {
        (Value::Int(a), Value::Int(b)) => Value::Int(a + b),
        (a, b) => Value::Float(a.as_f64().unwrap_or(0.0) + b.as_f64().unwrap_or(0.0)),
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function;

    #[test]
    fn test_counting() {
        let op = AggregateOperation::counting();
        let mut acc = op.create();
        op.accumulate(0, &mut acc, &Value::from("a"));
        op.accumulate(0, &mut acc, &Value::from("b"));

        let mut other = op.create();
        op.accumulate(0, &mut other, &Value::from("c"));
        op.combine(&mut acc, &other);

        assert_eq!(op.finish(&acc), Value::Int(3));
    }

    #[test]
    fn test_summing_promotes_to_float() {
        let op = AggregateOperation::summing(function::identity());
        let mut acc = op.create();
        op.accumulate(0, &mut acc, &Value::from(2));
        assert_eq!(acc, Value::Int(2));
        op.accumulate(0, &mut acc, &Value::from(0.5));
        assert_eq!(op.finish(&acc), Value::Float(2.5));
    }

    #[test]
    fn test_per_ordinal_accumulate() {
        let op = AggregateOperation::counting().and_accumulate(|acc, _| {
            *acc = Value::Int(acc.as_i64().unwrap_or(0) + 10);
        });
        assert_eq!(op.arity(), 2);

        let mut acc = op.create();
        op.accumulate(0, &mut acc, &Value::Null);
        op.accumulate(1, &mut acc, &Value::Null);
        assert_eq!(acc, Value::Int(11));
    }
}
