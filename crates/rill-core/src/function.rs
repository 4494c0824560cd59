//! Opaque user functions carried by transforms.
//!
//! The planner never calls these; it only hands them to the processors it
//! wires into vertices.

use crate::value::Value;
use std::sync::Arc;

/// Extracts a grouping, join or partitioning key from an item.
pub type KeyFn = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// Maps one item to another.
pub type MapFn = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// Decides whether an item passes.
pub type PredicateFn = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Maps one item to zero or more items.
pub type FlatMapFn = Arc<dyn Fn(&Value) -> Vec<Value> + Send + Sync>;

/// Renders an item for inspection output.
pub type ToStringFn = Arc<dyn Fn(&Value) -> String + Send + Sync>;

/// Receives rendered items from a peek stage.
pub type LogFn = Arc<dyn Fn(&str) + Send + Sync>;

/// Key function returning the item itself.
pub fn identity() -> KeyFn {
    Arc::new(|item: &Value| item.clone())
}

/// Key function returning an object field, or `null` when absent.
pub fn field(name: impl Into<String>) -> KeyFn {
    let name = name.into();
    Arc::new(move |item: &Value| item.field(&name).cloned().unwrap_or(Value::Null))
}

/// Key function returning the key of a `[key, value]` entry.
pub fn entry_key() -> KeyFn {
    Arc::new(|item: &Value| item.entry_key())
}

/// Predicate accepting every item.
pub fn always() -> PredicateFn {
    Arc::new(|_: &Value| true)
}

/// Default rendering used by peek stages.
pub fn display() -> ToStringFn {
    Arc::new(|item: &Value| item.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    #[test]
    fn test_field_extraction() {
        let mut obj = IndexMap::new();
        obj.insert("user".to_string(), Value::from("ada"));
        let item = Value::Object(obj);

        assert_eq!(field("user")(&item), Value::from("ada"));
        assert_eq!(field("missing")(&item), Value::Null);
        assert_eq!(field("user")(&Value::from(1)), Value::Null);
    }

    #[test]
    fn test_entry_key_and_identity() {
        let entry = Value::entry("k", 1);
        assert_eq!(entry_key()(&entry), Value::from("k"));
        assert_eq!(identity()(&entry), entry);
    }
}
