//! Join clauses for hash joins.

use crate::function::{self, KeyFn, MapFn};
use std::fmt;

/// How one side input joins onto the primary stream.
///
/// `left_key_fn` runs on primary items inside the joiner, while
/// `right_key_fn` and `right_project_fn` run on side-input items inside
/// that side's collector.
#[derive(Clone)]
pub struct JoinClause {
    left_key_fn: KeyFn,
    right_key_fn: KeyFn,
    right_project_fn: MapFn,
}

impl JoinClause {
    /// Join where `left_key_fn(primary) == right_key_fn(side)`; the side
    /// item is kept whole.
    pub fn on(left_key_fn: KeyFn, right_key_fn: KeyFn) -> Self {
        Self {
            left_key_fn,
            right_key_fn,
            right_project_fn: function::identity(),
        }
    }

    /// Join where both sides use the same key function.
    pub fn on_key(key_fn: KeyFn) -> Self {
        Self::on(key_fn.clone(), key_fn)
    }

    /// Project side items before they are stored in the lookup table.
    pub fn project_right(mut self, project_fn: MapFn) -> Self {
        self.right_project_fn = project_fn;
        self
    }

    pub fn left_key_fn(&self) -> &KeyFn {
        &self.left_key_fn
    }

    pub fn right_key_fn(&self) -> &KeyFn {
        &self.right_key_fn
    }

    pub fn right_project_fn(&self) -> &MapFn {
        &self.right_project_fn
    }
}

impl fmt::Debug for JoinClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("JoinClause")
    }
}
