//! Deterministic topological ordering.

use crate::error::{PlanError, Result};
use indexmap::IndexMap;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fmt::Display;
use std::hash::Hash;

/// Order the nodes of a forward-adjacency map (node -> its dependents) so
/// that every node precedes all of its dependents.
///
/// Among nodes that are ready at the same time the one with the smallest
/// `key_fn` value goes first, so structurally identical graphs always sort
/// the same way. Dependents missing from the map's keys are ignored.
pub fn topological_sort<T, K, F>(adjacency: &IndexMap<T, Vec<T>>, key_fn: F) -> Result<Vec<T>>
where
    T: Copy + Eq + Hash + Display,
    K: Ord,
    F: Fn(&T) -> K,
{
    topological_order(adjacency, key_fn).map_err(|stuck| PlanError::CyclicGraph {
        stages: stuck.iter().map(ToString::to_string).collect(),
    })
}

/// Same ordering as [`topological_sort`]. On a cycle, returns the nodes
/// that could not be ordered, in map order.
pub fn topological_order<T, K, F>(
    adjacency: &IndexMap<T, Vec<T>>,
    key_fn: F,
) -> std::result::Result<Vec<T>, Vec<T>>
where
    T: Copy + Eq + Hash,
    K: Ord,
    F: Fn(&T) -> K,
{
    let mut in_degree: IndexMap<T, usize> = adjacency.keys().map(|&n| (n, 0)).collect();
    for dependents in adjacency.values() {
        for dependent in dependents {
            if let Some(degree) = in_degree.get_mut(dependent) {
                *degree += 1;
            }
        }
    }

    // Min-heap on (key, insertion index); the index keeps equal keys stable.
    let mut ready = BinaryHeap::new();
    for (index, (node, degree)) in in_degree.iter().enumerate() {
        if *degree == 0 {
            ready.push(Reverse((key_fn(node), index)));
        }
    }

    let mut sorted = Vec::with_capacity(adjacency.len());
    while let Some(Reverse((_, index))) = ready.pop() {
        let Some((&node, _)) = adjacency.get_index(index) else {
            continue;
        };
        sorted.push(node);
        for dependent in &adjacency[index] {
            let Some((dep_index, _, degree)) = in_degree.get_full_mut(dependent) else {
                continue;
            };
            *degree -= 1;
            if *degree == 0 {
                ready.push(Reverse((key_fn(dependent), dep_index)));
            }
        }
    }

    if sorted.len() < adjacency.len() {
        return Err(in_degree
            .iter()
            .filter(|(_, degree)| **degree > 0)
            .map(|(node, _)| *node)
            .collect());
    }
    Ok(sorted)
}
