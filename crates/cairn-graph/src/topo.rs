//! Iterative topological sort with cycle detection.
//!
//! The sort is a depth-first traversal driven by an explicit work stack of
//! `(node, Visit)` pairs, so graph size is bounded by heap, not by the call
//! stack. A node is appended to the order when it is popped in its
//! [`Visit::Leave`] state, i.e. after every node it depends on.
//!
//! A cycle is reported at the first node that is pushed while it is still on
//! the current traversal path. Nodes that were merely visited on an earlier,
//! finished path are not cycles.

use std::collections::HashMap;
use std::hash::Hash;

use crate::GraphError;
use crate::key::FieldKey;

/// Traversal direction for an entry on the work stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    Enter,
    Leave,
}

/// Per-node DFS state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    OnPath,
    Done,
}

/// The node at which a dependency cycle closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleAt<K>(pub K);

/// Order `nodes` so that every node comes after all of its upstream nodes.
///
/// `upstream` maps each node to the nodes it depends on. Upstream entries
/// that are not keys of `upstream` are outside the graph and are ignored.
/// Roots are visited in `nodes` order and upstream lists in their stored
/// order, so the output is deterministic for a given input.
///
/// # Errors
///
/// Returns [`CycleAt`] with the node that closed the first cycle found.
pub fn topological_order<K>(
    nodes: &[K],
    upstream: &HashMap<K, Vec<K>>,
) -> Result<Vec<K>, CycleAt<K>>
where
    K: Copy + Eq + Hash,
{
    let mut order = Vec::with_capacity(nodes.len());
    let mut marks: HashMap<K, Mark> = HashMap::with_capacity(nodes.len());
    let mut stack: Vec<(K, Visit)> = Vec::new();

    for &root in nodes {
        if marks.contains_key(&root) {
            continue;
        }
        stack.push((root, Visit::Enter));

        while let Some((node, visit)) = stack.pop() {
            match visit {
                Visit::Leave => {
                    marks.insert(node, Mark::Done);
                    order.push(node);
                }
                Visit::Enter => {
                    // A node can be queued more than once before it is first
                    // entered; later copies are finished by then.
                    if marks.get(&node) == Some(&Mark::Done) {
                        continue;
                    }
                    marks.insert(node, Mark::OnPath);
                    stack.push((node, Visit::Leave));

                    let Some(deps) = upstream.get(&node) else {
                        continue;
                    };
                    // Reverse so the first upstream entry is popped first.
                    for &dep in deps.iter().rev() {
                        if !upstream.contains_key(&dep) {
                            continue;
                        }
                        match marks.get(&dep) {
                            Some(Mark::OnPath) => return Err(CycleAt(dep)),
                            Some(Mark::Done) => {}
                            None => stack.push((dep, Visit::Enter)),
                        }
                    }
                }
            }
        }
    }

    Ok(order)
}

/// [`topological_order`] specialised to field keys, with the graph error type.
pub fn sort_fields(
    nodes: &[FieldKey],
    upstream: &HashMap<FieldKey, Vec<FieldKey>>,
) -> Result<Vec<FieldKey>, GraphError> {
    topological_order(nodes, upstream).map_err(|CycleAt(at)| GraphError::Cycle { at })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
