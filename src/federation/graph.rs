//! Structural checks over a query's join list.
//!
//! Pure functions over [`SqlJson`] plus resolved table locations; no data
//! is touched, so both run before any sub-query is issued.

use std::collections::BTreeSet;

use petgraph::algo::{astar, has_path_connecting};
use petgraph::graph::{NodeIndex, UnGraph};

use super::Resolved;
use crate::error::{EngineError, EngineResult};
use crate::sql::{types_joinable, SqlJson};

/// Fail with [`EngineError::CircularJoin`] if the joins form a cycle.
///
/// Nodes are table references, so one table joined twice under two aliases
/// (a role-playing dimension) is two nodes and no cycle. A join condition
/// whose both sides belong to the same reference is a cycle of length one.
/// Several conditions of one join between the same pair of references are
/// one edge.
pub fn check_cycles(query: &SqlJson, resolved: &Resolved<'_>) -> EngineResult<()> {
    let mut graph: UnGraph<usize, ()> = UnGraph::new_undirected();
    let nodes: Vec<NodeIndex> = (0..resolved.tables.len())
        .map(|i| graph.add_node(i))
        .collect();
    let label = |i: usize| resolved.tables[i].qualified.clone();

    for join in &query.joins {
        let mut pairs: BTreeSet<(usize, usize)> = BTreeSet::new();
        for cond in &join.on {
            let left = resolved.owner(&cond.left)?;
            let right = resolved.owner(&cond.right)?;
            pairs.insert((left.min(right), left.max(right)));
        }

        for (a, b) in pairs {
            if a == b {
                return Err(EngineError::CircularJoin {
                    cycle: vec![label(a), label(a)],
                });
            }

            let (na, nb) = (nodes[a], nodes[b]);
            if has_path_connecting(&graph, na, nb, None) {
                let mut cycle: Vec<String> = astar(&graph, na, |n| n == nb, |_| 1, |_| 0)
                    .map(|(_, path)| path.into_iter().map(|n| label(graph[n])).collect())
                    .unwrap_or_else(|| vec![label(a), label(b)]);
                cycle.push(label(a));
                return Err(EngineError::CircularJoin { cycle });
            }
            graph.add_edge(na, nb, ());
        }
    }

    Ok(())
}

/// Fail with [`EngineError::IncompatibleJoinTypes`] if any join condition
/// compares columns of unrelated type families.
pub fn check_join_types(query: &SqlJson, resolved: &Resolved<'_>) -> EngineResult<()> {
    for cond in query.joins.iter().flat_map(|j| j.on.iter()) {
        let (left_name, left_type) = resolved.column_type(&cond.left)?;
        let (right_name, right_type) = resolved.column_type(&cond.right)?;

        if !types_joinable(left_type, right_type) {
            return Err(EngineError::IncompatibleJoinTypes {
                left: left_name,
                left_type: left_type.to_string(),
                right: right_name,
                right_type: right_type.to_string(),
            });
        }
    }
    Ok(())
}
