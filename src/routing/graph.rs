//! Dependency graph construction and topological batch scheduling for the
//! Routing & DAG Planner (C7). Backed by `petgraph` for graph storage and
//! traversal; batch ordering within a round is derived from the caller's
//! `selected_agents` order so the schedule is deterministic and matches the
//! order agents were selected in, not an arbitrary node-index order.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

use crate::error::{CoordinationError, Result};

/// Build a dependency graph over `selected_agents`, keeping only edges
/// whose endpoints are both present in `selected_agents` (per spec.md
/// §4.7.4: "only include edges whose endpoints are both in selected").
pub fn build_graph(
    selected_agents: &[String],
    dependency_graph: &BTreeMap<String, BTreeSet<String>>,
) -> DiGraph<String, ()> {
    let mut graph = DiGraph::new();
    let mut index_of: HashMap<String, NodeIndex> = HashMap::new();
    for agent in selected_agents {
        index_of.insert(agent.clone(), graph.add_node(agent.clone()));
    }
    for (node, deps) in dependency_graph {
        let Some(&node_idx) = index_of.get(node) else {
            continue;
        };
        for dep in deps {
            if let Some(&dep_idx) = index_of.get(dep) {
                // edge dep -> node: dep must complete before node.
                graph.add_edge(dep_idx, node_idx, ());
            }
        }
    }
    graph
}

/// Repeatedly extract the set of currently zero-in-degree nodes as a batch,
/// in `selected_agents` order. Raises `CyclicGraph` if a non-empty residual
/// has no zero-in-degree node.
pub fn topological_batches(
    selected_agents: &[String],
    dependency_graph: &BTreeMap<String, BTreeSet<String>>,
) -> Result<Vec<Vec<String>>> {
    let graph = build_graph(selected_agents, dependency_graph);

    let index_of: HashMap<&str, NodeIndex> = graph
        .node_indices()
        .map(|idx| (graph[idx].as_str(), idx))
        .collect();

    let mut in_degree: HashMap<NodeIndex, usize> = graph
        .node_indices()
        .map(|idx| (idx, graph.neighbors_directed(idx, Direction::Incoming).count()))
        .collect();
    let mut remaining: HashSet<NodeIndex> = graph.node_indices().collect();

    let mut batches = Vec::new();
    while !remaining.is_empty() {
        let batch: Vec<NodeIndex> = selected_agents
            .iter()
            .filter_map(|name| index_of.get(name.as_str()))
            .copied()
            .filter(|idx| remaining.contains(idx) && in_degree[idx] == 0)
            .collect();

        if batch.is_empty() {
            let stuck: Vec<String> = remaining.iter().map(|idx| graph[*idx].clone()).collect();
            return Err(CoordinationError::CyclicGraph(format!(
                "no zero-in-degree node among remaining: {stuck:?}"
            )));
        }

        for idx in &batch {
            remaining.remove(idx);
            for successor in graph.neighbors_directed(*idx, Direction::Outgoing) {
                if let Some(degree) = in_degree.get_mut(&successor) {
                    *degree = degree.saturating_sub(1);
                }
            }
        }

        batches.push(batch.into_iter().map(|idx| graph[idx].clone()).collect());
    }

    Ok(batches)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deps(pairs: &[(&str, &[&str])]) -> BTreeMap<String, BTreeSet<String>> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect()))
            .collect()
    }

    #[test]
    fn batches_respect_dependency_order() {
        let selected = vec![
            "orchestrator".to_string(),
            "frontend".to_string(),
            "backend".to_string(),
            "database".to_string(),
        ];
        let dependency_graph = deps(&[("frontend", &["backend", "database"])]);

        let batches = topological_batches(&selected, &dependency_graph).unwrap();
        assert_eq!(
            batches,
            vec![
                vec!["orchestrator".to_string(), "backend".to_string(), "database".to_string()],
                vec!["frontend".to_string()],
            ]
        );
    }

    #[test]
    fn detects_cycles() {
        let selected = vec!["a".to_string(), "b".to_string()];
        let dependency_graph = deps(&[("a", &["b"]), ("b", &["a"])]);
        assert!(topological_batches(&selected, &dependency_graph).is_err());
    }

    #[test]
    fn edges_outside_selected_agents_are_ignored() {
        let selected = vec!["a".to_string()];
        let dependency_graph = deps(&[("a", &["not_selected"])]);
        let batches = topological_batches(&selected, &dependency_graph).unwrap();
        assert_eq!(batches, vec![vec!["a".to_string()]]);
    }
}
