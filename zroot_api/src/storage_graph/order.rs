use std::{cmp::Reverse, collections::BinaryHeap};

use petgraph::{visit::EdgeRef, Direction, Graph};

use super::NodeIndex;

/// Kahn's algorithm with ties broken by node index.
///
/// Nodes are added to the graph in declaration order, so among all nodes
/// whose dependencies are satisfied the earliest declared one goes first.
/// The result is therefore fully deterministic and matches declaration
/// order wherever the edges allow it.
///
/// On a cycle, returns the nodes that could not be ordered.
pub(super) fn stable_toposort<N, E>(
    graph: &Graph<N, E>,
) -> Result<Vec<NodeIndex>, Vec<NodeIndex>> {
    let mut in_degree: Vec<usize> = graph
        .node_indices()
        .map(|node| graph.edges_directed(node, Direction::Incoming).count())
        .collect();

    let mut ready: BinaryHeap<Reverse<NodeIndex>> = graph
        .node_indices()
        .filter(|node| in_degree[node.index()] == 0)
        .map(Reverse)
        .collect();

    let mut order = Vec::with_capacity(graph.node_count());
    while let Some(Reverse(node)) = ready.pop() {
        order.push(node);
        for edge in graph.edges_directed(node, Direction::Outgoing) {
            let target = edge.target();
            in_degree[target.index()] -= 1;
            if in_degree[target.index()] == 0 {
                ready.push(Reverse(target));
            }
        }
    }

    if order.len() == graph.node_count() {
        Ok(order)
    } else {
        Err(graph
            .node_indices()
            .filter(|node| in_degree[node.index()] > 0)
            .collect())
    }
}
