use std::collections::BTreeMap;

use petgraph::{visit::EdgeRef, Direction};

use crate::resources::{DependencyKind, Resource, ResourceId};

use super::{NodeIndex, PlanGraph};

/// A validated, ordered set of resources.
///
/// Every dependency precedes its dependents in [`Plan::creation_order`];
/// [`Plan::teardown_order`] is that sequence exactly reversed.
#[derive(Debug, Clone)]
pub struct Plan {
    graph: PlanGraph,
    node_id_index_map: BTreeMap<ResourceId, NodeIndex>,
    order: Vec<NodeIndex>,
}

impl Plan {
    pub(super) fn new(
        graph: PlanGraph,
        node_id_index_map: BTreeMap<ResourceId, NodeIndex>,
        order: Vec<NodeIndex>,
    ) -> Self {
        Self {
            graph,
            node_id_index_map,
            order,
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn creation_order(&self) -> impl DoubleEndedIterator<Item = &Resource> + '_ {
        self.order.iter().map(move |idx| &self.graph[*idx])
    }

    pub fn teardown_order(&self) -> impl Iterator<Item = &Resource> + '_ {
        self.creation_order().rev()
    }

    pub fn resource(&self, id: &ResourceId) -> Option<&Resource> {
        self.node_id_index_map.get(id).map(|idx| &self.graph[*idx])
    }

    /// Resources that must reach a given state before `id` can be created,
    /// along with the kind of each dependency.
    pub fn dependencies(&self, id: &ResourceId) -> Vec<(&Resource, DependencyKind)> {
        let Some(idx) = self.node_id_index_map.get(id) else {
            return Vec::new();
        };

        let mut dependencies: Vec<(NodeIndex, DependencyKind)> = self
            .graph
            .edges_directed(*idx, Direction::Incoming)
            .map(|edge| (edge.source(), *edge.weight()))
            .collect();
        // Petgraph lists edges newest first.
        dependencies.sort_by_key(|(other, _)| *other);

        dependencies
            .into_iter()
            .map(|(other, kind)| (&self.graph[other], kind))
            .collect()
    }

    /// Numbered listing of the creation order, one resource per line, with
    /// each resource's dependencies indented below it.
    pub fn describe(&self) -> String {
        let mut buf: Vec<String> = Vec::new();
        for (step, resource) in self.creation_order().enumerate() {
            buf.push(format!("{:>3}. {}", step + 1, resource.describe()));
            for (dependency, kind) in self.dependencies(&resource.id()) {
                buf.push(format!(
                    "       after {} ({}, {})",
                    dependency.id(),
                    kind,
                    kind.required_state()
                ));
            }
        }
        buf.join("\n")
    }
}
