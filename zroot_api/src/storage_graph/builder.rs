use std::{
    collections::{btree_map::Entry, BTreeMap},
    path::Path,
};

use log::{debug, trace};
use petgraph::visit::{EdgeRef, IntoNodeReferences};

use crate::resources::{CanMount, DependencyKind, MountSource, Resource, ResourceId};

use super::{error::PlanError, order, plan::Plan, NodeIndex, PlanGraph};

/// Collects resources in declaration order and turns them into a [`Plan`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanBuilder {
    resources: Vec<Resource>,
}

impl PlanBuilder {
    /// Adds a resource. Declaration order is the tie-breaker for the final
    /// ordering, so callers should add resources in the order they would
    /// naturally be created.
    pub fn add_resource(&mut self, resource: Resource) {
        self.resources.push(resource);
    }

    /// Builds and orders the dependency graph.
    ///
    /// Fails when an identity is declared twice, when two partitions on the
    /// same disk share a number, when a reference names an undeclared
    /// resource, or when the dependencies form a cycle.
    pub fn build(self) -> Result<Plan, PlanError> {
        debug!("Building resource plan");
        let (mut graph, node_id_index_map) = populate_graph_nodes(self.resources)?;

        trace!("Populating declared references");
        populate_reference_edges(&mut graph, &node_id_index_map)?;

        trace!("Populating partition sequence");
        populate_sequence_edges(&mut graph)?;

        trace!("Populating nested mounts");
        populate_mount_edges(&mut graph);

        // Shadow the graph to make it immutable after it's been fully built.
        let graph = graph;

        trace!("Built resource graph structure:\n{}", describe_graph(&graph));

        let order = order::stable_toposort(&graph).map_err(|remaining| {
            PlanError::Cycle(
                remaining
                    .into_iter()
                    .map(|idx| graph[idx].id().to_string())
                    .collect(),
            )
        })?;

        debug!(
            "Resource plan built successfully with {} resources and {} dependencies",
            graph.node_count(),
            graph.edge_count()
        );
        Ok(Plan::new(graph, node_id_index_map, order))
    }
}

/// Populates a basic graph with all resources, checking that identities are
/// unique. Edges are NOT added at this stage.
fn populate_graph_nodes(
    resources: Vec<Resource>,
) -> Result<(PlanGraph, BTreeMap<ResourceId, NodeIndex>), PlanError> {
    let mut graph = PlanGraph::with_capacity(resources.len(), resources.len() * 2);
    let mut node_id_index_map: BTreeMap<ResourceId, NodeIndex> = BTreeMap::new();

    for resource in resources {
        let id = resource.id();
        if node_id_index_map.contains_key(&id) {
            return Err(PlanError::DuplicateResource(id.to_string()));
        }

        trace!("Adding node: {}", resource.describe());
        let idx = graph.add_node(resource);
        node_id_index_map.insert(id, idx);
    }

    Ok((graph, node_id_index_map))
}

/// Checks that every declared reference resolves and adds an edge from the
/// referenced resource to the referrer.
fn populate_reference_edges(
    graph: &mut PlanGraph,
    node_id_index_map: &BTreeMap<ResourceId, NodeIndex>,
) -> Result<(), PlanError> {
    // Collect first to avoid borrowing the graph while iterating it.
    let mut edges: Vec<(NodeIndex, NodeIndex, DependencyKind)> = Vec::new();

    for (node_idx, resource) in graph.node_references() {
        for (target_id, kind) in resource.references() {
            let target_idx = *node_id_index_map.get(&target_id).ok_or_else(|| {
                PlanError::MissingReference {
                    resource: resource.id().to_string(),
                    kind: kind.to_string(),
                    target: target_id.to_string(),
                }
            })?;

            trace!(
                "Adding edge from {} to {} with kind [{}]",
                graph[target_idx].describe(),
                resource.describe(),
                kind
            );
            edges.push((target_idx, node_idx, kind));
        }
    }

    for (source, target, kind) in edges {
        graph.add_edge(source, target, kind);
    }

    Ok(())
}

/// Chains the partitions of each disk by their number, so they are created
/// in ascending order and removed in descending order.
fn populate_sequence_edges(graph: &mut PlanGraph) -> Result<(), PlanError> {
    let mut by_disk: BTreeMap<_, BTreeMap<u32, NodeIndex>> = BTreeMap::new();

    for (node_idx, resource) in graph.node_references() {
        let Some(partition) = resource.as_partition() else {
            continue;
        };

        match by_disk
            .entry(partition.disk.clone())
            .or_default()
            .entry(partition.ordinal)
        {
            Entry::Occupied(existing) => {
                return Err(PlanError::DuplicatePartitionNumber {
                    disk: partition.disk.display().to_string(),
                    ordinal: partition.ordinal,
                    first: graph[*existing.get()].id().to_string(),
                    second: resource.id().to_string(),
                });
            }
            Entry::Vacant(slot) => {
                slot.insert(node_idx);
            }
        }
    }

    for partitions in by_disk.into_values() {
        let ordered: Vec<NodeIndex> = partitions.into_values().collect();
        for pair in ordered.windows(2) {
            graph.add_edge(pair[0], pair[1], DependencyKind::Sequence);
        }
    }

    Ok(())
}

/// Makes every mount depend on the managed mount whose target most closely
/// encloses its own target. Matching is done on whole path components.
///
/// Datasets that ZFS mounts as soon as they are created get the same edge,
/// from the mount enclosing their own mount's target, so they are never
/// created into a staging root that is not mounted yet.
fn populate_mount_edges(graph: &mut PlanGraph) {
    let mounts: Vec<(NodeIndex, &Path)> = graph
        .node_references()
        .filter_map(|(idx, resource)| resource.mount_target().map(|target| (idx, target)))
        .collect();

    let auto_mounted: Vec<(NodeIndex, &Path)> = graph
        .node_references()
        .filter_map(|(idx, resource)| {
            let dataset = resource
                .as_dataset()
                .filter(|dataset| dataset.can_mount == CanMount::On)?;
            graph
                .node_weights()
                .filter_map(Resource::as_mount)
                .find(|mount| {
                    matches!(&mount.source, MountSource::Dataset(name) if *name == dataset.name)
                })
                .map(|mount| (idx, mount.target.as_path()))
        })
        .collect();

    let edges: Vec<(NodeIndex, NodeIndex)> = mounts
        .iter()
        .chain(auto_mounted.iter())
        .filter_map(|(idx, target)| {
            enclosing_mount(&mounts, target).map(|enclosing_idx| (enclosing_idx, *idx))
        })
        .collect();

    for (source, target) in edges {
        trace!(
            "Adding edge from {} to {} with kind [{}]",
            graph[source].describe(),
            graph[target].describe(),
            DependencyKind::MountedWithin
        );
        graph.add_edge(source, target, DependencyKind::MountedWithin);
    }
}

/// The mount with the longest target strictly enclosing `target`.
fn enclosing_mount(mounts: &[(NodeIndex, &Path)], target: &Path) -> Option<NodeIndex> {
    mounts
        .iter()
        .filter(|(_, other_target)| *other_target != target && target.starts_with(other_target))
        .max_by_key(|(_, other_target)| other_target.components().count())
        .map(|(idx, _)| *idx)
}

/// Returns a user-friendly description of the graph structure.
pub(super) fn describe_graph(graph: &PlanGraph) -> String {
    let mut buf: Vec<String> = Vec::new();
    for (node_idx, resource) in graph.node_references() {
        buf.push(format!("[{}] {}", node_idx.index(), resource.describe()));
        for edge in graph.edges(node_idx) {
            buf.push(format!(
                "  -> [{}] {} ({})",
                edge.target().index(),
                graph[edge.target()].describe(),
                edge.weight()
            ));
        }
    }

    buf.join("\n")
}
