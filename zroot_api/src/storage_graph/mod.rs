//! # Dependency planner
//!
//! Builds a directed graph of all declared resources and orders it into a
//! creation sequence; the teardown sequence is its exact reverse.
//!
//! In broad terms, this module is used as follows:
//!
//! 1. Create a `PlanBuilder` and feed it resources with `add_resource()`,
//!    in declaration order.
//! 2. Call `build()`. The builder checks identities and references, derives
//!    the implicit edges (partition sequence, nested mount targets), and
//!    orders the graph.
//! 3. On success, a `Plan` is returned. Otherwise, an error naming the
//!    offending resource is returned.
//!
//! Edges point from a dependency to its dependent and carry a
//! `DependencyKind`, which also tells the engines what state the dependency
//! must be in.
//!
//! ## Layout
//!
//! ```text
//! zroot_api/src/storage_graph
//! ├── builder.rs ---> # PlanBuilder & graph population.
//! ├── error.rs -----> # Error types.
//! ├── mod.rs -------> # This file.
//! ├── order.rs -----> # Stable topological sort.
//! └── plan.rs ------> # Plan & queries over the ordered graph.
//! ```

use petgraph::{csr::DefaultIx, graph::NodeIndex as PetgraphNodeIndex, Directed, Graph};

use crate::resources::{DependencyKind, Resource};

mod builder;
pub mod error;
mod order;
mod plan;

pub use builder::PlanBuilder;
pub use plan::Plan;

/// The type of the node index used in the plan graph.
pub(crate) type NodeIndex = PetgraphNodeIndex<DefaultIx>;

/// The type of the graph holding resources and their dependencies.
pub(crate) type PlanGraph = Graph<Resource, DependencyKind, Directed, DefaultIx>;
