//! # Dependency Tracking
//!
//! Resources that cannot be materialized before another resource exists (an intermediate
//! issuer and the root that signs it, a password and its policy) are tracked here.
//!
//! - [`node`]: the identity key and the full/placeholder vertex type
//! - [`graph`]: the edge-status graph processors mutate under a single lock

pub mod graph;
pub mod node;

pub use graph::{DependencyGraph, Edge, EdgeStatus, GraphError, NodeState, SharedGraph};
pub use node::{Identified, Node, NodeKey};
