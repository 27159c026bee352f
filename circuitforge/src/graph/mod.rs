//! Incremental component-selection graph.
//!
//! Nodes are keyed by componentId and mutated in place as reasoning and
//! selection events arrive. Display order never relies on map iteration:
//! the builder keeps an explicit insertion index and sorts by hierarchy
//! level at read time.

pub mod builder;
pub mod node;

pub use builder::GraphBuilder;
pub use node::{ComponentNode, NodeStatus};
