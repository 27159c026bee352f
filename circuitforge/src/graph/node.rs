//! Component nodes of the design graph.

use serde::{Deserialize, Serialize};

use crate::parts::PartRecord;
use crate::protocol::Position;

/// Lifecycle of a node within one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Created but no event applied yet.
    Pending,
    /// At least one reasoning event seen.
    Reasoning,
    /// A part has been selected.
    Selected,
    /// Selection confirmed by a completed run.
    Validated,
}

/// One component in the generated design. Created on the first reasoning
/// or selection event for its id, mutated in place afterwards, destroyed
/// only by an explicit full reset.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentNode {
    pub id: String,
    pub label: String,
    pub status: NodeStatus,
    /// Reasoning strings in arrival order.
    pub reasoning: Vec<String>,
    /// Dependency depth after cross-query offsetting.
    pub hierarchy_level: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part: Option<PartRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    /// Compatibility metadata passed through from the backend, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compatibility: Option<serde_json::Value>,
}

impl ComponentNode {
    pub(crate) fn new(id: &str, label: Option<&str>) -> Self {
        Self {
            id: id.to_string(),
            label: label.unwrap_or(id).to_string(),
            status: NodeStatus::Pending,
            reasoning: Vec::new(),
            hierarchy_level: 0,
            part: None,
            position: None,
            compatibility: None,
        }
    }

    pub fn is_selected(&self) -> bool {
        matches!(self.status, NodeStatus::Selected | NodeStatus::Validated)
    }
}
