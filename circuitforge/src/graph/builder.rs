//! Get-or-create node bookkeeping and hierarchy offsetting.

use std::collections::HashMap;

use tracing::debug;

use crate::parts::{PartKey, PartRecord};
use crate::protocol::Position;

use super::node::{ComponentNode, NodeStatus};

/// Builds the id -> node map incrementally from stream events.
///
/// The builder is the single owner of both the current offset and the
/// highest hierarchy level seen; nothing else tracks a second copy. The
/// highest-level counter is never reset between queries: it is what
/// defines the next appended query's offset.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    nodes: HashMap<String, ComponentNode>,
    /// Insertion order of node ids; the sort tie-breaker.
    order: Vec<String>,
    /// Added to every incoming event's hierarchy level.
    offset: u32,
    /// Highest offset-adjusted level reached by any selection.
    highest_level: u32,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn get_or_create(&mut self, id: &str, label: Option<&str>) -> &mut ComponentNode {
        use std::collections::hash_map::Entry;
        let node = match self.nodes.entry(id.to_string()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                self.order.push(id.to_string());
                entry.insert(ComponentNode::new(id, label))
            }
        };
        if let Some(label) = label {
            node.label = label.to_string();
        }
        node
    }

    /// Apply a reasoning event: append the text, move the node to
    /// `Reasoning`, recompute its level with the current offset.
    pub fn apply_reasoning(
        &mut self,
        id: &str,
        label: Option<&str>,
        reasoning: &str,
        level: u32,
    ) -> &ComponentNode {
        let offset = self.offset;
        let node = self.get_or_create(id, label);
        if !reasoning.is_empty() {
            node.reasoning.push(reasoning.to_string());
        }
        node.status = NodeStatus::Reasoning;
        node.hierarchy_level = level.saturating_add(offset);
        debug!(component_id = %id, level = node.hierarchy_level, "reasoning applied");
        node
    }

    /// Apply a selection event: attach the part, move the node to
    /// `Selected`, and advance the highest-level counter when exceeded.
    pub fn apply_selection(
        &mut self,
        id: &str,
        label: Option<&str>,
        part: PartRecord,
        position: Option<Position>,
        level: u32,
        explicit_offset: Option<u32>,
    ) -> &ComponentNode {
        let offset = explicit_offset.unwrap_or(self.offset);
        // Wire levels are untrusted; saturate instead of overflowing.
        let adjusted = level.saturating_add(offset);
        if adjusted > self.highest_level {
            self.highest_level = adjusted;
        }
        let node = self.get_or_create(id, label);
        node.status = NodeStatus::Selected;
        node.hierarchy_level = adjusted;
        node.position = position;
        node.compatibility = part_compatibility(&part);
        node.part = Some(part);
        debug!(component_id = %id, level = adjusted, "selection applied");
        node
    }

    /// Promote every selected node after a completed run.
    pub fn mark_selected_validated(&mut self) {
        for node in self.nodes.values_mut() {
            if node.status == NodeStatus::Selected {
                node.status = NodeStatus::Validated;
            }
        }
    }

    /// Clear the part from any node referencing `key` (part deletion).
    pub fn detach_part(&mut self, key: &PartKey) {
        for node in self.nodes.values_mut() {
            let matches = node
                .part
                .as_ref()
                .map(|p| &p.key() == key)
                .unwrap_or(false);
            if matches {
                node.part = None;
                node.status = NodeStatus::Reasoning;
            }
        }
    }

    /// Enter append mode: the next query's levels land strictly above
    /// everything selected so far. No-op on an empty graph.
    pub fn begin_append(&mut self) {
        if !self.nodes.is_empty() {
            self.offset = self.highest_level.saturating_add(1);
            debug!(offset = self.offset, "append mode: hierarchy offset advanced");
        }
    }

    /// Explicit full reset: destroys all nodes and zeroes the offset and
    /// the highest-level counter. The only way either goes back to 0.
    pub fn reset(&mut self) {
        self.nodes.clear();
        self.order.clear();
        self.offset = 0;
        self.highest_level = 0;
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn highest_level(&self) -> u32 {
        self.highest_level
    }

    pub fn get(&self, id: &str) -> Option<&ComponentNode> {
        self.nodes.get(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes sorted by (hierarchy level, insertion order), never by map
    /// iteration order.
    pub fn nodes_sorted(&self) -> Vec<&ComponentNode> {
        let mut sorted: Vec<&ComponentNode> = self
            .order
            .iter()
            .filter_map(|id| self.nodes.get(id))
            .collect();
        sorted.sort_by_key(|n| n.hierarchy_level);
        sorted
    }
}

fn part_compatibility(part: &PartRecord) -> Option<serde_json::Value> {
    // Lifecycle/availability double as compatibility hints for the
    // visualization layer.
    match (&part.lifecycle, &part.availability) {
        (None, None) => None,
        (lifecycle, availability) => Some(serde_json::json!({
            "lifecycle": lifecycle,
            "availability": availability,
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_part(component_id: &str) -> PartRecord {
        crate::parts::normalize(&json!({
            "componentId": component_id,
            "mpn": "STM32F405",
            "manufacturer": "ST",
            "price": 8.2,
        }))
    }

    #[test]
    fn test_reasoning_creates_then_appends() {
        let mut graph = GraphBuilder::new();
        graph.apply_reasoning("U1", Some("MCU"), "first pass", 0);
        graph.apply_reasoning("U1", None, "second pass", 0);

        let node = graph.get("U1").unwrap();
        assert_eq!(node.status, NodeStatus::Reasoning);
        assert_eq!(node.reasoning, vec!["first pass", "second pass"]);
        assert_eq!(node.label, "MCU");
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn test_selection_attaches_part_and_advances_highest() {
        let mut graph = GraphBuilder::new();
        graph.apply_selection("U1", None, sample_part("U1"), None, 3, None);

        let node = graph.get("U1").unwrap();
        assert_eq!(node.status, NodeStatus::Selected);
        assert!(node.part.is_some());
        assert_eq!(node.hierarchy_level, 3);
        assert_eq!(graph.highest_level(), 3);

        // A lower selection does not move the counter back.
        graph.apply_selection("U2", None, sample_part("U2"), None, 1, None);
        assert_eq!(graph.highest_level(), 3);
    }

    #[test]
    fn test_append_mode_offsets_above_previous_highest() {
        let mut graph = GraphBuilder::new();
        graph.apply_selection("U1", None, sample_part("U1"), None, 2, None);
        assert_eq!(graph.highest_level(), 2);

        graph.begin_append();
        assert_eq!(graph.offset(), 3);

        graph.apply_reasoning("U2", None, "next query", 0);
        assert!(graph.get("U2").unwrap().hierarchy_level >= 3);
        graph.apply_selection("U2", None, sample_part("U2"), None, 1, None);
        assert_eq!(graph.get("U2").unwrap().hierarchy_level, 4);
        assert_eq!(graph.highest_level(), 4);
    }

    #[test]
    fn test_append_on_empty_graph_is_noop() {
        let mut graph = GraphBuilder::new();
        graph.begin_append();
        assert_eq!(graph.offset(), 0);
    }

    #[test]
    fn test_reset_zeroes_everything() {
        let mut graph = GraphBuilder::new();
        graph.apply_selection("U1", None, sample_part("U1"), None, 5, None);
        graph.begin_append();
        graph.reset();

        assert!(graph.is_empty());
        assert_eq!(graph.offset(), 0);
        assert_eq!(graph.highest_level(), 0);
    }

    #[test]
    fn test_nodes_sorted_by_level_then_insertion() {
        let mut graph = GraphBuilder::new();
        graph.apply_reasoning("U3", None, "", 2);
        graph.apply_reasoning("U1", None, "", 0);
        graph.apply_reasoning("U2", None, "", 0);

        let ids: Vec<&str> = graph.nodes_sorted().iter().map(|n| n.id.as_str()).collect();
        // U1 before U2 (insertion order at the same level), both before U3.
        assert_eq!(ids, vec!["U1", "U2", "U3"]);
    }

    #[test]
    fn test_detach_part() {
        let mut graph = GraphBuilder::new();
        graph.apply_selection("U1", None, sample_part("U1"), None, 0, None);
        let key = graph.get("U1").unwrap().part.as_ref().unwrap().key();

        graph.detach_part(&key);
        let node = graph.get("U1").unwrap();
        assert!(node.part.is_none());
        assert_eq!(node.status, NodeStatus::Reasoning);
    }

    #[test]
    fn test_extreme_wire_levels_saturate() {
        let mut graph = GraphBuilder::new();
        graph.apply_selection("U1", None, sample_part("U1"), None, u32::MAX, None);
        assert_eq!(graph.highest_level(), u32::MAX);

        // Append mode and further events stay pinned at the ceiling
        // instead of overflowing.
        graph.begin_append();
        assert_eq!(graph.offset(), u32::MAX);
        graph.apply_reasoning("U2", None, "deep", 7);
        assert_eq!(graph.get("U2").unwrap().hierarchy_level, u32::MAX);
    }

    #[test]
    fn test_explicit_offset_overrides_current() {
        let mut graph = GraphBuilder::new();
        graph.apply_selection("U1", None, sample_part("U1"), None, 1, Some(10));
        assert_eq!(graph.get("U1").unwrap().hierarchy_level, 11);
        assert_eq!(graph.highest_level(), 11);
    }
}
