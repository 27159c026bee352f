//! Typed analysis events and the request body.
//!
//! Events arrive as JSON with a `type` discriminator and camelCase fields.
//! Unknown discriminators are a parse error; the caller logs and skips the
//! frame rather than halting the stream.

use serde::{Deserialize, Serialize};

use crate::error::CircuitForgeError;

/// Canvas position hint attached to a selection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// One frame of the analysis stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum AnalysisEvent {
    /// The backend is reasoning about a component. Creates the node on
    /// first sight and appends to its reasoning log.
    Reasoning {
        component_id: String,
        #[serde(default)]
        component_name: Option<String>,
        #[serde(default)]
        reasoning: String,
        #[serde(default)]
        hierarchy_level: u32,
    },
    /// The backend selected a concrete part for a component. `part_data`
    /// is deliberately loose; the normalizer canonicalizes it.
    Selection {
        component_id: String,
        #[serde(default)]
        component_name: Option<String>,
        #[serde(default)]
        part_data: serde_json::Value,
        #[serde(default)]
        position: Option<Position>,
        #[serde(default)]
        hierarchy_level: u32,
    },
    /// Terminal: the run finished successfully.
    Complete {
        #[serde(default)]
        message: Option<String>,
    },
    /// Terminal: the backend failed. The message is surfaced verbatim.
    Error { message: String },
    /// The backend needs more input before it can continue. Pauses the
    /// session until the caller restarts with the matching query id.
    ContextRequest {
        query_id: String,
        #[serde(default)]
        message: String,
    },
}

impl AnalysisEvent {
    /// Exactly one of complete/error terminates a run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AnalysisEvent::Complete { .. } | AnalysisEvent::Error { .. })
    }
}

/// Body of the analysis request. `context_query_id`/`context` are only set
/// when answering a prior context request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRequest {
    pub query: String,
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_query_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// Parse one frame payload into a typed event.
pub fn parse_event(payload: &str) -> Result<AnalysisEvent, CircuitForgeError> {
    serde_json::from_str(payload).map_err(|e| CircuitForgeError::Protocol(e.to_string()))
}
