//! CircuitForge - streaming design-generation engine for AI-assisted PCB
//! design.
//!
//! The engine consumes a streamed analysis protocol from a backend and
//! incrementally builds a deduplicated, hierarchy-ordered component graph
//! with a canonical part list, bounded undo/redo history, and
//! cancel/append/pause semantics across successive queries.
//!
//! # Quick Start
//!
//! ```no_run
//! use circuitforge::{AnalysisSession, QueryRequest, SessionOutcome};
//!
//! # async fn run() -> Result<(), circuitforge::CircuitForgeError> {
//! let session = AnalysisSession::connect("https://api.example.com/analyze");
//! let outcome = session
//!     .start(QueryRequest::new("usb-c power bank, 20W", "claude"))
//!     .await?;
//!
//! if let SessionOutcome::Complete { total_parts } = outcome {
//!     println!("selected {} parts", total_parts);
//!     for part in session.parts().await {
//!         println!("{} x{} ({})", part.mpn, part.quantity, part.manufacturer);
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Stream transport**: chunk-safe frame reassembly, malformed frames
//!   skipped without halting, stops at the first terminal frame
//! - **Session control**: cancel-before-start, idempotent re-entry, append
//!   mode across queries, pause/resume for context requests
//! - **Dedup & merge**: duplicate selections converge to one row
//! - **Bounded history**: 50-deep undo/redo of the part list

pub mod error;
pub mod graph;
pub mod history;
pub mod parts;
pub mod protocol;
pub mod session;
pub mod transport;

// Re-export main types
pub use error::CircuitForgeError;
pub use graph::{ComponentNode, GraphBuilder, NodeStatus};
pub use history::{HistorySnapshot, HistoryStack, HISTORY_LIMIT};
pub use parts::{normalize, MergeOutcome, PartKey, PartList, PartRecord};
pub use protocol::{AnalysisEvent, AnalysisRequest, FrameDecoder, Position};
pub use session::{
    AnalysisSession, ContextReply, ContextRequest, QueryRequest, SessionOutcome, SessionState,
    SessionUpdate,
};
pub use transport::{EventSource, HttpTransport};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::{
        AnalysisSession, CircuitForgeError, ComponentNode, NodeStatus, PartRecord, QueryRequest,
        SessionOutcome, SessionState, SessionUpdate,
    };
}
