//! Wire protocol for the analysis stream.
//!
//! The backend responds with a chunked body of `data: <json>` frames
//! separated by blank lines. `frames` reassembles frames from arbitrary
//! byte chunks; `event` defines the typed event and request JSON.

pub mod event;
pub mod frames;

pub use event::{parse_event, AnalysisEvent, AnalysisRequest, Position};
pub use frames::FrameDecoder;
