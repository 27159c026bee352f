//! Incremental frame reassembly.
//!
//! The response body is a sequence of frames of the form `data: <json>`
//! terminated by a blank line. Chunk boundaries are arbitrary: a frame, a
//! line, or even a UTF-8 code point may be split across chunks, so the
//! decoder buffers raw bytes and only cuts at complete `\n\n` separators.

use tracing::warn;

/// Stateful decoder from byte chunks to frame payload strings.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk; returns the payloads of every frame completed by it.
    /// Frames that are not valid UTF-8 or carry no `data:` line are skipped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut payloads = Vec::new();
        while let Some((end, sep_len)) = find_separator(&self.buffer) {
            let frame: Vec<u8> = self.buffer.drain(..end + sep_len).collect();
            let frame = &frame[..end];
            match std::str::from_utf8(frame) {
                Ok(text) => {
                    if let Some(payload) = extract_payload(text) {
                        payloads.push(payload);
                    }
                }
                Err(e) => {
                    warn!(error = %e, "skipping non-UTF-8 frame");
                }
            }
        }
        payloads
    }

    /// Bytes buffered but not yet terminated by a blank line.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

/// Position and length of the earliest blank-line separator, accepting
/// both `\n\n` and `\r\n\r\n`.
fn find_separator(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = buffer.windows(2).position(|w| w == b"\n\n").map(|p| (p, 2));
    let crlf = buffer
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|p| (p, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

/// Join the `data:` lines of one frame. Comment lines and unknown field
/// lines are ignored, matching lenient server-sent-event consumers.
fn extract_payload(frame: &str) -> Option<String> {
    let mut lines = Vec::new();
    for line in frame.lines() {
        let line = line.trim_end_matches('\r');
        if let Some(rest) = line.strip_prefix("data:") {
            lines.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
    }
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}
