//! Streaming event demultiplexer for the engine's unframed event feed.
//!
//! The events endpoint streams back-to-back JSON objects with no outer
//! delimiter and no length framing, so object boundaries have to be found
//! structurally: brace depth returning to zero marks the end of one event.

use serde_json::Value;

use super::{Error, Result};

/// Default cap on the accumulation buffer. A stream that produces this many
/// bytes without completing an event is treated as corrupt.
pub const DEFAULT_BUFFER_CAP: usize = 2048;

/// One decoded event from a guest's event feed.
///
/// Only the status string is interpreted; everything else the engine attaches
/// is carried opaquely.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct StreamEvent {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(flatten)]
    pub rest: serde_json::Map<String, Value>,
}

/// Incremental demultiplexer over the raw response byte stream.
///
/// Feed it chunks as they arrive; it skips the response header, then yields
/// one [`StreamEvent`] per balanced JSON object. Not restartable: after an
/// error the stream is considered corrupt and must be torn down.
#[derive(Debug)]
pub struct EventDemux {
    buf: Vec<u8>,
    in_header: bool,
    depth: i32,
    cap: usize,
}

impl EventDemux {
    pub fn new(cap: usize) -> Self {
        Self {
            buf: Vec::new(),
            in_header: true,
            depth: 0,
            cap,
        }
    }

    /// Consumes one chunk of stream bytes and returns the events completed by
    /// it, in order. Chunk boundaries are arbitrary; an event may span any
    /// number of chunks.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StreamOverflow`] once the internal buffer exceeds the
    /// cap without completing an event, or [`Error::EventDecode`] when a
    /// brace-balanced span is not valid JSON.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<StreamEvent>> {
        let mut events = Vec::new();
        for &byte in chunk {
            self.buf.push(byte);
            if self.in_header {
                if byte == b'\n' && self.buf.ends_with(b"\r\n\r\n") {
                    self.buf.clear();
                    self.in_header = false;
                }
            } else {
                match byte {
                    b'{' => self.depth += 1,
                    b'}' => {
                        self.depth -= 1;
                        if self.depth == 0 {
                            let event =
                                serde_json::from_slice(&self.buf).map_err(Error::EventDecode)?;
                            events.push(event);
                            self.buf.clear();
                        }
                    }
                    _ => {}
                }
            }
            if self.buf.len() > self.cap {
                return Err(Error::StreamOverflow { cap: self.cap });
            }
        }
        Ok(events)
    }

    /// Signals end of stream. A peer close between events is a normal end;
    /// mid-header or mid-event it is a failure.
    pub fn finish(self) -> Result<()> {
        if self.in_header && !self.buf.is_empty() {
            return Err(Error::MissingHeaderSeparator);
        }
        if self.depth != 0 || self.buf.iter().any(|b| !b.is_ascii_whitespace()) {
            return Err(Error::TruncatedStream);
        }
        Ok(())
    }
}
