//! # Header Accumulation State Machine
//!
//! Owns the growing byte buffer until the audio data start is located.
//!
//! ## States:
//! - **Accumulating**: Buffering and rescanning after every chunk
//! - **Streaming**: Format and data start known; the buffered payload tail was handed out
//! - **Failed**: Terminal error; the buffered bytes stay available for a diagnostic dump
//!
//! ## Rust Concepts:
//! - **Explicit state machine**: One object advanced by repeated `feed` calls stands in for
//!   a suspended coroutine. Each call is one "await next chunk" suspension point.
//! - **Ownership transfer**: `std::mem::take` moves the buffer out on success so the
//!   header bytes are not kept alive for the rest of the stream.

use super::format::SampleEncoding;
use super::scanner::{has_riff_header, scan_chunks, FormatDescriptor, RIFF_HEADER_LEN};
use super::WavError;
use tracing::debug;

/// Default bound on header bytes buffered before giving up (1 MiB).
pub const DEFAULT_MAX_HEADER_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccumulatorState {
    Accumulating,
    Streaming,
    Failed,
}

impl AccumulatorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccumulatorState::Accumulating => "accumulating",
            AccumulatorState::Streaming => "streaming",
            AccumulatorState::Failed => "failed",
        }
    }
}

/// Produced once when the accumulator switches to streaming.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamStart {
    pub format: FormatDescriptor,
    pub encoding: SampleEncoding,
    /// Offset of the first audio byte in the header buffer
    pub data_offset: usize,
    /// Total bytes buffered while the header was being located
    pub header_bytes: usize,
    /// Audio bytes that arrived together with the header, in stream order
    pub payload: Vec<u8>,
}

/// Buffers incoming chunks until the WAV header has been located.
#[derive(Debug)]
pub struct HeaderAccumulator {
    buffer: Vec<u8>,
    max_header_bytes: usize,
    state: AccumulatorState,
    chunks_seen: usize,
}

impl HeaderAccumulator {
    pub fn new(max_header_bytes: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_header_bytes,
            state: AccumulatorState::Accumulating,
            chunks_seen: 0,
        }
    }

    pub fn state(&self) -> AccumulatorState {
        self.state
    }

    /// Bytes currently held. After a failure these are the bytes to dump.
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    /// Append one network chunk and advance the state machine.
    ///
    /// ## Returns:
    /// - **Ok(None)**: Still accumulating, feed the next chunk
    /// - **Ok(Some(start))**: Switched to streaming; `start.payload` must be
    ///   delivered before any later chunk
    /// - **Err(..)**: Switched to failed (or was already terminal)
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Option<StreamStart>, WavError> {
        if self.state != AccumulatorState::Accumulating {
            return Err(WavError::AccumulatorClosed { state: self.state.as_str() });
        }

        self.buffer.extend_from_slice(chunk);

        if self.buffer.len() >= RIFF_HEADER_LEN && !has_riff_header(&self.buffer) {
            return Err(self.fail(WavError::MalformedContainer {
                offset: 0,
                reason: "missing RIFF/WAVE signature".to_string(),
            }));
        }

        let scan = match scan_chunks(&self.buffer) {
            Ok(scan) => scan,
            Err(e) => return Err(self.fail(e)),
        };

        if scan.chunks.len() > self.chunks_seen {
            if let Some(last) = scan.chunks.last() {
                debug!(
                    chunk_id = %last.id_str(),
                    start = last.start,
                    size = last.declared_size,
                    buffered = self.buffer.len(),
                    "Seen WAV chunk"
                );
            }
            self.chunks_seen = scan.chunks.len();
        }

        if let (Some(format), Some(data_offset)) = (scan.format, scan.data_offset) {
            let encoding = match SampleEncoding::resolve(&format) {
                Ok(encoding) => encoding,
                Err(e) => return Err(self.fail(e)),
            };

            let mut buffer = std::mem::take(&mut self.buffer);
            let header_bytes = buffer.len();
            let payload = buffer.split_off(data_offset);
            self.state = AccumulatorState::Streaming;

            return Ok(Some(StreamStart {
                format,
                encoding,
                data_offset,
                header_bytes,
                payload,
            }));
        }

        if self.buffer.len() > self.max_header_bytes {
            return Err(self.fail(WavError::HeaderNotFound { limit: self.max_header_bytes }));
        }

        Ok(None)
    }

    fn fail(&mut self, error: WavError) -> WavError {
        self.state = AccumulatorState::Failed;
        error
    }
}

impl Default for HeaderAccumulator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HEADER_BYTES)
    }
}
