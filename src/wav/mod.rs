//! # Streaming WAV Container Parsing
//!
//! Parses a RIFF/WAVE container while it is still arriving over the network.
//! Static WAV readers want the whole file (or at least a trustworthy `data` size);
//! live TTS encoders emit a provisional or oversized `data` size, so this module
//! only ever needs the 8-byte `data` header to know where audio starts.
//!
//! ## Components:
//! - **scanner**: Pure function over the bytes buffered so far (sub-chunks, format, data offset)
//! - **format**: Maps (format code, bit depth) to a concrete [`SampleEncoding`]
//! - **header**: State machine that owns the header buffer until audio data starts
//!
//! ## Rust Concepts:
//! - **thiserror**: Derives `Display` and `Error` for the parser's error enum
//! - **Pure functions**: The scanner keeps no state besides the buffer it is given,
//!   so rescanning a longer prefix always yields a superset of the previous answer

pub mod format;
pub mod header;
pub mod scanner;

pub use format::SampleEncoding;
pub use header::HeaderAccumulator;

use thiserror::Error;

/// Errors raised while locating and interpreting the WAV header.
///
/// None of these are retried: each one means the stream itself is bad or
/// carries an encoding the output side cannot play.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WavError {
    /// Missing signature after enough bytes arrived, or an impossible chunk size.
    #[error("malformed WAV container at offset {offset}: {reason}")]
    MalformedContainer { offset: usize, reason: String },

    /// Format fields name an encoding with no playable sample type.
    #[error("unsupported WAV format: code={code:#06x}, bits={bits}")]
    UnsupportedFormat { code: u16, bits: u16 },

    /// The header bound was exceeded before both `fmt ` and `data` were found.
    #[error("WAV header not found within {limit} bytes")]
    HeaderNotFound { limit: usize },

    /// Bytes were fed after the accumulator reached a terminal state.
    #[error("header accumulator already {state}")]
    AccumulatorClosed { state: &'static str },
}
