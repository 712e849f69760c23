//! # Chunk Scanner
//!
//! Walks the RIFF sub-chunks present in a (possibly incomplete) buffer.
//!
//! ## Streaming rules:
//! - `fmt ` is only parsed once the whole declared chunk is buffered
//! - `data` is accepted as soon as its 8-byte header is buffered, whatever its
//!   declared size says; everything after that header is audio payload
//! - `data` seen before a complete `fmt ` is not a data start, scanning stops
//! - any other chunk (LIST, fact, JUNK...) is skipped once fully buffered
//!
//! The scanner holds no state of its own. Callers rescan the whole buffer after
//! every append, which keeps the parser trivially correct for arbitrary chunk splits.

use super::WavError;
use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use std::io::Cursor;

/// Size of the `RIFF....WAVE` preamble.
pub const RIFF_HEADER_LEN: usize = 12;

/// Size of a sub-chunk header (4-byte tag + 32-bit little-endian size).
pub const CHUNK_HEADER_LEN: usize = 8;

/// Length of the fixed PCM part of a `fmt ` payload.
pub const FMT_PCM_LEN: usize = 16;

/// `WAVE_FORMAT_EXTENSIBLE` payload: 16 fixed bytes, cbSize, 22 extension bytes.
const FMT_EXTENSIBLE_LEN: usize = 40;

/// One sub-chunk identified in the buffer, in stream order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubChunk {
    pub id: [u8; 4],
    /// Offset of the chunk's tag within the buffer
    pub start: usize,
    /// Size as declared in the header (may exceed the buffer for `data`)
    pub declared_size: u32,
}

impl SubChunk {
    /// Tag as printable text, lossy for non-ASCII ids.
    pub fn id_str(&self) -> String {
        String::from_utf8_lossy(&self.id).into_owned()
    }
}

/// Parameters from the `fmt ` sub-chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatDescriptor {
    pub audio_format: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub byte_rate: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
    /// Sub-format GUID bytes, only present for `WAVE_FORMAT_EXTENSIBLE` headers
    pub sub_format: Option<[u8; 16]>,
}

/// Everything the scanner could establish from the current buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanResult {
    pub chunks: Vec<SubChunk>,
    pub format: Option<FormatDescriptor>,
    /// Offset of the first audio byte, known from the `data` header alone
    pub data_offset: Option<usize>,
}

impl ScanResult {
    /// True once both the format and the data start are known.
    pub fn is_complete(&self) -> bool {
        self.format.is_some() && self.data_offset.is_some()
    }
}

/// Returns true when the buffer starts with a `RIFF....WAVE` preamble.
pub fn has_riff_header(buf: &[u8]) -> bool {
    buf.len() >= RIFF_HEADER_LEN && &buf[0..4] == b"RIFF" && &buf[8..12] == b"WAVE"
}

/// Scan the buffered bytes for sub-chunks, the format and the data start.
///
/// Returns an empty result when the preamble is missing (too few bytes yet,
/// or not a WAV stream; the caller decides which). Errors only on chunk
/// sizes that cannot describe a real container.
pub fn scan_chunks(buf: &[u8]) -> Result<ScanResult, WavError> {
    let mut result = ScanResult::default();
    if !has_riff_header(buf) {
        return Ok(result);
    }

    let mut offset = RIFF_HEADER_LEN;
    while offset + CHUNK_HEADER_LEN <= buf.len() {
        let mut id = [0u8; 4];
        id.copy_from_slice(&buf[offset..offset + 4]);
        let declared_size = LittleEndian::read_u32(&buf[offset + 4..offset + CHUNK_HEADER_LEN]);
        let payload_start = offset + CHUNK_HEADER_LEN;

        if &id == b"data" {
            if result.format.is_none() {
                // format has to precede the samples; wait for more bytes
                break;
            }
            result.chunks.push(SubChunk { id, start: offset, declared_size });
            result.data_offset = Some(payload_start);
            return Ok(result);
        }

        let end = chunk_end(payload_start, declared_size).ok_or_else(|| {
            WavError::MalformedContainer {
                offset,
                reason: format!("chunk size {} overflows the stream offset", declared_size),
            }
        })?;

        if &id == b"fmt " {
            if (declared_size as usize) < FMT_PCM_LEN {
                return Err(WavError::MalformedContainer {
                    offset,
                    reason: format!("fmt chunk is {} bytes, expected at least {}", declared_size, FMT_PCM_LEN),
                });
            }
            if end > buf.len() {
                break;
            }
            let payload = &buf[payload_start..payload_start + declared_size as usize];
            result.format = Some(parse_fmt(payload, offset)?);
        } else if end > buf.len() {
            break;
        }

        result.chunks.push(SubChunk { id, start: offset, declared_size });
        offset = end;
    }

    Ok(result)
}

/// End of a chunk including its RIFF pad byte, or None on overflow.
fn chunk_end(payload_start: usize, declared_size: u32) -> Option<usize> {
    let padded = (declared_size as usize).checked_add((declared_size & 1) as usize)?;
    payload_start.checked_add(padded)
}

fn parse_fmt(payload: &[u8], offset: usize) -> Result<FormatDescriptor, WavError> {
    let malformed = |e: std::io::Error| WavError::MalformedContainer {
        offset,
        reason: format!("unreadable fmt chunk: {}", e),
    };

    let mut cursor = Cursor::new(payload);
    let audio_format = cursor.read_u16::<LittleEndian>().map_err(malformed)?;
    let channels = cursor.read_u16::<LittleEndian>().map_err(malformed)?;
    let sample_rate = cursor.read_u32::<LittleEndian>().map_err(malformed)?;
    let byte_rate = cursor.read_u32::<LittleEndian>().map_err(malformed)?;
    let block_align = cursor.read_u16::<LittleEndian>().map_err(malformed)?;
    let bits_per_sample = cursor.read_u16::<LittleEndian>().map_err(malformed)?;

    // zero here would open an output with no frames to play
    if channels == 0 || sample_rate == 0 || block_align == 0 {
        return Err(WavError::MalformedContainer {
            offset,
            reason: format!(
                "fmt chunk declares channels={}, sample_rate={}, block_align={}",
                channels, sample_rate, block_align
            ),
        });
    }

    let mut sub_format = None;
    if payload.len() >= FMT_EXTENSIBLE_LEN {
        let extension_len = cursor.read_u16::<LittleEndian>().map_err(malformed)?;
        if extension_len >= 22 {
            let mut guid = [0u8; 16];
            guid.copy_from_slice(&payload[24..40]);
            sub_format = Some(guid);
        }
    }

    Ok(FormatDescriptor {
        audio_format,
        channels,
        sample_rate,
        byte_rate,
        block_align,
        bits_per_sample,
        sub_format,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn fmt_chunk(code: u16, channels: u16, rate: u32, bits: u16) -> Vec<u8> {
        let block_align = channels * bits / 8;
        let mut out = Vec::new();
        out.extend_from_slice(b"fmt ");
        out.extend_from_slice(&16u32.to_le_bytes());
        out.extend_from_slice(&code.to_le_bytes());
        out.extend_from_slice(&channels.to_le_bytes());
        out.extend_from_slice(&rate.to_le_bytes());
        out.extend_from_slice(&(rate * block_align as u32).to_le_bytes());
        out.extend_from_slice(&block_align.to_le_bytes());
        out.extend_from_slice(&bits.to_le_bytes());
        out
    }

    pub(crate) fn riff_header() -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&u32::MAX.to_le_bytes());
        out.extend_from_slice(b"WAVE");
        out
    }

    /// Streaming-style WAV: oversized data size followed by `pcm`.
    pub(crate) fn streaming_wav(pcm: &[u8]) -> Vec<u8> {
        let mut out = riff_header();
        out.extend(fmt_chunk(1, 1, 24000, 16));
        out.extend_from_slice(b"data");
        out.extend_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
        out.extend_from_slice(pcm);
        out
    }

    #[test]
    fn test_missing_signature_yields_nothing() {
        let mut buf = b"ID3\x04\x00\x00\x00\x00\x00\x00\x00\x00".to_vec();
        let first = scan_chunks(&buf).unwrap();
        assert_eq!(first, ScanResult::default());

        // later bytes never make a non-WAV prefix valid
        buf.extend(streaming_wav(&[0; 32]));
        let second = scan_chunks(&buf).unwrap();
        assert!(second.format.is_none());
        assert!(second.data_offset.is_none());
    }

    #[test]
    fn test_short_buffer_waits() {
        let wav = streaming_wav(&[]);
        for len in 0..wav.len() {
            let result = scan_chunks(&wav[..len]).unwrap();
            assert!(result.data_offset.is_none(), "data start reported at prefix {}", len);
        }
        assert!(scan_chunks(&wav).unwrap().is_complete());
    }

    #[test]
    fn test_data_start_from_header_only() {
        let wav = streaming_wav(&[1, 2, 3, 4]);
        let result = scan_chunks(&wav).unwrap();

        let data_tag = 12 + 24;
        assert_eq!(result.data_offset, Some(data_tag + 8));
        let format = result.format.unwrap();
        assert_eq!(format.audio_format, 1);
        assert_eq!(format.channels, 1);
        assert_eq!(format.sample_rate, 24000);
        assert_eq!(format.bits_per_sample, 16);
        assert_eq!(format.block_align, 2);
        assert_eq!(format.byte_rate, 48000);

        let ids: Vec<String> = result.chunks.iter().map(SubChunk::id_str).collect();
        assert_eq!(ids, vec!["fmt ", "data"]);
        assert_eq!(result.chunks[1].declared_size, u32::MAX);
    }

    #[test]
    fn test_data_before_fmt_is_not_a_start() {
        let mut buf = riff_header();
        buf.extend_from_slice(b"data");
        buf.extend_from_slice(&8u32.to_le_bytes());
        buf.extend_from_slice(&[0; 8]);
        buf.extend(fmt_chunk(1, 1, 16000, 16));

        let result = scan_chunks(&buf).unwrap();
        assert!(result.data_offset.is_none());
        assert!(result.format.is_none());
        assert!(result.chunks.is_empty());
    }

    #[test]
    fn test_skips_auxiliary_chunks() {
        let mut buf = riff_header();
        buf.extend_from_slice(b"LIST");
        buf.extend_from_slice(&5u32.to_le_bytes());
        buf.extend_from_slice(b"INFO!");
        buf.push(0); // pad byte for odd size
        buf.extend(fmt_chunk(3, 2, 48000, 32));
        let data_tag = buf.len();
        buf.extend_from_slice(b"data");
        buf.extend_from_slice(&0u32.to_le_bytes());

        let result = scan_chunks(&buf).unwrap();
        assert_eq!(result.chunks.len(), 3);
        assert_eq!(&result.chunks[0].id, b"LIST");
        assert_eq!(result.data_offset, Some(data_tag + 8));
        assert_eq!(result.format.unwrap().audio_format, 3);
    }

    #[test]
    fn test_partial_auxiliary_chunk_waits() {
        let mut buf = riff_header();
        buf.extend_from_slice(b"JUNK");
        buf.extend_from_slice(&64u32.to_le_bytes());
        buf.extend_from_slice(&[0; 10]);

        let result = scan_chunks(&buf).unwrap();
        assert!(result.chunks.is_empty());
        assert!(result.format.is_none());
    }

    #[test]
    fn test_undersized_fmt_is_malformed() {
        let mut buf = riff_header();
        buf.extend_from_slice(b"fmt ");
        buf.extend_from_slice(&4u32.to_le_bytes());
        buf.extend_from_slice(&[1, 0, 1, 0]);

        let err = scan_chunks(&buf).unwrap_err();
        assert!(matches!(err, WavError::MalformedContainer { offset: 12, .. }));
    }

    #[test]
    fn test_zero_channel_or_rate_fmt_is_malformed() {
        let mut buf = riff_header();
        buf.extend(fmt_chunk(1, 0, 0, 16));
        buf.extend_from_slice(b"data");
        buf.extend_from_slice(&u32::MAX.to_le_bytes());

        let err = scan_chunks(&buf).unwrap_err();
        assert!(matches!(err, WavError::MalformedContainer { offset: 12, .. }));

        let mut buf = riff_header();
        buf.extend(fmt_chunk(1, 1, 0, 16));
        assert!(scan_chunks(&buf).is_err());
    }

    #[test]
    fn test_extensible_sub_format_is_captured() {
        let mut buf = riff_header();
        buf.extend_from_slice(b"fmt ");
        buf.extend_from_slice(&40u32.to_le_bytes());
        buf.extend_from_slice(&0xFFFEu16.to_le_bytes());
        buf.extend_from_slice(&2u16.to_le_bytes());
        buf.extend_from_slice(&44100u32.to_le_bytes());
        buf.extend_from_slice(&(44100u32 * 8).to_le_bytes());
        buf.extend_from_slice(&8u16.to_le_bytes());
        buf.extend_from_slice(&32u16.to_le_bytes());
        buf.extend_from_slice(&22u16.to_le_bytes());
        buf.extend_from_slice(&32u16.to_le_bytes());
        buf.extend_from_slice(&3u32.to_le_bytes());
        let guid = [
            0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x10, 0x00, 0x80, 0x00, 0x00, 0xAA, 0x00, 0x38, 0x9B,
            0x71,
        ];
        buf.extend_from_slice(&guid);

        let result = scan_chunks(&buf).unwrap();
        let format = result.format.unwrap();
        assert_eq!(format.audio_format, 0xFFFE);
        assert_eq!(format.sub_format, Some(guid));
    }

    #[test]
    fn test_incremental_and_single_scan_agree() {
        let wav = streaming_wav(&[7; 100]);
        let whole = scan_chunks(&wav).unwrap();

        let mut buf = Vec::new();
        let mut incremental = ScanResult::default();
        for piece in wav.chunks(5) {
            buf.extend_from_slice(piece);
            incremental = scan_chunks(&buf).unwrap();
            if incremental.is_complete() {
                break;
            }
        }

        assert_eq!(incremental.format, whole.format);
        assert_eq!(incremental.data_offset, whole.data_offset);
    }
}
