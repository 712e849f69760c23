//! # Format Resolver
//!
//! Turns the `fmt ` fields into one of a closed set of sample encodings.
//!
//! ## Supported combinations:
//! | format code        | bits | encoding  |
//! |--------------------|------|-----------|
//! | 1 (integer PCM)    | 8    | `Int8`    |
//! | 1 (integer PCM)    | 16   | `Int16`   |
//! | 1 (integer PCM)    | 24   | `Int24`   |
//! | 1 (integer PCM)    | 32   | `Int32`   |
//! | 3 (IEEE float)     | 32   | `Float32` |
//!
//! `WAVE_FORMAT_EXTENSIBLE` (0xFFFE) headers are resolved through the first
//! four bytes of their sub-format GUID. Without that GUID the header is rejected.

use byteorder::{ByteOrder, LittleEndian};
use super::scanner::FormatDescriptor;
use super::WavError;

pub const WAVE_FORMAT_PCM: u16 = 0x0001;
pub const WAVE_FORMAT_IEEE_FLOAT: u16 = 0x0003;
pub const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;

/// Trailing 12 bytes shared by every `KSDATAFORMAT_SUBTYPE_*` GUID, as stored on disk.
const KSDATAFORMAT_GUID_TAIL: [u8; 12] = [
    0x00, 0x00, 0x10, 0x00, 0x80, 0x00, 0x00, 0xAA, 0x00, 0x38, 0x9B, 0x71,
];

/// Sample layout of the PCM payload.
///
/// 8-bit WAV data is unsigned with a 128 midpoint; every wider integer
/// encoding is signed little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleEncoding {
    Int8,
    Int16,
    Int24,
    Int32,
    Float32,
}

impl SampleEncoding {
    /// Map a legacy format code and bit depth to an encoding.
    pub fn from_code(code: u16, bits: u16) -> Result<Self, WavError> {
        match (code, bits) {
            (WAVE_FORMAT_PCM, 8) => Ok(SampleEncoding::Int8),
            (WAVE_FORMAT_PCM, 16) => Ok(SampleEncoding::Int16),
            (WAVE_FORMAT_PCM, 24) => Ok(SampleEncoding::Int24),
            (WAVE_FORMAT_PCM, 32) => Ok(SampleEncoding::Int32),
            (WAVE_FORMAT_IEEE_FLOAT, 32) => Ok(SampleEncoding::Float32),
            _ => Err(WavError::UnsupportedFormat { code, bits }),
        }
    }

    /// Resolve the encoding for a parsed `fmt ` chunk, following the
    /// extensible sub-format when present.
    pub fn resolve(format: &FormatDescriptor) -> Result<Self, WavError> {
        let code = effective_format_code(format)?;
        Self::from_code(code, format.bits_per_sample)
    }

    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleEncoding::Int8 => 1,
            SampleEncoding::Int16 => 2,
            SampleEncoding::Int24 => 3,
            SampleEncoding::Int32 | SampleEncoding::Float32 => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SampleEncoding::Int8 => "int8",
            SampleEncoding::Int16 => "int16",
            SampleEncoding::Int24 => "int24",
            SampleEncoding::Int32 => "int32",
            SampleEncoding::Float32 => "float32",
        }
    }

    /// Decode whole samples from `bytes` into normalized f32 values.
    ///
    /// Trailing bytes that do not form a complete sample are ignored; callers
    /// that stream carry them over to the next chunk.
    pub fn decode_into(self, bytes: &[u8], out: &mut Vec<f32>) {
        let width = self.bytes_per_sample();
        out.reserve(bytes.len() / width);
        for sample in bytes.chunks_exact(width) {
            let value = match self {
                SampleEncoding::Int8 => (sample[0] as f32 - 128.0) / 128.0,
                SampleEncoding::Int16 => i16::from_le_bytes([sample[0], sample[1]]) as f32 / 32768.0,
                SampleEncoding::Int24 => {
                    // place the 24 bits at the top of an i32 so the sign extends
                    let raw = i32::from_le_bytes([0, sample[0], sample[1], sample[2]]) >> 8;
                    raw as f32 / 8_388_608.0
                }
                SampleEncoding::Int32 => {
                    i32::from_le_bytes([sample[0], sample[1], sample[2], sample[3]]) as f32
                        / 2_147_483_648.0
                }
                SampleEncoding::Float32 => {
                    f32::from_le_bytes([sample[0], sample[1], sample[2], sample[3]])
                }
            };
            out.push(value);
        }
    }
}

impl std::fmt::Display for SampleEncoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Format code after unwrapping `WAVE_FORMAT_EXTENSIBLE`.
pub fn effective_format_code(format: &FormatDescriptor) -> Result<u16, WavError> {
    if format.audio_format != WAVE_FORMAT_EXTENSIBLE {
        return Ok(format.audio_format);
    }

    let unsupported = WavError::UnsupportedFormat {
        code: WAVE_FORMAT_EXTENSIBLE,
        bits: format.bits_per_sample,
    };
    let guid = format.sub_format.as_ref().ok_or_else(|| unsupported.clone())?;
    if guid[4..] != KSDATAFORMAT_GUID_TAIL {
        return Err(unsupported);
    }
    let legacy = LittleEndian::read_u32(&guid[..4]);
    u16::try_from(legacy).map_err(|_| unsupported)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(code: u16, bits: u16, sub_format: Option<[u8; 16]>) -> FormatDescriptor {
        FormatDescriptor {
            audio_format: code,
            channels: 2,
            sample_rate: 48000,
            byte_rate: 48000 * 2 * (bits as u32 / 8),
            block_align: 2 * bits / 8,
            bits_per_sample: bits,
            sub_format,
        }
    }

    fn ks_guid(code: u32) -> [u8; 16] {
        let mut guid = [0u8; 16];
        guid[..4].copy_from_slice(&code.to_le_bytes());
        guid[4..].copy_from_slice(&KSDATAFORMAT_GUID_TAIL);
        guid
    }

    #[test]
    fn test_supported_combinations() {
        assert_eq!(SampleEncoding::from_code(1, 8).unwrap(), SampleEncoding::Int8);
        assert_eq!(SampleEncoding::from_code(1, 16).unwrap(), SampleEncoding::Int16);
        assert_eq!(SampleEncoding::from_code(1, 24).unwrap(), SampleEncoding::Int24);
        assert_eq!(SampleEncoding::from_code(1, 32).unwrap(), SampleEncoding::Int32);
        assert_eq!(SampleEncoding::from_code(3, 32).unwrap(), SampleEncoding::Float32);
    }

    #[test]
    fn test_unsupported_combinations_name_values() {
        assert_eq!(
            SampleEncoding::from_code(1, 64).unwrap_err(),
            WavError::UnsupportedFormat { code: 1, bits: 64 }
        );
        assert_eq!(
            SampleEncoding::from_code(7, 16).unwrap_err(),
            WavError::UnsupportedFormat { code: 7, bits: 16 }
        );
        let message = SampleEncoding::from_code(3, 64).unwrap_err().to_string();
        assert!(message.contains("0x0003"));
        assert!(message.contains("64"));
    }

    #[test]
    fn test_extensible_resolves_through_guid() {
        let float = descriptor(WAVE_FORMAT_EXTENSIBLE, 32, Some(ks_guid(3)));
        assert_eq!(SampleEncoding::resolve(&float).unwrap(), SampleEncoding::Float32);

        let pcm = descriptor(WAVE_FORMAT_EXTENSIBLE, 24, Some(ks_guid(1)));
        assert_eq!(SampleEncoding::resolve(&pcm).unwrap(), SampleEncoding::Int24);
    }

    #[test]
    fn test_extensible_without_guid_is_rejected() {
        let bare = descriptor(WAVE_FORMAT_EXTENSIBLE, 16, None);
        assert_eq!(
            SampleEncoding::resolve(&bare).unwrap_err(),
            WavError::UnsupportedFormat { code: 0xFFFE, bits: 16 }
        );

        let mut foreign = ks_guid(1);
        foreign[15] = 0x00;
        let foreign = descriptor(WAVE_FORMAT_EXTENSIBLE, 16, Some(foreign));
        assert!(SampleEncoding::resolve(&foreign).is_err());
    }

    #[test]
    fn test_decode_samples() {
        let mut out = Vec::new();
        SampleEncoding::Int16.decode_into(&[0x00, 0x40, 0x00, 0xC0, 0x01], &mut out);
        assert_eq!(out, vec![0.5, -0.5]);

        out.clear();
        SampleEncoding::Int8.decode_into(&[128, 0, 192], &mut out);
        assert_eq!(out, vec![0.0, -1.0, 0.5]);

        out.clear();
        SampleEncoding::Int24.decode_into(&[0x00, 0x00, 0xC0, 0x00, 0x00, 0x40], &mut out);
        assert_eq!(out, vec![-0.5, 0.5]);

        out.clear();
        SampleEncoding::Float32.decode_into(&0.25f32.to_le_bytes(), &mut out);
        assert_eq!(out, vec![0.25]);
    }
}
