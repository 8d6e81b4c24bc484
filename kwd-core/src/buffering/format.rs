//! Audio format descriptor passed alongside a stream.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    Lpcm,
    Opus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endianness {
    Little,
    Big,
}

impl Endianness {
    /// Byte order of the machine this crate was compiled for.
    pub const fn native() -> Self {
        if cfg!(target_endian = "big") {
            Endianness::Big
        } else {
            Endianness::Little
        }
    }
}

/// Layout of the words carried by an `AudioStream`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioFormat {
    pub encoding: Encoding,
    pub endianness: Endianness,
    pub sample_rate_hz: u32,
    pub sample_size_bits: u16,
    pub num_channels: u16,
}

impl Default for AudioFormat {
    /// 16 kHz mono 16-bit LPCM in native byte order.
    fn default() -> Self {
        Self {
            encoding: Encoding::Lpcm,
            endianness: Endianness::native(),
            sample_rate_hz: 16_000,
            sample_size_bits: 16,
            num_channels: 1,
        }
    }
}

impl AudioFormat {
    pub fn with_sample_rate(sample_rate_hz: u32) -> Self {
        Self {
            sample_rate_hz,
            ..Self::default()
        }
    }

    /// Whether consumers would have to swap bytes to interpret the samples.
    pub fn requires_byteswap(&self) -> bool {
        self.sample_size_bits > 8 && self.endianness != Endianness::native()
    }

    /// Number of words covering `ms` milliseconds of audio, never zero.
    pub fn words_for_ms(&self, ms: u64) -> usize {
        let words = self.sample_rate_hz as u64 * self.num_channels.max(1) as u64 * ms / 1000;
        words.max(1) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_format_never_needs_swapping() {
        assert!(!AudioFormat::default().requires_byteswap());
    }

    #[test]
    fn foreign_byte_order_needs_swapping() {
        let foreign = match Endianness::native() {
            Endianness::Little => Endianness::Big,
            Endianness::Big => Endianness::Little,
        };
        let format = AudioFormat {
            endianness: foreign,
            ..AudioFormat::default()
        };
        assert!(format.requires_byteswap());

        let eight_bit = AudioFormat {
            sample_size_bits: 8,
            ..format
        };
        assert!(!eight_bit.requires_byteswap());
    }

    #[test]
    fn twenty_ms_at_16k_is_320_words() {
        assert_eq!(AudioFormat::default().words_for_ms(20), 320);
        assert_eq!(AudioFormat::with_sample_rate(48_000).words_for_ms(20), 960);
        assert_eq!(AudioFormat::default().words_for_ms(0), 1);
    }
}
