use crate::core::{Error, Result};

/// Payload size of a ranging reply
pub const RANGING_REPLY_SIZE: usize = 125;

/// Largest disagreement, in nibbles, between the two ends of a decoded bar
pub const MAX_CORRUPTED_NIBBLES: usize = 6;

const SET: u8 = 0x0f;
const CLEARED: u8 = 0x00;

/// Corruption-tolerant thermometer code over `N` bytes
///
/// A value `v` in `[0, 2N]` is sent as `v` set nibbles followed by cleared
/// ones, filling each byte low nibble first. Without a CRC a few nibbles may
/// arrive flipped; the decoder locates the boundary from both ends and takes
/// the midpoint when they disagree by at most [`MAX_CORRUPTED_NIBBLES`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedBar<const N: usize> {
    packet: [u8; N],
}

impl<const N: usize> LedBar<N> {
    /// Largest encodable value
    pub const MAX_VALUE: usize = 2 * N;

    /// Encodes `value`, which must not exceed [`Self::MAX_VALUE`]
    pub fn encode(value: usize) -> Result<Self> {
        if value > Self::MAX_VALUE {
            return Err(Error::protocol(format!(
                "LedBar value {} exceeds {}",
                value,
                Self::MAX_VALUE
            )));
        }
        Ok(Self::filled(value))
    }

    /// Encodes `value` clamped into the representable range
    pub fn saturating(value: i64) -> Self {
        Self::filled(value.clamp(0, Self::MAX_VALUE as i64) as usize)
    }

    fn filled(value: usize) -> Self {
        let mut packet = [0u8; N];
        for nibble in 0..value {
            packet[nibble / 2] |= SET << (4 * (nibble % 2));
        }
        LedBar { packet }
    }

    /// Wraps a received payload
    pub fn from_packet(packet: [u8; N]) -> Self {
        LedBar { packet }
    }

    /// Wraps a received payload of exactly `N` bytes
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let packet: [u8; N] = bytes.try_into().ok()?;
        Some(LedBar { packet })
    }

    /// The bytes to put on air
    pub fn packet(&self) -> &[u8; N] {
        &self.packet
    }

    /// Decodes the bar, returning the value and whether it can be trusted
    pub fn decode(&self) -> (usize, bool) {
        let lo = (0..Self::MAX_VALUE)
            .find(|&i| self.nibble(i) != SET)
            .unwrap_or(Self::MAX_VALUE);
        let hi = (0..Self::MAX_VALUE)
            .rev()
            .find(|&i| self.nibble(i) != CLEARED)
            .map_or(0, |i| i + 1);

        if hi < lo {
            // Unreachable for a bar whose nibbles are all 0x0 or 0xf
            return (lo, false);
        }
        ((lo + hi) / 2, hi - lo <= MAX_CORRUPTED_NIBBLES)
    }

    fn nibble(&self, index: usize) -> u8 {
        (self.packet[index / 2] >> (4 * (index % 2))) & 0x0f
    }
}
