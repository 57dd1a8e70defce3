//! Radio and power interfaces consumed by the flooders
//!
//! The transceiver driver owns framing, SPI and exception handling. This
//! crate only sees a send-at-time and a receive-with-timestamp primitive.
//! Reception problems such as timeouts or CRC failures are ordinary
//! [`RecvStatus`] values; driver faults come back as
//! [`Error::Transceiver`](crate::Error::Transceiver).

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::{FloodingConfig, Result, Ticks};
use crate::time::{Correct, HardwareTimer};

/// Radio configuration applied before each exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransceiverConfig {
    /// Channel frequency in MHz
    pub frequency: u16,
    /// Transmit power in dBm
    pub tx_power: i8,
    /// Append and check the frame CRC
    pub crc: bool,
    /// Abort a reception that started before the timeout but ends after it
    pub strict_timeout: bool,
}

impl TransceiverConfig {
    /// Configuration used for sync packets
    pub fn from_flooding(config: &FloodingConfig) -> Self {
        TransceiverConfig {
            frequency: config.radio_frequency,
            tx_power: config.tx_power,
            crc: true,
            strict_timeout: false,
        }
    }

    /// Same channel and power with CRC turned off
    pub fn without_crc(self) -> Self {
        TransceiverConfig { crc: false, ..self }
    }
}

/// Outcome of one receive call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvStatus {
    /// A frame was received
    Ok,
    /// Nothing arrived before the timeout
    Timeout,
    /// The frame did not fit the buffer
    TooLong,
    /// The frame failed its CRC check
    CrcFail,
}

/// Result of a receive call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecvResult {
    /// Start-of-frame timestamp, in the requested timescale
    pub timestamp: Ticks,
    /// Received signal strength in dBm
    pub rssi: i16,
    /// Number of bytes written into the buffer
    pub size: usize,
    pub status: RecvStatus,
    /// Whether `timestamp` refers to this frame
    pub timestamp_valid: bool,
}

impl RecvResult {
    /// A receive call that ended without a frame
    pub fn timeout() -> Self {
        RecvResult {
            timestamp: 0,
            rssi: 0,
            size: 0,
            status: RecvStatus::Timeout,
            timestamp_valid: false,
        }
    }

    /// Whether a complete, timestamped frame of exactly `size` bytes arrived
    pub fn is_frame_of(&self, size: usize) -> bool {
        self.status == RecvStatus::Ok && self.timestamp_valid && self.size == size
    }
}

/// The node's radio transceiver
#[async_trait]
pub trait Transceiver: Send + Sync {
    /// Applies channel, power and CRC settings
    async fn configure(&self, config: TransceiverConfig) -> Result<()>;

    /// Powers the radio up
    async fn turn_on(&self) -> Result<()>;

    /// Powers the radio down
    async fn turn_off(&self) -> Result<()>;

    /// Transmits `frame` so that its start-of-frame leaves at raw tick `when`
    async fn send_at(&self, frame: &[u8], when: Ticks) -> Result<()>;

    /// Listens until a frame arrives or `timeout` passes
    ///
    /// `correction` selects the timescale of both `timeout` and the returned
    /// timestamp.
    async fn recv(
        &self,
        buffer: &mut [u8],
        timeout: Ticks,
        correction: Correct,
    ) -> Result<RecvResult>;
}

/// Power management of the node
#[async_trait]
pub trait PowerManager: Send + Sync {
    /// Sleeps in the lowest power state until raw tick `when`
    async fn deep_sleep_until(&self, when: Ticks);
}

/// Long-lived handles to the node's hardware, obtained once at startup
#[derive(Clone)]
pub struct Peripherals {
    pub timer: Arc<dyn HardwareTimer>,
    pub radio: Arc<dyn Transceiver>,
    pub power: Arc<dyn PowerManager>,
}

impl Peripherals {
    /// Bundles the three handles
    pub fn new(
        timer: Arc<dyn HardwareTimer>,
        radio: Arc<dyn Transceiver>,
        power: Arc<dyn PowerManager>,
    ) -> Self {
        Peripherals { timer, radio, power }
    }

    /// Converts a duration to timer ticks
    pub fn ticks(&self, duration: std::time::Duration) -> Ticks {
        crate::util::duration_to_ticks(duration, self.timer.frequency())
    }
}

impl std::fmt::Debug for Peripherals {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peripherals")
            .field("timer_frequency", &self.timer.frequency())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_flooding() {
        let flooding = FloodingConfig {
            radio_frequency: 2460,
            tx_power: -5,
            ..Default::default()
        };
        let config = TransceiverConfig::from_flooding(&flooding);
        assert_eq!(config.frequency, 2460);
        assert_eq!(config.tx_power, -5);
        assert!(config.crc);

        let raw = config.without_crc();
        assert!(!raw.crc);
        assert_eq!(raw.frequency, 2460);
    }

    #[test]
    fn test_frame_check() {
        let mut result = RecvResult {
            timestamp: 10,
            rssi: -70,
            size: 7,
            status: RecvStatus::Ok,
            timestamp_valid: true,
        };
        assert!(result.is_frame_of(7));
        assert!(!result.is_frame_of(125));

        result.timestamp_valid = false;
        assert!(!result.is_frame_of(7));
        assert!(!RecvResult::timeout().is_frame_of(0));
    }
}
