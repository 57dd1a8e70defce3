use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{Error, Result};

/// Raw or corrected hardware timer ticks
pub type Ticks = i64;

/// Distance of a node from the root, counted in rebroadcasts
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Hop(pub u8);

impl Hop {
    /// Creates a new hop, clamped below the protocol limit
    pub fn new(level: u8) -> Self {
        Hop(level.min(super::MAX_HOPS_LIMIT - 1))
    }

    /// The root node's hop
    pub fn root() -> Self {
        Hop(0)
    }

    /// Returns the hop one step further from the root, if it exists
    pub fn next(&self) -> Option<Self> {
        if self.0 + 1 < super::MAX_HOPS_LIMIT {
            Some(Hop(self.0 + 1))
        } else {
            None
        }
    }

    /// Returns the upstream hop a node at this hop listens to
    pub fn previous(&self) -> Option<Self> {
        self.0.checked_sub(1).map(Hop)
    }

    /// Returns the hop level
    pub fn level(&self) -> u8 {
        self.0
    }

    /// Whether this is the root
    pub fn is_root(&self) -> bool {
        self.0 == 0
    }
}

/// Radio timing offsets around a sync frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioTiming {
    /// How long before a frame a node wakes up to power its radio
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub wakeup_advance: Duration,
    /// Air time of the preamble and start-of-frame delimiter
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub preamble_duration: Duration,
    /// Delay between receiving a sync packet and relaying it
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub rebroadcast_delay: Duration,
}

impl Default for RadioTiming {
    fn default() -> Self {
        RadioTiming {
            wakeup_advance: Duration::from_micros(500),
            // 5 bytes of preamble and SFD at 250 kbit/s
            preamble_duration: Duration::from_micros(160),
            // 15 bytes on air plus the rx-to-tx turnaround
            rebroadcast_delay: Duration::from_micros(700),
        }
    }
}

/// Parameters of the roundtrip ranging exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RangingConfig {
    /// Whether ranging runs at all
    pub enabled: bool,
    /// Offset from the frame start at which the hop-1 node sends its request
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub ask_offset: Duration,
    /// Offset from the frame start at which the root starts listening
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub reply_guard: Duration,
    /// How long after the expected request the root keeps listening
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub request_window: Duration,
    /// Delay between receiving a request and sending the reply
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub turnaround: Duration,
    /// How long the asker waits for the reply after the turnaround
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub reply_timeout: Duration,
    /// Nanoseconds represented by one LedBar step
    pub accuracy_ns: u32,
}

impl Default for RangingConfig {
    fn default() -> Self {
        RangingConfig {
            enabled: true,
            ask_offset: Duration::from_millis(2),
            reply_guard: Duration::from_micros(1500),
            request_window: Duration::from_millis(1),
            turnaround: Duration::from_millis(1),
            // 131 bytes on air at 250 kbit/s plus margin
            reply_timeout: Duration::from_millis(5),
            accuracy_ns: 15,
        }
    }
}

/// Configuration shared by root and relay flooders
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FloodingConfig {
    /// Nominal time between two sync frames
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub sync_period: Duration,
    /// Radio channel frequency in MHz
    pub radio_frequency: u16,
    /// Network identifier carried by every sync packet
    pub pan_id: u16,
    /// Transmit power in dBm
    pub tx_power: i8,
    /// Packets are never relayed past this hop count
    pub max_hops: u8,
    /// Consecutive misses tolerated before sync is declared lost
    pub max_miss_packets: u32,
    /// Smallest receiver window
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub w_min: Duration,
    /// Largest receiver window
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub w_max: Duration,
    /// Only follow packets from this hop's predecessor and never change hop
    pub pinned_hop: Option<u8>,
    /// Radio timing offsets
    pub timing: RadioTiming,
    /// Ranging parameters
    pub ranging: RangingConfig,
}

impl Default for FloodingConfig {
    fn default() -> Self {
        FloodingConfig {
            sync_period: Duration::from_secs(10),
            radio_frequency: 2450,
            pan_id: 0xfade,
            tx_power: 0,
            max_hops: 20,
            max_miss_packets: super::DEFAULT_MAX_MISS_PACKETS,
            w_min: Duration::from_micros(100),
            w_max: Duration::from_millis(6),
            pinned_hop: None,
            timing: RadioTiming::default(),
            ranging: RangingConfig::default(),
        }
    }
}

impl FloodingConfig {
    /// Checks that the configuration is consistent
    pub fn validate(&self) -> Result<()> {
        if self.sync_period.is_zero() {
            return Err(Error::config("Sync period must be positive"));
        }
        if self.w_min > self.w_max {
            return Err(Error::config("Minimum receiver window exceeds maximum"));
        }
        if self.w_max * 2 >= self.sync_period {
            return Err(Error::config("Receiver window too large for the sync period"));
        }
        if self.max_hops < 2 {
            return Err(Error::config("max_hops must allow at least one relay"));
        }
        if let Some(hop) = self.pinned_hop {
            if hop == 0 || hop >= self.max_hops {
                return Err(Error::config("Pinned hop must be a relay hop below max_hops"));
            }
        }
        if self.ranging.enabled {
            if self.ranging.accuracy_ns == 0 {
                return Err(Error::config("Ranging accuracy must be positive"));
            }
            if self.ranging.reply_guard >= self.ranging.ask_offset {
                return Err(Error::config("Ranging guard must end before the request"));
            }
            if self.ranging.ask_offset <= self.timing.rebroadcast_delay {
                return Err(Error::config("Ranging request would collide with the rebroadcast"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hop_creation() {
        let hop = Hop::new(3);
        assert_eq!(hop.0, 3);
        assert_eq!(hop.previous(), Some(Hop(2)));
        assert_eq!(hop.next(), Some(Hop(4)));

        let hop = Hop::new(255);
        assert_eq!(hop.0, super::super::MAX_HOPS_LIMIT - 1);
        assert_eq!(hop.next(), None);
        assert_eq!(Hop::root().previous(), None);
        assert!(Hop::root().is_root());
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = FloodingConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_hops, 20);
        assert_eq!(config.max_miss_packets, 3);
        assert_eq!(config.ranging.accuracy_ns, 15);
    }

    #[test]
    fn test_config_validation() {
        let config = FloodingConfig {
            w_min: Duration::from_millis(7),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let config = FloodingConfig {
            pinned_hop: Some(0),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let mut config = FloodingConfig::default();
        config.ranging.reply_guard = Duration::from_millis(3);
        assert!(config.validate().is_err());
        config.ranging.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_config_from_json() {
        let json = r#"{
            "pan_id": 4660,
            "sync_period": 1000000000,
            "timing": { "rebroadcast_delay": 800000 }
        }"#;
        let config: FloodingConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.pan_id, 0x1234);
        assert_eq!(config.sync_period, Duration::from_secs(1));
        assert_eq!(config.timing.rebroadcast_delay, Duration::from_micros(800));
        assert_eq!(config.timing.wakeup_advance, RadioTiming::default().wakeup_advance);
        assert_eq!(config.w_max, Duration::from_millis(6));
        assert!(config.validate().is_ok());
    }
}
