//! FLOPSYNC-2 flooding time synchronization for multi-hop wireless sensor networks
//!
//! A root node floods a sync packet once per period. Every other node
//! timestamps the copy it hears, relays it one hop further and runs a
//! FLOPSYNC-2 controller on the prediction error, which keeps a
//! [`ClockDomain`](time::ClockDomain) mapping its raw oscillator ticks onto
//! the root's timescale. Nodes one hop from the root also estimate the radio
//! propagation delay with a roundtrip ranging exchange.
//!
//! Hardware is reached through the [`HardwareTimer`](time::HardwareTimer),
//! [`Transceiver`](radio::Transceiver) and [`PowerManager`](radio::PowerManager)
//! traits; the [`sim`] module implements them over a virtual radio medium.

pub mod core;
pub mod flooding;
pub mod protocol;
pub mod radio;
pub mod sim;
pub mod sync;
pub mod time;
pub mod util;

// Re-export commonly used items
pub use crate::core::{Error, FloodingConfig, Hop, Result, Ticks};
pub use crate::flooding::{Flooder, FloodingScheme, RelayFlooder, RootFlooder, SyncStatus};
pub use crate::protocol::NodeState;
pub use crate::radio::Peripherals;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
