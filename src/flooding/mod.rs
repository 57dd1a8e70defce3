//! Flooding dissemination of sync packets
//!
//! The root transmits one sync packet per period. Every relay listens for the
//! copy sent by the hop just above it, timestamps it, rebroadcasts it one hop
//! further and feeds the timing error to its synchronizer.
//!
//! Rounds are driven by the caller: one `synchronize()` per sync period,
//! strictly sequential on a node. A relay that reports
//! [`NodeState::Unsynchronized`] must be brought back with `resynchronize()`.

pub mod ranging;
pub mod relay;
pub mod root;

use async_trait::async_trait;

use crate::core::{Hop, Result, Ticks};
use crate::protocol::NodeState;

pub use self::ranging::{RangingState, RoundtripRanging};
pub use self::relay::RelayFlooder;
pub use self::root::RootFlooder;

/// Diagnostic snapshot of a flooder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncStatus {
    pub state: NodeState,
    pub hop: Hop,
    pub miss_count: u32,
    /// Error fed to the synchronizer in the last successful round
    pub sync_error: i32,
    /// Correction applied to the current period
    pub clock_correction: i32,
    /// Half-width of the next receive window
    pub receiver_window: i32,
    pub measured_frame_start: Ticks,
    pub computed_frame_start: Ticks,
    pub theoretical_frame_start: Ticks,
    /// Accumulated propagation delay from the root, when ranging ran
    pub ranging_delay_ns: Option<i64>,
}

/// A node's role in the flood
#[async_trait]
pub trait FloodingScheme: Send {
    /// Runs one synchronization round
    async fn synchronize(&mut self) -> Result<NodeState>;

    /// Waits for any valid sync packet and restarts tracking from it
    async fn resynchronize(&mut self) -> Result<NodeState>;

    fn status(&self) -> SyncStatus;
}

/// The flooders a node can run
#[derive(Debug)]
pub enum Flooder {
    Root(RootFlooder),
    Relay(RelayFlooder),
}

impl Flooder {
    pub fn is_root(&self) -> bool {
        matches!(self, Flooder::Root(_))
    }
}

impl From<RootFlooder> for Flooder {
    fn from(flooder: RootFlooder) -> Self {
        Flooder::Root(flooder)
    }
}

impl From<RelayFlooder> for Flooder {
    fn from(flooder: RelayFlooder) -> Self {
        Flooder::Relay(flooder)
    }
}

#[async_trait]
impl FloodingScheme for Flooder {
    async fn synchronize(&mut self) -> Result<NodeState> {
        match self {
            Flooder::Root(f) => f.synchronize().await,
            Flooder::Relay(f) => f.synchronize().await,
        }
    }

    async fn resynchronize(&mut self) -> Result<NodeState> {
        match self {
            Flooder::Root(f) => f.resynchronize().await,
            Flooder::Relay(f) => f.resynchronize().await,
        }
    }

    fn status(&self) -> SyncStatus {
        match self {
            Flooder::Root(f) => f.status(),
            Flooder::Relay(f) => f.status(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Error, FloodingConfig};
    use crate::sim::{AirConfig, Oscillator, SimAir};
    use crate::time::ClockDomain;

    #[tokio::test(start_paused = true)]
    async fn test_flooders_dispatch_by_role() {
        let air = SimAir::new(AirConfig::default());
        let root_node = air.node(Oscillator::ideal());
        let relay_node = air.node(Oscillator::new(5_000, 0));
        let config = FloodingConfig::default();

        let mut root: Flooder = RootFlooder::new(config.clone(), root_node.peripherals())
            .unwrap()
            .into();
        let mut relay: Flooder =
            RelayFlooder::with_flopsync2(config, relay_node.peripherals(), ClockDomain::shared())
                .unwrap()
                .into();
        assert!(root.is_root());
        assert!(!relay.is_root());

        // The root is the reference and never has to rejoin
        assert_eq!(root.resynchronize().await.unwrap(), NodeState::Synchronized);
        assert_eq!(relay.status().state, NodeState::Unsynchronized);

        let (root_result, relay_result) = tokio::join!(
            async {
                for _ in 0..2 {
                    root.synchronize().await?;
                }
                Ok::<_, Error>(())
            },
            async {
                relay.resynchronize().await?;
                relay.synchronize().await
            },
        );
        root_result.unwrap();
        assert_eq!(relay_result.unwrap(), NodeState::Synchronized);

        let root_status = root.status();
        assert!(root_status.hop.is_root());
        assert_eq!(root_status.state, NodeState::Synchronized);
        assert_eq!(root_status.miss_count, 0);

        let relay_status = relay.status();
        assert_eq!(relay_status.hop, Hop(1));
        assert_eq!(relay_status.state, NodeState::Synchronized);
        assert_eq!(relay_status.miss_count, 0);
        assert_eq!(relay_status.sync_error, 0);
    }
}
