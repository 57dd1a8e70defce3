use async_trait::async_trait;
use tracing::{debug, warn};

use crate::core::{FloodingConfig, Hop, Result, Ticks};
use crate::protocol::{FrameSchedule, NodeState, SyncPacket};
use crate::radio::{Peripherals, TransceiverConfig};
use super::ranging::RoundtripRanging;
use super::{FloodingScheme, SyncStatus};

/// Flooder of the root node, the time reference of the network
///
/// The root never loses synchronization: a round whose wakeup is already
/// late is skipped and counted, and the next one is still scheduled on the
/// same period grid.
#[derive(Debug)]
pub struct RootFlooder {
    peripherals: Peripherals,
    radio_config: TransceiverConfig,
    packet: SyncPacket,
    schedule: FrameSchedule,
    ranging: RoundtripRanging,
    wakeup_advance: Ticks,
    started: bool,
}

impl RootFlooder {
    pub fn new(config: FloodingConfig, peripherals: Peripherals) -> Result<Self> {
        config.validate()?;
        let sync_period = peripherals.ticks(config.sync_period);
        Ok(RootFlooder {
            radio_config: TransceiverConfig::from_flooding(&config),
            packet: SyncPacket::new(Hop::root(), config.pan_id),
            schedule: FrameSchedule::new(sync_period, Hop::root()),
            ranging: RoundtripRanging::new(&config, peripherals.clone(), Hop::root()),
            wakeup_advance: peripherals.ticks(config.timing.wakeup_advance),
            peripherals,
            started: false,
        })
    }

    /// Frame schedule of the last round
    pub fn schedule(&self) -> &FrameSchedule {
        &self.schedule
    }

    /// Raw tick of the next frame to be sent
    fn next_frame_start(&mut self) -> Ticks {
        if self.started {
            self.schedule.computed_frame_start + self.schedule.sync_period
        } else {
            self.started = true;
            self.peripherals.timer.now() + self.wakeup_advance
        }
    }

    async fn power_down(&self) {
        if let Err(e) = self.peripherals.radio.turn_off().await {
            warn!(error = %e, "Failed to turn the radio off");
        }
    }

    async fn transmit(&self, frame_start: Ticks) -> Result<()> {
        let radio = &self.peripherals.radio;
        radio.turn_on().await?;
        radio.configure(self.radio_config).await?;
        let sent = radio.send_at(&self.packet.encode(), frame_start).await;
        radio.turn_off().await?;
        sent
    }
}

#[async_trait]
impl FloodingScheme for RootFlooder {
    async fn synchronize(&mut self) -> Result<NodeState> {
        let frame_start = self.next_frame_start();
        self.schedule.computed_frame_start = frame_start;
        self.schedule.theoretical_frame_start = frame_start;

        let wakeup = frame_start - self.wakeup_advance;
        if self.peripherals.timer.now() > wakeup {
            let missed = self.schedule.record_miss();
            warn!(frame_start, missed, "Root woke up late, skipping sync frame");
            return Ok(NodeState::Synchronized);
        }
        self.peripherals.power.deep_sleep_until(wakeup).await;

        if let Err(e) = self.transmit(frame_start).await {
            if !e.is_transceiver_fault() {
                return Err(e);
            }
            self.power_down().await;
            let missed = self.schedule.record_miss();
            warn!(error = %e, missed, "Sync frame not sent");
            return Ok(NodeState::Synchronized);
        }
        self.schedule.measured_frame_start = frame_start;
        self.schedule.miss_count = 0;
        debug!(frame_start, "Sync frame sent");

        if let Err(e) = self.ranging.reply(frame_start).await {
            self.power_down().await;
            warn!(error = %e, "Ranging reply failed");
        }
        Ok(NodeState::Synchronized)
    }

    async fn resynchronize(&mut self) -> Result<NodeState> {
        Ok(NodeState::Synchronized)
    }

    fn status(&self) -> SyncStatus {
        SyncStatus {
            state: NodeState::Synchronized,
            hop: Hop::root(),
            miss_count: self.schedule.miss_count,
            sync_error: 0,
            clock_correction: 0,
            receiver_window: 0,
            measured_frame_start: self.schedule.measured_frame_start,
            computed_frame_start: self.schedule.computed_frame_start,
            theoretical_frame_start: self.schedule.theoretical_frame_start,
            ranging_delay_ns: Some(self.ranging.state().total_delay_ns),
        }
    }
}
