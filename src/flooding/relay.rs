use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, trace, warn};

use crate::core::{Error, FloodingConfig, Hop, Result, Ticks};
use crate::protocol::{FrameSchedule, NodeState, SyncPacket, MAX_FRAME_SIZE, SYNC_PACKET_SIZE};
use crate::radio::{Peripherals, RecvStatus, TransceiverConfig};
use crate::sync::{Correction, Flopsync2, SyncController, Synchronizer};
use crate::time::{ClockDomain, Correct};
use crate::util::saturate_i32;
use super::ranging::RoundtripRanging;
use super::{FloodingScheme, SyncStatus};

/// How a round ended
enum Reception {
    /// Sync packet received at this raw tick
    Packet(Ticks),
    Timeout,
}

/// Flooder of every non-root node
///
/// Each round the relay predicts when the next sync packet will arrive,
/// listens in a window around that prediction, relays the packet one hop
/// further and corrects its clock domain from the prediction error.
#[derive(Debug)]
pub struct RelayFlooder {
    config: FloodingConfig,
    peripherals: Peripherals,
    radio_config: TransceiverConfig,
    clock: Arc<ClockDomain>,
    controller: SyncController,
    schedule: FrameSchedule,
    ranging: RoundtripRanging,
    state: NodeState,
    pinned_hop: Option<Hop>,
    /// Correction applied to the current period
    last_correction: i32,
    receiver_window: i32,
    wakeup_advance: Ticks,
    preamble_duration: Ticks,
    rebroadcast_delay: Ticks,
}

impl RelayFlooder {
    /// Creates an unsynchronized relay updating `clock` with `controller`
    pub fn new(
        config: FloodingConfig,
        peripherals: Peripherals,
        clock: Arc<ClockDomain>,
        controller: impl Into<SyncController>,
    ) -> Result<Self> {
        config.validate()?;
        let controller = controller.into();
        let pinned_hop = config.pinned_hop.map(Hop::new);
        let hop = pinned_hop.unwrap_or(Hop(1));
        Ok(RelayFlooder {
            radio_config: TransceiverConfig::from_flooding(&config),
            schedule: FrameSchedule::new(peripherals.ticks(config.sync_period), hop),
            ranging: RoundtripRanging::new(&config, peripherals.clone(), hop),
            wakeup_advance: peripherals.ticks(config.timing.wakeup_advance),
            preamble_duration: peripherals.ticks(config.timing.preamble_duration),
            rebroadcast_delay: peripherals.ticks(config.timing.rebroadcast_delay),
            receiver_window: controller.receiver_window(),
            last_correction: 0,
            state: NodeState::Unsynchronized,
            pinned_hop,
            controller,
            clock,
            peripherals,
            config,
        })
    }

    /// Creates a relay driven by a [`Flopsync2`] sized from `config`
    pub fn with_flopsync2(
        config: FloodingConfig,
        peripherals: Peripherals,
        clock: Arc<ClockDomain>,
    ) -> Result<Self> {
        let controller = Flopsync2::from_config(&config, peripherals.timer.frequency())?;
        Self::new(config, peripherals, clock, controller)
    }

    /// The clock domain this relay keeps aligned with the root
    pub fn clock(&self) -> &Arc<ClockDomain> {
        &self.clock
    }

    pub fn schedule(&self) -> &FrameSchedule {
        &self.schedule
    }

    pub fn hop(&self) -> Hop {
        self.schedule.hop
    }

    /// Whether packets received by this node are relayed further
    fn rebroadcasts(&self) -> bool {
        self.schedule.hop.level().saturating_add(1) < self.config.max_hops
    }

    async fn power_down(&self) {
        if let Err(e) = self.peripherals.radio.turn_off().await {
            warn!(error = %e, "Failed to turn the radio off");
        }
    }

    /// Listens until `timeout` for the sync packet of the hop above and
    /// relays it
    async fn receive(&self, timeout: Ticks) -> Result<Reception> {
        let radio = &self.peripherals.radio;
        let upstream = self.schedule.hop.previous();
        radio.turn_on().await?;
        radio.configure(self.radio_config).await?;

        let mut buffer = [0u8; MAX_FRAME_SIZE];
        let timestamp = loop {
            let result = radio.recv(&mut buffer, timeout, Correct::Uncorrected).await?;
            if result.status == RecvStatus::Timeout
                || (result.timestamp_valid && result.timestamp > timeout)
            {
                radio.turn_off().await?;
                return Ok(Reception::Timeout);
            }
            let frame = &buffer[..SYNC_PACKET_SIZE];
            if result.is_frame_of(SYNC_PACKET_SIZE)
                && SyncPacket::accept(frame, self.config.pan_id, upstream).is_some()
            {
                break result.timestamp;
            }
            trace!(size = result.size, status = ?result.status, "Ignoring frame");
        };

        if self.rebroadcasts() {
            let packet = SyncPacket::new(self.schedule.hop, self.config.pan_id);
            radio
                .send_at(&packet.encode(), timestamp + self.rebroadcast_delay)
                .await?;
        }
        radio.turn_off().await?;
        Ok(Reception::Packet(timestamp))
    }

    /// Listens without timeout for any acceptable sync packet
    async fn receive_any(&self) -> Result<(Ticks, Hop)> {
        let radio = &self.peripherals.radio;
        let wanted = self.pinned_hop.and_then(|hop| hop.previous());
        radio.turn_on().await?;
        radio.configure(self.radio_config).await?;

        let mut buffer = [0u8; MAX_FRAME_SIZE];
        loop {
            let result = radio.recv(&mut buffer, Ticks::MAX, Correct::Uncorrected).await?;
            if !result.is_frame_of(SYNC_PACKET_SIZE) {
                continue;
            }
            let Some(packet) =
                SyncPacket::accept(&buffer[..SYNC_PACKET_SIZE], self.config.pan_id, wanted)
            else {
                continue;
            };
            if packet.hop.level().saturating_add(1) >= self.config.max_hops {
                trace!(hop = packet.hop.level(), "Ignoring packet from the last hop");
                continue;
            }
            radio.turn_off().await?;
            return Ok((result.timestamp, packet.hop));
        }
    }

    fn lost_check(&mut self) -> NodeState {
        if self.schedule.lost(self.config.max_miss_packets) {
            info!(
                hop = self.schedule.hop.level(),
                missed = self.schedule.miss_count,
                "Synchronization lost"
            );
            self.state = NodeState::Unsynchronized;
        }
        self.state
    }

    fn apply(&mut self, output: Correction) -> Result<()> {
        self.last_correction = output.clock_correction;
        self.receiver_window = output.receiver_window;
        self.clock.update(
            self.schedule.theoretical_frame_start,
            self.schedule.computed_frame_start,
            self.schedule.sync_period,
            self.last_correction,
        )
    }
}

#[async_trait]
impl FloodingScheme for RelayFlooder {
    async fn synchronize(&mut self) -> Result<NodeState> {
        if !self.state.is_synchronized() {
            return Err(Error::invalid_state("Relay must resynchronize first"));
        }

        self.schedule.advance(self.last_correction);
        self.schedule.advance_theoretical();
        let computed = self.schedule.computed_frame_start;
        let window = Ticks::from(self.receiver_window);
        let wakeup = computed - window - self.wakeup_advance;
        let timeout = computed + window + self.preamble_duration;

        if self.peripherals.timer.now() > wakeup {
            self.schedule.measured_frame_start = computed;
            let missed = self.schedule.record_miss();
            warn!(wakeup, missed, "Relay woke up late, skipping round");
            return Ok(self.lost_check());
        }
        self.peripherals.power.deep_sleep_until(wakeup).await;

        let reception = match self.receive(timeout).await {
            Ok(reception) => reception,
            Err(e) if e.is_transceiver_fault() => {
                self.power_down().await;
                self.schedule.measured_frame_start = computed;
                let missed = self.schedule.record_miss();
                warn!(error = %e, missed, "Round abandoned");
                return Ok(self.lost_check());
            }
            Err(e) => return Err(e),
        };

        let output = match reception {
            Reception::Packet(timestamp) => {
                self.schedule.measured_frame_start = timestamp;
                self.schedule.miss_count = 0;
                if let Err(e) = self.ranging.ask(timestamp).await {
                    self.power_down().await;
                    warn!(error = %e, "Ranging failed");
                }
                self.controller
                    .compute_correction(saturate_i32(timestamp - computed))
            }
            Reception::Timeout => {
                self.schedule.measured_frame_start = computed;
                let missed = self.schedule.record_miss();
                debug!(missed, "No sync packet");
                self.controller.on_packet_lost()
            }
        };
        self.apply(output)?;
        debug!(
            hop = self.schedule.hop.level(),
            error = self.schedule.error(),
            correction = output.clock_correction,
            window = output.receiver_window,
            "Round complete"
        );
        Ok(self.lost_check())
    }

    async fn resynchronize(&mut self) -> Result<NodeState> {
        info!(pinned = ?self.pinned_hop, "Resynchronizing");
        self.state = NodeState::Unsynchronized;
        self.controller.reset();

        let (timestamp, sender) = match self.receive_any().await {
            Ok(found) => found,
            Err(e) => {
                self.power_down().await;
                return Err(e);
            }
        };

        let hop = self.pinned_hop.unwrap_or(Hop(sender.level() + 1));
        self.schedule.hop = hop;
        self.schedule.anchor(timestamp);
        self.ranging.set_hop(hop);
        self.clock.reset_to(timestamp);
        self.last_correction = 0;
        self.receiver_window = self.controller.receiver_window();
        self.state = NodeState::Synchronized;
        info!(hop = hop.level(), timestamp, "Synchronized");
        Ok(self.state)
    }

    fn status(&self) -> SyncStatus {
        let ranging = self.ranging.state();
        SyncStatus {
            state: self.state,
            hop: self.schedule.hop,
            miss_count: self.schedule.miss_count,
            sync_error: self.controller.sync_error(),
            clock_correction: self.last_correction,
            receiver_window: self.receiver_window,
            measured_frame_start: self.schedule.measured_frame_start,
            computed_frame_start: self.schedule.computed_frame_start,
            theoretical_frame_start: self.schedule.theoretical_frame_start,
            ranging_delay_ns: (ranging.exchanges > 0).then_some(ranging.total_delay_ns),
        }
    }
}
