use tracing::{debug, trace, warn};

use crate::core::{FloodingConfig, Hop, RangingConfig, Result, Ticks};
use crate::protocol::{
    RangingReply, SyncPacket, MAX_FRAME_SIZE, RANGING_REPLY_SIZE, SYNC_PACKET_SIZE,
};
use crate::radio::{Peripherals, RecvStatus, TransceiverConfig};
use crate::time::Correct;

/// Delay estimates of one node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangingState {
    /// One-way delay to the upstream node measured in the last exchange, in ns
    pub last_delay_ns: i64,
    /// Accumulated delay from the root, in ns
    pub total_delay_ns: i64,
    /// Exchanges completed since the last hop change
    pub exchanges: u32,
    pub hop: Hop,
}

impl RangingState {
    fn fresh(hop: Hop) -> Self {
        RangingState {
            last_delay_ns: 0,
            total_delay_ns: 0,
            exchanges: 0,
            hop,
        }
    }
}

/// Roundtrip ranging between the first relay hop and the root
///
/// The hop-1 node asks right after each sync frame; the root listens for the
/// request and answers with its own accumulated delay as a LedBar. The asker
/// halves the roundtrip, net of the turnaround, to get the one-way delay.
#[derive(Debug)]
pub struct RoundtripRanging {
    config: RangingConfig,
    pan_id: u16,
    radio_config: TransceiverConfig,
    peripherals: Peripherals,
    state: RangingState,
    ask_offset: Ticks,
    reply_guard: Ticks,
    request_window: Ticks,
    turnaround: Ticks,
    reply_timeout: Ticks,
}

impl RoundtripRanging {
    pub fn new(config: &FloodingConfig, peripherals: Peripherals, hop: Hop) -> Self {
        let ranging = &config.ranging;
        RoundtripRanging {
            ask_offset: peripherals.ticks(ranging.ask_offset),
            reply_guard: peripherals.ticks(ranging.reply_guard),
            request_window: peripherals.ticks(ranging.request_window),
            turnaround: peripherals.ticks(ranging.turnaround),
            reply_timeout: peripherals.ticks(ranging.reply_timeout),
            config: ranging.clone(),
            pan_id: config.pan_id,
            radio_config: TransceiverConfig::from_flooding(config),
            peripherals,
            state: RangingState::fresh(hop),
        }
    }

    pub fn state(&self) -> &RangingState {
        &self.state
    }

    /// Follows a hop change of the owning flooder, forgetting old estimates
    pub fn set_hop(&mut self, hop: Hop) {
        if self.state.hop != hop {
            self.state = RangingState::fresh(hop);
        }
    }

    /// Asks the upstream node for its delay, `frame_start` being the raw
    /// timestamp of this round's sync packet
    ///
    /// Only the hop-1 node asks. Returns the new accumulated delay, or `None`
    /// when no usable reply arrived.
    pub async fn ask(&mut self, frame_start: Ticks) -> Result<Option<i64>> {
        if !self.config.enabled || self.state.hop != Hop(1) {
            return Ok(None);
        }
        let ask_time = frame_start + self.ask_offset;
        if self.peripherals.timer.now() > ask_time {
            warn!(ask_time, "Ranging request time already passed");
            return Ok(None);
        }

        let radio = self.peripherals.radio.clone();
        radio.turn_on().await?;
        let exchange = self.exchange(ask_time).await;
        radio.turn_off().await?;

        let Some((timestamp, reply)) = exchange? else {
            debug!(hop = self.state.hop.level(), "No ranging reply");
            return Ok(None);
        };
        let (steps, valid) = reply.decode();
        if !valid {
            debug!(steps, "Discarding corrupted ranging reply");
            return Ok(None);
        }

        let roundtrip = timestamp - ask_time - self.turnaround;
        let last_delay_ns = (self.peripherals.timer.tick_to_ns(roundtrip) / 2).max(0);
        let upstream_ns = steps as i64 * i64::from(self.config.accuracy_ns);
        self.state.last_delay_ns = last_delay_ns;
        self.state.total_delay_ns = upstream_ns + last_delay_ns;
        self.state.exchanges = self.state.exchanges.saturating_add(1);
        debug!(
            last_delay_ns,
            total_delay_ns = self.state.total_delay_ns,
            "Ranging complete"
        );
        Ok(Some(self.state.total_delay_ns))
    }

    async fn exchange(&self, ask_time: Ticks) -> Result<Option<(Ticks, RangingReply)>> {
        let radio = &self.peripherals.radio;
        let request = SyncPacket::new(self.state.hop, self.pan_id);
        radio.configure(self.radio_config).await?;
        radio.send_at(&request.encode(), ask_time).await?;

        radio.configure(self.radio_config.without_crc()).await?;
        let deadline = ask_time + self.turnaround + self.reply_timeout;
        let mut buffer = [0u8; MAX_FRAME_SIZE];
        loop {
            let result = radio.recv(&mut buffer, deadline, Correct::Uncorrected).await?;
            if result.status == RecvStatus::Timeout {
                return Ok(None);
            }
            if result.is_frame_of(RANGING_REPLY_SIZE) {
                if let Some(reply) = RangingReply::from_slice(&buffer[..RANGING_REPLY_SIZE]) {
                    return Ok(Some((result.timestamp, reply)));
                }
            }
            trace!(size = result.size, status = ?result.status, "Ignoring frame while ranging");
        }
    }

    /// Answers a request from the downstream node, `frame_start` being the raw
    /// time this node sent its sync packet
    ///
    /// Only the root answers. Returns whether a reply was sent.
    pub async fn reply(&mut self, frame_start: Ticks) -> Result<bool> {
        let Some(requester) = self.state.hop.next() else {
            return Ok(false);
        };
        if !self.config.enabled || !self.state.hop.is_root() {
            return Ok(false);
        }

        let timer = &self.peripherals.timer;
        timer.wait_until(frame_start + self.reply_guard).await;

        let radio = self.peripherals.radio.clone();
        radio.turn_on().await?;
        let answered = self.answer(frame_start, requester).await;
        radio.turn_off().await?;
        answered
    }

    async fn answer(&self, frame_start: Ticks, requester: Hop) -> Result<bool> {
        let radio = &self.peripherals.radio;
        radio.configure(self.radio_config).await?;
        let deadline = frame_start + self.ask_offset + self.request_window;
        let mut buffer = [0u8; MAX_FRAME_SIZE];
        let request_time = loop {
            let result = radio.recv(&mut buffer, deadline, Correct::Uncorrected).await?;
            if result.status == RecvStatus::Timeout {
                debug!("No ranging request");
                return Ok(false);
            }
            let frame = &buffer[..SYNC_PACKET_SIZE];
            if result.is_frame_of(SYNC_PACKET_SIZE)
                && SyncPacket::accept(frame, self.pan_id, Some(requester)).is_some()
            {
                break result.timestamp;
            }
            trace!(size = result.size, "Ignoring frame while waiting for a ranging request");
        };

        let steps = self.state.total_delay_ns / i64::from(self.config.accuracy_ns.max(1));
        let reply = RangingReply::saturating(steps);
        radio.configure(self.radio_config.without_crc()).await?;
        radio.send_at(reply.packet(), request_time + self.turnaround).await?;
        debug!(steps, "Ranging reply sent");
        Ok(true)
    }
}
