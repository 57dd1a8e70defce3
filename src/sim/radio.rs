use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio::time::sleep_until;
use tracing::trace;

use crate::core::{Error, Result, Ticks};
use crate::radio::{RecvResult, RecvStatus, Transceiver, TransceiverConfig};
use crate::time::Correct;
use super::{AirFrame, SimAir, SimClock};

const RSSI_DBM: i16 = -60;

/// A frame this radio transmitted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentFrame {
    /// Local tick at which the start of frame left
    pub at: Ticks,
    pub bytes: Bytes,
    pub crc: bool,
}

#[derive(Debug)]
struct Receiver {
    rx: broadcast::Receiver<AirFrame>,
    /// Frames heard on air but not yet delivered
    pending: Vec<AirFrame>,
}

impl Receiver {
    fn absorb(&mut self, own_id: usize, frame: AirFrame) {
        if frame.sender != own_id {
            self.pending.push(frame);
        }
    }

    fn drain(&mut self, own_id: usize) {
        loop {
            match self.rx.try_recv() {
                Ok(frame) => self.absorb(own_id, frame),
                Err(TryRecvError::Lagged(skipped)) => trace!(skipped, "Simulated radio lagged"),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
    }

    /// Index of the earliest frame arriving within `[start, deadline]`
    fn earliest(&self, start: i64, deadline: Option<i64>) -> Option<usize> {
        self.pending
            .iter()
            .enumerate()
            .filter(|(_, f)| f.arrival >= start && deadline.map_or(true, |d| f.arrival <= d))
            .min_by_key(|(_, f)| f.arrival)
            .map(|(i, _)| i)
    }
}

/// Simulated transceiver attached to a [`SimAir`]
///
/// A frame is heard only if it reaches the radio while a `recv` call is
/// listening. Radios configured with CRC report frames sent without one as
/// [`RecvStatus::CrcFail`].
#[derive(Debug)]
pub struct SimRadio {
    id: usize,
    air: Arc<SimAir>,
    clock: Arc<SimClock>,
    receiver: tokio::sync::Mutex<Receiver>,
    powered: AtomicBool,
    config: Mutex<Option<TransceiverConfig>>,
    faults: AtomicU32,
    sent: Mutex<Vec<SentFrame>>,
}

impl SimRadio {
    pub(crate) fn new(id: usize, air: Arc<SimAir>, clock: Arc<SimClock>) -> Self {
        let rx = air.subscribe();
        SimRadio {
            id,
            air,
            clock,
            receiver: tokio::sync::Mutex::new(Receiver {
                rx,
                pending: Vec::new(),
            }),
            powered: AtomicBool::new(false),
            config: Mutex::new(None),
            faults: AtomicU32::new(0),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Identifier of this radio on the air
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn is_on(&self) -> bool {
        self.powered.load(Ordering::Relaxed)
    }

    /// Last configuration applied
    pub fn config(&self) -> Option<TransceiverConfig> {
        *self.config.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Frames transmitted so far
    pub fn sent(&self) -> Vec<SentFrame> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Makes the next `count` sends or receives fail with a transceiver fault
    pub fn inject_faults(&self, count: u32) {
        self.faults.store(count, Ordering::Relaxed);
    }

    fn check_ready(&self, operation: &str) -> Result<()> {
        let pending = self
            .faults
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
        if pending.is_ok() {
            return Err(Error::transceiver(format!("Injected fault during {}", operation)));
        }
        if !self.is_on() {
            return Err(Error::transceiver(format!("Radio is off during {}", operation)));
        }
        Ok(())
    }

    fn crc_enabled(&self) -> bool {
        self.config().map_or(true, |c| c.crc)
    }

    fn deliver(&self, frame: AirFrame, buffer: &mut [u8], correction: Correct) -> RecvResult {
        self.clock.capture(frame.arrival);
        let raw = self.clock.local_at(frame.arrival);
        let timestamp = self.clock.to_timescale(raw, correction);

        let status = if frame.bytes.len() > buffer.len() {
            RecvStatus::TooLong
        } else if self.crc_enabled() && !frame.crc {
            RecvStatus::CrcFail
        } else {
            RecvStatus::Ok
        };
        let size = if status == RecvStatus::TooLong {
            0
        } else {
            buffer[..frame.bytes.len()].copy_from_slice(&frame.bytes);
            frame.bytes.len()
        };
        RecvResult {
            timestamp,
            rssi: RSSI_DBM,
            size,
            status,
            timestamp_valid: true,
        }
    }
}

#[async_trait]
impl Transceiver for SimRadio {
    async fn configure(&self, config: TransceiverConfig) -> Result<()> {
        *self.config.lock().unwrap_or_else(PoisonError::into_inner) = Some(config);
        Ok(())
    }

    async fn turn_on(&self) -> Result<()> {
        self.powered.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn turn_off(&self) -> Result<()> {
        self.powered.store(false, Ordering::Relaxed);
        Ok(())
    }

    async fn send_at(&self, frame: &[u8], when: Ticks) -> Result<()> {
        self.check_ready("send")?;
        let real = self.clock.real_at(when);
        if real < self.air.now() {
            return Err(Error::transceiver(format!("Send time {} already passed", when)));
        }
        sleep_until(self.air.instant(real)).await;

        let bytes = Bytes::copy_from_slice(frame);
        let crc = self.crc_enabled();
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(SentFrame {
                at: when,
                bytes: bytes.clone(),
                crc,
            });
        self.air.transmit(self.id, real, crc, bytes);
        Ok(())
    }

    async fn recv(
        &self,
        buffer: &mut [u8],
        timeout: Ticks,
        correction: Correct,
    ) -> Result<RecvResult> {
        self.check_ready("receive")?;
        let start = self.air.now();
        let deadline = (timeout != Ticks::MAX)
            .then(|| self.clock.real_at(self.clock.from_timescale(timeout, correction)));

        let mut receiver = self.receiver.lock().await;
        loop {
            receiver.drain(self.id);
            // Frames that reached the antenna before listening started are lost
            receiver.pending.retain(|f| f.arrival >= start);

            let now = self.air.now();
            let next = receiver.earliest(start, deadline);
            if let Some(index) = next {
                if receiver.pending[index].arrival <= now {
                    let frame = receiver.pending.swap_remove(index);
                    return Ok(self.deliver(frame, buffer, correction));
                }
            } else if deadline.map_or(false, |d| d <= now) {
                return Ok(RecvResult::timeout());
            }

            let wake = next.map(|i| receiver.pending[i].arrival).or(deadline);
            let heard = match wake {
                Some(real) => tokio::select! {
                    _ = sleep_until(self.air.instant(real)) => None,
                    frame = receiver.rx.recv() => Some(frame),
                },
                None => Some(receiver.rx.recv().await),
            };
            match heard {
                Some(Ok(frame)) => receiver.absorb(self.id, frame),
                Some(Err(RecvError::Lagged(skipped))) => trace!(skipped, "Simulated radio lagged"),
                Some(Err(RecvError::Closed)) => return Err(Error::transceiver("Air closed")),
                None => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{AirConfig, Oscillator};
    use crate::time::HardwareTimer;

    async fn powered(radio: &SimRadio) {
        radio.turn_on().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_frame_crosses_the_air() {
        let air = SimAir::new(AirConfig::default());
        let a = air.node(Oscillator::ideal());
        let b = air.node(Oscillator::new(7_000, 0));
        powered(&a.radio).await;
        powered(&b.radio).await;

        let send = a.radio.send_at(&[1, 2, 3], 5_000);
        let mut buffer = [0u8; 16];
        let recv = b.radio.recv(&mut buffer, 100_000, Correct::Uncorrected);
        let (sent, received) = tokio::join!(send, recv);
        sent.unwrap();
        let received = received.unwrap();

        assert_eq!(received.status, RecvStatus::Ok);
        assert_eq!(&buffer[..received.size], &[1, 2, 3]);
        assert_eq!(received.timestamp, 7_000 + 5_000 + 100);
        assert_eq!(b.clock.now(), received.timestamp);
        assert_eq!(a.radio.sent()[0].at, 5_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_and_late_frames() {
        let air = SimAir::new(AirConfig::default());
        let node = air.node(Oscillator::ideal());
        powered(&node.radio).await;

        air.inject(&[9; 7], 50);
        air.inject(&[8; 7], 5_000);
        let mut buffer = [0u8; 16];

        // Not listening yet when the first frame arrives
        node.clock.wait_until(100).await;

        let result = node.radio.recv(&mut buffer, 1_000, Correct::Uncorrected).await.unwrap();
        assert_eq!(result.status, RecvStatus::Timeout);
        assert_eq!(node.clock.now(), 1_000);

        let result = node.radio.recv(&mut buffer, 10_000, Correct::Uncorrected).await.unwrap();
        assert_eq!(result.timestamp, 5_000);
        assert_eq!(buffer[0], 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_earlier_frame_wins() {
        let air = SimAir::new(AirConfig::default());
        let node = air.node(Oscillator::ideal());
        powered(&node.radio).await;

        air.inject(&[2; 7], 900);
        air.inject(&[1; 7], 400);
        let mut buffer = [0u8; 16];
        let first = node.radio.recv(&mut buffer, 1_000, Correct::Uncorrected).await.unwrap();
        assert_eq!((first.timestamp, buffer[0]), (400, 1));
        let second = node.radio.recv(&mut buffer, 1_000, Correct::Uncorrected).await.unwrap();
        assert_eq!((second.timestamp, buffer[0]), (900, 2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_frame() {
        let air = SimAir::new(AirConfig::default());
        let node = air.node(Oscillator::ideal());
        powered(&node.radio).await;

        air.inject(&[0; 32], 200);
        let mut buffer = [0u8; 16];
        let result = node.radio.recv(&mut buffer, 1_000, Correct::Uncorrected).await.unwrap();
        assert_eq!(result.status, RecvStatus::TooLong);
        assert_eq!(result.size, 0);
        assert_eq!(node.clock.last_event_timestamp(Correct::Uncorrected), 200);
    }

    #[tokio::test(start_paused = true)]
    async fn test_crc_mismatch() {
        let air = SimAir::new(AirConfig::default());
        let tx = air.node(Oscillator::ideal());
        let rx = air.node(Oscillator::ideal());
        powered(&tx.radio).await;
        powered(&rx.radio).await;
        let raw = TransceiverConfig {
            frequency: 2450,
            tx_power: 0,
            crc: false,
            strict_timeout: false,
        };
        tx.radio.configure(raw).await.unwrap();

        let mut buffer = [0u8; 16];
        let send = tx.radio.send_at(&[0xff; 4], 10);
        let recv = rx.radio.recv(&mut buffer, 1_000, Correct::Uncorrected);
        let (_, result) = tokio::join!(send, recv);
        assert_eq!(result.unwrap().status, RecvStatus::CrcFail);

        rx.radio.configure(raw).await.unwrap();
        let send = tx.radio.send_at(&[0xff; 4], 2_000);
        let recv = rx.radio.recv(&mut buffer, 3_000, Correct::Uncorrected);
        let (_, result) = tokio::join!(send, recv);
        assert_eq!(result.unwrap().status, RecvStatus::Ok);
    }

    #[tokio::test(start_paused = true)]
    async fn test_faults_and_power() {
        let air = SimAir::new(AirConfig::default());
        let node = air.node(Oscillator::ideal());
        let mut buffer = [0u8; 16];

        let err = node.radio.recv(&mut buffer, 10, Correct::Uncorrected).await.unwrap_err();
        assert!(err.is_transceiver_fault());

        powered(&node.radio).await;
        node.radio.inject_faults(1);
        assert!(node.radio.send_at(&[0; 7], 100).await.is_err());
        node.radio.send_at(&[0; 7], 100).await.unwrap();
        assert!(node.radio.send_at(&[0; 7], 50).await.is_err());
    }
}
