use bytes::{Buf, BufMut, BytesMut};

use crate::core::{Error, Hop, Result};

/// Frame control byte: data frame with PAN ID compression
pub const FRAME_TYPE: u8 = 0x46;

/// Addressing mode byte: short destination address, no source
pub const ADDRESSING_MODE: u8 = 0x08;

/// Broadcast short address
pub const BROADCAST_ADDRESS: u16 = 0xffff;

/// Size of a sync packet on the wire
pub const SYNC_PACKET_SIZE: usize = 7;

/// Flooded synchronization packet
///
/// `46 08 hop pan_hi pan_lo ff ff`. The same layout carries ranging requests,
/// with the hop field holding the requester's hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncPacket {
    /// Hop of the node that transmitted this copy
    pub hop: Hop,
    /// Network identifier
    pub pan_id: u16,
}

impl SyncPacket {
    /// Creates a packet as sent by a node at `hop`
    pub fn new(hop: Hop, pan_id: u16) -> Self {
        SyncPacket { hop, pan_id }
    }

    /// The packet as relayed by a node at `hop`
    pub fn relayed_by(self, hop: Hop) -> Self {
        SyncPacket { hop, ..self }
    }

    /// Encodes into the 7-byte wire format
    pub fn encode(&self) -> [u8; SYNC_PACKET_SIZE] {
        let mut buf = BytesMut::with_capacity(SYNC_PACKET_SIZE);
        buf.put_u8(FRAME_TYPE);
        buf.put_u8(ADDRESSING_MODE);
        buf.put_u8(self.hop.level());
        buf.put_u16(self.pan_id);
        buf.put_u16(BROADCAST_ADDRESS);

        let mut frame = [0u8; SYNC_PACKET_SIZE];
        frame.copy_from_slice(&buf);
        frame
    }

    /// Decodes a frame, rejecting anything that is not a broadcast sync packet
    pub fn decode(frame: &[u8]) -> Result<Self> {
        if frame.len() != SYNC_PACKET_SIZE {
            return Err(Error::protocol(format!(
                "Sync packet must be {} bytes, got {}",
                SYNC_PACKET_SIZE,
                frame.len()
            )));
        }
        let mut buf = frame;
        if buf.get_u8() != FRAME_TYPE || buf.get_u8() != ADDRESSING_MODE {
            return Err(Error::protocol("Not a sync frame"));
        }
        let hop = Hop(buf.get_u8());
        let pan_id = buf.get_u16();
        if buf.get_u16() != BROADCAST_ADDRESS {
            return Err(Error::protocol("Sync frame is not broadcast"));
        }
        Ok(SyncPacket { hop, pan_id })
    }

    /// Decodes a frame and accepts it only for network `pan_id` and, when
    /// given, for sender hop `expected_hop`
    pub fn accept(frame: &[u8], pan_id: u16, expected_hop: Option<Hop>) -> Option<Self> {
        let packet = Self::decode(frame).ok()?;
        if packet.pan_id != pan_id {
            return None;
        }
        match expected_hop {
            Some(hop) if packet.hop != hop => None,
            _ => Some(packet),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_layout() {
        let packet = SyncPacket::new(Hop(3), 0x1234);
        assert_eq!(packet.encode(), [0x46, 0x08, 0x03, 0x12, 0x34, 0xff, 0xff]);
        assert_eq!(SyncPacket::decode(&packet.encode()).unwrap(), packet);
    }

    #[test]
    fn test_relay_rewrites_hop_only() {
        let root = SyncPacket::new(Hop::root(), 0xbeef);
        let relayed = root.relayed_by(Hop(1));
        assert_eq!(relayed.hop, Hop(1));
        assert_eq!(relayed.pan_id, 0xbeef);
    }

    #[test]
    fn test_header_mismatches_are_rejected() {
        let good = SyncPacket::new(Hop(0), 0x1234).encode();
        for index in [0usize, 1, 5, 6] {
            let mut frame = good;
            frame[index] ^= 0x01;
            assert!(SyncPacket::decode(&frame).is_err(), "byte {}", index);
        }
        assert!(SyncPacket::decode(&good[..6]).is_err());
    }

    #[test]
    fn test_accept_filters_pan_and_hop() {
        let frame = SyncPacket::new(Hop(1), 0x1234).encode();
        assert!(SyncPacket::accept(&frame, 0x1234, Some(Hop(1))).is_some());
        assert!(SyncPacket::accept(&frame, 0x1234, None).is_some());
        assert!(SyncPacket::accept(&frame, 0x1234, Some(Hop(0))).is_none());
        assert!(SyncPacket::accept(&frame, 0x4321, None).is_none());
    }
}
