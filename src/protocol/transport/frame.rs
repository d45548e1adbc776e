//! In-memory representations of bus traffic: the raw [`Frame`] as it crosses
//! the link (classical CAN or CAN-FD) and the reassembled [`Message`] that
//! every higher layer consumes.
use crate::protocol::transport::can_id::CanId;
use crate::protocol::{Address, BROADCAST_ADDRESS};

use alloc::vec::Vec;
use embedded_can::Frame as EmbeddedFrame;

/// Largest data field supported (CAN-FD).
pub const MAX_FRAME_DATA: usize = 64;

/// Raw frame as read from or written to the CAN link.
#[derive(Clone, Copy)]
pub struct Frame {
    /// Full 29-bit CAN identifier.
    pub id: CanId,
    /// Payload buffer; classical frames use at most the first 8 bytes.
    pub data: [u8; MAX_FRAME_DATA],
    /// Number of valid payload bytes.
    pub len: u8,
    /// Monotonic receive timestamp supplied by the link, in milliseconds.
    pub timestamp_ms: u64,
}

impl Frame {
    /// Build a frame from a payload slice; bytes beyond [`MAX_FRAME_DATA`]
    /// are truncated.
    pub fn new(id: CanId, payload: &[u8]) -> Self {
        let mut data = [0xFF; MAX_FRAME_DATA];
        let len = payload.len().min(MAX_FRAME_DATA);
        data[..len].copy_from_slice(&payload[..len]);
        Self {
            id,
            data,
            len: len as u8,
            timestamp_ms: 0,
        }
    }

    pub fn with_timestamp(mut self, timestamp_ms: u64) -> Self {
        self.timestamp_ms = timestamp_ms;
        self
    }

    /// Valid portion of the data field.
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    /// Whether the frame fits a classical (non-FD) bus.
    pub fn is_classical(&self) -> bool {
        self.len <= 8
    }

    /// Convert from any `embedded-can` frame implementation. Standard-ID and
    /// remote frames are not part of the protocol and yield `None`.
    pub fn from_embedded<F: EmbeddedFrame>(frame: &F) -> Option<Self> {
        match frame.id() {
            embedded_can::Id::Extended(id) if !frame.is_remote_frame() => {
                Some(Self::new(CanId::from(id), frame.data()))
            }
            _ => None,
        }
    }

    /// Convert into an `embedded-can` frame for a HAL driver. Fails for FD
    /// payloads a classical driver cannot carry.
    pub fn to_embedded<F: EmbeddedFrame>(&self) -> Option<F> {
        F::new(self.id.extended_id(), self.payload())
    }
}

impl core::fmt::Debug for Frame {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Frame")
            .field("id", &self.id)
            .field("data", &self.payload())
            .field("timestamp_ms", &self.timestamp_ms)
            .finish()
    }
}

/// Reassembled protocol message. Single-frame traffic maps one-to-one; TP and
/// ETP sessions produce one message for the whole transfer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub pgn: u32,
    pub source: Address,
    pub destination: Address,
    pub priority: u8,
    pub data: Vec<u8>,
    pub timestamp_ms: u64,
}

impl Message {
    pub fn new(pgn: u32, source: Address, destination: Address, data: Vec<u8>) -> Self {
        Self {
            pgn,
            source,
            destination,
            priority: crate::protocol::DEFAULT_PRIORITY,
            data,
            timestamp_ms: 0,
        }
    }

    /// Whether the message was (or will be) sent to the global address.
    pub fn is_broadcast(&self) -> bool {
        self.destination == BROADCAST_ADDRESS
    }

    /// Lift a single frame into a message.
    pub fn from_frame(frame: &Frame) -> Self {
        Self {
            pgn: frame.id.pgn(),
            source: frame.id.source_address(),
            destination: frame.id.destination(),
            priority: frame.id.priority(),
            data: frame.payload().to_vec(),
            timestamp_ms: frame.timestamp_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_is_truncated_to_fd_limit() {
        let id = CanId::builder(0xFEF5, 0x20).build().unwrap();
        let oversized = [0xAB; 80];
        let frame = Frame::new(id, &oversized);
        assert_eq!(frame.len as usize, MAX_FRAME_DATA);
        assert!(!frame.is_classical());
    }

    #[test]
    fn message_from_frame_copies_addressing() {
        let id = CanId::builder(0xEC00, 0x25)
            .destination(0x42)
            .priority(7)
            .build()
            .unwrap();
        let frame = Frame::new(id, &[1, 2, 3]).with_timestamp(77);

        let message = Message::from_frame(&frame);
        assert_eq!(message.pgn, 0xEC00);
        assert_eq!(message.source, 0x25);
        assert_eq!(message.destination, 0x42);
        assert_eq!(message.priority, 7);
        assert_eq!(message.data, &[1, 2, 3]);
        assert_eq!(message.timestamp_ms, 77);
        assert!(!message.is_broadcast());
    }
}
