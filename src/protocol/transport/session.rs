//! Transport session bookkeeping: one [`TransportSession`] per in-flight
//! multi-frame transfer, held in a fixed-capacity [`SessionTable`]. The table
//! never grows; exhaustion is reported so a flooding peer cannot exhaust
//! memory.
use crate::protocol::transport::BYTES_PER_PACKET;
use crate::protocol::{Address, BROADCAST_ADDRESS, DEFAULT_PRIORITY, NULL_ADDRESS};

use alloc::vec::Vec;

/// Default number of simultaneous sessions.
pub const DEFAULT_SESSION_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransportDirection {
    Transmit,
    Receive,
}

/// Connection-level state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionState {
    /// Sender waiting for the peer's CTS (T3/T4).
    WaitingForCts,
    /// Sender streaming the granted window (or a BAM broadcast).
    SendingData,
    /// Sender waiting for the end-of-message acknowledgement (T3).
    WaitingForEoma,
    /// Receiver waiting for the first data packet after CTS (T2).
    WaitingForData,
    /// Receiver consuming data packets (T1).
    ReceivingData,
    Complete,
    Aborted,
}

/// Whether the session runs classic TP or the extended protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionKind {
    Tp,
    Etp,
}

/// State of one multi-frame transfer.
///
/// Invariants: `bytes_transferred <= total_bytes` and the packet count is
/// always `ceil(total_bytes / 7)`.
#[derive(Debug, Clone)]
pub struct TransportSession {
    pub direction: TransportDirection,
    pub state: SessionState,
    pub kind: SessionKind,
    pub pgn: u32,
    /// Full payload: outbound data for transmit sessions, the reassembly
    /// buffer for receive sessions.
    pub data: Vec<u8>,
    pub total_bytes: u32,
    pub bytes_transferred: u32,
    pub source_address: Address,
    pub destination_address: Address,
    pub port: u8,
    pub priority: u8,
    /// Last data-packet sequence number seen or sent (1-based).
    pub last_sequence: u32,
    /// Packets remaining in the granted window.
    pub packets_to_send: u8,
    /// Absolute number (1-based) of the next packet to transmit.
    pub next_packet: u32,
    /// Start of the currently granted window (1-based packet number).
    pub cts_window_start: u32,
    pub cts_window_size: u8,
    /// ETP data-packet offset announced by the last DPO.
    pub dpo_packet_offset: u32,
    /// Window size the peer asked us to respect (RTS byte 4).
    pub max_packets_per_cts: u8,
    /// The receiver parked us with CTS(0); Th supervises the wait.
    pub cts_hold: bool,
    /// Time since the last state-relevant event, for T1-T4/Th supervision.
    pub timer_ms: u32,
    /// Gap accumulator for paced broadcast packets.
    pub hold_ms: u32,
}

impl TransportSession {
    pub fn new(direction: TransportDirection) -> Self {
        Self {
            direction,
            state: SessionState::WaitingForCts,
            kind: SessionKind::Tp,
            pgn: 0,
            data: Vec::new(),
            total_bytes: 0,
            bytes_transferred: 0,
            source_address: NULL_ADDRESS,
            destination_address: BROADCAST_ADDRESS,
            port: 0,
            priority: DEFAULT_PRIORITY,
            last_sequence: 0,
            packets_to_send: 0,
            next_packet: 1,
            cts_window_start: 1,
            cts_window_size: 0,
            dpo_packet_offset: 0,
            max_packets_per_cts: 0xFF,
            cts_hold: false,
            timer_ms: 0,
            hold_ms: 0,
        }
    }

    /// Completed fraction of the transfer, 0.0 to 1.0.
    pub fn progress(&self) -> f32 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.bytes_transferred as f32 / self.total_bytes as f32
    }

    /// Total number of 7-byte data packets the payload occupies.
    pub fn total_packets(&self) -> u32 {
        self.total_bytes.div_ceil(BYTES_PER_PACKET as u32)
    }

    pub fn is_broadcast(&self) -> bool {
        self.destination_address == BROADCAST_ADDRESS
    }

    pub fn is_complete(&self) -> bool {
        self.state == SessionState::Complete
    }

    /// The peer address frames travel to (transmit) or come from (receive).
    pub fn peer_address(&self) -> Address {
        match self.direction {
            TransportDirection::Transmit => self.destination_address,
            TransportDirection::Receive => self.source_address,
        }
    }
}

/// Fixed pool of session slots; the slot index is the session handle.
pub struct SessionTable {
    slots: Vec<Option<TransportSession>>,
    /// Indices of unused slots.
    free: Vec<usize>,
}

impl SessionTable {
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        let free = (0..capacity).rev().collect();
        Self { slots, free }
    }

    /// Claim a free slot for `session`. Returns the handle, or `None` when
    /// the table is exhausted.
    pub fn allocate(&mut self, session: TransportSession) -> Option<usize> {
        let index = self.free.pop()?;
        self.slots[index] = Some(session);
        Some(index)
    }

    /// Destroy the session in `index` and return its slot to the free list.
    pub fn release(&mut self, index: usize) -> Option<TransportSession> {
        let session = self.slots.get_mut(index)?.take()?;
        self.free.push(index);
        Some(session)
    }

    pub fn get(&self, index: usize) -> Option<&TransportSession> {
        self.slots.get(index)?.as_ref()
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut TransportSession> {
        self.slots.get_mut(index)?.as_mut()
    }

    /// Locate a session by its identity tuple.
    pub fn find(
        &self,
        direction: TransportDirection,
        source: Address,
        destination: Address,
        pgn: u32,
    ) -> Option<usize> {
        self.slots.iter().position(|slot| {
            slot.as_ref().is_some_and(|session| {
                session.direction == direction
                    && session.source_address == source
                    && session.destination_address == destination
                    && session.pgn == pgn
            })
        })
    }

    /// Locate the receive session fed by `source` on `port`, regardless of
    /// PGN; data-transfer frames do not carry the parameter group.
    pub fn find_receive_from(&self, port: u8, source: Address, destination: Address) -> Option<usize> {
        self.slots.iter().position(|slot| {
            slot.as_ref().is_some_and(|session| {
                session.direction == TransportDirection::Receive
                    && session.port == port
                    && session.source_address == source
                    && session.destination_address == destination
            })
        })
    }

    pub fn active_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|_| index))
    }

    pub fn active_count(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
