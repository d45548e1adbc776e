//! Multi-frame transport engine implementing J1939-21 TP (BAM and
//! connection-mode) and the extended protocol ETP over one shared session
//! table. The engine is pure protocol logic: callers feed it frames and
//! elapsed time, and it pushes outbound frames and consumer events into the
//! buffers it is handed.
use crate::error::{AbortReason, TransportError};
use crate::protocol::transport::can_id::CanId;
use crate::protocol::transport::cm::{EtpControl, TpControl};
use crate::protocol::transport::frame::{Frame, Message};
use crate::protocol::transport::session::{
    SessionKind, SessionState, SessionTable, TransportDirection, TransportSession,
};
use crate::protocol::transport::{
    BAM_PACKET_GAP_MS, BYTES_PER_PACKET, MAX_ETP_PAYLOAD, MAX_TP_PAYLOAD, T1_INTER_PACKET_MS,
    T2_CTS_TO_DATA_MS, T3_RESPONSE_MS, T4_HOLD_CTS_MS, TH_WINDOW_HOLD_MS,
};
use crate::protocol::{
    Address, BROADCAST_ADDRESS, PGN_ETP_CM, PGN_ETP_DT, PGN_TP_CM, PGN_TP_DT,
};

use alloc::vec;
use alloc::vec::Vec;

/// Transport frames carry the lowest priority.
const TRANSPORT_PRIORITY: u8 = 7;

/// Consumer-visible outcome of transport activity.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A multi-frame message finished reassembly.
    MessageReceived(Message),
    /// An outbound transfer was fully acknowledged (or, for BAM, fully sent).
    SendComplete {
        port: u8,
        pgn: u32,
        destination: Address,
    },
    /// An outbound transfer died before completion.
    SendFailed {
        port: u8,
        pgn: u32,
        destination: Address,
        reason: AbortReason,
    },
    /// An inbound transfer died before completion. No partial payload is
    /// ever delivered.
    ReceiveFailed {
        port: u8,
        pgn: u32,
        source: Address,
        reason: AbortReason,
    },
}

/// TP/ETP engine over a fixed-size session table.
pub struct TransportProtocol {
    table: SessionTable,
}

impl TransportProtocol {
    pub fn new(session_capacity: usize) -> Self {
        Self {
            table: SessionTable::new(session_capacity),
        }
    }

    /// Whether `pgn` belongs to the transport layer and must be routed here.
    pub fn owns_pgn(pgn: u32) -> bool {
        matches!(pgn, PGN_TP_CM | PGN_TP_DT | PGN_ETP_CM | PGN_ETP_DT)
    }

    pub fn active_sessions(&self) -> usize {
        self.table.active_count()
    }

    /// Open an outbound transfer. Payloads up to 1785 bytes travel over TP
    /// (BAM when `destination` is the global address, connection mode
    /// otherwise); larger payloads require ETP, which cannot broadcast.
    #[allow(clippy::too_many_arguments)]
    pub fn open_send(
        &mut self,
        port: u8,
        pgn: u32,
        data: Vec<u8>,
        source: Address,
        destination: Address,
        priority: u8,
        out: &mut Vec<Frame>,
    ) -> Result<(), TransportError> {
        let total = data.len() as u32;
        if total <= crate::protocol::transport::MAX_SINGLE_FRAME_PAYLOAD as u32 {
            return Err(TransportError::PayloadSize { bytes: total });
        }
        let kind = if total <= MAX_TP_PAYLOAD {
            SessionKind::Tp
        } else if total <= MAX_ETP_PAYLOAD {
            SessionKind::Etp
        } else {
            return Err(TransportError::PayloadSize { bytes: total });
        };
        if kind == SessionKind::Etp && destination == BROADCAST_ADDRESS {
            return Err(TransportError::PayloadSize { bytes: total });
        }
        if self
            .table
            .find(TransportDirection::Transmit, source, destination, pgn)
            .is_some()
        {
            return Err(TransportError::AlreadyInSession);
        }

        let mut session = TransportSession::new(TransportDirection::Transmit);
        session.kind = kind;
        session.pgn = pgn;
        session.total_bytes = total;
        session.data = data;
        session.source_address = source;
        session.destination_address = destination;
        session.port = port;
        session.priority = priority;

        if destination == BROADCAST_ADDRESS {
            // BAM: announce, then pace the data packets from update().
            session.state = SessionState::SendingData;
            let announce = TpControl::Bam {
                total_size: total as u16,
                total_packets: session.total_packets() as u8,
                pgn,
            };
            let frame = control_frame(&session, announce.encode());
            self.table
                .allocate(session)
                .ok_or(TransportError::SessionLimit)?;
            out.push(frame);
        } else {
            session.state = SessionState::WaitingForCts;
            let request = match kind {
                SessionKind::Tp => TpControl::Rts {
                    total_size: total as u16,
                    total_packets: session.total_packets() as u8,
                    max_packets_per_cts: 0xFF,
                    pgn,
                }
                .encode(),
                SessionKind::Etp => EtpControl::Rts {
                    total_size: total,
                    pgn,
                }
                .encode(),
            };
            let frame = control_frame(&session, request);
            self.table
                .allocate(session)
                .ok_or(TransportError::SessionLimit)?;
            out.push(frame);
        }
        Ok(())
    }

    /// Abort every session touching `address` on `port` (the owning control
    /// function is going away). Cancellation is immediate.
    pub fn cancel_for_address(
        &mut self,
        port: u8,
        address: Address,
        out: &mut Vec<Frame>,
        events: &mut Vec<TransportEvent>,
    ) {
        let doomed: Vec<usize> = self
            .table
            .active_indices()
            .filter(|&index| {
                self.table.get(index).is_some_and(|session| {
                    session.port == port
                        && (session.source_address == address
                            || session.destination_address == address)
                })
            })
            .collect();
        for index in doomed {
            self.abort_session(index, AbortReason::None, out, events);
        }
    }

    /// Route a transport-layer frame into the session machinery. The caller
    /// has already established that the frame's PGN belongs to the engine and
    /// that the destination is local (or broadcast).
    pub fn handle_frame(
        &mut self,
        port: u8,
        frame: &Frame,
        out: &mut Vec<Frame>,
        events: &mut Vec<TransportEvent>,
    ) {
        match frame.id.pgn() {
            PGN_TP_CM => match TpControl::decode(frame.payload()) {
                Ok(control) => self.handle_tp_control(port, frame, control, out, events),
                Err(_) => log::debug!("transport: malformed TP.CM from {:#04x}", frame.id.source_address()),
            },
            PGN_ETP_CM => match EtpControl::decode(frame.payload()) {
                Ok(control) => self.handle_etp_control(port, frame, control, out, events),
                Err(_) => log::debug!("transport: malformed ETP.CM from {:#04x}", frame.id.source_address()),
            },
            PGN_TP_DT | PGN_ETP_DT => self.handle_data(port, frame, out, events),
            _ => {}
        }
    }

    /// Advance every session timer; violated timers abort their session.
    pub fn update(&mut self, dt_ms: u32, out: &mut Vec<Frame>, events: &mut Vec<TransportEvent>) {
        let indices: Vec<usize> = self.table.active_indices().collect();
        for index in indices {
            let Some(session) = self.table.get_mut(index) else {
                continue;
            };

            // Paced broadcast streaming does not run a supervision timer;
            // the sender is the only active party.
            if session.direction == TransportDirection::Transmit
                && session.is_broadcast()
                && session.state == SessionState::SendingData
            {
                session.hold_ms += dt_ms;
                let mut finished = false;
                let mut burst = Vec::new();
                while session.hold_ms >= BAM_PACKET_GAP_MS && !finished {
                    session.hold_ms -= BAM_PACKET_GAP_MS;
                    burst.push(data_frame(session, session.next_packet));
                    session.next_packet += 1;
                    session.bytes_transferred = (session.next_packet - 1)
                        .saturating_mul(BYTES_PER_PACKET as u32)
                        .min(session.total_bytes);
                    finished = session.next_packet > session.total_packets();
                }
                out.append(&mut burst);
                if finished {
                    let (port, pgn, destination) =
                        (session.port, session.pgn, session.destination_address);
                    self.table.release(index);
                    events.push(TransportEvent::SendComplete {
                        port,
                        pgn,
                        destination,
                    });
                }
                continue;
            }

            session.timer_ms += dt_ms;
            let limit = match (session.direction, session.state) {
                (TransportDirection::Transmit, SessionState::WaitingForCts) => {
                    if session.cts_hold {
                        // The receiver parked us with CTS(0); the hold must
                        // be refreshed within Th.
                        TH_WINDOW_HOLD_MS
                    } else if session.next_packet == 1 {
                        T3_RESPONSE_MS
                    } else {
                        T4_HOLD_CTS_MS
                    }
                }
                (TransportDirection::Transmit, SessionState::WaitingForEoma) => T3_RESPONSE_MS,
                (TransportDirection::Receive, SessionState::WaitingForData) => T2_CTS_TO_DATA_MS,
                (TransportDirection::Receive, SessionState::ReceivingData) => T1_INTER_PACKET_MS,
                _ => u32::MAX,
            };
            if session.timer_ms >= limit {
                self.abort_session(index, AbortReason::Timeout, out, events);
            }
        }
    }

    fn handle_tp_control(
        &mut self,
        port: u8,
        frame: &Frame,
        control: TpControl,
        out: &mut Vec<Frame>,
        events: &mut Vec<TransportEvent>,
    ) {
        let from = frame.id.source_address();
        let to = frame.id.destination();
        match control {
            TpControl::Bam {
                total_size,
                total_packets,
                pgn,
            } => {
                if u32::from(total_packets) != u32::from(total_size).div_ceil(7) {
                    log::debug!("transport: inconsistent BAM from {from:#04x}");
                    return;
                }
                self.open_receive(
                    port,
                    SessionKind::Tp,
                    pgn,
                    u32::from(total_size),
                    from,
                    BROADCAST_ADDRESS,
                    frame.id.priority(),
                    out,
                    events,
                );
            }
            TpControl::Rts {
                total_size,
                max_packets_per_cts,
                pgn,
                ..
            } => {
                if !(9..=MAX_TP_PAYLOAD).contains(&u32::from(total_size)) {
                    out.push(abort_frame(
                        SessionKind::Tp,
                        pgn,
                        AbortReason::UnexpectedDataSize,
                        to,
                        from,
                    ));
                    return;
                }
                if let Some(index) = self.open_receive(
                    port,
                    SessionKind::Tp,
                    pgn,
                    u32::from(total_size),
                    from,
                    to,
                    frame.id.priority(),
                    out,
                    events,
                ) {
                    if let Some(session) = self.table.get_mut(index) {
                        session.max_packets_per_cts = max_packets_per_cts;
                        send_cts(session, out);
                    }
                }
            }
            TpControl::Cts {
                packet_count,
                next_packet,
                pgn,
            } => {
                self.handle_cts(port, from, to, pgn, packet_count, u32::from(next_packet), out, events)
            }
            TpControl::Eoma { pgn, .. } => self.handle_eoma(port, from, to, pgn, events),
            TpControl::Abort { reason, pgn } => {
                self.handle_peer_abort(port, from, to, pgn, reason, events)
            }
        }
    }

    fn handle_etp_control(
        &mut self,
        port: u8,
        frame: &Frame,
        control: EtpControl,
        out: &mut Vec<Frame>,
        events: &mut Vec<TransportEvent>,
    ) {
        let from = frame.id.source_address();
        let to = frame.id.destination();
        match control {
            EtpControl::Rts { total_size, pgn } => {
                if !((MAX_TP_PAYLOAD + 1)..=MAX_ETP_PAYLOAD).contains(&total_size) {
                    out.push(abort_frame(
                        SessionKind::Etp,
                        pgn,
                        AbortReason::UnexpectedDataSize,
                        to,
                        from,
                    ));
                    return;
                }
                if let Some(index) = self.open_receive(
                    port,
                    SessionKind::Etp,
                    pgn,
                    total_size,
                    from,
                    to,
                    frame.id.priority(),
                    out,
                    events,
                ) {
                    if let Some(session) = self.table.get_mut(index) {
                        send_cts(session, out);
                    }
                }
            }
            EtpControl::Cts {
                packet_count,
                next_packet,
                pgn,
            } => self.handle_cts(port, from, to, pgn, packet_count, next_packet, out, events),
            EtpControl::Dpo {
                packet_count,
                packet_offset,
                pgn,
            } => {
                if let Some(index) = self.table.find(TransportDirection::Receive, from, to, pgn) {
                    if let Some(session) = self.table.get_mut(index) {
                        session.dpo_packet_offset = packet_offset;
                        session.cts_window_size = packet_count;
                        session.timer_ms = 0;
                    }
                }
            }
            EtpControl::Eoma { pgn, .. } => self.handle_eoma(port, from, to, pgn, events),
            EtpControl::Abort { reason, pgn } => {
                self.handle_peer_abort(port, from, to, pgn, reason, events)
            }
        }
    }

    /// Create a receive session, aborting on identity conflicts or a full
    /// table. Returns the new session handle.
    #[allow(clippy::too_many_arguments)]
    fn open_receive(
        &mut self,
        port: u8,
        kind: SessionKind,
        pgn: u32,
        total_size: u32,
        source: Address,
        destination: Address,
        priority: u8,
        out: &mut Vec<Frame>,
        events: &mut Vec<TransportEvent>,
    ) -> Option<usize> {
        if self.table.find_receive_from(port, source, destination).is_some() {
            if destination != BROADCAST_ADDRESS {
                out.push(abort_frame(
                    kind,
                    pgn,
                    AbortReason::AlreadyInSession,
                    destination,
                    source,
                ));
            }
            events.push(TransportEvent::ReceiveFailed {
                port,
                pgn,
                source,
                reason: AbortReason::AlreadyInSession,
            });
            return None;
        }

        let mut session = TransportSession::new(TransportDirection::Receive);
        session.kind = kind;
        session.pgn = pgn;
        session.total_bytes = total_size;
        session.data = vec![0; total_size as usize];
        session.source_address = source;
        session.destination_address = destination;
        session.port = port;
        session.priority = priority;
        session.state = if destination == BROADCAST_ADDRESS {
            SessionState::ReceivingData
        } else {
            SessionState::WaitingForData
        };

        match self.table.allocate(session) {
            Some(index) => Some(index),
            None => {
                if destination != BROADCAST_ADDRESS {
                    out.push(abort_frame(
                        kind,
                        pgn,
                        AbortReason::ResourcesUnavailable,
                        destination,
                        source,
                    ));
                }
                events.push(TransportEvent::ReceiveFailed {
                    port,
                    pgn,
                    source,
                    reason: AbortReason::ResourcesUnavailable,
                });
                None
            }
        }
    }

    /// CTS arrived for one of our transmit sessions: stream the granted
    /// window synchronously.
    #[allow(clippy::too_many_arguments)]
    fn handle_cts(
        &mut self,
        port: u8,
        from: Address,
        to: Address,
        pgn: u32,
        packet_count: u8,
        next_packet: u32,
        out: &mut Vec<Frame>,
        events: &mut Vec<TransportEvent>,
    ) {
        // The CTS travels from the receiver back to us, so the session
        // identity is mirrored.
        let Some(index) = self.table.find(TransportDirection::Transmit, to, from, pgn) else {
            return;
        };
        let (session_port, state, total_packets) = match self.table.get(index) {
            Some(session) => (session.port, session.state, session.total_packets()),
            None => return,
        };
        if session_port != port || state != SessionState::WaitingForCts {
            return;
        }
        if packet_count == 0 {
            // Hold request: the peer keeps the connection open. It must
            // repeat the hold (or grant a window) within Th.
            if let Some(session) = self.table.get_mut(index) {
                session.cts_hold = true;
                session.timer_ms = 0;
            }
            return;
        }
        if next_packet == 0 || next_packet > total_packets {
            self.abort_session(index, AbortReason::BadSequence, out, events);
            return;
        }
        let Some(session) = self.table.get_mut(index) else {
            return;
        };
        session.cts_hold = false;
        session.timer_ms = 0;

        session.next_packet = next_packet;
        session.packets_to_send = packet_count;
        if session.kind == SessionKind::Etp {
            session.dpo_packet_offset = next_packet - 1;
            out.push(control_frame(
                session,
                EtpControl::Dpo {
                    packet_count,
                    packet_offset: session.dpo_packet_offset,
                    pgn,
                }
                .encode(),
            ));
        }
        let window_end = (next_packet + u32::from(packet_count) - 1).min(session.total_packets());
        while session.next_packet <= window_end {
            out.push(data_frame(session, session.next_packet));
            session.next_packet += 1;
        }
        session.bytes_transferred = ((session.next_packet - 1)
            * BYTES_PER_PACKET as u32)
            .min(session.total_bytes);
        session.state = if session.next_packet > session.total_packets() {
            SessionState::WaitingForEoma
        } else {
            SessionState::WaitingForCts
        };
        session.timer_ms = 0;
    }

    fn handle_eoma(
        &mut self,
        port: u8,
        from: Address,
        to: Address,
        pgn: u32,
        events: &mut Vec<TransportEvent>,
    ) {
        let Some(index) = self.table.find(TransportDirection::Transmit, to, from, pgn) else {
            return;
        };
        let Some(session) = self.table.get(index) else {
            return;
        };
        if session.port != port {
            return;
        }
        let destination = session.destination_address;
        self.table.release(index);
        events.push(TransportEvent::SendComplete {
            port,
            pgn,
            destination,
        });
    }

    fn handle_peer_abort(
        &mut self,
        port: u8,
        from: Address,
        to: Address,
        pgn: u32,
        reason: AbortReason,
        events: &mut Vec<TransportEvent>,
    ) {
        // The abort may target either direction; try both identities.
        let index = self
            .table
            .find(TransportDirection::Transmit, to, from, pgn)
            .or_else(|| self.table.find(TransportDirection::Receive, from, to, pgn));
        let Some(index) = index else { return };
        let Some(session) = self.table.get(index) else {
            return;
        };
        if session.port != port {
            return;
        }
        log::debug!(
            "transport: peer {from:#04x} aborted pgn {pgn:#07x} ({reason:?})"
        );
        let event = match session.direction {
            TransportDirection::Transmit => TransportEvent::SendFailed {
                port,
                pgn,
                destination: session.destination_address,
                reason,
            },
            TransportDirection::Receive => TransportEvent::ReceiveFailed {
                port,
                pgn,
                source: session.source_address,
                reason,
            },
        };
        self.table.release(index);
        events.push(event);
    }

    /// A TP.DT / ETP.DT frame: feed the matching receive session.
    fn handle_data(
        &mut self,
        port: u8,
        frame: &Frame,
        out: &mut Vec<Frame>,
        events: &mut Vec<TransportEvent>,
    ) {
        let from = frame.id.source_address();
        let to = frame.id.destination();
        let Some(index) = self.table.find_receive_from(port, from, to) else {
            return;
        };
        let payload = frame.payload();
        if payload.is_empty() {
            return;
        }
        let (kind, dpo_offset, last_sequence) = match self.table.get(index) {
            Some(session) => (session.kind, session.dpo_packet_offset, session.last_sequence),
            None => return,
        };

        let sequence = match kind {
            SessionKind::Tp => u32::from(payload[0]),
            SessionKind::Etp => dpo_offset + u32::from(payload[0]),
        };
        if sequence == last_sequence {
            self.abort_session(index, AbortReason::DuplicateSequence, out, events);
            return;
        }
        if sequence != last_sequence + 1 {
            self.abort_session(index, AbortReason::BadSequence, out, events);
            return;
        }

        let Some(session) = self.table.get_mut(index) else {
            return;
        };
        session.state = SessionState::ReceivingData;
        session.timer_ms = 0;
        session.last_sequence = sequence;
        let offset = (sequence - 1) as usize * BYTES_PER_PACKET;
        let remaining = session.total_bytes as usize - offset;
        let copy_len = remaining.min(BYTES_PER_PACKET).min(payload.len() - 1);
        session.data[offset..offset + copy_len].copy_from_slice(&payload[1..1 + copy_len]);
        session.bytes_transferred = (offset + copy_len) as u32;

        if sequence == session.total_packets() {
            self.finish_receive(index, out, events);
            return;
        }

        // Connection mode: grant the next window once this one is consumed.
        if !session.is_broadcast() {
            let window_end =
                session.cts_window_start + u32::from(session.cts_window_size) - 1;
            if sequence >= window_end {
                session.cts_window_start = sequence + 1;
                session.state = SessionState::WaitingForData;
                send_cts(session, out);
            }
        }
    }

    /// Completed reassembly: acknowledge (connection mode) and deliver.
    fn finish_receive(
        &mut self,
        index: usize,
        out: &mut Vec<Frame>,
        events: &mut Vec<TransportEvent>,
    ) {
        let Some(session) = self.table.get_mut(index) else {
            return;
        };
        if !session.is_broadcast() {
            let acknowledgement = match session.kind {
                SessionKind::Tp => TpControl::Eoma {
                    total_size: session.total_bytes as u16,
                    total_packets: session.total_packets() as u8,
                    pgn: session.pgn,
                }
                .encode(),
                SessionKind::Etp => EtpControl::Eoma {
                    total_size: session.total_bytes,
                    pgn: session.pgn,
                }
                .encode(),
            };
            out.push(reply_frame(session, acknowledgement));
        }
        session.state = SessionState::Complete;
        let message = Message {
            pgn: session.pgn,
            source: session.source_address,
            destination: session.destination_address,
            priority: session.priority,
            data: core::mem::take(&mut session.data),
            timestamp_ms: 0,
        };
        self.table.release(index);
        events.push(TransportEvent::MessageReceived(message));
    }

    /// Tear a session down, notify the peer (when addressable) and the
    /// consumer.
    fn abort_session(
        &mut self,
        index: usize,
        reason: AbortReason,
        out: &mut Vec<Frame>,
        events: &mut Vec<TransportEvent>,
    ) {
        let Some(session) = self.table.get(index) else {
            return;
        };
        let (port, pgn) = (session.port, session.pgn);
        if !session.is_broadcast() {
            let (from, to) = match session.direction {
                TransportDirection::Transmit => {
                    (session.source_address, session.destination_address)
                }
                TransportDirection::Receive => {
                    (session.destination_address, session.source_address)
                }
            };
            out.push(abort_frame(session.kind, pgn, reason, from, to));
        }
        let event = match session.direction {
            TransportDirection::Transmit => TransportEvent::SendFailed {
                port,
                pgn,
                destination: session.destination_address,
                reason,
            },
            TransportDirection::Receive => TransportEvent::ReceiveFailed {
                port,
                pgn,
                source: session.source_address,
                reason,
            },
        };
        self.table.release(index);
        events.push(event);
    }
}

/// Build a connection-management frame travelling in the session's forward
/// direction (transmit sessions speak as the source).
fn control_frame(session: &TransportSession, payload: [u8; 8]) -> Frame {
    let pgn = match session.kind {
        SessionKind::Tp => PGN_TP_CM,
        SessionKind::Etp => PGN_ETP_CM,
    };
    let id = CanId::builder(pgn, session.source_address)
        .destination(session.destination_address)
        .priority(TRANSPORT_PRIORITY)
        .build()
        .expect("transport CM identifiers are always well-formed");
    Frame::new(id, &payload)
}

/// Build a connection-management frame travelling back to the originator
/// (receive sessions speak as the destination).
fn reply_frame(session: &TransportSession, payload: [u8; 8]) -> Frame {
    let pgn = match session.kind {
        SessionKind::Tp => PGN_TP_CM,
        SessionKind::Etp => PGN_ETP_CM,
    };
    let id = CanId::builder(pgn, session.destination_address)
        .destination(session.source_address)
        .priority(TRANSPORT_PRIORITY)
        .build()
        .expect("transport CM identifiers are always well-formed");
    Frame::new(id, &payload)
}

/// Free-standing abort frame from `from` to `to`.
fn abort_frame(
    kind: SessionKind,
    pgn: u32,
    reason: AbortReason,
    from: Address,
    to: Address,
) -> Frame {
    let control_pgn = match kind {
        SessionKind::Tp => PGN_TP_CM,
        SessionKind::Etp => PGN_ETP_CM,
    };
    let payload = match kind {
        SessionKind::Tp => TpControl::Abort { reason, pgn }.encode(),
        SessionKind::Etp => EtpControl::Abort { reason, pgn }.encode(),
    };
    let id = CanId::builder(control_pgn, from)
        .destination(to)
        .priority(TRANSPORT_PRIORITY)
        .build()
        .expect("transport CM identifiers are always well-formed");
    Frame::new(id, &payload)
}

/// Build the data-transfer frame for the absolute packet `number` (1-based).
fn data_frame(session: &TransportSession, number: u32) -> Frame {
    let pgn = match session.kind {
        SessionKind::Tp => PGN_TP_DT,
        SessionKind::Etp => PGN_ETP_DT,
    };
    let sequence = match session.kind {
        SessionKind::Tp => (number & 0xFF) as u8,
        SessionKind::Etp => (number - session.dpo_packet_offset) as u8,
    };
    let offset = (number - 1) as usize * BYTES_PER_PACKET;
    let available = (session.total_bytes as usize - offset).min(BYTES_PER_PACKET);

    let mut payload = [0xFF; 8];
    payload[0] = sequence;
    payload[1..1 + available].copy_from_slice(&session.data[offset..offset + available]);

    let id = CanId::builder(pgn, session.source_address)
        .destination(session.destination_address)
        .priority(TRANSPORT_PRIORITY)
        .build()
        .expect("transport DT identifiers are always well-formed");
    Frame::new(id, &payload)
}

/// Grant the next window from a receive session.
fn send_cts(session: &mut TransportSession, out: &mut Vec<Frame>) {
    let remaining = session.total_packets() - (session.cts_window_start - 1);
    let grant = remaining
        .min(u32::from(session.max_packets_per_cts))
        .min(255) as u8;
    session.cts_window_size = grant;
    session.state = SessionState::WaitingForData;
    session.timer_ms = 0;
    let payload = match session.kind {
        SessionKind::Tp => TpControl::Cts {
            packet_count: grant,
            next_packet: session.cts_window_start as u8,
            pgn: session.pgn,
        }
        .encode(),
        SessionKind::Etp => EtpControl::Cts {
            packet_count: grant,
            next_packet: session.cts_window_start,
            pgn: session.pgn,
        }
        .encode(),
    };
    out.push(reply_frame(session, payload));
}

#[cfg(test)]
#[path = "tp_tests.rs"]
mod tests;
