//! The network manager: glue between link endpoints, the control-function
//! registry, the transport engine, diagnostics, and application dispatch.
//! One instance drives one node; the host pumps it with `update(dt_ms)` and
//! every callback runs on that stack. The manager is single-threaded
//! cooperative and offers no synchronization of its own.
use crate::error::NetworkError;
use crate::infra::bus_load::BusLoad;
use crate::infra::event::Event;
use crate::infra::scheduler::{ProcessingFlags, Scheduler};
use crate::protocol::diagnostic::DiagnosticProtocol;
use crate::protocol::management::address_claim::{claim_frame, cannot_claim_frame, ClaimState};
use crate::protocol::management::name::{Name, NameFilter};
use crate::protocol::management::registry::{
    CfState, InternalCfHandle, PartnerHandle, Registry,
};
use crate::protocol::transport::can_id::CanId;
use crate::protocol::transport::frame::{Frame, Message};
use crate::protocol::transport::link::CanLink;
use crate::protocol::transport::session::DEFAULT_SESSION_CAPACITY;
use crate::protocol::transport::tp::{TransportEvent, TransportProtocol};
use crate::protocol::{
    Address, BROADCAST_ADDRESS, DEFAULT_PRIORITY, PGN_ACKNOWLEDGEMENT, PGN_ADDRESS_CLAIM,
    PGN_DM1, PGN_DM11, PGN_DM13, PGN_DM2, PGN_REQUEST,
};

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;

/// Acknowledgement control byte values (J1939-21).
const ACK_POSITIVE: u8 = 0;
const ACK_NEGATIVE: u8 = 1;

/// Static configuration consumed by [`NetworkManager::new`].
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub num_ports: u8,
    pub session_capacity: usize,
    /// Random transmit delay applied to address re-claims after a lost
    /// contest.
    pub rtxd_ms: u32,
    pub enable_bus_load: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            num_ports: 1,
            session_capacity: DEFAULT_SESSION_CAPACITY,
            rtxd_ms: 0,
            enable_bus_load: true,
        }
    }
}

type PgnCallback = Box<dyn FnMut(&Message)>;
type RequestHandler = Box<dyn FnMut(Address) -> Option<Vec<u8>>>;
type SendCallback = Box<dyn FnMut(bool)>;

struct PendingSend {
    port: u8,
    pgn: u32,
    destination: Address,
    callback: SendCallback,
}

/// The central protocol hub for one node.
pub struct NetworkManager {
    config: NetworkConfig,
    links: Vec<Option<Box<dyn CanLink>>>,
    registry: Registry,
    transport: TransportProtocol,
    scheduler: Scheduler,
    flags: ProcessingFlags,
    bus_loads: Vec<BusLoad>,
    pgn_callbacks: BTreeMap<u32, Vec<PgnCallback>>,
    request_handlers: BTreeMap<u32, RequestHandler>,
    diagnostics: Vec<(InternalCfHandle, DiagnosticProtocol)>,
    /// Raw-frame taps, one per port, drained by an interconnect unit.
    monitors: Vec<Option<Vec<Frame>>>,
    pending_sends: Vec<PendingSend>,
    /// Transport failures kept for the host to poll.
    transport_errors: Vec<TransportEvent>,
    pub on_transport_error: Event<TransportEvent>,
    now_ms: u64,
}

impl Default for NetworkManager {
    fn default() -> Self {
        Self::new(NetworkConfig::default())
    }
}

impl NetworkManager {
    pub fn new(config: NetworkConfig) -> Self {
        let ports = config.num_ports as usize;
        let mut links = Vec::with_capacity(ports);
        links.resize_with(ports, || None);
        let mut monitors = Vec::with_capacity(ports);
        monitors.resize_with(ports, || None);
        let bus_loads = alloc::vec![BusLoad::new(); ports];
        Self {
            transport: TransportProtocol::new(config.session_capacity),
            config,
            links,
            registry: Registry::new(),
            scheduler: Scheduler::new(),
            flags: ProcessingFlags::new(),
            bus_loads,
            pgn_callbacks: BTreeMap::new(),
            request_handlers: BTreeMap::new(),
            diagnostics: Vec::new(),
            monitors,
            pending_sends: Vec::new(),
            transport_errors: Vec::new(),
            on_transport_error: Event::new(),
            now_ms: 0,
        }
    }

    /// Bind a link endpoint to `port`. The link's bitrate recalibrates the
    /// port's bus-load meter.
    pub fn attach_link(
        &mut self,
        port: u8,
        link: Box<dyn CanLink>,
    ) -> Result<(), NetworkError> {
        let slot = self
            .links
            .get_mut(port as usize)
            .ok_or(NetworkError::PortRange { port })?;
        self.bus_loads[port as usize] = BusLoad::with_bitrate(link.bitrate());
        *slot = Some(link);
        Ok(())
    }

    /// Monotonic engine time, accumulated from `update` deltas.
    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    pub fn scheduler_mut(&mut self) -> &mut Scheduler {
        &mut self.scheduler
    }

    pub fn flags_mut(&mut self) -> &mut ProcessingFlags {
        &mut self.flags
    }

    pub fn bus_load(&self, port: u8) -> f32 {
        self.bus_loads
            .get(port as usize)
            .map(BusLoad::load_percent)
            .unwrap_or(0.0)
    }

    pub fn active_transport_sessions(&self) -> usize {
        self.transport.active_sessions()
    }

    /// Register an internal control function. The address claim is started
    /// separately with [`NetworkManager::start_address_claim`].
    pub fn create_internal_cf(
        &mut self,
        name: Name,
        port: u8,
        preferred_address: Address,
    ) -> Result<InternalCfHandle, NetworkError> {
        if port >= self.config.num_ports {
            return Err(NetworkError::PortRange { port });
        }
        self.registry
            .create_internal(name, port, preferred_address, self.config.rtxd_ms)
    }

    /// Release an internal control function: its transport sessions abort
    /// and its diagnostics are dropped.
    pub fn destroy_internal_cf(&mut self, handle: InternalCfHandle) {
        let Some(internal) = self.registry.destroy_internal(handle) else {
            return;
        };
        let port = internal.cf.port;
        let address = internal.claimer.claimed_address();
        self.diagnostics.retain(|(owner, _)| *owner != handle);
        if address != crate::protocol::NULL_ADDRESS {
            let mut out = Vec::new();
            let mut events = Vec::new();
            self.transport
                .cancel_for_address(port, address, &mut out, &mut events);
            self.write_frames(port, out);
            self.consume_transport_events(port, events);
        }
    }

    pub fn create_partner(&mut self, port: u8, filters: Vec<NameFilter>) -> PartnerHandle {
        self.registry.create_partner(port, filters)
    }

    /// Kick off address arbitration for `handle`.
    pub fn start_address_claim(&mut self, handle: InternalCfHandle) -> Result<(), NetworkError> {
        let internal = self
            .registry
            .internal_mut(handle)
            .ok_or(NetworkError::StaleHandle)?;
        let port = internal.cf.port;
        let mut out = Vec::new();
        internal.claimer.start(&mut out);
        self.write_frames(port, out);
        Ok(())
    }

    /// Address currently claimed by `handle` (NULL while arbitration runs).
    pub fn internal_address(&self, handle: InternalCfHandle) -> Option<Address> {
        self.registry
            .internal(handle)
            .map(|internal| internal.address())
    }

    pub fn claim_state(&self, handle: InternalCfHandle) -> Option<ClaimState> {
        self.registry
            .internal(handle)
            .map(|internal| internal.claim_state())
    }

    /// Subscribe to the completion of `handle`'s address claim.
    pub fn on_address_claimed<F: FnMut(&Address) + 'static>(
        &mut self,
        handle: InternalCfHandle,
        callback: F,
    ) {
        if let Some(internal) = self.registry.internal_mut(handle) {
            internal.on_address_claimed.subscribe(callback);
        }
    }

    /// Attach a diagnostic protocol instance to `handle`.
    pub fn enable_diagnostics(&mut self, handle: InternalCfHandle) {
        if self.diagnostics.iter().any(|(owner, _)| *owner == handle) {
            return;
        }
        self.diagnostics.push((handle, DiagnosticProtocol::new()));
    }

    pub fn diagnostics_mut(
        &mut self,
        handle: InternalCfHandle,
    ) -> Option<&mut DiagnosticProtocol> {
        self.diagnostics
            .iter_mut()
            .find(|(owner, _)| *owner == handle)
            .map(|(_, diag)| diag)
    }

    /// Register a dispatch callback for `pgn`. Callbacks fire in
    /// registration order and must not block.
    pub fn register_pgn_callback<F: FnMut(&Message) + 'static>(&mut self, pgn: u32, callback: F) {
        self.pgn_callbacks
            .entry(pgn)
            .or_default()
            .push(Box::new(callback));
    }

    /// Register a responder for PGN requests the core does not answer
    /// itself. Returning `None` declines (a destination-specific request is
    /// then NACKed).
    pub fn register_request_handler<F: FnMut(Address) -> Option<Vec<u8>> + 'static>(
        &mut self,
        pgn: u32,
        handler: F,
    ) {
        self.request_handlers.insert(pgn, Box::new(handler));
    }

    /// Queue an outbound message. Returns once the first frame (or the
    /// transport initiation) is written to the link; transfer completion is
    /// signalled through the optional per-send callback variant.
    pub fn send(
        &mut self,
        pgn: u32,
        data: &[u8],
        source: InternalCfHandle,
        destination: Address,
        priority: u8,
    ) -> Result<(), NetworkError> {
        let internal = self
            .registry
            .internal(source)
            .ok_or(NetworkError::StaleHandle)?;
        if internal.claim_state() != ClaimState::Claimed {
            return Err(NetworkError::NotClaimed);
        }
        let port = internal.cf.port;
        let source_address = internal.address();
        self.send_from_address(port, pgn, data, source_address, destination, priority)
    }

    /// [`NetworkManager::send`] plus a completion callback invoked with
    /// `true` on full delivery or `false` on abort. Single-frame sends
    /// complete immediately.
    #[allow(clippy::too_many_arguments)]
    pub fn send_with_callback<F: FnMut(bool) + 'static>(
        &mut self,
        pgn: u32,
        data: &[u8],
        source: InternalCfHandle,
        destination: Address,
        priority: u8,
        mut callback: F,
    ) -> Result<(), NetworkError> {
        self.send(pgn, data, source, destination, priority)?;
        if data.len() <= crate::protocol::transport::MAX_SINGLE_FRAME_PAYLOAD {
            callback(true);
        } else {
            let port = self
                .registry
                .internal(source)
                .map(|internal| internal.cf.port)
                .unwrap_or(0);
            self.pending_sends.push(PendingSend {
                port,
                pgn,
                destination,
                callback: Box::new(callback),
            });
        }
        Ok(())
    }

    fn send_from_address(
        &mut self,
        port: u8,
        pgn: u32,
        data: &[u8],
        source_address: Address,
        destination: Address,
        priority: u8,
    ) -> Result<(), NetworkError> {
        if self
            .links
            .get(port as usize)
            .map(|slot| slot.is_none())
            .unwrap_or(true)
        {
            return Err(NetworkError::NoLink { port });
        }
        if data.len() <= crate::protocol::transport::MAX_SINGLE_FRAME_PAYLOAD {
            let id = build_id(pgn, source_address, destination, priority)?;
            let frame = Frame::new(id, data);
            return self.write_frame(port, &frame);
        }
        let mut out = Vec::new();
        self.transport
            .open_send(
                port,
                pgn,
                data.to_vec(),
                source_address,
                destination,
                priority,
                &mut out,
            )
            .map_err(NetworkError::Transport)?;
        self.write_frames(port, out);
        Ok(())
    }

    /// Push a raw frame straight onto a port's link. Interconnect units use
    /// this to replay traffic from the opposite segment.
    pub fn send_raw_frame(&mut self, port: u8, frame: &Frame) -> Result<(), NetworkError> {
        self.write_frame(port, frame)
    }

    /// Enable (or disable) the raw-frame tap on `port`.
    pub fn set_monitor(&mut self, port: u8, enabled: bool) {
        if let Some(slot) = self.monitors.get_mut(port as usize) {
            *slot = if enabled { Some(Vec::new()) } else { None };
        }
    }

    /// Drain every frame observed on `port` since the last call.
    pub fn drain_monitor(&mut self, port: u8) -> Vec<Frame> {
        match self.monitors.get_mut(port as usize) {
            Some(Some(tap)) => core::mem::take(tap),
            _ => Vec::new(),
        }
    }

    /// Transport failures accumulated since the last call.
    pub fn drain_transport_errors(&mut self) -> Vec<TransportEvent> {
        core::mem::take(&mut self.transport_errors)
    }

    /// Test-only dispatch path: deliver a message to callbacks (and the
    /// diagnostic layer) without traversing any link.
    pub fn inject_message(&mut self, message: Message) {
        self.dispatch_message(0, &message);
    }

    /// Feed one received frame into the engine. Hosts with a push-style
    /// driver call this directly; polled links are drained by `update`.
    pub fn handle_frame(&mut self, port: u8, frame: &Frame) {
        if port >= self.config.num_ports {
            return;
        }
        if self.config.enable_bus_load {
            self.bus_loads[port as usize].add_frame(frame.len.min(8));
        }
        if let Some(Some(tap)) = self.monitors.get_mut(port as usize) {
            tap.push(*frame);
        }
        let source = frame.id.source_address();
        self.registry.touch(port, source, self.now_ms);

        let pgn = frame.id.pgn();
        if pgn == PGN_ADDRESS_CLAIM {
            self.handle_address_claim(port, frame);
            return;
        }
        if TransportProtocol::owns_pgn(pgn) {
            let destination = frame.id.destination();
            if destination == BROADCAST_ADDRESS
                || self.registry.is_internal_address(port, destination)
            {
                let mut out = Vec::new();
                let mut events = Vec::new();
                self.transport.handle_frame(port, frame, &mut out, &mut events);
                self.write_frames(port, out);
                self.consume_transport_events(port, events);
            }
            return;
        }
        if pgn == PGN_REQUEST {
            self.handle_request(port, frame);
            return;
        }

        let message = Message::from_frame(frame);
        self.deliver(port, message);
    }

    /// Periodic drive: pump links, then every timer in the core.
    pub fn update(&mut self, dt_ms: u32) {
        self.now_ms += u64::from(dt_ms);

        // Frames are processed in arrival order, one port at a time; all
        // callbacks for a frame complete before the next frame starts.
        for port in 0..self.config.num_ports {
            loop {
                let frame = match self.links.get_mut(port as usize) {
                    Some(Some(link)) => link.receive(),
                    _ => None,
                };
                let Some(frame) = frame else { break };
                self.handle_frame(port, &frame);
            }
        }

        self.scheduler.update(dt_ms);
        self.flags.process();
        self.registry.update(self.now_ms);
        self.update_claimers(dt_ms);

        let mut out = Vec::new();
        let mut events = Vec::new();
        self.transport.update(dt_ms, &mut out, &mut events);
        // Transport frames are per-session and already carry their port.
        for frame in out {
            let port = self.port_of_session_frame(&frame);
            let _ = self.write_frame(port, &frame);
        }
        self.consume_transport_events(0, events);

        self.update_diagnostics(dt_ms);

        if self.config.enable_bus_load {
            for meter in self.bus_loads.iter_mut() {
                meter.update(dt_ms);
            }
        }
    }

    fn update_claimers(&mut self, dt_ms: u32) {
        let mut emitted: Vec<(u8, Frame)> = Vec::new();
        let mut completed: Vec<(InternalCfHandle, Address)> = Vec::new();
        for handle in self.registry.internal_handles() {
            let Some(internal) = self.registry.internal_mut(handle) else {
                continue;
            };
            let port = internal.cf.port;
            let mut out = Vec::new();
            if let Some(address) = internal.claimer.update(dt_ms, &mut out) {
                internal.cf.state = CfState::Online;
                internal.cf.address = address;
                completed.push((handle, address));
            }
            for frame in out {
                emitted.push((port, frame));
            }
        }
        for (port, frame) in emitted {
            let _ = self.write_frame(port, &frame);
        }
        for (handle, address) in completed {
            log::debug!("manager: claimed address {address:#04x}");
            if let Some(internal) = self.registry.internal_mut(handle) {
                internal.on_address_claimed.emit(&address);
            }
        }
    }

    fn update_diagnostics(&mut self, dt_ms: u32) {
        let mut broadcasts: Vec<(InternalCfHandle, Vec<u8>)> = Vec::new();
        for (handle, diag) in self.diagnostics.iter_mut() {
            if let Some(body) = diag.update(dt_ms) {
                broadcasts.push((*handle, body));
            }
        }
        for (handle, body) in broadcasts {
            let _ = self.send(PGN_DM1, &body, handle, BROADCAST_ADDRESS, DEFAULT_PRIORITY);
        }
    }

    /// An address claim (or cannot-claim) arrived on the bus.
    fn handle_address_claim(&mut self, port: u8, frame: &Frame) {
        if frame.len < 8 {
            log::debug!("manager: short address claim ignored");
            return;
        }
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&frame.payload()[..8]);
        let name = Name::from_le_bytes(bytes);
        let claimed = frame.id.source_address();

        self.registry.observe_claim(port, claimed, name, self.now_ms);

        let mut emitted: Vec<(u8, Frame)> = Vec::new();
        for handle in self.registry.internal_handles() {
            let Some(internal) = self.registry.internal_mut(handle) else {
                continue;
            };
            if internal.cf.port != port {
                continue;
            }
            let mut out = Vec::new();
            internal.claimer.handle_claim(claimed, name, &mut out);
            internal.cf.address = internal.claimer.claimed_address();
            for frame in out {
                emitted.push((port, frame));
            }
        }
        for (port, frame) in emitted {
            let _ = self.write_frame(port, &frame);
        }
    }

    /// Answer a PGN request (J1939-21, PGN 59904).
    fn handle_request(&mut self, port: u8, frame: &Frame) {
        if frame.len < 3 {
            return;
        }
        let payload = frame.payload();
        let requested = u32::from(payload[0])
            | (u32::from(payload[1]) << 8)
            | (u32::from(payload[2]) << 16);
        let requester = frame.id.source_address();
        let destination = frame.id.destination();
        let global = destination == BROADCAST_ADDRESS;

        match requested {
            PGN_ADDRESS_CLAIM => self.answer_claim_request(port, destination, global),
            PGN_DM1 | PGN_DM2 => self.answer_dm_request(port, requested, requester, destination, global),
            PGN_DM11 => self.answer_dm11(port, requester, destination, global),
            _ => {
                let response = self
                    .request_handlers
                    .get_mut(&requested)
                    .and_then(|handler| handler(requester));
                match response {
                    Some(body) => {
                        let reply_to = reply_destination(requested, requester);
                        if let Some((source, _)) = self.responding_cf(port, destination, global) {
                            let _ = self.send_from_address(
                                port,
                                requested,
                                &body,
                                source,
                                reply_to,
                                DEFAULT_PRIORITY,
                            );
                        }
                    }
                    None if !global => {
                        self.send_acknowledgement(port, destination, ACK_NEGATIVE, requested, requester);
                    }
                    None => {}
                }
            }
        }
    }

    /// Request for the address-claim group: every targeted internal CF
    /// re-announces; a failed one answers cannot-claim.
    fn answer_claim_request(&mut self, port: u8, destination: Address, global: bool) {
        let mut emitted: Vec<Frame> = Vec::new();
        for handle in self.registry.internal_handles() {
            let Some(internal) = self.registry.internal(handle) else {
                continue;
            };
            if internal.cf.port != port {
                continue;
            }
            let claimed = internal.address();
            if !global && claimed != destination {
                continue;
            }
            match internal.claim_state() {
                ClaimState::Claimed => emitted.push(claim_frame(internal.cf.name, claimed)),
                ClaimState::Failed => emitted.push(cannot_claim_frame(internal.cf.name)),
                _ => {}
            }
        }
        for frame in emitted {
            let _ = self.write_frame(port, &frame);
        }
    }

    fn answer_dm_request(
        &mut self,
        port: u8,
        requested: u32,
        requester: Address,
        destination: Address,
        global: bool,
    ) {
        let mut responses: Vec<(Address, Vec<u8>)> = Vec::new();
        for (handle, diag) in self.diagnostics.iter() {
            let Some(internal) = self.registry.internal(*handle) else {
                continue;
            };
            if internal.cf.port != port || internal.claim_state() != ClaimState::Claimed {
                continue;
            }
            if !global && internal.address() != destination {
                continue;
            }
            let body = if requested == PGN_DM1 {
                diag.dm1_payload()
            } else {
                diag.dm2_payload()
            };
            responses.push((internal.address(), body));
        }
        let reply_to = reply_destination(requested, requester);
        for (source, body) in responses {
            let _ = self.send_from_address(port, requested, &body, source, reply_to, DEFAULT_PRIORITY);
        }
    }

    /// DM11: clear all diagnostic data, then acknowledge.
    fn answer_dm11(&mut self, port: u8, requester: Address, destination: Address, global: bool) {
        let mut cleared_any = false;
        let targets: Vec<InternalCfHandle> = self
            .diagnostics
            .iter()
            .map(|(handle, _)| *handle)
            .collect();
        for handle in targets {
            let Some(internal) = self.registry.internal(handle) else {
                continue;
            };
            if internal.cf.port != port || internal.claim_state() != ClaimState::Claimed {
                continue;
            }
            if !global && internal.address() != destination {
                continue;
            }
            if let Some(diag) = self.diagnostics_mut(handle) {
                diag.clear_all();
                cleared_any = true;
            }
        }
        if cleared_any && !global {
            self.send_acknowledgement(port, destination, ACK_POSITIVE, PGN_DM11, requester);
        }
    }

    /// Emit an ACK/NACK (PGN 59392) from the addressed control function.
    fn send_acknowledgement(
        &mut self,
        port: u8,
        our_address: Address,
        control: u8,
        pgn: u32,
        requester: Address,
    ) {
        if !self.registry.is_internal_address(port, our_address) {
            return;
        }
        let payload = [
            control,
            0xFF,
            0xFF,
            0xFF,
            requester,
            (pgn & 0xFF) as u8,
            ((pgn >> 8) & 0xFF) as u8,
            ((pgn >> 16) & 0xFF) as u8,
        ];
        if let Ok(id) = build_id(PGN_ACKNOWLEDGEMENT, our_address, BROADCAST_ADDRESS, DEFAULT_PRIORITY)
        {
            let frame = Frame::new(id, &payload);
            let _ = self.write_frame(port, &frame);
        }
    }

    /// The internal CF that should answer a request aimed at `destination`.
    fn responding_cf(
        &self,
        port: u8,
        destination: Address,
        global: bool,
    ) -> Option<(Address, InternalCfHandle)> {
        for handle in self.registry.internal_handles() {
            let Some(internal) = self.registry.internal(handle) else {
                continue;
            };
            if internal.cf.port != port || internal.claim_state() != ClaimState::Claimed {
                continue;
            }
            if global || internal.address() == destination {
                return Some((internal.address(), handle));
            }
        }
        None
    }

    /// Hand a finished message to its consumers, honouring the
    /// broadcast-to-me check.
    fn deliver(&mut self, port: u8, message: Message) {
        if !message.is_broadcast() && !self.registry.is_internal_address(port, message.destination)
        {
            return;
        }
        self.dispatch_message(port, &message);
    }

    fn dispatch_message(&mut self, port: u8, message: &Message) {
        if message.pgn == PGN_DM13 {
            for (handle, diag) in self.diagnostics.iter_mut() {
                let on_port = self
                    .registry
                    .internal(*handle)
                    .map(|internal| internal.cf.port == port)
                    .unwrap_or(false);
                if on_port {
                    diag.handle_dm13(message);
                }
            }
        }
        if let Some(callbacks) = self.pgn_callbacks.get_mut(&message.pgn) {
            for callback in callbacks.iter_mut() {
                callback(message);
            }
        }
    }

    fn consume_transport_events(&mut self, default_port: u8, events: Vec<TransportEvent>) {
        for event in events {
            match event {
                TransportEvent::MessageReceived(mut message) => {
                    message.timestamp_ms = self.now_ms;
                    self.deliver(default_port, message);
                }
                TransportEvent::SendComplete { port, pgn, destination } => {
                    self.finish_pending_send(port, pgn, destination, true);
                }
                TransportEvent::SendFailed { port, pgn, destination, reason } => {
                    self.finish_pending_send(port, pgn, destination, false);
                    let event = TransportEvent::SendFailed { port, pgn, destination, reason };
                    self.on_transport_error.emit(&event);
                    self.transport_errors.push(event);
                }
                TransportEvent::ReceiveFailed { .. } => {
                    self.on_transport_error.emit(&event);
                    self.transport_errors.push(event);
                }
            }
        }
    }

    fn finish_pending_send(&mut self, port: u8, pgn: u32, destination: Address, success: bool) {
        if let Some(index) = self.pending_sends.iter().position(|pending| {
            pending.port == port && pending.pgn == pgn && pending.destination == destination
        }) {
            let mut pending = self.pending_sends.remove(index);
            (pending.callback)(success);
        }
    }

    /// Transport frames carry no port of their own; resolve it through the
    /// session's source address. Single-port configurations short-circuit.
    fn port_of_session_frame(&self, frame: &Frame) -> u8 {
        if self.config.num_ports == 1 {
            return 0;
        }
        let source = frame.id.source_address();
        for port in 0..self.config.num_ports {
            if self.registry.is_internal_address(port, source) {
                return port;
            }
        }
        0
    }

    fn write_frame(&mut self, port: u8, frame: &Frame) -> Result<(), NetworkError> {
        match self.links.get_mut(port as usize) {
            Some(Some(link)) => link.send(frame).map_err(|error| {
                log::debug!("manager: link on port {port} rejected a frame: {error:?}");
                NetworkError::LinkFailure
            }),
            _ => Err(NetworkError::NoLink { port }),
        }
    }

    fn write_frames(&mut self, port: u8, frames: Vec<Frame>) {
        for frame in frames {
            let _ = self.write_frame(port, &frame);
        }
    }
}

/// Choose where a response travels: back to the requester for
/// destination-specific groups, to everyone for broadcast-only groups.
fn reply_destination(pgn: u32, requester: Address) -> Address {
    if ((pgn >> 8) & 0xFF) as u8 >= 240 {
        BROADCAST_ADDRESS
    } else {
        requester
    }
}

/// Identifier construction that tolerates the PDU2/destination mismatch the
/// send API allows: broadcast groups ignore the destination argument.
fn build_id(
    pgn: u32,
    source: Address,
    destination: Address,
    priority: u8,
) -> Result<CanId, NetworkError> {
    let pf = ((pgn >> 8) & 0xFF) as u8;
    let builder = CanId::builder(pgn, source).priority(priority);
    let id = if pf >= 240 {
        builder.build()?
    } else {
        builder.destination(destination).build()?
    };
    Ok(id)
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
