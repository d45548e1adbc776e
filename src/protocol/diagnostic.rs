//! J1939-73 diagnostic messaging: trouble-code lifecycle, lamp states, the
//! DM1/DM2 serializers, the DM11 clear, and DM13 broadcast suspension. One
//! [`DiagnosticProtocol`] instance serves one internal control function.
use crate::error::NetworkError;
use crate::infra::event::Event;
use crate::protocol::transport::frame::Message;
use crate::protocol::Address;

use alloc::vec::Vec;

/// DM1 broadcast cadence while at least one trouble code is active.
pub const DM1_BROADCAST_INTERVAL_MS: u32 = 1000;

/// Upper bound on simultaneously active trouble codes per control function,
/// capping DM1 fragmentation across the transport protocol.
pub const MAX_ACTIVE_DTCS: usize = 256;

/// Occurrence counters saturate at this value on the wire.
const MAX_OCCURRENCE_COUNT: u8 = 126;

/// A diagnostic trouble code. Identity is the (SPN, FMI) pair; the
/// occurrence count is an accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Dtc {
    /// Suspect parameter number (19 bits).
    pub spn: u32,
    /// Failure mode identifier (5 bits).
    pub fmi: u8,
    /// Saturating occurrence counter (7 bits).
    pub occurrence_count: u8,
}

impl Dtc {
    pub const fn new(spn: u32, fmi: u8) -> Self {
        Self {
            spn,
            fmi,
            occurrence_count: 1,
        }
    }

    pub fn same_fault(&self, other: &Dtc) -> bool {
        self.spn == other.spn && self.fmi == other.fmi
    }

    /// Four-byte wire record: SPN low, SPN mid, SPN high 3 bits with the
    /// FMI, then the conversion bit and the occurrence count.
    pub fn encode(&self) -> [u8; 4] {
        [
            (self.spn & 0xFF) as u8,
            ((self.spn >> 8) & 0xFF) as u8,
            ((((self.spn >> 16) & 0x07) as u8) << 5) | (self.fmi & 0x1F),
            self.occurrence_count & 0x7F,
        ]
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 4 {
            return None;
        }
        Some(Self {
            spn: u32::from(bytes[0])
                | (u32::from(bytes[1]) << 8)
                | (u32::from(bytes[2] >> 5) << 16),
            fmi: bytes[2] & 0x1F,
            occurrence_count: bytes[3] & 0x7F,
        })
    }
}

/// Two-bit lamp state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LampStatus {
    #[default]
    Off,
    On,
}

/// Two-bit lamp flash command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LampFlash {
    SlowFlash,
    FastFlash,
    #[default]
    NoFlash,
}

impl LampFlash {
    fn to_wire(self) -> u8 {
        match self {
            Self::SlowFlash => 0,
            Self::FastFlash => 1,
            Self::NoFlash => 3,
        }
    }

    fn from_wire(raw: u8) -> Self {
        match raw & 0x03 {
            0 => Self::SlowFlash,
            1 => Self::FastFlash,
            _ => Self::NoFlash,
        }
    }
}

/// Lamp status block carried in the first two DM1/DM2 bytes: malfunction
/// indicator, red stop, amber warning, and engine protect, each with a
/// flash companion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DiagnosticLamps {
    pub malfunction: LampStatus,
    pub red_stop: LampStatus,
    pub amber_warning: LampStatus,
    pub engine_protect: LampStatus,
    pub malfunction_flash: LampFlash,
    pub red_stop_flash: LampFlash,
    pub amber_warning_flash: LampFlash,
    pub engine_protect_flash: LampFlash,
}

impl DiagnosticLamps {
    pub fn encode(&self) -> [u8; 2] {
        let status = |lamp: LampStatus| -> u8 {
            match lamp {
                LampStatus::Off => 0,
                LampStatus::On => 1,
            }
        };
        let byte0 = (status(self.malfunction) << 6)
            | (status(self.red_stop) << 4)
            | (status(self.amber_warning) << 2)
            | status(self.engine_protect);
        let byte1 = (self.malfunction_flash.to_wire() << 6)
            | (self.red_stop_flash.to_wire() << 4)
            | (self.amber_warning_flash.to_wire() << 2)
            | self.engine_protect_flash.to_wire();
        [byte0, byte1]
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 2 {
            return None;
        }
        let status = |raw: u8| -> LampStatus {
            if raw & 0x01 != 0 {
                LampStatus::On
            } else {
                LampStatus::Off
            }
        };
        Some(Self {
            malfunction: status(bytes[0] >> 6),
            red_stop: status(bytes[0] >> 4),
            amber_warning: status(bytes[0] >> 2),
            engine_protect: status(bytes[0]),
            malfunction_flash: LampFlash::from_wire(bytes[1] >> 6),
            red_stop_flash: LampFlash::from_wire(bytes[1] >> 4),
            amber_warning_flash: LampFlash::from_wire(bytes[1] >> 2),
            engine_protect_flash: LampFlash::from_wire(bytes[1]),
        })
    }
}

/// DM1/DM2 body: the lamp block followed by 4-byte trouble-code records.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DtcReport {
    pub lamps: DiagnosticLamps,
    pub dtcs: Vec<Dtc>,
}

impl DtcReport {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(2 + 4 * self.dtcs.len().max(1) + 2);
        out.extend_from_slice(&self.lamps.encode());
        if self.dtcs.is_empty() {
            // No faults: one all-zero record padded to the 8-byte frame.
            out.extend_from_slice(&[0, 0, 0, 0, 0xFF, 0xFF]);
            return out;
        }
        for dtc in &self.dtcs {
            out.extend_from_slice(&dtc.encode());
        }
        out
    }

    pub fn decode(data: &[u8]) -> Option<Self> {
        let lamps = DiagnosticLamps::decode(data)?;
        let mut dtcs = Vec::new();
        for record in data[2..].chunks_exact(4) {
            // Skip the all-zero placeholder and 0xFF frame padding.
            if record.iter().all(|&byte| byte == 0) || record.iter().all(|&byte| byte == 0xFF) {
                continue;
            }
            dtcs.push(Dtc::decode(record)?);
        }
        Some(Self { lamps, dtcs })
    }
}

/// Two-bit DM13 broadcast control command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Dm13Command {
    Suspend,
    Resume,
    Reserved,
    #[default]
    DontCare,
}

impl Dm13Command {
    fn to_wire(self) -> u8 {
        match self {
            Self::Suspend => 0,
            Self::Resume => 1,
            Self::Reserved => 2,
            Self::DontCare => 3,
        }
    }

    fn from_wire(raw: u8) -> Self {
        match raw & 0x03 {
            0 => Self::Suspend,
            1 => Self::Resume,
            2 => Self::Reserved,
            _ => Self::DontCare,
        }
    }
}

/// Decoded DM13 (stop/start broadcast) signal set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Dm13Signals {
    pub hold: Dm13Command,
    pub dm1: Dm13Command,
    pub dm2: Dm13Command,
    pub dm3: Dm13Command,
    pub proprietary_a: Dm13Command,
    pub proprietary_b: Dm13Command,
    /// Suspension time in seconds; 0xFFFF means indefinite.
    pub suspend_duration_s: u16,
}

/// Indefinite suspension marker.
pub const DM13_INDEFINITE: u16 = 0xFFFF;

impl Dm13Signals {
    pub fn encode(&self) -> [u8; 8] {
        let mut out = [0xFF; 8];
        out[0] = (self.hold.to_wire() << 6)
            | (self.dm1.to_wire() << 4)
            | (self.dm2.to_wire() << 2)
            | self.dm3.to_wire();
        out[1] = (self.proprietary_a.to_wire() << 6) | (self.proprietary_b.to_wire() << 4) | 0x0F;
        out[2] = (self.suspend_duration_s & 0xFF) as u8;
        out[3] = (self.suspend_duration_s >> 8) as u8;
        out
    }

    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() < 4 {
            return None;
        }
        Some(Self {
            hold: Dm13Command::from_wire(data[0] >> 6),
            dm1: Dm13Command::from_wire(data[0] >> 4),
            dm2: Dm13Command::from_wire(data[0] >> 2),
            dm3: Dm13Command::from_wire(data[0]),
            proprietary_a: Dm13Command::from_wire(data[1] >> 6),
            proprietary_b: Dm13Command::from_wire(data[1] >> 4),
            suspend_duration_s: u16::from(data[2]) | (u16::from(data[3]) << 8),
        })
    }
}

/// One suspendable broadcast.
#[derive(Debug, Clone, Copy, Default)]
struct Suspension {
    suspended: bool,
    /// Remaining suspension time; `None` while suspended means indefinite.
    remaining_ms: Option<u32>,
}

impl Suspension {
    fn apply(&mut self, command: Dm13Command, duration_s: u16) {
        match command {
            Dm13Command::Suspend => {
                self.suspended = true;
                self.remaining_ms = if duration_s == DM13_INDEFINITE {
                    None
                } else {
                    Some(u32::from(duration_s) * 1000)
                };
            }
            Dm13Command::Resume => {
                self.suspended = false;
                self.remaining_ms = None;
            }
            // A don't-care never disturbs an armed timer.
            Dm13Command::Reserved | Dm13Command::DontCare => {}
        }
    }

    /// Returns `true` when the suspension just expired.
    fn tick(&mut self, dt_ms: u32) -> bool {
        if !self.suspended {
            return false;
        }
        let Some(remaining) = self.remaining_ms else {
            return false;
        };
        if remaining > dt_ms {
            self.remaining_ms = Some(remaining - dt_ms);
            false
        } else {
            self.suspended = false;
            self.remaining_ms = None;
            true
        }
    }
}

/// Per-control-function diagnostic state machine.
///
/// The owner feeds it received DM13 messages and elapsed time; payloads it
/// wants broadcast come back from [`DiagnosticProtocol::update`].
pub struct DiagnosticProtocol {
    active: Vec<Dtc>,
    previous: Vec<Dtc>,
    lamps: DiagnosticLamps,
    dm1_timer_ms: u32,
    dm1: Suspension,
    dm2: Suspension,
    dm3: Suspension,
    pub on_dtc_added: Event<Dtc>,
    pub on_dm13_received: Event<(Dm13Signals, Address)>,
}

impl Default for DiagnosticProtocol {
    fn default() -> Self {
        Self::new()
    }
}

impl DiagnosticProtocol {
    pub fn new() -> Self {
        Self {
            active: Vec::new(),
            previous: Vec::new(),
            lamps: DiagnosticLamps::default(),
            dm1_timer_ms: 0,
            dm1: Suspension::default(),
            dm2: Suspension::default(),
            dm3: Suspension::default(),
            on_dtc_added: Event::new(),
            on_dm13_received: Event::new(),
        }
    }

    pub fn active_dtcs(&self) -> &[Dtc] {
        &self.active
    }

    pub fn previous_dtcs(&self) -> &[Dtc] {
        &self.previous
    }

    pub fn lamps(&self) -> DiagnosticLamps {
        self.lamps
    }

    pub fn set_lamps(&mut self, lamps: DiagnosticLamps) {
        self.lamps = lamps;
    }

    /// Raise a fault. A repeated (SPN, FMI) merges into the existing entry
    /// and bumps its saturating occurrence counter.
    pub fn set_active(&mut self, dtc: Dtc) -> Result<(), NetworkError> {
        if let Some(existing) = self.active.iter_mut().find(|entry| entry.same_fault(&dtc)) {
            existing.occurrence_count =
                existing.occurrence_count.saturating_add(1).min(MAX_OCCURRENCE_COUNT);
            return Ok(());
        }
        if self.active.len() >= MAX_ACTIVE_DTCS {
            return Err(NetworkError::DtcTableFull);
        }
        let mut entry = dtc;
        entry.occurrence_count = 1;
        self.active.push(entry);
        self.on_dtc_added.emit(&entry);
        Ok(())
    }

    /// Retire one fault, preserving its occurrence count in the previous
    /// list.
    pub fn clear_active(&mut self, spn: u32, fmi: u8) -> bool {
        let probe = Dtc { spn, fmi, occurrence_count: 0 };
        match self.active.iter().position(|entry| entry.same_fault(&probe)) {
            Some(index) => {
                let entry = self.active.remove(index);
                self.retire(entry);
                true
            }
            None => false,
        }
    }

    /// Retire every active fault.
    pub fn clear_all_active(&mut self) {
        let drained: Vec<Dtc> = self.active.drain(..).collect();
        for entry in drained {
            self.retire(entry);
        }
    }

    /// Drop the previous list (DM3 semantics).
    pub fn clear_previous(&mut self) {
        self.previous.clear();
    }

    fn retire(&mut self, entry: Dtc) {
        match self.previous.iter().position(|prev| prev.same_fault(&entry)) {
            Some(index) => self.previous[index].occurrence_count = entry.occurrence_count,
            None => self.previous.push(entry),
        }
    }

    /// Serialize the active list as a DM1 body.
    pub fn dm1_payload(&self) -> Vec<u8> {
        DtcReport {
            lamps: self.lamps,
            dtcs: self.active.clone(),
        }
        .encode()
    }

    /// Serialize the previous list as a DM2 body.
    pub fn dm2_payload(&self) -> Vec<u8> {
        DtcReport {
            lamps: self.lamps,
            dtcs: self.previous.clone(),
        }
        .encode()
    }

    /// DM11 semantics: wipe both lists.
    pub fn clear_all(&mut self) {
        self.active.clear();
        self.previous.clear();
    }

    pub fn is_dm1_suspended(&self) -> bool {
        self.dm1.suspended
    }

    pub fn is_dm2_suspended(&self) -> bool {
        self.dm2.suspended
    }

    /// Apply a received DM13 message.
    pub fn handle_dm13(&mut self, message: &Message) {
        let Some(signals) = Dm13Signals::decode(&message.data) else {
            log::debug!("diagnostic: malformed DM13 from {:#04x}", message.source);
            return;
        };
        // Only a signal's own Suspend/Resume touches its timer; the hold
        // signal is surfaced through the event and drives no broadcast of
        // its own.
        self.dm1.apply(signals.dm1, signals.suspend_duration_s);
        self.dm2.apply(signals.dm2, signals.suspend_duration_s);
        self.dm3.apply(signals.dm3, signals.suspend_duration_s);
        self.on_dm13_received.emit(&(signals, message.source));
    }

    /// Advance suspension timers and the DM1 cadence. Returns a DM1 body
    /// when one is due for broadcast.
    pub fn update(&mut self, dt_ms: u32) -> Option<Vec<u8>> {
        let dm1_just_expired = self.dm1.tick(dt_ms);
        self.dm2.tick(dt_ms);
        self.dm3.tick(dt_ms);

        if self.active.is_empty() {
            self.dm1_timer_ms = 0;
            return None;
        }
        if self.dm1.suspended || dm1_just_expired {
            // The cadence keeps accumulating (capped at one interval) so the
            // broadcast resumes on the first update after the suspension.
            self.dm1_timer_ms = self
                .dm1_timer_ms
                .saturating_add(dt_ms)
                .min(DM1_BROADCAST_INTERVAL_MS);
            return None;
        }
        self.dm1_timer_ms += dt_ms;
        if self.dm1_timer_ms < DM1_BROADCAST_INTERVAL_MS {
            return None;
        }
        self.dm1_timer_ms = 0;
        Some(self.dm1_payload())
    }
}

#[cfg(test)]
#[path = "diagnostic_tests.rs"]
mod tests;
