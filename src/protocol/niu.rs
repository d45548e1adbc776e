//! Network Interconnect Unit (ISO 11783-4): a packet mover between a tractor
//! segment and an implement segment. Four archetypes share one
//! filter-forwarder core: the [`Repeater`] copies everything, the [`Bridge`]
//! learns which side an address lives on, the [`Router`] rewrites addresses
//! from a NAME-keyed translation table, and the [`Gateway`] additionally
//! applies per-PGN message transforms.
//!
//! The unit owns no manager; the host passes both [`NetworkManager`]s into
//! `process`, which drains each side's raw-frame tap and replays the
//! surviving frames onto the other side. Each pump is atomic per frame.
use crate::error::NiuError;
use crate::protocol::management::name::Name;
use crate::protocol::manager::NetworkManager;
use crate::protocol::transport::can_id::CanId;
use crate::protocol::transport::frame::{Frame, Message};
use crate::protocol::{Address, BROADCAST_ADDRESS, NULL_ADDRESS};

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;

/// Fixed bound on filter-table entries.
pub const MAX_NIU_FILTERS: usize = 32;

/// Learned bridge addresses expire after this long without traffic.
pub const LEARNING_AGE_MS: u64 = 30_000;

/// Which physical segment a frame came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Side {
    Tractor,
    Implement,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Self::Tractor => Self::Implement,
            Self::Implement => Self::Tractor,
        }
    }
}

/// Verdict when no filter entry matches, configured per direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NiuFilterMode {
    #[default]
    PassAll,
    BlockAll,
}

/// Forwarding direction an entry applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FilterDirection {
    TractorToImplement,
    ImplementToTractor,
    #[default]
    Both,
}

impl FilterDirection {
    fn covers(self, side: Side) -> bool {
        match (self, side) {
            (Self::Both, _) => true,
            (Self::TractorToImplement, Side::Tractor) => true,
            (Self::ImplementToTractor, Side::Implement) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FilterAction {
    Allow,
    Block,
}

/// What a filter entry matches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FilterPredicate {
    /// Match the parameter group.
    Pgn(u32),
    /// Match the sender's NAME (resolved through the origin registry).
    Name(Name),
    /// Match the sender's NAME for one specific parameter group.
    NamePgn(Name, u32),
}

/// One ordered filter-table entry. The first matching entry decides.
#[derive(Debug, Clone, Copy)]
pub struct NiuFilter {
    pub predicate: FilterPredicate,
    pub action: FilterAction,
    pub direction: FilterDirection,
    /// Minimum spacing between forwarded matches.
    pub rate_limit_ms: Option<u32>,
    /// Whether the entry survives [`NiuCore::reset`]. The unit performs no
    /// I/O for persistence; it only exposes the flagged set.
    pub persistent: bool,
    last_forwarded_ms: Option<u64>,
}

impl NiuFilter {
    fn matches(&self, pgn: u32, source_name: Option<Name>) -> bool {
        match self.predicate {
            FilterPredicate::Pgn(wanted) => pgn == wanted,
            FilterPredicate::Name(name) => source_name == Some(name),
            FilterPredicate::NamePgn(name, wanted) => {
                pgn == wanted && source_name == Some(name)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NiuState {
    #[default]
    Offline,
    Active,
}

/// Static interconnect configuration.
#[derive(Debug, Clone)]
pub struct NiuConfig {
    pub name: String,
    pub tractor_port: u8,
    pub implement_port: u8,
    pub tractor_to_implement_mode: NiuFilterMode,
    pub implement_to_tractor_mode: NiuFilterMode,
}

impl Default for NiuConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            tractor_port: 0,
            implement_port: 0,
            tractor_to_implement_mode: NiuFilterMode::PassAll,
            implement_to_tractor_mode: NiuFilterMode::PassAll,
        }
    }
}

impl NiuConfig {
    pub fn set_name(mut self, name: &str) -> Self {
        self.name = String::from(name);
        self
    }

    /// Apply the same default verdict to both directions.
    pub fn mode(mut self, mode: NiuFilterMode) -> Self {
        self.tractor_to_implement_mode = mode;
        self.implement_to_tractor_mode = mode;
        self
    }
}

/// The shared filter-forwarder: filter table, statistics, and state.
pub struct NiuCore {
    config: NiuConfig,
    filters: Vec<NiuFilter>,
    state: NiuState,
    forwarded: u32,
    blocked: u32,
    now_ms: u64,
}

impl NiuCore {
    pub fn new(config: NiuConfig) -> Self {
        Self {
            config,
            filters: Vec::new(),
            state: NiuState::Offline,
            forwarded: 0,
            blocked: 0,
            now_ms: 0,
        }
    }

    pub fn state(&self) -> NiuState {
        self.state
    }

    pub fn forwarded(&self) -> u32 {
        self.forwarded
    }

    pub fn blocked(&self) -> u32 {
        self.blocked
    }

    pub fn filters(&self) -> &[NiuFilter] {
        &self.filters
    }

    /// The entries flagged to survive a reset, for an external store.
    pub fn persistent_filters(&self) -> Vec<NiuFilter> {
        self.filters
            .iter()
            .filter(|filter| filter.persistent)
            .copied()
            .collect()
    }

    pub fn filter_mode(&self, side: Side) -> NiuFilterMode {
        match side {
            Side::Tractor => self.config.tractor_to_implement_mode,
            Side::Implement => self.config.implement_to_tractor_mode,
        }
    }

    pub fn set_filter_mode(&mut self, direction: FilterDirection, mode: NiuFilterMode) {
        if direction.covers(Side::Tractor) {
            self.config.tractor_to_implement_mode = mode;
        }
        if direction.covers(Side::Implement) {
            self.config.implement_to_tractor_mode = mode;
        }
    }

    /// Verify address uniqueness across both segments and activate. Monitors
    /// are armed on both managers so `process` sees every raw frame.
    pub fn initialize(
        &mut self,
        tractor: &mut NetworkManager,
        implement: &mut NetworkManager,
    ) -> Result<(), NiuError> {
        for address in 0..=crate::protocol::MAX_ADDRESS {
            let on_tractor = tractor
                .registry()
                .lookup_by_address(self.config.tractor_port, address)
                .is_some();
            let on_implement = implement
                .registry()
                .lookup_by_address(self.config.implement_port, address)
                .is_some();
            if on_tractor && on_implement {
                return Err(NiuError::AddressConflict { address });
            }
        }
        tractor.set_monitor(self.config.tractor_port, true);
        implement.set_monitor(self.config.implement_port, true);
        self.state = NiuState::Active;
        Ok(())
    }

    /// Confirm `address` exists on at most one segment.
    pub fn check_address_unique(
        &self,
        address: Address,
        tractor: &NetworkManager,
        implement: &NetworkManager,
    ) -> bool {
        let on_tractor = tractor
            .registry()
            .lookup_by_address(self.config.tractor_port, address)
            .is_some();
        let on_implement = implement
            .registry()
            .lookup_by_address(self.config.implement_port, address)
            .is_some();
        !(on_tractor && on_implement)
    }

    fn add_filter(&mut self, filter: NiuFilter) -> Result<(), NiuError> {
        if self.filters.len() >= MAX_NIU_FILTERS {
            return Err(NiuError::FilterTableFull);
        }
        self.filters.push(filter);
        Ok(())
    }

    pub fn allow_pgn(&mut self, pgn: u32, direction: FilterDirection) -> Result<(), NiuError> {
        self.add_filter(NiuFilter {
            predicate: FilterPredicate::Pgn(pgn),
            action: FilterAction::Allow,
            direction,
            rate_limit_ms: None,
            persistent: false,
            last_forwarded_ms: None,
        })
    }

    pub fn block_pgn(&mut self, pgn: u32, direction: FilterDirection) -> Result<(), NiuError> {
        self.add_filter(NiuFilter {
            predicate: FilterPredicate::Pgn(pgn),
            action: FilterAction::Block,
            direction,
            rate_limit_ms: None,
            persistent: false,
            last_forwarded_ms: None,
        })
    }

    /// Allow every parameter group from a trusted NAME.
    pub fn allow_name(&mut self, name: Name) -> Result<(), NiuError> {
        self.add_filter(NiuFilter {
            predicate: FilterPredicate::Name(name),
            action: FilterAction::Allow,
            direction: FilterDirection::Both,
            rate_limit_ms: None,
            persistent: false,
            last_forwarded_ms: None,
        })
    }

    /// Block one parameter group from a specific NAME.
    pub fn block_name(&mut self, name: Name, pgn: u32) -> Result<(), NiuError> {
        self.add_filter(NiuFilter {
            predicate: FilterPredicate::NamePgn(name, pgn),
            action: FilterAction::Block,
            direction: FilterDirection::Both,
            rate_limit_ms: None,
            persistent: false,
            last_forwarded_ms: None,
        })
    }

    /// Allow a parameter group at a bounded forwarding rate.
    pub fn allow_pgn_rate_limited(
        &mut self,
        pgn: u32,
        rate_limit_ms: u32,
        persistent: bool,
    ) -> Result<(), NiuError> {
        self.add_filter(NiuFilter {
            predicate: FilterPredicate::Pgn(pgn),
            action: FilterAction::Allow,
            direction: FilterDirection::Both,
            rate_limit_ms: Some(rate_limit_ms),
            persistent,
            last_forwarded_ms: None,
        })
    }

    /// Drop every non-persistent filter and zero the statistics.
    pub fn reset(&mut self) {
        self.filters.retain(|filter| filter.persistent);
        self.forwarded = 0;
        self.blocked = 0;
    }

    /// First-match filter evaluation; consults the rate limiter of an
    /// allowing entry. Mutates `last_forwarded_ms`, so a verdict of `true`
    /// must forward.
    fn permits(&mut self, pgn: u32, source_name: Option<Name>, from: Side) -> bool {
        for filter in self.filters.iter_mut() {
            if !filter.direction.covers(from) || !filter.matches(pgn, source_name) {
                continue;
            }
            return match filter.action {
                FilterAction::Block => false,
                FilterAction::Allow => match filter.rate_limit_ms {
                    None => true,
                    Some(limit) => {
                        let due = filter
                            .last_forwarded_ms
                            .map(|last| self.now_ms.saturating_sub(last) >= u64::from(limit))
                            .unwrap_or(true);
                        if due {
                            filter.last_forwarded_ms = Some(self.now_ms);
                        }
                        due
                    }
                },
            };
        }
        self.filter_mode(from) == NiuFilterMode::PassAll
    }

    fn count(&mut self, passed: bool) {
        if passed {
            self.forwarded += 1;
        } else {
            self.blocked += 1;
        }
    }

    /// Apply an interconnect management command (PGN 60672). A statistics
    /// request yields the response message to send back.
    pub fn handle_network_message(
        &mut self,
        message: &NiuNetworkMessage,
    ) -> Option<NiuNetworkMessage> {
        match message.function {
            NiuFunction::AddFilterEntry => {
                let _ = self.allow_pgn(message.filter_pgn, FilterDirection::Both);
                None
            }
            NiuFunction::DeleteFilterEntry => {
                let wanted = FilterPredicate::Pgn(message.filter_pgn);
                self.filters.retain(|filter| filter.predicate != wanted);
                None
            }
            NiuFunction::SetFilterMode => {
                self.set_filter_mode(FilterDirection::Both, message.filter_mode);
                None
            }
            NiuFunction::PortStatsRequest => Some(NiuNetworkMessage {
                function: NiuFunction::PortStatsResponse,
                port_number: message.port_number,
                msgs_forwarded: self.forwarded.min(u32::from(u16::MAX)) as u16,
                msgs_blocked: self.blocked.min(u32::from(u16::MAX)) as u16,
                ..Default::default()
            }),
            NiuFunction::PortStatsResponse => None,
        }
    }

    /// Drain one side's tap, returning the frames that pass the filter DB
    /// together with the resolved source NAME.
    fn drain_side(
        &mut self,
        from: &mut NetworkManager,
        side: Side,
    ) -> Vec<(Frame, Option<Name>)> {
        let port = match side {
            Side::Tractor => self.config.tractor_port,
            Side::Implement => self.config.implement_port,
        };
        let mut passed = Vec::new();
        for frame in from.drain_monitor(port) {
            let source_name = from
                .registry()
                .lookup_by_address(port, frame.id.source_address())
                .map(|cf| cf.name);
            let verdict = self.permits(frame.id.pgn(), source_name, side);
            self.count(verdict);
            if verdict {
                passed.push((frame, source_name));
            }
        }
        passed
    }

    fn advance(&mut self, dt_ms: u32) {
        self.now_ms += u64::from(dt_ms);
    }

    fn egress_port(&self, to_side: Side) -> u8 {
        match to_side {
            Side::Tractor => self.config.tractor_port,
            Side::Implement => self.config.implement_port,
        }
    }
}

/// Forward every frame bidirectionally, subject only to the filter DB.
pub struct Repeater {
    pub core: NiuCore,
}

impl Repeater {
    pub fn new(config: NiuConfig) -> Self {
        Self {
            core: NiuCore::new(config),
        }
    }

    /// Move pending traffic in both directions. Tractor-side frames are
    /// pumped first; each pump is atomic per frame.
    pub fn process(
        &mut self,
        tractor: &mut NetworkManager,
        implement: &mut NetworkManager,
        dt_ms: u32,
    ) {
        self.core.advance(dt_ms);
        if self.core.state() != NiuState::Active {
            return;
        }
        for (frame, _) in self.core.drain_side(tractor, Side::Tractor) {
            let _ = implement.send_raw_frame(self.core.egress_port(Side::Implement), &frame);
        }
        for (frame, _) in self.core.drain_side(implement, Side::Implement) {
            let _ = tractor.send_raw_frame(self.core.egress_port(Side::Tractor), &frame);
        }
    }
}

/// Learned location of one address.
#[derive(Debug, Clone, Copy)]
struct LearnedAddress {
    address: Address,
    side: Side,
    last_seen_ms: u64,
}

/// Address-to-side learning table with ageing.
#[derive(Default)]
pub struct LearningTable {
    entries: Vec<LearnedAddress>,
}

impl LearningTable {
    pub fn learn(&mut self, address: Address, side: Side, now_ms: u64) {
        match self.entries.iter().position(|entry| entry.address == address) {
            Some(index) => {
                self.entries[index].side = side;
                self.entries[index].last_seen_ms = now_ms;
            }
            None => self.entries.push(LearnedAddress {
                address,
                side,
                last_seen_ms: now_ms,
            }),
        }
    }

    pub fn lookup(&self, address: Address) -> Option<Side> {
        self.entries
            .iter()
            .find(|entry| entry.address == address)
            .map(|entry| entry.side)
    }

    pub fn purge_expired(&mut self, now_ms: u64) {
        self.entries
            .retain(|entry| now_ms.saturating_sub(entry.last_seen_ms) <= LEARNING_AGE_MS);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Repeater plus a learning table: destination-specific frames only cross
/// when the destination is not known to live on the originating side.
pub struct Bridge {
    pub core: NiuCore,
    pub learning: LearningTable,
}

impl Bridge {
    pub fn new(config: NiuConfig) -> Self {
        Self {
            core: NiuCore::new(config),
            learning: LearningTable::default(),
        }
    }

    pub fn learn_address(&mut self, address: Address, side: Side) {
        let now = self.core.now_ms;
        self.learning.learn(address, side, now);
    }

    pub fn lookup_address(&self, address: Address) -> Option<Side> {
        self.learning.lookup(address)
    }

    pub fn process(
        &mut self,
        tractor: &mut NetworkManager,
        implement: &mut NetworkManager,
        dt_ms: u32,
    ) {
        self.core.advance(dt_ms);
        if self.core.state() != NiuState::Active {
            return;
        }
        let now = self.core.now_ms;
        self.learning.purge_expired(now);

        for (from_side, to_side) in [(Side::Tractor, Side::Implement), (Side::Implement, Side::Tractor)] {
            let frames = match from_side {
                Side::Tractor => self.core.drain_side(tractor, from_side),
                Side::Implement => self.core.drain_side(implement, from_side),
            };
            for (frame, _) in frames {
                self.learning.learn(frame.id.source_address(), from_side, now);

                // Standard bridge semantics: cross unless the destination is
                // known to live on the originating side; flood the unknown.
                let destination = frame.id.destination();
                if destination != BROADCAST_ADDRESS
                    && self.learning.lookup(destination) == Some(from_side)
                {
                    continue;
                }
                let port = self.core.egress_port(to_side);
                let _ = match to_side {
                    Side::Tractor => tractor.send_raw_frame(port, &frame),
                    Side::Implement => implement.send_raw_frame(port, &frame),
                };
            }
        }
    }
}

/// Declared addresses for one NAME on both segments.
#[derive(Debug, Clone, Copy)]
pub struct TranslationEntry {
    pub name: Name,
    pub tractor_address: Address,
    pub implement_address: Address,
}

/// NAME-keyed address translation database.
#[derive(Default)]
pub struct TranslationDb {
    entries: Vec<TranslationEntry>,
}

impl TranslationDb {
    pub fn add(&mut self, name: Name, tractor_address: Address, implement_address: Address) {
        match self.entries.iter().position(|entry| entry.name == name) {
            Some(index) => {
                self.entries[index].tractor_address = tractor_address;
                self.entries[index].implement_address = implement_address;
            }
            None => self.entries.push(TranslationEntry {
                name,
                tractor_address,
                implement_address,
            }),
        }
    }

    pub fn entries(&self) -> &[TranslationEntry] {
        &self.entries
    }

    /// Rewrite `address` as seen from `from` into the opposite segment's
    /// address space. NULL when no entry covers it.
    pub fn translate(&self, address: Address, from: Side) -> Address {
        for entry in &self.entries {
            let (near, far) = match from {
                Side::Tractor => (entry.tractor_address, entry.implement_address),
                Side::Implement => (entry.implement_address, entry.tractor_address),
            };
            if near == address {
                return far;
            }
        }
        NULL_ADDRESS
    }

    /// Whether `address` is still unallocated on `side`.
    pub fn is_address_available(&self, address: Address, side: Side) -> bool {
        !self.entries.iter().any(|entry| match side {
            Side::Tractor => entry.tractor_address == address,
            Side::Implement => entry.implement_address == address,
        })
    }
}

/// Bridge-free forwarder with per-segment address spaces: crossing frames
/// are re-addressed through the translation table, untranslated ones drop.
pub struct Router {
    pub core: NiuCore,
    pub translations: TranslationDb,
}

impl Router {
    pub fn new(config: NiuConfig) -> Self {
        Self {
            core: NiuCore::new(config),
            translations: TranslationDb::default(),
        }
    }

    pub fn add_translation(
        &mut self,
        name: Name,
        tractor_address: Address,
        implement_address: Address,
    ) {
        self.translations
            .add(name, tractor_address, implement_address);
    }

    pub fn translation_db(&self) -> &TranslationDb {
        &self.translations
    }

    /// Re-address a crossing frame; `None` drops it.
    fn translate_frame(&self, frame: &Frame, from: Side) -> Option<Frame> {
        let source = self.translations.translate(frame.id.source_address(), from);
        if source == NULL_ADDRESS {
            return None;
        }
        let destination = frame.id.destination();
        let translated_destination = if destination == BROADCAST_ADDRESS {
            BROADCAST_ADDRESS
        } else {
            let far = self.translations.translate(destination, from);
            if far == NULL_ADDRESS {
                return None;
            }
            far
        };

        let pgn = frame.id.pgn();
        let pf = ((pgn >> 8) & 0xFF) as u8;
        let builder = CanId::builder(pgn, source).priority(frame.id.priority());
        let id = if pf >= 240 {
            builder.build().ok()?
        } else {
            builder.destination(translated_destination).build().ok()?
        };
        let mut out = Frame::new(id, frame.payload());
        out.timestamp_ms = frame.timestamp_ms;
        Some(out)
    }

    pub fn process(
        &mut self,
        tractor: &mut NetworkManager,
        implement: &mut NetworkManager,
        dt_ms: u32,
    ) {
        self.core.advance(dt_ms);
        if self.core.state() != NiuState::Active {
            return;
        }
        for (frame, _) in self.core.drain_side(tractor, Side::Tractor) {
            if let Some(out) = self.translate_frame(&frame, Side::Tractor) {
                let _ = implement.send_raw_frame(self.core.egress_port(Side::Implement), &out);
            }
        }
        for (frame, _) in self.core.drain_side(implement, Side::Implement) {
            if let Some(out) = self.translate_frame(&frame, Side::Implement) {
                let _ = tractor.send_raw_frame(self.core.egress_port(Side::Tractor), &out);
            }
        }
    }
}

/// Per-PGN message rework applied while a frame crosses the gateway.
/// Returning `None` swallows the message.
pub type MessageTransform = Box<dyn FnMut(&Message) -> Option<Message>>;

/// Router plus registered per-PGN transforms.
pub struct Gateway {
    pub router: Router,
    tractor_transforms: BTreeMap<u32, MessageTransform>,
    implement_transforms: BTreeMap<u32, MessageTransform>,
}

impl Gateway {
    pub fn new(config: NiuConfig) -> Self {
        Self {
            router: Router::new(config),
            tractor_transforms: BTreeMap::new(),
            implement_transforms: BTreeMap::new(),
        }
    }

    pub fn add_translation(
        &mut self,
        name: Name,
        tractor_address: Address,
        implement_address: Address,
    ) {
        self.router
            .add_translation(name, tractor_address, implement_address);
    }

    /// Transform applied to traffic leaving the tractor segment.
    pub fn register_tractor_transform<F>(&mut self, pgn: u32, transform: F)
    where
        F: FnMut(&Message) -> Option<Message> + 'static,
    {
        self.tractor_transforms.insert(pgn, Box::new(transform));
    }

    /// Transform applied to traffic leaving the implement segment.
    pub fn register_implement_transform<F>(&mut self, pgn: u32, transform: F)
    where
        F: FnMut(&Message) -> Option<Message> + 'static,
    {
        self.implement_transforms.insert(pgn, Box::new(transform));
    }

    fn rework(&mut self, frame: &Frame, from: Side) -> Option<Frame> {
        let transforms = match from {
            Side::Tractor => &mut self.tractor_transforms,
            Side::Implement => &mut self.implement_transforms,
        };
        let Some(transform) = transforms.get_mut(&frame.id.pgn()) else {
            return Some(*frame);
        };
        let message = Message::from_frame(frame);
        let reworked = transform(&message)?;
        let mut out = *frame;
        let mut data = [0xFF; crate::protocol::transport::frame::MAX_FRAME_DATA];
        let len = reworked.data.len().min(data.len());
        data[..len].copy_from_slice(&reworked.data[..len]);
        out.data = data;
        out.len = len as u8;
        Some(out)
    }

    pub fn process(
        &mut self,
        tractor: &mut NetworkManager,
        implement: &mut NetworkManager,
        dt_ms: u32,
    ) {
        self.router.core.advance(dt_ms);
        if self.router.core.state() != NiuState::Active {
            return;
        }
        for (frame, _) in self.router.core.drain_side(tractor, Side::Tractor) {
            let Some(reworked) = self.rework(&frame, Side::Tractor) else {
                continue;
            };
            if let Some(out) = self.router.translate_frame(&reworked, Side::Tractor) {
                let _ = implement
                    .send_raw_frame(self.router.core.egress_port(Side::Implement), &out);
            }
        }
        for (frame, _) in self.router.core.drain_side(implement, Side::Implement) {
            let Some(reworked) = self.rework(&frame, Side::Implement) else {
                continue;
            };
            if let Some(out) = self.router.translate_frame(&reworked, Side::Implement) {
                let _ = tractor.send_raw_frame(self.router.core.egress_port(Side::Tractor), &out);
            }
        }
    }
}

/// Interconnect management functions (PGN 60672).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NiuFunction {
    #[default]
    AddFilterEntry,
    DeleteFilterEntry,
    SetFilterMode,
    PortStatsRequest,
    PortStatsResponse,
}

impl NiuFunction {
    fn to_wire(self) -> u8 {
        match self {
            Self::AddFilterEntry => 0,
            Self::DeleteFilterEntry => 1,
            Self::SetFilterMode => 2,
            Self::PortStatsRequest => 3,
            Self::PortStatsResponse => 4,
        }
    }

    fn from_wire(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::AddFilterEntry),
            1 => Some(Self::DeleteFilterEntry),
            2 => Some(Self::SetFilterMode),
            3 => Some(Self::PortStatsRequest),
            4 => Some(Self::PortStatsResponse),
            _ => None,
        }
    }
}

/// Interconnect management message body. Fields beyond the function's own
/// are left at their defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NiuNetworkMessage {
    pub function: NiuFunction,
    pub port_number: u8,
    pub filter_pgn: u32,
    pub filter_mode: NiuFilterMode,
    pub msgs_forwarded: u16,
    pub msgs_blocked: u16,
}

impl NiuNetworkMessage {
    pub fn encode(&self) -> [u8; 8] {
        let mut out = [0xFF; 8];
        out[0] = self.function.to_wire();
        out[1] = self.port_number;
        match self.function {
            NiuFunction::AddFilterEntry | NiuFunction::DeleteFilterEntry => {
                out[2] = (self.filter_pgn & 0xFF) as u8;
                out[3] = ((self.filter_pgn >> 8) & 0xFF) as u8;
                out[4] = ((self.filter_pgn >> 16) & 0xFF) as u8;
            }
            NiuFunction::SetFilterMode => {
                out[2] = match self.filter_mode {
                    NiuFilterMode::PassAll => 0,
                    NiuFilterMode::BlockAll => 1,
                };
            }
            NiuFunction::PortStatsRequest => {}
            NiuFunction::PortStatsResponse => {
                out[2] = (self.msgs_forwarded & 0xFF) as u8;
                out[3] = (self.msgs_forwarded >> 8) as u8;
                out[4] = (self.msgs_blocked & 0xFF) as u8;
                out[5] = (self.msgs_blocked >> 8) as u8;
            }
        }
        out
    }

    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() < 8 {
            return None;
        }
        let function = NiuFunction::from_wire(data[0])?;
        let mut message = NiuNetworkMessage {
            function,
            port_number: data[1],
            ..Default::default()
        };
        match function {
            NiuFunction::AddFilterEntry | NiuFunction::DeleteFilterEntry => {
                message.filter_pgn = u32::from(data[2])
                    | (u32::from(data[3]) << 8)
                    | (u32::from(data[4]) << 16);
            }
            NiuFunction::SetFilterMode => {
                message.filter_mode = if data[2] == 1 {
                    NiuFilterMode::BlockAll
                } else {
                    NiuFilterMode::PassAll
                };
            }
            NiuFunction::PortStatsRequest => {}
            NiuFunction::PortStatsResponse => {
                message.msgs_forwarded = u16::from(data[2]) | (u16::from(data[3]) << 8);
                message.msgs_blocked = u16::from(data[4]) | (u16::from(data[5]) << 8);
            }
        }
        Some(message)
    }
}

#[cfg(test)]
#[path = "niu_tests.rs"]
mod tests;
