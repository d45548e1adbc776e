//! Control-function registry: the authoritative record of every node we own
//! (internal), observe on the bus (external), or want to bind to by NAME
//! (partnered). Everything else in the stack refers to registry entries
//! through stable integer handles and must tolerate a handle that no longer
//! resolves.
use crate::infra::event::Event;
use crate::protocol::management::address_claim::{AddressClaimer, ClaimState};
use crate::protocol::management::name::{matches_all, Name, NameFilter};
use crate::protocol::{Address, MAX_ADDRESS, NULL_ADDRESS};

use alloc::vec::Vec;

/// External control functions silent for this long are marked offline.
pub const EXTERNAL_OFFLINE_TIMEOUT_MS: u64 = 5000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CfKind {
    Internal,
    External,
    Partnered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CfState {
    Online,
    Offline,
}

/// Handle to an internal control function. Stable for the life of the
/// registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InternalCfHandle(pub(crate) usize);

/// Handle to a partnered control function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PartnerHandle(pub(crate) usize);

/// Base identity shared by every control-function flavour.
#[derive(Debug, Clone, Copy)]
pub struct ControlFunction {
    pub name: Name,
    pub address: Address,
    pub port: u8,
    pub kind: CfKind,
    pub state: CfState,
}

impl ControlFunction {
    pub fn address_valid(&self) -> bool {
        self.address <= MAX_ADDRESS
    }

    pub fn is_online(&self) -> bool {
        self.state == CfState::Online
    }
}

/// A control function owned by this node, together with its claim machine.
pub struct InternalCf {
    pub cf: ControlFunction,
    pub claimer: AddressClaimer,
    pub on_address_claimed: Event<Address>,
}

impl InternalCf {
    /// Claimed address, NULL while arbitration is unfinished.
    pub fn address(&self) -> Address {
        self.claimer.claimed_address()
    }

    pub fn claim_state(&self) -> ClaimState {
        self.claimer.state()
    }
}

/// A control function observed on the bus.
#[derive(Debug, Clone, Copy)]
pub struct ExternalCf {
    pub cf: ControlFunction,
    /// Timestamp of the last traffic heard from this node.
    pub last_seen_ms: u64,
}

/// An external control function the application wants to bind to through a
/// NAME filter set.
pub struct PartnerCf {
    pub cf: ControlFunction,
    pub filters: Vec<NameFilter>,
    pub on_partner_found: Event<Address>,
    pub on_partner_lost: Event<()>,
}

impl PartnerCf {
    pub fn matches_name(&self, name: Name) -> bool {
        matches_all(&self.filters, name)
    }
}

/// Registry of all control functions known on this node.
///
/// Invariant: no two entries on the same port hold the same non-NULL
/// address. The registry is authoritative; dispatch consults it, never the
/// other way around.
#[derive(Default)]
pub struct Registry {
    internals: Vec<Option<InternalCf>>,
    externals: Vec<Option<ExternalCf>>,
    partners: Vec<Option<PartnerCf>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an internal control function with its preferred address.
    pub fn create_internal(
        &mut self,
        name: Name,
        port: u8,
        preferred_address: Address,
        rtxd_ms: u32,
    ) -> Result<InternalCfHandle, crate::error::NetworkError> {
        if preferred_address > MAX_ADDRESS {
            return Err(crate::error::NetworkError::AddressRange {
                address: preferred_address,
            });
        }
        let duplicate = self.internals.iter().flatten().any(|internal| {
            internal.cf.port == port && internal.claimer.candidate_address() == preferred_address
        });
        if duplicate {
            return Err(crate::error::NetworkError::Duplicate {
                address: preferred_address,
                port,
            });
        }

        let entry = InternalCf {
            cf: ControlFunction {
                name,
                address: NULL_ADDRESS,
                port,
                kind: CfKind::Internal,
                state: CfState::Offline,
            },
            claimer: AddressClaimer::with_rtxd(name, preferred_address, rtxd_ms),
            on_address_claimed: Event::new(),
        };
        self.internals.push(Some(entry));
        Ok(InternalCfHandle(self.internals.len() - 1))
    }

    /// Release an internal control function. The handle goes stale.
    pub fn destroy_internal(&mut self, handle: InternalCfHandle) -> Option<InternalCf> {
        self.internals.get_mut(handle.0)?.take()
    }

    pub fn internal(&self, handle: InternalCfHandle) -> Option<&InternalCf> {
        self.internals.get(handle.0)?.as_ref()
    }

    pub fn internal_mut(&mut self, handle: InternalCfHandle) -> Option<&mut InternalCf> {
        self.internals.get_mut(handle.0)?.as_mut()
    }

    pub fn internal_handles(&self) -> Vec<InternalCfHandle> {
        self.internals
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|_| InternalCfHandle(index)))
            .collect()
    }

    pub fn internal_count(&self) -> usize {
        self.internals.iter().flatten().count()
    }

    /// Whether `address` is claimed by one of our internal CFs on `port`.
    pub fn is_internal_address(&self, port: u8, address: Address) -> bool {
        self.internals.iter().flatten().any(|internal| {
            internal.cf.port == port
                && internal.claim_state() == ClaimState::Claimed
                && internal.address() == address
        })
    }

    /// Register a partner recognized through `filters`.
    pub fn create_partner(&mut self, port: u8, filters: Vec<NameFilter>) -> PartnerHandle {
        let entry = PartnerCf {
            cf: ControlFunction {
                name: Name::from_raw(0),
                address: NULL_ADDRESS,
                port,
                kind: CfKind::Partnered,
                state: CfState::Offline,
            },
            filters,
            on_partner_found: Event::new(),
            on_partner_lost: Event::new(),
        };
        self.partners.push(Some(entry));
        PartnerHandle(self.partners.len() - 1)
    }

    pub fn partner(&self, handle: PartnerHandle) -> Option<&PartnerCf> {
        self.partners.get(handle.0)?.as_ref()
    }

    pub fn partner_mut(&mut self, handle: PartnerHandle) -> Option<&mut PartnerCf> {
        self.partners.get_mut(handle.0)?.as_mut()
    }

    pub fn partner_count(&self) -> usize {
        self.partners.iter().flatten().count()
    }

    /// Record an address claim observed on the bus.
    ///
    /// A cannot-claim (NULL source) marks the node offline. Claims keyed by
    /// NAME update the existing entry when the node moved; a node that lost
    /// its address to the claimant is displaced to NULL.
    pub fn observe_claim(&mut self, port: u8, address: Address, name: Name, now_ms: u64) {
        if address == NULL_ADDRESS {
            // Cannot-claim: the node announced it holds no address.
            if let Some(entry) = self
                .externals
                .iter_mut()
                .flatten()
                .find(|external| external.cf.port == port && external.cf.name == name)
            {
                entry.cf.address = NULL_ADDRESS;
                entry.cf.state = CfState::Offline;
                entry.last_seen_ms = now_ms;
            }
            self.unbind_partners_of(port, name);
            return;
        }

        // Displace whoever held the address before.
        for external in self.externals.iter_mut().flatten() {
            if external.cf.port == port
                && external.cf.address == address
                && external.cf.name != name
            {
                external.cf.address = NULL_ADDRESS;
                external.cf.state = CfState::Offline;
            }
        }

        let known = self.externals.iter().position(|slot| {
            slot.as_ref()
                .is_some_and(|external| external.cf.port == port && external.cf.name == name)
        });
        match known {
            Some(index) => {
                if let Some(existing) = self.externals[index].as_mut() {
                    existing.cf.address = address;
                    existing.cf.state = CfState::Online;
                    existing.last_seen_ms = now_ms;
                }
            }
            None => {
                self.externals.push(Some(ExternalCf {
                    cf: ControlFunction {
                        name,
                        address,
                        port,
                        kind: CfKind::External,
                        state: CfState::Online,
                    },
                    last_seen_ms: now_ms,
                }));
            }
        }

        self.bind_partners(port, address, name);
    }

    /// Refresh the liveness stamp of the node at `address`.
    pub fn touch(&mut self, port: u8, address: Address, now_ms: u64) {
        if let Some(external) = self
            .externals
            .iter_mut()
            .flatten()
            .find(|external| external.cf.port == port && external.cf.address == address)
        {
            external.last_seen_ms = now_ms;
        }
    }

    /// Resolve the node currently holding `address` on `port`.
    pub fn lookup_by_address(&self, port: u8, address: Address) -> Option<ControlFunction> {
        if address == NULL_ADDRESS {
            return None;
        }
        for internal in self.internals.iter().flatten() {
            if internal.cf.port == port && internal.address() == address {
                let mut cf = internal.cf;
                cf.address = address;
                cf.state = CfState::Online;
                return Some(cf);
            }
        }
        self.externals
            .iter()
            .flatten()
            .find(|external| external.cf.port == port && external.cf.address == address)
            .map(|external| external.cf)
    }

    /// Resolve a node by its NAME, internal entries first.
    pub fn lookup_by_name(&self, name: Name) -> Option<ControlFunction> {
        for internal in self.internals.iter().flatten() {
            if internal.cf.name == name {
                let mut cf = internal.cf;
                cf.address = internal.address();
                return Some(cf);
            }
        }
        self.externals
            .iter()
            .flatten()
            .find(|external| external.cf.name == name)
            .map(|external| external.cf)
    }

    pub fn external_count(&self) -> usize {
        self.externals.iter().flatten().count()
    }

    /// Expire externals that have been silent too long; bound partners hear
    /// about the loss.
    pub fn update(&mut self, now_ms: u64) {
        let mut lost: Vec<(u8, Name)> = Vec::new();
        for external in self.externals.iter_mut().flatten() {
            if external.cf.state == CfState::Online
                && now_ms.saturating_sub(external.last_seen_ms) > EXTERNAL_OFFLINE_TIMEOUT_MS
            {
                log::debug!(
                    "registry: external {:#04x} on port {} went silent",
                    external.cf.address,
                    external.cf.port
                );
                external.cf.state = CfState::Offline;
                lost.push((external.cf.port, external.cf.name));
            }
        }
        for (port, name) in lost {
            self.unbind_partners_of(port, name);
        }
    }

    /// Bind matching partners to a freshly claimed external.
    fn bind_partners(&mut self, port: u8, address: Address, name: Name) {
        for partner in self.partners.iter_mut().flatten() {
            if partner.cf.port != port || !partner.matches_name(name) {
                continue;
            }
            let rebound = partner.cf.state != CfState::Online || partner.cf.address != address;
            partner.cf.name = name;
            partner.cf.address = address;
            partner.cf.state = CfState::Online;
            if rebound {
                partner.on_partner_found.emit(&address);
            }
        }
    }

    /// Detach partners bound to `name` after it left the bus.
    fn unbind_partners_of(&mut self, port: u8, name: Name) {
        for partner in self.partners.iter_mut().flatten() {
            if partner.cf.port == port
                && partner.cf.state == CfState::Online
                && partner.cf.name == name
            {
                partner.cf.state = CfState::Offline;
                partner.cf.address = NULL_ADDRESS;
                partner.on_partner_lost.emit(&());
            }
        }
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
