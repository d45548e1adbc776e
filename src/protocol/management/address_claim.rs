//! SAE J1939 / ISO 11783-5 address-claim state machine: emit PGN 60928,
//! listen for contesting claims during the guard window, and either defend
//! the address, move to another one, or give up.
//!
//! The machine is poll-driven. Frames it wants on the wire are pushed into
//! the buffer the caller provides; time advances only through
//! [`AddressClaimer::update`].
use crate::protocol::management::name::Name;
use crate::protocol::transport::can_id::CanId;
use crate::protocol::transport::frame::Frame;
use crate::protocol::{
    Address, ARBITRARY_ADDRESS_END, ARBITRARY_ADDRESS_START, BROADCAST_ADDRESS, NULL_ADDRESS,
    PGN_ADDRESS_CLAIM, PGN_REQUEST,
};

use alloc::vec::Vec;

/// Guard window after a claim during which contests are resolved.
pub const ADDRESS_CLAIM_TIMEOUT_MS: u32 = 250;

/// Upper bound on claim attempts before the machine gives up; covers the
/// whole self-configurable range plus the preferred address.
const MAX_CLAIM_ATTEMPTS: u16 = 254;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ClaimState {
    /// Not started.
    None,
    /// Claim emitted; listening for a higher-priority contender.
    WaitForContest,
    /// Address won and defended.
    Claimed,
    /// No claimable address left (or not self-configurable and outbid).
    Failed,
}

/// Per-control-function address claim machine.
#[derive(Debug)]
pub struct AddressClaimer {
    name: Name,
    preferred_address: Address,
    /// Current candidate (or held) address.
    current_address: Address,
    state: ClaimState,
    timer_ms: u32,
    /// Random-transmit-delay budget applied to re-claims after a lost
    /// contest, to de-synchronize colliding contenders.
    rtxd_ms: u32,
    /// Remaining delay before the deferred re-claim leaves.
    pending_delay_ms: u32,
    pending_claim: bool,
    attempts: u16,
}

impl AddressClaimer {
    pub fn new(name: Name, preferred_address: Address) -> Self {
        Self::with_rtxd(name, preferred_address, 0)
    }

    /// `rtxd_ms` of zero re-claims immediately on a lost contest.
    pub fn with_rtxd(name: Name, preferred_address: Address, rtxd_ms: u32) -> Self {
        Self {
            name,
            preferred_address,
            current_address: preferred_address,
            state: ClaimState::None,
            timer_ms: 0,
            rtxd_ms,
            pending_delay_ms: 0,
            pending_claim: false,
            attempts: 0,
        }
    }

    pub fn state(&self) -> ClaimState {
        self.state
    }

    pub fn name(&self) -> Name {
        self.name
    }

    /// The address currently held. NULL until the claim completes.
    pub fn claimed_address(&self) -> Address {
        if self.state == ClaimState::Claimed {
            self.current_address
        } else {
            NULL_ADDRESS
        }
    }

    /// The address the machine is presently contending for.
    pub fn candidate_address(&self) -> Address {
        self.current_address
    }

    /// Begin arbitration: request the address-claim group from everyone, then
    /// announce our own claim and arm the guard window.
    pub fn start(&mut self, out: &mut Vec<Frame>) {
        self.current_address = self.preferred_address;
        self.attempts = 1;
        out.push(request_for_claim_frame());
        out.push(claim_frame(self.name, self.current_address));
        self.state = ClaimState::WaitForContest;
        self.timer_ms = 0;
        self.pending_claim = false;
    }

    /// Another claim was observed at `address`. Returns `true` when the
    /// contest changed our state (the caller re-checks `claimed_address`).
    pub fn handle_claim(&mut self, address: Address, other: Name, out: &mut Vec<Frame>) -> bool {
        if address != self.current_address || other == self.name {
            return false;
        }
        if !matches!(self.state, ClaimState::WaitForContest | ClaimState::Claimed) {
            return false;
        }

        if other < self.name {
            // The contender outranks us.
            log::debug!(
                "address claim: lost {:#04x} to NAME {:#018x}",
                self.current_address,
                other.raw()
            );
            if self.name.is_self_configurable() {
                self.move_to_next_address(out);
            } else {
                out.push(cannot_claim_frame(self.name));
                self.current_address = NULL_ADDRESS;
                self.state = ClaimState::Failed;
            }
            true
        } else {
            // We outrank the contender: assert the claim again.
            out.push(claim_frame(self.name, self.current_address));
            self.state = ClaimState::WaitForContest;
            self.timer_ms = 0;
            true
        }
    }

    /// Advance timers. Returns the address when the guard window closes and
    /// the claim becomes final.
    pub fn update(&mut self, dt_ms: u32, out: &mut Vec<Frame>) -> Option<Address> {
        if self.pending_claim {
            if self.pending_delay_ms > dt_ms {
                self.pending_delay_ms -= dt_ms;
                return None;
            }
            self.pending_delay_ms = 0;
            self.pending_claim = false;
            out.push(claim_frame(self.name, self.current_address));
            self.state = ClaimState::WaitForContest;
            self.timer_ms = 0;
            return None;
        }

        if self.state != ClaimState::WaitForContest {
            return None;
        }
        self.timer_ms += dt_ms;
        if self.timer_ms < ADDRESS_CLAIM_TIMEOUT_MS {
            return None;
        }
        self.state = ClaimState::Claimed;
        Some(self.current_address)
    }

    /// Pick the next candidate and schedule the re-claim, honouring RTxD.
    fn move_to_next_address(&mut self, out: &mut Vec<Frame>) {
        if self.attempts >= MAX_CLAIM_ATTEMPTS {
            out.push(cannot_claim_frame(self.name));
            self.current_address = NULL_ADDRESS;
            self.state = ClaimState::Failed;
            return;
        }
        self.attempts += 1;
        self.current_address = match self.current_address {
            address if address >= ARBITRARY_ADDRESS_END => ARBITRARY_ADDRESS_START,
            address => address + 1,
        };
        if self.rtxd_ms > 0 {
            // Contending again, but the announcement waits out the delay.
            self.pending_claim = true;
            self.pending_delay_ms = self.rtxd_ms;
            self.state = ClaimState::WaitForContest;
            self.timer_ms = 0;
        } else {
            out.push(claim_frame(self.name, self.current_address));
            self.state = ClaimState::WaitForContest;
            self.timer_ms = 0;
        }
    }
}

/// Address claim announcement (PGN 60928) for `name` at `address`.
pub fn claim_frame(name: Name, address: Address) -> Frame {
    let id = CanId::builder(PGN_ADDRESS_CLAIM, address)
        .destination(BROADCAST_ADDRESS)
        .priority(6)
        .build()
        .expect("the address-claim identifier is always well-formed");
    Frame::new(id, &name.to_le_bytes())
}

/// Cannot-claim announcement: a claim carrying the NULL source address.
pub fn cannot_claim_frame(name: Name) -> Frame {
    claim_frame(name, NULL_ADDRESS)
}

/// Global request for the address-claim parameter group (PGN 59904 asking
/// for PGN 60928), sent from the NULL address before we hold one.
pub fn request_for_claim_frame() -> Frame {
    let id = CanId::builder(PGN_REQUEST, NULL_ADDRESS)
        .destination(BROADCAST_ADDRESS)
        .priority(6)
        .build()
        .expect("the request identifier is always well-formed");
    let pgn = PGN_ADDRESS_CLAIM;
    let payload = [
        (pgn & 0xFF) as u8,
        ((pgn >> 8) & 0xFF) as u8,
        ((pgn >> 16) & 0xFF) as u8,
    ];
    Frame::new(id, &payload)
}

#[cfg(test)]
#[path = "address_claim_tests.rs"]
mod tests;
