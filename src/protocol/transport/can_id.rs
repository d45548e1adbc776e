//! Creation and extraction of the 29-bit CAN identifiers defined by
//! SAE J1939 and carried unchanged by ISO 11783.
use crate::error::IdentifierError;
use crate::protocol::{Address, BROADCAST_ADDRESS};

use embedded_can::ExtendedId;

/// PDU-format boundary: PF below this is destination-specific (PDU1), at or
/// above it the PS byte is a group extension (PDU2).
const PDU2_THRESHOLD: u8 = 240;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// Encapsulates an extended CAN identifier (29 bits) and exposes accessors
/// for priority, PGN, destination, and source.
pub struct CanId(pub u32);

impl CanId {
    /// Creates a pre-configured [`CanIdBuilder`] for a PGN and source address.
    pub fn builder(pgn: u32, source_address: Address) -> CanIdBuilder {
        CanIdBuilder::new(pgn, source_address)
    }

    pub const fn from_raw(raw: u32) -> Self {
        Self(raw & 0x1FFF_FFFF)
    }

    pub const fn raw(&self) -> u32 {
        self.0
    }

    /// Returns the priority (3 bits, 0 = highest) encoded in bits 26-28.
    pub fn priority(&self) -> u8 {
        ((self.0 >> 26) & 0x07) as u8
    }

    /// Extracts the 18-bit PGN, handling the PDU1/PDU2 distinction.
    pub fn pgn(&self) -> u32 {
        let ps = (self.0 >> 8) & 0xFF;
        let pf = (self.0 >> 16) & 0xFF;
        let dp = (self.0 >> 24) & 0x01;
        let r = (self.0 >> 25) & 0x01;

        if pf as u8 >= PDU2_THRESHOLD {
            // PDU2: PS is a group extension and belongs to the PGN.
            (r << 17) | (dp << 16) | (pf << 8) | ps
        } else {
            // PDU1: PS is the destination address.
            (r << 17) | (dp << 16) | (pf << 8)
        }
    }

    /// Destination address: the PS byte for PDU1 groups, the global address
    /// for PDU2 groups.
    pub fn destination(&self) -> Address {
        let pf = ((self.0 >> 16) & 0xFF) as u8;
        if pf >= PDU2_THRESHOLD {
            BROADCAST_ADDRESS
        } else {
            ((self.0 >> 8) & 0xFF) as u8
        }
    }

    /// Eight-bit source address of the emitting control function.
    pub fn source_address(&self) -> Address {
        (self.0 & 0xFF) as u8
    }

    /// View as the `embedded-can` extended-identifier type for HAL drivers.
    pub fn extended_id(&self) -> ExtendedId {
        // A value masked to 29 bits is always a valid extended identifier.
        ExtendedId::new(self.0 & 0x1FFF_FFFF)
            .expect("a 29-bit value is always a valid extended identifier")
    }
}

impl From<ExtendedId> for CanId {
    fn from(id: ExtendedId) -> Self {
        Self::from_raw(id.as_raw())
    }
}

#[derive(Debug)]
/// Fluent builder that enforces the PDU1/PDU2 rules.
pub struct CanIdBuilder {
    priority: u8,
    pgn: u32,
    source_address: Address,
    destination: Option<Address>,
}

impl CanIdBuilder {
    pub fn new(pgn: u32, source_address: Address) -> Self {
        Self {
            priority: crate::protocol::DEFAULT_PRIORITY,
            pgn,
            source_address,
            destination: None,
        }
    }

    /// Sets the priority (3 bits) to use during construction.
    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = priority & 0x07;
        self
    }

    /// Assigns a destination address. Required for PDU1 groups; a broadcast
    /// destination is accepted for either format.
    pub fn destination(mut self, destination: Address) -> Self {
        self.destination = Some(destination);
        self
    }

    /// Builds the identifier while applying the J1939 rules:
    /// - PF < 240 (PDU1): a destination is mandatory and the PGN PS byte must
    ///   be zero; the destination lands in the PS position.
    /// - PF >= 240 (PDU2): no destination other than broadcast is accepted.
    pub fn build(self) -> Result<CanId, IdentifierError> {
        if self.pgn > 0x3FFFF {
            return Err(IdentifierError::GroupOutOfRange { pgn: self.pgn });
        }

        let r = (self.pgn >> 17) & 0x01;
        let dp = (self.pgn >> 16) & 0x01;
        let pf = ((self.pgn >> 8) & 0xFF) as u8;
        let ps = (self.pgn & 0xFF) as u8;

        let pdu_specific = if pf >= PDU2_THRESHOLD {
            match self.destination {
                None | Some(BROADCAST_ADDRESS) => ps,
                Some(_) => return Err(IdentifierError::DestinationForbidden { pgn: self.pgn }),
            }
        } else {
            if ps != 0 {
                return Err(IdentifierError::NonZeroPduSpecific);
            }
            match self.destination {
                Some(destination) => destination,
                None => return Err(IdentifierError::DestinationRequired { pgn: self.pgn }),
            }
        };

        let raw = ((self.priority as u32) << 26)
            | (r << 25)
            | (dp << 24)
            | ((pf as u32) << 16)
            | ((pdu_specific as u32) << 8)
            | (self.source_address as u32);
        Ok(CanId(raw))
    }
}
