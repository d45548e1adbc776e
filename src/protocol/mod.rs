//! ISO 11783 protocol layers: transport primitives, address and
//! control-function management, the network manager hub, diagnostics, and the
//! network interconnect unit.
pub mod diagnostic;
pub mod management;
pub mod manager;
pub mod niu;
pub mod transport;

/// 8-bit source/destination address on a network segment.
pub type Address = u8;

/// Address of a node that has not (or could not) claim an address.
pub const NULL_ADDRESS: Address = 0xFE;

/// The global destination address.
pub const BROADCAST_ADDRESS: Address = 0xFF;

/// Highest claimable address.
pub const MAX_ADDRESS: Address = 0xFD;

/// First address of the self-configurable (arbitrary) range.
pub const ARBITRARY_ADDRESS_START: Address = 0x80;

/// Last address of the self-configurable (arbitrary) range.
pub const ARBITRARY_ADDRESS_END: Address = 0xF7;

/// PGN Request (J1939-21).
pub const PGN_REQUEST: u32 = 0xEA00;

/// Acknowledgement (J1939-21).
pub const PGN_ACKNOWLEDGEMENT: u32 = 0xE800;

/// Address Claim (ISO 11783-5).
pub const PGN_ADDRESS_CLAIM: u32 = 0xEE00;

/// Transport Protocol connection management.
pub const PGN_TP_CM: u32 = 0xEC00;

/// Transport Protocol data transfer.
pub const PGN_TP_DT: u32 = 0xEB00;

/// Extended Transport Protocol connection management.
pub const PGN_ETP_CM: u32 = 0xCA00;

/// Extended Transport Protocol data transfer.
pub const PGN_ETP_DT: u32 = 0xCB00;

/// Active diagnostic trouble codes (DM1, J1939-73).
pub const PGN_DM1: u32 = 0xFECA;

/// Previously active diagnostic trouble codes (DM2).
pub const PGN_DM2: u32 = 0xFECB;

/// Diagnostic data clear command (DM11).
pub const PGN_DM11: u32 = 0xFED3;

/// Stop/start broadcast command (DM13).
pub const PGN_DM13: u32 = 0xE000;

/// Network interconnect unit management message (ISO 11783-4).
pub const PGN_NIU_NETWORK: u32 = 0xED00;

/// Default priority for informational parameter groups.
pub const DEFAULT_PRIORITY: u8 = 6;
