//! Error definitions shared across library modules.
//! Each type models a specific failure scenario (CAN identifier construction,
//! network management, transport sessions, segment interconnect).
use thiserror_no_std::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
/// Errors that can occur while building or decoding a 29-bit CAN identifier.
pub enum IdentifierError {
    /// Attempt to build a broadcast identifier from a destination-specific
    /// (PDU1) parameter group.
    #[error("PDU1 group {pgn} requires a destination address")]
    DestinationRequired { pgn: u32 },
    /// Attempt to address a broadcast-only (PDU2) parameter group.
    #[error("PDU2 group {pgn} cannot carry a destination address")]
    DestinationForbidden { pgn: u32 },
    /// In PDU1 the low byte of the parameter group must remain zero.
    #[error("PDU1 group requires PS = 0")]
    NonZeroPduSpecific,
    /// The parameter group number does not fit in 18 bits.
    #[error("Parameter group {pgn} exceeds 18 bits")]
    GroupOutOfRange { pgn: u32 },
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
/// Errors surfaced by the network manager and the control-function registry.
pub enum NetworkError {
    /// Requested preferred address is outside the claimable range.
    #[error("Address {address:#04x} is outside the claimable range")]
    AddressRange { address: u8 },
    /// A control function is already registered at that address.
    #[error("Address {address:#04x} already registered on port {port}")]
    Duplicate { address: u8, port: u8 },
    /// Send attempted before the source control function finished claiming.
    #[error("Control function has not claimed an address")]
    NotClaimed,
    /// The port index exceeds the configured port count.
    #[error("Port {port} is not configured")]
    PortRange { port: u8 },
    /// No link endpoint is bound to the port.
    #[error("No link bound to port {port}")]
    NoLink { port: u8 },
    /// The link refused a frame.
    #[error("Link rejected the frame")]
    LinkFailure,
    /// Decode found a length or field inconsistency.
    #[error("Malformed message")]
    InvalidMessage,
    /// The active DTC table reached its fixed capacity.
    #[error("Active DTC table is full")]
    DtcTableFull,
    /// The control-function handle no longer resolves to a registry entry.
    #[error("Stale control-function handle")]
    StaleHandle,
    /// Unable to build the CAN identifier.
    #[error(transparent)]
    Identifier(#[from] IdentifierError),
    /// The transport layer rejected or aborted the transfer.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Wire-level connection abort reasons (J1939-21 TP.CM_Abort byte 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AbortReason {
    None = 0,
    Timeout = 1,
    AlreadyInSession = 2,
    ResourcesUnavailable = 3,
    BadSequence = 4,
    UnexpectedDataSize = 5,
    DuplicateSequence = 6,
    MaxRetransmitsExceeded = 7,
    UnexpectedPgn = 8,
    ConnectionModeError = 9,
}

impl AbortReason {
    /// Decode the wire byte; unknown codes collapse to `None`.
    pub fn from_wire(raw: u8) -> Self {
        match raw {
            1 => Self::Timeout,
            2 => Self::AlreadyInSession,
            3 => Self::ResourcesUnavailable,
            4 => Self::BadSequence,
            5 => Self::UnexpectedDataSize,
            6 => Self::DuplicateSequence,
            7 => Self::MaxRetransmitsExceeded,
            8 => Self::UnexpectedPgn,
            9 => Self::ConnectionModeError,
            _ => Self::None,
        }
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
/// Errors raised by the transport protocol session layer.
pub enum TransportError {
    /// The session table is full; no new connection can open.
    #[error("Session table is full")]
    SessionLimit,
    /// A session with the same identity already exists.
    #[error("Already in a session with this peer")]
    AlreadyInSession,
    /// Payload size outside what TP/ETP can carry.
    #[error("Payload of {bytes} bytes cannot be transported")]
    PayloadSize { bytes: u32 },
    /// The peer (or a timer) aborted the connection.
    #[error("Connection aborted: {0:?}")]
    Aborted(AbortReason),
    /// A control message failed to decode.
    #[error("Malformed connection-management frame")]
    MalformedControl,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
/// Errors surfaced by a CAN link endpoint.
pub enum LinkError {
    /// The controller refused the frame (full mailbox, bus-off, ...).
    #[error("Link rejected the frame")]
    Rejected,
    /// The endpoint is not usable.
    #[error("Link is down")]
    Down,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
/// Errors raised while configuring or attaching a network interconnect unit.
pub enum NiuError {
    /// The same address is claimed on both segments.
    #[error("Address {address:#04x} exists on both segments")]
    AddressConflict { address: u8 },
    /// Both sides must be attached before the unit can start.
    #[error("Both segments must be attached")]
    NotAttached,
    /// The filter table reached its fixed capacity.
    #[error("Filter table is full")]
    FilterTableFull,
}
