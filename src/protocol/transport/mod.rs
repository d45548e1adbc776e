//! Transport layer: CAN frame representations, 29-bit identifier management,
//! multi-frame transport protocol (TP and ETP), and the bus abstraction trait.
//!
//! ## ISO 11783-3 timing constants
//!
//! The transport timers below bound every phase of a connection-mode
//! transfer. A violated timer aborts the session with
//! [`AbortReason::Timeout`](crate::error::AbortReason::Timeout).

pub mod can_id;
pub mod cm;
pub mod frame;
pub mod link;
pub mod session;
pub mod tp;

/// Payload bytes carried by one TP/ETP data-transfer frame.
pub const BYTES_PER_PACKET: usize = 7;

/// Largest payload that fits a single frame on a classical bus.
pub const MAX_SINGLE_FRAME_PAYLOAD: usize = 8;

/// Largest payload TP can carry (255 packets of 7 bytes).
pub const MAX_TP_PAYLOAD: u32 = 1785;

/// Largest payload ETP can carry.
pub const MAX_ETP_PAYLOAD: u32 = 117_440_512;

/// Receiver inter-packet timeout (T1).
pub const T1_INTER_PACKET_MS: u32 = 750;

/// Receiver wait-for-first-packet-after-CTS timeout (T2).
pub const T2_CTS_TO_DATA_MS: u32 = 1250;

/// Sender wait-for-CTS/EOMA timeout (T3).
pub const T3_RESPONSE_MS: u32 = 1250;

/// Sender wait-for-next-CTS after a window timeout (T4).
pub const T4_HOLD_CTS_MS: u32 = 1050;

/// Sender hold between connection-mode windows (Th). A receiver parking the
/// connection with CTS(0) must refresh the hold, or grant a window, within
/// this time.
pub const TH_WINDOW_HOLD_MS: u32 = 500;

/// Minimum spacing between broadcast (BAM) data packets.
pub const BAM_PACKET_GAP_MS: u32 = 50;
