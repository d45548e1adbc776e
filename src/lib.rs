//! `isobus-core` library: the ISO 11783 / SAE J1939 core protocol engine for
//! agricultural vehicle networks in a `no_std` + `alloc` environment. The
//! crate exposes the infrastructure modules (events, scheduling, bus-load
//! measurement), the protocol logic (address claiming, transport sessions,
//! network management, diagnostics), and the network interconnect unit that
//! bridges two bus segments.
//!
//! The engine is single-threaded and cooperative: the host calls
//! [`protocol::manager::NetworkManager::update`] with elapsed milliseconds
//! and every timer, callback, and state machine runs on that call stack. No
//! clock, thread, or socket lives inside the crate.
#![no_std]

extern crate alloc;

/// Domain and wire-level errors (identifier construction, claim failures,
/// transport aborts, and related issues).
pub mod error;
/// Cross-cutting infrastructure: event subscriber lists, the periodic
/// scheduler, and the bus-load meter.
pub mod infra;
/// ISO 11783 protocol implementation: CAN transport, address management,
/// network management, diagnostics, and segment interconnect.
pub mod protocol;
