//! Abstraction over a CAN bus endpoint. Allows the engine to plug into
//! various implementations (embedded HAL driver, SocketCAN wrapper, in-memory
//! test double) without owning any I/O itself.
use crate::error::LinkError;
use crate::protocol::transport::frame::Frame;

/// Contract the network manager consumes to move frames on one port.
///
/// The engine never blocks: `receive` is a poll that returns the next pending
/// frame, stamped by the link with a bus-accurate monotonic timestamp, or
/// `None` when the queue is empty. Blocking, if any, lives below this trait.
pub trait CanLink {
    /// Emit a frame on the bus.
    fn send(&mut self, frame: &Frame) -> Result<(), LinkError>;

    /// Retrieve the next pending frame, if any.
    fn receive(&mut self) -> Option<Frame>;

    /// Configured bus bitrate in bits per second; consumed by the bus-load
    /// meter.
    fn bitrate(&self) -> u32;
}
