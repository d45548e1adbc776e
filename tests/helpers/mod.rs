//! Test doubles simulating a CAN segment during integration tests.
#![allow(dead_code)]
use isobus_core::error::LinkError;
use isobus_core::protocol::transport::frame::Frame;
use isobus_core::protocol::transport::link::CanLink;

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

struct BusInner {
    inboxes: Vec<VecDeque<Frame>>,
    /// Everything that crossed the wire, in order, for assertions.
    journal: Vec<Frame>,
}

/// In-memory CAN segment: every endpoint sees every other endpoint's frames.
#[derive(Clone)]
pub struct VirtualBus {
    inner: Rc<RefCell<BusInner>>,
}

impl VirtualBus {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(BusInner {
                inboxes: Vec::new(),
                journal: Vec::new(),
            })),
        }
    }

    /// Create a new endpoint attached to this segment.
    pub fn endpoint(&self) -> BusEndpoint {
        let mut inner = self.inner.borrow_mut();
        inner.inboxes.push(VecDeque::new());
        BusEndpoint {
            inner: Rc::clone(&self.inner),
            index: inner.inboxes.len() - 1,
        }
    }

    /// Every frame that crossed the segment so far.
    pub fn journal(&self) -> Vec<Frame> {
        self.inner.borrow().journal.clone()
    }

    pub fn clear_journal(&self) {
        self.inner.borrow_mut().journal.clear();
    }
}

/// One node's connection to a [`VirtualBus`].
pub struct BusEndpoint {
    inner: Rc<RefCell<BusInner>>,
    index: usize,
}

impl CanLink for BusEndpoint {
    fn send(&mut self, frame: &Frame) -> Result<(), LinkError> {
        let mut inner = self.inner.borrow_mut();
        inner.journal.push(*frame);
        let own = self.index;
        for (index, inbox) in inner.inboxes.iter_mut().enumerate() {
            if index != own {
                inbox.push_back(*frame);
            }
        }
        Ok(())
    }

    fn receive(&mut self) -> Option<Frame> {
        self.inner.borrow_mut().inboxes[self.index].pop_front()
    }

    fn bitrate(&self) -> u32 {
        250_000
    }
}
