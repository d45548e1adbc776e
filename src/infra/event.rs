//! Minimal event primitive: an ordered list of subscribers and an emit
//! operation. Subscribers run in registration order on the caller's stack;
//! a subscriber must not block.
use alloc::boxed::Box;
use alloc::vec::Vec;

/// Ordered subscriber list for a single event kind carrying a payload `T`.
///
/// Callbacks are fire-and-forget: they return nothing and cannot fail. A
/// subscriber that needs to report a failure sets state its owner polls.
pub struct Event<T> {
    subscribers: Vec<Box<dyn FnMut(&T)>>,
}

impl<T> Event<T> {
    pub const fn new() -> Self {
        Self {
            subscribers: Vec::new(),
        }
    }

    /// Append a subscriber. Subscribers fire in registration order.
    pub fn subscribe<F: FnMut(&T) + 'static>(&mut self, callback: F) {
        self.subscribers.push(Box::new(callback));
    }

    /// Invoke every subscriber with `payload`.
    pub fn emit(&mut self, payload: &T) {
        for subscriber in self.subscribers.iter_mut() {
            subscriber(payload);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

impl<T> Default for Event<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> core::fmt::Debug for Event<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Event")
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;

    use alloc::rc::Rc;

    #[test]
    fn subscribers_fire_in_registration_order() {
        let log = Rc::new(Cell::new(0u32));
        let mut event: Event<u8> = Event::new();

        let first = Rc::clone(&log);
        event.subscribe(move |_| first.set(first.get() * 10 + 1));
        let second = Rc::clone(&log);
        event.subscribe(move |_| second.set(second.get() * 10 + 2));

        event.emit(&0);
        assert_eq!(log.get(), 12);
    }

    #[test]
    fn emit_without_subscribers_is_a_no_op() {
        let mut event: Event<u8> = Event::new();
        assert!(event.is_empty());
        event.emit(&42);
    }

    #[test]
    fn payload_reaches_every_subscriber() {
        let seen = Rc::new(Cell::new(0u8));
        let mut event: Event<u8> = Event::new();

        let a = Rc::clone(&seen);
        event.subscribe(move |value| a.set(a.get() + value));
        let b = Rc::clone(&seen);
        event.subscribe(move |value| b.set(b.get() + value));

        event.emit(&3);
        assert_eq!(seen.get(), 6);
    }
}
