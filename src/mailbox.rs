//! Single-slot handoff between the producer and the Update Task.
//!
//! The consumer [`peek`](Mailbox::peek)s a message, works on it, and only
//! then [`consume`](Mailbox::consume)s it. A producer posting the next
//! message therefore waits for the previous one to be fully handled, which
//! is what paces the emulation loop to the display.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicU8, Ordering};

use crate::clock::Clock;

const EMPTY: u8 = 0;
const WRITING: u8 = 1;
const FULL: u8 = 2;

/// Depth-one mailbox for `Copy` messages.
pub struct Mailbox<T> {
    state: AtomicU8,
    slot: UnsafeCell<Option<T>>,
}

// SAFETY: the slot is written only by the producer that moved the state
// from EMPTY to WRITING, and read only while the state is FULL.
unsafe impl<T: Send> Sync for Mailbox<T> {}

impl<T: Copy> Mailbox<T> {
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(EMPTY),
            slot: UnsafeCell::new(None),
        }
    }

    /// Post `message` if the slot is free.
    pub fn try_post(
        &self,
        message: T,
    ) -> Result<(), T> {
        if self.state.compare_exchange(EMPTY, WRITING, Ordering::Acquire, Ordering::Relaxed).is_err() {
            return Err(message);
        }
        // SAFETY: WRITING excludes every other access to the slot.
        unsafe { *self.slot.get() = Some(message) };
        self.state.store(FULL, Ordering::Release);
        Ok(())
    }

    /// Post `message`, waiting as long as it takes for the slot to free up.
    pub fn post<C: Clock + ?Sized>(
        &self,
        clock: &C,
        mut message: T,
    ) {
        loop {
            match self.try_post(message) {
                Ok(()) => return,
                Err(back) => message = back,
            }
            clock.relax();
        }
    }

    /// The pending message, left in place.
    pub fn peek(&self) -> Option<T> {
        if self.state.load(Ordering::Acquire) != FULL {
            return None;
        }
        // SAFETY: FULL means the producer is done writing and will not
        // touch the slot until `consume` empties it.
        unsafe { *self.slot.get() }
    }

    /// Wait for a message and return it without taking it.
    pub fn wait_peek<C: Clock + ?Sized>(
        &self,
        clock: &C,
    ) -> T {
        loop {
            if let Some(message) = self.peek() {
                return message;
            }
            clock.relax();
        }
    }

    /// Drop the pending message and let the producer post again.
    pub fn consume(&self) {
        if self.state.load(Ordering::Acquire) == FULL {
            // SAFETY: still FULL, so only this consumer touches the slot.
            unsafe { *self.slot.get() = None };
            self.state.store(EMPTY, Ordering::Release);
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool { self.state.load(Ordering::Acquire) == EMPTY }

    /// Wait until the consumer has finished with whatever is pending.
    pub fn wait_empty<C: Clock + ?Sized>(
        &self,
        clock: &C,
    ) {
        while !self.is_empty() {
            clock.relax();
        }
    }
}

impl<T: Copy> Default for Mailbox<T> {
    fn default() -> Self { Self::new() }
}

// ============================================================================
// Unit Tests (run on host with: cargo test --lib --target <host-triple>)
// ============================================================================

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;
    use std::thread;

    use super::*;
    use crate::testing::StdClock;

    #[test]
    fn test_second_post_is_refused_until_consumed() {
        let mailbox = Mailbox::new();
        assert!(mailbox.is_empty());
        assert_eq!(mailbox.try_post(1u32), Ok(()));
        assert_eq!(mailbox.try_post(2), Err(2));

        assert_eq!(mailbox.peek(), Some(1));
        assert_eq!(mailbox.peek(), Some(1));
        mailbox.consume();
        assert_eq!(mailbox.peek(), None);
        assert_eq!(mailbox.try_post(2), Ok(()));
    }

    #[test]
    fn test_post_blocks_until_consumer_is_done() {
        let mailbox = Mailbox::new();
        let handled = AtomicBool::new(false);
        let clock = StdClock::new();

        mailbox.try_post(7u8).unwrap();
        thread::scope(|s| {
            s.spawn(|| {
                let message = mailbox.wait_peek(&clock);
                assert_eq!(message, 7);
                thread::sleep(std::time::Duration::from_millis(20));
                handled.store(true, Ordering::SeqCst);
                mailbox.consume();
            });
            mailbox.post(&clock, 8);
            assert!(handled.load(Ordering::SeqCst));
        });
        assert_eq!(mailbox.peek(), Some(8));
    }
}
