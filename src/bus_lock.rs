//! Owner-tagged reentrant lock for the shared SPI bus.
//!
//! The display, the SD card and the network adapter share one bus. Each
//! subsystem acquires the lock under its own [`BusOwner`] tag; acquiring it
//! again under the same tag only bumps a depth counter, and a different tag
//! waits until the holder has released every level.
//!
//! Owner and depth live together in one `critical_section::Mutex`, so the
//! Bus Scheduler can take or drop the lock in the same critical section as
//! its in-flight counter.

use core::cell::Cell;

use critical_section::{CriticalSection, Mutex};

use crate::clock::{Clock, wait_until};
use crate::error::PipelineError;

/// Subsystem that can hold the bus.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(target_arch = "arm", derive(defmt::Format))]
pub enum BusOwner {
    Display,
    Storage,
    Network,
}

impl BusOwner {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Display => "display",
            Self::Storage => "storage",
            Self::Network => "network",
        }
    }
}

#[derive(Clone, Copy, Default)]
struct LockState {
    owner: Option<BusOwner>,
    depth: u16,
}

/// Reentrant bus lock keyed by [`BusOwner`].
pub struct BusLock {
    state: Mutex<Cell<LockState>>,
}

impl BusLock {
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(Cell::new(LockState { owner: None, depth: 0 })),
        }
    }

    /// Take the lock inside an existing critical section.
    pub(crate) fn try_acquire_in(
        &self,
        cs: CriticalSection<'_>,
        owner: BusOwner,
    ) -> bool {
        let cell = self.state.borrow(cs);
        let mut state = cell.get();
        match state.owner {
            Some(current) if current != owner => return false,
            _ => {}
        }
        state.owner = Some(owner);
        state.depth = state.depth.saturating_add(1);
        cell.set(state);
        true
    }

    /// Drop one level inside an existing critical section.
    ///
    /// Returns `false` (and changes nothing) if `owner` does not hold the lock.
    pub(crate) fn release_in(
        &self,
        cs: CriticalSection<'_>,
        owner: BusOwner,
    ) -> bool {
        let cell = self.state.borrow(cs);
        let mut state = cell.get();
        if state.owner != Some(owner) {
            return false;
        }
        state.depth -= 1;
        if state.depth == 0 {
            state.owner = None;
        }
        cell.set(state);
        true
    }

    /// Take the lock if it is free or already held by `owner`.
    pub fn try_acquire(
        &self,
        owner: BusOwner,
    ) -> bool {
        critical_section::with(|cs| self.try_acquire_in(cs, owner))
    }

    /// Take the lock, waiting up to `timeout_ms` for another owner to let go.
    pub fn acquire<C: Clock + ?Sized>(
        &self,
        owner: BusOwner,
        clock: &C,
        timeout_ms: u32,
    ) -> Result<(), PipelineError> {
        wait_until(clock, timeout_ms, || self.try_acquire(owner).then_some(())).ok_or_else(|| {
            log_error!("bus lock timeout: {} waiting on {}", owner.label(), self.owner().map_or("none", BusOwner::label));
            PipelineError::BusLockTimeout
        })
    }

    /// Release one level held by `owner`. Releases by a non-owner are ignored.
    pub fn release(
        &self,
        owner: BusOwner,
    ) -> bool {
        critical_section::with(|cs| self.release_in(cs, owner))
    }

    /// Release the lock regardless of owner or depth.
    pub fn force_release(&self) { critical_section::with(|cs| self.state.borrow(cs).set(LockState::default())); }

    pub fn owner(&self) -> Option<BusOwner> { critical_section::with(|cs| self.state.borrow(cs).get().owner) }

    pub fn depth(&self) -> u16 { critical_section::with(|cs| self.state.borrow(cs).get().depth) }
}

impl Default for BusLock {
    fn default() -> Self { Self::new() }
}

// ============================================================================
// Unit Tests (run on host with: cargo test --lib --target <host-triple>)
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::SimClock;

    #[test]
    fn test_reentrant_for_same_owner() {
        let lock = BusLock::new();
        assert!(lock.try_acquire(BusOwner::Display));
        assert!(lock.try_acquire(BusOwner::Display));
        assert_eq!(lock.depth(), 2);

        assert!(lock.release(BusOwner::Display));
        assert_eq!(lock.owner(), Some(BusOwner::Display));
        assert!(lock.release(BusOwner::Display));
        assert_eq!(lock.owner(), None);
    }

    #[test]
    fn test_other_owner_is_excluded() {
        let lock = BusLock::new();
        assert!(lock.try_acquire(BusOwner::Storage));
        assert!(!lock.try_acquire(BusOwner::Display));

        lock.release(BusOwner::Storage);
        assert!(lock.try_acquire(BusOwner::Display));
    }

    #[test]
    fn test_release_by_non_owner_is_ignored() {
        let lock = BusLock::new();
        lock.try_acquire(BusOwner::Storage);
        assert!(!lock.release(BusOwner::Display));
        assert_eq!(lock.owner(), Some(BusOwner::Storage));
    }

    #[test]
    fn test_force_release_clears_depth() {
        let lock = BusLock::new();
        lock.try_acquire(BusOwner::Network);
        lock.try_acquire(BusOwner::Network);
        lock.force_release();
        assert_eq!(lock.owner(), None);
        assert_eq!(lock.depth(), 0);
    }

    #[test]
    fn test_acquire_times_out_while_held() {
        let lock = BusLock::new();
        let clock = SimClock::new();
        lock.try_acquire(BusOwner::Storage);
        assert_eq!(lock.acquire(BusOwner::Display, &clock, 100), Err(PipelineError::BusLockTimeout));
    }

    #[test]
    fn test_acquire_waits_for_other_thread() {
        let lock = BusLock::new();
        lock.try_acquire(BusOwner::Storage);
        std::thread::scope(|s| {
            s.spawn(|| {
                std::thread::sleep(std::time::Duration::from_millis(20));
                lock.release(BusOwner::Storage);
            });
            let clock = crate::testing::StdClock::new();
            assert_eq!(lock.acquire(BusOwner::Display, &clock, 2_000), Ok(()));
        });
        assert_eq!(lock.owner(), Some(BusOwner::Display));
    }
}
