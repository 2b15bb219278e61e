//! Time source for bounded waits.
//!
//! The pipeline never sleeps on its own: every blocking wait is a poll loop
//! that calls [`Clock::relax`] between attempts and gives up once
//! [`Clock::now_ms`] has moved past the deadline. Firmware backs this with
//! `embassy_time`, the simulator with `std::time`, and tests with a
//! simulated clock that advances inside `relax`.

/// Monotonic millisecond clock plus a back-off hook.
pub trait Clock {
    /// Milliseconds since an arbitrary fixed point.
    fn now_ms(&self) -> u64;

    /// Called between polls of a busy wait.
    fn relax(&self) { core::hint::spin_loop(); }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now_ms(&self) -> u64 { (**self).now_ms() }

    fn relax(&self) { (**self).relax() }
}

/// Poll `attempt` until it yields a value or `timeout_ms` elapses.
pub fn wait_until<C, T>(
    clock: &C,
    timeout_ms: u32,
    mut attempt: impl FnMut() -> Option<T>,
) -> Option<T>
where
    C: Clock + ?Sized,
{
    let deadline = clock.now_ms().saturating_add(u64::from(timeout_ms));
    loop {
        if let Some(value) = attempt() {
            return Some(value);
        }
        if clock.now_ms() >= deadline {
            return None;
        }
        clock.relax();
    }
}

// ============================================================================
// Unit Tests (run on host with: cargo test --lib --target <host-triple>)
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::SimClock;

    #[test]
    fn test_wait_until_returns_first_success() {
        let clock = SimClock::new();
        let mut polls = 0;
        let value = wait_until(&clock, 100, || {
            polls += 1;
            (polls == 3).then_some(polls)
        });
        assert_eq!(value, Some(3));
    }

    #[test]
    fn test_wait_until_times_out() {
        let clock = SimClock::new();
        let value: Option<()> = wait_until(&clock, 50, || None);
        assert_eq!(value, None);
        assert!(clock.now_ms() >= 50);
    }
}
