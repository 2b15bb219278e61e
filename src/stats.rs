//! Pipeline counters for profiling.
//!
//! Updated with relaxed atomics from both the producer and the Update Task;
//! readers take a [`StatsSnapshot`] whenever they want to log or display one.

use core::sync::atomic::{AtomicU32, Ordering};

use crate::pipeline::UpdateKind;

/// Atomic pipeline counters.
pub struct PipelineStats {
    frames_full: AtomicU32,
    frames_partial: AtomicU32,
    frames_empty: AtomicU32,
    /// Frames the Update Task finished writing.
    frames_drawn: AtomicU32,
    /// Rows changed in the last diffed frame.
    last_lines_changed: AtomicU32,
    /// Times the writer found every line buffer in flight.
    buffer_waits: AtomicU32,
}

/// Plain copy of [`PipelineStats`].
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
#[cfg_attr(target_arch = "arm", derive(defmt::Format))]
pub struct StatsSnapshot {
    pub frames_full: u32,
    pub frames_partial: u32,
    pub frames_empty: u32,
    pub frames_drawn: u32,
    pub last_lines_changed: u32,
    pub buffer_waits: u32,
}

impl PipelineStats {
    pub const fn new() -> Self {
        Self {
            frames_full: AtomicU32::new(0),
            frames_partial: AtomicU32::new(0),
            frames_empty: AtomicU32::new(0),
            frames_drawn: AtomicU32::new(0),
            last_lines_changed: AtomicU32::new(0),
            buffer_waits: AtomicU32::new(0),
        }
    }

    /// Count one queued frame.
    pub fn record_update(
        &self,
        kind: UpdateKind,
        lines_changed: u16,
    ) {
        let counter = match kind {
            UpdateKind::Full => &self.frames_full,
            UpdateKind::Partial => &self.frames_partial,
            UpdateKind::Empty => &self.frames_empty,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.last_lines_changed.store(u32::from(lines_changed), Ordering::Relaxed);
    }

    /// Count one frame written by the Update Task.
    pub fn record_drawn(
        &self,
        buffer_waits: u32,
    ) {
        self.frames_drawn.fetch_add(1, Ordering::Relaxed);
        self.buffer_waits.fetch_add(buffer_waits, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_full: self.frames_full.load(Ordering::Relaxed),
            frames_partial: self.frames_partial.load(Ordering::Relaxed),
            frames_empty: self.frames_empty.load(Ordering::Relaxed),
            frames_drawn: self.frames_drawn.load(Ordering::Relaxed),
            last_lines_changed: self.last_lines_changed.load(Ordering::Relaxed),
            buffer_waits: self.buffer_waits.load(Ordering::Relaxed),
        }
    }
}

impl Default for PipelineStats {
    fn default() -> Self { Self::new() }
}

impl StatsSnapshot {
    /// Frames handed to the pipeline.
    pub const fn frames_queued(&self) -> u32 { self.frames_full + self.frames_partial + self.frames_empty }
}

// ============================================================================
// Unit Tests (run on host with: cargo test --lib --target <host-triple>)
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_updates_and_draws_are_counted_separately() {
        let stats = PipelineStats::new();
        stats.record_update(UpdateKind::Full, 144);
        stats.record_update(UpdateKind::Partial, 12);
        stats.record_update(UpdateKind::Empty, 0);
        stats.record_drawn(3);
        stats.record_drawn(0);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.frames_queued(), 3);
        assert_eq!(snapshot.frames_drawn, 2);
        assert_eq!(snapshot.last_lines_changed, 0);
        assert_eq!(snapshot.buffer_waits, 3);
        assert_eq!((snapshot.frames_full, snapshot.frames_partial, snapshot.frames_empty), (1, 1, 1));
    }
}
