//! Timing constants for the simulator.
//!
//! These constants use `std::time::Duration` which is not available in `no_std`
//! environments, so they are defined here rather than in the library.

use std::time::Duration;

/// Target frame time of the emulated machine (~60 FPS).
pub const FRAME_TIME: Duration = Duration::from_micros(16_667);

/// Interval between statistics lines on stdout.
pub const STATS_INTERVAL: Duration = Duration::from_secs(2);

/// How long the DMA thread waits for a transfer before checking for shutdown.
pub const DMA_POLL: Duration = Duration::from_millis(20);

/// SPI clock the DMA thread paces itself to, 0 for instant transfers.
pub const SPI_HZ: u64 = 62_500_000;
