//! Display, pool and timing configuration constants.
//!
//! All sizes are compile-time so the pools and tables can live in `.bss`
//! without an allocator.

// =============================================================================
// Display Configuration
// =============================================================================

/// Panel width in pixels (ST7789 in landscape: 320x240)
pub const SCREEN_WIDTH: usize = 320;

/// Panel height in pixels
pub const SCREEN_HEIGHT: usize = 240;

/// Tallest logical frame the pipeline accepts (one `DiffTable` entry per row).
pub const MAX_FRAME_HEIGHT: usize = SCREEN_HEIGHT;

// =============================================================================
// Bus Pools
// =============================================================================

/// Number of bus transaction descriptors and line buffers.
/// Also the maximum number of transfers in flight at once.
pub const TRANSACTION_COUNT: usize = 5;

/// Pixels per line buffer: six full-width physical rows.
pub const BUFFER_PIXELS: usize = 6 * SCREEN_WIDTH;

/// Command payloads up to this size travel inside the descriptor.
pub const INLINE_BYTES: usize = 4;

// =============================================================================
// Diff Tuning
// =============================================================================

/// Above this share of changed logical pixels (percent) a full update is cheaper.
pub const FULL_UPDATE_THRESHOLD_PERCENT: u32 = 60;

/// Adjacent dirty rows whose edges differ by at most this many pixels are merged.
pub const MERGE_SLACK: u16 = 8;

// =============================================================================
// Timeouts (milliseconds)
// =============================================================================

/// Waiting for a free line buffer.
pub const BUFFER_TIMEOUT_MS: u32 = 2_500;

/// Waiting for a free transaction descriptor.
pub const TRANSACTION_TIMEOUT_MS: u32 = 2_500;

/// Waiting for the in-flight count to reach zero.
pub const DRAIN_TIMEOUT_MS: u32 = 2_500;

/// Waiting for another bus owner to give up the shared bus.
pub const BUS_LOCK_TIMEOUT_MS: u32 = 10_000;
