//! Log ring with levels and sequence numbers for on-device log viewing.
//!
//! Pipeline code logs through the `log_*!` macros. Each call formats the
//! message into a fixed-size entry in a global ring and, on the device, also
//! forwards it to `defmt`. The firmware and the simulator read the ring back
//! with [`snapshot`].
//!
//! # Log Levels
//!
//! - `Trace`: verbose debugging
//! - `Debug`: debugging information
//! - `Info`: normal operation
//! - `Warn`: clamped configuration, slow buffers
//! - `Error`: fatal pipeline faults, logged right before the abort
//!
//! # Usage
//!
//! ```ignore
//! log_info!("geometry {}x{} -> {}x{}", w, h, sw, sh);
//! log_warn!("scale mode {} out of range", raw);
//! ```

use core::cell::RefCell;
use core::fmt::{self, Write};

use critical_section::Mutex;
use heapless::String;

/// Maximum number of log entries to keep.
pub const LOG_ENTRIES: usize = 32;

/// Maximum characters per log message.
pub const LOG_MSG_LEN: usize = 48;

/// Log severity level.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
#[repr(u8)]
#[allow(dead_code)] // Variants used via log_*! macros
pub enum LogLevel {
    Trace = 0,
    Debug = 1,
    #[default]
    Info = 2,
    Warn = 3,
    Error = 4,
}

impl LogLevel {
    /// Get the single-character prefix for this level.
    pub const fn prefix(self) -> char {
        match self {
            Self::Trace => 'T',
            Self::Debug => 'D',
            Self::Info => 'I',
            Self::Warn => 'W',
            Self::Error => 'E',
        }
    }
}

/// A single log entry with level, message, and sequence number.
#[derive(Clone, Debug)]
pub struct LogEntry {
    pub level: LogLevel,
    /// Log message (truncated to `LOG_MSG_LEN`).
    pub message: String<LOG_MSG_LEN>,
    /// Monotonic sequence number, survives ring wrap-around.
    pub sequence: u32,
}

impl LogEntry {
    const EMPTY: Self = Self {
        level: LogLevel::Info,
        message: String::new(),
        sequence: 0,
    };
}

/// `fmt::Write` adapter that truncates instead of failing.
struct Truncating<'a>(&'a mut String<LOG_MSG_LEN>);

impl Write for Truncating<'_> {
    fn write_str(
        &mut self,
        s: &str,
    ) -> fmt::Result {
        for c in s.chars() {
            if self.0.push(c).is_err() {
                break;
            }
        }
        Ok(())
    }
}

/// Circular buffer of log entries.
pub struct LogBuffer {
    entries: [LogEntry; LOG_ENTRIES],
    head: usize, // Next write position
    count: usize,
    next_sequence: u32,
}

impl LogBuffer {
    /// Create a new empty log buffer.
    pub const fn new() -> Self {
        Self {
            entries: [const { LogEntry::EMPTY }; LOG_ENTRIES],
            head: 0,
            count: 0,
            next_sequence: 0,
        }
    }

    /// Format and push a new entry. Oldest entry is dropped if buffer is full.
    pub fn push_fmt(
        &mut self,
        level: LogLevel,
        args: fmt::Arguments<'_>,
    ) {
        let entry = &mut self.entries[self.head];
        entry.level = level;
        entry.sequence = self.next_sequence;
        entry.message.clear();
        let _ = Truncating(&mut entry.message).write_fmt(args);

        self.next_sequence = self.next_sequence.wrapping_add(1);
        self.head = (self.head + 1) % LOG_ENTRIES;
        if self.count < LOG_ENTRIES {
            self.count += 1;
        }
    }

    #[inline]
    pub const fn len(&self) -> usize { self.count }

    #[inline]
    pub const fn is_empty(&self) -> bool { self.count == 0 }

    /// Iterate over entries from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        let start = if self.count < LOG_ENTRIES { 0 } else { self.head };
        (0..self.count).map(move |i| &self.entries[(start + i) % LOG_ENTRIES])
    }
}

impl Default for LogBuffer {
    fn default() -> Self { Self::new() }
}

/// Global log ring shared by every execution context.
static LOG_BUFFER: Mutex<RefCell<LogBuffer>> = Mutex::new(RefCell::new(LogBuffer::new()));

/// Push a formatted message to the global ring. Safe from interrupt context.
pub fn push_log(
    level: LogLevel,
    args: fmt::Arguments<'_>,
) {
    critical_section::with(|cs| LOG_BUFFER.borrow_ref_mut(cs).push_fmt(level, args));
}

/// Copy up to `N` of the newest entries, oldest first.
pub fn snapshot<const N: usize>() -> heapless::Vec<LogEntry, N> {
    critical_section::with(|cs| {
        let buffer = LOG_BUFFER.borrow_ref(cs);
        let skip = buffer.len().saturating_sub(N);
        buffer.iter().skip(skip).cloned().collect()
    })
}

/// Log a message at Info level.
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {{
        $crate::log_buffer::push_log($crate::log_buffer::LogLevel::Info, format_args!($($arg)*));
        #[cfg(target_arch = "arm")]
        defmt::info!($($arg)*);
    }};
}

/// Log a message at Warn level.
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {{
        $crate::log_buffer::push_log($crate::log_buffer::LogLevel::Warn, format_args!($($arg)*));
        #[cfg(target_arch = "arm")]
        defmt::warn!($($arg)*);
    }};
}

/// Log a message at Error level.
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {{
        $crate::log_buffer::push_log($crate::log_buffer::LogLevel::Error, format_args!($($arg)*));
        #[cfg(target_arch = "arm")]
        defmt::error!($($arg)*);
    }};
}

/// Log a message at Debug level.
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {{
        $crate::log_buffer::push_log($crate::log_buffer::LogLevel::Debug, format_args!($($arg)*));
        #[cfg(target_arch = "arm")]
        defmt::debug!($($arg)*);
    }};
}

// ============================================================================
// Unit Tests (run on host with: cargo test --lib --target <host-triple>)
// ============================================================================
