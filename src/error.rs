//! Pipeline error types.
//!
//! Every [`PipelineError`] means the bus or DMA engine is in a state the
//! pipeline cannot reason about any more. Library code only propagates
//! them; the binaries log and abort.

use core::fmt;

/// Fatal bus-side failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(target_arch = "arm", derive(defmt::Format))]
pub enum PipelineError {
    /// No line buffer came back from the bus in time.
    BufferTimeout,
    /// No transaction descriptor came back from the bus in time.
    TransactionTimeout,
    /// The bus driver refused a transfer.
    SubmitRejected,
    /// Another owner held the shared bus past the lock timeout.
    BusLockTimeout,
    /// Transfers were still in flight when the drain deadline passed.
    DrainTimeout,
    /// The bus reported a different byte count than was queued.
    LengthMismatch { expected: usize, actual: usize },
}

impl fmt::Display for PipelineError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Self::BufferTimeout => f.write_str("timed out waiting for a line buffer"),
            Self::TransactionTimeout => f.write_str("timed out waiting for a transaction descriptor"),
            Self::SubmitRejected => f.write_str("bus driver rejected a transfer"),
            Self::BusLockTimeout => f.write_str("timed out waiting for the bus lock"),
            Self::DrainTimeout => f.write_str("timed out draining in-flight transfers"),
            Self::LengthMismatch { expected, actual } => {
                write!(f, "transferred {actual} bytes, expected {expected}")
            }
        }
    }
}

impl core::error::Error for PipelineError {}

/// Rejected [`LogicalFrame`](crate::frame::LogicalFrame) description.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(target_arch = "arm", derive(defmt::Format))]
pub enum FrameError {
    /// Zero width or height.
    Empty,
    /// More rows than the diff table holds.
    TooTall { height: u16 },
    /// Row stride shorter than one row of pixels.
    StrideTooSmall { stride: usize },
    /// Pixel buffer shorter than `stride * (height - 1) + row bytes`.
    BufferTooSmall { needed: usize, len: usize },
    /// Palette has fewer entries than the masks can address.
    PaletteTooSmall { needed: usize, len: usize },
}

impl fmt::Display for FrameError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("frame has no pixels"),
            Self::TooTall { height } => write!(f, "frame height {height} exceeds the diff table"),
            Self::StrideTooSmall { stride } => write!(f, "stride {stride} is shorter than a row"),
            Self::BufferTooSmall { needed, len } => {
                write!(f, "pixel buffer holds {len} bytes, frame needs {needed}")
            }
            Self::PaletteTooSmall { needed, len } => {
                write!(f, "palette holds {len} entries, masks address {needed}")
            }
        }
    }
}

impl core::error::Error for FrameError {}
