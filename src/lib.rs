//! Display update pipeline for a handheld console with an SPI TFT panel.
//!
//! An emulated machine hands finished logical frames to the pipeline. The
//! pipeline diffs them against the previous frame, scales the dirty rows to
//! the physical panel and streams them over a shared DMA bus without stalling
//! the emulation loop.
//!
//! # Data flow
//!
//! ```text
//! producer ── diff ──> Mailbox (depth 1) ──> UpdateTask ──> RectWriter
//!                                                             │
//!             completion <── bus driver <── BusScheduler <────┘
//! ```
//!
//! # Testing
//!
//! Run tests on host with:
//! ```bash
//! cargo test --lib --target x86_64-unknown-linux-gnu  # Linux/macOS
//! cargo test --lib --target x86_64-pc-windows-msvc    # Windows
//! ```
//!
//! Tests run with `std` enabled (via `cfg_attr`), allowing use of the standard
//! test framework while the actual firmware runs as `no_std`.

// Use no_std only when NOT testing (tests need std for the test harness)
#![cfg_attr(not(test), no_std)]
// Crate-level lints
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]

// Logging macros must be declared before the modules that use them
#[macro_use]
pub mod log_buffer;

// === Configuration and shared primitives ===
pub mod clock;
pub mod colors;
pub mod config;
pub mod error;
pub mod settings;

// === Bus side: pools, lock, scheduler, panel protocol ===
pub mod bus_lock;
pub mod panel;
pub mod panel_model;
pub mod pool;
pub mod scheduler;

// === Frame side: geometry, diff, resampling ===
pub mod diff;
pub mod filter;
pub mod frame;
pub mod geometry;
pub mod writer;

// === Producer/consumer glue ===
pub mod mailbox;
pub mod pipeline;
pub mod stats;
pub mod update_task;

// Stand-in for an emulated machine
pub mod demo;

#[cfg(test)]
mod testing;

pub use bus_lock::{BusLock, BusOwner};
pub use clock::Clock;
pub use error::{FrameError, PipelineError};
pub use frame::{DiffTable, LineDiff, LogicalFrame, PixelFormat};
pub use pipeline::{DisplayPipeline, DmaPools, UpdateKind};
pub use scheduler::{Bus, BusError, DcLine, Transfer, TransactionId};
pub use settings::{AspectRatio, FilterMode, ScaleMode};
pub use update_task::UpdateTask;
