//! Host stand-ins for the device's SPI link.
//!
//! [`SimBus`] forwards transfers to a "DMA" thread over a channel. The
//! thread decodes them into a [`PanelModel`], optionally waits as long as
//! the real SPI clock would take, and then completes them through the
//! pipeline, just like the firmware's bus driver task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use retro_display::panel_model::PanelModel;
use retro_display::{Bus, BusError, Clock, DisplayPipeline, PipelineError, Transfer};

use crate::timing::{DMA_POLL, SPI_HZ};

/// Pipeline as wired in the simulator.
pub type SimPipeline = DisplayPipeline<'static, SimBus, HostClock>;

/// Bus handle feeding the DMA thread.
pub struct SimBus {
    tx: Sender<Transfer<'static>>,
}

impl SimBus {
    pub fn new() -> (Self, Receiver<Transfer<'static>>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx }, rx)
    }
}

impl Bus<'static> for SimBus {
    fn queue(
        &self,
        transfer: Transfer<'static>,
    ) -> Result<(), BusError> {
        self.tx.send(transfer).map_err(|_| BusError::Closed)
    }
}

/// Wall clock; waits yield the thread.
pub struct HostClock {
    start: Instant,
}

impl HostClock {
    pub fn new() -> Self { Self { start: Instant::now() } }
}

impl Clock for HostClock {
    fn now_ms(&self) -> u64 { self.start.elapsed().as_millis() as u64 }

    fn relax(&self) { thread::yield_now(); }
}

/// Run transfers until `stop` is set and the channel has gone quiet.
///
/// A failed completion ends the thread with that error.
pub fn run_dma(
    rx: Receiver<Transfer<'static>>,
    pipeline: &SimPipeline,
    panel: &Mutex<Box<PanelModel>>,
    stop: &AtomicBool,
) -> Result<(), PipelineError> {
    loop {
        let transfer = match rx.recv_timeout(DMA_POLL) {
            Ok(transfer) => transfer,
            Err(RecvTimeoutError::Timeout) if !stop.load(Ordering::Acquire) => continue,
            Err(_) => return Ok(()),
        };

        let started = Instant::now();
        panel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .apply(transfer.line, transfer.bytes);
        if SPI_HZ != 0 {
            let wire_time = Duration::from_nanos(transfer.bytes.len() as u64 * 8 * 1_000_000_000 / SPI_HZ);
            // OS sleeps overshoot short waits, so short transfers finish instantly
            if let Some(rest) = wire_time.checked_sub(started.elapsed())
                && rest >= Duration::from_micros(50)
            {
                thread::sleep(rest);
            }
        }

        pipeline.complete(transfer.id, transfer.bytes.len())?;
    }
}
