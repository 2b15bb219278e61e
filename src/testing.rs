//! Host-side fixtures shared by the unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::Instant;

use crate::clock::Clock;
use crate::geometry::ScreenSize;
use crate::panel_model::PanelModel;
use crate::scheduler::{Bus, BusError, DcLine, TransactionId, Transfer};

/// Clock that only moves when someone waits on it.
pub struct SimClock {
    now: AtomicU64,
}

impl SimClock {
    pub fn new() -> Self { Self { now: AtomicU64::new(0) } }
}

impl Clock for SimClock {
    fn now_ms(&self) -> u64 { self.now.load(Ordering::Relaxed) }

    fn relax(&self) { self.now.fetch_add(1, Ordering::Relaxed); }
}

/// Wall clock for tests with real threads.
pub struct StdClock {
    start: Instant,
}

impl StdClock {
    pub fn new() -> Self { Self { start: Instant::now() } }
}

impl Clock for StdClock {
    fn now_ms(&self) -> u64 { self.start.elapsed().as_millis() as u64 }

    fn relax(&self) { thread::yield_now(); }
}

/// Transfer copied out of the pipeline at queue time.
#[derive(Clone, Debug)]
pub struct Recorded {
    pub id: TransactionId,
    pub line: DcLine,
    pub bytes: Vec<u8>,
}

/// Bus that queues copies of every transfer.
///
/// Without a completion thread the queue just fills up, which is what the
/// scheduler tests want. [`with_completions`] drains it into a
/// [`PanelModel`] the way a DMA engine would.
pub struct RecordingBus {
    pending: Mutex<VecDeque<Recorded>>,
    completed: Mutex<Vec<Recorded>>,
    panel: Mutex<Box<PanelModel>>,
    closed: AtomicBool,
}

impl RecordingBus {
    pub fn new() -> Self { Self::with_screen(ScreenSize::PANEL) }

    pub fn with_screen(screen: ScreenSize) -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            completed: Mutex::new(Vec::new()),
            panel: Mutex::new(Box::new(PanelModel::new(screen))),
            closed: AtomicBool::new(false),
        }
    }

    /// Reject every later transfer with [`BusError::Closed`].
    pub fn close(&self) { self.closed.store(true, Ordering::Release); }

    /// Remove and return everything queued so far.
    pub fn take(&self) -> Vec<Recorded> { self.pending.lock().unwrap().drain(..).collect() }

    /// Remove and return everything completed by [`with_completions`].
    pub fn take_completed(&self) -> Vec<Recorded> { std::mem::take(&mut *self.completed.lock().unwrap()) }

    fn pop(&self) -> Option<Recorded> { self.pending.lock().unwrap().pop_front() }

    /// Run `f` against the panel model fed by completed transfers.
    pub fn panel<R>(
        &self,
        f: impl FnOnce(&mut PanelModel) -> R,
    ) -> R {
        f(&mut self.panel.lock().unwrap())
    }
}

impl<'a> Bus<'a> for RecordingBus {
    fn queue(
        &self,
        transfer: Transfer<'a>,
    ) -> Result<(), BusError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BusError::Closed);
        }
        self.pending.lock().unwrap().push_back(Recorded {
            id: transfer.id,
            line: transfer.line,
            bytes: transfer.bytes.to_vec(),
        });
        Ok(())
    }
}

struct StopOnDrop<'f>(&'f AtomicBool);

impl Drop for StopOnDrop<'_> {
    fn drop(&mut self) { self.0.store(true, Ordering::Release); }
}

/// Run `body` while a background thread completes queued transfers in order.
///
/// Every completed transfer is decoded into the bus's panel model before
/// `complete` is called with its full length.
pub fn with_completions<R>(
    bus: &RecordingBus,
    complete: impl Fn(TransactionId, usize) + Sync,
    body: impl FnOnce() -> R,
) -> R {
    let stop = AtomicBool::new(false);
    thread::scope(|s| {
        s.spawn(|| {
            loop {
                match bus.pop() {
                    Some(transfer) => {
                        bus.panel(|panel| panel.apply(transfer.line, &transfer.bytes));
                        complete(transfer.id, transfer.bytes.len());
                        bus.completed.lock().unwrap().push(transfer);
                    }
                    None if stop.load(Ordering::Acquire) => break,
                    None => thread::yield_now(),
                }
            }
        });
        let _stop = StopOnDrop(&stop);
        body()
    })
}
