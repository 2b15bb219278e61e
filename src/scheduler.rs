//! Bus Scheduler: serializes display transfers onto the shared SPI bus.
//!
//! Every transfer is described by a pooled [`Transaction`]. Pixel transfers
//! also carry a pooled line buffer. The scheduler hands transfers to a
//! [`Bus`] driver, which runs them in order and reports each one back
//! through [`BusScheduler::complete`] (usually from a DMA interrupt).
//!
//! # Bus sharing
//!
//! The first transfer of a burst takes the [`BusLock`] for
//! [`BusOwner::Display`] in the same critical section that raises the
//! in-flight count from zero. The completion that brings the count back to
//! zero releases it. Other bus users can slip in between bursts but never
//! inside one.

use core::cell::Cell;

use critical_section::Mutex;

use crate::bus_lock::{BusLock, BusOwner};
use crate::clock::{Clock, wait_until};
use crate::config::{
    BUFFER_TIMEOUT_MS,
    BUS_LOCK_TIMEOUT_MS,
    DRAIN_TIMEOUT_MS,
    INLINE_BYTES,
    TRANSACTION_TIMEOUT_MS,
};
use crate::error::PipelineError;
use crate::pool::{BufferPool, BufferSlot, Transaction, TransactionPool, TransactionSlot};

/// Level of the panel's data/command select line during a transfer.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(target_arch = "arm", derive(defmt::Format))]
pub enum DcLine {
    Command,
    Data,
}

/// Handle the bus driver passes back on completion.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(target_arch = "arm", derive(defmt::Format))]
pub struct TransactionId(u8);

impl TransactionId {
    #[inline]
    pub const fn index(self) -> u8 { self.0 }
}

/// One transfer as seen by the bus driver.
///
/// `bytes` stays valid and unmodified until the driver calls
/// [`BusScheduler::complete`] with `id`.
#[derive(Clone, Copy, Debug)]
pub struct Transfer<'a> {
    pub id: TransactionId,
    pub line: DcLine,
    pub bytes: &'a [u8],
}

/// Driver refused a transfer.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(target_arch = "arm", derive(defmt::Format))]
pub enum BusError {
    /// The driver's queue had no room.
    QueueFull,
    /// The driver has shut down.
    Closed,
}

/// Hardware side of the scheduler.
///
/// Implementations must run transfers in the order they were queued and
/// report each one through [`BusScheduler::complete`] exactly once.
pub trait Bus<'a> {
    fn queue(
        &self,
        transfer: Transfer<'a>,
    ) -> Result<(), BusError>;
}

impl<'a, B: Bus<'a> + ?Sized> Bus<'a> for &B {
    fn queue(
        &self,
        transfer: Transfer<'a>,
    ) -> Result<(), BusError> {
        (**self).queue(transfer)
    }
}

/// Pools handed to a [`BusScheduler`].
pub struct DmaPools {
    pub buffers: BufferPool,
    pub transactions: TransactionPool,
}

impl DmaPools {
    pub const fn new() -> Self {
        Self {
            buffers: BufferPool::with_buffers(),
            transactions: TransactionPool::with_descriptors(),
        }
    }
}

impl Default for DmaPools {
    fn default() -> Self { Self::new() }
}

/// Serializes transfers onto the bus and recycles pool slots on completion.
pub struct BusScheduler<'a, B, C> {
    bus: B,
    clock: C,
    pools: &'a DmaPools,
    lock: &'a BusLock,
    in_flight: Mutex<Cell<u8>>,
}

impl<'a, B, C> BusScheduler<'a, B, C>
where
    B: Bus<'a>,
    C: Clock,
{
    pub fn new(
        bus: B,
        clock: C,
        pools: &'a DmaPools,
        lock: &'a BusLock,
    ) -> Self {
        Self {
            bus,
            clock,
            pools,
            lock,
            in_flight: Mutex::new(Cell::new(0)),
        }
    }

    #[inline]
    pub fn clock(&self) -> &C { &self.clock }

    #[inline]
    pub fn bus(&self) -> &B { &self.bus }

    /// Transfers queued but not yet completed.
    pub fn in_flight(&self) -> u8 { critical_section::with(|cs| self.in_flight.borrow(cs).get()) }

    /// Line buffers currently free.
    pub fn buffers_available(&self) -> usize { self.pools.buffers.available() }

    /// Borrow a free line buffer, waiting for completions if necessary.
    pub fn acquire_buffer(&self) -> Result<BufferSlot<'a>, PipelineError> {
        let pools: &'a DmaPools = self.pools;
        wait_until(&self.clock, BUFFER_TIMEOUT_MS, || pools.buffers.try_acquire()).ok_or_else(|| {
            log_error!("no line buffer after {} ms, {} in flight", BUFFER_TIMEOUT_MS, self.in_flight());
            PipelineError::BufferTimeout
        })
    }

    fn acquire_transaction(&self) -> Result<TransactionSlot<'a>, PipelineError> {
        let pools: &'a DmaPools = self.pools;
        wait_until(&self.clock, TRANSACTION_TIMEOUT_MS, || pools.transactions.try_acquire()).ok_or_else(|| {
            log_error!("no transaction after {} ms, {} in flight", TRANSACTION_TIMEOUT_MS, self.in_flight());
            PipelineError::TransactionTimeout
        })
    }

    /// Queue a single command byte.
    pub fn command(
        &self,
        command: u8,
    ) -> Result<(), PipelineError> {
        self.send_inline(DcLine::Command, &[command])
    }

    /// Queue a short data payload (at most four bytes).
    pub fn data(
        &self,
        bytes: &[u8],
    ) -> Result<(), PipelineError> {
        self.send_inline(DcLine::Data, bytes)
    }

    fn send_inline(
        &self,
        line: DcLine,
        bytes: &[u8],
    ) -> Result<(), PipelineError> {
        debug_assert!(bytes.len() <= INLINE_BYTES);
        let len = bytes.len().min(INLINE_BYTES);
        let mut slot = self.acquire_transaction()?;
        let transaction = slot.get_mut();
        *transaction = Transaction {
            line,
            len,
            ..Transaction::EMPTY
        };
        transaction.inline[..len].copy_from_slice(&bytes[..len]);
        self.submit(slot)
    }

    /// Queue the first `pixels` entries of a filled line buffer.
    ///
    /// The buffer goes back to the pool when the transfer completes.
    pub fn send_pixels(
        &self,
        buffer: BufferSlot<'a>,
        pixels: usize,
    ) -> Result<(), PipelineError> {
        let mut slot = self.acquire_transaction()?;
        *slot.get_mut() = Transaction {
            line: DcLine::Data,
            len: pixels * 2,
            buffer: Some(buffer.detach()),
            ..Transaction::EMPTY
        };
        self.submit(slot)
    }

    fn submit(
        &self,
        mut slot: TransactionSlot<'a>,
    ) -> Result<(), PipelineError> {
        if let Err(err) = self.begin_transfer() {
            if let Some(buffer) = slot.get_mut().buffer.take() {
                self.pools.buffers.release(buffer);
            }
            return Err(err);
        }

        let pools: &'a DmaPools = self.pools;
        let index = slot.detach();
        // SAFETY: the slot was just detached and is only released by
        // `complete`, after the driver is done with the bytes.
        let transaction: &'a Transaction = unsafe { pools.transactions.detached(index) };
        let bytes = match transaction.buffer {
            // SAFETY: the buffer was detached by `send_pixels` and is
            // released together with this transaction.
            Some(buffer) => unsafe { pools.buffers.detached(buffer) }.as_bytes(transaction.len / 2),
            None => &transaction.inline[..transaction.len],
        };

        let queued = self.bus.queue(Transfer {
            id: TransactionId(index),
            line: transaction.line,
            bytes,
        });
        if let Err(err) = queued {
            log_error!("bus rejected transfer {}: {}", index, err.label());
            if let Some(buffer) = transaction.buffer {
                pools.buffers.release(buffer);
            }
            pools.transactions.release(index);
            self.end_transfer();
            return Err(PipelineError::SubmitRejected);
        }
        Ok(())
    }

    /// Count one more transfer in flight, taking the bus lock for the first.
    fn begin_transfer(&self) -> Result<(), PipelineError> {
        let started = wait_until(&self.clock, BUS_LOCK_TIMEOUT_MS, || {
            critical_section::with(|cs| {
                let in_flight = self.in_flight.borrow(cs);
                if in_flight.get() == 0 && !self.lock.try_acquire_in(cs, BusOwner::Display) {
                    return None;
                }
                in_flight.set(in_flight.get() + 1);
                Some(())
            })
        });
        started.ok_or_else(|| {
            log_error!("display could not take the bus within {} ms", BUS_LOCK_TIMEOUT_MS);
            PipelineError::BusLockTimeout
        })
    }

    /// Count one transfer out, dropping the bus lock after the last.
    fn end_transfer(&self) {
        critical_section::with(|cs| {
            let in_flight = self.in_flight.borrow(cs);
            let remaining = in_flight.get().saturating_sub(1);
            in_flight.set(remaining);
            if remaining == 0 {
                self.lock.release_in(cs, BusOwner::Display);
            }
        });
    }

    /// Completion path for the transfer `id`, which moved `transferred` bytes.
    ///
    /// Returns the descriptor and any line buffer to their pools and drops
    /// the bus lock when nothing is left in flight. Safe to call from
    /// interrupt context.
    pub fn complete(
        &self,
        id: TransactionId,
        transferred: usize,
    ) -> Result<(), PipelineError> {
        // SAFETY: `id` names a queued transaction that has not completed yet.
        let transaction = unsafe { *self.pools.transactions.detached(id.0) };
        if let Some(buffer) = transaction.buffer {
            self.pools.buffers.release(buffer);
        }
        self.pools.transactions.release(id.0);

        self.end_transfer();

        if transferred != transaction.len {
            log_error!("transfer {} moved {} of {} bytes", id.0, transferred, transaction.len);
            return Err(PipelineError::LengthMismatch {
                expected: transaction.len,
                actual: transferred,
            });
        }
        Ok(())
    }

    /// Wait until every queued transfer has completed.
    pub fn drain(&self) -> Result<(), PipelineError> {
        wait_until(&self.clock, DRAIN_TIMEOUT_MS, || (self.in_flight() == 0).then_some(())).ok_or_else(|| {
            log_error!("drain timeout, {} still in flight", self.in_flight());
            PipelineError::DrainTimeout
        })
    }
}

impl BusError {
    pub const fn label(self) -> &'static str {
        match self {
            Self::QueueFull => "queue full",
            Self::Closed => "closed",
        }
    }
}

// ============================================================================
// Unit Tests (run on host with: cargo test --lib --target <host-triple>)
// ============================================================================
