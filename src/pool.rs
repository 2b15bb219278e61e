//! Fixed-capacity pools of line buffers and transaction descriptors.
//!
//! A pool is an array of slots plus an atomic free bitmask. Acquisition is a
//! compare-and-swap that clears the lowest free bit; release sets it again.
//! Neither side ever blocks, so the completion path can hand slots back from
//! interrupt context while the Update Task is waiting for one.
//!
//! Slots are anonymous: callers only ever see "some free slot".

use core::cell::UnsafeCell;
use core::marker::PhantomData;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::config::{BUFFER_PIXELS, INLINE_BYTES, TRANSACTION_COUNT};
use crate::scheduler::DcLine;

/// Lock-free pool of up to 32 slots.
pub struct Pool<T, const N: usize> {
    slots: UnsafeCell<[T; N]>,
    free: AtomicU32,
}

// SAFETY: a slot is reachable only through the single `Slot` handle that
// cleared its free bit, or by index after that handle was detached and
// before the bit is set again.
unsafe impl<T: Send, const N: usize> Sync for Pool<T, N> {}

impl<T, const N: usize> Pool<T, N> {
    const ALL_FREE: u32 = if N == 32 { u32::MAX } else { (1u32 << N) - 1 };

    pub const fn new(slots: [T; N]) -> Self {
        assert!(N > 0 && N <= 32, "pool capacity must be 1..=32");
        Self {
            slots: UnsafeCell::new(slots),
            free: AtomicU32::new(Self::ALL_FREE),
        }
    }

    #[inline]
    pub const fn capacity(&self) -> usize { N }

    /// Number of slots currently free.
    #[inline]
    pub fn available(&self) -> usize { self.free.load(Ordering::Acquire).count_ones() as usize }

    /// Take a free slot without waiting.
    pub fn try_acquire(&self) -> Option<Slot<'_, T, N>> {
        let mut free = self.free.load(Ordering::Acquire);
        loop {
            if free == 0 {
                return None;
            }
            let index = free.trailing_zeros();
            match self.free.compare_exchange_weak(free, free & !(1 << index), Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => {
                    return Some(Slot {
                        pool: self,
                        index: index as u8,
                        _not_sync: PhantomData,
                    });
                }
                Err(current) => free = current,
            }
        }
    }

    /// Return a slot previously detached with [`Slot::detach`].
    ///
    /// Safe to call from interrupt context.
    pub fn release(
        &self,
        index: u8,
    ) {
        debug_assert!((index as usize) < N);
        let previous = self.free.fetch_or(1 << index, Ordering::AcqRel);
        debug_assert!(previous & (1 << index) == 0, "slot released twice");
    }

    #[inline]
    fn slot_ptr(
        &self,
        index: u8,
    ) -> *mut T {
        assert!((index as usize) < N);
        self.slots.get().cast::<T>().wrapping_add(index as usize)
    }

    /// Shared view of a detached slot.
    ///
    /// # Safety
    ///
    /// `index` must have been detached from a [`Slot`] and not yet released,
    /// and nothing may write the slot while the returned reference lives.
    pub unsafe fn detached(
        &self,
        index: u8,
    ) -> &T {
        // SAFETY: upheld by the caller.
        unsafe { &*self.slot_ptr(index) }
    }
}

/// Exclusive handle to one pool slot. Dropping it returns the slot.
pub struct Slot<'p, T, const N: usize> {
    pool: &'p Pool<T, N>,
    index: u8,
    _not_sync: PhantomData<*mut T>,
}

impl<'p, T, const N: usize> Slot<'p, T, N> {
    #[inline]
    pub fn index(&self) -> u8 { self.index }

    #[inline]
    pub fn get_mut(&mut self) -> &mut T {
        // SAFETY: this handle is the only path to the slot while it exists.
        unsafe { &mut *self.pool.slot_ptr(self.index) }
    }

    /// Give up the handle without freeing the slot.
    ///
    /// Ownership moves to whoever will later call [`Pool::release`].
    pub fn detach(self) -> u8 {
        let index = self.index;
        core::mem::forget(self);
        index
    }
}

impl<T, const N: usize> Drop for Slot<'_, T, N> {
    fn drop(&mut self) { self.pool.release(self.index); }
}

// =============================================================================
// Line Buffers
// =============================================================================

/// DMA-safe block of physical pixels in panel (big-endian) byte order.
#[repr(C, align(4))]
pub struct LineBuffer(pub [u16; BUFFER_PIXELS]);

impl LineBuffer {
    pub const fn new() -> Self { Self([0; BUFFER_PIXELS]) }

    /// The first `pixels` entries as bytes, ready for the bus.
    pub fn as_bytes(
        &self,
        pixels: usize,
    ) -> &[u8] {
        &bytemuck::cast_slice::<u16, u8>(&self.0)[..pixels * 2]
    }
}

impl Default for LineBuffer {
    fn default() -> Self { Self::new() }
}

pub type BufferPool = Pool<LineBuffer, TRANSACTION_COUNT>;
pub type BufferSlot<'p> = Slot<'p, LineBuffer, TRANSACTION_COUNT>;

impl BufferPool {
    pub const fn with_buffers() -> Self { Self::new([const { LineBuffer::new() }; TRANSACTION_COUNT]) }
}

// =============================================================================
// Transaction Descriptors
// =============================================================================

/// One queued bus transfer: either a short inline payload or a line buffer.
#[derive(Clone, Copy, Debug)]
pub struct Transaction {
    pub line: DcLine,
    pub inline: [u8; INLINE_BYTES],
    /// Bytes handed to the bus.
    pub len: usize,
    /// Line buffer to return when the transfer completes.
    pub buffer: Option<u8>,
}

impl Transaction {
    pub const EMPTY: Self = Self {
        line: DcLine::Command,
        inline: [0; INLINE_BYTES],
        len: 0,
        buffer: None,
    };
}

pub type TransactionPool = Pool<Transaction, TRANSACTION_COUNT>;
pub type TransactionSlot<'p> = Slot<'p, Transaction, TRANSACTION_COUNT>;

impl TransactionPool {
    pub const fn with_descriptors() -> Self { Self::new([Transaction::EMPTY; TRANSACTION_COUNT]) }
}

// ============================================================================
// Unit Tests (run on host with: cargo test --lib --target <host-triple>)
// ============================================================================
