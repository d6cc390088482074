//! Serialized front end for the buddy allocator.
//!
//! Every entry point takes the lock for the whole call, with local IRQs and
//! preemption disabled, so the allocator's multi-step list updates are never
//! interleaved.

use core::sync::atomic::{AtomicBool, Ordering};

use kspin::SpinNoIrq;

use crate::buddy::{BuddyPageAllocator, BuddyStats};
use crate::page_descriptor::PageDescriptor;
use crate::{AllocError, AllocResult, Pfn};

#[cfg(feature = "log")]
use log::error;

/// Buddy allocator behind a `SpinNoIrq` lock
pub struct LockedPageAllocator<'a> {
    inner: SpinNoIrq<BuddyPageAllocator<'a>>,
    initialized: AtomicBool,
}

impl<'a> LockedPageAllocator<'a> {
    pub fn new() -> Self {
        Self {
            inner: SpinNoIrq::new(BuddyPageAllocator::new()),
            initialized: AtomicBool::new(false),
        }
    }

    /// Initialize allocator with the given descriptor pool
    pub fn init(
        &self,
        descriptors: &'a mut [PageDescriptor],
        base_pfn: Pfn,
        count: usize,
    ) -> AllocResult {
        self.inner.lock().init(descriptors, base_pfn, count)?;
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn allocate(&self, order: usize) -> AllocResult<Pfn> {
        if !self.is_initialized() {
            error!("locked allocator: Allocator not initialized");
            return Err(AllocError::NoMemory);
        }
        self.inner.lock().allocate(order)
    }

    pub fn free(&self, pfn: Pfn, order: usize) {
        if !self.is_initialized() {
            error!("locked allocator: Allocator not initialized");
            return;
        }
        self.inner.lock().free(pfn, order);
    }

    pub fn insert_range(&self, start: Pfn, count: usize) -> AllocResult {
        if !self.is_initialized() {
            error!("locked allocator: Allocator not initialized");
            return Err(AllocError::InvalidParam);
        }
        self.inner.lock().insert_range(start, count)
    }

    pub fn remove_range(&self, start: Pfn, count: usize) -> AllocResult {
        if !self.is_initialized() {
            error!("locked allocator: Allocator not initialized");
            return Err(AllocError::InvalidParam);
        }
        self.inner.lock().remove_range(start, count)
    }

    pub fn dump_state(&self) {
        self.inner.lock().dump_state();
    }

    pub fn get_stats(&self) -> BuddyStats {
        self.inner.lock().get_stats()
    }

    /// Run `f` with the lock held, for sequences that must not interleave.
    pub fn with<R>(&self, f: impl FnOnce(&mut BuddyPageAllocator<'a>) -> R) -> R {
        f(&mut self.inner.lock())
    }
}

impl Default for LockedPageAllocator<'_> {
    fn default() -> Self {
        Self::new()
    }
}
