//! Buddy page-frame allocator
//!
//! This crate manages a fixed pool of page frames as a hierarchy of
//! power-of-two blocks, featuring:
//! - Intrusive per-order free lists threaded through borrowed page descriptors
//! - Block splitting on allocation and cascading buddy merges on release
//! - Range insertion/removal for boot-time and hot-plug memory maps
//! - Statistics and free-area dumps for debugging
//!
//! The allocator itself is not synchronized. [`LockedPageAllocator`] provides
//! the serialization layer for callers that need one.

#![no_std]

extern crate alloc;

// Logging support - conditionally import log crate
#[cfg(feature = "log")]
extern crate log;

// Stub macros when log is disabled - these become no-ops
#[cfg(not(feature = "log"))]
macro_rules! error {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
macro_rules! warn {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
#[allow(unused_macros)]
macro_rules! info {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
macro_rules! debug {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
#[allow(unused_macros)]
macro_rules! trace {
    ($($arg:tt)*) => {};
}

/// Page size used when reporting block sizes in bytes
pub const DEFAULT_PAGE_SIZE: usize = 0x1000;

/// Page frame number.
pub type Pfn = usize;

/// The error type used for allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// Invalid pool, count or range (e.g. outside the descriptor pool).
    InvalidParam,
    /// Range inserted by `insert_range` overlaps memory that is already free.
    MemoryOverlap,
    /// No free block of sufficient order.
    NoMemory,
    /// Range removed by `remove_range` contains frames that are not free.
    NotAvailable,
}

/// A [`Result`] type with [`AllocError`] as the error type.
pub type AllocResult<T = ()> = Result<T, AllocError>;

/// A page allocation algorithm as seen by the owning memory manager.
///
/// Callers must serialize every entry point; implementations perform several
/// free-list mutations per call that are not atomic as a group.
pub trait PageAllocatorAlgorithm<'a> {
    /// Take over the descriptor pool and seed `count` frames starting at `base_pfn`.
    fn init(
        &mut self,
        descriptors: &'a mut [PageDescriptor],
        base_pfn: Pfn,
        count: usize,
    ) -> AllocResult;

    /// Allocate a block of `2^order` contiguous frames, returning its first pfn.
    fn allocate_pages(&mut self, order: usize) -> AllocResult<Pfn>;

    /// Return a block previously obtained from `allocate_pages` with the same order.
    fn free_pages(&mut self, pfn: Pfn, order: usize);

    /// Mark `count` frames starting at `start` as available for allocation.
    fn insert_page_range(&mut self, start: Pfn, count: usize) -> AllocResult;

    /// Mark `count` frames starting at `start` as unavailable for allocation.
    fn remove_page_range(&mut self, start: Pfn, count: usize) -> AllocResult;

    /// Friendly name of the algorithm, for debugging and selection purposes.
    fn name(&self) -> &'static str;

    /// Log the current state of the free areas.
    fn dump_state(&self);
}

/// Checks whether the frame number has the demanded alignment.
///
/// Equivalent to `pfn % align == 0`, but the alignment must be a power of two.
#[inline]
const fn is_aligned(pfn: Pfn, align: usize) -> bool {
    pfn & (align - 1) == 0
}

pub mod page_descriptor;
pub use page_descriptor::{DescriptorPool, PageDescriptor, PageDescriptorType};

// Export our allocator implementations
pub mod buddy;
pub use buddy::{order_for_pages, BuddyBlock, BuddyPageAllocator, BuddyStats, MAX_ORDER};

pub mod locked_allocator;
pub use locked_allocator::LockedPageAllocator;
