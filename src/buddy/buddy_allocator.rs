//! Buddy page allocator over a borrowed descriptor pool
//!
//! Owns the free-area store and drives it for the memory manager: seeding,
//! allocation and release, range hot-plug and diagnostics.

use crate::page_descriptor::{DescriptorPool, PageDescriptor, PageDescriptorType};
use crate::{AllocError, AllocResult, PageAllocatorAlgorithm, Pfn};

#[cfg(feature = "log")]
use log::{debug, trace, warn};

#[cfg(feature = "tracking")]
use super::stats::MemoryStatsReporter;

use super::{
    buddy_block::{BuddyBlock, MAX_ORDER},
    buddy_set::BuddySet,
    free_list::FreeListIter,
    stats::{BuddyStats, FreeAreaDisplay},
};

/// Buddy page allocator
///
/// Borrows the page descriptor table for `'a`; it never owns frames, it only
/// tracks which blocks are free. Not synchronized: see
/// [`LockedPageAllocator`](crate::LockedPageAllocator).
pub struct BuddyPageAllocator<'a> {
    pool: DescriptorPool<'a>,
    free_areas: BuddySet,
    /// Frames seeded or inserted, minus frames removed
    managed_pages: usize,
}

impl<'a> BuddyPageAllocator<'a> {
    /// Friendly name used for algorithm selection
    pub const NAME: &'static str = "buddy";

    /// Create an allocator without memory (must call init())
    pub fn new() -> Self {
        Self {
            pool: DescriptorPool::empty(),
            free_areas: BuddySet::new(),
            managed_pages: 0,
        }
    }

    /// Take over `descriptors`, whose first entry describes `base_pfn`, and
    /// seed `[base_pfn, base_pfn + count)` as maximal aligned free blocks.
    ///
    /// Frames of the pool past `count` stay reserved until inserted with
    /// [`insert_range`](Self::insert_range).
    pub fn init(
        &mut self,
        descriptors: &'a mut [PageDescriptor],
        base_pfn: Pfn,
        count: usize,
    ) -> AllocResult {
        if descriptors.is_empty() || count == 0 || count > descriptors.len() {
            warn!(
                "buddy allocator: cannot init with {} descriptors and count {}",
                descriptors.len(),
                count
            );
            return Err(AllocError::InvalidParam);
        }
        if base_pfn.checked_add(descriptors.len()).is_none() {
            return Err(AllocError::InvalidParam);
        }

        self.free_areas.clear(&mut self.pool);
        self.pool = DescriptorPool::new(descriptors, base_pfn);
        self.pool.reset();
        self.managed_pages = 0;

        self.seed(base_pfn, count);
        debug!(
            "buddy allocator: initialized pfns [{:#x}, {:#x}) of pool [{:#x}, {:#x})",
            base_pfn,
            base_pfn + count,
            self.pool.base_pfn(),
            self.pool.end_pfn()
        );
        Ok(())
    }

    /// Release the descriptor pool back to its owner.
    ///
    /// All free lists are emptied; the allocator must be re-initialized
    /// before further use.
    pub fn teardown(&mut self) -> &'a mut [PageDescriptor] {
        self.free_areas.clear(&mut self.pool);
        self.managed_pages = 0;
        core::mem::take(&mut self.pool).into_inner()
    }

    fn seed(&mut self, start: Pfn, count: usize) {
        self.pool
            .mark_range(start, count, PageDescriptorType::Available);
        self.free_areas.insert_blocks(&mut self.pool, start, count);
        self.managed_pages += count;
    }

    /// Allocate a block of `2^order` frames.
    ///
    /// Returns the first pfn of the lowest-addressed block available, or
    /// [`AllocError::NoMemory`] with the free lists left untouched.
    ///
    /// # Panics
    ///
    /// Panics if `order > MAX_ORDER`.
    pub fn allocate(&mut self, order: usize) -> AllocResult<Pfn> {
        match self.free_areas.alloc_block(&mut self.pool, order) {
            Ok(pfn) => Ok(pfn),
            Err(e) => {
                debug!("buddy allocator: allocation failure at order {}", order);
                #[cfg(feature = "tracking")]
                MemoryStatsReporter::print_alloc_failure_stats(
                    crate::DEFAULT_PAGE_SIZE,
                    &self.get_stats(),
                    order,
                );
                Err(e)
            }
        }
    }

    /// Return a block obtained from [`allocate`](Self::allocate) with the same
    /// order, merging it with free buddies as far as possible.
    ///
    /// # Panics
    ///
    /// Panics on an out-of-range order, a misaligned block, a block outside
    /// the pool, a block covering reserved frames or a block that is already
    /// (partly) free.
    pub fn free(&mut self, pfn: Pfn, order: usize) {
        let merged = self.free_areas.free_block(&mut self.pool, pfn, order);
        if merged.order > order {
            trace!(
                "buddy allocator: freed {:#x} merged up to order {}",
                pfn,
                merged.order
            );
        }
    }

    /// Mark `[start, start + count)` available and insert it as maximal
    /// aligned blocks, merging with free neighbours.
    ///
    /// Fails with [`AllocError::InvalidParam`] if the range is empty or leaves
    /// the pool, and with [`AllocError::MemoryOverlap`] if any frame is
    /// already managed (free or allocated). Nothing changes on failure.
    pub fn insert_range(&mut self, start: Pfn, count: usize) -> AllocResult {
        if count == 0 || !self.pool.contains_range(start, count) {
            warn!(
                "buddy allocator: insert range [{:#x}, +{:#x}) outside pool",
                start, count
            );
            return Err(AllocError::InvalidParam);
        }
        // Free and allocated frames alike carry the available flag
        if self.pool.any_available(start, count) {
            warn!(
                "buddy allocator: insert range [{:#x}, {:#x}) overlaps managed memory",
                start,
                start + count
            );
            return Err(AllocError::MemoryOverlap);
        }

        debug!(
            "buddy allocator: insert range [{:#x}, {:#x})",
            start,
            start + count
        );
        self.seed(start, count);
        Ok(())
    }

    /// Mark `[start, start + count)` unavailable, then re-coalesce the
    /// remaining free memory.
    ///
    /// The whole call fails with [`AllocError::NotAvailable`] if any frame in
    /// the range is not currently free (allocated, or never inserted), and
    /// with [`AllocError::InvalidParam`] if the range is empty or leaves the
    /// pool. Nothing changes on failure.
    pub fn remove_range(&mut self, start: Pfn, count: usize) -> AllocResult {
        if count == 0 || !self.pool.contains_range(start, count) {
            warn!(
                "buddy allocator: remove range [{:#x}, +{:#x}) outside pool",
                start, count
            );
            return Err(AllocError::InvalidParam);
        }

        let end = start + count;
        let mut pfn = start;
        while pfn < end {
            match self.free_areas.find_containing(&self.pool, pfn) {
                Some(block) => pfn = block.end_pfn(),
                None => {
                    warn!(
                        "buddy allocator: remove range [{:#x}, {:#x}): frame {:#x} is not free",
                        start, end, pfn
                    );
                    return Err(AllocError::NotAvailable);
                }
            }
        }

        debug!("buddy allocator: remove range [{:#x}, {:#x})", start, end);
        self.free_areas.carve_range(&mut self.pool, start, count);
        self.free_areas.coalesce(&mut self.pool);
        self.managed_pages -= count;
        Ok(())
    }

    /// Split the free block `(pfn, order)` into two free halves.
    pub fn split(&mut self, pfn: Pfn, order: usize) -> Option<Pfn> {
        self.free_areas.split(&mut self.pool, pfn, order)
    }

    /// Merge the free block `(pfn, order)` with its free buddy.
    ///
    /// # Panics
    ///
    /// Panics if `order >= MAX_ORDER`.
    pub fn merge(&mut self, pfn: Pfn, order: usize) -> Option<Pfn> {
        self.free_areas.merge(&mut self.pool, pfn, order)
    }

    pub fn buddy_of(&self, pfn: Pfn, order: usize) -> Option<Pfn> {
        self.free_areas.buddy_of(&self.pool, pfn, order)
    }

    pub fn is_free(&self, pfn: Pfn, order: usize) -> bool {
        self.free_areas.is_free(&self.pool, pfn, order)
    }

    /// The free block currently holding `pfn`, if any
    pub fn find_containing(&self, pfn: Pfn) -> Option<BuddyBlock> {
        self.free_areas.find_containing(&self.pool, pfn)
    }

    /// Free block heads of one order, lowest first
    ///
    /// # Panics
    ///
    /// Panics if `order > MAX_ORDER`.
    pub fn free_blocks(&self, order: usize) -> FreeListIter<'_> {
        self.free_areas.free_blocks(&self.pool, order)
    }

    pub fn block_count(&self, order: usize) -> usize {
        self.free_areas.block_count(order)
    }

    pub fn total_pages(&self) -> usize {
        self.managed_pages
    }

    pub fn free_pages(&self) -> usize {
        self.free_areas.free_pages()
    }

    pub fn used_pages(&self) -> usize {
        self.managed_pages.saturating_sub(self.free_pages())
    }

    pub fn get_stats(&self) -> BuddyStats {
        let mut stats = BuddyStats::new();
        stats.total_pages = self.total_pages();
        stats.free_pages = self.free_pages();
        stats.used_pages = self.used_pages();
        for order in 0..=MAX_ORDER {
            stats.free_blocks_by_order[order] = self.block_count(order);
        }
        stats
    }

    /// The borrowed descriptor pool
    pub fn pool(&self) -> &DescriptorPool<'a> {
        &self.pool
    }

    /// Render the free list of one order as `[order] pfn pfn ...`
    pub fn free_area(&self, order: usize) -> FreeAreaDisplay<'_> {
        FreeAreaDisplay::new(self, order)
    }

    /// Log every free list, one line per order
    pub fn dump_state(&self) {
        debug!("BUDDY STATE:");
        for order in 0..=MAX_ORDER {
            debug!("{}", self.free_area(order));
        }
    }
}

impl Default for BuddyPageAllocator<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> PageAllocatorAlgorithm<'a> for BuddyPageAllocator<'a> {
    fn init(
        &mut self,
        descriptors: &'a mut [PageDescriptor],
        base_pfn: Pfn,
        count: usize,
    ) -> AllocResult {
        BuddyPageAllocator::init(self, descriptors, base_pfn, count)
    }

    fn allocate_pages(&mut self, order: usize) -> AllocResult<Pfn> {
        self.allocate(order)
    }

    fn free_pages(&mut self, pfn: Pfn, order: usize) {
        self.free(pfn, order)
    }

    fn insert_page_range(&mut self, start: Pfn, count: usize) -> AllocResult {
        self.insert_range(start, count)
    }

    fn remove_page_range(&mut self, start: Pfn, count: usize) -> AllocResult {
        self.remove_range(start, count)
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn dump_state(&self) {
        BuddyPageAllocator::dump_state(self)
    }
}
