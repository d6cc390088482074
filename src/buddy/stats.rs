//! Statistics and debugging for buddy allocator
//!
//! Provides per-order statistics, the free-area dump and failure reporting.

use core::fmt;

use super::buddy_allocator::BuddyPageAllocator;
use super::buddy_block::MAX_ORDER;

/// Buddy system statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuddyStats {
    /// Frames inserted into the allocator and not removed since
    pub total_pages: usize,
    pub free_pages: usize,
    pub used_pages: usize,
    pub free_blocks_by_order: [usize; MAX_ORDER + 1],
}

impl Default for BuddyStats {
    fn default() -> Self {
        Self::new()
    }
}

impl BuddyStats {
    pub const fn new() -> Self {
        Self {
            total_pages: 0,
            free_pages: 0,
            used_pages: 0,
            free_blocks_by_order: [0; MAX_ORDER + 1],
        }
    }

    /// Largest order with at least one free block
    pub fn largest_free_order(&self) -> Option<usize> {
        (0..=MAX_ORDER)
            .rev()
            .find(|&order| self.free_blocks_by_order[order] > 0)
    }
}

/// One line of the free-area dump: `[order] pfn pfn ...`, pfns in hex
pub struct FreeAreaDisplay<'a> {
    allocator: &'a BuddyPageAllocator<'a>,
    order: usize,
}

impl<'a> FreeAreaDisplay<'a> {
    pub(crate) fn new(allocator: &'a BuddyPageAllocator<'a>, order: usize) -> Self {
        Self { allocator, order }
    }
}

impl fmt::Display for FreeAreaDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.order)?;
        for pfn in self.allocator.free_blocks(self.order) {
            write!(f, " {:x}", pfn)?;
        }
        Ok(())
    }
}

/// Detailed memory statistics reporter
#[cfg(feature = "tracking")]
pub struct MemoryStatsReporter;

#[cfg(feature = "tracking")]
impl MemoryStatsReporter {
    /// Print detailed allocation failure statistics
    #[allow(unused_variables)]
    pub fn print_alloc_failure_stats(page_size: usize, stats: &BuddyStats, request_order: usize) {
        #[cfg(feature = "log")]
        use log::error;

        error!("========================================");
        error!(
            "Request: order {} ({} pages, {} KB)",
            request_order,
            1usize << request_order,
            ((1usize << request_order) * page_size) / 1024
        );
        error!(
            "  Total pages: {} ({} KB)",
            stats.total_pages,
            (stats.total_pages * page_size) / 1024
        );
        error!(
            "  Free pages: {} ({} KB)",
            stats.free_pages,
            (stats.free_pages * page_size) / 1024
        );
        error!(
            "  Used pages: {} ({} KB)",
            stats.used_pages,
            (stats.used_pages * page_size) / 1024
        );
        error!("  Free blocks by order:");
        for order in (0..=MAX_ORDER).rev() {
            let count = stats.free_blocks_by_order[order];
            if count > 0 {
                let block_size = (1usize << order) * page_size;
                error!(
                    "    Order {}: {} blocks ({} KB each, {} KB total)",
                    order,
                    count,
                    block_size / 1024,
                    (count * block_size) / 1024
                );
            }
        }
        error!("========================================");
    }
}
