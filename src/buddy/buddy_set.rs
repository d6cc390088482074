//! Buddy free-area store and block transformations
//!
//! Implements splitting, merging and the cascading merge over one free list
//! per order. The descriptor pool is passed in by the owner on every call.

use crate::page_descriptor::{DescriptorPool, PageDescriptorType};
use crate::{AllocError, AllocResult, Pfn};

#[cfg(feature = "log")]
use log::{error, trace};

use super::{
    buddy_block::{alignment, block_pages, buddy_pfn, BuddyBlock, MAX_ORDER},
    free_list::{FreeList, FreeListIter},
};

/// Free lists for orders `0..=MAX_ORDER`
///
/// A block is free at order O iff its first pfn is on `free_areas[O]`.
pub struct BuddySet {
    free_areas: [FreeList; MAX_ORDER + 1],
}

impl BuddySet {
    pub const fn new() -> Self {
        Self {
            free_areas: [const { FreeList::new() }; MAX_ORDER + 1],
        }
    }

    /// Unlink every free block
    pub fn clear(&mut self, pool: &mut DescriptorPool) {
        for list in &mut self.free_areas {
            list.clear(pool);
        }
    }

    fn insert_free(&mut self, pool: &mut DescriptorPool, pfn: Pfn, order: usize) -> bool {
        self.free_areas[order].insert_sorted(pool, pfn)
    }

    fn remove_free(&mut self, pool: &mut DescriptorPool, pfn: Pfn, order: usize) -> bool {
        self.free_areas[order].remove(pool, pfn)
    }

    /// Whether the block `(pfn, order)` is on the free list for `order`.
    pub fn is_free(&self, pool: &DescriptorPool, pfn: Pfn, order: usize) -> bool {
        order <= MAX_ORDER && self.free_areas[order].contains(pool, pfn)
    }

    /// Buddy of the block `(pfn, order)`, if it lies inside the pool.
    pub fn buddy_of(&self, pool: &DescriptorPool, pfn: Pfn, order: usize) -> Option<Pfn> {
        let buddy = buddy_pfn(pfn, order)?;
        pool.contains_range(buddy, block_pages(order))
            .then_some(buddy)
    }

    fn buddy_is_free(&self, pool: &DescriptorPool, pfn: Pfn, order: usize) -> bool {
        self.buddy_of(pool, pfn, order)
            .is_some_and(|buddy| self.is_free(pool, buddy, order))
    }

    /// Split a free block into two free halves one order below.
    ///
    /// Returns the low half, or `None` (leaving the lists untouched) if the
    /// block is not aligned, not available or not free at `source_order`.
    pub fn split(&mut self, pool: &mut DescriptorPool, pfn: Pfn, source_order: usize) -> Option<Pfn> {
        if source_order == 0 || source_order > MAX_ORDER || !alignment(pfn, source_order) {
            return None;
        }
        if !pool.pfn_to_pgd(pfn).is_some_and(|pgd| pgd.is_available()) {
            return None;
        }
        if !self.is_free(pool, pfn, source_order) {
            return None;
        }

        let lower = source_order - 1;
        let high = self.buddy_of(pool, pfn, lower)?;

        self.remove_free(pool, pfn, source_order);
        self.insert_free(pool, pfn, lower);
        self.insert_free(pool, high, lower);

        trace!(
            "buddy: split {:#x} at order {} into {:#x} + {:#x}",
            pfn,
            source_order,
            pfn,
            high
        );
        Some(pfn)
    }

    /// Merge a free block with its free buddy into one block an order above.
    ///
    /// Returns the surviving (lower) head, or `None` (leaving the lists
    /// untouched) if either half is not free.
    pub fn merge(&mut self, pool: &mut DescriptorPool, pfn: Pfn, source_order: usize) -> Option<Pfn> {
        assert!(
            source_order < MAX_ORDER,
            "buddy: merge order {} out of range (max {})",
            source_order,
            MAX_ORDER - 1
        );
        if !alignment(pfn, source_order) {
            return None;
        }
        let buddy = self.buddy_of(pool, pfn, source_order)?;
        if !self.is_free(pool, pfn, source_order) || !self.is_free(pool, buddy, source_order) {
            return None;
        }

        let upper = source_order + 1;
        let survivor = if alignment(pfn, upper) {
            pfn
        } else if alignment(buddy, upper) {
            buddy
        } else {
            return None;
        };

        self.remove_free(pool, pfn, source_order);
        self.remove_free(pool, buddy, source_order);
        self.insert_free(pool, survivor, upper);

        trace!(
            "buddy: merged {:#x} + {:#x} into order {}",
            pfn,
            buddy,
            upper
        );
        Some(survivor)
    }

    /// Climb orders from a free block, merging while its buddy is free.
    ///
    /// Returns the largest block reached.
    pub fn merge_cascade(&mut self, pool: &mut DescriptorPool, pfn: Pfn, order: usize) -> BuddyBlock {
        let mut block = BuddyBlock::new(pfn, order);
        while block.order < MAX_ORDER {
            match self.merge(pool, block.pfn, block.order) {
                Some(survivor) => block = BuddyBlock::new(survivor, block.order + 1),
                None => break,
            }
        }
        block
    }

    /// Take the lowest free block of `order`, splitting a larger one if needed.
    pub fn alloc_block(&mut self, pool: &mut DescriptorPool, order: usize) -> AllocResult<Pfn> {
        assert!(
            order <= MAX_ORDER,
            "buddy: allocation order {} exceeds MAX_ORDER {}",
            order,
            MAX_ORDER
        );

        let found = (order..=MAX_ORDER)
            .find(|&o| !self.free_areas[o].is_empty())
            .ok_or(AllocError::NoMemory)?;
        let mut pfn = self.free_areas[found].front().ok_or(AllocError::NoMemory)?;

        // Split top down; every high half stays on the free list of its order
        for source_order in (order + 1..=found).rev() {
            pfn = match self.split(pool, pfn, source_order) {
                Some(low) => low,
                None => panic!(
                    "buddy: free block {:#x} at order {} could not be split",
                    pfn, source_order
                ),
            };
        }

        self.remove_free(pool, pfn, order);
        Ok(pfn)
    }

    /// Return an allocated block and merge it as far as possible.
    pub fn free_block(&mut self, pool: &mut DescriptorPool, pfn: Pfn, order: usize) -> BuddyBlock {
        assert!(
            order <= MAX_ORDER,
            "buddy: free order {} exceeds MAX_ORDER {}",
            order,
            MAX_ORDER
        );
        assert!(
            alignment(pfn, order),
            "buddy: block {:#x} is not aligned to order {}",
            pfn,
            order
        );
        assert!(
            pool.contains_range(pfn, block_pages(order)),
            "buddy: block {:#x} (order {}) is outside the descriptor pool",
            pfn,
            order
        );
        assert!(
            pool.all_available(pfn, block_pages(order)),
            "buddy: block {:#x} (order {}) covers reserved frames",
            pfn,
            order
        );
        assert!(
            !self.overlaps_free(pool, pfn, block_pages(order)),
            "buddy: double free of block {:#x} (order {})",
            pfn,
            order
        );

        self.insert_free(pool, pfn, order);
        if order < MAX_ORDER {
            self.merge_cascade(pool, pfn, order)
        } else {
            BuddyBlock::new(pfn, order)
        }
    }

    /// Insert `[start, start + count)` as maximal aligned blocks.
    ///
    /// Each block is merged with free neighbours as it goes in. The caller
    /// has checked that the range is inside the pool and not already free.
    pub fn insert_blocks(&mut self, pool: &mut DescriptorPool, start: Pfn, count: usize) {
        let mut start = start;
        let mut remaining = count;

        while remaining > 0 {
            let order = (0..=MAX_ORDER)
                .rev()
                .find(|&o| block_pages(o) <= remaining && alignment(start, o))
                .unwrap_or(0);

            self.insert_free(pool, start, order);
            if order < MAX_ORDER {
                self.merge_cascade(pool, start, order);
            }

            start += block_pages(order);
            remaining -= block_pages(order);
        }
    }

    /// Lift `[start, start + count)` out of the free lists and mark it reserved.
    ///
    /// Blocks straddling the range boundary are split toward it; blocks lying
    /// wholly inside are taken as they are. The caller has checked that every
    /// frame is free.
    pub fn carve_range(&mut self, pool: &mut DescriptorPool, start: Pfn, count: usize) {
        let end = start + count;
        let mut pfn = start;

        while pfn < end {
            let Some(mut block) = self.find_containing(pool, pfn) else {
                error!("buddy: frame {:#x} is not in any free block", pfn);
                pfn += 1;
                continue;
            };

            while block.pfn < pfn || block.end_pfn() > end {
                let low = match self.split(pool, block.pfn, block.order) {
                    Some(low) => low,
                    None => panic!(
                        "buddy: free block {:#x} at order {} could not be split",
                        block.pfn, block.order
                    ),
                };
                let half = BuddyBlock::new(low, block.order - 1);
                block = if pfn >= half.end_pfn() {
                    BuddyBlock::new(half.end_pfn(), half.order)
                } else {
                    half
                };
            }

            self.remove_free(pool, block.pfn, block.order);
            pool.mark_range(block.pfn, block.pages(), PageDescriptorType::Reserved);
            pfn = block.end_pfn();
        }
    }

    /// Merge every pair of free buddies, lowest order first.
    pub fn coalesce(&mut self, pool: &mut DescriptorPool) {
        for order in 0..MAX_ORDER {
            loop {
                let candidate = {
                    let view: &DescriptorPool = pool;
                    self.free_areas[order]
                        .iter(view)
                        .find(|&pfn| self.buddy_is_free(view, pfn, order))
                };
                let Some(pfn) = candidate else {
                    break;
                };
                if self.merge(pool, pfn, order).is_none() {
                    break;
                }
            }
        }
    }

    /// The free block currently holding `pfn`, if any.
    pub fn find_containing(&self, pool: &DescriptorPool, pfn: Pfn) -> Option<BuddyBlock> {
        (0..=MAX_ORDER)
            .map(|order| BuddyBlock::new(pfn & !(block_pages(order) - 1), order))
            .find(|block| self.is_free(pool, block.pfn, block.order))
    }

    /// Whether any frame of `[start, start + count)` is inside a free block.
    pub fn overlaps_free(&self, pool: &DescriptorPool, start: Pfn, count: usize) -> bool {
        let end = start + count;
        for order in 0..=MAX_ORDER {
            for head in self.free_areas[order].iter(pool) {
                if head >= end {
                    break;
                }
                if start < head + block_pages(order) {
                    return true;
                }
            }
        }
        false
    }

    /// Free block heads of one order, lowest first
    pub fn free_blocks<'a>(&'a self, pool: &'a DescriptorPool<'a>, order: usize) -> FreeListIter<'a> {
        self.free_areas[order].iter(pool)
    }

    /// Get the number of free blocks in a specific order
    pub fn block_count(&self, order: usize) -> usize {
        if order <= MAX_ORDER {
            self.free_areas[order].len()
        } else {
            0
        }
    }

    /// Total number of free frames across all orders
    pub fn free_pages(&self) -> usize {
        self.free_areas
            .iter()
            .enumerate()
            .map(|(order, list)| list.len() * block_pages(order))
            .sum()
    }
}

impl Default for BuddySet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page_descriptor::PageDescriptor;
    use alloc::vec;
    use alloc::vec::Vec;

    fn available(frames: usize) -> Vec<PageDescriptor> {
        let mut backing = vec![PageDescriptor::new(); frames];
        DescriptorPool::new(&mut backing, 0).mark_range(0, frames, PageDescriptorType::Available);
        backing
    }

    fn blocks(set: &BuddySet, pool: &DescriptorPool) -> Vec<(Pfn, usize)> {
        let mut out = Vec::new();
        for order in 0..=MAX_ORDER {
            out.extend(set.free_blocks(pool, order).map(|pfn| (pfn, order)));
        }
        out
    }

    #[test]
    fn test_split_then_merge_restores_block() {
        let mut backing = available(16);
        let mut pool = DescriptorPool::new(&mut backing, 0);
        let mut set = BuddySet::new();
        set.insert_blocks(&mut pool, 0, 16);
        assert_eq!(blocks(&set, &pool), [(0, 4)]);

        assert_eq!(set.split(&mut pool, 0, 4), Some(0));
        assert_eq!(blocks(&set, &pool), [(0, 3), (8, 3)]);

        assert_eq!(set.merge(&mut pool, 8, 3), Some(0));
        assert_eq!(blocks(&set, &pool), [(0, 4)]);
    }

    #[test]
    fn test_split_rejects_bad_blocks() {
        let mut backing = available(16);
        let mut pool = DescriptorPool::new(&mut backing, 0);
        let mut set = BuddySet::new();
        set.insert_blocks(&mut pool, 0, 16);

        // misaligned, wrong order, order 0
        assert_eq!(set.split(&mut pool, 4, 4), None);
        assert_eq!(set.split(&mut pool, 0, 3), None);
        assert_eq!(set.split(&mut pool, 0, 0), None);
        assert_eq!(blocks(&set, &pool), [(0, 4)]);
    }

    #[test]
    fn test_split_rejects_reserved_block() {
        let mut backing = available(4);
        let mut pool = DescriptorPool::new(&mut backing, 0);
        let mut set = BuddySet::new();
        set.insert_blocks(&mut pool, 0, 4);
        pool.mark_range(0, 1, PageDescriptorType::Reserved);

        assert_eq!(set.split(&mut pool, 0, 2), None);
        assert!(set.is_free(&pool, 0, 2));
    }

    #[test]
    fn test_merge_requires_free_buddy() {
        let mut backing = available(4);
        let mut pool = DescriptorPool::new(&mut backing, 0);
        let mut set = BuddySet::new();
        set.insert_blocks(&mut pool, 0, 4);

        let pfn = set.alloc_block(&mut pool, 1).unwrap();
        assert_eq!(pfn, 0);
        assert_eq!(set.merge(&mut pool, 2, 1), None);
        assert_eq!(blocks(&set, &pool), [(2, 1)]);
    }

    #[test]
    fn test_alloc_splits_top_down() {
        let mut backing = available(16);
        let mut pool = DescriptorPool::new(&mut backing, 0);
        let mut set = BuddySet::new();
        set.insert_blocks(&mut pool, 0, 16);

        assert_eq!(set.alloc_block(&mut pool, 0), Ok(0));
        assert_eq!(blocks(&set, &pool), [(1, 0), (2, 1), (4, 2), (8, 3)]);
        assert_eq!(set.free_pages(), 15);

        assert_eq!(set.alloc_block(&mut pool, 2), Ok(4));
        assert_eq!(set.alloc_block(&mut pool, 3), Ok(8));
        assert_eq!(set.alloc_block(&mut pool, 3), Err(AllocError::NoMemory));
        assert_eq!(blocks(&set, &pool), [(1, 0), (2, 1)]);
    }

    #[test]
    fn test_free_cascades_to_top() {
        let mut backing = available(16);
        let mut pool = DescriptorPool::new(&mut backing, 0);
        let mut set = BuddySet::new();
        set.insert_blocks(&mut pool, 0, 16);

        let pfn = set.alloc_block(&mut pool, 0).unwrap();
        let merged = set.free_block(&mut pool, pfn, 0);
        assert_eq!(merged, BuddyBlock::new(0, 4));
        assert_eq!(blocks(&set, &pool), [(0, 4)]);
    }

    #[test]
    fn test_cascade_stops_at_busy_buddy() {
        let mut backing = available(8);
        let mut pool = DescriptorPool::new(&mut backing, 0);
        let mut set = BuddySet::new();
        set.insert_blocks(&mut pool, 0, 8);

        let a = set.alloc_block(&mut pool, 0).unwrap();
        let b = set.alloc_block(&mut pool, 0).unwrap();
        assert_eq!((a, b), (0, 1));

        let merged = set.free_block(&mut pool, a, 0);
        assert_eq!(merged, BuddyBlock::new(0, 0));
        assert_eq!(blocks(&set, &pool), [(0, 0), (2, 1), (4, 2)]);
    }

    #[test]
    #[should_panic(expected = "double free")]
    fn test_double_free_panics() {
        let mut backing = available(8);
        let mut pool = DescriptorPool::new(&mut backing, 0);
        let mut set = BuddySet::new();
        set.insert_blocks(&mut pool, 0, 8);

        let pfn = set.alloc_block(&mut pool, 1).unwrap();
        set.free_block(&mut pool, pfn, 1);
        set.free_block(&mut pool, pfn, 1);
    }

    #[test]
    #[should_panic(expected = "covers reserved frames")]
    fn test_free_removed_block_panics() {
        let mut backing = available(8);
        let mut pool = DescriptorPool::new(&mut backing, 0);
        let mut set = BuddySet::new();
        set.insert_blocks(&mut pool, 0, 8);

        let pfn = set.alloc_block(&mut pool, 1).unwrap();
        pool.mark_range(pfn + 1, 1, PageDescriptorType::Reserved);
        set.free_block(&mut pool, pfn, 1);
    }

    #[test]
    #[should_panic(expected = "not aligned")]
    fn test_misaligned_free_panics() {
        let mut backing = available(8);
        let mut pool = DescriptorPool::new(&mut backing, 0);
        let mut set = BuddySet::new();
        set.free_block(&mut pool, 2, 2);
    }

    #[test]
    fn test_insert_blocks_non_power_of_two() {
        let mut backing = available(8);
        let mut pool = DescriptorPool::new(&mut backing, 0);
        let mut set = BuddySet::new();

        set.insert_blocks(&mut pool, 0, 3);
        assert_eq!(blocks(&set, &pool), [(2, 0), (0, 1)]);

        // Filling the gap coalesces with the neighbours
        set.insert_blocks(&mut pool, 3, 5);
        assert_eq!(blocks(&set, &pool), [(0, 3)]);
    }

    #[test]
    fn test_carve_range_and_coalesce() {
        let mut backing = available(16);
        let mut pool = DescriptorPool::new(&mut backing, 0);
        let mut set = BuddySet::new();
        set.insert_blocks(&mut pool, 0, 16);

        set.carve_range(&mut pool, 5, 2);
        set.coalesce(&mut pool);
        assert_eq!(blocks(&set, &pool), [(4, 0), (7, 0), (0, 2), (8, 3)]);
        assert!(!pool.pfn_to_pgd(5).unwrap().is_available());
        assert!(!pool.pfn_to_pgd(6).unwrap().is_available());
        assert!(pool.pfn_to_pgd(7).unwrap().is_available());
    }

    #[test]
    fn test_find_containing() {
        let mut backing = available(16);
        let mut pool = DescriptorPool::new(&mut backing, 0);
        let mut set = BuddySet::new();
        set.insert_blocks(&mut pool, 0, 16);
        set.alloc_block(&mut pool, 2).unwrap();

        assert_eq!(set.find_containing(&pool, 2), None);
        assert_eq!(set.find_containing(&pool, 5), Some(BuddyBlock::new(4, 2)));
        assert_eq!(set.find_containing(&pool, 15), Some(BuddyBlock::new(8, 3)));
        assert!(set.overlaps_free(&pool, 3, 2));
        assert!(!set.overlaps_free(&pool, 0, 4));
    }

    #[test]
    fn test_buddy_outside_pool() {
        let mut backing = available(12);
        let mut pool = DescriptorPool::new(&mut backing, 0);
        let mut set = BuddySet::new();
        set.insert_blocks(&mut pool, 0, 12);

        assert_eq!(blocks(&set, &pool), [(8, 2), (0, 3)]);
        // buddies at 12 (order 2) and 8 (order 3) would reach past the pool
        assert_eq!(set.buddy_of(&pool, 8, 2), None);
        assert_eq!(set.buddy_of(&pool, 0, 3), None);
        assert_eq!(set.buddy_of(&pool, 8, 1), Some(10));
    }
}
