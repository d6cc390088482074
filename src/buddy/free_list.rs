//! Intrusive free list threaded through page descriptors
//!
//! Each list keeps only its head and length; the links live in the
//! `next_free` field of the descriptor heading each block.

#[cfg(feature = "log")]
use log::{error, warn};

use crate::page_descriptor::DescriptorPool;
use crate::Pfn;

/// Free list of block heads for a single order
///
/// Entries are kept sorted by ascending pfn, so the front is always the
/// lowest-addressed free block.
pub struct FreeList {
    head: Option<Pfn>,
    len: usize,
}

impl FreeList {
    /// Create a new empty free list
    pub const fn new() -> Self {
        Self { head: None, len: 0 }
    }

    /// Insert a block head in sorted order (ascending by pfn)
    ///
    /// Returns false if the block is already on the list or the list is corrupted.
    pub fn insert_sorted(&mut self, pool: &mut DescriptorPool, pfn: Pfn) -> bool {
        if !pool.contains(pfn) {
            error!("Block head {:#x} is outside the descriptor pool", pfn);
            return false;
        }

        // Find insertion position
        let mut prev = None;
        let mut current = self.head;
        let mut visited = 0;

        while let Some(cur) = current {
            if visited > self.len {
                error!("Potential cycle detected during insert");
                return false;
            }
            if cur == pfn {
                return false;
            }
            if cur > pfn {
                break;
            }
            match pool.pfn_to_pgd(cur) {
                Some(pgd) => {
                    prev = current;
                    current = pgd.next_free;
                }
                None => {
                    error!("Invalid link {:#x} in free list", cur);
                    return false;
                }
            }
            visited += 1;
        }

        if let Some(pgd) = pool.pfn_to_pgd_mut(pfn) {
            pgd.next_free = current;
        }
        match prev {
            Some(p) => {
                if let Some(prev_pgd) = pool.pfn_to_pgd_mut(p) {
                    prev_pgd.next_free = Some(pfn);
                }
            }
            None => self.head = Some(pfn),
        }

        self.len += 1;
        true
    }

    /// Find a block head by pfn
    ///
    /// Returns `Some(prev)` where `prev` is the entry before it (or None if head).
    pub fn find_by_pfn(&self, pool: &DescriptorPool, pfn: Pfn) -> Option<Option<Pfn>> {
        let mut prev = None;
        let mut current = self.head;
        let mut visited = 0;

        while let Some(cur) = current {
            if visited > self.len {
                error!("Potential cycle detected during search");
                return None;
            }
            // Early termination: list is sorted by pfn
            if cur > pfn {
                break;
            }
            if cur == pfn {
                return Some(prev);
            }
            prev = current;
            current = pool.pfn_to_pgd(cur)?.next_free;
            visited += 1;
        }

        None
    }

    pub fn contains(&self, pool: &DescriptorPool, pfn: Pfn) -> bool {
        self.find_by_pfn(pool, pfn).is_some()
    }

    /// Remove a block head from the list
    pub fn remove(&mut self, pool: &mut DescriptorPool, pfn: Pfn) -> bool {
        let Some(prev) = self.find_by_pfn(pool, pfn) else {
            warn!("Block {:#x} is not on this free list", pfn);
            return false;
        };
        self.remove_with_prev(pool, pfn, prev)
    }

    /// Unlink `pfn` given its predecessor (O(1))
    fn remove_with_prev(&mut self, pool: &mut DescriptorPool, pfn: Pfn, prev: Option<Pfn>) -> bool {
        let Some(pgd) = pool.pfn_to_pgd_mut(pfn) else {
            return false;
        };
        let next = pgd.next_free.take();

        match prev {
            Some(p) => match pool.pfn_to_pgd_mut(p) {
                Some(prev_pgd) => prev_pgd.next_free = next,
                None => return false,
            },
            None => self.head = next,
        }

        self.len -= 1;
        true
    }

    /// Pop the lowest block head
    pub fn pop_front(&mut self, pool: &mut DescriptorPool) -> Option<Pfn> {
        let head = self.head?;
        match pool.pfn_to_pgd_mut(head) {
            Some(pgd) => {
                self.head = pgd.next_free.take();
                self.len -= 1;
                Some(head)
            }
            None => {
                error!("Head {:#x} is corrupted", head);
                None
            }
        }
    }

    /// Lowest block head without removing it
    pub fn front(&self) -> Option<Pfn> {
        self.head
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if any block head falls within `[start, end)`
    pub fn has_block_in_range(&self, pool: &DescriptorPool, start: Pfn, end: Pfn) -> bool {
        for pfn in self.iter(pool) {
            // Early termination: list is sorted by pfn
            if pfn >= end {
                break;
            }
            if pfn >= start {
                return true;
            }
        }
        false
    }

    pub fn iter<'a>(&'a self, pool: &'a DescriptorPool<'a>) -> FreeListIter<'a> {
        FreeListIter {
            pool,
            current: self.head,
            remaining: self.len,
        }
    }

    /// Unlink every entry
    pub fn clear(&mut self, pool: &mut DescriptorPool) {
        while self.pop_front(pool).is_some() {}
    }
}

impl Default for FreeList {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over the block heads of a FreeList
pub struct FreeListIter<'a> {
    pool: &'a DescriptorPool<'a>,
    current: Option<Pfn>,
    remaining: usize,
}

impl Iterator for FreeListIter<'_> {
    type Item = Pfn;

    fn next(&mut self) -> Option<Self::Item> {
        let pfn = self.current?;
        if self.remaining == 0 {
            error!("Free list is longer than its recorded length");
            self.current = None;
            return None;
        }
        self.remaining -= 1;
        self.current = self.pool.pfn_to_pgd(pfn).and_then(|pgd| pgd.next_free);
        Some(pfn)
    }
}
