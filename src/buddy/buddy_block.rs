//! Buddy block metadata
//!
//! A block is a run of `2^order` frames starting at an order-aligned pfn.
//! It is never materialized; its identity is the pair (first pfn, order).

use crate::Pfn;

/// Highest order managed (inclusive); blocks span at most `2^MAX_ORDER` frames.
pub const MAX_ORDER: usize = 18;

/// Buddy block identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct BuddyBlock {
    pub pfn: Pfn,
    pub order: usize,
}

impl BuddyBlock {
    pub const fn new(pfn: Pfn, order: usize) -> Self {
        Self { pfn, order }
    }

    /// Number of frames in this block
    pub const fn pages(&self) -> usize {
        block_pages(self.order)
    }

    /// One past the last frame of this block
    pub const fn end_pfn(&self) -> Pfn {
        self.pfn + self.pages()
    }

    pub const fn contains(&self, pfn: Pfn) -> bool {
        pfn >= self.pfn && pfn < self.end_pfn()
    }
}

/// Number of frames in a block of the given order.
#[inline]
pub const fn block_pages(order: usize) -> usize {
    1 << order
}

/// Whether `pfn` is aligned to a block of `order`.
///
/// Applied at `order + 1` this also tells whether a block is the low half
/// of its parent.
#[inline]
pub const fn alignment(pfn: Pfn, order: usize) -> bool {
    assert!(order < usize::BITS as usize, "order out of range");
    crate::is_aligned(pfn, block_pages(order))
}

/// First pfn of the buddy of the order-`order` block starting at `pfn`.
///
/// Returns `None` if the order is out of range or `pfn` is not aligned to it.
#[inline]
pub const fn buddy_pfn(pfn: Pfn, order: usize) -> Option<Pfn> {
    if order > MAX_ORDER || !alignment(pfn, order) {
        return None;
    }
    if alignment(pfn, order + 1) {
        Some(pfn + block_pages(order))
    } else {
        Some(pfn - block_pages(order))
    }
}

/// Smallest order whose block holds `num_pages` frames.
///
/// Returns `None` for zero pages or requests beyond `2^MAX_ORDER` frames.
pub const fn order_for_pages(num_pages: usize) -> Option<usize> {
    if num_pages == 0 || num_pages > block_pages(MAX_ORDER) {
        return None;
    }
    Some(num_pages.next_power_of_two().trailing_zeros() as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alignment() {
        assert!(alignment(0, MAX_ORDER));
        assert!(alignment(8, 3));
        assert!(!alignment(8, 4));
        assert!(alignment(7, 0));
        assert!(!alignment(6, 2));
    }

    #[test]
    fn test_buddy_pfn() {
        assert_eq!(buddy_pfn(0, 0), Some(1));
        assert_eq!(buddy_pfn(1, 0), Some(0));
        assert_eq!(buddy_pfn(8, 3), Some(0));
        assert_eq!(buddy_pfn(16, 3), Some(24));
        assert_eq!(buddy_pfn(0, MAX_ORDER), Some(1 << MAX_ORDER));
        // misaligned or out of range
        assert_eq!(buddy_pfn(4, 3), None);
        assert_eq!(buddy_pfn(0, MAX_ORDER + 1), None);
    }

    #[test]
    fn test_buddies_share_parent() {
        for order in 0..MAX_ORDER {
            let pfn = 3 << order;
            let buddy = buddy_pfn(pfn, order).unwrap();
            assert_eq!(buddy_pfn(buddy, order), Some(pfn));
            assert!(alignment(pfn.min(buddy), order + 1));
        }
    }

    #[test]
    fn test_block_bounds() {
        let block = BuddyBlock::new(16, 2);
        assert_eq!(block.pages(), 4);
        assert_eq!(block.end_pfn(), 20);
        assert!(block.contains(19));
        assert!(!block.contains(20));
        assert!(!block.contains(15));
    }

    #[test]
    fn test_order_for_pages() {
        assert_eq!(order_for_pages(0), None);
        assert_eq!(order_for_pages(1), Some(0));
        assert_eq!(order_for_pages(3), Some(2));
        assert_eq!(order_for_pages(4), Some(2));
        assert_eq!(order_for_pages(1 << MAX_ORDER), Some(MAX_ORDER));
        assert_eq!(order_for_pages((1 << MAX_ORDER) + 1), None);
    }
}
