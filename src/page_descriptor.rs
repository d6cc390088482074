//! Page descriptors and pfn translation
//!
//! Descriptors are owned by the memory manager. The allocator borrows the
//! table for its lifetime and only touches the free link and the
//! availability flag of each record.

use core::mem::size_of;

use crate::Pfn;

/// Availability of a page frame.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum PageDescriptorType {
    /// Frame is absent or withheld from allocation.
    #[default]
    Reserved,
    /// Frame is present and managed by the allocator.
    Available,
}

/// Per-frame record
///
/// `next_free` is only meaningful while the frame heads a block on a free list.
#[derive(Debug, Default, Clone, Copy)]
pub struct PageDescriptor {
    pub(crate) next_free: Option<Pfn>,
    pub(crate) kind: PageDescriptorType,
}

impl PageDescriptor {
    pub const fn new() -> Self {
        Self {
            next_free: None,
            kind: PageDescriptorType::Reserved,
        }
    }

    pub fn kind(&self) -> PageDescriptorType {
        self.kind
    }

    pub fn is_available(&self) -> bool {
        self.kind == PageDescriptorType::Available
    }

    /// Next block head on the same free list, if any.
    pub fn next_free(&self) -> Option<Pfn> {
        self.next_free
    }
}

/// Borrowed descriptor table covering pfns `[base_pfn, base_pfn + len)`
pub struct DescriptorPool<'a> {
    descriptors: &'a mut [PageDescriptor],
    base_pfn: Pfn,
}

impl<'a> DescriptorPool<'a> {
    pub fn new(descriptors: &'a mut [PageDescriptor], base_pfn: Pfn) -> Self {
        Self {
            descriptors,
            base_pfn,
        }
    }

    /// A pool with no descriptors; every lookup fails.
    pub fn empty() -> Self {
        Self {
            descriptors: &mut [],
            base_pfn: 0,
        }
    }

    pub fn base_pfn(&self) -> Pfn {
        self.base_pfn
    }

    pub fn end_pfn(&self) -> Pfn {
        self.base_pfn + self.descriptors.len()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn contains(&self, pfn: Pfn) -> bool {
        pfn >= self.base_pfn && pfn < self.end_pfn()
    }

    /// Whether `[start, start + count)` lies wholly inside the pool.
    pub fn contains_range(&self, start: Pfn, count: usize) -> bool {
        match start.checked_add(count) {
            Some(end) => start >= self.base_pfn && end <= self.end_pfn(),
            None => false,
        }
    }

    pub fn pfn_to_pgd(&self, pfn: Pfn) -> Option<&PageDescriptor> {
        let index = pfn.checked_sub(self.base_pfn)?;
        self.descriptors.get(index)
    }

    pub fn pfn_to_pgd_mut(&mut self, pfn: Pfn) -> Option<&mut PageDescriptor> {
        let index = pfn.checked_sub(self.base_pfn)?;
        self.descriptors.get_mut(index)
    }

    /// Translate a descriptor reference back to its frame number.
    ///
    /// Returns `None` for descriptors that do not belong to this pool.
    pub fn pgd_to_pfn(&self, pgd: &PageDescriptor) -> Option<Pfn> {
        let base = self.descriptors.as_ptr() as usize;
        let addr = pgd as *const PageDescriptor as usize;
        let offset = addr.checked_sub(base)?;
        if offset % size_of::<PageDescriptor>() != 0 {
            return None;
        }
        let index = offset / size_of::<PageDescriptor>();
        (index < self.descriptors.len()).then(|| self.base_pfn + index)
    }

    /// Whether any frame of `[start, start + count)` is managed by the allocator.
    pub fn any_available(&self, start: Pfn, count: usize) -> bool {
        (start..start.saturating_add(count))
            .any(|pfn| self.pfn_to_pgd(pfn).is_some_and(PageDescriptor::is_available))
    }

    /// Whether every frame of `[start, start + count)` is inside the pool and
    /// managed by the allocator.
    pub fn all_available(&self, start: Pfn, count: usize) -> bool {
        (start..start.saturating_add(count))
            .all(|pfn| self.pfn_to_pgd(pfn).is_some_and(PageDescriptor::is_available))
    }

    /// Set the availability flag on every frame in `[start, start + count)`.
    pub(crate) fn mark_range(&mut self, start: Pfn, count: usize, kind: PageDescriptorType) {
        for pfn in start..start + count {
            if let Some(pgd) = self.pfn_to_pgd_mut(pfn) {
                pgd.kind = kind;
            }
        }
    }

    /// Forget all links and mark every frame reserved.
    pub(crate) fn reset(&mut self) {
        for pgd in self.descriptors.iter_mut() {
            *pgd = PageDescriptor::new();
        }
    }

    /// Give the descriptor table back to its owner.
    pub fn into_inner(self) -> &'a mut [PageDescriptor] {
        self.descriptors
    }
}

impl Default for DescriptorPool<'_> {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn test_pfn_translation() {
        let mut backing = vec![PageDescriptor::new(); 16];
        let pool = DescriptorPool::new(&mut backing, 0x100);

        assert_eq!(pool.base_pfn(), 0x100);
        assert_eq!(pool.end_pfn(), 0x110);
        assert!(pool.contains(0x10f));
        assert!(!pool.contains(0x110));
        assert!(!pool.contains(0xff));
        assert!(pool.pfn_to_pgd(0xff).is_none());

        let pgd = pool.pfn_to_pgd(0x105).unwrap();
        assert_eq!(pool.pgd_to_pfn(pgd), Some(0x105));
    }

    #[test]
    fn test_foreign_descriptor() {
        let mut backing = vec![PageDescriptor::new(); 4];
        let foreign = PageDescriptor::new();
        let pool = DescriptorPool::new(&mut backing, 0);

        assert_eq!(pool.pgd_to_pfn(&foreign), None);
    }

    #[test]
    fn test_contains_range() {
        let mut backing = vec![PageDescriptor::new(); 8];
        let pool = DescriptorPool::new(&mut backing, 8);

        assert!(pool.contains_range(8, 8));
        assert!(pool.contains_range(12, 0));
        assert!(!pool.contains_range(12, 5));
        assert!(!pool.contains_range(4, 4));
        assert!(!pool.contains_range(usize::MAX, 2));
    }

    #[test]
    fn test_mark_and_reset() {
        let mut backing = vec![PageDescriptor::new(); 8];
        let mut pool = DescriptorPool::new(&mut backing, 0);

        pool.mark_range(2, 3, PageDescriptorType::Available);
        assert!(!pool.pfn_to_pgd(1).unwrap().is_available());
        assert!(pool.pfn_to_pgd(2).unwrap().is_available());
        assert!(pool.pfn_to_pgd(4).unwrap().is_available());
        assert!(!pool.pfn_to_pgd(5).unwrap().is_available());

        assert!(pool.any_available(0, 3));
        assert!(!pool.any_available(5, 3));
        assert!(pool.all_available(2, 3));
        assert!(!pool.all_available(2, 4));
        assert!(!pool.all_available(6, 4));

        pool.pfn_to_pgd_mut(3).unwrap().next_free = Some(7);
        pool.reset();
        assert_eq!(pool.pfn_to_pgd(3).unwrap().next_free(), None);
        assert_eq!(
            pool.pfn_to_pgd(3).unwrap().kind(),
            PageDescriptorType::Reserved
        );
    }
}
