//! Buddy page allocator module
//!
//! This module provides the buddy system implementation with:
//! - Sorted intrusive free lists, one per order
//! - Split/merge primitives and cascading merges
//! - Range insertion and removal
//! - Statistics and free-area dumps

pub mod buddy_allocator;
pub mod buddy_block;
pub mod buddy_set;
pub mod free_list;
pub mod stats;

pub use buddy_allocator::BuddyPageAllocator;
pub use buddy_block::{alignment, block_pages, buddy_pfn, order_for_pages, BuddyBlock, MAX_ORDER};
pub use buddy_set::BuddySet;
pub use free_list::{FreeList, FreeListIter};
#[cfg(feature = "tracking")]
pub use stats::MemoryStatsReporter;
pub use stats::{BuddyStats, FreeAreaDisplay};
