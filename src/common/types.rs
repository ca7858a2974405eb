use std::fmt;
use std::sync::Arc;

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{RawRwLock, RwLock};

/// Page size in bytes (4KB)
pub const PAGE_SIZE: usize = 4096;

/// Page ID type; negative ids are never allocated
pub type PageId = i32;

/// Sentinel for "no page"
pub const INVALID_PAGE_ID: PageId = -1;

/// The header page holding the index-name -> root-page-id directory
pub const HEADER_PAGE_ID: PageId = 0;

/// Buffer pool frame ID type
pub type FrameId = i32;

/// Transaction ID type
pub type TxnId = u32;

/// Table object ID type
pub type TableOid = u32;

/// Record ID: identifies a tuple as (page, slot)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Rid {
    pub page_id: PageId,
    pub slot: u32,
}

impl Rid {
    pub fn new(page_id: PageId, slot: u32) -> Self {
        Self { page_id, slot }
    }
}

impl fmt::Display for Rid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.page_id, self.slot)
    }
}

/// In-memory copy of an on-disk page. The surrounding `RwLock` doubles as the
/// frame's rw-latch; pin counts and dirty bits live in the buffer pool's frame
/// table, not here.
pub struct Page {
    pub page_id: PageId,
    pub data: [u8; PAGE_SIZE],
}

impl Page {
    pub fn new(page_id: PageId) -> Self {
        Self {
            page_id,
            data: [0; PAGE_SIZE],
        }
    }
}

/// Smart pointer to a latched page
pub type PagePtr = Arc<RwLock<Page>>;

/// Read latch held across function boundaries (keeps the page alive)
pub type PageReadGuard = ArcRwLockReadGuard<RawRwLock, Page>;

/// Write latch held across function boundaries
pub type PageWriteGuard = ArcRwLockWriteGuard<RawRwLock, Page>;
