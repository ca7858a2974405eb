use std::collections::VecDeque;
use std::sync::Arc;

use log::trace;
use parking_lot::{Mutex, RwLock};

use crate::common::types::{FrameId, Page, PageId, PagePtr, INVALID_PAGE_ID, PAGE_SIZE};
use crate::container::extendible_hash::PageTable;
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::replacer::{LruKReplacer, Replacer};
use crate::storage::disk::DiskManager;

/// Directory bucket size for the page table
const PAGE_TABLE_BUCKET_SIZE: usize = 4;

/// Per-frame bookkeeping. Mutated only under the pool latch; the page
/// contents themselves are guarded by the page's own rw-latch.
struct FrameMeta {
    page_id: PageId,
    pin_count: u32,
    is_dirty: bool,
}

struct PoolState {
    metas: Vec<FrameMeta>,
    free_list: VecDeque<FrameId>,
}

/// BufferPoolManager owns a fixed array of in-memory frames and moves pages
/// between them and the disk manager. The page directory (an extendible hash
/// table) resolves page id -> frame id; the LRU-K replacer picks victims.
///
/// One latch serializes every public operation, so a call holds it for at
/// most one synchronous disk read or write. `flush_page` is the exception:
/// it copies the page outside the pool latch so it can be called while the
/// page is latched elsewhere.
pub struct BufferPoolManager {
    pool_size: usize,
    frames: Vec<PagePtr>,
    page_table: PageTable,
    replacer: Box<dyn Replacer>,
    disk_manager: Arc<DiskManager>,
    state: Mutex<PoolState>,
}

impl BufferPoolManager {
    /// Buffer pool with the default LRU-K replacement policy.
    pub fn new(pool_size: usize, replacer_k: usize, disk_manager: Arc<DiskManager>) -> Self {
        Self::with_replacer(
            pool_size,
            Box::new(LruKReplacer::new(pool_size, replacer_k)),
            disk_manager,
        )
    }

    /// Buffer pool with a caller-chosen replacement policy.
    pub fn with_replacer(
        pool_size: usize,
        replacer: Box<dyn Replacer>,
        disk_manager: Arc<DiskManager>,
    ) -> Self {
        let mut frames = Vec::with_capacity(pool_size);
        let mut metas = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);
        for i in 0..pool_size {
            frames.push(Arc::new(RwLock::new(Page::new(INVALID_PAGE_ID))));
            metas.push(FrameMeta {
                page_id: INVALID_PAGE_ID,
                pin_count: 0,
                is_dirty: false,
            });
            free_list.push_back(i as FrameId);
        }

        Self {
            pool_size,
            frames,
            page_table: PageTable::new(PAGE_TABLE_BUCKET_SIZE),
            replacer,
            disk_manager,
            state: Mutex::new(PoolState { metas, free_list }),
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Allocate a fresh page and pin it into a frame. Fails with
    /// `BufferPoolFull` when every frame is pinned.
    pub fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        let mut state = self.state.lock();
        let frame_id = self.acquire_frame(&mut state)?;
        let page_id = self.disk_manager.allocate_page();

        {
            let mut page = self.frames[frame_id as usize].write();
            page.page_id = page_id;
            page.data.fill(0);
        }
        let meta = &mut state.metas[frame_id as usize];
        meta.page_id = page_id;
        meta.pin_count = 1;
        meta.is_dirty = false;

        self.page_table.insert(page_id, frame_id);
        self.replacer.record_access(frame_id);
        self.replacer.set_evictable(frame_id, false);

        Ok((Arc::clone(&self.frames[frame_id as usize]), page_id))
    }

    /// Pin the page, reading it from disk if it is not resident. Fails with
    /// `BufferPoolFull` when it is absent and every frame is pinned.
    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::InvalidPageId(page_id));
        }
        let mut state = self.state.lock();

        if let Some(frame_id) = self.page_table.find(&page_id) {
            state.metas[frame_id as usize].pin_count += 1;
            self.replacer.record_access(frame_id);
            self.replacer.set_evictable(frame_id, false);
            return Ok(Arc::clone(&self.frames[frame_id as usize]));
        }

        let frame_id = self.acquire_frame(&mut state)?;
        {
            let mut page = self.frames[frame_id as usize].write();
            page.page_id = page_id;
            self.disk_manager.read_page(page_id, &mut page.data)?;
        }
        let meta = &mut state.metas[frame_id as usize];
        meta.page_id = page_id;
        meta.pin_count = 1;
        meta.is_dirty = false;

        self.page_table.insert(page_id, frame_id);
        self.replacer.record_access(frame_id);
        self.replacer.set_evictable(frame_id, false);

        Ok(Arc::clone(&self.frames[frame_id as usize]))
    }

    /// Drop one pin on the page. The dirty bit is a sticky disjunction: once
    /// set it survives later unpins with `is_dirty = false`. Returns false
    /// if the page is not resident or already unpinned.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let mut state = self.state.lock();
        let Some(frame_id) = self.page_table.find(&page_id) else {
            return false;
        };
        let meta = &mut state.metas[frame_id as usize];
        if meta.pin_count == 0 {
            return false;
        }
        meta.is_dirty |= is_dirty;
        meta.pin_count -= 1;
        if meta.pin_count == 0 {
            self.replacer.set_evictable(frame_id, true);
        }
        true
    }

    /// Write the page's bytes through to disk and clear its dirty bit.
    /// Callable at any pin count; flushing neither evicts nor frees.
    pub fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let frame_id = {
            let _state = self.state.lock();
            self.page_table
                .find(&page_id)
                .ok_or(BufferPoolError::PageNotFound(page_id))?
        };

        // Copy the bytes under the page latch but outside the pool latch, so
        // a thread holding this page's latch can never deadlock a flusher.
        let mut buf = [0u8; PAGE_SIZE];
        {
            let page = self.frames[frame_id as usize].read();
            buf.copy_from_slice(&page.data);
        }
        self.disk_manager.write_page(page_id, &buf)?;

        let mut state = self.state.lock();
        if self.page_table.find(&page_id) == Some(frame_id) {
            state.metas[frame_id as usize].is_dirty = false;
        }
        Ok(())
    }

    /// Flush every resident page.
    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        let resident: Vec<PageId> = {
            let state = self.state.lock();
            state
                .metas
                .iter()
                .map(|m| m.page_id)
                .filter(|&id| id != INVALID_PAGE_ID)
                .collect()
        };
        for page_id in resident {
            match self.flush_page(page_id) {
                Ok(()) | Err(BufferPoolError::PageNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Remove the page from the pool and release its id back to the disk
    /// manager. `Ok(true)` if the page was absent or freed, `Ok(false)` if
    /// it is pinned.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool, BufferPoolError> {
        let mut state = self.state.lock();
        let Some(frame_id) = self.page_table.find(&page_id) else {
            return Ok(true);
        };
        if state.metas[frame_id as usize].pin_count > 0 {
            return Ok(false);
        }

        {
            let mut page = self.frames[frame_id as usize].write();
            page.page_id = INVALID_PAGE_ID;
            page.data.fill(0);
        }
        let meta = &mut state.metas[frame_id as usize];
        meta.page_id = INVALID_PAGE_ID;
        meta.pin_count = 0;
        meta.is_dirty = false;

        self.page_table.remove(&page_id);
        self.replacer.remove(frame_id);
        state.free_list.push_back(frame_id);
        self.disk_manager.deallocate_page(page_id);
        Ok(true)
    }

    /// Grab a frame for reuse: free list first, then a replacer victim.
    /// Dirty victims are written back, and the victim's directory mapping is
    /// removed before the caller installs a new one.
    fn acquire_frame(&self, state: &mut PoolState) -> Result<FrameId, BufferPoolError> {
        if let Some(frame_id) = state.free_list.pop_front() {
            return Ok(frame_id);
        }

        let frame_id = self.replacer.evict().ok_or(BufferPoolError::BufferPoolFull)?;
        let meta = &mut state.metas[frame_id as usize];
        debug_assert_eq!(meta.pin_count, 0, "victim frame must be unpinned");

        let old_page_id = meta.page_id;
        if old_page_id != INVALID_PAGE_ID {
            if meta.is_dirty {
                trace!("evicting dirty page {old_page_id} from frame {frame_id}");
                let page = self.frames[frame_id as usize].read();
                self.disk_manager.write_page(old_page_id, &page.data)?;
            } else {
                trace!("evicting clean page {old_page_id} from frame {frame_id}");
            }
            self.page_table.remove(&old_page_id);
        }
        meta.page_id = INVALID_PAGE_ID;
        meta.is_dirty = false;
        Ok(frame_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn make_pool(pool_size: usize) -> (BufferPoolManager, NamedTempFile) {
        let file = NamedTempFile::new().unwrap();
        let disk = Arc::new(DiskManager::new(file.path()).unwrap());
        (BufferPoolManager::new(pool_size, 2, disk), file)
    }

    #[test]
    fn test_new_page_pins_frame() {
        let (pool, _file) = make_pool(4);
        let (page, page_id) = pool.new_page().unwrap();
        assert_eq!(page.read().page_id, page_id);

        // pinned page cannot be deleted
        assert!(!pool.delete_page(page_id).unwrap());
        assert!(pool.unpin_page(page_id, false));
        assert!(pool.delete_page(page_id).unwrap());
    }

    #[test]
    fn test_unpin_twice_fails() {
        let (pool, _file) = make_pool(4);
        let (_page, page_id) = pool.new_page().unwrap();
        assert!(pool.unpin_page(page_id, false));
        assert!(!pool.unpin_page(page_id, false));
    }

    #[test]
    fn test_pool_exhaustion() {
        let (pool, _file) = make_pool(3);
        let mut ids = Vec::new();
        for _ in 0..3 {
            let (_page, id) = pool.new_page().unwrap();
            ids.push(id);
        }
        assert!(matches!(
            pool.new_page(),
            Err(BufferPoolError::BufferPoolFull)
        ));
        assert!(pool.unpin_page(ids[0], false));
        assert!(pool.new_page().is_ok());
    }

    #[test]
    fn test_dirty_bit_is_sticky() {
        let (pool, _file) = make_pool(3);
        let (page, page_id) = pool.new_page().unwrap();
        page.write().data[0] = 7;

        // pin a second time, then unpin once dirty and once clean
        pool.fetch_page(page_id).unwrap();
        assert!(pool.unpin_page(page_id, true));
        assert!(pool.unpin_page(page_id, false));

        // force eviction; the write must survive
        for _ in 0..3 {
            let (_p, id) = pool.new_page().unwrap();
            pool.unpin_page(id, false);
        }
        let page = pool.fetch_page(page_id).unwrap();
        assert_eq!(page.read().data[0], 7);
        pool.unpin_page(page_id, false);
    }

    #[test]
    fn test_delete_absent_page_is_ok() {
        let (pool, _file) = make_pool(2);
        assert!(pool.delete_page(999).unwrap());
    }
}
