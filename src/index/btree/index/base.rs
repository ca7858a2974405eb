use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::common::types::{
    PageId, PageReadGuard, PageWriteGuard, HEADER_PAGE_ID, INVALID_PAGE_ID, PAGE_SIZE,
};
use crate::index::btree::error::BTreeError;
use crate::index::btree::key::{IndexKey, IndexValue, KeyComparator};
use crate::index::btree::page::{
    BTreePageHeader, InternalView, LeafView, INTERNAL_HEADER_SIZE, LEAF_HEADER_SIZE,
};
use crate::storage::buffer::BufferPoolManager;
use crate::storage::page::header_page::{HeaderPage, MAX_NAME_LEN};

/// Which structural change a write descent must guard against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteOp {
    Insert,
    Delete,
}

/// A pinned, write-latched page held during a write descent. The guard is
/// dropped (releasing the latch) strictly before the page is unpinned.
pub(crate) struct LatchedPage {
    pub page_id: PageId,
    pub guard: Option<PageWriteGuard>,
    pub dirty: bool,
}

/// Latch-crabbing state for one write operation: the `root_id_latch` guard
/// (the "virtual root page") plus the retained chain of write-latched
/// ancestors, shallowest first. Dropping the context releases whatever is
/// left, latches before pins, ancestors before descendants.
pub(crate) struct Context<'a> {
    buffer_pool: &'a BufferPoolManager,
    pub root_guard: Option<MutexGuard<'a, PageId>>,
    pub stack: Vec<LatchedPage>,
}

impl<'a> Context<'a> {
    pub fn new(buffer_pool: &'a BufferPoolManager) -> Self {
        Self {
            buffer_pool,
            root_guard: None,
            stack: Vec::new(),
        }
    }

    pub fn root_page_id(&self) -> PageId {
        **self.root_guard.as_ref().expect("root latch held")
    }

    pub fn set_root_page_id(&mut self, page_id: PageId) {
        **self.root_guard.as_mut().expect("root latch held") = page_id;
    }

    /// The current node is safe: everything above it can let go.
    pub fn release_ancestors(&mut self) {
        self.root_guard = None;
        while self.stack.len() > 1 {
            let mut entry = self.stack.remove(0);
            entry.guard = None;
            self.buffer_pool.unpin_page(entry.page_id, entry.dirty);
        }
    }

    /// Unlatch and unpin one finished page.
    pub fn release(&self, mut entry: LatchedPage) {
        entry.guard = None;
        self.buffer_pool.unpin_page(entry.page_id, entry.dirty);
    }
}

impl Drop for Context<'_> {
    fn drop(&mut self) {
        self.root_guard = None;
        for entry in self.stack.drain(..) {
            let mut entry = entry;
            entry.guard = None;
            self.buffer_pool.unpin_page(entry.page_id, entry.dirty);
        }
    }
}

/// B+Tree index over fixed-size buffer pool pages.
///
/// The tree itself owns nothing but `root_page_id`; every node lives in a
/// page and is reached through the buffer pool. Concurrent access relies on
/// per-page rw-latches driven by the crabbing protocol: readers hand over
/// latches parent-to-child, writers keep the chain of unsafe ancestors
/// latched until the child proves safe for the operation.
pub struct BPlusTree<K, V, C> {
    pub(crate) index_name: String,
    pub(crate) buffer_pool: Arc<BufferPoolManager>,
    pub(crate) comparator: C,
    pub(crate) leaf_max_size: usize,
    pub(crate) internal_max_size: usize,
    /// Guards every read or update of the root page id
    pub(crate) root_id: Mutex<PageId>,
    pub(crate) _phantom: PhantomData<(fn(K), fn(V))>,
}

impl<K, V, C> BPlusTree<K, V, C>
where
    K: IndexKey,
    V: IndexValue,
    C: KeyComparator<K>,
{
    /// Open or create the index named `name`, restoring its root from the
    /// header page if it was created before.
    pub fn new(
        name: &str,
        buffer_pool: Arc<BufferPoolManager>,
        comparator: C,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self, BTreeError> {
        assert!(leaf_max_size >= 3, "leaf max size too small");
        assert!(internal_max_size >= 3, "internal max size too small");
        if LEAF_HEADER_SIZE + leaf_max_size * (K::ENCODED_SIZE + V::ENCODED_SIZE) > PAGE_SIZE {
            return Err(BTreeError::NodeTooLarge {
                entries: leaf_max_size,
            });
        }
        if INTERNAL_HEADER_SIZE + internal_max_size * (K::ENCODED_SIZE + 4) > PAGE_SIZE {
            return Err(BTreeError::NodeTooLarge {
                entries: internal_max_size,
            });
        }
        if name.is_empty() || name.len() > MAX_NAME_LEN {
            return Err(BTreeError::InvalidIndexName(name.to_string()));
        }

        let header = buffer_pool.fetch_page(HEADER_PAGE_ID)?;
        let root_page_id = {
            let mut page = header.write();
            let mut view = HeaderPage::new(&mut page.data[..]);
            match view.get_root_id(name) {
                Some(root) => root,
                None => {
                    if !view.insert_record(name, INVALID_PAGE_ID) {
                        drop(page);
                        buffer_pool.unpin_page(HEADER_PAGE_ID, false);
                        return Err(BTreeError::HeaderPageFull);
                    }
                    INVALID_PAGE_ID
                }
            }
        };
        buffer_pool.unpin_page(HEADER_PAGE_ID, true);

        Ok(Self {
            index_name: name.to_string(),
            buffer_pool,
            comparator,
            leaf_max_size,
            internal_max_size,
            root_id: Mutex::new(root_page_id),
            _phantom: PhantomData,
        })
    }

    pub fn is_empty(&self) -> bool {
        *self.root_id.lock() == INVALID_PAGE_ID
    }

    /// Point lookup.
    pub fn get_value(&self, key: &K) -> Result<Option<V>, BTreeError> {
        let Some((leaf_id, guard)) = self.find_leaf_read(Some(key))? else {
            return Ok(None);
        };
        let result = {
            let leaf: LeafView<&[u8], K, V> = LeafView::new(&guard.data[..]);
            leaf.find_key_index(key, &self.comparator)
                .map(|i| leaf.value_at(i))
        };
        drop(guard);
        self.buffer_pool.unpin_page(leaf_id, false);
        Ok(result)
    }

    /// Smallest non-root occupancy for each node kind.
    pub(crate) fn min_size(&self, is_leaf: bool) -> usize {
        if is_leaf {
            // ceil((max - 1) / 2)
            self.leaf_max_size / 2
        } else {
            // ceil(max / 2)
            (self.internal_max_size + 1) / 2
        }
    }

    /// Read-crabbing descent: R-latch the child, then let the parent go.
    /// `key = None` descends to the leftmost leaf. Returns the pinned,
    /// R-latched leaf, or `None` on an empty tree.
    pub(crate) fn find_leaf_read(
        &self,
        key: Option<&K>,
    ) -> Result<Option<(PageId, PageReadGuard)>, BTreeError> {
        let root_latch = self.root_id.lock();
        let root_id = *root_latch;
        if root_id == INVALID_PAGE_ID {
            return Ok(None);
        }
        let page = self.buffer_pool.fetch_page(root_id)?;
        let mut guard: PageReadGuard = page.read_arc();
        drop(root_latch);

        let mut page_id = root_id;
        loop {
            let (is_leaf, child_id) = {
                let header = BTreePageHeader::new(&guard.data[..]);
                if header.is_leaf() {
                    (true, INVALID_PAGE_ID)
                } else {
                    let node: InternalView<&[u8], K> = InternalView::new(&guard.data[..]);
                    let index = match key {
                        Some(key) => node.child_index_for(key, &self.comparator),
                        None => 0,
                    };
                    (false, node.child_at(index))
                }
            };
            if is_leaf {
                return Ok(Some((page_id, guard)));
            }

            let child_page = match self.buffer_pool.fetch_page(child_id) {
                Ok(page) => page,
                Err(e) => {
                    drop(guard);
                    self.buffer_pool.unpin_page(page_id, false);
                    return Err(e.into());
                }
            };
            let child_guard: PageReadGuard = child_page.read_arc();
            drop(guard);
            self.buffer_pool.unpin_page(page_id, false);
            guard = child_guard;
            page_id = child_id;
        }
    }

    /// Write-crabbing descent from the current root to the leaf covering
    /// `key`. Ancestors stay latched in `ctx` until a child proves safe for
    /// `op`; on return the leaf is the top of `ctx.stack`.
    pub(crate) fn descend_write(
        &self,
        ctx: &mut Context<'_>,
        key: &K,
        op: WriteOp,
    ) -> Result<(), BTreeError> {
        let root_id = ctx.root_page_id();
        let page = self.buffer_pool.fetch_page(root_id)?;
        let guard: PageWriteGuard = page.write_arc();
        ctx.stack.push(LatchedPage {
            page_id: root_id,
            guard: Some(guard),
            dirty: false,
        });

        loop {
            let (is_leaf, child_id) = {
                let top = ctx.stack.last().expect("descent stack non-empty");
                let guard = top.guard.as_ref().expect("latched");
                let header = BTreePageHeader::new(&guard.data[..]);
                if header.is_leaf() {
                    (true, INVALID_PAGE_ID)
                } else {
                    let node: InternalView<&[u8], K> = InternalView::new(&guard.data[..]);
                    let index = node.child_index_for(key, &self.comparator);
                    (false, node.child_at(index))
                }
            };
            if is_leaf {
                return Ok(());
            }

            let child_page = self.buffer_pool.fetch_page(child_id)?;
            let child_guard: PageWriteGuard = child_page.write_arc();
            let child_safe = {
                let header = BTreePageHeader::new(&child_guard.data[..]);
                match op {
                    WriteOp::Insert => {
                        if header.is_leaf() {
                            header.size() < self.leaf_max_size - 1
                        } else {
                            header.size() < self.internal_max_size
                        }
                    }
                    WriteOp::Delete => header.size() > self.min_size(header.is_leaf()),
                }
            };
            ctx.stack.push(LatchedPage {
                page_id: child_id,
                guard: Some(child_guard),
                dirty: false,
            });
            if child_safe {
                ctx.release_ancestors();
            }
        }
    }

    /// Persist a root change into the header page directory.
    pub(crate) fn update_root_record(&self, root_id: PageId) -> Result<(), BTreeError> {
        let page = self.buffer_pool.fetch_page(HEADER_PAGE_ID)?;
        {
            let mut page = page.write();
            let mut view = HeaderPage::new(&mut page.data[..]);
            if !view.update_record(&self.index_name, root_id) {
                view.insert_record(&self.index_name, root_id);
            }
        }
        self.buffer_pool.unpin_page(HEADER_PAGE_ID, true);
        Ok(())
    }
}
