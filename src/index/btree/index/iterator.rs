use std::marker::PhantomData;
use std::sync::Arc;

use log::warn;

use crate::common::types::{PageId, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::index::base::BPlusTree;
use crate::index::btree::key::{IndexKey, IndexValue, KeyComparator};
use crate::index::btree::page::{BTreePageHeader, LeafView};
use crate::storage::buffer::BufferPoolManager;

/// Forward iterator over the leaf chain in ascending key order.
///
/// Between steps it holds no latch and no pin, only the current leaf id, the
/// slot index, and cached copies of the leaf's size and right-sibling link;
/// each step re-latches the leaf briefly to copy one entry out.
pub struct TreeIterator<K, V> {
    buffer_pool: Arc<BufferPoolManager>,
    current: PageId,
    index: usize,
    leaf_size: usize,
    next_leaf: PageId,
    _phantom: PhantomData<(fn() -> K, fn() -> V)>,
}

impl<K, V> TreeIterator<K, V> {
    pub(crate) fn end(buffer_pool: Arc<BufferPoolManager>) -> Self {
        Self {
            buffer_pool,
            current: INVALID_PAGE_ID,
            index: 0,
            leaf_size: 0,
            next_leaf: INVALID_PAGE_ID,
            _phantom: PhantomData,
        }
    }

    pub(crate) fn positioned(
        buffer_pool: Arc<BufferPoolManager>,
        leaf_id: PageId,
        index: usize,
        leaf_size: usize,
        next_leaf: PageId,
    ) -> Self {
        Self {
            buffer_pool,
            current: leaf_id,
            index,
            leaf_size,
            next_leaf,
            _phantom: PhantomData,
        }
    }

    /// True once the iterator has run off the end of the leaf chain.
    pub fn is_end(&self) -> bool {
        self.current == INVALID_PAGE_ID
    }
}

impl<K: IndexKey, V: IndexValue> Iterator for TreeIterator<K, V> {
    type Item = (K, V);

    fn next(&mut self) -> Option<(K, V)> {
        loop {
            if self.current == INVALID_PAGE_ID {
                return None;
            }
            let page = match self.buffer_pool.fetch_page(self.current) {
                Ok(page) => page,
                Err(e) => {
                    warn!("index iterator stopped: {e}");
                    self.current = INVALID_PAGE_ID;
                    return None;
                }
            };
            let guard = page.read_arc();
            if !BTreePageHeader::new(&guard.data[..]).is_leaf() {
                // The leaf was deleted and its page recycled underneath us.
                drop(guard);
                self.buffer_pool.unpin_page(self.current, false);
                self.current = INVALID_PAGE_ID;
                return None;
            }

            let item = {
                let leaf: LeafView<&[u8], K, V> = LeafView::new(&guard.data[..]);
                // refresh the cached shape; a concurrent split or merge may
                // have changed it since the last step
                self.leaf_size = leaf.size();
                self.next_leaf = leaf.next_leaf_id();
                (self.index < self.leaf_size)
                    .then(|| (leaf.key_at(self.index), leaf.value_at(self.index)))
            };
            let page_id = self.current;
            drop(guard);
            self.buffer_pool.unpin_page(page_id, false);

            match item {
                Some(item) => {
                    self.index += 1;
                    return Some(item);
                }
                None => {
                    self.current = self.next_leaf;
                    self.index = 0;
                }
            }
        }
    }
}

impl<K, V, C> BPlusTree<K, V, C>
where
    K: IndexKey,
    V: IndexValue,
    C: KeyComparator<K>,
{
    /// Iterator over the whole tree, starting at the leftmost entry.
    pub fn begin(&self) -> Result<TreeIterator<K, V>, BTreeError> {
        let Some((leaf_id, guard)) = self.find_leaf_read(None)? else {
            return Ok(TreeIterator::end(Arc::clone(&self.buffer_pool)));
        };
        let (leaf_size, next_leaf) = {
            let leaf: LeafView<&[u8], K, V> = LeafView::new(&guard.data[..]);
            (leaf.size(), leaf.next_leaf_id())
        };
        drop(guard);
        self.buffer_pool.unpin_page(leaf_id, false);
        Ok(TreeIterator::positioned(
            Arc::clone(&self.buffer_pool),
            leaf_id,
            0,
            leaf_size,
            next_leaf,
        ))
    }

    /// Iterator positioned at the entry whose key equals `key`, or the end
    /// iterator when the key is absent.
    pub fn begin_at(&self, key: &K) -> Result<TreeIterator<K, V>, BTreeError> {
        let Some((leaf_id, guard)) = self.find_leaf_read(Some(key))? else {
            return Ok(TreeIterator::end(Arc::clone(&self.buffer_pool)));
        };
        let found = {
            let leaf: LeafView<&[u8], K, V> = LeafView::new(&guard.data[..]);
            leaf.find_key_index(key, &self.comparator)
                .map(|index| (index, leaf.size(), leaf.next_leaf_id()))
        };
        drop(guard);
        self.buffer_pool.unpin_page(leaf_id, false);
        match found {
            Some((index, leaf_size, next_leaf)) => Ok(TreeIterator::positioned(
                Arc::clone(&self.buffer_pool),
                leaf_id,
                index,
                leaf_size,
                next_leaf,
            )),
            None => Ok(TreeIterator::end(Arc::clone(&self.buffer_pool))),
        }
    }
}
