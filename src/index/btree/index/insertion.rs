use std::cmp::Ordering;

use crate::common::types::{PageId, PageWriteGuard, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::index::base::{BPlusTree, Context, LatchedPage, WriteOp};
use crate::index::btree::key::{IndexKey, IndexValue, KeyComparator};
use crate::index::btree::page::{BTreePageHeader, InternalView, LeafView};

impl<K, V, C> BPlusTree<K, V, C>
where
    K: IndexKey,
    V: IndexValue,
    C: KeyComparator<K>,
{
    /// Insert a key/value pair. Returns false (leaving the tree unchanged)
    /// if the key is already present.
    pub fn insert(&self, key: &K, value: &V) -> Result<bool, BTreeError> {
        let mut ctx = Context::new(&self.buffer_pool);
        ctx.root_guard = Some(self.root_id.lock());

        if ctx.root_page_id() == INVALID_PAGE_ID {
            self.start_new_tree(&mut ctx, key, value)?;
            return Ok(true);
        }

        self.descend_write(&mut ctx, key, WriteOp::Insert)?;

        let (duplicate, has_room) = {
            let top = ctx.stack.last().expect("leaf latched");
            let guard = top.guard.as_ref().expect("latched");
            let leaf: LeafView<&[u8], K, V> = LeafView::new(&guard.data[..]);
            (
                leaf.find_key_index(key, &self.comparator).is_some(),
                leaf.size() < self.leaf_max_size - 1,
            )
        };
        if duplicate {
            return Ok(false);
        }

        if has_room {
            let top = ctx.stack.last_mut().expect("leaf latched");
            let guard = top.guard.as_mut().expect("latched");
            let mut leaf: LeafView<&mut [u8], K, V> = LeafView::new(&mut guard.data[..]);
            let position = leaf.insert_position(key, &self.comparator);
            leaf.insert_at(position, key, value);
            top.dirty = true;
            return Ok(true);
        }

        self.split_leaf_and_insert(&mut ctx, key, value)?;
        Ok(true)
    }

    /// First insert into an empty tree: allocate a root leaf under the held
    /// root latch.
    fn start_new_tree(&self, ctx: &mut Context<'_>, key: &K, value: &V) -> Result<(), BTreeError> {
        let (page, page_id) = self.buffer_pool.new_page()?;
        {
            let mut page = page.write();
            let mut leaf: LeafView<&mut [u8], K, V> =
                LeafView::init(&mut page.data[..], page_id, INVALID_PAGE_ID, self.leaf_max_size);
            leaf.insert_at(0, key, value);
        }
        self.buffer_pool.unpin_page(page_id, true);
        ctx.set_root_page_id(page_id);
        self.update_root_record(page_id)
    }

    /// Split the overflowing leaf on top of the stack, adding `key`/`value`
    /// in the process, and thread the new right sibling into the parent.
    fn split_leaf_and_insert(
        &self,
        ctx: &mut Context<'_>,
        key: &K,
        value: &V,
    ) -> Result<(), BTreeError> {
        let mut leaf_entry = ctx.stack.pop().expect("leaf latched");

        // Scratch copy of every entry plus the incoming one, in order.
        let (mut entries, next_leaf, parent_id) = {
            let guard = leaf_entry.guard.as_ref().expect("latched");
            let leaf: LeafView<&[u8], K, V> = LeafView::new(&guard.data[..]);
            (leaf.entries(), leaf.next_leaf_id(), leaf.parent_id())
        };
        let position = entries
            .iter()
            .position(|(k, _)| self.comparator.compare(k, key) == Ordering::Greater)
            .unwrap_or(entries.len());
        entries.insert(position, (key.clone(), value.clone()));

        let (right_page, right_id) = match self.buffer_pool.new_page() {
            Ok(pair) => pair,
            Err(e) => {
                ctx.release(leaf_entry);
                return Err(e.into());
            }
        };
        let mut right_guard: PageWriteGuard = right_page.write_arc();

        let left_count = (self.leaf_max_size + 1) / 2;
        let separator = entries[left_count].0.clone();
        {
            let guard = leaf_entry.guard.as_mut().expect("latched");
            let mut left: LeafView<&mut [u8], K, V> = LeafView::new(&mut guard.data[..]);
            left.set_entries(&entries[..left_count]);
            left.set_next_leaf_id(right_id);
        }
        {
            let mut right: LeafView<&mut [u8], K, V> = LeafView::init(
                &mut right_guard.data[..],
                right_id,
                parent_id,
                self.leaf_max_size,
            );
            right.set_entries(&entries[left_count..]);
            right.set_next_leaf_id(next_leaf);
        }
        leaf_entry.dirty = true;

        self.insert_in_parent(ctx, leaf_entry, right_id, right_guard, separator)
    }

    /// Thread a freshly split-off `right` sibling of `left` into the parent,
    /// splitting upward as long as parents overflow.
    fn insert_in_parent(
        &self,
        ctx: &mut Context<'_>,
        mut left: LatchedPage,
        right_id: PageId,
        mut right_guard: PageWriteGuard,
        key: K,
    ) -> Result<(), BTreeError> {
        if ctx.stack.is_empty() {
            // `left` was the root: grow the tree by one level.
            let (root_page, new_root_id) = match self.buffer_pool.new_page() {
                Ok(pair) => pair,
                Err(e) => {
                    ctx.release(left);
                    drop(right_guard);
                    self.buffer_pool.unpin_page(right_id, true);
                    return Err(e.into());
                }
            };
            {
                let mut page = root_page.write();
                let mut root: InternalView<&mut [u8], K> = InternalView::init(
                    &mut page.data[..],
                    new_root_id,
                    INVALID_PAGE_ID,
                    self.internal_max_size,
                );
                root.push_back(None, left.page_id);
                root.push_back(Some(&key), right_id);
            }
            {
                let guard = left.guard.as_mut().expect("latched");
                BTreePageHeader::new(&mut guard.data[..]).set_parent_id(new_root_id);
            }
            BTreePageHeader::new(&mut right_guard.data[..]).set_parent_id(new_root_id);

            ctx.set_root_page_id(new_root_id);
            self.buffer_pool.unpin_page(new_root_id, true);
            left.dirty = true;
            ctx.release(left);
            drop(right_guard);
            self.buffer_pool.unpin_page(right_id, true);
            return self.update_root_record(new_root_id);
        }

        let mut parent_entry = ctx.stack.pop().expect("parent latched");
        let parent_id = parent_entry.page_id;
        let left_id = left.page_id;

        BTreePageHeader::new(&mut right_guard.data[..]).set_parent_id(parent_id);
        left.dirty = true;
        ctx.release(left);
        drop(right_guard);
        self.buffer_pool.unpin_page(right_id, true);

        let parent_size = {
            let guard = parent_entry.guard.as_ref().expect("latched");
            let parent: InternalView<&[u8], K> = InternalView::new(&guard.data[..]);
            parent.size()
        };

        if parent_size < self.internal_max_size {
            let guard = parent_entry.guard.as_mut().expect("latched");
            let mut parent: InternalView<&mut [u8], K> = InternalView::new(&mut guard.data[..]);
            let index = parent
                .position_of_child(left_id)
                .expect("split child under its parent");
            parent.insert_at(index + 1, &key, right_id);
            parent_entry.dirty = true;
            ctx.release(parent_entry);
            return Ok(());
        }

        // Parent overflows too: split it through a scratch array of
        // size + 1 entries and promote the middle key.
        let (mut entries, grandparent_id) = {
            let guard = parent_entry.guard.as_ref().expect("latched");
            let parent: InternalView<&[u8], K> = InternalView::new(&guard.data[..]);
            (parent.entries(), parent.parent_id())
        };
        let index = entries
            .iter()
            .position(|(_, child)| *child == left_id)
            .expect("split child under its parent");
        entries.insert(index + 1, (Some(key), right_id));

        let left_count = (parent_size + 2) / 2;
        let promoted = entries[left_count]
            .0
            .clone()
            .expect("promoted key is never slot 0");

        let (new_page, new_internal_id) = match self.buffer_pool.new_page() {
            Ok(pair) => pair,
            Err(e) => {
                ctx.release(parent_entry);
                return Err(e.into());
            }
        };
        let mut new_guard: PageWriteGuard = new_page.write_arc();
        {
            let guard = parent_entry.guard.as_mut().expect("latched");
            let mut parent: InternalView<&mut [u8], K> = InternalView::new(&mut guard.data[..]);
            parent.set_entries(&entries[..left_count]);
        }
        {
            let mut right_node: InternalView<&mut [u8], K> = InternalView::init(
                &mut new_guard.data[..],
                new_internal_id,
                grandparent_id,
                self.internal_max_size,
            );
            right_node.set_entries(&entries[left_count..]);
        }
        parent_entry.dirty = true;

        // Children that moved to the new sibling point at a new parent now.
        for (_, child_id) in &entries[left_count..] {
            let child_page = match self.buffer_pool.fetch_page(*child_id) {
                Ok(page) => page,
                Err(e) => {
                    ctx.release(parent_entry);
                    drop(new_guard);
                    self.buffer_pool.unpin_page(new_internal_id, true);
                    return Err(e.into());
                }
            };
            {
                let mut page = child_page.write();
                BTreePageHeader::new(&mut page.data[..]).set_parent_id(new_internal_id);
            }
            self.buffer_pool.unpin_page(*child_id, true);
        }

        self.insert_in_parent(ctx, parent_entry, new_internal_id, new_guard, promoted)
    }
}
