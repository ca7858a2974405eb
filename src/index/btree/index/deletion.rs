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
    /// Remove a key. Removing an absent key is a no-op.
    pub fn remove(&self, key: &K) -> Result<(), BTreeError> {
        let mut ctx = Context::new(&self.buffer_pool);
        ctx.root_guard = Some(self.root_id.lock());
        if ctx.root_page_id() == INVALID_PAGE_ID {
            return Ok(());
        }

        self.descend_write(&mut ctx, key, WriteOp::Delete)?;
        let leaf_entry = ctx.stack.pop().expect("leaf latched");
        self.delete_entry(&mut ctx, leaf_entry, key.clone())
    }

    /// Remove `key` from `node`, then restore the occupancy invariant by
    /// merging with or redistributing from a sibling, recursing into the
    /// parent when a merge removes a separator.
    fn delete_entry(
        &self,
        ctx: &mut Context<'_>,
        mut node: LatchedPage,
        key: K,
    ) -> Result<(), BTreeError> {
        let (is_leaf, removed, size, parent_id) = {
            let guard = node.guard.as_mut().expect("latched");
            let is_leaf = BTreePageHeader::new(&guard.data[..]).is_leaf();
            if is_leaf {
                let mut leaf: LeafView<&mut [u8], K, V> = LeafView::new(&mut guard.data[..]);
                let removed = match leaf.find_key_index(&key, &self.comparator) {
                    Some(index) => {
                        leaf.remove_at(index);
                        true
                    }
                    None => false,
                };
                (true, removed, leaf.size(), leaf.parent_id())
            } else {
                let mut internal: InternalView<&mut [u8], K> =
                    InternalView::new(&mut guard.data[..]);
                let position = (1..internal.size()).find(|&i| {
                    self.comparator.compare(&internal.key_at(i), &key) == Ordering::Equal
                });
                let removed = match position {
                    Some(index) => {
                        internal.remove_at(index);
                        true
                    }
                    None => false,
                };
                (false, removed, internal.size(), internal.parent_id())
            }
        };
        node.dirty = removed;
        if !removed {
            ctx.release(node);
            return Ok(());
        }

        // The root is exempt from the minimum-occupancy rule; it collapses
        // instead when it runs out of payload.
        if parent_id == INVALID_PAGE_ID {
            return self.shrink_root(ctx, node, is_leaf, size);
        }

        if size >= self.min_size(is_leaf) {
            ctx.release(node);
            return Ok(());
        }

        self.fix_underflow(ctx, node, is_leaf, size)
    }

    /// Collapse the root: an empty root leaf drops the tree, a root internal
    /// down to one child promotes that child.
    fn shrink_root(
        &self,
        ctx: &mut Context<'_>,
        node: LatchedPage,
        is_leaf: bool,
        size: usize,
    ) -> Result<(), BTreeError> {
        if is_leaf && size == 0 {
            let page_id = node.page_id;
            ctx.set_root_page_id(INVALID_PAGE_ID);
            ctx.release(node);
            self.buffer_pool.delete_page(page_id)?;
            return self.update_root_record(INVALID_PAGE_ID);
        }

        if !is_leaf && size == 1 {
            let child_id = {
                let guard = node.guard.as_ref().expect("latched");
                let internal: InternalView<&[u8], K> = InternalView::new(&guard.data[..]);
                internal.child_at(0)
            };
            let child_page = match self.buffer_pool.fetch_page(child_id) {
                Ok(page) => page,
                Err(e) => {
                    ctx.release(node);
                    return Err(e.into());
                }
            };
            {
                let mut page = child_page.write();
                BTreePageHeader::new(&mut page.data[..]).set_parent_id(INVALID_PAGE_ID);
            }
            self.buffer_pool.unpin_page(child_id, true);

            let page_id = node.page_id;
            ctx.set_root_page_id(child_id);
            ctx.release(node);
            self.buffer_pool.delete_page(page_id)?;
            return self.update_root_record(child_id);
        }

        ctx.release(node);
        Ok(())
    }

    /// Rebalance an underflowing non-root node against a sibling: merge when
    /// both fit in one page, redistribute one entry otherwise.
    fn fix_underflow(
        &self,
        ctx: &mut Context<'_>,
        node: LatchedPage,
        is_leaf: bool,
        size: usize,
    ) -> Result<(), BTreeError> {
        let parent_entry = ctx.stack.pop().expect("underflowing child keeps its parent");

        // Prefer the left sibling; the leftmost child falls back to its
        // right sibling. The separator sits between sibling and node.
        let (sibling_id, separator_index, sibling_is_left) = {
            let guard = parent_entry.guard.as_ref().expect("latched");
            let parent: InternalView<&[u8], K> = InternalView::new(&guard.data[..]);
            let position = parent
                .position_of_child(node.page_id)
                .expect("node under its parent");
            if position == 0 {
                (parent.child_at(1), 1, false)
            } else {
                (parent.child_at(position - 1), position, true)
            }
        };
        let separator = {
            let guard = parent_entry.guard.as_ref().expect("latched");
            let parent: InternalView<&[u8], K> = InternalView::new(&guard.data[..]);
            parent.key_at(separator_index)
        };

        let sibling_page = match self.buffer_pool.fetch_page(sibling_id) {
            Ok(page) => page,
            Err(e) => {
                ctx.release(node);
                ctx.release(parent_entry);
                return Err(e.into());
            }
        };
        let mut sibling_guard: PageWriteGuard = sibling_page.write_arc();
        let sibling_size = BTreePageHeader::new(&sibling_guard.data[..]).size();

        let capacity = if is_leaf {
            self.leaf_max_size - 1
        } else {
            self.internal_max_size
        };

        if sibling_size + size <= capacity {
            self.merge(
                ctx,
                parent_entry,
                node,
                sibling_id,
                sibling_guard,
                sibling_is_left,
                is_leaf,
                separator,
            )
        } else {
            self.redistribute(
                node,
                parent_entry,
                sibling_guard,
                sibling_id,
                separator_index,
                sibling_is_left,
                is_leaf,
                separator,
            )
        }
    }

    /// Concatenate node and sibling into the left page, delete the right
    /// page, and remove the separator from the parent.
    #[allow(clippy::too_many_arguments)]
    fn merge(
        &self,
        ctx: &mut Context<'_>,
        parent_entry: LatchedPage,
        mut node: LatchedPage,
        sibling_id: PageId,
        sibling_guard: PageWriteGuard,
        sibling_is_left: bool,
        is_leaf: bool,
        separator: K,
    ) -> Result<(), BTreeError> {
        // Normalize to (left, right): the survivor is always the left page.
        let node_guard = node.guard.take().expect("latched");
        let node_id = node.page_id;
        let (left_id, mut left_guard, right_id, mut right_guard) = if sibling_is_left {
            (sibling_id, sibling_guard, node_id, node_guard)
        } else {
            (node_id, node_guard, sibling_id, sibling_guard)
        };

        if is_leaf {
            let right: LeafView<&[u8], K, V> = LeafView::new(&right_guard.data[..]);
            let entries = right.entries();
            let next_leaf = right.next_leaf_id();
            let mut left: LeafView<&mut [u8], K, V> = LeafView::new(&mut left_guard.data[..]);
            for (k, v) in &entries {
                left.push_back(k, v);
            }
            left.set_next_leaf_id(next_leaf);
        } else {
            // The separator comes down as the key over the right page's
            // first child.
            let right: InternalView<&[u8], K> = InternalView::new(&right_guard.data[..]);
            let entries = right.entries();
            {
                let mut left: InternalView<&mut [u8], K> =
                    InternalView::new(&mut left_guard.data[..]);
                for (i, (key, child)) in entries.iter().enumerate() {
                    if i == 0 {
                        left.push_back(Some(&separator), *child);
                    } else {
                        left.push_back(key.as_ref(), *child);
                    }
                }
            }
            for (_, child_id) in &entries {
                let child_page = match self.buffer_pool.fetch_page(*child_id) {
                    Ok(page) => page,
                    Err(e) => {
                        drop(left_guard);
                        self.buffer_pool.unpin_page(left_id, true);
                        drop(right_guard);
                        self.buffer_pool.unpin_page(right_id, true);
                        ctx.release(parent_entry);
                        return Err(e.into());
                    }
                };
                {
                    let mut page = child_page.write();
                    BTreePageHeader::new(&mut page.data[..]).set_parent_id(left_id);
                }
                self.buffer_pool.unpin_page(*child_id, true);
            }
        }

        drop(left_guard);
        self.buffer_pool.unpin_page(left_id, true);
        drop(right_guard);
        self.buffer_pool.unpin_page(right_id, true);
        self.buffer_pool.delete_page(right_id)?;

        self.delete_entry(ctx, parent_entry, separator)
    }

    /// Move one entry from the richer sibling into the underflowing node
    /// and patch the parent separator.
    #[allow(clippy::too_many_arguments)]
    fn redistribute(
        &self,
        mut node: LatchedPage,
        mut parent_entry: LatchedPage,
        mut sibling_guard: PageWriteGuard,
        sibling_id: PageId,
        separator_index: usize,
        sibling_is_left: bool,
        is_leaf: bool,
        separator: K,
    ) -> Result<(), BTreeError> {
        let mut moved_internal_child = None;
        {
            let node_guard = node.guard.as_mut().expect("latched");
            let parent_guard = parent_entry.guard.as_mut().expect("latched");
            let mut parent: InternalView<&mut [u8], K> =
                InternalView::new(&mut parent_guard.data[..]);

            if is_leaf {
                let mut sibling: LeafView<&mut [u8], K, V> =
                    LeafView::new(&mut sibling_guard.data[..]);
                let mut leaf: LeafView<&mut [u8], K, V> = LeafView::new(&mut node_guard.data[..]);
                if sibling_is_left {
                    let (moved_key, moved_value) = sibling.pop_back();
                    leaf.insert_at(0, &moved_key, &moved_value);
                    parent.set_key_at(separator_index, &moved_key);
                } else {
                    let moved_key = sibling.key_at(0);
                    let moved_value = sibling.value_at(0);
                    sibling.remove_at(0);
                    leaf.push_back(&moved_key, &moved_value);
                    parent.set_key_at(separator_index, &sibling.key_at(0));
                }
            } else {
                let mut sibling: InternalView<&mut [u8], K> =
                    InternalView::new(&mut sibling_guard.data[..]);
                let mut internal: InternalView<&mut [u8], K> =
                    InternalView::new(&mut node_guard.data[..]);
                if sibling_is_left {
                    // Sibling's last child slides over as the node's new
                    // first child; the separator drops in above the node's
                    // old first child and the moved key replaces it upstairs.
                    let (moved_key, moved_child) = sibling.pop_back();
                    let old = internal.entries();
                    let mut rebuilt = Vec::with_capacity(old.len() + 1);
                    rebuilt.push((None, moved_child));
                    rebuilt.push((Some(separator.clone()), old[0].1));
                    rebuilt.extend(old.into_iter().skip(1));
                    internal.set_entries(&rebuilt);
                    parent.set_key_at(separator_index, &moved_key);
                    moved_internal_child = Some(moved_child);
                } else {
                    // Mirror image: sibling's first child joins the node
                    // under the separator, and the sibling's second key
                    // becomes the new separator.
                    let moved_child = sibling.child_at(0);
                    let new_separator = sibling.key_at(1);
                    sibling.remove_at(0);
                    internal.push_back(Some(&separator), moved_child);
                    parent.set_key_at(separator_index, &new_separator);
                    moved_internal_child = Some(moved_child);
                }
            }
        }
        node.dirty = true;
        parent_entry.dirty = true;

        let reparented = match moved_internal_child {
            Some(child_id) => self.reparent(child_id, node.page_id),
            None => Ok(()),
        };

        let node_id = node.page_id;
        node.guard = None;
        self.buffer_pool.unpin_page(node_id, true);
        drop(sibling_guard);
        self.buffer_pool.unpin_page(sibling_id, true);
        parent_entry.guard = None;
        self.buffer_pool.unpin_page(parent_entry.page_id, true);
        reparented
    }

    fn reparent(&self, child_id: PageId, new_parent: PageId) -> Result<(), BTreeError> {
        let child_page = self.buffer_pool.fetch_page(child_id)?;
        {
            let mut page = child_page.write();
            BTreePageHeader::new(&mut page.data[..]).set_parent_id(new_parent);
        }
        self.buffer_pool.unpin_page(child_id, true);
        Ok(())
    }
}
