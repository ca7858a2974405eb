use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use parking_lot::RwLock;

use crate::common::types::{FrameId, PageId};

/// Hash function used to index the directory. Integer keys hash to
/// themselves so that directory growth is reproducible for a given insert
/// sequence; other key types go through the standard hasher.
pub trait HashKey {
    fn hash_key(&self) -> u64;
}

impl HashKey for i32 {
    fn hash_key(&self) -> u64 {
        *self as u32 as u64
    }
}

impl HashKey for u32 {
    fn hash_key(&self) -> u64 {
        *self as u64
    }
}

impl HashKey for i64 {
    fn hash_key(&self) -> u64 {
        *self as u64
    }
}

impl HashKey for u64 {
    fn hash_key(&self) -> u64 {
        *self
    }
}

impl HashKey for usize {
    fn hash_key(&self) -> u64 {
        *self as u64
    }
}

impl HashKey for String {
    fn hash_key(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

impl HashKey for crate::common::types::Rid {
    fn hash_key(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

struct Bucket<K, V> {
    local_depth: u32,
    items: Vec<(K, V)>,
}

struct HashTableInner<K, V> {
    global_depth: u32,
    /// Directory slots index into `buckets`; aliased slots share a bucket.
    dir: Vec<usize>,
    /// Bucket slab. Buckets are only ever added (by splits), never removed,
    /// so slab indices stay stable.
    buckets: Vec<Bucket<K, V>>,
}

impl<K: HashKey, V> HashTableInner<K, V> {
    fn index_of(&self, key: &K) -> usize {
        let mask = (1u64 << self.global_depth) - 1;
        (key.hash_key() & mask) as usize
    }
}

/// Concurrent extendible hash table.
///
/// A directory of `2^global_depth` slots points at buckets, each holding up
/// to `bucket_size` entries with its own `local_depth <= global_depth`. One
/// reader-writer latch covers the whole structure: lookups take the read
/// side, mutators the write side.
pub struct ExtendibleHashTable<K, V> {
    bucket_size: usize,
    inner: RwLock<HashTableInner<K, V>>,
}

/// The buffer pool's page directory
pub type PageTable = ExtendibleHashTable<PageId, FrameId>;

impl<K, V> ExtendibleHashTable<K, V>
where
    K: HashKey + Eq + Clone,
    V: Clone,
{
    pub fn new(bucket_size: usize) -> Self {
        Self {
            bucket_size,
            inner: RwLock::new(HashTableInner {
                global_depth: 0,
                dir: vec![0],
                buckets: vec![Bucket {
                    local_depth: 0,
                    items: Vec::new(),
                }],
            }),
        }
    }

    pub fn global_depth(&self) -> u32 {
        self.inner.read().global_depth
    }

    pub fn num_buckets(&self) -> usize {
        self.inner.read().buckets.len()
    }

    pub fn local_depth(&self, dir_index: usize) -> u32 {
        let inner = self.inner.read();
        inner.buckets[inner.dir[dir_index]].local_depth
    }

    pub fn find(&self, key: &K) -> Option<V> {
        let inner = self.inner.read();
        let bucket = &inner.buckets[inner.dir[inner.index_of(key)]];
        bucket
            .items
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    pub fn remove(&self, key: &K) -> bool {
        let mut inner = self.inner.write();
        let slot = inner.dir[inner.index_of(key)];
        let bucket = &mut inner.buckets[slot];
        match bucket.items.iter().position(|(k, _)| k == key) {
            Some(pos) => {
                bucket.items.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Insert or overwrite the value for `key`, splitting buckets (and
    /// doubling the directory) as needed.
    pub fn insert(&self, key: K, value: V) {
        let mut inner = self.inner.write();

        // Upsert in place when the key is already present.
        let slot = inner.dir[inner.index_of(&key)];
        if let Some(entry) = inner.buckets[slot]
            .items
            .iter_mut()
            .find(|(k, _)| *k == key)
        {
            entry.1 = value;
            return;
        }

        // Split until the target bucket has room. A run of keys that agree
        // on many low hash bits can force several rounds.
        loop {
            let slot = inner.dir[inner.index_of(&key)];
            if inner.buckets[slot].items.len() < self.bucket_size {
                break;
            }

            if inner.buckets[slot].local_depth == inner.global_depth {
                // Double the directory; each new slot aliases the bucket at
                // `i - old_len`.
                let old_len = inner.dir.len();
                inner.global_depth += 1;
                for i in 0..old_len {
                    let target = inner.dir[i];
                    inner.dir.push(target);
                }
            }

            // Split the overflowing bucket on the next hash bit.
            let depth = inner.buckets[slot].local_depth;
            let mask = 1u64 << depth;
            inner.buckets[slot].local_depth = depth + 1;

            let old_items = std::mem::take(&mut inner.buckets[slot].items);
            let (stay, moved): (Vec<_>, Vec<_>) = old_items
                .into_iter()
                .partition(|(k, _)| k.hash_key() & mask == 0);
            inner.buckets[slot].items = stay;

            let new_slab_index = inner.buckets.len();
            inner.buckets.push(Bucket {
                local_depth: depth + 1,
                items: moved,
            });

            for (i, target) in inner.dir.iter_mut().enumerate() {
                if *target == slot && (i as u64) & mask != 0 {
                    *target = new_slab_index;
                }
            }
        }

        let slot = inner.dir[inner.index_of(&key)];
        inner.buckets[slot].items.push((key, value));
    }
}
