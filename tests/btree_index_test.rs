use std::sync::Arc;
use std::thread;

use anyhow::Result;
use rand::prelude::*;

use ferrodb::common::types::Rid;
use ferrodb::index::btree::{BPlusTree, DefaultComparator};

mod common;
use common::create_test_buffer_pool;

type IntTree = BPlusTree<i32, Rid, DefaultComparator<i32>>;

fn create_tree(
    pool_size: usize,
    leaf_max: usize,
    internal_max: usize,
) -> Result<(IntTree, tempfile::NamedTempFile)> {
    let (buffer_pool, file) = create_test_buffer_pool(pool_size, 2)?;
    let tree = BPlusTree::new(
        "test_index",
        buffer_pool,
        DefaultComparator::new(),
        leaf_max,
        internal_max,
    )?;
    Ok((tree, file))
}

fn rid_for(key: i32) -> Rid {
    Rid::new(key, key as u32)
}

#[test]
fn test_empty_tree() -> Result<()> {
    let (tree, _file) = create_tree(16, 4, 3)?;
    assert!(tree.is_empty());
    assert_eq!(tree.get_value(&1)?, None);
    assert_eq!(tree.begin()?.count(), 0);
    tree.remove(&1)?; // removing from an empty tree is a no-op
    Ok(())
}

#[test]
fn test_insert_and_lookup() -> Result<()> {
    let (tree, _file) = create_tree(16, 4, 3)?;

    assert!(tree.insert(&7, &rid_for(7))?);
    assert!(!tree.is_empty());
    assert_eq!(tree.get_value(&7)?, Some(rid_for(7)));
    assert_eq!(tree.get_value(&8)?, None);

    // duplicate insert leaves the tree unchanged
    assert!(!tree.insert(&7, &Rid::new(99, 99))?);
    assert_eq!(tree.get_value(&7)?, Some(rid_for(7)));
    Ok(())
}

// Sequential insert with tiny fanout (leaf_max = 4, internal_max = 3)
// forces a multi-level tree; every key must remain reachable and the scan
// must come back sorted.
#[test]
fn test_sequential_insert_builds_multilevel_tree() -> Result<()> {
    let (tree, _file) = create_tree(32, 4, 3)?;

    for key in 1..=20 {
        assert!(tree.insert(&key, &rid_for(key))?, "insert {key}");
    }
    for key in 1..=20 {
        assert_eq!(tree.get_value(&key)?, Some(rid_for(key)), "lookup {key}");
    }

    let scanned: Vec<i32> = tree.begin()?.map(|(k, _)| k).collect();
    assert_eq!(scanned, (1..=20).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn test_reverse_insert() -> Result<()> {
    let (tree, _file) = create_tree(32, 4, 3)?;

    for key in (1..=20).rev() {
        assert!(tree.insert(&key, &rid_for(key))?);
    }
    let scanned: Vec<i32> = tree.begin()?.map(|(k, _)| k).collect();
    assert_eq!(scanned, (1..=20).collect::<Vec<_>>());
    Ok(())
}

// Delete the lower half of the key space and make sure underflow handling
// (merges and redistributions) keeps the rest intact.
#[test]
fn test_delete_with_underflow() -> Result<()> {
    let (tree, _file) = create_tree(32, 4, 3)?;

    for key in 1..=20 {
        tree.insert(&key, &rid_for(key))?;
    }
    for key in 1..=10 {
        tree.remove(&key)?;
        assert_eq!(tree.get_value(&key)?, None, "key {key} still present");
    }
    for key in 11..=20 {
        assert_eq!(tree.get_value(&key)?, Some(rid_for(key)), "lookup {key}");
    }

    let scanned: Vec<i32> = tree.begin()?.map(|(k, _)| k).collect();
    assert_eq!(scanned, (11..=20).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn test_delete_everything_empties_tree() -> Result<()> {
    let (tree, _file) = create_tree(32, 4, 3)?;

    for key in 1..=15 {
        tree.insert(&key, &rid_for(key))?;
    }
    for key in 1..=15 {
        tree.remove(&key)?;
    }
    assert!(tree.is_empty());
    assert_eq!(tree.begin()?.count(), 0);

    // the tree is still usable afterwards
    assert!(tree.insert(&3, &rid_for(3))?);
    assert_eq!(tree.get_value(&3)?, Some(rid_for(3)));
    Ok(())
}

#[test]
fn test_random_insert_delete_mix() -> Result<()> {
    let (tree, _file) = create_tree(64, 5, 4)?;
    let mut rng = StdRng::seed_from_u64(7);

    let mut keys: Vec<i32> = (0..200).collect();
    keys.shuffle(&mut rng);
    for &key in &keys {
        assert!(tree.insert(&key, &rid_for(key))?);
    }

    let mut removed: Vec<i32> = keys.choose_multiple(&mut rng, 100).copied().collect();
    removed.sort_unstable();
    for &key in &removed {
        tree.remove(&key)?;
    }

    let mut expected: Vec<i32> = (0..200).filter(|k| !removed.contains(k)).collect();
    expected.sort_unstable();
    let scanned: Vec<i32> = tree.begin()?.map(|(k, _)| k).collect();
    assert_eq!(scanned, expected);

    for key in 0..200 {
        let expect = if removed.contains(&key) {
            None
        } else {
            Some(rid_for(key))
        };
        assert_eq!(tree.get_value(&key)?, expect, "lookup {key}");
    }
    Ok(())
}

#[test]
fn test_begin_at_positions_on_exact_key() -> Result<()> {
    let (tree, _file) = create_tree(32, 4, 3)?;
    for key in (2..=40).step_by(2) {
        tree.insert(&key, &rid_for(key))?;
    }

    let from_ten: Vec<i32> = tree.begin_at(&10)?.map(|(k, _)| k).collect();
    assert_eq!(from_ten, (10..=40).step_by(2).collect::<Vec<_>>());

    // absent key: end iterator
    let mut missing = tree.begin_at(&11)?;
    assert!(missing.is_end());
    assert_eq!(missing.next(), None);
    Ok(())
}

#[test]
fn test_iterator_walks_leaf_chain() -> Result<()> {
    let (tree, _file) = create_tree(64, 4, 3)?;
    for key in 0..100 {
        tree.insert(&key, &rid_for(key))?;
    }
    let pairs: Vec<(i32, Rid)> = tree.begin()?.collect();
    assert_eq!(pairs.len(), 100);
    for (i, (key, rid)) in pairs.iter().enumerate() {
        assert_eq!(*key, i as i32);
        assert_eq!(*rid, rid_for(i as i32));
    }
    Ok(())
}

// The root page id is persisted in the header page under the index name, so
// a reopened index sees the same tree.
#[test]
fn test_root_survives_reopen() -> Result<()> {
    let (buffer_pool, _file) = create_test_buffer_pool(32, 2)?;

    {
        let tree: IntTree = BPlusTree::new(
            "orders_pk",
            Arc::clone(&buffer_pool),
            DefaultComparator::new(),
            4,
            3,
        )?;
        for key in 1..=30 {
            tree.insert(&key, &rid_for(key))?;
        }
    }

    let reopened: IntTree = BPlusTree::new(
        "orders_pk",
        Arc::clone(&buffer_pool),
        DefaultComparator::new(),
        4,
        3,
    )?;
    for key in 1..=30 {
        assert_eq!(reopened.get_value(&key)?, Some(rid_for(key)));
    }
    Ok(())
}

#[test]
fn test_concurrent_inserts() -> Result<()> {
    let (buffer_pool, _file) = create_test_buffer_pool(128, 2)?;
    let tree: Arc<IntTree> = Arc::new(BPlusTree::new(
        "concurrent",
        buffer_pool,
        DefaultComparator::new(),
        6,
        5,
    )?);

    let mut handles = Vec::new();
    for t in 0..4 {
        let tree = Arc::clone(&tree);
        handles.push(thread::spawn(move || -> Result<()> {
            for i in 0..100 {
                let key = i * 4 + t;
                assert!(tree.insert(&key, &rid_for(key))?);
            }
            Ok(())
        }));
    }
    for handle in handles {
        handle.join().unwrap()?;
    }

    let scanned: Vec<i32> = tree.begin()?.map(|(k, _)| k).collect();
    assert_eq!(scanned, (0..400).collect::<Vec<_>>());
    for key in 0..400 {
        assert_eq!(tree.get_value(&key)?, Some(rid_for(key)));
    }
    Ok(())
}

#[test]
fn test_concurrent_reads_during_inserts() -> Result<()> {
    let (buffer_pool, _file) = create_test_buffer_pool(128, 2)?;
    let tree: Arc<IntTree> = Arc::new(BPlusTree::new(
        "mixed",
        buffer_pool,
        DefaultComparator::new(),
        6,
        5,
    )?);
    for key in 0..100 {
        tree.insert(&key, &rid_for(key))?;
    }

    let writer = {
        let tree = Arc::clone(&tree);
        thread::spawn(move || -> Result<()> {
            for key in 100..200 {
                tree.insert(&key, &rid_for(key))?;
            }
            Ok(())
        })
    };
    let reader = {
        let tree = Arc::clone(&tree);
        thread::spawn(move || -> Result<()> {
            for _ in 0..10 {
                for key in 0..100 {
                    assert_eq!(tree.get_value(&key)?, Some(rid_for(key)));
                }
            }
            Ok(())
        })
    };
    writer.join().unwrap()?;
    reader.join().unwrap()?;

    for key in 0..200 {
        assert_eq!(tree.get_value(&key)?, Some(rid_for(key)));
    }
    Ok(())
}
