use std::sync::Arc;
use std::thread;

use ferrodb::container::ExtendibleHashTable;

// bucket_size = 2, keys 1..=5: two rounds of directory doubling, three
// buckets, everything findable afterwards.
#[test]
fn test_split_sequence() {
    let table: ExtendibleHashTable<i32, String> = ExtendibleHashTable::new(2);

    table.insert(1, "a".to_string());
    table.insert(2, "b".to_string());
    assert_eq!(table.find(&2), Some("b".to_string()));

    table.insert(3, "c".to_string());
    assert_eq!(table.num_buckets(), 2);
    assert_eq!(table.local_depth(0), 1);
    assert_eq!(table.local_depth(1), 1);

    table.insert(4, "d".to_string());
    table.insert(5, "e".to_string());
    assert_eq!(table.global_depth(), 2);
    assert_eq!(table.num_buckets(), 3);
    assert_eq!(table.local_depth(0), 1);
    assert_eq!(table.local_depth(1), 2);
    assert_eq!(table.local_depth(2), 1);
    assert_eq!(table.local_depth(3), 2);

    for (k, v) in [(1, "a"), (2, "b"), (3, "c"), (4, "d"), (5, "e")] {
        assert_eq!(table.find(&k), Some(v.to_string()), "key {k}");
    }
    assert_eq!(table.find(&6), None);
}

#[test]
fn test_remove() {
    let table: ExtendibleHashTable<i32, String> = ExtendibleHashTable::new(2);
    for k in 1..=9 {
        table.insert(k, format!("v{k}"));
    }
    assert!(table.remove(&8));
    assert!(table.remove(&4));
    assert!(table.remove(&1));
    assert!(!table.remove(&20));
    assert_eq!(table.find(&8), None);
    assert_eq!(table.find(&4), None);
    assert_eq!(table.find(&1), None);
    for k in [2, 3, 5, 6, 7, 9] {
        assert_eq!(table.find(&k), Some(format!("v{k}")), "key {k}");
    }
}

#[test]
fn test_directory_invariants_hold_under_load() {
    let table: ExtendibleHashTable<i32, i32> = ExtendibleHashTable::new(3);
    for k in 0..500 {
        table.insert(k, k ^ 0x5A5A);
    }
    let global = table.global_depth();
    for i in 0..(1usize << global) {
        assert!(
            table.local_depth(i) <= global,
            "local depth exceeds global at slot {i}"
        );
    }
    for k in 0..500 {
        assert_eq!(table.find(&k), Some(k ^ 0x5A5A), "key {k}");
    }
}

// Run the concurrent insert workload many times; every key must be
// findable and the directory must end in the same deterministic shape.
#[test]
fn test_concurrent_insert() {
    const NUM_RUNS: usize = 50;
    const NUM_THREADS: i32 = 3;

    for _ in 0..NUM_RUNS {
        let table: Arc<ExtendibleHashTable<i32, i32>> = Arc::new(ExtendibleHashTable::new(2));
        let mut handles = Vec::new();
        for tid in 0..NUM_THREADS {
            let table = Arc::clone(&table);
            handles.push(thread::spawn(move || {
                table.insert(tid, tid);
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(table.global_depth(), 1);
        for tid in 0..NUM_THREADS {
            assert_eq!(table.find(&tid), Some(tid));
        }
    }
}

#[test]
fn test_concurrent_mixed_workload() {
    let table: Arc<ExtendibleHashTable<i32, i32>> = Arc::new(ExtendibleHashTable::new(4));
    let mut handles = Vec::new();
    for t in 0..4 {
        let table = Arc::clone(&table);
        handles.push(thread::spawn(move || {
            let base = t * 1000;
            for k in base..base + 200 {
                table.insert(k, k * 2);
            }
            for k in (base..base + 200).step_by(2) {
                assert!(table.remove(&k));
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
    for t in 0..4 {
        let base = t * 1000;
        for k in base..base + 200 {
            let expected = if k % 2 == 0 { None } else { Some(k * 2) };
            assert_eq!(table.find(&k), expected, "key {k}");
        }
    }
}
