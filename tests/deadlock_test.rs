use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ferrodb::common::types::Rid;
use ferrodb::transaction::{
    IsolationLevel, LockManager, LockManagerConfig, LockMode, TransactionManager, TransactionState,
};

mod common;
use common::init_test_logger;

const TABLE_A: u32 = 1;

fn setup_with_detection() -> (Arc<LockManager>, Arc<TransactionManager>) {
    init_test_logger();
    let lock_manager = Arc::new(LockManager::new(LockManagerConfig {
        cycle_detection_interval: Duration::from_millis(20),
    }));
    lock_manager.start_deadlock_detection();
    let txn_manager = Arc::new(TransactionManager::new(Arc::clone(&lock_manager)));
    (lock_manager, txn_manager)
}

// T1 holds X on row a, T2 holds X on row b; each then requests the other's
// row. The detector must abort the younger transaction (larger id) within a
// detection interval, and the older one must complete.
#[test]
fn test_two_transaction_deadlock() {
    let (lock_manager, txn_manager) = setup_with_detection();
    let t1 = txn_manager.begin(IsolationLevel::RepeatableRead);
    let t2 = txn_manager.begin(IsolationLevel::RepeatableRead);
    let row_a = Rid::new(1, 0);
    let row_b = Rid::new(1, 1);

    assert!(lock_manager
        .lock_table(&t1, LockMode::IntentionExclusive, TABLE_A)
        .unwrap());
    assert!(lock_manager
        .lock_table(&t2, LockMode::IntentionExclusive, TABLE_A)
        .unwrap());
    assert!(lock_manager
        .lock_row(&t1, LockMode::Exclusive, TABLE_A, row_a)
        .unwrap());
    assert!(lock_manager
        .lock_row(&t2, LockMode::Exclusive, TABLE_A, row_b)
        .unwrap());

    let survivor = {
        let lock_manager = Arc::clone(&lock_manager);
        let txn_manager = Arc::clone(&txn_manager);
        let t1 = Arc::clone(&t1);
        thread::spawn(move || {
            let granted = lock_manager
                .lock_row(&t1, LockMode::Exclusive, TABLE_A, row_b)
                .unwrap();
            assert!(granted, "older transaction must win the deadlock");
            assert!(txn_manager.commit(&t1));
        })
    };
    let victim = {
        let lock_manager = Arc::clone(&lock_manager);
        let txn_manager = Arc::clone(&txn_manager);
        let t2 = Arc::clone(&t2);
        thread::spawn(move || {
            // slight stagger so both waits are in flight together
            thread::sleep(Duration::from_millis(10));
            let granted = lock_manager
                .lock_row(&t2, LockMode::Exclusive, TABLE_A, row_a)
                .unwrap();
            assert!(!granted, "younger transaction must be the deadlock victim");
            assert_eq!(t2.state(), TransactionState::Aborted);
            txn_manager.abort(&t2);
        })
    };

    victim.join().unwrap();
    survivor.join().unwrap();
    lock_manager.stop_deadlock_detection();
}

// Three transactions in a ring; detection must break every cycle until all
// waiters are unblocked.
#[test]
fn test_three_transaction_cycle() {
    let (lock_manager, txn_manager) = setup_with_detection();
    let txns: Vec<_> = (0..3)
        .map(|_| txn_manager.begin(IsolationLevel::RepeatableRead))
        .collect();
    let rows: Vec<Rid> = (0..3).map(|slot| Rid::new(2, slot)).collect();

    for (txn, row) in txns.iter().zip(&rows) {
        assert!(lock_manager
            .lock_table(txn, LockMode::IntentionExclusive, TABLE_A)
            .unwrap());
        assert!(lock_manager
            .lock_row(txn, LockMode::Exclusive, TABLE_A, *row)
            .unwrap());
    }

    let mut handles = Vec::new();
    for i in 0..3 {
        let lock_manager = Arc::clone(&lock_manager);
        let txn_manager = Arc::clone(&txn_manager);
        let txn = Arc::clone(&txns[i]);
        let wanted = rows[(i + 1) % 3];
        handles.push(thread::spawn(move || {
            thread::sleep(Duration::from_millis(5 * i as u64));
            let granted = lock_manager
                .lock_row(&txn, LockMode::Exclusive, TABLE_A, wanted)
                .unwrap();
            if granted {
                assert!(txn_manager.commit(&txn));
            } else {
                assert_eq!(txn.state(), TransactionState::Aborted);
                txn_manager.abort(&txn);
            }
            granted
        }));
    }

    let outcomes: Vec<bool> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    // at least one transaction survives, at least one is aborted
    assert!(outcomes.iter().any(|&granted| granted));
    assert!(outcomes.iter().any(|&granted| !granted));
    lock_manager.stop_deadlock_detection();
}

// No deadlock: a plain waiter must not be aborted by the detector.
#[test]
fn test_no_false_positives() {
    let (lock_manager, txn_manager) = setup_with_detection();
    let t1 = txn_manager.begin(IsolationLevel::RepeatableRead);
    let t2 = txn_manager.begin(IsolationLevel::RepeatableRead);
    let row = Rid::new(3, 0);

    assert!(lock_manager
        .lock_table(&t1, LockMode::IntentionExclusive, TABLE_A)
        .unwrap());
    assert!(lock_manager
        .lock_table(&t2, LockMode::IntentionExclusive, TABLE_A)
        .unwrap());
    assert!(lock_manager
        .lock_row(&t1, LockMode::Exclusive, TABLE_A, row)
        .unwrap());

    let waiter = {
        let lock_manager = Arc::clone(&lock_manager);
        let t2 = Arc::clone(&t2);
        thread::spawn(move || {
            lock_manager
                .lock_row(&t2, LockMode::Exclusive, TABLE_A, row)
                .unwrap()
        })
    };

    // let several detection ticks pass while t2 waits
    thread::sleep(Duration::from_millis(100));
    assert_eq!(t2.state(), TransactionState::Growing);

    assert!(lock_manager.unlock_row(&t1, TABLE_A, row).unwrap());
    assert!(waiter.join().unwrap());
    lock_manager.stop_deadlock_detection();
}
