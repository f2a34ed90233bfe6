//! Behavioural tests for the transactional store.
//!
//! Every test builds its own repository, either in memory or on a sled
//! database in a fresh temporary directory, so nothing leaks between tests.
//! Where a property should hold for every engine, the test runs against
//! each of them.

use std::collections::BTreeMap;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use nova_store::{
    BackendKind, KeyRange, MemoryEngine, Repository, ScanOrder, StoreConfig, StoreError,
    Transaction, TransactionState, WriterWait,
};

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

/// One repository per engine we ship by default. The tempdir is returned so
/// it outlives the repository.
fn repos() -> Vec<(Repository, Option<tempfile::TempDir>)> {
    let dir = tempfile::tempdir().expect("tempdir");
    let sled = Repository::open(&StoreConfig::at(BackendKind::Sled, dir.path())).expect("sled");
    let memory = Repository::open(&StoreConfig::in_memory()).expect("memory");
    vec![(memory, None), (sled, Some(dir))]
}

fn rows(tx: &Transaction<'_>, table: &str, range: &KeyRange, order: ScanOrder) -> Vec<(Vec<u8>, Vec<u8>)> {
    tx.select_range(table, range, order, false)
        .expect("select_range")
        .map(|r| {
            let row = r.expect("row");
            (row.key, row.value.expect("value"))
        })
        .collect()
}

fn keys(tx: &Transaction<'_>, table: &str, range: &KeyRange, order: ScanOrder) -> Vec<Vec<u8>> {
    rows(tx, table, range, order).into_iter().map(|(k, _)| k).collect()
}

fn commit_rows(repo: &Repository, table: &str, entries: &[(&[u8], &[u8])]) {
    let mut tx = repo.begin_write().unwrap();
    for (k, v) in entries {
        tx.insert_raw(table, k, v).unwrap();
    }
    tx.commit().unwrap();
}

// ---------------------------------------------------------------------------
// Buffer Semantics
// ---------------------------------------------------------------------------

#[test]
fn buffered_insert_is_visible_inside_transaction() {
    for (repo, _dir) in repos() {
        let mut tx = repo.begin_write().unwrap();
        tx.insert_raw("headers", b"k", b"v").unwrap();
        assert_eq!(tx.select_raw("headers", b"k").unwrap(), Some(b"v".to_vec()));
        assert_eq!(
            rows(&tx, "headers", &KeyRange::all(), ScanOrder::Ascending),
            vec![(b"k".to_vec(), b"v".to_vec())]
        );
    }
}

#[test]
fn tombstone_hides_persisted_row() {
    for (repo, _dir) in repos() {
        commit_rows(&repo, "t", &[(b"a", b"1"), (b"b", b"2")]);

        let mut tx = repo.begin_write().unwrap();
        tx.remove_raw("t", b"a").unwrap();
        assert_eq!(tx.select_raw("t", b"a").unwrap(), None);
        assert_eq!(keys(&tx, "t", &KeyRange::all(), ScanOrder::Ascending), vec![b"b".to_vec()]);
        assert_eq!(keys(&tx, "t", &KeyRange::all(), ScanOrder::Descending), vec![b"b".to_vec()]);
        tx.commit().unwrap();

        let tx = repo.begin_read().unwrap();
        assert!(!tx.exists_raw("t", b"a").unwrap());
        assert_eq!(tx.count("t").unwrap(), 1);
    }
}

#[test]
fn clear_then_insert_yields_exactly_new_rows() {
    for (repo, _dir) in repos() {
        commit_rows(&repo, "t", &[(b"a", b"1"), (b"b", b"2"), (b"c", b"3")]);

        let mut tx = repo.begin_write().unwrap();
        tx.remove_all_keys("t").unwrap();
        tx.insert_raw("t", b"k", b"v").unwrap();
        let expected = vec![(b"k".to_vec(), b"v".to_vec())];
        assert_eq!(rows(&tx, "t", &KeyRange::all(), ScanOrder::Ascending), expected);
        tx.commit().unwrap();

        let tx = repo.begin_read().unwrap();
        assert_eq!(rows(&tx, "t", &KeyRange::all(), ScanOrder::Ascending), expected);
    }
}

#[test]
fn clear_does_not_touch_other_tables() {
    for (repo, _dir) in repos() {
        commit_rows(&repo, "a", &[(b"k", b"1")]);
        commit_rows(&repo, "b", &[(b"k", b"2")]);

        let mut tx = repo.begin_write().unwrap();
        tx.remove_all_keys("a").unwrap();
        tx.commit().unwrap();

        let tx = repo.begin_read().unwrap();
        assert_eq!(tx.count("a").unwrap(), 0);
        assert_eq!(tx.select_raw("b", b"k").unwrap(), Some(b"2".to_vec()));
    }
}

// ---------------------------------------------------------------------------
// Atomicity
// ---------------------------------------------------------------------------

#[test]
fn failed_batch_applies_nothing() {
    let engine = MemoryEngine::new();
    let repo = Repository::with_engine(Box::new(engine.clone()), StoreConfig::in_memory()).unwrap();
    commit_rows(&repo, "t", &[(b"old", b"1")]);
    let rows_before = engine.len();

    let mut tx = repo.begin_write().unwrap();
    tx.remove_all_keys("t").unwrap();
    for i in 0..10u8 {
        tx.insert_raw("t", &[i], &[i]).unwrap();
    }
    engine.fail_writes_after(5);
    assert!(matches!(tx.commit(), Err(StoreError::Storage(_))));
    assert_eq!(engine.len(), rows_before);

    // The writer lock was released: another thread gets it while the
    // failed transaction is still alive.
    thread::scope(|s| {
        s.spawn(|| {
            let other = repo.begin_write().expect("writer lock released after failure");
            drop(other);
        });
    });

    let reader = repo.begin_read().unwrap();
    assert_eq!(reader.select_raw("t", b"old").unwrap(), Some(b"1".to_vec()));
    assert_eq!(reader.count("t").unwrap(), 1);
}

#[test]
fn failed_commit_can_be_retried_or_rolled_back() {
    let engine = MemoryEngine::new();
    let repo = Repository::with_engine(Box::new(engine.clone()), StoreConfig::in_memory()).unwrap();
    commit_rows(&repo, "t", &[(b"seed", b"0")]);

    let mut tx = repo.begin_write().unwrap();
    tx.insert_raw("t", b"a", b"1").unwrap();
    engine.fail_writes_after(0);
    assert!(tx.commit().is_err());
    assert_eq!(tx.state(), TransactionState::Active);
    assert_eq!(tx.select_raw("t", b"a").unwrap(), Some(b"1".to_vec()));

    tx.commit().unwrap();
    assert_eq!(tx.state(), TransactionState::Committed);

    let mut tx = repo.begin_write().unwrap();
    tx.insert_raw("t", b"b", b"2").unwrap();
    engine.fail_writes_after(0);
    assert!(tx.commit().is_err());
    tx.rollback().unwrap();

    let reader = repo.begin_read().unwrap();
    assert!(reader.exists_raw("t", b"a").unwrap());
    assert!(!reader.exists_raw("t", b"b").unwrap());
}

// ---------------------------------------------------------------------------
// Range Reads
// ---------------------------------------------------------------------------

#[test]
fn forward_and_backward_scans_mirror_each_other() {
    let mut rng = StdRng::seed_from_u64(0x5eed);

    for (repo, _dir) in repos() {
        for round in 0..20 {
            let table = format!("t{round}");
            let mut model: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();

            let mut tx = repo.begin_write().unwrap();
            for _ in 0..rng.gen_range(0..60) {
                let key: Vec<u8> = (0..rng.gen_range(1..4)).map(|_| rng.gen_range(0..8)).collect();
                let value: Vec<u8> = vec![rng.gen()];
                tx.insert_raw(&table, &key, &value).unwrap();
                model.insert(key, value);
            }
            tx.commit().unwrap();

            let mut tx = repo.begin_write().unwrap();
            for _ in 0..rng.gen_range(0..60) {
                let key: Vec<u8> = (0..rng.gen_range(1..4)).map(|_| rng.gen_range(0..8)).collect();
                if rng.gen_bool(0.4) {
                    tx.remove_raw(&table, &key).unwrap();
                    model.remove(&key);
                } else {
                    let value: Vec<u8> = vec![rng.gen()];
                    tx.insert_raw(&table, &key, &value).unwrap();
                    model.insert(key, value);
                }
            }

            let lo: Vec<u8> = vec![rng.gen_range(0..8)];
            let hi: Vec<u8> = vec![rng.gen_range(0..8), rng.gen_range(0..8)];
            let (lo_incl, hi_incl) = (rng.gen_bool(0.5), rng.gen_bool(0.5));
            let range = KeyRange::between(lo.clone(), lo_incl, hi.clone(), hi_incl);

            let forward = rows(&tx, &table, &range, ScanOrder::Ascending);
            let mut backward = rows(&tx, &table, &range, ScanOrder::Descending);
            backward.reverse();
            assert_eq!(forward, backward, "round {round}");

            let expected: Vec<(Vec<u8>, Vec<u8>)> = model
                .iter()
                .filter(|(k, _)| range.contains(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            assert_eq!(forward, expected, "round {round}");
            assert_eq!(tx.count(&table).unwrap(), model.len() as u64);
        }
    }
}

#[test]
fn exclusive_bounds_are_exact() {
    for (repo, _dir) in repos() {
        commit_rows(&repo, "t", &[(b"a", b"1"), (b"b", b"2"), (b"c", b"3")]);
        let mut tx = repo.begin_write().unwrap();
        tx.insert_raw("t", b"d", b"4").unwrap();

        assert_eq!(
            keys(&tx, "t", &KeyRange::starting_at(&b"b"[..], false), ScanOrder::Ascending),
            vec![b"c".to_vec(), b"d".to_vec()]
        );
        assert_eq!(
            keys(&tx, "t", &KeyRange::starting_at(&b"b"[..], true), ScanOrder::Ascending),
            vec![b"b".to_vec(), b"c".to_vec(), b"d".to_vec()]
        );
        assert_eq!(
            keys(&tx, "t", &KeyRange::up_to(&b"d"[..], false), ScanOrder::Descending),
            vec![b"c".to_vec(), b"b".to_vec(), b"a".to_vec()]
        );
        assert_eq!(
            keys(&tx, "t", &KeyRange::between(&b"a"[..], false, &b"d"[..], false), ScanOrder::Descending),
            vec![b"c".to_vec(), b"b".to_vec()]
        );
        assert!(keys(&tx, "t", &KeyRange::between(&b"c"[..], false, &b"c"[..], true), ScanOrder::Ascending).is_empty());
        assert!(keys(&tx, "t", &KeyRange::between(&b"d"[..], true, &b"a"[..], true), ScanOrder::Ascending).is_empty());
    }
}

#[test]
fn shorter_key_sorts_first() {
    for (repo, _dir) in repos() {
        commit_rows(&repo, "t", &[(b"ab", b"2"), (b"a", b"1"), (b"abc", b"3"), (b"b", b"4")]);
        let tx = repo.begin_read().unwrap();
        assert_eq!(
            keys(&tx, "t", &KeyRange::all(), ScanOrder::Ascending),
            vec![b"a".to_vec(), b"ab".to_vec(), b"abc".to_vec(), b"b".to_vec()]
        );
    }
}

#[test]
fn typed_keys_scan_in_numeric_order() {
    let repo = Repository::open(&StoreConfig::in_memory()).unwrap();
    let mut tx = repo.begin_write().unwrap();
    for height in [300u64, 2, 70_000, 1] {
        tx.insert("headers", &height, &format!("header {height}")).unwrap();
    }
    tx.commit().unwrap();

    let tx = repo.begin_read().unwrap();
    let heights: Vec<u64> = tx
        .select_backward("headers", &KeyRange::all(), true)
        .unwrap()
        .map(|r| r.unwrap().key_as::<u64>().unwrap())
        .collect();
    assert_eq!(heights, vec![70_000, 300, 2, 1]);
}

// ---------------------------------------------------------------------------
// Isolation
// ---------------------------------------------------------------------------

#[test]
fn tables_are_isolated() {
    for (repo, _dir) in repos() {
        let mut tx = repo.begin_write().unwrap();
        tx.insert_raw("t1", b"same", b"one").unwrap();
        assert_eq!(tx.select_raw("t2", b"same").unwrap(), None);
        tx.insert_raw("t2", b"other", b"two").unwrap();
        tx.commit().unwrap();

        let tx = repo.begin_read().unwrap();
        assert_eq!(tx.select_raw("t2", b"same").unwrap(), None);
        assert_eq!(keys(&tx, "t2", &KeyRange::all(), ScanOrder::Ascending), vec![b"other".to_vec()]);
        assert_eq!(keys(&tx, "t1", &KeyRange::all(), ScanOrder::Descending), vec![b"same".to_vec()]);
    }
}

#[test]
fn readers_never_see_uncommitted_writes() {
    for (repo, _dir) in repos() {
        commit_rows(&repo, "t", &[(b"k", b"1")]);
        let repo = Arc::new(repo);

        let mut writer = repo.begin_write().unwrap();
        writer.insert_raw("t", b"k", b"2").unwrap();

        let seen = thread::scope(|s| {
            s.spawn(|| {
                let reader = repo.begin_read().unwrap();
                reader.select_raw("t", b"k").unwrap()
            })
            .join()
            .unwrap()
        });
        assert_eq!(seen, Some(b"1".to_vec()));

        writer.commit().unwrap();
        let reader = repo.begin_read().unwrap();
        assert_eq!(reader.select_raw("t", b"k").unwrap(), Some(b"2".to_vec()));
    }
}

#[test]
fn readers_run_while_writer_is_held() {
    let repo = Arc::new(Repository::open(&StoreConfig::in_memory()).unwrap());
    commit_rows(&repo, "t", &[(b"k", b"v")]);

    let _writer = repo.begin_write().unwrap();
    let barrier = Arc::new(Barrier::new(4));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let repo = Arc::clone(&repo);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let tx = repo.begin_read().unwrap();
                tx.select_raw("t", b"k").unwrap()
            })
        })
        .collect();
    for h in handles {
        assert_eq!(h.join().unwrap(), Some(b"v".to_vec()));
    }
}

// ---------------------------------------------------------------------------
// Writer Lock
// ---------------------------------------------------------------------------

#[test]
fn second_writer_waits_for_first() {
    let repo = Arc::new(Repository::open(&StoreConfig::in_memory()).unwrap());
    let mut first = repo.begin_write().unwrap();
    first.insert_raw("t", b"n", b"1").unwrap();

    let waiter = {
        let repo = Arc::clone(&repo);
        thread::spawn(move || {
            let mut tx = repo.begin_write().unwrap();
            // Runs strictly after the first writer committed.
            let current = tx.select_raw("t", b"n").unwrap();
            tx.insert_raw("t", b"n", b"2").unwrap();
            tx.commit().unwrap();
            current
        })
    };

    thread::sleep(Duration::from_millis(50));
    first.commit().unwrap();
    assert_eq!(waiter.join().unwrap(), Some(b"1".to_vec()));

    let tx = repo.begin_read().unwrap();
    assert_eq!(tx.select_raw("t", b"n").unwrap(), Some(b"2".to_vec()));
}

#[test]
fn bounded_writer_wait_times_out() {
    let config = StoreConfig {
        writer_wait: WriterWait::BoundedMs(30),
        ..StoreConfig::in_memory()
    };
    let repo = Repository::open(&config).unwrap();

    let held = repo.begin_write().unwrap();
    match repo.begin_write() {
        Err(StoreError::LockTimeout { waited_ms }) => assert!(waited_ms >= 30),
        other => panic!("expected LockTimeout, got {:?}", other.map(|_| ())),
    }
    drop(held);
    assert!(repo.begin_write().is_ok());
}

// ---------------------------------------------------------------------------
// Durability
// ---------------------------------------------------------------------------

#[test]
fn reopen_preserves_tables_and_rows() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = StoreConfig::at(BackendKind::Sled, dir.path());

    {
        let repo = Repository::open(&config).unwrap();
        let mut tx = repo.begin_write().unwrap();
        tx.insert("headers", &1u64, &"genesis").unwrap();
        tx.insert("meta", "tip", &1u64).unwrap();
        tx.commit().unwrap();

        // Created but never committed to: the table itself still persists.
        let mut tx = repo.begin_write().unwrap();
        tx.insert_raw("scratch", b"k", b"v").unwrap();
        tx.rollback().unwrap();
        repo.flush().unwrap();
    }

    let repo = Repository::open(&config).unwrap();
    let names: Vec<(String, u8)> = repo.tables().into_iter().map(|t| (t.name, t.prefix)).collect();
    assert_eq!(
        names,
        vec![
            ("headers".to_string(), 1),
            ("meta".to_string(), 2),
            ("scratch".to_string(), 3)
        ]
    );

    let tx = repo.begin_read().unwrap();
    let genesis: Option<String> = tx.select("headers", &1u64).unwrap();
    assert_eq!(genesis.as_deref(), Some("genesis"));
    let tip: Option<u64> = tx.select("meta", "tip").unwrap();
    assert_eq!(tip, Some(1));
    assert_eq!(tx.count("scratch").unwrap(), 0);
    drop(tx);

    // New tables continue after the highest persisted prefix.
    let mut tx = repo.begin_write().unwrap();
    tx.insert_raw("bodies", b"k", b"v").unwrap();
    tx.commit().unwrap();
    assert_eq!(repo.table("bodies").map(|t| t.prefix), Some(4));
}

#[test]
fn prefix_space_exhaustion_is_reported() {
    let repo = Repository::open(&StoreConfig::in_memory()).unwrap();
    let mut tx = repo.begin_write().unwrap();
    for i in 0..254 {
        tx.insert_raw(&format!("t{i}"), b"k", b"v").unwrap();
    }
    assert!(matches!(
        tx.insert_raw("overflow", b"k", b"v"),
        Err(StoreError::ResourceExhausted(_))
    ));
    tx.commit().unwrap();

    let tx = repo.begin_read().unwrap();
    assert_eq!(tx.count("t253").unwrap(), 1);
    assert_eq!(repo.tables().len(), 254);
}
