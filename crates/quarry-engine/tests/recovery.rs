//! End-to-end log, checkpoint, and crash-recovery scenarios.

use std::sync::Arc;
use std::time::Duration;

use rand::{Rng, SeedableRng};

use quarry_common::constants::LOG_RECORD_HEADER_SIZE;
use quarry_common::types::{PageId, TxnId};
use quarry_common::EngineConfig;
use quarry_engine::{Engine, TableHeap};
use quarry_storage::page::Tuple;
use quarry_storage::DiskManager;

fn fast_config() -> EngineConfig {
    EngineConfig::default().with_log_timeout(Duration::from_millis(20))
}

fn random_tuple(rng: &mut impl Rng, len: usize) -> Tuple {
    let mut data = vec![0u8; len];
    rng.fill(&mut data[..]);
    Tuple::from(data)
}

/// Reads the five little-endian header words of the log record at
/// `offset`.
fn record_header_at(disk: &DiskManager, offset: u64) -> (u32, u32, u32, u32, u32) {
    let mut buf = [0u8; LOG_RECORD_HEADER_SIZE];
    let n = disk.read_log(&mut buf, offset).unwrap();
    assert!(n >= LOG_RECORD_HEADER_SIZE, "short log read at {offset}");
    let word = |i: usize| u32::from_le_bytes(buf[i * 4..i * 4 + 4].try_into().unwrap());
    (word(0), word(1), word(2), word(3), word(4))
}

#[test]
fn test_wal_layout_for_two_inserts_and_commit() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("test.db");

    let engine = Engine::open(&path, fast_config()).unwrap();
    let txn = engine.begin_transaction().unwrap();
    let txn_id = txn.id().as_u32();
    let table = engine.create_table(&txn).unwrap();

    table
        .insert_tuple(txn.id(), &Tuple::from(&b"alpha"[..]))
        .unwrap();
    table
        .insert_tuple(txn.id(), &Tuple::from(&b"beta"[..]))
        .unwrap();
    engine.commit(txn).unwrap();
    engine.shutdown().unwrap();

    let disk = DiskManager::open(&path).unwrap();
    let invalid = u32::MAX;

    // BEGIN: header only, LSN 0, no predecessor.
    let (size, lsn, txn_w, prev, rtype) = record_header_at(&disk, 0);
    assert_eq!(size, 20);
    assert_eq!(lsn, 0);
    assert_eq!(txn_w, txn_id);
    assert_eq!(prev, invalid);
    assert_eq!(rtype, 1);

    // NEWPAGE for the heap's first page.
    let (size, lsn, txn_w, prev, rtype) = record_header_at(&disk, 20);
    assert_eq!(size, 28);
    assert_eq!(lsn, 1);
    assert_eq!(txn_w, txn_id);
    assert_eq!(prev, 0);
    assert_eq!(rtype, 9);

    // INSERT "alpha": 20 header + 8 rid + 4 length + 5 payload.
    let (size, lsn, txn_w, prev, rtype) = record_header_at(&disk, 48);
    assert_eq!(size, 20 + 8 + 4 + 5);
    assert_eq!(lsn, 2);
    assert_eq!(txn_w, txn_id);
    assert_eq!(prev, 1);
    assert_eq!(rtype, 4);

    // INSERT "beta".
    let offset = 48 + size as u64;
    let (size, lsn, txn_w, prev, rtype) = record_header_at(&disk, offset);
    assert_eq!(size, 20 + 8 + 4 + 4);
    assert_eq!(lsn, 3);
    assert_eq!(txn_w, txn_id);
    assert_eq!(prev, 2);
    assert_eq!(rtype, 4);

    // COMMIT closes the chain.
    let offset = offset + size as u64;
    let (size, lsn, txn_w, prev, rtype) = record_header_at(&disk, offset);
    assert_eq!(size, 20);
    assert_eq!(lsn, 4);
    assert_eq!(txn_w, txn_id);
    assert_eq!(prev, 3);
    assert_eq!(rtype, 2);

    assert_eq!(disk.log_len().unwrap(), offset + 20);
}

#[test]
fn test_redo_restores_committed_transaction() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("test.db");
    let mut rng = rand::rngs::StdRng::seed_from_u64(17);

    let tuples: Vec<Tuple> = (0..20).map(|_| random_tuple(&mut rng, 64)).collect();
    let first_page_id;
    {
        let engine = Engine::open(&path, fast_config()).unwrap();
        let txn = engine.begin_transaction().unwrap();
        let table = engine.create_table(&txn).unwrap();
        first_page_id = table.first_page_id();

        for tuple in &tuples {
            table.insert_tuple(txn.id(), tuple).unwrap();
        }
        engine.commit(txn).unwrap();

        // Crash: stop the log without flushing a single data page.
        engine.log().stop_flush_thread().unwrap();
    }

    // Restart. Redo must rebuild the pages purely from the log.
    let engine = Engine::open(&path, fast_config()).unwrap();
    let table = TableHeap::open(Arc::clone(engine.pool()), None, first_page_id);
    let scanned = table.scan().unwrap();
    assert_eq!(scanned.len(), tuples.len());
    for ((_, found), expected) in scanned.iter().zip(&tuples) {
        assert_eq!(found, expected);
    }
    engine.shutdown().unwrap();
}

#[test]
fn test_undo_rolls_back_in_flight_transaction() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("test.db");

    let first_page_id;
    let loser_rid;
    {
        let engine = Engine::open(&path, fast_config()).unwrap();

        // A commits two tuples.
        let a = engine.begin_transaction().unwrap();
        let table = engine.create_table(&a).unwrap();
        first_page_id = table.first_page_id();
        table.insert_tuple(a.id(), &Tuple::from(&b"kept-1"[..])).unwrap();
        table.insert_tuple(a.id(), &Tuple::from(&b"kept-2"[..])).unwrap();
        engine.commit(a).unwrap();

        // B inserts and crashes mid-flight, after its records and the
        // data page reach disk but with no commit record.
        let b = engine.begin_transaction().unwrap();
        loser_rid = table
            .insert_tuple(b.id(), &Tuple::from(&b"phantom"[..]))
            .unwrap();
        engine.log().stop_flush_thread().unwrap();
        engine.pool().flush_page(loser_rid.page_id).unwrap();
        drop(b);
    }

    let engine = Engine::open(&path, fast_config()).unwrap();
    let table = TableHeap::open(Arc::clone(engine.pool()), None, first_page_id);

    // The in-flight insert is compensated away; the committed rows stay.
    assert_eq!(table.get_tuple(loser_rid).unwrap(), None);
    let scanned = table.scan().unwrap();
    let payloads: Vec<&[u8]> = scanned.iter().map(|(_, t)| t.data()).collect();
    assert_eq!(payloads, vec![&b"kept-1"[..], &b"kept-2"[..]]);
    engine.shutdown().unwrap();
}

#[test]
fn test_undo_of_update_and_delete() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("test.db");

    let first_page_id;
    let updated_rid;
    let marked_rid;
    {
        let engine = Engine::open(&path, fast_config()).unwrap();

        let setup = engine.begin_transaction().unwrap();
        let table = engine.create_table(&setup).unwrap();
        first_page_id = table.first_page_id();
        updated_rid = table
            .insert_tuple(setup.id(), &Tuple::from(&b"original"[..]))
            .unwrap();
        marked_rid = table
            .insert_tuple(setup.id(), &Tuple::from(&b"survives"[..]))
            .unwrap();
        engine.commit(setup).unwrap();

        // The loser updates one tuple and mark-deletes the other.
        let loser = engine.begin_transaction().unwrap();
        table
            .update_tuple(loser.id(), updated_rid, &Tuple::from(&b"clobber!"[..]))
            .unwrap();
        table.mark_delete(loser.id(), marked_rid).unwrap();
        engine.log().stop_flush_thread().unwrap();
        drop(loser);
    }

    let engine = Engine::open(&path, fast_config()).unwrap();
    let table = TableHeap::open(Arc::clone(engine.pool()), None, first_page_id);

    assert_eq!(
        table.get_tuple(updated_rid).unwrap(),
        Some(Tuple::from(&b"original"[..]))
    );
    assert_eq!(
        table.get_tuple(marked_rid).unwrap(),
        Some(Tuple::from(&b"survives"[..]))
    );
    engine.shutdown().unwrap();
}

#[test]
fn test_recovery_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("test.db");

    let first_page_id;
    {
        let engine = Engine::open(&path, fast_config()).unwrap();
        let txn = engine.begin_transaction().unwrap();
        let table = engine.create_table(&txn).unwrap();
        first_page_id = table.first_page_id();
        for i in 0..10u8 {
            table
                .insert_tuple(txn.id(), &Tuple::from(vec![i; 16]))
                .unwrap();
        }
        engine.commit(txn).unwrap();
        engine.log().stop_flush_thread().unwrap();
    }

    // Recover twice; the page-LSN gate makes the second pass a no-op.
    for _ in 0..2 {
        let engine = Engine::open(&path, fast_config()).unwrap();
        let table = TableHeap::open(Arc::clone(engine.pool()), None, first_page_id);
        assert_eq!(table.scan().unwrap().len(), 10);
        engine.shutdown().unwrap();
    }
}

#[test]
fn test_lsn_assignment_resumes_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("test.db");

    {
        let engine = Engine::open(&path, fast_config()).unwrap();
        let txn = engine.begin_transaction().unwrap();
        let table = engine.create_table(&txn).unwrap();
        table
            .insert_tuple(txn.id(), &Tuple::from(&b"first session"[..]))
            .unwrap();
        engine.commit(txn).unwrap();
        // BEGIN(0) NEWPAGE(1) INSERT(2) COMMIT(3).
        assert_eq!(engine.log().last_lsn().as_u32(), 3);
        engine.shutdown().unwrap();
    }

    // The next session picks up numbering above everything on disk, so
    // page-LSN comparisons against the old stamps stay meaningful.
    let engine = Engine::open(&path, fast_config()).unwrap();
    let txn = engine.begin_transaction().unwrap();
    let table = engine.create_table(&txn).unwrap();
    table
        .insert_tuple(txn.id(), &Tuple::from(&b"second session"[..]))
        .unwrap();
    engine.commit(txn).unwrap();
    assert!(engine.log().last_lsn().as_u32() > 3);
    engine.shutdown().unwrap();
}

#[test]
fn test_checkpoint_leaves_pool_clean_and_log_durable() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("test.db");

    let engine = Engine::open(&path, fast_config()).unwrap();
    let txn = engine.begin_transaction().unwrap();
    let table = engine.create_table(&txn).unwrap();
    let rid = table
        .insert_tuple(txn.id(), &Tuple::from(&b"durable"[..]))
        .unwrap();
    engine.commit(txn).unwrap();

    engine.checkpoint().unwrap();

    // Every page is clean and the log has caught up with the last
    // appended record.
    assert_eq!(engine.pool().dirty_pages(), 0);
    assert_eq!(engine.log().persistent_lsn(), engine.log().last_lsn());

    // The buffered image is byte-identical to disk.
    let frame = engine.pool().fetch_page(rid.page_id).unwrap();
    let mut on_disk = vec![0u8; quarry_common::constants::PAGE_SIZE];
    engine.disk().read_page(rid.page_id, &mut on_disk).unwrap();
    assert_eq!(&frame.read_data()[..], &on_disk[..]);
    engine.pool().unpin_page(rid.page_id, false);

    engine.shutdown().unwrap();
}

#[test]
fn test_eviction_forces_log_before_data() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("test.db");

    // Tiny pool, long timeout: only the WAL barrier can have flushed the
    // log when dirty logged pages get evicted.
    let config = fast_config()
        .with_pool_size(4)
        .with_log_timeout(Duration::from_secs(60));
    let engine = Engine::open(&path, config).unwrap();

    let txn = engine.begin_transaction().unwrap();
    let table = engine.create_table(&txn).unwrap();
    let big = Tuple::from(vec![7u8; 1024]);
    for _ in 0..30 {
        table.insert_tuple(txn.id(), &big).unwrap();
    }

    // The inserts span more pages than the pool holds, so evictions
    // happened; every one of them must have pushed the log first.
    let persistent = engine.log().persistent_lsn();
    assert!(persistent.is_valid());

    let stats = engine.pool().stats();
    assert!(stats.evictions > 0);

    // Drop back to a fast group-commit cadence before committing.
    engine.log().set_log_timeout(Duration::from_millis(20));
    engine.commit(txn).unwrap();
    engine.shutdown().unwrap();
}

#[test]
fn test_corrupt_log_tail_stops_redo() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("test.db");

    let first_page_id;
    {
        let engine = Engine::open(&path, fast_config()).unwrap();
        let txn = engine.begin_transaction().unwrap();
        let table = engine.create_table(&txn).unwrap();
        first_page_id = table.first_page_id();
        table
            .insert_tuple(txn.id(), &Tuple::from(&b"good"[..]))
            .unwrap();
        engine.commit(txn).unwrap();
        engine.log().stop_flush_thread().unwrap();
    }

    // Append garbage that cannot parse as a record.
    {
        let disk = DiskManager::open(&path).unwrap();
        disk.write_log(&[0u8; 13]).unwrap();
    }

    // Recovery reads up to the garbage and ignores the rest.
    let engine = Engine::open(&path, fast_config()).unwrap();
    let table = TableHeap::open(Arc::clone(engine.pool()), None, first_page_id);
    let scanned = table.scan().unwrap();
    assert_eq!(scanned.len(), 1);
    assert_eq!(scanned[0].1, Tuple::from(&b"good"[..]));
    engine.shutdown().unwrap();
}

#[test]
fn test_page_zero_is_metadata_root() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("test.db");

    let engine = Engine::open(
        &path,
        fast_config().with_logging(false),
    )
    .unwrap();
    let txn = engine.begin_transaction().unwrap();
    let table = engine.create_table(&txn).unwrap();
    // The first allocation of a fresh database is page 0.
    assert_eq!(table.first_page_id(), PageId::new(0));
    engine.commit(txn).unwrap();
}

#[test]
fn test_unknown_txn_rejected_by_log() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::open(dir.path().join("test.db"), fast_config()).unwrap();

    let err = engine
        .log()
        .log_insert(
            TxnId::new(404),
            quarry_common::types::Rid::new(PageId::new(0), 0),
            Tuple::from(&b"x"[..]),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        quarry_wal::WalError::UnknownTransaction { .. }
    ));
    engine.shutdown().unwrap();
}
