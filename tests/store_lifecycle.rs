use nowdb::{
    record::{edge, is_null_record, EdgeRecord, EdgeView},
    CompressionType, Period, Store, StoreConfig,
};
use rand::seq::SliceRandom;
use std::time::Duration;

const PAGE: u32 = 8192;

fn edge_rec(origin: u64, ts: i64) -> Vec<u8> {
    EdgeRecord::new(edge::RECORD_SIZE)
        .origin(origin)
        .destin(origin + 1)
        .timestamp(ts)
        .build()
}

#[test_log::test]
fn writer_swap_produces_two_files_and_spares() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = StoreConfig::edge(dir.path().join("ctx")).with_filesize(PAGE);
    Store::create(&cfg).unwrap();
    let store = Store::open(cfg).unwrap();

    let cap = PAGE / edge::RECORD_SIZE;
    for i in 0..=u64::from(cap) {
        store.insert(&edge_rec(i, i as i64)).unwrap();
    }

    let stats = store.stats().unwrap();
    assert_eq!(edge::RECORD_SIZE, stats.writer_size);
    assert_eq!(1, stats.pending + stats.readers);
    assert!(stats.spares >= 3);

    store.close().unwrap();
}

#[test_log::test]
fn sorted_files_reproduce_all_records() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = StoreConfig::edge(dir.path().join("ctx"))
        .with_filesize(2 * PAGE)
        .with_compression(CompressionType::Zstd);
    Store::create(&cfg).unwrap();
    let store = Store::open(cfg).unwrap();

    let total = 2 * PAGE / edge::RECORD_SIZE;
    let mut origins: Vec<u64> = (1..=u64::from(total)).collect();
    origins.shuffle(&mut rand::rng());
    for (i, origin) in origins.iter().enumerate() {
        store.insert(&edge_rec(*origin, i as i64)).unwrap();
    }
    assert!(store.wait_sorted(Duration::from_secs(30)).unwrap());

    let stats = store.stats().unwrap();
    assert_eq!(1, stats.readers);
    assert_eq!(0, stats.pending);

    // decompress every block and collect the records back
    let files = store.get_files(&Period::ALL).unwrap();
    let mut origins = Vec::new();
    for file in &files {
        let mut scanner = file.scanner().unwrap();
        loop {
            match scanner.move_next(&Period::ALL) {
                Ok(()) => {}
                Err(e) if e.is_eof() => break,
                Err(e) => panic!("{e}"),
            }
            for slot in scanner
                .current()
                .page
                .chunks_exact(edge::RECORD_SIZE as usize)
            {
                if !is_null_record(slot) {
                    origins.push(EdgeView(slot).origin());
                }
            }
        }
    }

    assert_eq!(total as usize, origins.len());
    // the sorted file serves its records in origin order
    assert!(origins.windows(2).all(|w| w[0] <= w[1]));

    store.close().unwrap();
}

#[test_log::test]
fn block_pruning_skips_disjoint_windows() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = StoreConfig::edge(dir.path().join("ctx"))
        .with_filesize(2 * PAGE)
        .with_ordering(vec![edge::TMSTMP]);
    Store::create(&cfg).unwrap();
    let store = Store::open(cfg).unwrap();

    let total = 2 * PAGE / edge::RECORD_SIZE;
    for i in 0..u64::from(total) {
        store.insert(&edge_rec(i, i as i64)).unwrap();
    }
    assert!(store.wait_sorted(Duration::from_secs(30)).unwrap());

    // sorted by stamp: the first block covers [0, 127], the second
    // [128, 255]; a query inside the second window never
    // decompresses the first block
    let files = store.get_files(&Period::ALL).unwrap();
    let file = files.first().unwrap();

    let period = Period::new(200, 210);
    let mut scanner = file.scanner().unwrap();
    scanner.move_next(&period).unwrap();

    let first = EdgeView(&scanner.current().page[0..64]).timestamp();
    assert_eq!(128, first);

    store.close().unwrap();
}

#[test_log::test]
fn retention_drops_expired_files() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = StoreConfig::edge(dir.path().join("ctx")).with_filesize(PAGE);
    Store::create(&cfg).unwrap();
    let store = Store::open(cfg).unwrap();

    let cap = u64::from(PAGE / edge::RECORD_SIZE);
    // one full file entirely below ts 1000, one above
    for i in 0..cap {
        store.insert(&edge_rec(i, i as i64)).unwrap();
    }
    for i in 0..cap {
        store.insert(&edge_rec(i, 2000 + i as i64)).unwrap();
    }
    assert!(store.wait_sorted(Duration::from_secs(30)).unwrap());
    assert_eq!(2, store.stats().unwrap().readers);

    assert_eq!(1, store.drop_older_than(1000).unwrap());
    assert_eq!(1, store.stats().unwrap().readers);

    // the surviving data is the young file
    let files = store.get_files(&Period::ALL).unwrap();
    assert!(files.iter().all(|f| f.period.end >= 1000));

    store.close().unwrap();
}

#[test_log::test]
fn reopened_store_keeps_its_files() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = StoreConfig::edge(dir.path().join("ctx")).with_filesize(2 * PAGE);
    Store::create(&cfg).unwrap();

    {
        let store = Store::open(cfg.clone()).unwrap();
        for i in 0..100u64 {
            store.insert(&edge_rec(i, i as i64)).unwrap();
        }
        store.close().unwrap();
    }

    let store = Store::open(cfg).unwrap();
    assert_eq!(100, store.count_approx().unwrap());
    store.close().unwrap();
}
