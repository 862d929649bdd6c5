use std::io::Write;
use std::path::PathBuf;

use meta_store::{MetaStore, MetaStoreError, StoreOp};

fn store_path(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!("ozone-meta-it-{}-{}", tag, uuid::Uuid::new_v4()))
}

fn teardown(path: &PathBuf) {
    let _ = std::fs::remove_file(path);
}

#[test]
fn iteration_is_lexicographic() {
    let path = store_path("order");
    let store = MetaStore::open(&path).unwrap();

    store.put(b"/v1/b1/zebra", b"3").unwrap();
    store.put(b"/v1/b1/apple", b"1").unwrap();
    store.put(b"/v1/b1/mango", b"2").unwrap();
    store.put(b"/v1/b2/other", b"x").unwrap();

    let keys: Vec<Vec<u8>> = store
        .iter(Some(b"/v1/b1/".as_slice()))
        .map(|(k, _)| k)
        .collect();
    assert_eq!(
        keys,
        vec![
            b"/v1/b1/apple".to_vec(),
            b"/v1/b1/mango".to_vec(),
            b"/v1/b1/zebra".to_vec(),
        ]
    );

    teardown(&path);
}

#[test]
fn iterator_sees_snapshot_as_of_seek() {
    let path = store_path("snapshot");
    let store = MetaStore::open(&path).unwrap();

    store.put(b"a", b"1").unwrap();
    store.put(b"b", b"2").unwrap();

    let iter = store.iter(None);
    store.put(b"c", b"3").unwrap();
    store.delete(b"a").unwrap();

    let seen: Vec<Vec<u8>> = iter.map(|(k, _)| k).collect();
    assert_eq!(seen, vec![b"a".to_vec(), b"b".to_vec()]);

    // A fresh seek observes the new state.
    let reseek: Vec<Vec<u8>> = store.iter(None).map(|(k, _)| k).collect();
    assert_eq!(reseek, vec![b"b".to_vec(), b"c".to_vec()]);

    teardown(&path);
}

#[test]
fn batch_applies_all_or_nothing_across_reopen() {
    let path = store_path("batch");
    {
        let store = MetaStore::open(&path).unwrap();
        store.put(b"/v1", b"volume").unwrap();
        store
            .batch(vec![
                StoreOp::Put {
                    key: b"/v2".to_vec(),
                    value: b"volume2".to_vec(),
                },
                StoreOp::Put {
                    key: b"$alice".to_vec(),
                    value: b"[\"v2\"]".to_vec(),
                },
                StoreOp::Delete {
                    key: b"/v1".to_vec(),
                },
            ])
            .unwrap();
    }

    let store = MetaStore::open(&path).unwrap();
    assert_eq!(store.get(b"/v1").unwrap(), None);
    assert_eq!(store.get(b"/v2").unwrap(), Some(b"volume2".to_vec()));
    assert_eq!(store.get(b"$alice").unwrap(), Some(b"[\"v2\"]".to_vec()));

    teardown(&path);
}

#[test]
fn reopen_replays_puts_and_deletes() {
    let path = store_path("reopen");
    {
        let store = MetaStore::open(&path).unwrap();
        store.put(b"keep", b"yes").unwrap();
        store.put(b"drop", b"no").unwrap();
        store.delete(b"drop").unwrap();
    }

    let store = MetaStore::open(&path).unwrap();
    assert_eq!(store.get(b"keep").unwrap(), Some(b"yes".to_vec()));
    assert_eq!(store.get(b"drop").unwrap(), None);
    assert!(!store.is_empty().unwrap());

    teardown(&path);
}

#[test]
fn torn_tail_is_discarded_on_open() {
    let path = store_path("torn");
    {
        let store = MetaStore::open(&path).unwrap();
        store.put(b"good", b"record").unwrap();
    }
    {
        // Simulate a crash mid-append: garbage with no trailing newline.
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap();
        file.write_all(b"{\"op\":\"put\",\"k\":\"61").unwrap();
    }

    let store = MetaStore::open(&path).unwrap();
    assert_eq!(store.get(b"good").unwrap(), Some(b"record".to_vec()));
    assert_eq!(store.iter(None).len(), 1);

    // The truncated log stays usable for further writes.
    store.put(b"more", b"data").unwrap();
    drop(store);
    let store = MetaStore::open(&path).unwrap();
    assert_eq!(store.get(b"more").unwrap(), Some(b"data".to_vec()));

    teardown(&path);
}

#[test]
fn corrupt_interior_record_fails_open() {
    let path = store_path("corrupt");
    {
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(b"not json at all\n").unwrap();
        file.write_all(b"{\"op\":\"put\",\"k\":\"61\",\"v\":\"62\"}\n")
            .unwrap();
    }

    match MetaStore::open(&path) {
        Err(MetaStoreError::Corrupted { line, .. }) => assert_eq!(line, 0),
        other => panic!("expected Corrupted, got {:?}", other.map(|_| ())),
    }

    teardown(&path);
}

#[test]
fn write_lock_serializes_multi_call_sections() {
    let path = store_path("lock");
    let store = MetaStore::open(&path).unwrap();

    {
        let _guard = store.write_lock();
        store.put(b"a", b"1").unwrap();
        store.put(b"b", b"2").unwrap();
    }
    {
        let _guard = store.read_lock();
        assert_eq!(store.get(b"a").unwrap(), Some(b"1".to_vec()));
    }

    teardown(&path);
}
