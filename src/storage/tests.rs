use super::*;

fn entry(name: &str, owner: &str, kind: &str, content: &'static [u8]) -> StorageEntry {
    StorageEntry::new(NodeId::from_key(name), owner, kind, Bytes::from_static(content))
}

#[test]
fn test_store_and_get() {
    let store = ContentStore::new();
    let e = entry("doc", "alice", "text", b"hello");

    assert_eq!(store.store(e.clone()), StoreStatus::Inserted);
    assert_eq!(store.len(), 1);

    let found = store.get(&GetParameter::for_entry(&e)).unwrap();
    assert_eq!(found, e);
}

#[test]
fn test_owner_and_type_disambiguate() {
    let store = ContentStore::new();
    let a = entry("doc", "alice", "text", b"a");
    let b = entry("doc", "bob", "text", b"b");
    let c = entry("doc", "alice", "json", b"c");

    store.store(a.clone());
    store.store(b.clone());
    store.store(c.clone());
    assert_eq!(store.len(), 3);

    let key = a.key;
    let by_bob = store.get(&GetParameter::new(key).with_owner("bob")).unwrap();
    assert_eq!(by_bob.content, b.content);

    let alice_json = store
        .get(
            &GetParameter::new(key)
                .with_owner("alice")
                .with_content_type("json"),
        )
        .unwrap();
    assert_eq!(alice_json.content, c.content);

    assert!(!store.contains(&GetParameter::new(key).with_owner("carol")));
    assert!(store.contains(&GetParameter::new(key)));
}

#[test]
fn test_newer_entry_updates_in_place() {
    let store = ContentStore::new();
    let original = entry("doc", "alice", "text", b"v1");
    store.store(original.clone());

    let newer = original.with_content(Bytes::from_static(b"v2"));
    assert_eq!(store.store(newer.clone()), StoreStatus::Updated);
    assert_eq!(store.len(), 1);

    let found = store.get(&GetParameter::for_entry(&original)).unwrap();
    assert_eq!(&found.content[..], b"v2");
    assert_eq!(found.created_at, original.created_at);
}

#[test]
fn test_older_entry_is_ignored() {
    let store = ContentStore::new();
    let original = entry("doc", "alice", "text", b"v1");
    let newer = original.with_content(Bytes::from_static(b"v2"));

    store.store(newer);
    assert_eq!(store.store(original.clone()), StoreStatus::Stale);

    let found = store.get(&GetParameter::for_entry(&original)).unwrap();
    assert_eq!(&found.content[..], b"v2");
}

#[test]
fn test_get_prefers_most_recent_match() {
    let store = ContentStore::new();
    let mut older = entry("doc", "alice", "text", b"old");
    older.updated_at = 10;
    let mut newer = entry("doc", "bob", "text", b"new");
    newer.updated_at = 20;

    store.store(older.clone());
    store.store(newer);

    let found = store.get(&GetParameter::new(older.key)).unwrap();
    assert_eq!(&found.content[..], b"new");
}

#[test]
fn test_remove() {
    let store = ContentStore::new();
    let e = entry("doc", "alice", "text", b"x");
    store.store(e.clone());

    assert_eq!(store.remove(&e), Some(e.clone()));
    assert!(store.is_empty());
    assert!(store.remove(&e).is_none());
}

#[test]
fn test_snapshot_and_restore() {
    let store = ContentStore::new();
    for i in 0..10 {
        store.store(StorageEntry::new(
            NodeId::from_key(format!("key-{}", i)),
            "owner",
            "blob",
            vec![i as u8; 16],
        ));
    }

    let restored = ContentStore::new();
    restored.insert_all(store.entries());
    assert_eq!(restored.len(), 10);

    for e in store.entries() {
        assert_eq!(restored.get(&GetParameter::for_entry(&e)), Some(e));
    }
}

#[test]
fn test_due_for_republish() {
    let store = ContentStore::new();
    let e = entry("doc", "alice", "text", b"x");
    store.store(e.clone());

    assert_eq!(store.due_for_republish(Duration::ZERO).len(), 1);
    assert!(store.due_for_republish(Duration::from_secs(3600)).is_empty());

    store.mark_republished(&e);
    assert!(store.due_for_republish(Duration::from_secs(3600)).is_empty());
}

#[test]
fn test_entry_wire_format() {
    let e = entry("doc", "alice", "text/plain", b"payload bytes");
    let query = GetParameter::new(e.key).with_owner("alice");

    let mut buf = BytesMut::new();
    e.encode(&mut buf);
    query.encode(&mut buf);

    let mut bytes = buf.freeze();
    assert_eq!(StorageEntry::decode(&mut bytes).unwrap(), e);
    assert_eq!(GetParameter::decode(&mut bytes).unwrap(), query);
    assert!(bytes.is_empty());
}

#[test]
fn test_truncated_entry_is_rejected() {
    let mut buf = BytesMut::new();
    entry("doc", "alice", "text", b"payload").encode(&mut buf);
    let full = buf.freeze();
    let mut truncated = full.slice(..full.len() - 3);
    assert!(StorageEntry::decode(&mut truncated).is_err());
}
