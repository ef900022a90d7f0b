use super::*;
use crate::config::DhtConfig;
use crate::storage::{GetParameter, StorageEntry};

fn addr(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

fn table() -> Arc<RoutingTable> {
    let local = Contact::new(NodeId::generate(), addr(1000));
    Arc::new(RoutingTable::new(local, &DhtConfig::default()))
}

#[test]
fn test_connect_acknowledges_and_learns_sender() {
    let routing = table();
    let handler = ConnectHandler {
        routing: routing.clone(),
    };
    let peer = NodeId::generate();

    let reply = handler.handle(addr(2000), Message::Connect { origin: peer });

    assert!(matches!(reply, Some(Message::Acknowledge { origin }) if origin == *routing.local_id()));
    assert_eq!(routing.get(&peer).unwrap().addr, addr(2000));
}

#[test]
fn test_find_node_excludes_local_node() {
    let routing = table();
    for port in 0..4 {
        routing.insert(Contact::new(NodeId::generate(), addr(3000 + port)));
    }
    let handler = FindNodeHandler {
        routing: routing.clone(),
        k: 5,
    };
    let asker = NodeId::generate();

    let reply = handler.handle(
        addr(4000),
        Message::FindNode {
            origin: asker,
            target: *routing.local_id(),
        },
    );

    let Some(Message::NodeReply { contacts, .. }) = reply else {
        panic!("expected node reply");
    };
    assert!(contacts.iter().all(|c| c.id != *routing.local_id()));
    // Four seeded peers plus the asker itself, capped at k.
    assert_eq!(contacts.len(), 5);
}

#[test]
fn test_find_content_falls_back_to_contacts() {
    let routing = table();
    let storage = Arc::new(ContentStore::new());
    let handler = FindContentHandler {
        routing: routing.clone(),
        storage: storage.clone(),
        k: 5,
    };
    let key = NodeId::from_key("missing");

    let reply = handler.handle(
        addr(2000),
        Message::FindContent {
            origin: NodeId::generate(),
            query: GetParameter::new(key),
        },
    );
    assert!(matches!(reply, Some(Message::NodeReply { .. })));

    storage.store(StorageEntry::new(key, "bob", "text", "here"));
    let reply = handler.handle(
        addr(2000),
        Message::FindContent {
            origin: NodeId::generate(),
            query: GetParameter::new(key).with_owner("bob"),
        },
    );
    let Some(Message::Content { entry, .. }) = reply else {
        panic!("expected content");
    };
    assert_eq!(&entry.content[..], b"here");
}

#[test]
fn test_store_reports_stale_writes() {
    let routing = table();
    let storage = Arc::new(ContentStore::new());
    let handler = StoreHandler {
        routing: routing.clone(),
        storage: storage.clone(),
    };
    let origin = NodeId::generate();
    let original = StorageEntry::new(NodeId::from_key("doc"), "carol", "text", "v1");
    let newer = original.with_content("v2");

    let reply = handler.handle(
        addr(2000),
        Message::Store {
            origin,
            entry: newer.clone(),
        },
    );
    assert!(matches!(reply, Some(Message::StoreReply { stored: true, .. })));

    let reply = handler.handle(
        addr(2000),
        Message::Store {
            origin,
            entry: original,
        },
    );
    assert!(matches!(reply, Some(Message::StoreReply { stored: false, .. })));
    assert_eq!(storage.get(&GetParameter::for_entry(&newer)).unwrap(), newer);
}

#[test]
fn test_mismatched_message_is_ignored() {
    let handler = ConnectHandler { routing: table() };
    let reply = handler.handle(
        addr(2000),
        Message::Acknowledge {
            origin: NodeId::generate(),
        },
    );
    assert!(reply.is_none());
}
