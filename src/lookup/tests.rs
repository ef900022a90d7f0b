use super::*;
use crate::storage::StorageEntry;
use crate::testing::{
    eventually, fast_config, id_with_prefix, mesh, spawn_node, spawn_node_with_id, SilentPeer,
};
use std::collections::HashSet;

#[tokio::test]
async fn test_lone_node_returns_itself() {
    let node = spawn_node(fast_config()).await;

    let result = node.find_node(NodeId::generate()).await.unwrap();

    assert_eq!(result.closest.len(), 1);
    assert_eq!(result.closest[0].id, node.id());
    assert_eq!(result.queried, 0);
    assert!(result.failed.is_empty());
}

#[tokio::test]
async fn test_lookup_converges_to_true_closest() {
    let config = fast_config().with_k(5);

    // First bytes 0..16 form a full binary tree under a shared 4-bit prefix,
    // so every node knows its whole half of the network.
    let mut peers = Vec::new();
    for prefix in 0..16u8 {
        peers.push(spawn_node_with_id(config.clone(), id_with_prefix(prefix)).await);
    }
    mesh(&peers);

    let querier = spawn_node_with_id(config.clone(), id_with_prefix(0xF0)).await;
    querier.restore_contacts([peers[0].local_contact()]);

    let target = id_with_prefix(11);
    let result = querier.find_node(target).await.unwrap();

    let mut everyone: Vec<NodeId> = peers.iter().map(|p| p.id()).collect();
    everyone.push(querier.id());
    everyone.sort_by_key(|id| id.distance(&target));
    let expected: Vec<NodeId> = everyone.into_iter().take(5).collect();

    let found: Vec<NodeId> = result.closest.iter().map(|c| c.id).collect();
    assert_eq!(found, expected);
    assert!(result.failed.is_empty());
    assert!(result.elapsed < config.operation_timeout);
}

#[tokio::test]
async fn test_lookup_progresses_past_silent_peers() {
    let config = fast_config().with_k(8);
    let live = vec![
        spawn_node(config.clone()).await,
        spawn_node(config.clone()).await,
        spawn_node(config.clone()).await,
    ];
    mesh(&live);

    let silent = vec![
        SilentPeer::bind().await,
        SilentPeer::bind().await,
        SilentPeer::bind().await,
    ];

    let querier = spawn_node(config.clone()).await;
    querier.restore_contacts(live.iter().map(|n| n.local_contact()));
    querier.restore_contacts(silent.iter().map(|s| s.contact.clone()));

    let result = querier.find_node(NodeId::generate()).await.unwrap();

    let silent_ids: HashSet<NodeId> = silent.iter().map(|s| s.contact.id).collect();
    let failed: HashSet<NodeId> = result.failed.iter().copied().collect();
    assert_eq!(failed, silent_ids);
    assert!(result.closest.iter().all(|c| !silent_ids.contains(&c.id)));
    assert_eq!(result.closest.len(), live.len() + 1);
    assert_eq!(result.queried, live.len());
    assert!(result.elapsed < config.operation_timeout);

    for peer in &silent {
        assert_eq!(peer.received(), 1);
        let contact = querier.routing_table().get(&peer.contact.id).unwrap();
        assert_eq!(contact.stale_count, 1);
    }
}

#[tokio::test]
async fn test_lookup_bounded_by_operation_timeout() {
    let config = fast_config()
        .with_response_timeout(Duration::from_secs(10))
        .with_operation_timeout(Duration::from_millis(200));
    let silent = SilentPeer::bind().await;
    let querier = spawn_node(config).await;
    querier.restore_contacts([silent.contact.clone()]);

    let result = querier.find_node(NodeId::generate()).await.unwrap();

    assert!(result.elapsed >= Duration::from_millis(200));
    assert!(result.elapsed < Duration::from_secs(2));
    // Still awaiting when time ran out, so neither asked nor failed.
    assert!(result.failed.is_empty());
    assert_eq!(result.closest.len(), 1);
}

#[tokio::test]
async fn test_late_timeout_still_marks_peer_stale() {
    // Equal deadlines: the request timeout may fire after the lookup returns.
    let config = fast_config()
        .with_response_timeout(Duration::from_millis(300))
        .with_operation_timeout(Duration::from_millis(300));
    let silent = SilentPeer::bind().await;
    let querier = spawn_node(config).await;
    querier.restore_contacts([silent.contact.clone()]);

    querier.find_node(NodeId::generate()).await.unwrap();

    let id = silent.contact.id;
    let marked = eventually(
        || querier.routing_table().get(&id).is_some_and(|c| c.stale_count == 1),
        Duration::from_secs(2),
    )
    .await;
    assert!(marked);
    assert_eq!(silent.received(), 1);
}

#[tokio::test]
async fn test_in_flight_requests_bounded_by_concurrency() {
    let config = fast_config()
        .with_k(8)
        .with_max_concurrency(2)
        .with_response_timeout(Duration::from_millis(200));
    let mut silent = Vec::new();
    for _ in 0..5 {
        silent.push(SilentPeer::bind().await);
    }
    let querier = spawn_node(config).await;
    querier.restore_contacts(silent.iter().map(|s| s.contact.clone()));

    let lookup = LookupOperation::node(querier.context(), NodeId::generate());
    let handle = tokio::spawn(lookup.execute());

    tokio::time::sleep(Duration::from_millis(100)).await;
    let early: usize = silent.iter().map(|s| s.received()).sum();
    assert!(early <= 2, "{early} requests in flight");

    let result = handle.await.unwrap().unwrap();
    assert_eq!(result.failed.len(), 5);
    for peer in &silent {
        assert_eq!(peer.received(), 1);
    }
}

#[tokio::test]
async fn test_batch_respects_budget_and_window() {
    let config = fast_config().with_k(3);
    let node = spawn_node_with_id(config, id_with_prefix(0x00)).await;
    for prefix in [0x80u8, 0x40, 0x20, 0x10, 0x08] {
        let addr = SocketAddr::from(([127, 0, 0, 1], 9000 + prefix as u16));
        node.restore_contacts([Contact::new(id_with_prefix(prefix), addr)]);
    }

    let target = id_with_prefix(0x00);
    let lookup = LookupOperation::node(node.context(), target);

    // The local node is already asked and occupies one window slot.
    let batch = lookup.next_batch(10);
    assert_eq!(batch.len(), 2);
    assert_eq!(batch[0].1.id.0[0], 0x08);
    assert_eq!(batch[1].1.id.0[0], 0x10);

    assert_eq!(lookup.next_batch(1).len(), 1);
    assert!(lookup.next_batch(0).is_empty());
}

#[tokio::test]
async fn test_failed_contacts_leave_window() {
    let config = fast_config().with_k(2);
    let node = spawn_node_with_id(config, id_with_prefix(0x00)).await;
    for prefix in [0x80u8, 0x40, 0x20] {
        let addr = SocketAddr::from(([127, 0, 0, 1], 9000 + prefix as u16));
        node.restore_contacts([Contact::new(id_with_prefix(prefix), addr)]);
    }

    let mut lookup = LookupOperation::node(node.context(), id_with_prefix(0x00));
    let first = lookup.next_batch(10);
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].1.id.0[0], 0x20);

    lookup.apply(LookupEvent::Timeout { key: first[0].0 });
    let next = lookup.next_batch(10);
    assert_eq!(next.len(), 1);
    assert_eq!(next[0].1.id.0[0], 0x40);
}

#[tokio::test]
async fn test_content_lookup_stops_at_holder() {
    let config = fast_config();
    let peers = vec![
        spawn_node(config.clone()).await,
        spawn_node(config.clone()).await,
        spawn_node(config.clone()).await,
    ];
    mesh(&peers);

    let key = NodeId::from_key("report.pdf");
    let entry = StorageEntry::new(key, "dave", "pdf", vec![1u8, 2, 3, 4]);
    peers[2].storage().store(entry.clone());

    let querier = spawn_node(config).await;
    querier.restore_contacts(peers.iter().map(|p| p.local_contact()));

    let result = LookupOperation::content(querier.context(), GetParameter::for_entry(&entry))
        .execute()
        .await
        .unwrap();

    assert_eq!(result.content, Some(entry));
}

#[tokio::test]
async fn test_shutdown_aborts_lookup() {
    let config = fast_config()
        .with_response_timeout(Duration::from_secs(10))
        .with_operation_timeout(Duration::from_secs(10));
    let silent = SilentPeer::bind().await;
    let querier = spawn_node(config).await;
    querier.restore_contacts([silent.contact.clone()]);

    let lookup = LookupOperation::node(querier.context(), NodeId::generate());
    let handle = tokio::spawn(lookup.execute());

    tokio::time::sleep(Duration::from_millis(50)).await;
    querier.shutdown();

    let result = tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(DhtError::TransportClosed)));
}
