use super::*;
use std::net::{Ipv4Addr, SocketAddrV6};

fn addr(port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), port)
}

#[test]
fn test_node_id_generate() {
    let id1 = NodeId::generate();
    let id2 = NodeId::generate();
    assert_ne!(id1, id2);
}

#[test]
fn test_node_id_from_bytes_invalid() {
    assert!(matches!(
        NodeId::from_bytes(&[1u8; 10]),
        Err(DhtError::InvalidNodeId)
    ));
    assert!(NodeId::from_bytes(&[1u8; 21]).is_err());
    assert_eq!(NodeId::from_bytes(&[7u8; 20]).unwrap().0, [7u8; 20]);
}

#[test]
fn test_from_key_is_stable() {
    let a = NodeId::from_key("hello");
    let b = NodeId::from_key(b"hello");
    assert_eq!(a, b);
    assert_ne!(a, NodeId::from_key("world"));
}

#[test]
fn test_distance_is_symmetric_and_zero_on_self() {
    let a = NodeId::generate();
    let b = NodeId::generate();
    assert_eq!(a.distance(&b), b.distance(&a));
    assert_eq!(a.distance(&a), Distance([0u8; 20]));
    assert_eq!(a.log_distance(&a), 0);
}

#[test]
fn test_distance_orders_msb_first() {
    let origin = NodeId([0u8; 20]);
    let mut high = [0u8; 20];
    high[0] = 0x01;
    let mut low = [0xFFu8; 20];
    low[0] = 0x00;

    // 0x01 in the top byte outweighs every lower byte being set.
    assert!(origin.distance(&NodeId(low)) < origin.distance(&NodeId(high)));
}

#[test]
fn test_bucket_index() {
    let origin = NodeId([0u8; 20]);

    let mut top = [0u8; 20];
    top[0] = 0x80;
    assert_eq!(origin.log_distance(&NodeId(top)), 160);
    assert_eq!(origin.bucket_index(&NodeId(top)), 159);

    let mut bottom = [0u8; 20];
    bottom[19] = 0x01;
    assert_eq!(origin.bucket_index(&NodeId(bottom)), 0);

    assert_eq!(origin.bucket_index(&origin), 0);
}

#[test]
fn test_random_at_distance_lands_in_bucket() {
    let local = NodeId::generate();
    for bucket in 0..ID_BITS {
        let id = local.random_at_distance(bucket);
        assert_eq!(local.bucket_index(&id), bucket, "bucket {}", bucket);
    }
}

#[test]
fn test_contact_staleness() {
    let mut contact = Contact::new(NodeId::generate(), addr(4000));
    assert!(!contact.is_stale(1));

    contact.mark_stale();
    assert!(!contact.is_stale(1));
    contact.mark_stale();
    assert!(contact.is_stale(1));

    contact.touch();
    assert_eq!(contact.stale_count, 0);
}

#[test]
fn test_contact_wire_format() {
    let v4 = Contact::new(NodeId::generate(), addr(6881));
    let v6 = Contact::new(
        NodeId::generate(),
        SocketAddr::V6(SocketAddrV6::new(Ipv6Addr::LOCALHOST, 9000, 0, 0)),
    );

    let mut buf = BytesMut::new();
    v4.encode(&mut buf);
    v6.encode(&mut buf);

    let mut bytes = buf.freeze();
    let first = Contact::decode(&mut bytes).unwrap();
    let second = Contact::decode(&mut bytes).unwrap();

    assert_eq!(first.id, v4.id);
    assert_eq!(first.addr, v4.addr);
    assert_eq!(second.addr, v6.addr);
    assert!(bytes.is_empty());
}

#[test]
fn test_contact_decode_truncated() {
    let mut buf = BytesMut::new();
    Contact::new(NodeId::generate(), addr(1)).encode(&mut buf);
    let mut truncated = buf.freeze().slice(..22);
    assert!(Contact::decode(&mut truncated).is_err());
}
