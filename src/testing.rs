//! Helpers shared by the networked unit tests.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;

use crate::config::DhtConfig;
use crate::node::{Contact, NodeId};
use crate::server::DhtNode;

pub(crate) fn fast_config() -> DhtConfig {
    DhtConfig::default()
        .with_response_timeout(Duration::from_millis(100))
        .with_operation_timeout(Duration::from_secs(2))
}

fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

pub(crate) async fn spawn_node(config: DhtConfig) -> DhtNode {
    DhtNode::builder(config).bind(loopback()).await.unwrap()
}

pub(crate) async fn spawn_node_with_id(config: DhtConfig, id: NodeId) -> DhtNode {
    DhtNode::builder(config).id(id).bind(loopback()).await.unwrap()
}

/// Offers every node to every other node's routing table.
pub(crate) fn mesh(nodes: &[DhtNode]) {
    let contacts: Vec<Contact> = nodes.iter().map(DhtNode::local_contact).collect();
    for node in nodes {
        node.restore_contacts(contacts.iter().filter(|c| c.id != node.id()).cloned());
    }
}

/// A random id whose first byte is `prefix`.
pub(crate) fn id_with_prefix(prefix: u8) -> NodeId {
    let mut id = NodeId::generate();
    id.0[0] = prefix;
    id
}

/// A bound socket that counts datagrams and never answers.
pub(crate) struct SilentPeer {
    pub(crate) contact: Contact,
    received: Arc<AtomicUsize>,
    reader: tokio::task::JoinHandle<()>,
}

impl SilentPeer {
    pub(crate) async fn bind() -> Self {
        let socket = UdpSocket::bind(loopback()).await.unwrap();
        let contact = Contact::new(NodeId::generate(), socket.local_addr().unwrap());
        let received = Arc::new(AtomicUsize::new(0));

        let counter = received.clone();
        let reader = tokio::spawn(async move {
            let mut buf = vec![0u8; 65536];
            while socket.recv_from(&mut buf).await.is_ok() {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        Self {
            contact,
            received,
            reader,
        }
    }

    pub(crate) fn addr(&self) -> SocketAddr {
        self.contact.addr
    }

    pub(crate) fn received(&self) -> usize {
        self.received.load(Ordering::SeqCst)
    }
}

impl Drop for SilentPeer {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Polls `condition` until it holds or `timeout` passes.
pub(crate) async fn eventually(mut condition: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
