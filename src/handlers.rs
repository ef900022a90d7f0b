//! Default handlers for unsolicited requests.
//!
//! Every inbound request is also proof that its sender is alive, so each
//! handler first offers the sender to the routing table before answering.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::debug;

use crate::message::{Message, MessageKind};
use crate::node::{Contact, NodeId};
use crate::routing::RoutingTable;
use crate::storage::{ContentStore, StoreStatus};
use crate::transport::{RequestHandler, Transport};

fn observe(routing: &RoutingTable, origin: NodeId, from: SocketAddr) {
    if &origin != routing.local_id() {
        routing.insert(Contact::new(origin, from));
    }
}

/// Closest known contacts to `target`, leaving out the local node.
fn closest_peers(routing: &RoutingTable, target: &NodeId, k: usize) -> Vec<Contact> {
    let local = *routing.local_id();
    routing
        .find_closest(target, k + 1)
        .into_iter()
        .filter(|contact| contact.id != local)
        .take(k)
        .collect()
}

/// Answers `Connect` with `Acknowledge`.
pub struct ConnectHandler {
    routing: Arc<RoutingTable>,
}

impl RequestHandler for ConnectHandler {
    fn handle(&self, from: SocketAddr, message: Message) -> Option<Message> {
        let Message::Connect { origin } = message else {
            return None;
        };
        observe(&self.routing, origin, from);
        debug!("Acknowledging connect from {} ({:?})", from, origin);

        Some(Message::Acknowledge {
            origin: *self.routing.local_id(),
        })
    }
}

/// Answers `FindNode` from the local routing table.
pub struct FindNodeHandler {
    routing: Arc<RoutingTable>,
    k: usize,
}

impl RequestHandler for FindNodeHandler {
    fn handle(&self, from: SocketAddr, message: Message) -> Option<Message> {
        let Message::FindNode { origin, target } = message else {
            return None;
        };
        observe(&self.routing, origin, from);

        Some(Message::NodeReply {
            origin: *self.routing.local_id(),
            contacts: closest_peers(&self.routing, &target, self.k),
        })
    }
}

/// Answers `FindContent` with the stored entry, or with closer contacts when
/// nothing local matches.
pub struct FindContentHandler {
    routing: Arc<RoutingTable>,
    storage: Arc<ContentStore>,
    k: usize,
}

impl RequestHandler for FindContentHandler {
    fn handle(&self, from: SocketAddr, message: Message) -> Option<Message> {
        let Message::FindContent { origin, query } = message else {
            return None;
        };
        observe(&self.routing, origin, from);
        let local = *self.routing.local_id();

        match self.storage.get(&query) {
            Some(entry) => Some(Message::Content {
                origin: local,
                entry,
            }),
            None => Some(Message::NodeReply {
                origin: local,
                contacts: closest_peers(&self.routing, &query.key, self.k),
            }),
        }
    }
}

/// Writes replicated entries into the local store.
pub struct StoreHandler {
    routing: Arc<RoutingTable>,
    storage: Arc<ContentStore>,
}

impl RequestHandler for StoreHandler {
    fn handle(&self, from: SocketAddr, message: Message) -> Option<Message> {
        let Message::Store { origin, entry } = message else {
            return None;
        };
        observe(&self.routing, origin, from);

        let key = entry.key;
        let status = self.storage.store(entry);
        match status {
            StoreStatus::Stale => debug!(
                "Ignoring store for {} from {}: local copy is newer",
                key, from
            ),
            _ => debug!("Stored {} for {} ({:?})", key, from, status),
        }

        Some(Message::StoreReply {
            origin: *self.routing.local_id(),
            stored: status != StoreStatus::Stale,
        })
    }
}

/// Installs the default handler for every request type on `transport`.
pub fn register_defaults(
    transport: &Transport,
    routing: &Arc<RoutingTable>,
    storage: &Arc<ContentStore>,
    k: usize,
) {
    transport.register_handler(
        MessageKind::Connect,
        Arc::new(ConnectHandler {
            routing: routing.clone(),
        }),
    );
    transport.register_handler(
        MessageKind::FindNode,
        Arc::new(FindNodeHandler {
            routing: routing.clone(),
            k,
        }),
    );
    transport.register_handler(
        MessageKind::FindContent,
        Arc::new(FindContentHandler {
            routing: routing.clone(),
            storage: storage.clone(),
            k,
        }),
    );
    transport.register_handler(
        MessageKind::Store,
        Arc::new(StoreHandler {
            routing: routing.clone(),
            storage: storage.clone(),
        }),
    );
}

#[cfg(test)]
mod tests;
