//! Replication operations built on top of lookups.
//!
//! Each operation borrows the node's shared collaborators through a
//! [`NodeContext`] and runs to completion on the caller's task:
//!
//! - [`BootstrapOperation`] joins the overlay through one known peer.
//! - [`StoreOperation`] places an entry on the `k` nodes closest to its key.
//! - [`ContentLookupOperation`] fetches an entry, locally first.
//! - [`RefreshOperation`] repopulates buckets and republishes content.
//!
//! Peers that fail to answer only shrink an operation's result. Errors are
//! reserved for a closed transport and, for bootstrap, an unreachable
//! network.

mod bootstrap;
mod content;
mod refresh;
mod store;

use std::sync::Arc;

use futures::future::join_all;
use tracing::debug;

use crate::config::DhtConfig;
use crate::error::DhtError;
use crate::message::Message;
use crate::node::{Contact, NodeId};
use crate::routing::RoutingTable;
use crate::stats::StatsSink;
use crate::storage::{ContentStore, StorageEntry};
use crate::transport::{Response, Transport};

pub use bootstrap::BootstrapOperation;
pub use content::ContentLookupOperation;
pub use refresh::{RefreshOperation, RefreshReport};
pub use store::{StoreOperation, StoreReport};

/// Collaborators shared by every operation a node runs.
#[derive(Clone)]
pub struct NodeContext {
    pub transport: Transport,
    pub routing: Arc<RoutingTable>,
    pub storage: Arc<ContentStore>,
    pub config: Arc<DhtConfig>,
    pub stats: Option<Arc<dyn StatsSink>>,
}

impl NodeContext {
    pub fn local_id(&self) -> NodeId {
        *self.routing.local_id()
    }

    pub fn local_contact(&self) -> Contact {
        self.routing.local_contact().clone()
    }
}

/// Sends `entry` to every contact in `targets` and counts the ones that
/// confirmed the write.
///
/// Silent targets are reported to the routing table. A target that declines
/// because it holds a newer copy is alive but does not count.
pub(crate) async fn replicate(
    ctx: &NodeContext,
    entry: &StorageEntry,
    targets: &[Contact],
) -> Result<usize, DhtError> {
    let message = Message::Store {
        origin: ctx.local_id(),
        entry: entry.clone(),
    };

    let replies = join_all(
        targets
            .iter()
            .map(|contact| ctx.transport.request(contact.addr, &message)),
    )
    .await;

    let mut acks = 0;
    for (contact, reply) in targets.iter().zip(replies) {
        match reply {
            Ok(Response::Reply {
                from,
                message: Message::StoreReply { origin, stored },
            }) => {
                ctx.routing.insert(Contact::new(origin, from));
                if stored {
                    acks += 1;
                } else {
                    debug!("{} declined {}: holds a newer copy", from, entry.key);
                }
            }
            Ok(Response::Reply { from, message }) => {
                debug!("Unexpected {:?} from {} to a store", message.kind(), from);
            }
            Ok(Response::Timeout) => {
                debug!("Store of {} to {} timed out", entry.key, contact.addr);
                ctx.routing.mark_unresponsive(&contact.id);
            }
            Err(DhtError::TransportClosed) => return Err(DhtError::TransportClosed),
            Err(e) => debug!("Store of {} to {} failed: {}", entry.key, contact.addr, e),
        }
    }
    Ok(acks)
}
