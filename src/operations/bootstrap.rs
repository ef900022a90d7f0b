use std::net::SocketAddr;
use std::time::Instant;

use tracing::{debug, info, warn};

use super::NodeContext;
use crate::constants::MAX_CONNECT_ATTEMPTS;
use crate::error::DhtError;
use crate::lookup::LookupOperation;
use crate::message::Message;
use crate::node::Contact;
use crate::transport::Response;

/// Joins the overlay through a single known peer.
///
/// The peer gets up to [`MAX_CONNECT_ATTEMPTS`] connect requests, each
/// bounded by the response timeout. The first acknowledgement puts the peer
/// into the routing table, after which a lookup of the local id fills the
/// table with the local neighbourhood.
pub struct BootstrapOperation {
    ctx: NodeContext,
    peer: SocketAddr,
}

impl BootstrapOperation {
    pub fn new(ctx: &NodeContext, peer: SocketAddr) -> Self {
        Self {
            ctx: ctx.clone(),
            peer,
        }
    }

    /// Returns the bootstrap peer's contact once the node has joined.
    pub async fn execute(self) -> Result<Contact, DhtError> {
        let started = Instant::now();
        let connect = Message::Connect {
            origin: self.ctx.local_id(),
        };

        for attempt in 1..=MAX_CONNECT_ATTEMPTS {
            match self.ctx.transport.request(self.peer, &connect).await? {
                Response::Reply {
                    from,
                    message: Message::Acknowledge { origin },
                } => {
                    let contact = Contact::new(origin, from);
                    self.ctx.routing.insert(contact.clone());
                    info!(
                        "Connected to bootstrap peer {} ({:?}) on attempt {}",
                        from, origin, attempt
                    );

                    let lookup = LookupOperation::node(&self.ctx, self.ctx.local_id())
                        .execute()
                        .await?;

                    let elapsed = started.elapsed();
                    if let Some(stats) = &self.ctx.stats {
                        stats.bootstrap_finished(elapsed);
                    }
                    info!(
                        "Bootstrap finished in {:?}: {} peers queried, {} contacts known",
                        elapsed,
                        lookup.queried,
                        self.ctx.routing.len()
                    );
                    return Ok(contact);
                }
                Response::Reply { from, message } => {
                    debug!(
                        "Unexpected {:?} from {} during bootstrap",
                        message.kind(),
                        from
                    );
                }
                Response::Timeout => {
                    debug!(
                        "Connect attempt {}/{} to {} timed out",
                        attempt, MAX_CONNECT_ATTEMPTS, self.peer
                    );
                }
            }
        }

        warn!(
            "Bootstrap peer {} unreachable after {} attempts",
            self.peer, MAX_CONNECT_ATTEMPTS
        );
        Err(DhtError::Routing(format!(
            "no acknowledgement from {} after {} attempts",
            self.peer, MAX_CONNECT_ATTEMPTS
        )))
    }
}
