//! Iterative closest-node search.
//!
//! A [`LookupOperation`] walks the overlay towards a target id. It keeps a
//! private table of every contact it has heard of, ordered by distance to
//! the target, and repeatedly asks the closest contacts it has not asked yet
//! for contacts closer still. It stops once the `k` closest non-failed
//! contacts have all answered and nothing is in flight, or when the
//! operation timeout elapses.
//!
//! Replies and timeouts arrive from the transport's dispatch task through an
//! unbounded channel, so the lookup itself runs on the caller's task and
//! needs no locking of its own.
//!
//! Every contact that fails to answer is reported to the routing table as
//! soon as its request fails, whether or not the lookup is still running.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::debug;

use crate::error::DhtError;
use crate::message::{CorrelationId, Message};
use crate::node::{Contact, Distance, NodeId};
use crate::operations::NodeContext;
use crate::routing::RoutingTable;
use crate::storage::{GetParameter, StorageEntry};
use crate::transport::ResponseHandler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueryState {
    Unasked,
    Awaiting,
    Asked,
    Failed,
}

#[derive(Debug)]
struct Candidate {
    contact: Contact,
    state: QueryState,
}

#[derive(Debug)]
enum LookupEvent {
    Reply {
        key: Distance,
        from: SocketAddr,
        message: Message,
    },
    Timeout {
        key: Distance,
    },
}

/// Forwards one request's outcome into the lookup's event channel.
///
/// A timeout is reported to the routing table here rather than by the
/// lookup, so it still counts when it fires after the lookup has returned.
struct LookupResponder {
    key: Distance,
    peer: NodeId,
    routing: Arc<RoutingTable>,
    events: mpsc::UnboundedSender<LookupEvent>,
}

impl ResponseHandler for LookupResponder {
    fn on_reply(self: Box<Self>, from: SocketAddr, message: Message) {
        let _ = self.events.send(LookupEvent::Reply {
            key: self.key,
            from,
            message,
        });
    }

    fn on_timeout(self: Box<Self>, _correlation_id: CorrelationId) {
        self.routing.mark_unresponsive(&self.peer);
        let _ = self.events.send(LookupEvent::Timeout { key: self.key });
    }
}

/// Outcome of a finished lookup.
#[derive(Debug, Clone)]
pub struct LookupResult {
    /// Up to `k` contacts that answered, nearest first. May include the
    /// local node.
    pub closest: Vec<Contact>,
    /// Contacts that timed out during this lookup.
    pub failed: Vec<NodeId>,
    /// Set by a content lookup that found a match.
    pub content: Option<StorageEntry>,
    /// Remote contacts that answered.
    pub queried: usize,
    pub elapsed: Duration,
}

pub struct LookupOperation {
    ctx: NodeContext,
    target: NodeId,
    query: Option<GetParameter>,
    request: Message,
    candidates: BTreeMap<Distance, Candidate>,
}

impl LookupOperation {
    /// A lookup for the contacts closest to `target`.
    pub fn node(ctx: &NodeContext, target: NodeId) -> Self {
        let request = Message::FindNode {
            origin: ctx.local_id(),
            target,
        };
        Self::new(ctx, target, None, request)
    }

    /// A lookup that also stops at the first peer holding content matching
    /// `query`.
    pub fn content(ctx: &NodeContext, query: GetParameter) -> Self {
        let request = Message::FindContent {
            origin: ctx.local_id(),
            query: query.clone(),
        };
        Self::new(ctx, query.key, Some(query), request)
    }

    fn new(
        ctx: &NodeContext,
        target: NodeId,
        query: Option<GetParameter>,
        request: Message,
    ) -> Self {
        let mut lookup = Self {
            ctx: ctx.clone(),
            target,
            query,
            request,
            candidates: BTreeMap::new(),
        };
        lookup.seed();
        lookup
    }

    fn seed(&mut self) {
        let local = self.ctx.local_contact();
        self.track(local.clone(), QueryState::Asked);

        for contact in self.ctx.routing.contacts() {
            if contact.id != local.id {
                self.track(contact, QueryState::Unasked);
            }
        }
    }

    /// Adds `contact` unless it is already tracked.
    fn track(&mut self, contact: Contact, state: QueryState) {
        self.candidates
            .entry(contact.id.distance(&self.target))
            .or_insert(Candidate { contact, state });
    }

    /// The `k` closest contacts still in the running.
    fn window(&self) -> impl Iterator<Item = (&Distance, &Candidate)> {
        self.candidates
            .iter()
            .filter(|(_, c)| c.state != QueryState::Failed)
            .take(self.ctx.config.k)
    }

    /// Up to `budget` unasked contacts from the window, nearest first.
    fn next_batch(&self, budget: usize) -> Vec<(Distance, Contact)> {
        self.window()
            .filter(|(_, c)| c.state == QueryState::Unasked)
            .take(budget)
            .map(|(key, c)| (*key, c.contact.clone()))
            .collect()
    }

    fn set_state(&mut self, key: &Distance, state: QueryState) {
        if let Some(candidate) = self.candidates.get_mut(key) {
            candidate.state = state;
        }
    }

    /// Fills free request slots. Returns how many requests went out.
    async fn send_batch(
        &mut self,
        in_flight: usize,
        events: &mpsc::UnboundedSender<LookupEvent>,
    ) -> Result<usize, DhtError> {
        let budget = self.ctx.config.max_concurrency.saturating_sub(in_flight);
        let mut sent = 0;

        for (key, contact) in self.next_batch(budget) {
            let responder = Box::new(LookupResponder {
                key,
                peer: contact.id,
                routing: self.ctx.routing.clone(),
                events: events.clone(),
            });

            match self
                .ctx
                .transport
                .send(contact.addr, &self.request, Some(responder))
                .await
            {
                Ok(_) => {
                    self.set_state(&key, QueryState::Awaiting);
                    sent += 1;
                }
                Err(DhtError::TransportClosed) => return Err(DhtError::TransportClosed),
                Err(e) => {
                    debug!("Lookup request to {} failed: {}", contact.addr, e);
                    self.ctx.routing.mark_unresponsive(&contact.id);
                    self.set_state(&key, QueryState::Failed);
                }
            }
        }
        Ok(sent)
    }

    /// Applies one reply or timeout. Returns matching content if the reply
    /// carried it.
    fn apply(&mut self, event: LookupEvent) -> Option<StorageEntry> {
        match event {
            LookupEvent::Timeout { key } => {
                self.set_state(&key, QueryState::Failed);
                None
            }
            LookupEvent::Reply { key, from, message } => {
                let expected = self.candidates.get(&key)?.contact.id;
                if message.origin() != expected {
                    debug!(
                        "Lookup reply from {} claims id {:?}, expected {:?}",
                        from,
                        message.origin(),
                        expected
                    );
                    self.ctx.routing.mark_unresponsive(&expected);
                    self.set_state(&key, QueryState::Failed);
                    return None;
                }

                self.ctx.routing.insert(Contact::new(expected, from));
                self.set_state(&key, QueryState::Asked);

                match message {
                    Message::NodeReply { contacts, .. } => {
                        for contact in contacts {
                            self.track(contact, QueryState::Unasked);
                        }
                        None
                    }
                    Message::Content { entry, .. } => {
                        let wanted = self.query.as_ref().is_some_and(|q| entry.matches(q));
                        wanted.then_some(entry)
                    }
                    other => {
                        debug!("Unexpected {:?} in lookup reply from {}", other.kind(), from);
                        None
                    }
                }
            }
        }
    }

    /// Runs the lookup to convergence or until the operation timeout.
    ///
    /// Running out of time is not an error; whatever has been learnt so far
    /// is returned. Only a transport shutdown aborts the lookup.
    pub async fn execute(mut self) -> Result<LookupResult, DhtError> {
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + self.ctx.config.operation_timeout;
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();

        let transport = self.ctx.transport.clone();
        let mut in_flight = 0usize;
        let mut content = None;

        loop {
            in_flight += self.send_batch(in_flight, &events_tx).await?;

            if in_flight == 0 && self.next_batch(1).is_empty() {
                break;
            }

            tokio::select! {
                event = events_rx.recv() => {
                    let Some(event) = event else { break };
                    in_flight = in_flight.saturating_sub(1);
                    if let Some(entry) = self.apply(event) {
                        content = Some(entry);
                        break;
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    debug!(
                        "Lookup for {:?} hit operation timeout with {} in flight",
                        self.target, in_flight
                    );
                    break;
                }
                _ = transport.closed() => {
                    return Err(DhtError::TransportClosed);
                }
            }
        }

        Ok(self.finish(started, content))
    }

    fn finish(self, started: Instant, content: Option<StorageEntry>) -> LookupResult {
        let local = self.ctx.local_id();
        let k = self.ctx.config.k;

        let failed: Vec<NodeId> = self
            .candidates
            .values()
            .filter(|c| c.state == QueryState::Failed)
            .map(|c| c.contact.id)
            .collect();

        let asked = self
            .candidates
            .values()
            .filter(|c| c.state == QueryState::Asked);
        let queried = asked.clone().filter(|c| c.contact.id != local).count();
        let closest: Vec<Contact> = asked.take(k).map(|c| c.contact.clone()).collect();

        let elapsed = started.elapsed();
        if let Some(stats) = &self.ctx.stats {
            match &self.query {
                Some(_) => stats.content_lookup_finished(elapsed, queried, content.is_some()),
                None => stats.lookup_finished(elapsed, queried),
            }
        }

        debug!(
            "Lookup for {:?} finished in {:?}: {} queried, {} failed, content {}",
            self.target,
            elapsed,
            queried,
            failed.len(),
            if content.is_some() { "found" } else { "absent" }
        );

        LookupResult {
            closest,
            failed,
            content,
            queried,
            elapsed,
        }
    }
}

#[cfg(test)]
mod tests;
