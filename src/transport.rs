//! Request/response correlation over UDP.
//!
//! The [`Transport`] owns the node's socket. Outbound requests get a fresh
//! correlation id, a registered [`ResponseHandler`] and a deadline. A single
//! dispatch task drains the socket: a datagram whose correlation id matches a
//! pending request completes that request, anything else is routed to the
//! [`RequestHandler`] registered for its message type.
//!
//! A pending request finishes exactly once. The reply path and the deadline
//! task both try to remove the entry from the pending table under its lock;
//! whichever gets it invokes the handler, the other finds nothing.
//!
//! # Examples
//!
//! ```no_run
//! use kadnode::message::Message;
//! use kadnode::transport::{Response, Transport};
//! use kadnode::NodeId;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = Transport::bind("127.0.0.1:0".parse()?, Duration::from_secs(2), None).await?;
//!
//! let peer = "127.0.0.1:4000".parse()?;
//! let origin = NodeId::generate();
//! match transport.request(peer, &Message::Connect { origin }).await? {
//!     Response::Reply { message, .. } => println!("peer answered {:?}", message.kind()),
//!     Response::Timeout => println!("no answer"),
//! }
//!
//! transport.shutdown();
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::net::UdpSocket;
use tokio::sync::{oneshot, watch};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::constants::MAX_DATAGRAM_SIZE;
use crate::error::DhtError;
use crate::message::{decode_datagram, encode_datagram, CorrelationId, Message, MessageKind};
use crate::stats::StatsSink;

/// Outcome of a request sent with [`Transport::request`].
#[derive(Debug)]
pub enum Response {
    Reply { from: SocketAddr, message: Message },
    Timeout,
}

/// Receives the outcome of one outbound request.
///
/// Both methods consume the handler, so at most one of them can ever run.
/// On shutdown the handler is dropped without either being called.
pub trait ResponseHandler: Send + 'static {
    fn on_reply(self: Box<Self>, from: SocketAddr, message: Message);

    fn on_timeout(self: Box<Self>, correlation_id: CorrelationId);
}

impl ResponseHandler for oneshot::Sender<Response> {
    fn on_reply(self: Box<Self>, from: SocketAddr, message: Message) {
        let _ = (*self).send(Response::Reply { from, message });
    }

    fn on_timeout(self: Box<Self>, _correlation_id: CorrelationId) {
        let _ = (*self).send(Response::Timeout);
    }
}

/// Default behaviour for an unsolicited message of one type.
///
/// Runs on the dispatch task and must not block. A returned message is sent
/// back to `from` under the request's correlation id.
pub trait RequestHandler: Send + Sync {
    fn handle(&self, from: SocketAddr, message: Message) -> Option<Message>;
}

struct PendingRequest {
    handler: Box<dyn ResponseHandler>,
    deadline: AbortHandle,
}

struct Shared {
    /// Taken by shutdown so the port is released at once.
    socket: Mutex<Option<Arc<UdpSocket>>>,
    pending: Mutex<HashMap<CorrelationId, PendingRequest>>,
    handlers: RwLock<HashMap<MessageKind, Arc<dyn RequestHandler>>>,
    dispatch: Mutex<Option<AbortHandle>>,
    closed: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    response_timeout: Duration,
    stats: Option<Arc<dyn StatsSink>>,
}

impl Shared {
    /// Registers `handler` under a fresh correlation id and arms its deadline.
    fn register(
        self: &Arc<Self>,
        handler: Box<dyn ResponseHandler>,
    ) -> Result<CorrelationId, DhtError> {
        let mut pending = self.pending.lock();
        if self.closed.load(Ordering::SeqCst) {
            return Err(DhtError::TransportClosed);
        }

        let mut correlation_id: CorrelationId = rand::random();
        while pending.contains_key(&correlation_id) {
            correlation_id = rand::random();
        }

        let shared = Arc::downgrade(self);
        let timeout = self.response_timeout;
        let deadline = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(shared) = shared.upgrade() {
                shared.expire(correlation_id);
            }
        })
        .abort_handle();

        pending.insert(correlation_id, PendingRequest { handler, deadline });
        Ok(correlation_id)
    }

    /// Hands a reply to its pending request. Gives the message back when no
    /// request is waiting for `correlation_id`.
    fn complete(
        &self,
        correlation_id: CorrelationId,
        from: SocketAddr,
        message: Message,
    ) -> Result<(), Message> {
        let entry = self.pending.lock().remove(&correlation_id);
        match entry {
            Some(request) => {
                request.deadline.abort();
                request.handler.on_reply(from, message);
                Ok(())
            }
            None => Err(message),
        }
    }

    /// Fires the timeout callback if the request is still pending.
    fn expire(&self, correlation_id: CorrelationId) -> bool {
        let entry = self.pending.lock().remove(&correlation_id);
        match entry {
            Some(request) => {
                request.handler.on_timeout(correlation_id);
                true
            }
            None => false,
        }
    }

    fn socket(&self) -> Result<Arc<UdpSocket>, DhtError> {
        self.socket.lock().clone().ok_or(DhtError::TransportClosed)
    }

    /// Drops a pending request without invoking its handler.
    fn cancel(&self, correlation_id: CorrelationId) {
        if let Some(request) = self.pending.lock().remove(&correlation_id) {
            request.deadline.abort();
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Some(dispatch) = self.dispatch.get_mut().take() {
            dispatch.abort();
        }
    }
}

/// The node's messaging layer. Cheap to clone; clones share one socket.
///
/// The dispatch task only holds a weak reference, so dropping the last
/// clone stops it and releases the port even without [`shutdown`].
///
/// [`shutdown`]: Transport::shutdown
#[derive(Clone)]
pub struct Transport {
    local_addr: SocketAddr,
    shared: Arc<Shared>,
}

impl Transport {
    /// Binds the socket and starts the dispatch task.
    pub async fn bind(
        addr: SocketAddr,
        response_timeout: Duration,
        stats: Option<Arc<dyn StatsSink>>,
    ) -> Result<Self, DhtError> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        let local_addr = socket.local_addr()?;
        let (shutdown_tx, _) = watch::channel(false);

        let transport = Self {
            local_addr,
            shared: Arc::new(Shared {
                socket: Mutex::new(Some(socket.clone())),
                pending: Mutex::new(HashMap::new()),
                handlers: RwLock::new(HashMap::new()),
                dispatch: Mutex::new(None),
                closed: AtomicBool::new(false),
                shutdown_tx,
                response_timeout,
                stats,
            }),
        };

        let dispatch = tokio::spawn(dispatch_loop(
            Arc::downgrade(&transport.shared),
            socket,
            local_addr,
        ))
        .abort_handle();
        *transport.shared.dispatch.lock() = Some(dispatch);

        info!("Transport bound to {}", local_addr);
        Ok(transport)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn response_timeout(&self) -> Duration {
        self.shared.response_timeout
    }

    /// Installs the default handler for unsolicited messages of `kind`.
    pub fn register_handler(&self, kind: MessageKind, handler: Arc<dyn RequestHandler>) {
        self.shared.handlers.write().insert(kind, handler);
    }

    /// Sends `message` to `to`.
    ///
    /// With a handler, the request is registered before the datagram leaves
    /// and the handler later receives either the reply or a timeout. Returns
    /// immediately in both cases.
    pub async fn send(
        &self,
        to: SocketAddr,
        message: &Message,
        handler: Option<Box<dyn ResponseHandler>>,
    ) -> Result<CorrelationId, DhtError> {
        if self.is_closed() {
            return Err(DhtError::TransportClosed);
        }

        let Some(handler) = handler else {
            let correlation_id = rand::random();
            self.transmit(to, correlation_id, message).await?;
            return Ok(correlation_id);
        };

        let correlation_id = self.shared.register(handler)?;
        if let Err(e) = self.transmit(to, correlation_id, message).await {
            self.shared.cancel(correlation_id);
            return Err(e);
        }
        Ok(correlation_id)
    }

    /// Sends `message` and waits for its reply or timeout.
    pub async fn request(&self, to: SocketAddr, message: &Message) -> Result<Response, DhtError> {
        let (tx, rx) = oneshot::channel();
        self.send(to, message, Some(Box::new(tx))).await?;
        rx.await.map_err(|_| DhtError::TransportClosed)
    }

    /// Answers a request using its existing correlation id.
    pub async fn reply(
        &self,
        to: SocketAddr,
        message: &Message,
        correlation_id: CorrelationId,
    ) -> Result<(), DhtError> {
        if self.is_closed() {
            return Err(DhtError::TransportClosed);
        }
        self.transmit(to, correlation_id, message).await
    }

    async fn transmit(
        &self,
        to: SocketAddr,
        correlation_id: CorrelationId,
        message: &Message,
    ) -> Result<(), DhtError> {
        let data = encode_datagram(correlation_id, message)?;
        let socket = self.shared.socket()?;
        let sent = socket.send_to(&data, to).await?;

        if let Some(stats) = &self.shared.stats {
            stats.bytes_sent(sent);
        }
        Ok(())
    }

    pub fn pending_requests(&self) -> usize {
        self.shared.pending.lock().len()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Resolves once [`shutdown`](Self::shutdown) has been called.
    pub async fn closed(&self) {
        let mut rx = self.shared.shutdown_tx.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Stops the dispatch task, closes the socket and drops every pending
    /// request without calling its handler. Later sends fail with
    /// `TransportClosed`.
    pub fn shutdown(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(dispatch) = self.shared.dispatch.lock().take() {
            dispatch.abort();
        }
        self.shared.socket.lock().take();

        let dropped: Vec<PendingRequest> = self
            .shared
            .pending
            .lock()
            .drain()
            .map(|(_, request)| request)
            .collect();
        for request in &dropped {
            request.deadline.abort();
        }

        self.shared.shutdown_tx.send_replace(true);
        info!(
            "Transport on {} shut down, {} pending requests dropped",
            self.local_addr,
            dropped.len()
        );
    }

    async fn dispatch_unsolicited(
        &self,
        from: SocketAddr,
        correlation_id: CorrelationId,
        message: Message,
    ) {
        let kind = message.kind();
        let handler = self.shared.handlers.read().get(&kind).cloned();

        let Some(handler) = handler else {
            debug!("No handler for unsolicited {:?} from {}", kind, from);
            return;
        };

        if let Some(reply) = handler.handle(from, message) {
            if let Err(e) = self.reply(from, &reply, correlation_id).await {
                debug!("Failed to answer {:?} from {}: {}", kind, from, e);
            }
        }
    }
}

async fn dispatch_loop(shared: Weak<Shared>, socket: Arc<UdpSocket>, local_addr: SocketAddr) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE + 1];

    loop {
        let received = socket.recv_from(&mut buf).await;
        let Some(shared) = shared.upgrade() else {
            break;
        };
        let transport = Transport { local_addr, shared };

        let (n, from) = match received {
            Ok(received) => received,
            Err(e) => {
                if transport.is_closed() {
                    break;
                }
                debug!("Receive error on {}: {}", local_addr, e);
                continue;
            }
        };

        if let Some(stats) = &transport.shared.stats {
            stats.bytes_received(n);
        }

        let (correlation_id, message) = match decode_datagram(Bytes::copy_from_slice(&buf[..n])) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!("Dropping malformed datagram from {}: {}", from, e);
                continue;
            }
        };

        if let Err(message) = transport.shared.complete(correlation_id, from, message) {
            transport
                .dispatch_unsolicited(from, correlation_id, message)
                .await;
        }
    }
}
