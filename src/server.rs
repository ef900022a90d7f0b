//! The node facade.
//!
//! [`DhtNode`] binds the transport, builds the routing table and content
//! store, installs the default request handlers and runs a background
//! refresh. Every public operation is a thin wrapper around one of the
//! [`operations`](crate::operations).

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::AbortHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::config::DhtConfig;
use crate::error::DhtError;
use crate::handlers;
use crate::lookup::{LookupOperation, LookupResult};
use crate::node::{Contact, NodeId};
use crate::operations::{
    BootstrapOperation, ContentLookupOperation, NodeContext, RefreshOperation, RefreshReport,
    StoreOperation, StoreReport,
};
use crate::routing::RoutingTable;
use crate::stats::StatsSink;
use crate::storage::{ContentStore, GetParameter, StorageEntry};
use crate::transport::Transport;

/// Configures a [`DhtNode`] before binding it.
pub struct DhtNodeBuilder {
    config: DhtConfig,
    id: Option<NodeId>,
    stats: Option<Arc<dyn StatsSink>>,
}

impl DhtNodeBuilder {
    /// Uses a fixed identifier instead of a random one.
    pub fn id(mut self, id: NodeId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn stats(mut self, stats: Arc<dyn StatsSink>) -> Self {
        self.stats = Some(stats);
        self
    }

    pub async fn bind(self, addr: SocketAddr) -> Result<DhtNode, DhtError> {
        self.config.validate()?;
        let id = self.id.unwrap_or_else(NodeId::generate);

        let transport =
            Transport::bind(addr, self.config.response_timeout, self.stats.clone()).await?;
        let local = Contact::new(id, transport.local_addr());
        let routing = Arc::new(RoutingTable::new(local, &self.config));
        let storage = Arc::new(ContentStore::new());

        handlers::register_defaults(&transport, &routing, &storage, self.config.k);

        let ctx = NodeContext {
            transport,
            routing,
            storage,
            config: Arc::new(self.config),
            stats: self.stats,
        };
        let refresh = tokio::spawn(refresh_loop(ctx.clone())).abort_handle();

        info!(
            "DHT node {} listening on {}",
            id,
            ctx.transport.local_addr()
        );
        Ok(DhtNode {
            ctx,
            refresh: Mutex::new(Some(refresh)),
        })
    }
}

/// A running Kademlia node.
///
/// # Examples
///
/// ```no_run
/// use kadnode::storage::{GetParameter, StorageEntry};
/// use kadnode::{DhtConfig, DhtNode, NodeId};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let node = DhtNode::builder(DhtConfig::default())
///     .bind("0.0.0.0:7000".parse()?)
///     .await?;
///
/// // Join through any node already in the overlay
/// node.bootstrap("192.0.2.10:7000".parse()?).await?;
///
/// let key = NodeId::from_key("motd");
/// let report = node.put(StorageEntry::new(key, "alice", "text", "hello")).await?;
/// println!("stored on {} nodes", report.stored_on());
///
/// let entry = node.get(&GetParameter::new(key)).await?;
/// assert!(entry.is_some());
///
/// node.shutdown();
/// # Ok(())
/// # }
/// ```
pub struct DhtNode {
    ctx: NodeContext,
    refresh: Mutex<Option<AbortHandle>>,
}

impl DhtNode {
    pub fn builder(config: DhtConfig) -> DhtNodeBuilder {
        DhtNodeBuilder {
            config,
            id: None,
            stats: None,
        }
    }

    /// Binds a node with the default configuration and a random id.
    pub async fn bind(addr: SocketAddr) -> Result<Self, DhtError> {
        Self::builder(DhtConfig::default()).bind(addr).await
    }

    pub fn id(&self) -> NodeId {
        self.ctx.local_id()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.ctx.transport.local_addr()
    }

    pub fn local_contact(&self) -> Contact {
        self.ctx.local_contact()
    }

    pub fn config(&self) -> &DhtConfig {
        &self.ctx.config
    }

    pub fn routing_table(&self) -> &RoutingTable {
        &self.ctx.routing
    }

    pub fn storage(&self) -> &ContentStore {
        &self.ctx.storage
    }

    pub(crate) fn context(&self) -> &NodeContext {
        &self.ctx
    }

    /// Joins the overlay through `peer`. Fails with [`DhtError::Routing`]
    /// when the peer never acknowledges.
    pub async fn bootstrap(&self, peer: SocketAddr) -> Result<Contact, DhtError> {
        BootstrapOperation::new(&self.ctx, peer).execute().await
    }

    pub async fn find_node(&self, target: NodeId) -> Result<LookupResult, DhtError> {
        LookupOperation::node(&self.ctx, target).execute().await
    }

    pub async fn put(&self, entry: StorageEntry) -> Result<StoreReport, DhtError> {
        StoreOperation::new(&self.ctx, entry).execute().await
    }

    pub async fn get(&self, query: &GetParameter) -> Result<Option<StorageEntry>, DhtError> {
        ContentLookupOperation::new(&self.ctx, query.clone())
            .execute()
            .await
    }

    /// Runs one refresh pass now, independent of the background schedule.
    pub async fn refresh(&self) -> Result<RefreshReport, DhtError> {
        RefreshOperation::new(&self.ctx).execute().await
    }

    /// Every routing-table contact, for persistence.
    pub fn contacts(&self) -> Vec<Contact> {
        let local = self.ctx.local_id();
        self.ctx
            .routing
            .contacts()
            .into_iter()
            .filter(|contact| contact.id != local)
            .collect()
    }

    pub fn restore_contacts(&self, contacts: impl IntoIterator<Item = Contact>) {
        self.ctx.routing.insert_all(contacts);
    }

    /// Every stored entry, for persistence.
    pub fn entries(&self) -> Vec<StorageEntry> {
        self.ctx.storage.entries()
    }

    pub fn restore_entries(&self, entries: impl IntoIterator<Item = StorageEntry>) {
        self.ctx.storage.insert_all(entries);
    }

    pub fn is_shut_down(&self) -> bool {
        self.ctx.transport.is_closed()
    }

    /// Stops the refresh schedule and the transport. In-flight operations
    /// fail with [`DhtError::TransportClosed`].
    pub fn shutdown(&self) {
        if let Some(refresh) = self.refresh.lock().take() {
            refresh.abort();
            info!("DHT node {} shutting down", self.ctx.local_id());
        }
        self.ctx.transport.shutdown();
    }
}

impl Drop for DhtNode {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn refresh_loop(ctx: NodeContext) {
    let mut interval = tokio::time::interval(ctx.config.refresh_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                match RefreshOperation::new(&ctx).execute().await {
                    Ok(_) => {}
                    Err(DhtError::TransportClosed) => break,
                    Err(e) => warn!("Refresh pass failed: {}", e),
                }
            }
            _ = ctx.transport.closed() => break,
        }
    }
}
