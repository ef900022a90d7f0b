//! kadnode - A Kademlia distributed hash table node
//!
//! Nodes and content share one 160-bit identifier space. Each node keeps a
//! routing table of k-buckets ordered by XOR distance, finds the nodes
//! closest to any id with an iterative lookup, and replicates content onto
//! the nodes closest to its key. All traffic is request/response over UDP.
//!
//! # Modules
//!
//! - [`node`] - Identifiers, the XOR metric and contacts
//! - [`routing`] - k-buckets with replacement caches and the routing table
//! - [`message`] - Protocol messages and the datagram codec
//! - [`transport`] - UDP request/response correlation and dispatch
//! - [`handlers`] - Default answers to unsolicited requests
//! - [`lookup`] - Iterative closest-node and content lookups
//! - [`operations`] - Bootstrap, store, content lookup and refresh
//! - [`storage`] - Local content store
//! - [`server`] - The [`DhtNode`] facade
//! - [`stats`] - Optional statistics sink

pub mod config;
pub mod constants;
pub mod error;
pub mod handlers;
pub mod lookup;
pub mod message;
pub mod node;
pub mod operations;
pub mod routing;
pub mod server;
pub mod stats;
pub mod storage;
pub mod transport;

#[cfg(test)]
mod testing;

pub use config::DhtConfig;
pub use error::DhtError;
pub use lookup::{LookupOperation, LookupResult};
pub use message::{CorrelationId, Message, MessageKind};
pub use node::{Contact, Distance, NodeId};
pub use operations::{RefreshReport, StoreReport};
pub use routing::{InsertOutcome, RoutingTable, UnresponsiveOutcome};
pub use server::{DhtNode, DhtNodeBuilder};
pub use stats::{NodeStats, StatsSink, StatsSnapshot};
pub use storage::{ContentStore, GetParameter, StorageEntry, StoreStatus};
pub use transport::{RequestHandler, Response, ResponseHandler, Transport};
