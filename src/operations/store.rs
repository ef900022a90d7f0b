use tracing::debug;

use super::{replicate, NodeContext};
use crate::error::DhtError;
use crate::lookup::LookupOperation;
use crate::node::Contact;
use crate::storage::{StorageEntry, StoreStatus};

/// How widely a [`StoreOperation`] placed its entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreReport {
    /// The local node is among the closest and wrote the entry.
    pub local: bool,
    /// Remote nodes that confirmed the write.
    pub remote_acks: usize,
    /// Remote nodes a store request was sent to.
    pub targets: usize,
}

impl StoreReport {
    /// Nodes known to hold the entry.
    pub fn stored_on(&self) -> usize {
        usize::from(self.local) + self.remote_acks
    }
}

/// Stores an entry on the `k` nodes closest to its key.
///
/// Partial replication is a success: the report says how many nodes
/// actually confirmed.
pub struct StoreOperation {
    ctx: NodeContext,
    entry: StorageEntry,
}

impl StoreOperation {
    pub fn new(ctx: &NodeContext, entry: StorageEntry) -> Self {
        Self {
            ctx: ctx.clone(),
            entry,
        }
    }

    pub async fn execute(self) -> Result<StoreReport, DhtError> {
        let local_id = self.ctx.local_id();
        let lookup = LookupOperation::node(&self.ctx, self.entry.key)
            .execute()
            .await?;

        let (local, remote): (Vec<Contact>, Vec<Contact>) = lookup
            .closest
            .into_iter()
            .partition(|contact| contact.id == local_id);

        let mut report = StoreReport {
            targets: remote.len(),
            ..StoreReport::default()
        };

        if !local.is_empty() {
            report.local = self.ctx.storage.store(self.entry.clone()) != StoreStatus::Stale;
        }
        report.remote_acks = replicate(&self.ctx, &self.entry, &remote).await?;

        debug!(
            "Stored {} on {} nodes ({} remote targets)",
            self.entry.key,
            report.stored_on(),
            report.targets
        );
        Ok(report)
    }
}
