use futures::future;
use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, info};

use super::{replicate, NodeContext};
use crate::constants::{ID_BITS, REFRESH_LOOKUP_CONCURRENCY};
use crate::error::DhtError;
use crate::lookup::LookupOperation;
use crate::node::{Contact, NodeId};
use crate::storage::{GetParameter, StorageEntry};

/// What one refresh pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshReport {
    /// Distance bands looked up.
    pub buckets: usize,
    /// Entries confirmed by at least one peer.
    pub republished: usize,
    /// Local copies dropped because the local node left the closest set.
    pub dropped: usize,
}

enum Republished {
    Skipped,
    Kept,
    Dropped,
}

/// Keeps every bucket populated and content on its current closest nodes.
///
/// A pass first looks up one random id inside each distance band, then
/// resends every entry that has not been republished within the refresh
/// interval to the `k` closest contacts now known for its key.
pub struct RefreshOperation {
    ctx: NodeContext,
}

impl RefreshOperation {
    pub fn new(ctx: &NodeContext) -> Self {
        Self { ctx: ctx.clone() }
    }

    pub async fn execute(self) -> Result<RefreshReport, DhtError> {
        let mut report = RefreshReport {
            buckets: self.refresh_buckets().await?,
            ..RefreshReport::default()
        };

        let due = self
            .ctx
            .storage
            .due_for_republish(self.ctx.config.refresh_interval);
        let outcomes: Vec<Republished> = stream::iter(due)
            .map(|entry| self.republish(entry))
            .buffer_unordered(REFRESH_LOOKUP_CONCURRENCY)
            .try_collect()
            .await?;

        for outcome in outcomes {
            match outcome {
                Republished::Skipped => {}
                Republished::Kept => report.republished += 1,
                Republished::Dropped => {
                    report.republished += 1;
                    report.dropped += 1;
                }
            }
        }

        info!(
            "Refresh pass: {} bands looked up, {} entries republished, {} dropped, {} contacts known",
            report.buckets,
            report.republished,
            report.dropped,
            self.ctx.routing.len()
        );
        Ok(report)
    }

    async fn refresh_buckets(&self) -> Result<usize, DhtError> {
        let local = self.ctx.local_id();
        let targets: Vec<NodeId> = (0..ID_BITS)
            .map(|band| local.random_at_distance(band))
            .collect();

        stream::iter(targets)
            .map(|target| LookupOperation::node(&self.ctx, target).execute())
            .buffer_unordered(REFRESH_LOOKUP_CONCURRENCY)
            .try_for_each(|_| future::ready(Ok(())))
            .await?;

        Ok(ID_BITS)
    }

    async fn republish(&self, entry: StorageEntry) -> Result<Republished, DhtError> {
        let local = self.ctx.local_id();
        self.ctx.storage.mark_republished(&entry);

        let closest = self.ctx.routing.find_closest(&entry.key, self.ctx.config.k);
        let still_closest = closest.iter().any(|contact| contact.id == local);
        let targets: Vec<Contact> = closest
            .into_iter()
            .filter(|contact| contact.id != local)
            .collect();

        if targets.is_empty() {
            return Ok(Republished::Skipped);
        }

        let acks = replicate(&self.ctx, &entry, &targets).await?;
        if acks == 0 {
            debug!("Republish of {} reached no peer", entry.key);
            return Ok(Republished::Skipped);
        }
        if still_closest {
            return Ok(Republished::Kept);
        }

        // Only drop the copy that was republished, not a newer write.
        let current = self.ctx.storage.get(&GetParameter::for_entry(&entry));
        if current.is_some_and(|c| c.updated_at == entry.updated_at) {
            self.ctx.storage.remove(&entry);
            debug!(
                "Dropped local copy of {}: no longer among the {} closest",
                entry.key, self.ctx.config.k
            );
            return Ok(Republished::Dropped);
        }
        Ok(Republished::Kept)
    }
}
