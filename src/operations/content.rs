use tracing::debug;

use super::NodeContext;
use crate::error::DhtError;
use crate::lookup::LookupOperation;
use crate::storage::{GetParameter, StorageEntry};

/// Finds an entry, answering from the local store when it can.
pub struct ContentLookupOperation {
    ctx: NodeContext,
    query: GetParameter,
}

impl ContentLookupOperation {
    pub fn new(ctx: &NodeContext, query: GetParameter) -> Self {
        Self {
            ctx: ctx.clone(),
            query,
        }
    }

    /// `None` when no reachable node holds a match.
    pub async fn execute(self) -> Result<Option<StorageEntry>, DhtError> {
        if let Some(entry) = self.ctx.storage.get(&self.query) {
            debug!("Content {} served from local store", self.query.key);
            return Ok(Some(entry));
        }

        let result = LookupOperation::content(&self.ctx, self.query)
            .execute()
            .await?;
        Ok(result.content)
    }
}
