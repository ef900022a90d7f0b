//! XOR-metric routing table.
//!
//! The table holds one [k-bucket](Bucket) per distance band. A contact's
//! bucket is fixed by its XOR distance from the local id, so every contact
//! lives in exactly one bucket. The local contact is pinned into bucket 0.
//!
//! Each bucket sits behind its own lock: concurrent lookups and the inbound
//! dispatch loop contend only when they touch the same band.

mod bucket;

use parking_lot::RwLock;
use tracing::debug;

use crate::config::DhtConfig;
use crate::constants::ID_BITS;
use crate::node::{Contact, NodeId};

use bucket::Bucket;
pub use bucket::{InsertOutcome, UnresponsiveOutcome};

pub struct RoutingTable {
    local: Contact,
    buckets: Vec<RwLock<Bucket>>,
    stale_threshold: u32,
}

impl RoutingTable {
    pub fn new(local: Contact, config: &DhtConfig) -> Self {
        let buckets = (0..ID_BITS)
            .map(|_| RwLock::new(Bucket::new(config.k, config.replacement_cache_size)))
            .collect();

        let table = Self {
            local,
            buckets,
            stale_threshold: config.stale_threshold,
        };
        table.buckets[0]
            .write()
            .insert(table.local.clone(), table.stale_threshold);
        table
    }

    pub fn local_id(&self) -> &NodeId {
        &self.local.id
    }

    pub fn local_contact(&self) -> &Contact {
        &self.local
    }

    fn bucket_for(&self, id: &NodeId) -> &RwLock<Bucket> {
        &self.buckets[self.local.id.bucket_index(id)]
    }

    /// Offers a freshly observed contact to its bucket.
    pub fn insert(&self, contact: Contact) -> InsertOutcome {
        let id = contact.id;
        let outcome = self
            .bucket_for(&id)
            .write()
            .insert(contact, self.stale_threshold);

        if let InsertOutcome::ReplacedStale(evicted) = outcome {
            debug!("Evicted stale contact {:?} in favour of {:?}", evicted, id);
        }
        outcome
    }

    /// Bulk insert, used to restore a persisted table.
    pub fn insert_all(&self, contacts: impl IntoIterator<Item = Contact>) {
        for contact in contacts {
            self.insert(contact);
        }
    }

    /// Reports that `id` failed to answer a request.
    pub fn mark_unresponsive(&self, id: &NodeId) -> UnresponsiveOutcome {
        if id == &self.local.id {
            return UnresponsiveOutcome::Unknown;
        }

        let outcome = self.bucket_for(id).write().mark_unresponsive(id);
        match outcome {
            UnresponsiveOutcome::Replaced { promoted } => {
                debug!("Replaced unresponsive {:?} with cached {:?}", id, promoted);
            }
            UnresponsiveOutcome::Stale(count) => {
                debug!("Contact {:?} unresponsive, staleness {}", id, count);
            }
            UnresponsiveOutcome::Unknown => {}
        }
        outcome
    }

    pub fn mark_unresponsive_all(&self, ids: &[NodeId]) {
        for id in ids {
            self.mark_unresponsive(id);
        }
    }

    /// The `count` live contacts closest to `target`, nearest first.
    pub fn find_closest(&self, target: &NodeId, count: usize) -> Vec<Contact> {
        let mut contacts: Vec<Contact> = Vec::new();

        for bucket in &self.buckets {
            contacts.extend(bucket.read().contacts().cloned());
        }

        contacts.sort_by_key(|c| c.id.distance(target));
        contacts.truncate(count);
        contacts
    }

    /// Every live contact, local node included.
    pub fn contacts(&self) -> Vec<Contact> {
        let mut contacts = Vec::new();
        for bucket in &self.buckets {
            contacts.extend(bucket.read().contacts().cloned());
        }
        contacts
    }

    pub fn get(&self, id: &NodeId) -> Option<Contact> {
        self.bucket_for(id).read().get(id).cloned()
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.bucket_for(id).read().get(id).is_some()
    }

    /// Live contacts across all buckets, local node included.
    pub fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bucket_len(&self, index: usize) -> usize {
        self.buckets.get(index).map_or(0, |b| b.read().len())
    }

    pub fn bucket_contacts(&self, index: usize) -> Vec<Contact> {
        self.buckets
            .get(index)
            .map(|b| b.read().contacts().cloned().collect())
            .unwrap_or_default()
    }

    pub fn replacement_cache(&self, index: usize) -> Vec<Contact> {
        self.buckets
            .get(index)
            .map(|b| b.read().cached().cloned().collect())
            .unwrap_or_default()
    }
}
