use std::collections::VecDeque;

use crate::node::{Contact, NodeId};

/// Result of offering a contact to the routing table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The contact was already present; its last-seen time was refreshed.
    Refreshed,
    /// The bucket had room and the contact was added.
    Added,
    /// The bucket was full; the stalest member was evicted for it.
    ReplacedStale(NodeId),
    /// The bucket was full of healthy contacts; the newcomer was parked in
    /// the replacement cache.
    Cached,
}

/// Result of reporting a contact as unresponsive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnresponsiveOutcome {
    /// A cached contact took the unresponsive contact's place.
    Replaced { promoted: NodeId },
    /// No replacement was available; the contact's staleness is now this.
    Stale(u32),
    /// The contact is not in the table (or is the local node).
    Unknown,
}

/// A k-bucket. Both lists are ordered least-recently-seen first.
#[derive(Debug)]
pub(crate) struct Bucket {
    contacts: VecDeque<Contact>,
    replacement_cache: VecDeque<Contact>,
    capacity: usize,
    cache_capacity: usize,
}

impl Bucket {
    pub(crate) fn new(capacity: usize, cache_capacity: usize) -> Self {
        Self {
            contacts: VecDeque::with_capacity(capacity),
            replacement_cache: VecDeque::with_capacity(cache_capacity),
            capacity,
            cache_capacity,
        }
    }

    pub(crate) fn insert(&mut self, contact: Contact, stale_threshold: u32) -> InsertOutcome {
        if let Some(pos) = self.position(&contact.id) {
            if let Some(mut existing) = self.contacts.remove(pos) {
                existing.addr = contact.addr;
                existing.touch();
                self.contacts.push_back(existing);
            }
            return InsertOutcome::Refreshed;
        }

        if self.contacts.len() < self.capacity {
            self.remove_cached(&contact.id);
            self.contacts.push_back(contact);
            return InsertOutcome::Added;
        }

        if let Some(pos) = self.stalest(stale_threshold) {
            if let Some(evicted) = self.contacts.remove(pos) {
                self.remove_cached(&contact.id);
                self.contacts.push_back(contact);
                return InsertOutcome::ReplacedStale(evicted.id);
            }
        }

        self.cache(contact);
        InsertOutcome::Cached
    }

    pub(crate) fn mark_unresponsive(&mut self, id: &NodeId) -> UnresponsiveOutcome {
        let Some(pos) = self.position(id) else {
            return UnresponsiveOutcome::Unknown;
        };

        if let Some(replacement) = self.replacement_cache.pop_back() {
            self.contacts.remove(pos);
            let promoted = replacement.id;
            let at = self
                .contacts
                .partition_point(|c| c.last_seen <= replacement.last_seen);
            self.contacts.insert(at, replacement);
            return UnresponsiveOutcome::Replaced { promoted };
        }

        let contact = &mut self.contacts[pos];
        contact.mark_stale();
        UnresponsiveOutcome::Stale(contact.stale_count)
    }

    pub(crate) fn get(&self, id: &NodeId) -> Option<&Contact> {
        self.contacts.iter().find(|c| &c.id == id)
    }

    pub(crate) fn contacts(&self) -> impl Iterator<Item = &Contact> {
        self.contacts.iter()
    }

    pub(crate) fn cached(&self) -> impl Iterator<Item = &Contact> {
        self.replacement_cache.iter()
    }

    pub(crate) fn len(&self) -> usize {
        self.contacts.len()
    }

    fn position(&self, id: &NodeId) -> Option<usize> {
        self.contacts.iter().position(|c| &c.id == id)
    }

    /// Highest staleness above the threshold; ties go to the least recently
    /// seen contact.
    fn stalest(&self, stale_threshold: u32) -> Option<usize> {
        self.contacts
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_stale(stale_threshold))
            .max_by(|(_, a), (_, b)| {
                a.stale_count
                    .cmp(&b.stale_count)
                    .then_with(|| b.last_seen.cmp(&a.last_seen))
            })
            .map(|(pos, _)| pos)
    }

    fn cache(&mut self, contact: Contact) {
        if self.cache_capacity == 0 {
            return;
        }

        if !self.remove_cached(&contact.id) && self.replacement_cache.len() >= self.cache_capacity
        {
            self.replacement_cache.pop_front();
        }
        self.replacement_cache.push_back(contact);
    }

    fn remove_cached(&mut self, id: &NodeId) -> bool {
        match self.replacement_cache.iter().position(|c| &c.id == id) {
            Some(pos) => {
                self.replacement_cache.remove(pos);
                true
            }
            None => false,
        }
    }
}
