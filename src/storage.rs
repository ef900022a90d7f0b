//! Local content storage.
//!
//! The [`ContentStore`] keeps every entry this node is responsible for. Entries
//! are keyed by identifier; several entries can share a key as long as their
//! owner or content type differ. Writes follow last-write-wins on the
//! `updated_at` timestamp.
//!
//! # Examples
//!
//! ```
//! use kadnode::storage::{ContentStore, GetParameter, StorageEntry, StoreStatus};
//! use kadnode::NodeId;
//!
//! let store = ContentStore::new();
//! let key = NodeId::from_key("greeting");
//!
//! let entry = StorageEntry::new(key, "alice", "text", "hello");
//! assert_eq!(store.store(entry), StoreStatus::Inserted);
//!
//! let found = store.get(&GetParameter::new(key).with_owner("alice")).unwrap();
//! assert_eq!(&found.content[..], b"hello");
//! ```

use std::collections::HashMap;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use parking_lot::RwLock;

use crate::constants::ID_LENGTH;
use crate::error::DhtError;
use crate::node::NodeId;

/// A content record together with its identity and timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEntry {
    pub key: NodeId,
    pub owner: String,
    pub content_type: String,
    pub content: Bytes,
    /// Unix time in milliseconds.
    pub created_at: u64,
    /// Unix time in milliseconds.
    pub updated_at: u64,
}

impl StorageEntry {
    pub fn new(
        key: NodeId,
        owner: impl Into<String>,
        content_type: impl Into<String>,
        content: impl Into<Bytes>,
    ) -> Self {
        let now = unix_millis();
        Self {
            key,
            owner: owner.into(),
            content_type: content_type.into(),
            content: content.into(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns a copy carrying new content and a fresh `updated_at`.
    pub fn with_content(&self, content: impl Into<Bytes>) -> Self {
        Self {
            content: content.into(),
            updated_at: unix_millis().max(self.updated_at + 1),
            ..self.clone()
        }
    }

    pub fn matches(&self, query: &GetParameter) -> bool {
        self.key == query.key
            && query.owner.as_ref().map_or(true, |o| o == &self.owner)
            && query
                .content_type
                .as_ref()
                .map_or(true, |t| t == &self.content_type)
    }

    fn same_slot(&self, other: &StorageEntry) -> bool {
        self.key == other.key
            && self.owner == other.owner
            && self.content_type == other.content_type
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(self.key.as_bytes());
        put_str(buf, &self.owner);
        put_str(buf, &self.content_type);
        buf.put_u64(self.created_at);
        buf.put_u64(self.updated_at);
        buf.put_u32(self.content.len() as u32);
        buf.put_slice(&self.content);
    }

    pub(crate) fn decode(buf: &mut Bytes) -> Result<Self, DhtError> {
        let key = get_id(buf)?;
        let owner = get_str(buf)?;
        let content_type = get_str(buf)?;

        if buf.remaining() < 8 + 8 + 4 {
            return Err(DhtError::InvalidMessage("storage entry too short".into()));
        }
        let created_at = buf.get_u64();
        let updated_at = buf.get_u64();
        let len = buf.get_u32() as usize;
        if buf.remaining() < len {
            return Err(DhtError::InvalidMessage("content truncated".into()));
        }
        let content = buf.split_to(len);

        Ok(Self {
            key,
            owner,
            content_type,
            content,
            created_at,
            updated_at,
        })
    }
}

/// Selects entries under a key, optionally narrowed by owner and type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetParameter {
    pub key: NodeId,
    pub owner: Option<String>,
    pub content_type: Option<String>,
}

impl GetParameter {
    pub fn new(key: NodeId) -> Self {
        Self {
            key,
            owner: None,
            content_type: None,
        }
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// The exact (key, owner, type) slot of `entry`.
    pub fn for_entry(entry: &StorageEntry) -> Self {
        Self::new(entry.key)
            .with_owner(entry.owner.clone())
            .with_content_type(entry.content_type.clone())
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(self.key.as_bytes());
        put_opt_str(buf, self.owner.as_deref());
        put_opt_str(buf, self.content_type.as_deref());
    }

    pub(crate) fn decode(buf: &mut Bytes) -> Result<Self, DhtError> {
        Ok(Self {
            key: get_id(buf)?,
            owner: get_opt_str(buf)?,
            content_type: get_opt_str(buf)?,
        })
    }
}

/// Result of writing an entry into the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreStatus {
    /// No entry occupied the slot.
    Inserted,
    /// An older or equally old entry was replaced.
    Updated,
    /// The stored entry is newer; nothing changed.
    Stale,
}

#[derive(Debug)]
struct Stored {
    entry: StorageEntry,
    last_republished: Instant,
}

#[derive(Debug, Default)]
pub struct ContentStore {
    entries: RwLock<HashMap<NodeId, Vec<Stored>>>,
}

impl ContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, entry: StorageEntry) -> StoreStatus {
        let mut entries = self.entries.write();
        let slot = entries.entry(entry.key).or_default();

        match slot.iter_mut().find(|s| s.entry.same_slot(&entry)) {
            Some(existing) if existing.entry.updated_at > entry.updated_at => StoreStatus::Stale,
            Some(existing) => {
                existing.entry = entry;
                existing.last_republished = Instant::now();
                StoreStatus::Updated
            }
            None => {
                slot.push(Stored {
                    entry,
                    last_republished: Instant::now(),
                });
                StoreStatus::Inserted
            }
        }
    }

    /// The most recently updated entry matching `query`.
    pub fn get(&self, query: &GetParameter) -> Option<StorageEntry> {
        self.entries
            .read()
            .get(&query.key)?
            .iter()
            .filter(|s| s.entry.matches(query))
            .max_by_key(|s| s.entry.updated_at)
            .map(|s| s.entry.clone())
    }

    pub fn contains(&self, query: &GetParameter) -> bool {
        self.entries
            .read()
            .get(&query.key)
            .is_some_and(|slot| slot.iter().any(|s| s.entry.matches(query)))
    }

    /// Removes the entry occupying `entry`'s slot.
    pub fn remove(&self, entry: &StorageEntry) -> Option<StorageEntry> {
        let mut entries = self.entries.write();
        let slot = entries.get_mut(&entry.key)?;
        let pos = slot.iter().position(|s| s.entry.same_slot(entry))?;
        let removed = slot.remove(pos);
        if slot.is_empty() {
            entries.remove(&entry.key);
        }
        Some(removed.entry)
    }

    pub fn len(&self) -> usize {
        self.entries.read().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Snapshot of every entry, for persistence.
    pub fn entries(&self) -> Vec<StorageEntry> {
        self.entries
            .read()
            .values()
            .flat_map(|slot| slot.iter().map(|s| s.entry.clone()))
            .collect()
    }

    /// Bulk insert, for restoring a persisted store.
    pub fn insert_all(&self, entries: impl IntoIterator<Item = StorageEntry>) {
        for entry in entries {
            self.store(entry);
        }
    }

    /// Entries not republished within `interval`.
    pub fn due_for_republish(&self, interval: Duration) -> Vec<StorageEntry> {
        self.entries
            .read()
            .values()
            .flat_map(|slot| slot.iter())
            .filter(|s| s.last_republished.elapsed() >= interval)
            .map(|s| s.entry.clone())
            .collect()
    }

    pub fn mark_republished(&self, entry: &StorageEntry) {
        let mut entries = self.entries.write();
        if let Some(stored) = entries
            .get_mut(&entry.key)
            .and_then(|slot| slot.iter_mut().find(|s| s.entry.same_slot(entry)))
        {
            stored.last_republished = Instant::now();
        }
    }
}

pub(crate) fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn get_id(buf: &mut Bytes) -> Result<NodeId, DhtError> {
    if buf.remaining() < ID_LENGTH {
        return Err(DhtError::InvalidMessage("key truncated".into()));
    }
    NodeId::from_bytes(&buf.split_to(ID_LENGTH))
}

fn put_str(buf: &mut BytesMut, s: &str) {
    buf.put_u16(s.len() as u16);
    buf.put_slice(s.as_bytes());
}

fn get_str(buf: &mut Bytes) -> Result<String, DhtError> {
    if buf.remaining() < 2 {
        return Err(DhtError::InvalidMessage("string length missing".into()));
    }
    let len = buf.get_u16() as usize;
    if buf.remaining() < len {
        return Err(DhtError::InvalidMessage("string truncated".into()));
    }
    String::from_utf8(buf.split_to(len).to_vec())
        .map_err(|_| DhtError::InvalidMessage("string is not utf-8".into()))
}

fn put_opt_str(buf: &mut BytesMut, s: Option<&str>) {
    match s {
        Some(s) => {
            buf.put_u8(1);
            put_str(buf, s);
        }
        None => buf.put_u8(0),
    }
}

fn get_opt_str(buf: &mut Bytes) -> Result<Option<String>, DhtError> {
    if buf.remaining() < 1 {
        return Err(DhtError::InvalidMessage("option flag missing".into()));
    }
    match buf.get_u8() {
        0 => Ok(None),
        _ => get_str(buf).map(Some),
    }
}

#[cfg(test)]
mod tests;
