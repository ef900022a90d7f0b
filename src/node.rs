//! Node identifiers, the XOR metric and peer contacts.

use std::cmp::Ordering;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Instant;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use rand::Rng as _;
use sha1::{Digest, Sha1};

use crate::constants::{ID_BITS, ID_LENGTH};
use crate::error::DhtError;

const ADDR_V4: u8 = 4;
const ADDR_V6: u8 = 6;

/// A 160-bit identifier naming a node or a content key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub [u8; ID_LENGTH]);

impl NodeId {
    pub fn generate() -> Self {
        let mut id = [0u8; ID_LENGTH];
        rand::rng().fill(&mut id);
        Self(id)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DhtError> {
        if bytes.len() != ID_LENGTH {
            return Err(DhtError::InvalidNodeId);
        }
        let mut id = [0u8; ID_LENGTH];
        id.copy_from_slice(bytes);
        Ok(Self(id))
    }

    /// Derives a key from arbitrary data by hashing it with SHA-1.
    pub fn from_key(data: impl AsRef<[u8]>) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(data.as_ref());
        let digest = hasher.finalize();

        let mut id = [0u8; ID_LENGTH];
        id.copy_from_slice(&digest);
        Self(id)
    }

    pub fn as_bytes(&self) -> &[u8; ID_LENGTH] {
        &self.0
    }

    pub fn distance(&self, other: &NodeId) -> Distance {
        let mut dist = [0u8; ID_LENGTH];
        for (i, d) in dist.iter_mut().enumerate() {
            *d = self.0[i] ^ other.0[i];
        }
        Distance(dist)
    }

    /// Number of bits after the shared prefix: 0 for identical ids, 160 when
    /// the most significant bit differs.
    pub fn log_distance(&self, other: &NodeId) -> usize {
        ID_BITS - self.distance(other).leading_zeros()
    }

    /// Routing bucket for `other`. The local id itself lands in bucket 0.
    pub fn bucket_index(&self, other: &NodeId) -> usize {
        self.log_distance(other).saturating_sub(1)
    }

    /// Returns a random id that falls into bucket `bucket` relative to `self`.
    ///
    /// Bits above the bucket's band are copied from `self`, the band's own bit
    /// is flipped and every bit below it is random.
    pub fn random_at_distance(&self, bucket: usize) -> NodeId {
        let bucket = bucket.min(ID_BITS - 1);
        let mut mask = [0u8; ID_LENGTH];

        let byte_idx = ID_LENGTH - 1 - bucket / 8;
        let bit = (bucket % 8) as u32;

        let random_low: u8 = rand::random();
        mask[byte_idx] = (1u8 << bit) | (random_low & ((1u8 << bit) - 1));
        for byte in mask.iter_mut().skip(byte_idx + 1) {
            *byte = rand::random();
        }

        let mut id = self.0;
        for (b, m) in id.iter_mut().zip(mask.iter()) {
            *b ^= m;
        }
        NodeId(id)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({:02x}{:02x}{:02x}..)", self.0[0], self.0[1], self.0[2])
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// XOR distance between two identifiers, ordered as an unsigned big-endian
/// integer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Distance(pub [u8; ID_LENGTH]);

impl Distance {
    pub fn leading_zeros(&self) -> usize {
        for (i, &byte) in self.0.iter().enumerate() {
            if byte != 0 {
                return i * 8 + byte.leading_zeros() as usize;
            }
        }
        ID_BITS
    }
}

impl Ord for Distance {
    fn cmp(&self, other: &Self) -> Ordering {
        // Byte arrays compare lexicographically, which is MSB-first for
        // big-endian unsigned integers.
        self.0.cmp(&other.0)
    }
}

impl PartialOrd for Distance {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A network-addressable peer plus liveness bookkeeping.
#[derive(Debug, Clone)]
pub struct Contact {
    pub id: NodeId,
    pub addr: SocketAddr,
    pub last_seen: Instant,
    pub stale_count: u32,
}

impl Contact {
    pub fn new(id: NodeId, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            last_seen: Instant::now(),
            stale_count: 0,
        }
    }

    /// Records a successful round trip.
    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
        self.stale_count = 0;
    }

    /// Records an unanswered request.
    pub fn mark_stale(&mut self) {
        self.stale_count = self.stale_count.saturating_add(1);
    }

    pub fn is_stale(&self, threshold: u32) -> bool {
        self.stale_count > threshold
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(self.id.as_bytes());
        match self.addr.ip() {
            IpAddr::V4(ip) => {
                buf.put_u8(ADDR_V4);
                buf.put_slice(&ip.octets());
            }
            IpAddr::V6(ip) => {
                buf.put_u8(ADDR_V6);
                buf.put_slice(&ip.octets());
            }
        }
        buf.put_u16(self.addr.port());
    }

    pub(crate) fn decode(buf: &mut Bytes) -> Result<Self, DhtError> {
        if buf.remaining() < ID_LENGTH + 1 {
            return Err(DhtError::InvalidMessage("contact too short".into()));
        }
        let id = NodeId::from_bytes(&buf.split_to(ID_LENGTH))?;

        let ip = match buf.get_u8() {
            ADDR_V4 => {
                if buf.remaining() < 4 + 2 {
                    return Err(DhtError::InvalidMessage("ipv4 contact too short".into()));
                }
                let mut octets = [0u8; 4];
                buf.copy_to_slice(&mut octets);
                IpAddr::V4(Ipv4Addr::from(octets))
            }
            ADDR_V6 => {
                if buf.remaining() < 16 + 2 {
                    return Err(DhtError::InvalidMessage("ipv6 contact too short".into()));
                }
                let mut octets = [0u8; 16];
                buf.copy_to_slice(&mut octets);
                IpAddr::V6(Ipv6Addr::from(octets))
            }
            family => {
                return Err(DhtError::InvalidMessage(format!(
                    "unknown address family: {}",
                    family
                )))
            }
        };
        let port = buf.get_u16();

        Ok(Self::new(id, SocketAddr::new(ip, port)))
    }
}

#[cfg(test)]
mod tests;
