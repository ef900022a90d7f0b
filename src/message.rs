//! Protocol messages and the datagram codec.
//!
//! Every datagram is laid out as:
//!
//! ```text
//! +----------------------+-----------+------------------+
//! | correlation id (u32) | type (u8) | body             |
//! +----------------------+-----------+------------------+
//! ```
//!
//! Every body begins with the sender's 20-byte id; the sender's address is
//! taken from the datagram source.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::constants::{DATAGRAM_HEADER_LEN, ID_LENGTH, MAX_DATAGRAM_SIZE};
use crate::error::DhtError;
use crate::node::{Contact, NodeId};
use crate::storage::{GetParameter, StorageEntry};

/// Matches a reply to the request that caused it.
pub type CorrelationId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    Connect = 1,
    Acknowledge = 2,
    FindNode = 3,
    NodeReply = 4,
    FindContent = 5,
    Content = 6,
    Store = 7,
    StoreReply = 8,
}

impl TryFrom<u8> for MessageKind {
    type Error = DhtError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(MessageKind::Connect),
            2 => Ok(MessageKind::Acknowledge),
            3 => Ok(MessageKind::FindNode),
            4 => Ok(MessageKind::NodeReply),
            5 => Ok(MessageKind::FindContent),
            6 => Ok(MessageKind::Content),
            7 => Ok(MessageKind::Store),
            8 => Ok(MessageKind::StoreReply),
            _ => Err(DhtError::UnknownMessageType(value)),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Message {
    /// Join request sent to a bootstrap peer.
    Connect { origin: NodeId },
    /// Answer to `Connect`.
    Acknowledge { origin: NodeId },
    /// Asks for the contacts closest to `target`.
    FindNode { origin: NodeId, target: NodeId },
    /// Contacts closest to a requested target.
    NodeReply {
        origin: NodeId,
        contacts: Vec<Contact>,
    },
    /// Asks for content; answered by `Content` or, when absent, `NodeReply`.
    FindContent {
        origin: NodeId,
        query: GetParameter,
    },
    Content {
        origin: NodeId,
        entry: StorageEntry,
    },
    Store {
        origin: NodeId,
        entry: StorageEntry,
    },
    /// `stored` is false when the receiver already held a newer copy.
    StoreReply { origin: NodeId, stored: bool },
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Connect { .. } => MessageKind::Connect,
            Message::Acknowledge { .. } => MessageKind::Acknowledge,
            Message::FindNode { .. } => MessageKind::FindNode,
            Message::NodeReply { .. } => MessageKind::NodeReply,
            Message::FindContent { .. } => MessageKind::FindContent,
            Message::Content { .. } => MessageKind::Content,
            Message::Store { .. } => MessageKind::Store,
            Message::StoreReply { .. } => MessageKind::StoreReply,
        }
    }

    pub fn origin(&self) -> NodeId {
        match self {
            Message::Connect { origin }
            | Message::Acknowledge { origin }
            | Message::FindNode { origin, .. }
            | Message::NodeReply { origin, .. }
            | Message::FindContent { origin, .. }
            | Message::Content { origin, .. }
            | Message::Store { origin, .. }
            | Message::StoreReply { origin, .. } => *origin,
        }
    }

    fn encode_body(&self, buf: &mut BytesMut) {
        buf.put_slice(self.origin().as_bytes());

        match self {
            Message::Connect { .. } | Message::Acknowledge { .. } => {}
            Message::FindNode { target, .. } => {
                buf.put_slice(target.as_bytes());
            }
            Message::NodeReply { contacts, .. } => {
                buf.put_u16(contacts.len() as u16);
                for contact in contacts {
                    contact.encode(buf);
                }
            }
            Message::FindContent { query, .. } => query.encode(buf),
            Message::Content { entry, .. } | Message::Store { entry, .. } => entry.encode(buf),
            Message::StoreReply { stored, .. } => {
                buf.put_u8(u8::from(*stored));
            }
        }
    }

    /// Decodes a body whose type code has already been read.
    pub fn decode(kind: MessageKind, mut body: Bytes) -> Result<Self, DhtError> {
        if body.remaining() < ID_LENGTH {
            return Err(DhtError::InvalidMessage("missing origin".into()));
        }
        let origin = NodeId::from_bytes(&body.split_to(ID_LENGTH))?;

        let message = match kind {
            MessageKind::Connect => Message::Connect { origin },
            MessageKind::Acknowledge => Message::Acknowledge { origin },
            MessageKind::FindNode => {
                if body.remaining() < ID_LENGTH {
                    return Err(DhtError::InvalidMessage("find_node target missing".into()));
                }
                let target = NodeId::from_bytes(&body.split_to(ID_LENGTH))?;
                Message::FindNode { origin, target }
            }
            MessageKind::NodeReply => {
                if body.remaining() < 2 {
                    return Err(DhtError::InvalidMessage("node reply too short".into()));
                }
                let count = body.get_u16() as usize;
                let mut contacts = Vec::with_capacity(count.min(64));
                for _ in 0..count {
                    contacts.push(Contact::decode(&mut body)?);
                }
                Message::NodeReply { origin, contacts }
            }
            MessageKind::FindContent => Message::FindContent {
                origin,
                query: GetParameter::decode(&mut body)?,
            },
            MessageKind::Content => Message::Content {
                origin,
                entry: StorageEntry::decode(&mut body)?,
            },
            MessageKind::Store => Message::Store {
                origin,
                entry: StorageEntry::decode(&mut body)?,
            },
            MessageKind::StoreReply => {
                if body.remaining() < 1 {
                    return Err(DhtError::InvalidMessage("store reply too short".into()));
                }
                Message::StoreReply {
                    origin,
                    stored: body.get_u8() != 0,
                }
            }
        };

        if body.has_remaining() {
            return Err(DhtError::InvalidMessage(format!(
                "{} trailing bytes after {:?}",
                body.remaining(),
                kind
            )));
        }

        Ok(message)
    }
}

/// Frames `message` under `correlation_id`, enforcing the datagram ceiling.
pub fn encode_datagram(
    correlation_id: CorrelationId,
    message: &Message,
) -> Result<Bytes, DhtError> {
    let mut buf = BytesMut::with_capacity(256);
    buf.put_u32(correlation_id);
    buf.put_u8(message.kind() as u8);
    message.encode_body(&mut buf);

    if buf.len() > MAX_DATAGRAM_SIZE {
        return Err(DhtError::MessageTooLarge {
            size: buf.len(),
            max: MAX_DATAGRAM_SIZE,
        });
    }

    Ok(buf.freeze())
}

pub fn decode_datagram(mut data: Bytes) -> Result<(CorrelationId, Message), DhtError> {
    if data.len() < DATAGRAM_HEADER_LEN {
        return Err(DhtError::InvalidMessage("datagram too short".into()));
    }
    if data.len() > MAX_DATAGRAM_SIZE {
        return Err(DhtError::MessageTooLarge {
            size: data.len(),
            max: MAX_DATAGRAM_SIZE,
        });
    }

    let correlation_id = data.get_u32();
    let kind = MessageKind::try_from(data.get_u8())?;
    let message = Message::decode(kind, data)?;

    Ok((correlation_id, message))
}
