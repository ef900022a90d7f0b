use thiserror::Error;

/// Errors surfaced by the node and its operations.
///
/// Transient peer failures never show up here; they are absorbed by lookups
/// and replication and only shrink the result. What remains are conditions
/// that make a whole operation meaningless.
#[derive(Debug, Error)]
pub enum DhtError {
    /// Socket-level I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A datagram or message body could not be decoded.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// The datagram carried a type code with no known message.
    #[error("unknown message type code: {0}")]
    UnknownMessageType(u8),

    /// An encoded message exceeds the per-datagram ceiling.
    #[error("message of {size} bytes exceeds datagram limit of {max}")]
    MessageTooLarge { size: usize, max: usize },

    #[error("invalid node id length")]
    InvalidNodeId,

    /// The network could not be reached, e.g. bootstrap exhausted its attempts.
    #[error("routing error: {0}")]
    Routing(String),

    /// The transport has been shut down.
    #[error("transport closed")]
    TransportClosed,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
