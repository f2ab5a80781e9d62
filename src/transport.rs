//! The transport collaborator contract.
//!
//! Socket and connection management live outside this crate. The transaction
//! layer sees connections only as [`ConnectionRef`] values handed in with
//! inbound messages and rebound onto transactions as traffic arrives; it never
//! owns them.

use std::fmt;
use std::net::SocketAddr;

use async_trait::async_trait;
use thiserror::Error;

use crate::message::Message;

/// Cheap, clonable reference to a transport connection. A transaction keeps
/// the last one it saw so retransmissions and synthesized responses go back
/// the way the peer came.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionRef {
    /// Transport-assigned connection identifier.
    pub id: u64,
    /// Remote peer address.
    pub peer: SocketAddr,
    /// Whether the transport retransmits on its own (TCP/TLS) or not (UDP).
    /// Drives retransmission timers and absorption waits.
    pub reliable: bool,
}

impl ConnectionRef {
    pub fn new(id: u64, peer: SocketAddr, reliable: bool) -> Self {
        ConnectionRef { id, peer, reliable }
    }
}

impl fmt::Display for ConnectionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}@{}", self.id, self.peer)
    }
}

/// Errors reported by the transport collaborator. They terminate the owning
/// transaction; this layer never retries a failed send.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection closed")]
    ConnectionClosed,
    #[error("send failed: {0}")]
    SendFailed(String),
}

/// The transport layer as seen from the transaction core: a single send
/// operation, callable from any transaction task. Failures come back as
/// values, never as panics across the layer boundary.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    async fn send(
        &self,
        message: Message,
        connection: &ConnectionRef,
    ) -> Result<(), TransportError>;
}
