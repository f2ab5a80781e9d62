//! Crate error type.
//!
//! Correlation failures (stray responses, unmatched ACK/CANCEL) are not
//! errors: the stack resolves them with protocol-mandated fallback behavior.
//! What remains is the small set of conditions a caller can actually act on.

use thiserror::Error;

use crate::transaction::TransactionKey;
use crate::transport::TransportError;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    /// No live transaction under this key; returned for TU calls that name a
    /// transaction explicitly (e.g. sending a response).
    #[error("transaction not found: {0}")]
    TransactionNotFound(TransactionKey),

    /// A client transaction already exists for this key. Indicates a
    /// correlation-key computation bug in the caller and fails loudly.
    #[error("transaction already exists: {0}")]
    DuplicateTransaction(TransactionKey),

    /// A send failed at the transport layer.
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    /// The stack has shut down and no longer accepts work.
    #[error("transaction stack is shut down")]
    ShutDown,
}
