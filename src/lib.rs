//! SIP transaction layer (RFC 3261 section 17)
//!
//! This crate implements the four transaction state machines (INVITE and
//! non-INVITE, client and server sides), branch-based correlation with a
//! composite fallback for legacy peers, merged-request loop detection, and a
//! [`TransactionStack`] facade that ties them together over pluggable
//! transport and timer collaborators.
//!
//! The transaction user (TU) drives the stack with
//! [`TransactionStack::send_request`] and [`TransactionStack::send_response`],
//! the transport layer feeds it through
//! [`TransactionStack::process_transport_message`], and everything the TU
//! observes arrives as [`TransactionEvent`]s on the channel returned at
//! construction. Dialogs, 2xx retransmission, and message parsing live in
//! other layers.

pub mod builders;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod manager;
pub mod message;
pub mod server;
pub mod timer;
pub mod transaction;
pub mod transport;

// Re-export the surface most embedders need.
pub use config::StackConfig;
pub use dispatcher::Dispatcher;
pub use error::{Error, Result};
pub use manager::TransactionStack;
pub use message::{Address, CSeq, Message, Method, Request, Response, StatusCode, Via};
pub use timer::{TimerHandle, TimerKind, TimerPolicy, TimerService, TimerSettings, TokioTimerService};
pub use transaction::{
    MergedRequestKey, TransactionEvent, TransactionId, TransactionKey, TransactionKind,
    TransactionRole, TransactionState,
};
pub use transport::{ConnectionRef, Transport, TransportError};

pub mod prelude {
    pub use crate::{
        ConnectionRef, Error, Message, Method, Request, Response, Result, StackConfig, StatusCode,
        TransactionEvent, TransactionKey, TransactionRole, TransactionStack, TransactionState,
        Transport, TransportError,
    };
}
