//! Core transaction types: identifiers, roles, state enumeration, the events
//! reported to the transaction user (TU), and the action vocabulary the four
//! state machines emit toward the stack facade.

pub mod key;

use std::fmt;
use std::time::Duration;

use uuid::Uuid;

use crate::message::{Message, Request, Response};
use crate::timer::types::TimerKind;
use crate::transport::ConnectionRef;

pub use key::{MergedRequestKey, TransactionKey};

/// Process-unique transaction identifier, assigned at creation and never
/// reused. Distinct from the correlation key: a late retransmission may reuse
/// a key after the original transaction is gone, but never its id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId(Uuid);

impl TransactionId {
    pub fn new() -> Self {
        TransactionId(Uuid::new_v4())
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which side of the exchange a transaction sits on. Client and server
/// registries are separate; the role selects one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionRole {
    Client,
    Server,
}

impl fmt::Display for TransactionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionRole::Client => f.write_str("client"),
            TransactionRole::Server => f.write_str("server"),
        }
    }
}

/// The four concrete state-machine variants of RFC 3261 section 17.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionKind {
    InviteClient,
    NonInviteClient,
    InviteServer,
    NonInviteServer,
}

impl TransactionKind {
    pub fn role(&self) -> TransactionRole {
        match self {
            TransactionKind::InviteClient | TransactionKind::NonInviteClient => {
                TransactionRole::Client
            }
            TransactionKind::InviteServer | TransactionKind::NonInviteServer => {
                TransactionRole::Server
            }
        }
    }
}

/// Union of the per-variant states, used for reporting. Each state machine
/// keeps its own narrower enum and converts into this one for events; the
/// ordering here is the forward direction every variant's graph follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TransactionState {
    Calling,
    Trying,
    Proceeding,
    Completed,
    Confirmed,
    Terminated,
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransactionState::Calling => "Calling",
            TransactionState::Trying => "Trying",
            TransactionState::Proceeding => "Proceeding",
            TransactionState::Completed => "Completed",
            TransactionState::Confirmed => "Confirmed",
            TransactionState::Terminated => "Terminated",
        };
        f.write_str(s)
    }
}

/// Events delivered to the transaction user. The TU only ever observes these;
/// timer and registry mechanics stay internal to the stack.
#[derive(Debug, Clone)]
pub enum TransactionEvent {
    /// A new INVITE server transaction accepted its initial request.
    InviteRequest {
        transaction_id: TransactionKey,
        request: Request,
        connection: ConnectionRef,
    },
    /// A new non-INVITE server transaction accepted its initial request.
    NonInviteRequest {
        transaction_id: TransactionKey,
        request: Request,
        connection: ConnectionRef,
    },
    /// An INVITE server transaction in Completed received its ACK.
    AckReceived {
        transaction_id: TransactionKey,
        request: Request,
    },
    /// A CANCEL was correlated to a live INVITE server transaction still in
    /// Proceeding; the TU should answer the INVITE with 487.
    CancelReceived {
        transaction_id: TransactionKey,
        cancel: Request,
    },
    /// 1xx response on a client transaction.
    ProvisionalResponse {
        transaction_id: TransactionKey,
        response: Response,
    },
    /// 2xx final response on a client transaction.
    SuccessResponse {
        transaction_id: TransactionKey,
        response: Response,
    },
    /// 3xx-6xx final response on a client transaction.
    FailureResponse {
        transaction_id: TransactionKey,
        response: Response,
    },
    /// A transaction changed state.
    StateChanged {
        transaction_id: TransactionKey,
        previous_state: TransactionState,
        new_state: TransactionState,
    },
    /// A protocol timer gave up waiting (Timer B, F, H or the cancel timer).
    TransactionTimeout {
        transaction_id: TransactionKey,
        timer: TimerKind,
    },
    /// A transport send failed; the owning transaction has terminated.
    TransportError { transaction_id: TransactionKey },
    /// The transaction reached Terminated and left the registry.
    TransactionTerminated { transaction_id: TransactionKey },
    /// A response with no matching live client transaction (RFC 3261
    /// section 18.1.2), handed to the TU as-is.
    StrayResponse {
        response: Response,
        connection: ConnectionRef,
    },
    /// An ACK with no matching server transaction: the ACK to a 2xx.
    StrayAck {
        request: Request,
        connection: ConnectionRef,
    },
}

/// What a state machine asks the stack to do after consuming an input. The
/// machines themselves are pure: they never touch the transport, timers, or
/// the registry directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FsmAction {
    /// Send a message on the transaction's bound connection.
    Send(Message),
    /// Arm a timer owned by this transaction.
    Schedule { kind: TimerKind, duration: Duration },
    /// Disarm a timer; a concurrent firing must become a no-op.
    CancelTimer(TimerKind),
    /// Hand a provisional response to the TU.
    DeliverProvisional(Response),
    /// Hand a final response to the TU (2xx vs failure split by the stack).
    DeliverFinal(Response),
    /// Hand the initial request of a server transaction to the TU.
    DeliverRequest(Request),
    /// Hand a correlated ACK to the TU.
    DeliverAck(Request),
    /// Hand a correlated CANCEL to the TU.
    DeliverCancel(Request),
    /// Report that the named timer expired without the awaited message.
    Timeout(TimerKind),
    /// The transaction is done: cancel its timers, drop its registry entry,
    /// clear any merged-request mark, and tell the TU.
    Terminate,
}
