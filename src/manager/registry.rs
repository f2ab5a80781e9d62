//! Shared transaction registry.
//!
//! The only structure visible to every task driving the stack: transport
//! readers, TU calls, and the timer command loop all meet here. Client and
//! server transactions live in separate maps keyed by [`TransactionKey`];
//! the merged-request index maps [`MergedRequestKey`] to the owning server
//! transaction for RFC 3261 section 8.2.2.2 loop detection.
//!
//! Every mutation goes through the maps' own atomic entry operations. A shard
//! guard serializes all events for one transaction; it is never held across
//! an await point.

use std::collections::HashMap;

use dashmap::mapref::entry::Entry;
use dashmap::mapref::one::RefMut;
use dashmap::DashMap;

use crate::client::{
    ClientInviteEvent, ClientInviteTransaction, ClientNonInviteEvent, ClientNonInviteTransaction,
};
use crate::message::{Request, Response};
use crate::server::{
    ServerInviteEvent, ServerInviteTransaction, ServerNonInviteEvent, ServerNonInviteTransaction,
};
use crate::timer::{TimerHandle, TimerKind};
use crate::transaction::{
    FsmAction, MergedRequestKey, TransactionId, TransactionKey, TransactionKind, TransactionRole,
    TransactionState,
};
use crate::transport::ConnectionRef;

/// Union over the four state machines, so the registry can hold any variant
/// under one entry type.
#[derive(Debug)]
pub(crate) enum TransactionFsm {
    InviteClient(ClientInviteTransaction),
    NonInviteClient(ClientNonInviteTransaction),
    InviteServer(ServerInviteTransaction),
    NonInviteServer(ServerNonInviteTransaction),
}

impl TransactionFsm {
    pub fn kind(&self) -> TransactionKind {
        match self {
            TransactionFsm::InviteClient(_) => TransactionKind::InviteClient,
            TransactionFsm::NonInviteClient(_) => TransactionKind::NonInviteClient,
            TransactionFsm::InviteServer(_) => TransactionKind::InviteServer,
            TransactionFsm::NonInviteServer(_) => TransactionKind::NonInviteServer,
        }
    }

    pub fn state(&self) -> TransactionState {
        match self {
            TransactionFsm::InviteClient(t) => t.state(),
            TransactionFsm::NonInviteClient(t) => t.state(),
            TransactionFsm::InviteServer(t) => t.state(),
            TransactionFsm::NonInviteServer(t) => t.state(),
        }
    }

    pub fn start(&mut self) -> Vec<FsmAction> {
        match self {
            TransactionFsm::InviteClient(t) => t.on_event(ClientInviteEvent::Start),
            TransactionFsm::NonInviteClient(t) => t.on_event(ClientNonInviteEvent::Start),
            TransactionFsm::InviteServer(t) => t.on_event(ServerInviteEvent::Start),
            TransactionFsm::NonInviteServer(t) => t.on_event(ServerNonInviteEvent::Start),
        }
    }

    /// A response correlated to a client transaction. Empty on server
    /// variants; responses never reach them from the wire.
    pub fn on_response(&mut self, response: Response) -> Vec<FsmAction> {
        match self {
            TransactionFsm::InviteClient(t) => t.on_event(ClientInviteEvent::Response(response)),
            TransactionFsm::NonInviteClient(t) => {
                t.on_event(ClientNonInviteEvent::Response(response))
            }
            _ => Vec::new(),
        }
    }

    /// A retransmission of a server transaction's request.
    pub fn on_request_retransmission(&mut self) -> Vec<FsmAction> {
        match self {
            TransactionFsm::InviteServer(t) => {
                t.on_event(ServerInviteEvent::RequestRetransmission)
            }
            TransactionFsm::NonInviteServer(t) => {
                t.on_event(ServerNonInviteEvent::RequestRetransmission)
            }
            _ => Vec::new(),
        }
    }

    pub fn on_ack(&mut self, ack: Request) -> Vec<FsmAction> {
        match self {
            TransactionFsm::InviteServer(t) => t.on_event(ServerInviteEvent::AckReceived(ack)),
            _ => Vec::new(),
        }
    }

    pub fn on_cancel_received(&mut self, cancel: Request) -> Vec<FsmAction> {
        match self {
            TransactionFsm::InviteServer(t) => t.on_event(ServerInviteEvent::CancelReceived(cancel)),
            _ => Vec::new(),
        }
    }

    /// The TU issued a CANCEL against this INVITE client transaction.
    pub fn on_cancel_requested(&mut self) -> Vec<FsmAction> {
        match self {
            TransactionFsm::InviteClient(t) => t.on_event(ClientInviteEvent::CancelRequested),
            _ => Vec::new(),
        }
    }

    /// A TU response routed into a server transaction.
    pub fn on_send_response(&mut self, response: Response) -> Vec<FsmAction> {
        match self {
            TransactionFsm::InviteServer(t) => t.on_event(ServerInviteEvent::SendResponse(response)),
            TransactionFsm::NonInviteServer(t) => {
                t.on_event(ServerNonInviteEvent::SendResponse(response))
            }
            _ => Vec::new(),
        }
    }

    pub fn on_timer(&mut self, kind: TimerKind) -> Vec<FsmAction> {
        match self {
            TransactionFsm::InviteClient(t) => t.on_event(ClientInviteEvent::TimerFired(kind)),
            TransactionFsm::NonInviteClient(t) => {
                t.on_event(ClientNonInviteEvent::TimerFired(kind))
            }
            TransactionFsm::InviteServer(t) => t.on_event(ServerInviteEvent::TimerFired(kind)),
            TransactionFsm::NonInviteServer(t) => {
                t.on_event(ServerNonInviteEvent::TimerFired(kind))
            }
        }
    }

    pub fn on_transport_error(&mut self) -> Vec<FsmAction> {
        match self {
            TransactionFsm::InviteClient(t) => t.on_event(ClientInviteEvent::TransportError),
            TransactionFsm::NonInviteClient(t) => {
                t.on_event(ClientNonInviteEvent::TransportError)
            }
            TransactionFsm::InviteServer(t) => t.on_event(ServerInviteEvent::TransportError),
            TransactionFsm::NonInviteServer(t) => {
                t.on_event(ServerNonInviteEvent::TransportError)
            }
        }
    }
}

/// A registered transaction: its machine plus everything the stack manages on
/// its behalf.
#[derive(Debug)]
pub(crate) struct TransactionEntry {
    pub id: TransactionId,
    pub fsm: TransactionFsm,
    /// Connection the peer was last seen on; retransmissions and responses go
    /// back through it. Rebound under the entry guard as traffic arrives.
    pub connection: ConnectionRef,
    /// Armed timers by kind. Dropping a handle cancels the underlying timer;
    /// the generation lets the command loop reject stale firings.
    pub timers: HashMap<TimerKind, (u64, TimerHandle)>,
    /// Bumped on every timer arm.
    pub generation: u64,
    /// Merged-request mark owned by this (server) transaction, cleared on
    /// termination.
    pub merged_key: Option<MergedRequestKey>,
}

impl TransactionEntry {
    pub fn new(fsm: TransactionFsm, connection: ConnectionRef) -> Self {
        TransactionEntry {
            id: TransactionId::new(),
            fsm,
            connection,
            timers: HashMap::new(),
            generation: 0,
            merged_key: None,
        }
    }
}

/// Outcome of an atomic check-then-insert.
pub(crate) enum InsertOutcome {
    Inserted,
    /// A live transaction already holds the key; the candidate was dropped.
    AlreadyPresent,
}

/// The client and server transaction stores plus the merged-request index.
#[derive(Debug, Default)]
pub(crate) struct TransactionRegistry {
    clients: DashMap<TransactionKey, TransactionEntry>,
    servers: DashMap<TransactionKey, TransactionEntry>,
    merged: DashMap<MergedRequestKey, TransactionKey>,
}

impl TransactionRegistry {
    pub fn new() -> Self {
        TransactionRegistry::default()
    }

    fn map(&self, role: TransactionRole) -> &DashMap<TransactionKey, TransactionEntry> {
        match role {
            TransactionRole::Client => &self.clients,
            TransactionRole::Server => &self.servers,
        }
    }

    /// Locked mutable access to one transaction. The guard serializes all
    /// event processing for that transaction; drop it before any await.
    pub fn get_mut(
        &self,
        role: TransactionRole,
        key: &TransactionKey,
    ) -> Option<RefMut<'_, TransactionKey, TransactionEntry>> {
        self.map(role).get_mut(key)
    }

    /// Atomic check-then-insert. Exactly one of two concurrent callers for
    /// the same key observes [`InsertOutcome::Inserted`].
    pub fn put_if_absent(
        &self,
        role: TransactionRole,
        key: TransactionKey,
        entry: TransactionEntry,
    ) -> InsertOutcome {
        match self.map(role).entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(entry);
                InsertOutcome::Inserted
            }
            Entry::Occupied(_) => InsertOutcome::AlreadyPresent,
        }
    }

    /// Removes a transaction. Its timer handles drop with the entry, which
    /// cancels every armed timer.
    pub fn remove(
        &self,
        role: TransactionRole,
        key: &TransactionKey,
    ) -> Option<TransactionEntry> {
        self.map(role).remove(key).map(|(_, entry)| entry)
    }

    /// Marks a merged-request key pending for `owner`. Returns false when a
    /// different transaction already holds the mark, the forked-duplicate
    /// case.
    pub fn try_mark_pending(&self, merged: MergedRequestKey, owner: TransactionKey) -> bool {
        match self.merged.entry(merged) {
            Entry::Vacant(slot) => {
                slot.insert(owner);
                true
            }
            Entry::Occupied(held) => *held.get() == owner,
        }
    }

    /// Clears a merged-request mark, but only if `owner` still holds it.
    pub fn clear_pending(&self, merged: &MergedRequestKey, owner: &TransactionKey) {
        self.merged.remove_if(merged, |_, held| held == owner);
    }

    pub fn len(&self, role: TransactionRole) -> usize {
        self.map(role).len()
    }

    /// Drops every entry. Timer handles drop with their entries, cancelling
    /// all armed timers.
    pub fn clear(&self) {
        self.clients.clear();
        self.servers.clear();
        self.merged.clear();
    }
}
