//! Non-INVITE server transaction (RFC 3261 section 17.2.2).
//!
//! Trying → Proceeding → Completed → Terminated, Timer J as the absorption
//! wait after the final response. Request retransmissions replay the latest
//! response once one has been sent.

use crate::message::{Request, Response};
use crate::timer::{TimerKind, TimerSettings};
use crate::transaction::{FsmAction, TransactionState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ServerNonInviteState {
    Trying,
    Proceeding,
    Completed,
    Terminated,
}

impl From<ServerNonInviteState> for TransactionState {
    fn from(s: ServerNonInviteState) -> Self {
        match s {
            ServerNonInviteState::Trying => TransactionState::Trying,
            ServerNonInviteState::Proceeding => TransactionState::Proceeding,
            ServerNonInviteState::Completed => TransactionState::Completed,
            ServerNonInviteState::Terminated => TransactionState::Terminated,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ServerNonInviteEvent {
    /// The initial request was admitted; hand it to the TU.
    Start,
    RequestRetransmission,
    SendResponse(Response),
    TimerFired(TimerKind),
    TransportError,
}

#[derive(Debug)]
pub struct ServerNonInviteTransaction {
    state: ServerNonInviteState,
    request: Request,
    timers: TimerSettings,
    reliable: bool,
    last_response: Option<Response>,
}

impl ServerNonInviteTransaction {
    pub fn new(request: Request, timers: TimerSettings, reliable: bool) -> Self {
        ServerNonInviteTransaction {
            state: ServerNonInviteState::Trying,
            request,
            timers,
            reliable,
            last_response: None,
        }
    }

    pub fn state(&self) -> TransactionState {
        self.state.into()
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    fn transition(&mut self, next: ServerNonInviteState) {
        debug_assert!(self.state <= next, "backward transition {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    pub(crate) fn on_event(&mut self, event: ServerNonInviteEvent) -> Vec<FsmAction> {
        use ServerNonInviteState::*;
        match (self.state, event) {
            (Trying, ServerNonInviteEvent::Start) => {
                vec![FsmAction::DeliverRequest(self.request.clone())]
            }
            (_, ServerNonInviteEvent::RequestRetransmission) => {
                // Retransmissions while Trying are absorbed without reply
                // (17.2.2); afterwards the latest response is replayed.
                match (&self.state, &self.last_response) {
                    (Proceeding | Completed, Some(r)) => vec![FsmAction::Send(r.clone().into())],
                    _ => Vec::new(),
                }
            }
            (Trying | Proceeding, ServerNonInviteEvent::SendResponse(r)) => self.on_send_response(r),
            (Completed, ServerNonInviteEvent::TimerFired(TimerKind::J)) => {
                self.transition(Terminated);
                vec![FsmAction::Terminate]
            }
            (_, ServerNonInviteEvent::TransportError) => {
                if self.state == Terminated {
                    return Vec::new();
                }
                self.transition(Terminated);
                vec![FsmAction::Terminate]
            }
            _ => Vec::new(),
        }
    }

    fn on_send_response(&mut self, response: Response) -> Vec<FsmAction> {
        self.last_response = Some(response.clone());
        if response.status.is_provisional() {
            self.transition(ServerNonInviteState::Proceeding);
            return vec![FsmAction::Send(response.into())];
        }
        self.transition(ServerNonInviteState::Completed);
        vec![
            FsmAction::Send(response.into()),
            FsmAction::Schedule {
                kind: TimerKind::J,
                duration: self.timers.wait_j(self.reliable),
            },
        ]
    }
}
