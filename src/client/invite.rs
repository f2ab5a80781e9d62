//! INVITE client transaction (RFC 3261 section 17.1.1).
//!
//! Calling → Proceeding → Completed → Terminated, with direct jumps to
//! Terminated on Timer B, transport failure, a 2xx final response (which this
//! transaction hands to the TU and then winds down through the absorption
//! wait), and the section 9.1 cancel timer.

use std::time::Duration;

use crate::builders::ack_for_non_2xx;
use crate::message::{Request, Response};
use crate::timer::{TimerKind, TimerSettings};
use crate::transaction::{FsmAction, TransactionState};

/// States of the INVITE client machine (RFC 3261 Figure 5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ClientInviteState {
    Calling,
    Proceeding,
    Completed,
    Terminated,
}

impl From<ClientInviteState> for TransactionState {
    fn from(s: ClientInviteState) -> Self {
        match s {
            ClientInviteState::Calling => TransactionState::Calling,
            ClientInviteState::Proceeding => TransactionState::Proceeding,
            ClientInviteState::Completed => TransactionState::Completed,
            ClientInviteState::Terminated => TransactionState::Terminated,
        }
    }
}

/// Inputs to the INVITE client machine.
#[derive(Debug, Clone)]
pub enum ClientInviteEvent {
    /// Begin the transaction: transmit the INVITE and arm Timers A/B.
    Start,
    /// A response correlated to this transaction arrived.
    Response(Response),
    /// One of this transaction's timers fired.
    TimerFired(TimerKind),
    /// The TU issued a CANCEL against this INVITE; arm the 9.1 give-up wait.
    CancelRequested,
    /// A transport send owned by this transaction failed.
    TransportError,
}

/// The INVITE client state machine. Pure: consumes events, returns actions.
#[derive(Debug)]
pub struct ClientInviteTransaction {
    state: ClientInviteState,
    request: Request,
    timers: TimerSettings,
    reliable: bool,
    /// Current Timer A interval; doubles on every retransmission.
    interval_a: Duration,
    /// ACK generated for a non-2xx final, retransmitted on duplicate finals.
    ack: Option<Request>,
}

impl ClientInviteTransaction {
    pub fn new(request: Request, timers: TimerSettings, reliable: bool) -> Self {
        let interval_a = timers.t1;
        ClientInviteTransaction {
            state: ClientInviteState::Calling,
            request,
            timers,
            reliable,
            interval_a,
            ack: None,
        }
    }

    pub fn state(&self) -> TransactionState {
        self.state.into()
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Forward-only transition; the state graph has no backward edges.
    fn transition(&mut self, next: ClientInviteState) {
        debug_assert!(self.state <= next, "backward transition {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    pub(crate) fn on_event(&mut self, event: ClientInviteEvent) -> Vec<FsmAction> {
        use ClientInviteState::*;
        match (self.state, event) {
            (Calling, ClientInviteEvent::Start) => self.start(),
            (Calling | Proceeding | Completed, ClientInviteEvent::Response(r)) => {
                self.on_response(r)
            }
            (Calling, ClientInviteEvent::TimerFired(TimerKind::A)) => self.on_timer_a(),
            (Calling | Proceeding, ClientInviteEvent::TimerFired(TimerKind::B)) => {
                self.give_up(TimerKind::B)
            }
            (Calling | Proceeding, ClientInviteEvent::TimerFired(TimerKind::Cancel)) => {
                self.give_up(TimerKind::Cancel)
            }
            (Completed, ClientInviteEvent::TimerFired(TimerKind::D)) => self.on_timer_d(),
            (Calling | Proceeding, ClientInviteEvent::CancelRequested) => vec![FsmAction::Schedule {
                kind: TimerKind::Cancel,
                duration: self.timers.give_up(),
            }],
            (_, ClientInviteEvent::TransportError) => self.on_transport_error(),
            // Late or duplicate timer firings and events outside the graph.
            _ => Vec::new(),
        }
    }

    fn start(&mut self) -> Vec<FsmAction> {
        let mut actions = vec![FsmAction::Send(self.request.clone().into())];
        if !self.reliable {
            actions.push(FsmAction::Schedule {
                kind: TimerKind::A,
                duration: self.interval_a,
            });
        }
        actions.push(FsmAction::Schedule {
            kind: TimerKind::B,
            duration: self.timers.give_up(),
        });
        actions
    }

    fn on_response(&mut self, response: Response) -> Vec<FsmAction> {
        use ClientInviteState::*;
        if response.status.is_provisional() {
            return match self.state {
                Calling => {
                    self.transition(Proceeding);
                    vec![
                        FsmAction::CancelTimer(TimerKind::A),
                        FsmAction::DeliverProvisional(response),
                    ]
                }
                Proceeding => vec![FsmAction::DeliverProvisional(response)],
                // Late 1xx after a final response: absorbed.
                _ => Vec::new(),
            };
        }

        match self.state {
            Calling | Proceeding => {
                let mut actions = vec![
                    FsmAction::CancelTimer(TimerKind::A),
                    FsmAction::CancelTimer(TimerKind::B),
                    FsmAction::CancelTimer(TimerKind::Cancel),
                    FsmAction::DeliverFinal(response.clone()),
                ];
                if !response.status.is_success() {
                    // Non-2xx finals are acknowledged on this transaction
                    // context (17.1.1.3); the ACK reuses the INVITE's branch.
                    let ack = ack_for_non_2xx(&self.request, &response);
                    self.ack = Some(ack.clone());
                    actions.push(FsmAction::Send(ack.into()));
                }
                self.transition(Completed);
                actions.push(FsmAction::Schedule {
                    kind: TimerKind::D,
                    duration: self.timers.wait_d(self.reliable),
                });
                actions
            }
            Completed => {
                // Retransmitted final: swallow it, re-ACK if we ACKed before.
                match &self.ack {
                    Some(ack) => vec![FsmAction::Send(ack.clone().into())],
                    None => Vec::new(),
                }
            }
            _ => Vec::new(),
        }
    }

    fn on_timer_a(&mut self) -> Vec<FsmAction> {
        // Retransmission only happens while Calling; interval doubles
        // unbounded (T2 caps E and G, not A).
        self.interval_a = self.interval_a.saturating_mul(2);
        vec![
            FsmAction::Send(self.request.clone().into()),
            FsmAction::Schedule {
                kind: TimerKind::A,
                duration: self.interval_a,
            },
        ]
    }

    fn give_up(&mut self, timer: TimerKind) -> Vec<FsmAction> {
        self.transition(ClientInviteState::Terminated);
        vec![FsmAction::Timeout(timer), FsmAction::Terminate]
    }

    fn on_timer_d(&mut self) -> Vec<FsmAction> {
        self.transition(ClientInviteState::Terminated);
        vec![FsmAction::Terminate]
    }

    fn on_transport_error(&mut self) -> Vec<FsmAction> {
        if self.state == ClientInviteState::Terminated {
            return Vec::new();
        }
        self.transition(ClientInviteState::Terminated);
        vec![FsmAction::Terminate]
    }
}
