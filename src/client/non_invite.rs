//! Non-INVITE client transaction (RFC 3261 section 17.1.2).
//!
//! Trying → Proceeding → Completed → Terminated. Timer E drives request
//! retransmission (doubling, capped at T2, fixed T2 once Proceeding), Timer F
//! is the give-up deadline, Timer K is the response-absorption wait.

use std::time::Duration;

use crate::message::{Request, Response};
use crate::timer::{TimerKind, TimerSettings};
use crate::transaction::{FsmAction, TransactionState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ClientNonInviteState {
    Trying,
    Proceeding,
    Completed,
    Terminated,
}

impl From<ClientNonInviteState> for TransactionState {
    fn from(s: ClientNonInviteState) -> Self {
        match s {
            ClientNonInviteState::Trying => TransactionState::Trying,
            ClientNonInviteState::Proceeding => TransactionState::Proceeding,
            ClientNonInviteState::Completed => TransactionState::Completed,
            ClientNonInviteState::Terminated => TransactionState::Terminated,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ClientNonInviteEvent {
    Start,
    Response(Response),
    TimerFired(TimerKind),
    TransportError,
}

#[derive(Debug)]
pub struct ClientNonInviteTransaction {
    state: ClientNonInviteState,
    request: Request,
    timers: TimerSettings,
    reliable: bool,
    interval_e: Duration,
}

impl ClientNonInviteTransaction {
    pub fn new(request: Request, timers: TimerSettings, reliable: bool) -> Self {
        let interval_e = timers.t1;
        ClientNonInviteTransaction {
            state: ClientNonInviteState::Trying,
            request,
            timers,
            reliable,
            interval_e,
        }
    }

    pub fn state(&self) -> TransactionState {
        self.state.into()
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    fn transition(&mut self, next: ClientNonInviteState) {
        debug_assert!(self.state <= next, "backward transition {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    pub(crate) fn on_event(&mut self, event: ClientNonInviteEvent) -> Vec<FsmAction> {
        use ClientNonInviteState::*;
        match (self.state, event) {
            (Trying, ClientNonInviteEvent::Start) => self.start(),
            (Trying | Proceeding | Completed, ClientNonInviteEvent::Response(r)) => {
                self.on_response(r)
            }
            (Trying | Proceeding, ClientNonInviteEvent::TimerFired(TimerKind::E)) => {
                self.on_timer_e()
            }
            (Trying | Proceeding, ClientNonInviteEvent::TimerFired(TimerKind::F)) => {
                self.transition(Terminated);
                vec![FsmAction::Timeout(TimerKind::F), FsmAction::Terminate]
            }
            (Completed, ClientNonInviteEvent::TimerFired(TimerKind::K)) => {
                self.transition(Terminated);
                vec![FsmAction::Terminate]
            }
            (_, ClientNonInviteEvent::TransportError) => {
                if self.state == Terminated {
                    return Vec::new();
                }
                self.transition(Terminated);
                vec![FsmAction::Terminate]
            }
            _ => Vec::new(),
        }
    }

    fn start(&mut self) -> Vec<FsmAction> {
        let mut actions = vec![FsmAction::Send(self.request.clone().into())];
        if !self.reliable {
            actions.push(FsmAction::Schedule {
                kind: TimerKind::E,
                duration: self.interval_e,
            });
        }
        actions.push(FsmAction::Schedule {
            kind: TimerKind::F,
            duration: self.timers.give_up(),
        });
        actions
    }

    fn on_response(&mut self, response: Response) -> Vec<FsmAction> {
        use ClientNonInviteState::*;
        if response.status.is_provisional() {
            return match self.state {
                Trying => {
                    self.transition(Proceeding);
                    vec![FsmAction::DeliverProvisional(response)]
                }
                Proceeding => vec![FsmAction::DeliverProvisional(response)],
                _ => Vec::new(),
            };
        }
        match self.state {
            Trying | Proceeding => {
                self.transition(Completed);
                vec![
                    FsmAction::CancelTimer(TimerKind::E),
                    FsmAction::CancelTimer(TimerKind::F),
                    FsmAction::DeliverFinal(response),
                    FsmAction::Schedule {
                        kind: TimerKind::K,
                        duration: self.timers.absorption(self.reliable),
                    },
                ]
            }
            // Duplicate finals during the Timer K window are absorbed.
            _ => Vec::new(),
        }
    }

    fn on_timer_e(&mut self) -> Vec<FsmAction> {
        // Doubles up to T2 while Trying; once Proceeding the interval is a
        // flat T2 (17.1.2.2).
        self.interval_e = if self.state == ClientNonInviteState::Proceeding {
            self.timers.t2
        } else {
            self.interval_e.saturating_mul(2).min(self.timers.t2)
        };
        vec![
            FsmAction::Send(self.request.clone().into()),
            FsmAction::Schedule {
                kind: TimerKind::E,
                duration: self.interval_e,
            },
        ]
    }
}
