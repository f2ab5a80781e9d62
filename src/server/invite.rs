//! INVITE server transaction (RFC 3261 section 17.2.1).
//!
//! Proceeding → Completed → Confirmed → Terminated. The machine answers
//! retransmitted INVITEs with the most recent response, retransmits a non-2xx
//! final on Timer G until an ACK arrives, gives up on Timer H, and runs the
//! Timer I absorption wait after the ACK. A 2xx final terminates the
//! transaction immediately; 2xx retransmission belongs to the TU (13.3.1.4).

use std::time::Duration;

use crate::builders::response_for_request;
use crate::message::{Request, Response, StatusCode};
use crate::timer::{TimerKind, TimerSettings};
use crate::transaction::{FsmAction, TransactionState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ServerInviteState {
    Proceeding,
    Completed,
    Confirmed,
    Terminated,
}

impl From<ServerInviteState> for TransactionState {
    fn from(s: ServerInviteState) -> Self {
        match s {
            ServerInviteState::Proceeding => TransactionState::Proceeding,
            ServerInviteState::Completed => TransactionState::Completed,
            ServerInviteState::Confirmed => TransactionState::Confirmed,
            ServerInviteState::Terminated => TransactionState::Terminated,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ServerInviteEvent {
    /// The initial INVITE was admitted; hand it to the TU and send 100 Trying.
    Start,
    /// A retransmission of the INVITE arrived.
    RequestRetransmission,
    /// The TU supplied a response to send.
    SendResponse(Response),
    /// The ACK for a non-2xx final arrived.
    AckReceived(Request),
    /// A CANCEL correlated to this transaction arrived.
    CancelReceived(Request),
    TimerFired(TimerKind),
    TransportError,
}

#[derive(Debug)]
pub struct ServerInviteTransaction {
    state: ServerInviteState,
    request: Request,
    timers: TimerSettings,
    reliable: bool,
    interval_g: Duration,
    last_provisional: Option<Response>,
    last_final: Option<Response>,
}

impl ServerInviteTransaction {
    pub fn new(request: Request, timers: TimerSettings, reliable: bool) -> Self {
        let interval_g = timers.t1;
        ServerInviteTransaction {
            state: ServerInviteState::Proceeding,
            request,
            timers,
            reliable,
            interval_g,
            last_provisional: None,
            last_final: None,
        }
    }

    pub fn state(&self) -> TransactionState {
        self.state.into()
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    fn transition(&mut self, next: ServerInviteState) {
        debug_assert!(self.state <= next, "backward transition {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    pub(crate) fn on_event(&mut self, event: ServerInviteEvent) -> Vec<FsmAction> {
        use ServerInviteState::*;
        match (self.state, event) {
            (Proceeding, ServerInviteEvent::Start) => self.start(),
            (_, ServerInviteEvent::RequestRetransmission) => self.on_retransmission(),
            (Proceeding, ServerInviteEvent::SendResponse(r)) => self.on_send_response(r),
            (Completed, ServerInviteEvent::AckReceived(ack)) => self.on_ack(ack),
            (Proceeding, ServerInviteEvent::CancelReceived(cancel)) => {
                // The TU decides whether to answer the INVITE with 487; the
                // transaction only reports the CANCEL and answers it 200.
                let ok = response_for_request(StatusCode::OK, &cancel);
                vec![FsmAction::DeliverCancel(cancel), FsmAction::Send(ok.into())]
            }
            (_, ServerInviteEvent::CancelReceived(cancel)) => {
                // Too late to cancel; still answer 200 so the peer stops.
                let ok = response_for_request(StatusCode::OK, &cancel);
                vec![FsmAction::Send(ok.into())]
            }
            (Completed, ServerInviteEvent::TimerFired(TimerKind::G)) => self.on_timer_g(),
            (Completed, ServerInviteEvent::TimerFired(TimerKind::H)) => {
                self.transition(Terminated);
                vec![FsmAction::Timeout(TimerKind::H), FsmAction::Terminate]
            }
            (Confirmed, ServerInviteEvent::TimerFired(TimerKind::I)) => {
                self.transition(Terminated);
                vec![FsmAction::Terminate]
            }
            (_, ServerInviteEvent::TransportError) => {
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
        // 100 Trying goes out under transaction control (17.2.1) so the
        // upstream client stops retransmitting while the TU thinks.
        let trying = response_for_request(StatusCode::TRYING, &self.request);
        self.last_provisional = Some(trying.clone());
        vec![
            FsmAction::DeliverRequest(self.request.clone()),
            FsmAction::Send(trying.into()),
        ]
    }

    fn on_retransmission(&mut self) -> Vec<FsmAction> {
        use ServerInviteState::*;
        let replay = match self.state {
            Proceeding => self.last_provisional.clone(),
            Completed => self.last_final.clone(),
            // Confirmed: the ACK already landed; absorb silently.
            _ => None,
        };
        match replay {
            Some(r) => vec![FsmAction::Send(r.into())],
            None => Vec::new(),
        }
    }

    fn on_send_response(&mut self, response: Response) -> Vec<FsmAction> {
        use ServerInviteState::*;
        if response.status.is_provisional() {
            self.last_provisional = Some(response.clone());
            return vec![FsmAction::Send(response.into())];
        }
        if response.status.is_success() {
            // 2xx: send once and get out of the way; retransmission and ACK
            // matching for 2xx are end-to-end concerns.
            self.transition(Terminated);
            return vec![FsmAction::Send(response.into()), FsmAction::Terminate];
        }
        self.last_final = Some(response.clone());
        self.transition(Completed);
        let mut actions = vec![FsmAction::Send(response.into())];
        if !self.reliable {
            actions.push(FsmAction::Schedule {
                kind: TimerKind::G,
                duration: self.interval_g,
            });
        }
        actions.push(FsmAction::Schedule {
            kind: TimerKind::H,
            duration: self.timers.give_up(),
        });
        actions
    }

    fn on_ack(&mut self, ack: Request) -> Vec<FsmAction> {
        self.transition(ServerInviteState::Confirmed);
        vec![
            FsmAction::CancelTimer(TimerKind::G),
            FsmAction::CancelTimer(TimerKind::H),
            FsmAction::DeliverAck(ack),
            FsmAction::Schedule {
                kind: TimerKind::I,
                duration: self.timers.absorption(self.reliable),
            },
        ]
    }

    fn on_timer_g(&mut self) -> Vec<FsmAction> {
        self.interval_g = self.interval_g.saturating_mul(2).min(self.timers.t2);
        let final_response = match &self.last_final {
            Some(r) => r.clone(),
            None => return Vec::new(),
        };
        vec![
            FsmAction::Send(final_response.into()),
            FsmAction::Schedule {
                kind: TimerKind::G,
                duration: self.interval_g,
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::{ack_for_non_2xx, cancel_for_invite};
    use crate::message::{Address, CSeq, Message, Method, Via};

    fn invite() -> Request {
        Request {
            method: Method::Invite,
            uri: "sip:bob@example.com".to_string(),
            via: vec![Via::new("UDP", "alice:5060", Some("z9hG4bK-si".to_string()))],
            from: Address::new("sip:alice@example.com", Some("f3".to_string())),
            to: Address::new("sip:bob@example.com", None),
            call_id: "si-1".to_string(),
            cseq: CSeq::new(1, Method::Invite),
            body: Vec::new(),
        }
    }

    fn machine() -> ServerInviteTransaction {
        ServerInviteTransaction::new(invite(), TimerSettings::default(), false)
    }

    fn sent_status(actions: &[FsmAction]) -> Option<StatusCode> {
        actions.iter().find_map(|a| match a {
            FsmAction::Send(Message::Response(r)) => Some(r.status),
            _ => None,
        })
    }

    #[test]
    fn start_delivers_the_invite_and_answers_100() {
        let mut tx = machine();
        let actions = tx.on_event(ServerInviteEvent::Start);
        assert!(matches!(&actions[0], FsmAction::DeliverRequest(r) if r.method == Method::Invite));
        assert_eq!(sent_status(&actions), Some(StatusCode::TRYING));
        assert_eq!(tx.state(), TransactionState::Proceeding);
    }

    #[test]
    fn retransmitted_invite_replays_the_latest_response() {
        let mut tx = machine();
        tx.on_event(ServerInviteEvent::Start);
        let ringing = response_for_request(StatusCode::RINGING, &invite());
        tx.on_event(ServerInviteEvent::SendResponse(ringing));

        let actions = tx.on_event(ServerInviteEvent::RequestRetransmission);
        assert_eq!(sent_status(&actions), Some(StatusCode::RINGING));
    }

    #[test]
    fn non_2xx_final_completes_and_retransmits_on_timer_g() {
        let mut tx = machine();
        tx.on_event(ServerInviteEvent::Start);
        let busy = response_for_request(StatusCode(486), &invite());
        let actions = tx.on_event(ServerInviteEvent::SendResponse(busy));
        assert_eq!(tx.state(), TransactionState::Completed);
        assert!(actions
            .iter()
            .any(|a| matches!(a, FsmAction::Schedule { kind: TimerKind::G, .. })));
        assert!(actions
            .iter()
            .any(|a| matches!(a, FsmAction::Schedule { kind: TimerKind::H, .. })));

        let interval = |actions: &[FsmAction]| match actions
            .iter()
            .find(|a| matches!(a, FsmAction::Schedule { kind: TimerKind::G, .. }))
        {
            Some(FsmAction::Schedule { duration, .. }) => *duration,
            _ => panic!("Timer G not rescheduled"),
        };
        let first = tx.on_event(ServerInviteEvent::TimerFired(TimerKind::G));
        assert_eq!(sent_status(&first), Some(StatusCode(486)));
        assert_eq!(interval(&first), Duration::from_secs(1));
        let second = tx.on_event(ServerInviteEvent::TimerFired(TimerKind::G));
        assert_eq!(interval(&second), Duration::from_secs(2));
    }

    #[test]
    fn ack_confirms_and_timer_i_terminates() {
        let mut tx = machine();
        tx.on_event(ServerInviteEvent::Start);
        let busy = response_for_request(StatusCode(486), &invite());
        tx.on_event(ServerInviteEvent::SendResponse(busy.clone()));

        let ack = ack_for_non_2xx(&invite(), &busy);
        let actions = tx.on_event(ServerInviteEvent::AckReceived(ack));
        assert_eq!(tx.state(), TransactionState::Confirmed);
        assert!(actions.contains(&FsmAction::CancelTimer(TimerKind::G)));
        assert!(actions.contains(&FsmAction::CancelTimer(TimerKind::H)));
        assert!(actions
            .iter()
            .any(|a| matches!(a, FsmAction::Schedule { kind: TimerKind::I, .. })));

        let fired = tx.on_event(ServerInviteEvent::TimerFired(TimerKind::I));
        assert_eq!(tx.state(), TransactionState::Terminated);
        assert!(fired.contains(&FsmAction::Terminate));
    }

    #[test]
    fn timer_h_gives_up_waiting_for_the_ack() {
        let mut tx = machine();
        tx.on_event(ServerInviteEvent::Start);
        let busy = response_for_request(StatusCode(486), &invite());
        tx.on_event(ServerInviteEvent::SendResponse(busy));

        let actions = tx.on_event(ServerInviteEvent::TimerFired(TimerKind::H));
        assert_eq!(tx.state(), TransactionState::Terminated);
        assert!(actions.contains(&FsmAction::Timeout(TimerKind::H)));
    }

    #[test]
    fn a_2xx_final_terminates_immediately() {
        let mut tx = machine();
        tx.on_event(ServerInviteEvent::Start);
        let ok = response_for_request(StatusCode::OK, &invite());
        let actions = tx.on_event(ServerInviteEvent::SendResponse(ok));
        assert_eq!(tx.state(), TransactionState::Terminated);
        assert_eq!(sent_status(&actions), Some(StatusCode::OK));
        assert!(actions.contains(&FsmAction::Terminate));
        assert!(!actions
            .iter()
            .any(|a| matches!(a, FsmAction::Schedule { .. })));
    }

    #[test]
    fn cancel_in_proceeding_is_delivered_and_answered_200() {
        let mut tx = machine();
        tx.on_event(ServerInviteEvent::Start);
        let cancel = cancel_for_invite(&invite());
        let actions = tx.on_event(ServerInviteEvent::CancelReceived(cancel));
        assert!(matches!(&actions[0], FsmAction::DeliverCancel(c) if c.method == Method::Cancel));
        assert_eq!(sent_status(&actions), Some(StatusCode::OK));
    }

    #[test]
    fn cancel_after_the_final_is_answered_but_not_delivered() {
        let mut tx = machine();
        tx.on_event(ServerInviteEvent::Start);
        let busy = response_for_request(StatusCode(486), &invite());
        tx.on_event(ServerInviteEvent::SendResponse(busy));

        let cancel = cancel_for_invite(&invite());
        let actions = tx.on_event(ServerInviteEvent::CancelReceived(cancel));
        assert!(!actions
            .iter()
            .any(|a| matches!(a, FsmAction::DeliverCancel(_))));
        assert_eq!(sent_status(&actions), Some(StatusCode::OK));
    }
}
