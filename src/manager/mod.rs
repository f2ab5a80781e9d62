//! The transaction stack facade.
//!
//! [`TransactionStack`] is the single entry point for both directions of
//! traffic: the transport layer feeds inbound messages into
//! [`TransactionStack::process_transport_message`], the TU sends through
//! [`TransactionStack::send_request`] and [`TransactionStack::send_response`],
//! and everything the TU needs to observe comes back on the event channel
//! returned at construction.
//!
//! Concurrency follows one rule: a transaction's state machine only ever runs
//! under its registry entry guard, and the guard is dropped before any await.
//! Timer firings do not mutate state on the timer task; they post a
//! [`TimerPolicy`] record into the command loop, which re-validates the
//! transaction's identity and arming generation before feeding the machine.
//! A timer cancelled or re-armed between firing and processing is a no-op.

pub(crate) mod registry;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, trace, warn};

use crate::builders::{generate_branch, response_for_request};
use crate::client::{ClientInviteTransaction, ClientNonInviteTransaction};
use crate::config::StackConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::message::{Message, Method, Request, Response, StatusCode};
use crate::server::{ServerInviteTransaction, ServerNonInviteTransaction};
use crate::timer::{TimerKind, TimerPolicy, TimerService, TokioTimerService};
use crate::transaction::{
    FsmAction, MergedRequestKey, TransactionEvent, TransactionKey, TransactionKind,
    TransactionRole, TransactionState,
};
use crate::transport::{ConnectionRef, Transport};

use registry::{InsertOutcome, TransactionEntry, TransactionFsm, TransactionRegistry};

/// Work posted back into the stack's command loop.
#[derive(Debug)]
enum StackCommand {
    TimerFired(TimerPolicy),
}

/// Deferred output of one locked state-machine step: everything that must
/// happen after the entry guard is released.
#[derive(Debug, Default)]
struct Effects {
    sends: Vec<Message>,
    events: Vec<TransactionEvent>,
    terminated: bool,
}

/// The RFC 3261 section 17 transaction layer. Cheap to clone; all clones
/// share one registry, transport, and event channel.
#[derive(Debug, Clone)]
pub struct TransactionStack {
    inner: Arc<StackInner>,
}

#[derive(Debug)]
struct StackInner {
    config: StackConfig,
    registry: TransactionRegistry,
    transport: Arc<dyn Transport>,
    timers: Arc<dyn TimerService>,
    dispatcher: Dispatcher,
    commands_tx: mpsc::Sender<StackCommand>,
    shut_down: AtomicBool,
}

impl TransactionStack {
    /// Creates a stack over `transport` with tokio-backed timers. The
    /// returned receiver carries every [`TransactionEvent`] for the TU.
    pub fn new(
        config: StackConfig,
        transport: Arc<dyn Transport>,
    ) -> (Self, mpsc::Receiver<TransactionEvent>) {
        Self::with_timer_service(config, transport, Arc::new(TokioTimerService::new()))
    }

    pub fn with_timer_service(
        config: StackConfig,
        transport: Arc<dyn Transport>,
        timers: Arc<dyn TimerService>,
    ) -> (Self, mpsc::Receiver<TransactionEvent>) {
        let (events_tx, events_rx) = mpsc::channel(config.event_channel_capacity);
        let (commands_tx, mut commands_rx) = mpsc::channel(config.command_channel_capacity);

        let inner = Arc::new(StackInner {
            config,
            registry: TransactionRegistry::new(),
            transport,
            timers,
            dispatcher: Dispatcher::new(events_tx),
            commands_tx,
            shut_down: AtomicBool::new(false),
        });

        // The command loop holds only a weak reference: once every stack
        // clone is gone the loop's senders dry up and it exits.
        let weak = Arc::downgrade(&inner);
        tokio::spawn(async move {
            while let Some(command) = commands_rx.recv().await {
                let Some(inner) = weak.upgrade() else { break };
                match command {
                    StackCommand::TimerFired(policy) => inner.on_timer_fired(policy).await,
                }
            }
        });

        (TransactionStack { inner }, events_rx)
    }

    /// Inbound entry point, called by the transport layer for every parsed
    /// message. Correlation failures never surface as errors here; they are
    /// resolved with protocol fallbacks (stray dispatch, 481, 482).
    pub async fn process_transport_message(&self, message: Message, connection: ConnectionRef) {
        if self.inner.shut_down.load(Ordering::SeqCst) {
            debug!("stack shut down, dropping inbound message");
            return;
        }
        match message {
            Message::Request(request) => self.inner.on_inbound_request(request, connection).await,
            Message::Response(response) => {
                self.inner.on_inbound_response(response, connection).await
            }
        }
    }

    /// Outbound entry point for TU requests. ACKs go straight to the
    /// transport; a CANCEL first arms the cancel timer on the INVITE client
    /// transaction it targets, then runs as its own non-INVITE transaction;
    /// everything else creates a client transaction. Returns the key under
    /// which responses will correlate.
    pub async fn send_request(
        &self,
        mut request: Request,
        connection: ConnectionRef,
    ) -> Result<TransactionKey> {
        if self.inner.shut_down.load(Ordering::SeqCst) {
            return Err(Error::ShutDown);
        }
        if request.branch().is_none() {
            if let Some(via) = request.via.first_mut() {
                via.branch = Some(generate_branch());
            }
        }
        match request.method {
            Method::Ack => {
                let key = TransactionKey::from_request(&request);
                self.inner.transport.send(request.into(), &connection).await?;
                Ok(key)
            }
            Method::Cancel => {
                let invite_key = TransactionKey::for_cancelled_invite(&request);
                let armed = self
                    .inner
                    .feed(TransactionRole::Client, &invite_key, None, |fsm| {
                        fsm.on_cancel_requested()
                    })
                    .await;
                if !armed {
                    warn!(key = %invite_key, "dropping CANCEL with no matching INVITE client transaction");
                    return Err(Error::TransactionNotFound(invite_key));
                }
                self.inner.start_client_transaction(request, connection).await
            }
            _ => self.inner.start_client_transaction(request, connection).await,
        }
    }

    /// Routes a TU response into the server transaction that owns `key`.
    pub async fn send_response(&self, key: &TransactionKey, response: Response) -> Result<()> {
        if self.inner.shut_down.load(Ordering::SeqCst) {
            return Err(Error::ShutDown);
        }
        let fed = self
            .inner
            .feed(TransactionRole::Server, key, None, move |fsm| {
                fsm.on_send_response(response)
            })
            .await;
        if fed {
            Ok(())
        } else {
            Err(Error::TransactionNotFound(key.clone()))
        }
    }

    /// Current state of a live transaction, if one holds the key.
    pub fn transaction_state(
        &self,
        role: TransactionRole,
        key: &TransactionKey,
    ) -> Option<TransactionState> {
        self.inner
            .registry
            .get_mut(role, key)
            .map(|entry| entry.fsm.state())
    }

    /// Number of live transactions of the given role.
    pub fn active_transactions(&self, role: TransactionRole) -> usize {
        self.inner.registry.len(role)
    }

    /// Stops accepting work and drops every live transaction, cancelling all
    /// armed timers. Idempotent.
    pub fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.registry.clear();
        debug!("transaction stack shut down");
    }
}

impl StackInner {
    async fn on_inbound_request(&self, request: Request, connection: ConnectionRef) {
        let key = TransactionKey::from_request(&request);

        // ACK first: it either lands in an INVITE server transaction waiting
        // in Completed, or it is the ACK to a 2xx and belongs to the TU. It
        // must never be answered, so it bypasses the merged-request check.
        if request.method == Method::Ack {
            let ack = request.clone();
            let consumed = self
                .feed(TransactionRole::Server, &key, Some(&connection), move |fsm| {
                    fsm.on_ack(ack)
                })
                .await;
            if !consumed {
                trace!(%key, "ACK without server transaction, dispatching to TU");
                self.dispatcher
                    .dispatch(TransactionEvent::StrayAck { request, connection });
            }
            return;
        }

        if request.method == Method::Cancel {
            self.on_inbound_cancel(request, connection).await;
            return;
        }

        // A live server transaction absorbs the retransmission internally.
        let retransmission = self
            .feed(TransactionRole::Server, &key, Some(&connection), |fsm| {
                fsm.on_request_retransmission()
            })
            .await;
        if retransmission {
            return;
        }

        // Merged-request detection (RFC 3261 section 8.2.2.2): a second copy
        // of a pending untagged request, arriving on a different branch, is a
        // forked duplicate and gets 482 without a transaction.
        let merged = (self.config.auto_482_on_merged_requests && request.to_tag().is_none())
            .then(|| MergedRequestKey::from_request(&request));
        if let Some(merged_key) = &merged {
            if !self.registry.try_mark_pending(merged_key.clone(), key.clone()) {
                debug!(%key, merged = %merged_key, "merged request, answering 482");
                let response = response_for_request(StatusCode::LOOP_DETECTED, &request);
                if let Err(error) = self.transport.send(response.into(), &connection).await {
                    warn!(%key, %error, "failed to send 482");
                }
                return;
            }
        }

        let reliable = connection.reliable;
        let fsm = if request.method == Method::Invite {
            TransactionFsm::InviteServer(ServerInviteTransaction::new(
                request,
                self.config.timers,
                reliable,
            ))
        } else {
            TransactionFsm::NonInviteServer(ServerNonInviteTransaction::new(
                request,
                self.config.timers,
                reliable,
            ))
        };
        let mut entry = TransactionEntry::new(fsm, connection.clone());
        entry.merged_key = merged;

        match self
            .registry
            .put_if_absent(TransactionRole::Server, key.clone(), entry)
        {
            InsertOutcome::Inserted => {
                debug!(%key, "server transaction created");
                self.feed(TransactionRole::Server, &key, None, |fsm| fsm.start())
                    .await;
            }
            InsertOutcome::AlreadyPresent => {
                // Lost the admission race; the winner holds the same key (and
                // the same merged mark), so this copy is a retransmission.
                self.feed(TransactionRole::Server, &key, Some(&connection), |fsm| {
                    fsm.on_request_retransmission()
                })
                .await;
            }
        }
    }

    /// Inbound CANCEL: correlates to the INVITE server transaction on the
    /// cancelled branch. Without one there is nothing to cancel and the peer
    /// gets 481 with the failure appended to the reason phrase.
    async fn on_inbound_cancel(&self, request: Request, connection: ConnectionRef) {
        let invite_key = TransactionKey::for_cancelled_invite(&request);
        let cancel = request.clone();
        let correlated = self
            .feed(TransactionRole::Server, &invite_key, Some(&connection), move |fsm| {
                fsm.on_cancel_received(cancel)
            })
            .await;
        if correlated {
            return;
        }
        warn!(key = %invite_key, "CANCEL without matching INVITE transaction, answering 481");
        let mut response =
            response_for_request(StatusCode::CALL_OR_TRANSACTION_DOES_NOT_EXIST, &request);
        response.reason = format!("{} (no INVITE transaction for CANCEL)", response.reason);
        if let Err(error) = self.transport.send(response.into(), &connection).await {
            warn!(key = %invite_key, %error, "failed to send 481");
        }
    }

    async fn on_inbound_response(&self, response: Response, connection: ConnectionRef) {
        let key = TransactionKey::from_response(&response);
        let correlated = {
            let fed = response.clone();
            self.feed(TransactionRole::Client, &key, Some(&connection), move |fsm| {
                fsm.on_response(fed)
            })
            .await
        };
        if !correlated {
            // RFC 3261 section 18.1.2: not an error, the TU decides.
            trace!(%key, "stray response, dispatching to TU");
            self.dispatcher
                .dispatch(TransactionEvent::StrayResponse { response, connection });
        }
    }

    async fn start_client_transaction(
        &self,
        request: Request,
        connection: ConnectionRef,
    ) -> Result<TransactionKey> {
        let key = TransactionKey::from_request(&request);
        let reliable = connection.reliable;
        let fsm = if request.method == Method::Invite {
            TransactionFsm::InviteClient(ClientInviteTransaction::new(
                request,
                self.config.timers,
                reliable,
            ))
        } else {
            TransactionFsm::NonInviteClient(ClientNonInviteTransaction::new(
                request,
                self.config.timers,
                reliable,
            ))
        };
        let entry = TransactionEntry::new(fsm, connection.clone());
        match self
            .registry
            .put_if_absent(TransactionRole::Client, key.clone(), entry)
        {
            InsertOutcome::Inserted => {}
            InsertOutcome::AlreadyPresent => {
                // A live transaction under this key means the caller computed
                // a non-unique branch. Never overwrite it.
                debug_assert!(false, "client transaction collision: {}", key);
                error!(%key, "client transaction collision");
                return Err(Error::DuplicateTransaction(key));
            }
        }
        debug!(%key, "client transaction created");
        self.feed(TransactionRole::Client, &key, None, |fsm| fsm.start())
            .await;
        Ok(key)
    }

    /// Runs `f` against the transaction's machine under its entry guard, then
    /// applies the deferred effects. Returns false when no live transaction
    /// holds the key.
    async fn feed<F>(
        &self,
        role: TransactionRole,
        key: &TransactionKey,
        connection: Option<&ConnectionRef>,
        f: F,
    ) -> bool
    where
        F: FnOnce(&mut TransactionFsm) -> Vec<FsmAction>,
    {
        let result = self.process_locked(role, key, |entry| {
            if let Some(connection) = connection {
                entry.connection = connection.clone();
            }
            Some(f(&mut entry.fsm))
        });
        match result {
            Some((effects, connection)) => {
                self.apply_effects(role, key, &connection, effects).await;
                true
            }
            None => false,
        }
    }

    /// The locked step: state machine and timer bookkeeping run under the
    /// entry guard; sends and TU events are deferred into [`Effects`]. The
    /// guard never survives past this function.
    fn process_locked<F>(
        &self,
        role: TransactionRole,
        key: &TransactionKey,
        f: F,
    ) -> Option<(Effects, ConnectionRef)>
    where
        F: FnOnce(&mut TransactionEntry) -> Option<Vec<FsmAction>>,
    {
        let mut guard = self.registry.get_mut(role, key)?;
        let entry = guard.value_mut();
        let before = entry.fsm.state();
        let actions = f(&mut *entry)?;
        let after = entry.fsm.state();

        let mut effects = Effects::default();
        for action in actions {
            match action {
                FsmAction::Send(message) => effects.sends.push(message),
                FsmAction::Schedule { kind, duration } => {
                    self.schedule_timer(&mut *entry, role, key, kind, duration)
                }
                FsmAction::CancelTimer(kind) => {
                    // Dropping the handle disarms the underlying timer.
                    entry.timers.remove(&kind);
                }
                FsmAction::DeliverProvisional(response) => {
                    effects.events.push(TransactionEvent::ProvisionalResponse {
                        transaction_id: key.clone(),
                        response,
                    })
                }
                FsmAction::DeliverFinal(response) => {
                    let event = if response.status.is_success() {
                        TransactionEvent::SuccessResponse {
                            transaction_id: key.clone(),
                            response,
                        }
                    } else {
                        TransactionEvent::FailureResponse {
                            transaction_id: key.clone(),
                            response,
                        }
                    };
                    effects.events.push(event);
                }
                FsmAction::DeliverRequest(request) => {
                    let event = match entry.fsm.kind() {
                        TransactionKind::InviteServer => TransactionEvent::InviteRequest {
                            transaction_id: key.clone(),
                            request,
                            connection: entry.connection.clone(),
                        },
                        _ => TransactionEvent::NonInviteRequest {
                            transaction_id: key.clone(),
                            request,
                            connection: entry.connection.clone(),
                        },
                    };
                    effects.events.push(event);
                }
                FsmAction::DeliverAck(request) => effects.events.push(TransactionEvent::AckReceived {
                    transaction_id: key.clone(),
                    request,
                }),
                FsmAction::DeliverCancel(cancel) => {
                    effects.events.push(TransactionEvent::CancelReceived {
                        transaction_id: key.clone(),
                        cancel,
                    })
                }
                FsmAction::Timeout(timer) => {
                    effects.events.push(TransactionEvent::TransactionTimeout {
                        transaction_id: key.clone(),
                        timer,
                    })
                }
                FsmAction::Terminate => effects.terminated = true,
            }
        }
        if after != before {
            effects.events.push(TransactionEvent::StateChanged {
                transaction_id: key.clone(),
                previous_state: before,
                new_state: after,
            });
        }
        let connection = entry.connection.clone();
        Some((effects, connection))
    }

    /// Arms one timer for `entry`, bumping its generation so any in-flight
    /// firing of the previous arming is rejected by the command loop.
    fn schedule_timer(
        &self,
        entry: &mut TransactionEntry,
        role: TransactionRole,
        key: &TransactionKey,
        kind: TimerKind,
        duration: Duration,
    ) {
        entry.generation += 1;
        let policy = TimerPolicy {
            key: key.clone(),
            role,
            kind,
            transaction_id: entry.id,
            generation: entry.generation,
        };
        trace!(%key, timer = %kind, ?duration, "arming timer");
        let commands_tx = self.commands_tx.clone();
        let handle = self.timers.schedule(
            duration,
            Box::new(move || {
                if commands_tx
                    .try_send(StackCommand::TimerFired(policy))
                    .is_err()
                {
                    debug!("command channel unavailable, dropping timer firing");
                }
            }),
        );
        entry.timers.insert(kind, (entry.generation, handle));
    }

    /// Command-loop half of timer handling: re-validate, then feed the
    /// machine. Identity and generation checks make a stale firing a no-op.
    async fn on_timer_fired(&self, policy: TimerPolicy) {
        if self.shut_down.load(Ordering::SeqCst) {
            return;
        }
        let TimerPolicy {
            key,
            role,
            kind,
            transaction_id,
            generation,
        } = policy;

        let result = self.process_locked(role, &key, |entry| {
            if entry.id != transaction_id {
                return None;
            }
            match entry.timers.get(&kind) {
                Some((armed, _)) if *armed == generation => {}
                _ => return None,
            }
            entry.timers.remove(&kind);
            Some(entry.fsm.on_timer(kind))
        });
        let Some((effects, connection)) = result else {
            trace!(%key, timer = %kind, "stale timer firing ignored");
            return;
        };
        self.apply_effects(role, &key, &connection, effects).await;
    }

    /// Applies what a locked step deferred: TU events, registry removal on
    /// termination, then transport sends. A failed send terminates the
    /// transaction and reports a transport error upward; it is never retried.
    async fn apply_effects(
        &self,
        role: TransactionRole,
        key: &TransactionKey,
        connection: &ConnectionRef,
        effects: Effects,
    ) {
        for event in effects.events {
            self.dispatcher.dispatch(event);
        }
        if effects.terminated {
            self.finish_transaction(role, key);
        }
        for message in effects.sends {
            if let Err(error) = self.transport.send(message, connection).await {
                warn!(%key, %error, "transport send failed");
                self.fail_transaction(role, key).await;
                return;
            }
        }
    }

    /// Transport failure path: the TU hears about the failure first, then the
    /// machine (if the entry is still live) jumps to Terminated. The entry may
    /// already be gone when the failed send belonged to a terminating step,
    /// such as an INVITE server 2xx; the event is owed either way. The failure
    /// paths emit no sends, so this cannot re-enter itself.
    async fn fail_transaction(&self, role: TransactionRole, key: &TransactionKey) {
        self.dispatcher.dispatch(TransactionEvent::TransportError {
            transaction_id: key.clone(),
        });
        let result = self.process_locked(role, key, |entry| Some(entry.fsm.on_transport_error()));
        let Some((effects, _)) = result else { return };
        for event in effects.events {
            self.dispatcher.dispatch(event);
        }
        if effects.terminated {
            self.finish_transaction(role, key);
        }
    }

    /// Removes a terminated transaction. Dropping the entry disarms its
    /// remaining timers; the merged-request mark is released if this
    /// transaction holds it.
    fn finish_transaction(&self, role: TransactionRole, key: &TransactionKey) {
        if let Some(entry) = self.registry.remove(role, key) {
            if let Some(merged) = &entry.merged_key {
                self.registry.clear_pending(merged, key);
            }
            debug!(%key, id = %entry.id, "transaction terminated");
            self.dispatcher.dispatch(TransactionEvent::TransactionTerminated {
                transaction_id: key.clone(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Address, CSeq, Via};
    use crate::transport::TransportError;
    use async_trait::async_trait;
    use std::net::SocketAddr;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct MockTransport {
        sent: Mutex<Vec<Message>>,
        fail: Mutex<bool>,
    }

    impl MockTransport {
        fn sent(&self) -> Vec<Message> {
            self.sent.lock().unwrap().clone()
        }

        fn fail_next_sends(&self) {
            *self.fail.lock().unwrap() = true;
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(
            &self,
            message: Message,
            _connection: &ConnectionRef,
        ) -> std::result::Result<(), TransportError> {
            if *self.fail.lock().unwrap() {
                return Err(TransportError::ConnectionClosed);
            }
            self.sent.lock().unwrap().push(message);
            Ok(())
        }
    }

    fn connection() -> ConnectionRef {
        let peer: SocketAddr = "192.0.2.10:5060".parse().unwrap();
        ConnectionRef::new(7, peer, false)
    }

    fn options_request(branch: &str) -> Request {
        Request {
            method: Method::Options,
            uri: "sip:bob@example.com".to_string(),
            via: vec![Via::new("UDP", "alice:5060", Some(branch.to_string()))],
            from: Address::new("sip:alice@example.com", Some("f-mgr".to_string())),
            to: Address::new("sip:bob@example.com", None),
            call_id: "mgr-1".to_string(),
            cseq: CSeq::new(1, Method::Options),
            body: Vec::new(),
        }
    }

    fn invite_request(branch: &str) -> Request {
        let mut request = options_request(branch);
        request.method = Method::Invite;
        request.cseq = CSeq::new(1, Method::Invite);
        request
    }

    fn stack_with(transport: Arc<MockTransport>) -> (TransactionStack, mpsc::Receiver<TransactionEvent>) {
        TransactionStack::new(StackConfig::default(), transport)
    }

    #[tokio::test(start_paused = true)]
    async fn outbound_request_creates_a_client_transaction_and_sends() {
        let transport = Arc::new(MockTransport::default());
        let (stack, _events) = stack_with(transport.clone());

        let key = stack
            .send_request(options_request("z9hG4bK-out"), connection())
            .await
            .unwrap();
        assert_eq!(
            stack.transaction_state(TransactionRole::Client, &key),
            Some(TransactionState::Trying)
        );
        assert_eq!(transport.sent().len(), 1);
    }

    // The collision path is a debug assertion, so a duplicate outbound key
    // panics in test builds (and returns DuplicateTransaction in release).
    #[tokio::test(start_paused = true)]
    #[should_panic(expected = "client transaction collision")]
    async fn duplicate_outbound_key_fails_loudly() {
        let transport = Arc::new(MockTransport::default());
        let (stack, _events) = stack_with(transport);

        stack
            .send_request(options_request("z9hG4bK-dup"), connection())
            .await
            .unwrap();
        let _ = stack
            .send_request(options_request("z9hG4bK-dup"), connection())
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn inbound_request_creates_a_server_transaction() {
        let transport = Arc::new(MockTransport::default());
        let (stack, mut events) = stack_with(transport);

        let request = options_request("z9hG4bK-in");
        let key = TransactionKey::from_request(&request);
        stack
            .process_transport_message(request.into(), connection())
            .await;

        assert_eq!(
            stack.transaction_state(TransactionRole::Server, &key),
            Some(TransactionState::Trying)
        );
        match events.recv().await {
            Some(TransactionEvent::NonInviteRequest { transaction_id, .. }) => {
                assert_eq!(transaction_id, key)
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failure_terminates_the_transaction() {
        let transport = Arc::new(MockTransport::default());
        let (stack, mut events) = stack_with(transport.clone());

        transport.fail_next_sends();
        let key = stack
            .send_request(options_request("z9hG4bK-fail"), connection())
            .await
            .unwrap();

        assert_eq!(stack.transaction_state(TransactionRole::Client, &key), None);
        let mut saw_transport_error = false;
        let mut saw_terminated = false;
        while let Ok(Some(event)) =
            tokio::time::timeout(Duration::from_secs(1), events.recv()).await
        {
            match event {
                TransactionEvent::TransportError { .. } => saw_transport_error = true,
                TransactionEvent::TransactionTerminated { .. } => saw_terminated = true,
                _ => {}
            }
            if saw_transport_error && saw_terminated {
                break;
            }
        }
        assert!(saw_transport_error && saw_terminated);
    }

    // An INVITE server 2xx terminates the entry before its send runs, so a
    // send failure must still surface even with the entry already gone.
    #[tokio::test(start_paused = true)]
    async fn send_failure_on_a_terminating_step_reaches_the_tu() {
        let transport = Arc::new(MockTransport::default());
        let (stack, mut events) = stack_with(transport.clone());

        let invite = invite_request("z9hG4bK-2xx-fail");
        let key = TransactionKey::from_request(&invite);
        stack
            .process_transport_message(invite.clone().into(), connection())
            .await;
        assert_eq!(
            stack.transaction_state(TransactionRole::Server, &key),
            Some(TransactionState::Proceeding)
        );

        transport.fail_next_sends();
        let mut ok = response_for_request(StatusCode::OK, &invite);
        ok.to.tag = Some("srv-tag".to_string());
        stack.send_response(&key, ok).await.unwrap();

        let mut saw_transport_error = false;
        while let Ok(Some(event)) =
            tokio::time::timeout(Duration::from_secs(1), events.recv()).await
        {
            if matches!(event, TransactionEvent::TransportError { .. }) {
                saw_transport_error = true;
                break;
            }
        }
        assert!(saw_transport_error);
        assert_eq!(stack.transaction_state(TransactionRole::Server, &key), None);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_drops_live_transactions() {
        let transport = Arc::new(MockTransport::default());
        let (stack, _events) = stack_with(transport);

        stack
            .send_request(options_request("z9hG4bK-shut"), connection())
            .await
            .unwrap();
        assert_eq!(stack.active_transactions(TransactionRole::Client), 1);

        stack.shutdown();
        assert_eq!(stack.active_transactions(TransactionRole::Client), 0);
        assert!(matches!(
            stack
                .send_request(options_request("z9hG4bK-late"), connection())
                .await,
            Err(Error::ShutDown)
        ));
    }
}
