//! Shared fixtures for the integration tests: a transport that records every
//! send, a preassembled stack, and request builders.

// Each integration binary uses its own subset of these helpers.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use sip_transaction_core::{
    Address, CSeq, ConnectionRef, Message, Method, Request, Response, StackConfig,
    TransactionEvent, TransactionStack, Transport, TransportError, Via,
};

/// Transport stub that records outbound messages instead of sending them.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<Message>>,
}

impl RecordingTransport {
    pub fn sent(&self) -> Vec<Message> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_requests(&self) -> Vec<Request> {
        self.sent()
            .into_iter()
            .filter_map(|m| match m {
                Message::Request(r) => Some(r),
                Message::Response(_) => None,
            })
            .collect()
    }

    pub fn sent_responses(&self) -> Vec<Response> {
        self.sent()
            .into_iter()
            .filter_map(|m| match m {
                Message::Response(r) => Some(r),
                Message::Request(_) => None,
            })
            .collect()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(
        &self,
        message: Message,
        _connection: &ConnectionRef,
    ) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}

pub struct TestEnvironment {
    pub stack: TransactionStack,
    pub transport: Arc<RecordingTransport>,
    pub events: mpsc::Receiver<TransactionEvent>,
    pub connection: ConnectionRef,
}

impl TestEnvironment {
    pub fn new() -> Self {
        Self::with_config(StackConfig::default())
    }

    pub fn with_config(config: StackConfig) -> Self {
        init_tracing();
        let transport = Arc::new(RecordingTransport::default());
        let (stack, events) = TransactionStack::new(config, transport.clone());
        let peer: SocketAddr = "192.0.2.50:5060".parse().unwrap();
        TestEnvironment {
            stack,
            transport,
            events,
            connection: ConnectionRef::new(1, peer, false),
        }
    }

    /// A reliable (TCP-like) connection to the same peer.
    pub fn reliable_connection(&self) -> ConnectionRef {
        ConnectionRef::new(2, self.connection.peer, true)
    }

    pub async fn next_event(&mut self) -> TransactionEvent {
        tokio::time::timeout(Duration::from_secs(5), self.events.recv())
            .await
            .expect("timed out waiting for a transaction event")
            .expect("event channel closed")
    }

    /// Skips events until one matches `pred`. Panics after 32 non-matching
    /// events so a missing event fails fast instead of hanging.
    pub async fn expect_event<F>(&mut self, mut pred: F) -> TransactionEvent
    where
        F: FnMut(&TransactionEvent) -> bool,
    {
        for _ in 0..32 {
            let event = self.next_event().await;
            if pred(&event) {
                return event;
            }
        }
        panic!("expected event did not arrive within 32 events");
    }

    /// Lets spawned tasks and the command loop catch up under paused time.
    pub async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(10)).await;
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }
}

/// Routes crate tracing into the test harness's captured output. Later calls
/// are no-ops once a subscriber is installed.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

pub fn request_with(method: Method, branch: &str) -> Request {
    let cseq_method = method.clone();
    Request {
        method,
        uri: "sip:bob@example.com".to_string(),
        via: vec![Via::new("UDP", "alice.example.com:5060", Some(branch.to_string()))],
        from: Address::new("sip:alice@example.com", Some("from-tag-1".to_string())),
        to: Address::new("sip:bob@example.com", None),
        call_id: "it-call-1".to_string(),
        cseq: CSeq::new(1, cseq_method),
        body: Vec::new(),
    }
}

pub fn invite_request(branch: &str) -> Request {
    request_with(Method::Invite, branch)
}
