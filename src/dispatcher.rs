//! Delivery of transaction events to the TU.
//!
//! A small value type holding only the event sender it needs. Delivery is
//! handed off to a spawned task so neither the transport-read path nor the
//! timer path ever blocks on a slow TU.

use tokio::sync::mpsc;
use tracing::debug;

use crate::transaction::TransactionEvent;

/// Dispatches [`TransactionEvent`]s to the transaction user off the calling
/// thread. Cloning is cheap; every clone feeds the same TU channel.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    events_tx: mpsc::Sender<TransactionEvent>,
}

impl Dispatcher {
    pub fn new(events_tx: mpsc::Sender<TransactionEvent>) -> Self {
        Dispatcher { events_tx }
    }

    /// Queues an event for the TU without blocking the caller. Delivery stays
    /// in dispatch order unless the channel is full, in which case the event
    /// is handed to a task that waits for capacity. A closed TU channel means
    /// shutdown is underway; the event is dropped quietly.
    pub fn dispatch(&self, event: TransactionEvent) {
        match self.events_tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                let tx = self.events_tx.clone();
                tokio::spawn(async move {
                    if tx.send(event).await.is_err() {
                        debug!("TU event channel closed, dropping event");
                    }
                });
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("TU event channel closed, dropping event");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Method;
    use crate::transaction::TransactionKey;

    #[tokio::test]
    async fn delivers_in_dispatch_order() {
        let (tx, mut rx) = mpsc::channel(4);
        let dispatcher = Dispatcher::new(tx);

        let first = TransactionKey::Branch {
            branch: "z9hG4bK-d1".to_string(),
            method: Method::Options,
        };
        let second = TransactionKey::Branch {
            branch: "z9hG4bK-d2".to_string(),
            method: Method::Options,
        };
        dispatcher.dispatch(TransactionEvent::TransactionTerminated {
            transaction_id: first.clone(),
        });
        dispatcher.dispatch(TransactionEvent::TransactionTerminated {
            transaction_id: second.clone(),
        });

        for expected in [first, second] {
            match rx.recv().await {
                Some(TransactionEvent::TransactionTerminated { transaction_id }) => {
                    assert_eq!(transaction_id, expected)
                }
                other => panic!("unexpected event: {:?}", other),
            }
        }
    }
}
