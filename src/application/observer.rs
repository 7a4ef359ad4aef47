use crate::domain::attempt::AttemptToken;
use crate::domain::ports::{PaymentQueue, QueueEvent};
use crate::domain::transaction::{Transaction, TransactionState};
use crate::error::Result;
use tokio::sync::mpsc;
use tracing::trace;

/// Where a settled or failed transaction belongs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// The in-flight attempt for the transaction's product.
    Attempt(AttemptToken),
    /// The restore cycle currently running.
    RestoreCycle,
    /// No owner; processed as an implicit restore (e.g. relaunch mid-purchase).
    Unmatched,
}

/// Classification of one queue transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    /// Still being charged; nothing to do yet.
    Purchasing(Transaction),
    /// Waiting on an outside approval. Not a failure.
    Deferred(Transaction, Route),
    /// Purchased or restored, receipt attached.
    Settled(Transaction, Route),
    Failed(Transaction, Route),
}

/// Subscription to the platform transaction queue.
///
/// The observer only reads and classifies; finalizing is left to the
/// coordinator once a transaction has been fully processed.
pub struct TransactionObserver {
    events: mpsc::UnboundedReceiver<QueueEvent>,
}

impl TransactionObserver {
    pub async fn subscribe(queue: &dyn PaymentQueue) -> Result<Self> {
        let events = queue.subscribe().await?;
        Ok(Self { events })
    }

    /// Next queue event, or `None` once the platform closed the subscription.
    pub async fn next(&mut self) -> Option<QueueEvent> {
        self.events.recv().await
    }

    /// Classifies `tx` given the token of the attempt waiting on its product
    /// (if any) and whether a restore cycle is running.
    ///
    /// A transaction that echoes a token must echo the waiting attempt's token
    /// to be routed to it. Restored transactions go to a running restore cycle
    /// before any attempt.
    pub fn classify(tx: Transaction, waiting: Option<AttemptToken>, restoring: bool) -> Signal {
        let route = match (tx.state, waiting) {
            (TransactionState::Restored, _) if restoring => Route::RestoreCycle,
            (_, Some(token)) if tx.attempt.is_none_or(|echoed| echoed == token) => {
                Route::Attempt(token)
            }
            _ => Route::Unmatched,
        };
        trace!(transaction = %tx.id, product = %tx.product, state = ?tx.state, ?route, "classified");

        match tx.state {
            TransactionState::Purchasing => Signal::Purchasing(tx),
            TransactionState::Deferred => Signal::Deferred(tx, route),
            TransactionState::Purchased | TransactionState::Restored => Signal::Settled(tx, route),
            TransactionState::Failed => Signal::Failed(tx, route),
        }
    }
}
