use super::catalog::ProductCatalog;
use super::notifier::{DelegateNotifier, PurchaseDelegate};
use super::observer::{Route, Signal, TransactionObserver};
use super::validator::ReceiptValidator;
use crate::config::RetryPolicy;
use crate::domain::attempt::{AttemptTable, AttemptToken, Phase};
use crate::domain::outcome::{FailureReason, OutcomeStatus, PurchaseOutcome, RestoreSummary};
use crate::domain::ports::{PaymentQueueBox, PaymentRequest, QueueEvent};
use crate::domain::product::{Product, ProductId};
use crate::domain::receipt::ReceiptVerdict;
use crate::domain::transaction::{PaymentFailure, Transaction, TransactionId, TransactionState};
use crate::error::{PurchaseError, Result};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const AWAITING: &[Phase] = &[Phase::RequestingPayment, Phase::AwaitingTransaction];

/// First attempt token of this process. Tokens count up from the launch time,
/// so a transaction echoing a token from an earlier run never matches an
/// attempt of this one.
fn token_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| (d.as_millis() as u64) << 16)
        .unwrap_or(1)
}

#[derive(Default)]
struct RestoreCycle {
    /// Replayed transactions still being validated.
    in_flight: usize,
    /// The platform has signalled the end of the replay.
    replay_done: bool,
    summary: RestoreSummary,
}

/// Drives purchases from payment submission to a single delegate notification.
///
/// Collaborators are injected so tests can substitute fakes; use
/// [`crate::application::handle`] for a process-wide instance. Methods that
/// spawn work take `self: &Arc<Self>`.
pub struct PurchaseCoordinator {
    catalog: ProductCatalog,
    queue: PaymentQueueBox,
    validator: ReceiptValidator,
    retry: RetryPolicy,
    notifier: DelegateNotifier,
    attempts: Mutex<AttemptTable>,
    /// Transactions currently being validated or failed out.
    processing: Mutex<HashSet<TransactionId>>,
    finalized: Mutex<HashSet<TransactionId>>,
    restore: Mutex<Option<RestoreCycle>>,
    next_token: AtomicU64,
    observer_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl PurchaseCoordinator {
    /// Creates a coordinator. Call [`PurchaseCoordinator::start`] before
    /// expecting any outcome.
    ///
    /// # Arguments
    ///
    /// * `catalog` - Product metadata, consulted before every purchase.
    /// * `queue` - The platform payment service and transaction queue.
    /// * `validator` - Receipt checks run before content is released.
    /// * `retry` - Backoff applied to transient verifier errors.
    pub fn new(
        catalog: ProductCatalog,
        queue: PaymentQueueBox,
        validator: ReceiptValidator,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            catalog,
            queue,
            validator,
            retry,
            notifier: DelegateNotifier::new(),
            attempts: Mutex::new(AttemptTable::new()),
            processing: Mutex::new(HashSet::new()),
            finalized: Mutex::new(HashSet::new()),
            restore: Mutex::new(None),
            next_token: AtomicU64::new(token_seed()),
            observer_task: std::sync::Mutex::new(None),
        }
    }

    /// Registers the delegate without taking ownership of it.
    pub fn set_delegate(&self, delegate: &Arc<dyn PurchaseDelegate>) {
        self.notifier.register(delegate);
    }

    pub fn clear_delegate(&self) {
        self.notifier.unregister();
    }

    /// Subscribes to the transaction queue and starts processing updates.
    ///
    /// Unfinished transactions left on the queue by a previous run are
    /// delivered first and processed as implicit restores.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        // Its end-of-replay signal went to the previous subscription.
        if self.restore.lock().await.take().is_some() {
            warn!("restore cycle from a previous subscription discarded");
        }

        let mut observer = TransactionObserver::subscribe(self.queue.as_ref()).await?;
        let this: Weak<Self> = Arc::downgrade(self);

        let task = tokio::spawn(async move {
            while let Some(event) = observer.next().await {
                let Some(coordinator) = this.upgrade() else {
                    break;
                };
                coordinator.on_queue_event(event).await;
            }
            debug!("transaction queue subscription closed");
        });

        let mut slot = self
            .observer_task
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(previous) = slot.replace(task) {
            previous.abort();
        }
        Ok(())
    }

    /// Stops observing the queue. In-flight validations run to completion.
    pub fn stop(&self) {
        let mut slot = self
            .observer_task
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(task) = slot.take() {
            task.abort();
        }
    }

    fn observing(&self) -> bool {
        self.observer_task
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Warms the catalog cache with every configured product.
    pub async fn prefetch_catalog(&self) -> Result<Vec<Product>> {
        self.catalog.refresh().await
    }

    /// Phase of the attempt in flight for `product`, if any.
    pub async fn in_flight(&self, product: &ProductId) -> Option<Phase> {
        self.attempts.lock().await.get(product).map(|a| a.phase)
    }

    /// Starts a purchase and returns its attempt token. The outcome arrives
    /// through the delegate.
    ///
    /// # Errors
    ///
    /// * [`PurchaseError::InvalidProduct`] - unknown or unavailable product.
    /// * [`PurchaseError::CatalogUnavailable`] - the catalog had to be
    ///   refreshed and the lookup failed.
    /// * [`PurchaseError::AttemptInProgress`] - this product is already being bought.
    pub async fn purchase(self: &Arc<Self>, product: impl Into<ProductId>) -> Result<AttemptToken> {
        let product = product.into();
        self.catalog.product(&product).await?;

        let token = AttemptToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        self.attempts.lock().await.begin(product.clone(), token)?;
        info!(%product, %token, "purchase started");

        let this = Arc::clone(self);
        tokio::spawn(async move { this.submit(product, token).await });
        Ok(token)
    }

    async fn submit(&self, product: ProductId, token: AttemptToken) {
        if !self
            .attempts
            .lock()
            .await
            .transition(&product, token, &[Phase::Idle], Phase::RequestingPayment)
        {
            return;
        }

        let request = PaymentRequest {
            product: product.clone(),
            attempt: token,
        };
        match self.queue.submit(request).await {
            Ok(()) => {
                // Loses the race harmlessly if the transaction already arrived.
                self.attempts.lock().await.transition(
                    &product,
                    token,
                    &[Phase::RequestingPayment],
                    Phase::AwaitingTransaction,
                );
            }
            Err(e) => {
                warn!(%product, %token, error = %e, "payment submission failed");
                let outcome = PurchaseOutcome {
                    product: product.clone(),
                    transaction: None,
                    status: OutcomeStatus::Failed(FailureReason::PaymentSubmissionFailed(e.to_string())),
                };
                self.conclude_attempt(token, AWAITING, outcome).await;
            }
        }
    }

    /// Asks the platform to replay completed purchases. Completion is
    /// reported once through [`PurchaseDelegate::restore_finished`].
    ///
    /// # Errors
    ///
    /// * [`PurchaseError::NotStarted`] - the queue is not being observed, so
    ///   the cycle could never complete.
    /// * [`PurchaseError::RestoreInProgress`] - a cycle is already running.
    pub async fn restore_purchases(&self) -> Result<()> {
        if !self.observing() {
            return Err(PurchaseError::NotStarted);
        }
        {
            let mut restore = self.restore.lock().await;
            if restore.is_some() {
                return Err(PurchaseError::RestoreInProgress);
            }
            *restore = Some(RestoreCycle::default());
        }
        info!("restore started");

        if let Err(e) = self.queue.restore_completed().await {
            self.restore.lock().await.take();
            return Err(e);
        }
        Ok(())
    }

    async fn on_queue_event(self: &Arc<Self>, event: QueueEvent) {
        match event {
            QueueEvent::Updated(transactions) => {
                for tx in transactions {
                    self.dispatch(tx).await;
                }
            }
            QueueEvent::RestoreFinished => self.close_replay(None).await,
            QueueEvent::RestoreFailed(reason) => self.close_replay(Some(reason)).await,
        }
    }

    async fn dispatch(self: &Arc<Self>, tx: Transaction) {
        let finalized = self.finalized.lock().await.contains(&tx.id);
        let processing = self.processing.lock().await.contains(&tx.id);
        if finalized || processing {
            debug!(transaction = %tx.id, "redelivered transaction ignored");
            return;
        }

        let waiting = {
            let attempts = self.attempts.lock().await;
            attempts
                .get(&tx.product)
                .filter(|a| AWAITING.contains(&a.phase))
                .map(|a| a.token)
        };
        let restoring = self.restore.lock().await.is_some();

        match TransactionObserver::classify(tx, waiting, restoring) {
            Signal::Purchasing(_) => {}
            Signal::Deferred(tx, Route::Attempt(token)) => {
                info!(product = %tx.product, %token, "payment deferred");
                self.attempts.lock().await.transition(
                    &tx.product,
                    token,
                    &[Phase::RequestingPayment],
                    Phase::AwaitingTransaction,
                );
                self.notifier
                    .notify(|delegate| delegate.purchase_deferred(self, &tx.product));
            }
            Signal::Deferred(tx, _) => {
                debug!(transaction = %tx.id, "deferred transaction without attempt");
            }
            Signal::Settled(tx, route) => {
                let route = self.claim(&tx, route, Phase::ValidatingReceipt).await;
                let this = Arc::clone(self);
                tokio::spawn(async move { this.settle(tx, route).await });
            }
            Signal::Failed(tx, route) => {
                let route = self.claim(&tx, route, Phase::RecordingFailure).await;
                let this = Arc::clone(self);
                tokio::spawn(async move { this.fail(tx, route).await });
            }
        }
    }

    /// Marks `tx` as being processed and binds it to its route. An attempt
    /// that moved on in the meantime demotes the transaction to unmatched.
    async fn claim(&self, tx: &Transaction, route: Route, next: Phase) -> Route {
        self.processing.lock().await.insert(tx.id.clone());

        match route {
            Route::Attempt(token) => {
                if self
                    .attempts
                    .lock()
                    .await
                    .transition(&tx.product, token, AWAITING, next)
                {
                    route
                } else {
                    Route::Unmatched
                }
            }
            Route::RestoreCycle => {
                match self.restore.lock().await.as_mut() {
                    Some(cycle) => {
                        cycle.in_flight += 1;
                        route
                    }
                    None => Route::Unmatched,
                }
            }
            Route::Unmatched => route,
        }
    }

    async fn settle(&self, tx: Transaction, route: Route) {
        let receipt = tx.receipt.as_deref().unwrap_or_default();
        let validation = self.validator.validate_with_retry(receipt, &self.retry).await;
        debug!(transaction = %tx.id, verdict = ?validation.verdict, attempts = validation.attempts, "receipt validated");

        let restored = tx.state == TransactionState::Restored || !matches!(route, Route::Attempt(_));
        let status = match validation.verdict {
            ReceiptVerdict::Valid => OutcomeStatus::Succeeded { restored },
            ReceiptVerdict::Invalid => OutcomeStatus::Failed(FailureReason::ReceiptInvalid),
            ReceiptVerdict::TransientError { .. } => {
                OutcomeStatus::Failed(FailureReason::ReceiptValidationTransient {
                    attempts: validation.attempts,
                })
            }
        };

        if validation.verdict.is_terminal() {
            self.finalize(&tx.id).await;
        } else {
            warn!(transaction = %tx.id, "receipt unverified, transaction left on the queue");
        }
        self.processing.lock().await.remove(&tx.id);

        let outcome = PurchaseOutcome {
            product: tx.product,
            transaction: Some(tx.id),
            status,
        };
        self.conclude(route, &[Phase::ValidatingReceipt], outcome).await;
    }

    async fn fail(&self, tx: Transaction, route: Route) {
        let reason = match tx.failure {
            Some(PaymentFailure::Cancelled) => FailureReason::UserCancelled,
            Some(PaymentFailure::Declined(message)) => FailureReason::PaymentSubmissionFailed(message),
            None => FailureReason::PaymentSubmissionFailed("payment failed".to_string()),
        };

        self.finalize(&tx.id).await;
        self.processing.lock().await.remove(&tx.id);

        let outcome = PurchaseOutcome {
            product: tx.product,
            transaction: Some(tx.id),
            status: OutcomeStatus::Failed(reason),
        };
        self.conclude(route, &[Phase::RecordingFailure], outcome).await;
    }

    async fn conclude(&self, route: Route, expected: &[Phase], outcome: PurchaseOutcome) {
        match route {
            Route::Attempt(token) => self.conclude_attempt(token, expected, outcome).await,
            Route::RestoreCycle => self.record_restored(outcome).await,
            Route::Unmatched => {
                info!(product = %outcome.product, success = outcome.is_success(), "recovered transaction processed");
                self.notifier
                    .notify(|delegate| delegate.purchase_finished(self, &outcome));
            }
        }
    }

    /// Moves the attempt to its terminal phase, removes it, then notifies.
    /// Only the caller that wins the transition notifies.
    async fn conclude_attempt(&self, token: AttemptToken, expected: &[Phase], outcome: PurchaseOutcome) {
        let terminal = if outcome.is_success() {
            Phase::Succeeded
        } else {
            Phase::Failed
        };

        {
            let mut attempts = self.attempts.lock().await;
            if !attempts.transition(&outcome.product, token, expected, terminal) {
                debug!(product = %outcome.product, %token, "attempt already concluded");
                return;
            }
            attempts.remove_terminal(&outcome.product, token);
        }

        info!(product = %outcome.product, %token, success = outcome.is_success(), "purchase finished");
        self.notifier
            .notify(|delegate| delegate.purchase_finished(self, &outcome));
    }

    async fn record_restored(&self, outcome: PurchaseOutcome) {
        let completed = {
            let mut restore = self.restore.lock().await;
            let Some(cycle) = restore.as_mut() else {
                return;
            };
            match outcome.status {
                OutcomeStatus::Succeeded { .. } => cycle.summary.restored.push(outcome.product),
                OutcomeStatus::Failed(reason) => cycle.summary.failed.push((outcome.product, reason)),
            }
            cycle.in_flight = cycle.in_flight.saturating_sub(1);
            Self::take_if_complete(&mut restore)
        };
        if let Some(summary) = completed {
            self.finish_restore(summary);
        }
    }

    async fn close_replay(&self, error: Option<String>) {
        let completed = {
            let mut restore = self.restore.lock().await;
            let Some(cycle) = restore.as_mut() else {
                debug!("restore signal without a running cycle");
                return;
            };
            cycle.replay_done = true;
            cycle.summary.error = error;
            Self::take_if_complete(&mut restore)
        };
        if let Some(summary) = completed {
            self.finish_restore(summary);
        }
    }

    fn take_if_complete(restore: &mut Option<RestoreCycle>) -> Option<RestoreSummary> {
        match restore {
            Some(cycle) if cycle.replay_done && cycle.in_flight == 0 => {
                restore.take().map(|cycle| cycle.summary)
            }
            _ => None,
        }
    }

    fn finish_restore(&self, summary: RestoreSummary) {
        info!(
            restored = summary.restored.len(),
            failed = summary.failed.len(),
            nothing_to_restore = summary.nothing_to_restore(),
            "restore finished"
        );
        self.notifier
            .notify(|delegate| delegate.restore_finished(self, &summary));
    }

    /// Finalizes `id` on the platform queue at most once. A failed platform
    /// call leaves the transaction eligible for a later attempt.
    async fn finalize(&self, id: &TransactionId) {
        if !self.finalized.lock().await.insert(id.clone()) {
            return;
        }
        if let Err(e) = self.queue.finalize(id).await {
            warn!(transaction = %id, error = %e, "finalize failed");
            self.finalized.lock().await.remove(id);
        }
    }
}

impl Drop for PurchaseCoordinator {
    fn drop(&mut self) {
        self.stop();
    }
}
