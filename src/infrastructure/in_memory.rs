//! In-process stand-ins for the store: product lookup, payment queue,
//! receipt verifier and transaction storage.
//!
//! They back the CLI simulation and the test suite. Each is `Clone` and
//! shares its state, so a test can keep a handle for inspection after boxing
//! a copy into the coordinator.

use crate::domain::attempt::AttemptToken;
use crate::domain::ports::{
    PaymentQueue, PaymentRequest, ProductLookup, QueueEvent, ReceiptVerifier, TransactionStore,
    TransactionStoreBox,
};
use crate::domain::product::{Product, ProductId};
use crate::domain::receipt::ReceiptVerdict;
use crate::domain::transaction::{PaymentFailure, Transaction, TransactionId, TransactionState};
use crate::error::{PurchaseError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{RwLock, mpsc};
use tracing::debug;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A product lookup answering from a fixed list.
#[derive(Default, Clone)]
pub struct InMemoryProductLookup {
    products: Arc<RwLock<HashMap<ProductId, Product>>>,
    calls: Arc<AtomicUsize>,
    offline: Arc<AtomicBool>,
}

impl InMemoryProductLookup {
    pub fn new(products: Vec<Product>) -> Self {
        Self {
            products: Arc::new(RwLock::new(
                products.into_iter().map(|p| (p.id.clone(), p)).collect(),
            )),
            ..Self::default()
        }
    }

    /// Makes every subsequent lookup fail.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProductLookup for InMemoryProductLookup {
    async fn lookup(&self, ids: &[ProductId]) -> Result<Vec<Product>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(PurchaseError::CatalogUnavailable(
                "product lookup unreachable".to_string(),
            ));
        }
        let products = self.products.read().await;
        Ok(ids.iter().filter_map(|id| products.get(id).cloned()).collect())
    }
}

/// A verifier replaying scripted verdicts, then answering `Valid`.
#[derive(Default, Clone)]
pub struct ScriptedVerifier {
    verdicts: Arc<Mutex<VecDeque<ReceiptVerdict>>>,
    calls: Arc<AtomicUsize>,
    offline: Arc<AtomicBool>,
}

impl ScriptedVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues verdicts for the next verifier calls.
    pub fn script(&self, verdicts: impl IntoIterator<Item = ReceiptVerdict>) {
        lock(&self.verdicts).extend(verdicts);
    }

    /// Drops verdicts not consumed yet.
    pub fn clear(&self) {
        lock(&self.verdicts).clear();
    }

    /// Makes every subsequent call fail at the transport level.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReceiptVerifier for ScriptedVerifier {
    async fn verify(&self, _receipt: &[u8]) -> Result<ReceiptVerdict> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(PurchaseError::ReceiptValidationTransient(
                "verification endpoint unreachable".to_string(),
            ));
        }
        Ok(lock(&self.verdicts).pop_front().unwrap_or(ReceiptVerdict::Valid))
    }
}

/// A thread-safe in-memory transaction store.
///
/// Pending transactions are keyed by id, owned purchases by product.
#[derive(Default, Clone)]
pub struct InMemoryTransactionStore {
    pending: Arc<RwLock<HashMap<TransactionId, Transaction>>>,
    owned: Arc<RwLock<HashMap<ProductId, Transaction>>>,
}

impl InMemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransactionStore for InMemoryTransactionStore {
    async fn store_pending(&self, tx: Transaction) -> Result<()> {
        let mut pending = self.pending.write().await;
        pending.insert(tx.id.clone(), tx);
        Ok(())
    }

    async fn remove_pending(&self, id: &TransactionId) -> Result<Option<Transaction>> {
        let mut pending = self.pending.write().await;
        Ok(pending.remove(id))
    }

    async fn pending(&self) -> Result<Vec<Transaction>> {
        let pending = self.pending.read().await;
        let mut transactions: Vec<Transaction> = pending.values().cloned().collect();
        transactions.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(transactions)
    }

    async fn store_owned(&self, tx: Transaction) -> Result<()> {
        let mut owned = self.owned.write().await;
        owned.insert(tx.product.clone(), tx);
        Ok(())
    }

    async fn owned(&self) -> Result<Vec<Transaction>> {
        let owned = self.owned.read().await;
        let mut transactions: Vec<Transaction> = owned.values().cloned().collect();
        transactions.sort_by(|a, b| a.product.cmp(&b.product));
        Ok(transactions)
    }
}

/// How the simulated platform answers the next payment for a product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentScript {
    Approve,
    Decline(String),
    Cancel,
    Defer,
}

struct QueueInner {
    store: TransactionStoreBox,
    run: u64,
    next_id: AtomicU64,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<QueueEvent>>>,
    scripts: Mutex<HashMap<ProductId, VecDeque<PaymentScript>>>,
    deferred: Mutex<HashMap<ProductId, (TransactionId, AttemptToken)>>,
    finalizations: Mutex<HashMap<TransactionId, usize>>,
    submissions: AtomicUsize,
    reject_submissions: AtomicBool,
    restore_error: Mutex<Option<String>>,
    hold_restore: AtomicBool,
}

/// A payment queue that settles payments according to per-product scripts.
///
/// Settled transactions stay in the backing store until finalized, so a new
/// subscriber (e.g. after a relaunch) is handed them again.
#[derive(Clone)]
pub struct SimulatedPaymentQueue {
    inner: Arc<QueueInner>,
}

impl SimulatedPaymentQueue {
    pub fn new(store: TransactionStoreBox) -> Self {
        let run = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        Self {
            inner: Arc::new(QueueInner {
                store,
                run,
                next_id: AtomicU64::new(1),
                subscribers: Mutex::new(Vec::new()),
                scripts: Mutex::new(HashMap::new()),
                deferred: Mutex::new(HashMap::new()),
                finalizations: Mutex::new(HashMap::new()),
                submissions: AtomicUsize::new(0),
                reject_submissions: AtomicBool::new(false),
                restore_error: Mutex::new(None),
                hold_restore: AtomicBool::new(false),
            }),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Box::new(InMemoryTransactionStore::new()))
    }

    /// Queues how the next payments for `product` are answered. Unscripted
    /// payments are approved.
    pub fn script(&self, product: impl Into<ProductId>, script: PaymentScript) {
        lock(&self.inner.scripts)
            .entry(product.into())
            .or_default()
            .push_back(script);
    }

    pub fn clear_script(&self, product: &ProductId) {
        lock(&self.inner.scripts).remove(product);
    }

    /// Makes `submit` itself fail, as when the payment service is unreachable.
    pub fn set_reject_submissions(&self, reject: bool) {
        self.inner.reject_submissions.store(reject, Ordering::SeqCst);
    }

    /// Makes the next restore request end with `RestoreFailed`.
    pub fn set_restore_error(&self, error: Option<String>) {
        *lock(&self.inner.restore_error) = error;
    }

    /// While set, restores replay their transactions but do not signal the
    /// end of the replay until [`SimulatedPaymentQueue::finish_restore`].
    pub fn set_hold_restore(&self, hold: bool) {
        self.inner.hold_restore.store(hold, Ordering::SeqCst);
    }

    /// Signals the end of a held restore replay.
    pub fn finish_restore(&self) {
        self.emit(QueueEvent::RestoreFinished);
    }

    /// Settles a deferred payment, as when the outside approval comes in.
    pub async fn resolve_deferred(&self, product: &ProductId, approve: bool) -> Result<bool> {
        let Some((id, token)) = lock(&self.inner.deferred).remove(product) else {
            return Ok(false);
        };
        let tx = if approve {
            Self::purchased(id, product.clone(), token)
        } else {
            Transaction::new(id, product.clone(), TransactionState::Failed)
                .with_attempt(token)
                .with_failure(PaymentFailure::Declined("approval denied".to_string()))
        };
        self.inner.store.store_pending(tx.clone()).await?;
        self.emit(QueueEvent::Updated(vec![tx]));
        Ok(true)
    }

    /// Places a transaction on the queue as if the platform produced it.
    pub async fn inject(&self, tx: Transaction) -> Result<()> {
        self.inner.store.store_pending(tx.clone()).await?;
        self.emit(QueueEvent::Updated(vec![tx]));
        Ok(())
    }

    pub fn submissions(&self) -> usize {
        self.inner.submissions.load(Ordering::SeqCst)
    }

    pub fn finalize_count(&self, id: &TransactionId) -> usize {
        lock(&self.inner.finalizations).get(id).copied().unwrap_or(0)
    }

    pub fn total_finalizations(&self) -> usize {
        lock(&self.inner.finalizations).values().sum()
    }

    pub async fn pending(&self) -> Result<Vec<Transaction>> {
        self.inner.store.pending().await
    }

    fn next_id(&self) -> TransactionId {
        let n = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        TransactionId::new(format!("{:x}-{n:04}", self.inner.run))
    }

    fn purchased(id: TransactionId, product: ProductId, token: AttemptToken) -> Transaction {
        let receipt = format!("receipt:{product}:{id}");
        Transaction::new(id, product, TransactionState::Purchased)
            .with_receipt(receipt.into_bytes())
            .with_attempt(token)
    }

    fn emit(&self, event: QueueEvent) {
        let mut subscribers = lock(&self.inner.subscribers);
        // Drop closed subscriptions while publishing.
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[async_trait]
impl PaymentQueue for SimulatedPaymentQueue {
    async fn submit(&self, request: PaymentRequest) -> Result<()> {
        self.inner.submissions.fetch_add(1, Ordering::SeqCst);
        if self.inner.reject_submissions.load(Ordering::SeqCst) {
            return Err(PurchaseError::PaymentSubmissionFailed(
                "payment service unavailable".to_string(),
            ));
        }

        let script = lock(&self.inner.scripts)
            .get_mut(&request.product)
            .and_then(VecDeque::pop_front)
            .unwrap_or(PaymentScript::Approve);
        let id = self.next_id();
        debug!(transaction = %id, product = %request.product, ?script, "payment submitted");

        let purchasing = Transaction::new(id.clone(), request.product.clone(), TransactionState::Purchasing)
            .with_attempt(request.attempt);
        self.emit(QueueEvent::Updated(vec![purchasing]));

        let settled = match script {
            PaymentScript::Approve => Self::purchased(id, request.product, request.attempt),
            PaymentScript::Decline(message) => {
                Transaction::new(id, request.product, TransactionState::Failed)
                    .with_attempt(request.attempt)
                    .with_failure(PaymentFailure::Declined(message))
            }
            PaymentScript::Cancel => Transaction::new(id, request.product, TransactionState::Failed)
                .with_attempt(request.attempt)
                .with_failure(PaymentFailure::Cancelled),
            PaymentScript::Defer => {
                lock(&self.inner.deferred)
                    .insert(request.product.clone(), (id.clone(), request.attempt));
                let deferred = Transaction::new(id, request.product, TransactionState::Deferred)
                    .with_attempt(request.attempt);
                self.emit(QueueEvent::Updated(vec![deferred]));
                return Ok(());
            }
        };

        self.inner.store.store_pending(settled.clone()).await?;
        self.emit(QueueEvent::Updated(vec![settled]));
        Ok(())
    }

    async fn restore_completed(&self) -> Result<()> {
        let error = lock(&self.inner.restore_error).take();
        if let Some(error) = error {
            self.emit(QueueEvent::RestoreFailed(error));
            return Ok(());
        }

        let mut restored = Vec::new();
        for original in self.inner.store.owned().await? {
            let mut tx = Transaction::new(self.next_id(), original.product.clone(), TransactionState::Restored)
                .with_original(original.id.clone());
            tx.receipt = original.receipt.clone();
            self.inner.store.store_pending(tx.clone()).await?;
            restored.push(tx);
        }
        debug!(count = restored.len(), "replaying completed transactions");

        if !restored.is_empty() {
            self.emit(QueueEvent::Updated(restored));
        }
        if !self.inner.hold_restore.load(Ordering::SeqCst) {
            self.emit(QueueEvent::RestoreFinished);
        }
        Ok(())
    }

    async fn finalize(&self, id: &TransactionId) -> Result<()> {
        *lock(&self.inner.finalizations).entry(id.clone()).or_default() += 1;

        if let Some(tx) = self.inner.store.remove_pending(id).await?
            && tx.state == TransactionState::Purchased
        {
            self.inner.store.store_owned(tx).await?;
        }
        Ok(())
    }

    async fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<QueueEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = self.inner.store.pending().await?;
        if !pending.is_empty() {
            debug!(count = pending.len(), "redelivering unfinished transactions");
            // The receiver is still in hand, so this cannot fail.
            let _ = tx.send(QueueEvent::Updated(pending));
        }
        lock(&self.inner.subscribers).push(tx);
        Ok(rx)
    }
}
