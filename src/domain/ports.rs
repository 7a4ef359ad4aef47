use super::attempt::AttemptToken;
use super::product::{Product, ProductId};
use super::receipt::ReceiptVerdict;
use super::transaction::{Transaction, TransactionId};
use crate::error::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Request handed to the platform when a purchase starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRequest {
    pub product: ProductId,
    pub attempt: AttemptToken,
}

/// Update pushed by the platform transaction queue to its subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
    Updated(Vec<Transaction>),
    RestoreFinished,
    RestoreFailed(String),
}

/// Product metadata lookup offered by the store.
#[async_trait]
pub trait ProductLookup: Send + Sync {
    /// Resolves identifiers; unknown identifiers are omitted from the result.
    async fn lookup(&self, ids: &[ProductId]) -> Result<Vec<Product>>;
}

/// The platform payment service and its transaction queue.
#[async_trait]
pub trait PaymentQueue: Send + Sync {
    async fn submit(&self, request: PaymentRequest) -> Result<()>;
    /// Asks the platform to replay completed transactions. Replayed
    /// transactions arrive as `Restored` updates followed by `RestoreFinished`.
    async fn restore_completed(&self) -> Result<()>;
    /// Removes a processed transaction from the queue for good.
    async fn finalize(&self, id: &TransactionId) -> Result<()>;
    /// Opens a subscription. Transactions still unfinished on the queue are
    /// delivered first.
    async fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<QueueEvent>>;
}

/// Remote receipt verification endpoint.
#[async_trait]
pub trait ReceiptVerifier: Send + Sync {
    async fn verify(&self, receipt: &[u8]) -> Result<ReceiptVerdict>;
}

/// Durable storage behind a platform queue: unfinished transactions survive a
/// relaunch, finalized purchases feed restore.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn store_pending(&self, tx: Transaction) -> Result<()>;
    async fn remove_pending(&self, id: &TransactionId) -> Result<Option<Transaction>>;
    async fn pending(&self) -> Result<Vec<Transaction>>;
    async fn store_owned(&self, tx: Transaction) -> Result<()>;
    async fn owned(&self) -> Result<Vec<Transaction>>;
}

pub type ProductLookupBox = Box<dyn ProductLookup>;
pub type PaymentQueueBox = Box<dyn PaymentQueue>;
pub type ReceiptVerifierBox = Box<dyn ReceiptVerifier>;
pub type TransactionStoreBox = Box<dyn TransactionStore>;
