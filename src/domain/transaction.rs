use super::attempt::AttemptToken;
use super::product::ProductId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Platform-issued transaction identifier. Opaque to the purchase flow.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum TransactionState {
    Purchasing,
    Purchased,
    Failed,
    Restored,
    Deferred,
}

impl TransactionState {
    /// Whether the transaction carries a receipt that needs verification.
    pub fn has_receipt(self) -> bool {
        matches!(self, TransactionState::Purchased | TransactionState::Restored)
    }
}

/// Why the platform failed a payment.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
#[serde(rename_all = "lowercase")]
pub enum PaymentFailure {
    Cancelled,
    Declined(String),
}

/// A record on the platform transaction queue.
///
/// The purchase flow never creates these; it reads them off the queue and
/// finalizes them once processed.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct Transaction {
    pub id: TransactionId,
    pub product: ProductId,
    pub state: TransactionState,
    /// Raw receipt bytes, present once purchased or restored.
    #[serde(default)]
    pub receipt: Option<Vec<u8>>,
    /// Token of the attempt that submitted the payment, echoed back by the platform.
    #[serde(default)]
    pub attempt: Option<AttemptToken>,
    /// For restored transactions, the transaction that originally bought the product.
    #[serde(default)]
    pub original: Option<TransactionId>,
    #[serde(default)]
    pub failure: Option<PaymentFailure>,
}

impl Transaction {
    pub fn new(id: TransactionId, product: ProductId, state: TransactionState) -> Self {
        Self {
            id,
            product,
            state,
            receipt: None,
            attempt: None,
            original: None,
            failure: None,
        }
    }

    pub fn with_receipt(mut self, receipt: impl Into<Vec<u8>>) -> Self {
        self.receipt = Some(receipt.into());
        self
    }

    pub fn with_attempt(mut self, token: AttemptToken) -> Self {
        self.attempt = Some(token);
        self
    }

    pub fn with_original(mut self, original: TransactionId) -> Self {
        self.original = Some(original);
        self
    }

    pub fn with_failure(mut self, failure: PaymentFailure) -> Self {
        self.failure = Some(failure);
        self
    }
}
