use super::product::ProductId;
use crate::error::{PurchaseError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::SystemTime;

/// Locally generated token correlating queue callbacks with the attempt that
/// submitted the payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttemptToken(pub u64);

impl fmt::Display for AttemptToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "attempt-{}", self.0)
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Phase {
    Idle,
    RequestingPayment,
    AwaitingTransaction,
    ValidatingReceipt,
    /// A failed transaction was claimed; no other transaction may take the attempt.
    RecordingFailure,
    Succeeded,
    Failed,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Succeeded | Phase::Failed)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PurchaseAttempt {
    pub product: ProductId,
    pub token: AttemptToken,
    pub phase: Phase,
    pub created_at: SystemTime,
}

/// In-flight purchase attempts keyed by product.
///
/// Every phase change goes through [`AttemptTable::transition`], which only
/// applies when the attempt still has the expected token and phase.
#[derive(Debug, Default)]
pub struct AttemptTable {
    attempts: HashMap<ProductId, PurchaseAttempt>,
}

impl AttemptTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new attempt in `Idle`, rejecting a second one for the same product.
    pub fn begin(&mut self, product: ProductId, token: AttemptToken) -> Result<()> {
        if self.attempts.contains_key(&product) {
            return Err(PurchaseError::AttemptInProgress(product));
        }
        self.attempts.insert(
            product.clone(),
            PurchaseAttempt {
                product,
                token,
                phase: Phase::Idle,
                created_at: SystemTime::now(),
            },
        );
        Ok(())
    }

    /// Compare-and-set on the attempt's phase. Returns `false` and leaves the
    /// table untouched when the attempt is gone, belongs to another token, or
    /// has already left every phase in `expected`.
    pub fn transition(
        &mut self,
        product: &ProductId,
        token: AttemptToken,
        expected: &[Phase],
        next: Phase,
    ) -> bool {
        match self.attempts.get_mut(product) {
            Some(attempt) if attempt.token == token && expected.contains(&attempt.phase) => {
                attempt.phase = next;
                true
            }
            _ => false,
        }
    }

    /// Removes a terminal attempt. Non-terminal attempts are left in place.
    pub fn remove_terminal(&mut self, product: &ProductId, token: AttemptToken) -> Option<PurchaseAttempt> {
        match self.attempts.get(product) {
            Some(attempt) if attempt.token == token && attempt.phase.is_terminal() => {
                self.attempts.remove(product)
            }
            _ => None,
        }
    }

    pub fn get(&self, product: &ProductId) -> Option<&PurchaseAttempt> {
        self.attempts.get(product)
    }

    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }
}
