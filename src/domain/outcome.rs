use super::product::ProductId;
use super::transaction::TransactionId;
use crate::error::PurchaseError;
use std::fmt;

/// Why a purchase ended without delivering content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    PaymentSubmissionFailed(String),
    ReceiptInvalid,
    /// The verifier kept answering with a transient error.
    ReceiptValidationTransient { attempts: u32 },
    UserCancelled,
}

impl FailureReason {
    /// Short machine-readable tag.
    pub fn code(&self) -> &'static str {
        match self {
            FailureReason::PaymentSubmissionFailed(_) => "payment_submission_failed",
            FailureReason::ReceiptInvalid => "receipt_invalid",
            FailureReason::ReceiptValidationTransient { .. } => "receipt_validation_transient",
            FailureReason::UserCancelled => "user_cancelled",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::PaymentSubmissionFailed(msg) => write!(f, "payment submission failed: {msg}"),
            FailureReason::ReceiptInvalid => f.write_str("receipt rejected"),
            FailureReason::ReceiptValidationTransient { attempts } => {
                write!(f, "receipt verification unavailable after {attempts} attempts")
            }
            FailureReason::UserCancelled => f.write_str("cancelled by user"),
        }
    }
}

impl From<FailureReason> for PurchaseError {
    fn from(reason: FailureReason) -> Self {
        match reason {
            FailureReason::PaymentSubmissionFailed(msg) => PurchaseError::PaymentSubmissionFailed(msg),
            FailureReason::ReceiptInvalid => PurchaseError::ReceiptInvalid,
            FailureReason::ReceiptValidationTransient { attempts } => {
                PurchaseError::ReceiptValidationTransient(format!("gave up after {attempts} attempts"))
            }
            FailureReason::UserCancelled => PurchaseError::UserCancelled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutcomeStatus {
    /// Content may be delivered. `restored` is set when the transaction was a
    /// replay rather than a new payment.
    Succeeded { restored: bool },
    Failed(FailureReason),
}

/// Terminal result of one purchase attempt, or of one transaction recovered
/// outside any attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseOutcome {
    pub product: ProductId,
    pub transaction: Option<TransactionId>,
    pub status: OutcomeStatus,
}

impl PurchaseOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self.status, OutcomeStatus::Succeeded { .. })
    }

    /// Converts a failed outcome into the matching [`PurchaseError`], for
    /// callers that want `?` on the result.
    pub fn into_result(self) -> crate::error::Result<Option<TransactionId>> {
        match self.status {
            OutcomeStatus::Succeeded { .. } => Ok(self.transaction),
            OutcomeStatus::Failed(reason) => Err(reason.into()),
        }
    }
}

/// Aggregate result of one restore cycle.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RestoreSummary {
    pub restored: Vec<ProductId>,
    pub failed: Vec<(ProductId, FailureReason)>,
    /// Set when the platform itself could not replay transactions.
    pub error: Option<String>,
}

impl RestoreSummary {
    pub fn is_empty(&self) -> bool {
        self.restored.is_empty() && self.failed.is_empty()
    }

    /// Nothing was replayed and the platform reported no error.
    pub fn nothing_to_restore(&self) -> bool {
        self.is_empty() && self.error.is_none()
    }
}
