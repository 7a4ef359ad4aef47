use crate::domain::product::ProductId;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PurchaseError>;

/// Errors returned synchronously by the purchase flow and its collaborators.
///
/// Failures that happen after `purchase` has returned travel through
/// [`crate::domain::outcome::FailureReason`] instead.
#[derive(Error, Debug)]
pub enum PurchaseError {
    #[error("Unknown or unavailable product: {0}")]
    InvalidProduct(ProductId),
    #[error("A purchase of {0} is already in progress")]
    AttemptInProgress(ProductId),
    #[error("Product catalog unavailable: {0}")]
    CatalogUnavailable(String),
    #[error("Payment submission failed: {0}")]
    PaymentSubmissionFailed(String),
    #[error("Receipt rejected by verifier")]
    ReceiptInvalid,
    #[error("Receipt verification temporarily unavailable: {0}")]
    ReceiptValidationTransient(String),
    #[error("Purchase cancelled by the user")]
    UserCancelled,
    #[error("A restore cycle is already running")]
    RestoreInProgress,
    #[error("The coordinator is not observing the transaction queue")]
    NotStarted,
    #[error("No purchase coordinator installed")]
    NotInstalled,
    #[error("A purchase coordinator is already installed")]
    AlreadyInstalled,
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Internal error: {0}")]
    InternalError(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl PurchaseError {
    /// Short machine-readable tag for the error kind.
    pub fn code(&self) -> &'static str {
        match self {
            PurchaseError::InvalidProduct(_) => "invalid_product",
            PurchaseError::AttemptInProgress(_) => "attempt_in_progress",
            PurchaseError::CatalogUnavailable(_) => "catalog_unavailable",
            PurchaseError::PaymentSubmissionFailed(_) => "payment_submission_failed",
            PurchaseError::ReceiptInvalid => "receipt_invalid",
            PurchaseError::ReceiptValidationTransient(_) => "receipt_validation_transient",
            PurchaseError::UserCancelled => "user_cancelled",
            PurchaseError::RestoreInProgress => "restore_in_progress",
            PurchaseError::NotStarted => "not_started",
            _ => "internal",
        }
    }
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for PurchaseError {
    fn from(err: rocksdb::Error) -> Self {
        PurchaseError::InternalError(Box::new(err))
    }
}
