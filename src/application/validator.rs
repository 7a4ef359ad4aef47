use crate::config::RetryPolicy;
use crate::domain::ports::ReceiptVerifierBox;
use crate::domain::receipt::{self, ReceiptVerdict};
use tracing::{debug, warn};

/// Result of validating a receipt under a retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Validation {
    pub verdict: ReceiptVerdict,
    /// Verifier calls made, zero when local checks rejected the receipt.
    pub attempts: u32,
}

/// Checks receipts locally, then asks the remote verifier for the decisive verdict.
pub struct ReceiptValidator {
    verifier: ReceiptVerifierBox,
}

impl ReceiptValidator {
    pub fn new(verifier: ReceiptVerifierBox) -> Self {
        Self { verifier }
    }

    /// One validation pass. Malformed receipts are `Invalid` without a network
    /// call; a verifier transport error counts as a transient error.
    pub async fn validate(&self, receipt: &[u8]) -> ReceiptVerdict {
        if !receipt::is_well_formed(receipt) {
            debug!(len = receipt.len(), "receipt failed structural checks");
            return ReceiptVerdict::Invalid;
        }

        match self.verifier.verify(receipt).await {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(error = %e, "receipt verifier unreachable");
                ReceiptVerdict::TransientError { retry_after: None }
            }
        }
    }

    /// Validates with bounded exponential backoff on transient errors. Returns
    /// the last transient verdict once `policy.max_attempts` calls are spent.
    pub async fn validate_with_retry(&self, receipt: &[u8], policy: &RetryPolicy) -> Validation {
        if !receipt::is_well_formed(receipt) {
            return Validation {
                verdict: ReceiptVerdict::Invalid,
                attempts: 0,
            };
        }

        let max_attempts = policy.max_attempts.max(1);
        let mut attempts = 0;
        loop {
            attempts += 1;
            let verdict = self.validate(receipt).await;
            match verdict {
                ReceiptVerdict::TransientError { retry_after } if attempts < max_attempts => {
                    let delay = policy.delay_after(attempts, retry_after);
                    debug!(attempts, ?delay, "transient verdict, retrying");
                    tokio::time::sleep(delay).await;
                }
                verdict => return Validation { verdict, attempts },
            }
        }
    }
}
