use std::time::Duration;

/// Upper bound on the size of a receipt accepted for verification.
pub const MAX_RECEIPT_BYTES: usize = 1024 * 1024;

/// Verdict on a receipt, as decided by the remote verifier or by local checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptVerdict {
    Valid,
    Invalid,
    TransientError { retry_after: Option<Duration> },
}

impl ReceiptVerdict {
    /// Valid and invalid are final; a transient error may be retried.
    pub fn is_terminal(self) -> bool {
        !matches!(self, ReceiptVerdict::TransientError { .. })
    }
}

/// Structural checks performed before a receipt leaves the process.
pub fn is_well_formed(receipt: &[u8]) -> bool {
    !receipt.is_empty() && receipt.len() <= MAX_RECEIPT_BYTES
}
