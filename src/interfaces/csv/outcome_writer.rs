use crate::domain::outcome::{OutcomeStatus, PurchaseOutcome, RestoreSummary};
use crate::domain::product::ProductId;
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

/// One line of output, written for every delegate notification.
#[derive(Debug, Serialize, PartialEq, Clone)]
pub struct OutcomeRow {
    pub event: &'static str,
    pub product: String,
    pub status: &'static str,
    pub reason: String,
    pub transaction: String,
}

impl From<&PurchaseOutcome> for OutcomeRow {
    fn from(outcome: &PurchaseOutcome) -> Self {
        let (status, reason) = match &outcome.status {
            OutcomeStatus::Succeeded { restored: false } => ("succeeded", String::new()),
            OutcomeStatus::Succeeded { restored: true } => ("restored", String::new()),
            OutcomeStatus::Failed(reason) => ("failed", reason.code().to_string()),
        };
        Self {
            event: "purchase",
            product: outcome.product.to_string(),
            status,
            reason,
            transaction: outcome
                .transaction
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default(),
        }
    }
}

impl OutcomeRow {
    pub fn deferred(product: &ProductId) -> Self {
        Self {
            event: "purchase",
            product: product.to_string(),
            status: "deferred",
            reason: String::new(),
            transaction: String::new(),
        }
    }

    /// A request refused at call time, before anything reached the platform.
    pub fn rejected(event: &'static str, product: &ProductId, reason: &str) -> Self {
        Self {
            event,
            product: product.to_string(),
            status: "rejected",
            reason: reason.to_string(),
            transaction: String::new(),
        }
    }

    /// Summary line of a restore cycle; per-product results follow as
    /// `restore` events.
    pub fn restore_summary(summary: &RestoreSummary) -> Vec<Self> {
        let status = if summary.error.is_some() {
            "failed"
        } else if summary.nothing_to_restore() {
            "nothing_to_restore"
        } else {
            "completed"
        };
        let mut rows = vec![Self {
            event: "restore",
            product: String::new(),
            status,
            reason: summary.error.clone().unwrap_or_default(),
            transaction: String::new(),
        }];
        rows.extend(summary.restored.iter().map(|product| Self {
            event: "restore",
            product: product.to_string(),
            status: "restored",
            reason: String::new(),
            transaction: String::new(),
        }));
        rows.extend(summary.failed.iter().map(|(product, reason)| Self {
            event: "restore",
            product: product.to_string(),
            status: "failed",
            reason: reason.code().to_string(),
            transaction: String::new(),
        }));
        rows
    }
}

/// Writes outcome rows as CSV with a header.
pub struct OutcomeWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> OutcomeWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_rows(&mut self, rows: impl IntoIterator<Item = OutcomeRow>) -> Result<()> {
        for row in rows {
            self.writer.serialize(row)?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
