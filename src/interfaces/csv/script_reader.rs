use crate::domain::product::ProductId;
use crate::domain::receipt::ReceiptVerdict;
use crate::error::{PurchaseError, Result};
use crate::infrastructure::in_memory::PaymentScript;
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Deserialize, PartialEq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum ScriptAction {
    Purchase,
    Restore,
}

#[derive(Debug, Deserialize, PartialEq, Clone, Copy, Default)]
#[serde(rename_all = "lowercase")]
pub enum PaymentAnswer {
    #[default]
    Approve,
    Decline,
    Cancel,
    Defer,
}

impl From<PaymentAnswer> for PaymentScript {
    fn from(answer: PaymentAnswer) -> Self {
        match answer {
            PaymentAnswer::Approve => PaymentScript::Approve,
            PaymentAnswer::Decline => PaymentScript::Decline("card declined".to_string()),
            PaymentAnswer::Cancel => PaymentScript::Cancel,
            PaymentAnswer::Defer => PaymentScript::Defer,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ScriptRow {
    action: ScriptAction,
    #[serde(default)]
    product: Option<String>,
    #[serde(default)]
    payment: Option<PaymentAnswer>,
    #[serde(default)]
    verdicts: Option<String>,
}

/// One step of a purchase script.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptStep {
    pub action: ScriptAction,
    pub product: Option<ProductId>,
    pub payment: PaymentAnswer,
    pub verdicts: Vec<ReceiptVerdict>,
}

fn parse_verdicts(raw: &str) -> Result<Vec<ReceiptVerdict>> {
    raw.split(';')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| match v {
            "valid" => Ok(ReceiptVerdict::Valid),
            "invalid" => Ok(ReceiptVerdict::Invalid),
            "transient" => Ok(ReceiptVerdict::TransientError { retry_after: None }),
            other => Err(PurchaseError::ConfigError(format!("unknown verdict `{other}`"))),
        })
        .collect()
}

impl TryFrom<ScriptRow> for ScriptStep {
    type Error = PurchaseError;

    fn try_from(row: ScriptRow) -> Result<Self> {
        let product = row.product.filter(|p| !p.is_empty()).map(ProductId::new);
        if row.action == ScriptAction::Purchase && product.is_none() {
            return Err(PurchaseError::ConfigError(
                "purchase step without a product".to_string(),
            ));
        }
        Ok(Self {
            action: row.action,
            product,
            payment: row.payment.unwrap_or_default(),
            verdicts: parse_verdicts(row.verdicts.as_deref().unwrap_or_default())?,
        })
    }
}

/// Reads a purchase script from CSV with columns
/// `action, product, payment, verdicts`.
pub struct ScriptReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> ScriptReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily reads steps; a malformed row yields an error without ending the stream.
    pub fn steps(self) -> impl Iterator<Item = Result<ScriptStep>> {
        self.reader.into_deserialize::<ScriptRow>().map(|row| {
            row.map_err(PurchaseError::from)
                .and_then(ScriptStep::try_from)
        })
    }
}
