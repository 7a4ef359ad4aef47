use clap::Parser;
use iapflow::application::catalog::ProductCatalog;
use iapflow::application::coordinator::PurchaseCoordinator;
use iapflow::application::handle;
use iapflow::application::notifier::{ChannelDelegate, Notification, PurchaseDelegate};
use iapflow::application::validator::ReceiptValidator;
use iapflow::config::Config;
use iapflow::domain::ports::TransactionStoreBox;
use iapflow::infrastructure::in_memory::{
    InMemoryProductLookup, InMemoryTransactionStore, ScriptedVerifier, SimulatedPaymentQueue,
};
use iapflow::interfaces::csv::catalog_reader::CatalogReader;
use iapflow::interfaces::csv::outcome_writer::{OutcomeRow, OutcomeWriter};
use iapflow::interfaces::csv::script_reader::{ScriptAction, ScriptReader};
use iapflow::logging;
use miette::{IntoDiagnostic, Result, miette};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::warn;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Product catalog CSV file
    catalog: PathBuf,

    /// Purchase script CSV file
    script: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// JSON configuration file (optional)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Seconds to wait for each delegate notification
    #[arg(long, default_value_t = 10)]
    wait_secs: u64,
}

#[cfg(feature = "storage-rocksdb")]
fn open_store(db_path: Option<PathBuf>) -> Result<TransactionStoreBox> {
    use iapflow::infrastructure::rocksdb::RocksDBStore;

    match db_path {
        Some(path) => Ok(Box::new(RocksDBStore::open(path).into_diagnostic()?)),
        None => Ok(Box::new(InMemoryTransactionStore::new())),
    }
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_store(db_path: Option<PathBuf>) -> Result<TransactionStoreBox> {
    if db_path.is_some() {
        eprintln!(
            "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
        );
    }
    Ok(Box::new(InMemoryTransactionStore::new()))
}

async fn next_notification(
    notifications: &mut UnboundedReceiver<Notification>,
    wait: Duration,
) -> Result<Notification> {
    tokio::time::timeout(wait, notifications.recv())
        .await
        .map_err(|_| miette!("no purchase outcome within {}s", wait.as_secs()))?
        .ok_or_else(|| miette!("notification channel closed"))
}

fn rows_for(notification: &Notification) -> Vec<OutcomeRow> {
    match notification {
        Notification::Finished(outcome) => vec![OutcomeRow::from(outcome)],
        Notification::Deferred(product) => vec![OutcomeRow::deferred(product)],
        Notification::Restored(summary) => OutcomeRow::restore_summary(summary),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let cli = Cli::parse();
    let wait = Duration::from_secs(cli.wait_secs);

    let config = match &cli.config {
        Some(path) => Config::load(path).into_diagnostic()?,
        None => Config::default(),
    };

    let mut products = Vec::new();
    let file = File::open(&cli.catalog).into_diagnostic()?;
    for product in CatalogReader::new(file).products() {
        match product {
            Ok(product) => products.push(product),
            Err(e) => warn!("Error reading catalog row: {e}"),
        }
    }
    let known = products.iter().map(|p| p.id.clone()).collect();

    let queue = SimulatedPaymentQueue::new(open_store(cli.db_path)?);
    let verifier = ScriptedVerifier::new();
    let recovered = queue.pending().await.into_diagnostic()?.len();

    let catalog = ProductCatalog::new(
        Box::new(InMemoryProductLookup::new(products)),
        known,
        config.catalog_ttl(),
    );
    let coordinator = handle::install(Arc::new(PurchaseCoordinator::new(
        catalog,
        Box::new(queue.clone()),
        ReceiptValidator::new(Box::new(verifier.clone())),
        config.retry.clone(),
    )))
    .into_diagnostic()?;

    let (delegate, mut notifications) = ChannelDelegate::channel();
    let delegate: Arc<dyn PurchaseDelegate> = delegate;
    coordinator.set_delegate(&delegate);
    coordinator.start().await.into_diagnostic()?;

    let mut writer = OutcomeWriter::new(io::stdout());

    // Transactions left unfinished by a previous run are processed first.
    for _ in 0..recovered {
        let notification = next_notification(&mut notifications, wait).await?;
        writer.write_rows(rows_for(&notification)).into_diagnostic()?;
    }

    let file = File::open(&cli.script).into_diagnostic()?;
    for step in ScriptReader::new(file).steps() {
        let step = match step {
            Ok(step) => step,
            Err(e) => {
                warn!("Error reading script step: {e}");
                continue;
            }
        };
        verifier.script(step.verdicts.iter().copied());

        let started = match (step.action, &step.product) {
            (ScriptAction::Purchase, Some(product)) => {
                queue.script(product.clone(), step.payment.into());
                coordinator.purchase(product.clone()).await.map(|_| ())
            }
            _ => coordinator.restore_purchases().await,
        };

        match started {
            Ok(()) => {
                let notification = next_notification(&mut notifications, wait).await?;
                writer.write_rows(rows_for(&notification)).into_diagnostic()?;
            }
            Err(e) => {
                verifier.clear();
                let (event, product) = match (step.action, step.product) {
                    (ScriptAction::Purchase, Some(product)) => {
                        queue.clear_script(&product);
                        ("purchase", product)
                    }
                    (_, product) => ("restore", product.unwrap_or_else(|| "".into())),
                };
                writer
                    .write_rows([OutcomeRow::rejected(event, &product, e.code())])
                    .into_diagnostic()?;
            }
        }
    }

    handle::shutdown();
    Ok(())
}
