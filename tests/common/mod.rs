#![allow(dead_code)]

use iapflow::application::catalog::ProductCatalog;
use iapflow::application::coordinator::PurchaseCoordinator;
use iapflow::application::notifier::{ChannelDelegate, Notification, PurchaseDelegate};
use iapflow::application::validator::ReceiptValidator;
use iapflow::config::RetryPolicy;
use iapflow::domain::ports::TransactionStoreBox;
use iapflow::domain::product::{LocalizedPrice, Product, ProductId};
use iapflow::infrastructure::in_memory::{
    InMemoryProductLookup, InMemoryTransactionStore, ScriptedVerifier, SimulatedPaymentQueue,
};
use rust_decimal_macros::dec;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

pub const PRO: &str = "com.app.pro";
pub const GEMS: &str = "com.app.gems";

pub fn product(id: &str) -> Product {
    Product {
        id: ProductId::from(id),
        title: id.to_string(),
        price: LocalizedPrice {
            amount: dec!(4.99),
            currency: "USD".to_string(),
        },
        available: true,
    }
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay_ms: 1,
        max_delay_ms: 5,
    }
}

/// A delegate that ignores everything.
pub struct Silent;

impl PurchaseDelegate for Silent {
    fn purchase_finished(&self, _: &PurchaseCoordinator, _: &iapflow::domain::outcome::PurchaseOutcome) {}
}

/// A coordinator wired to in-memory fakes, with handles kept for inspection.
pub struct Harness {
    pub coordinator: Arc<PurchaseCoordinator>,
    pub lookup: InMemoryProductLookup,
    pub queue: SimulatedPaymentQueue,
    pub verifier: ScriptedVerifier,
    pub delegate: Arc<dyn PurchaseDelegate>,
    pub notifications: UnboundedReceiver<Notification>,
}

impl Harness {
    pub async fn start() -> Self {
        Self::with_store(Box::new(InMemoryTransactionStore::new())).await
    }

    pub async fn with_store(store: TransactionStoreBox) -> Self {
        Self::with_queue(SimulatedPaymentQueue::new(store)).await
    }

    /// Starts a coordinator on an existing queue, as a relaunched process would.
    pub async fn with_queue(queue: SimulatedPaymentQueue) -> Self {
        let h = Self::build(queue);
        h.coordinator.start().await.expect("failed to start coordinator");
        h
    }

    /// Wires a coordinator and its delegate without subscribing to the queue.
    pub fn build(queue: SimulatedPaymentQueue) -> Self {
        let lookup = InMemoryProductLookup::new(vec![product(PRO), product(GEMS)]);
        let verifier = ScriptedVerifier::new();
        let catalog = ProductCatalog::new(
            Box::new(lookup.clone()),
            vec![PRO.into(), GEMS.into(), "com.app.unknown".into()],
            Duration::from_secs(60),
        );
        let coordinator = Arc::new(PurchaseCoordinator::new(
            catalog,
            Box::new(queue.clone()),
            ReceiptValidator::new(Box::new(verifier.clone())),
            fast_retry(),
        ));

        let (delegate, notifications) = ChannelDelegate::channel();
        let delegate: Arc<dyn PurchaseDelegate> = delegate;
        coordinator.set_delegate(&delegate);

        Self {
            coordinator,
            lookup,
            queue,
            verifier,
            delegate,
            notifications,
        }
    }

    pub async fn next(&mut self) -> Notification {
        tokio::time::timeout(Duration::from_secs(5), self.notifications.recv())
            .await
            .expect("timed out waiting for a notification")
            .expect("notification channel closed")
    }

    /// Asserts nothing else gets delivered within a short grace period.
    pub async fn assert_quiet(&mut self) {
        let extra = tokio::time::timeout(Duration::from_millis(100), self.notifications.recv()).await;
        assert!(extra.is_err(), "unexpected notification: {extra:?}");
    }
}

/// Polls until `condition` holds or a few seconds pass.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

pub fn write_catalog(path: &Path) {
    let mut wtr = csv::Writer::from_path(path).unwrap();
    wtr.write_record(["id", "title", "price", "currency", "available"])
        .unwrap();
    wtr.write_record([PRO, "Pro", "9.99", "USD", "true"]).unwrap();
    wtr.write_record([GEMS, "Gems", "0.99", "USD", "true"]).unwrap();
    wtr.write_record(["com.app.retired", "Retired", "1.99", "USD", "false"])
        .unwrap();
    wtr.flush().unwrap();
}

pub fn write_script(path: &Path, rows: &[[&str; 4]]) {
    let mut wtr = csv::Writer::from_path(path).unwrap();
    wtr.write_record(["action", "product", "payment", "verdicts"])
        .unwrap();
    for row in rows {
        wtr.write_record(row).unwrap();
    }
    wtr.flush().unwrap();
}
