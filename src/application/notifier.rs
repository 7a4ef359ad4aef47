use super::coordinator::PurchaseCoordinator;
use crate::domain::outcome::{PurchaseOutcome, RestoreSummary};
use crate::domain::product::ProductId;
use std::sync::{Arc, RwLock, Weak};
use tokio::sync::mpsc;
use tracing::debug;

/// Receiver of purchase flow results.
///
/// Calls arrive on a runtime worker thread; implementations that touch UI
/// state should hop to their own executor.
pub trait PurchaseDelegate: Send + Sync {
    /// Exactly once per purchase attempt, success or failure. Also called for
    /// transactions recovered outside any attempt (relaunch mid-purchase).
    fn purchase_finished(&self, coordinator: &PurchaseCoordinator, outcome: &PurchaseOutcome);

    /// Exactly once per restore cycle.
    fn restore_finished(&self, _coordinator: &PurchaseCoordinator, _summary: &RestoreSummary) {}

    /// The platform parked the payment awaiting outside approval. The attempt
    /// stays in flight.
    fn purchase_deferred(&self, _coordinator: &PurchaseCoordinator, _product: &ProductId) {}
}

/// Non-owning delegate registration.
///
/// Notifications to a dropped or unregistered delegate are discarded.
#[derive(Default)]
pub struct DelegateNotifier {
    delegate: RwLock<Option<Weak<dyn PurchaseDelegate>>>,
}

impl DelegateNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, delegate: &Arc<dyn PurchaseDelegate>) {
        if let Ok(mut slot) = self.delegate.write() {
            *slot = Some(Arc::downgrade(delegate));
        }
    }

    pub fn unregister(&self) {
        if let Ok(mut slot) = self.delegate.write() {
            *slot = None;
        }
    }

    fn live(&self) -> Option<Arc<dyn PurchaseDelegate>> {
        self.delegate
            .read()
            .ok()
            .and_then(|slot| slot.as_ref().and_then(Weak::upgrade))
    }

    /// Runs `deliver` against the delegate if it is still alive. Returns
    /// whether anything was delivered.
    pub fn notify(&self, deliver: impl FnOnce(&dyn PurchaseDelegate)) -> bool {
        match self.live() {
            Some(delegate) => {
                deliver(delegate.as_ref());
                true
            }
            None => {
                debug!("no live delegate, notification dropped");
                false
            }
        }
    }
}

/// A delegate notification, as forwarded by [`ChannelDelegate`].
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Finished(PurchaseOutcome),
    Deferred(ProductId),
    Restored(RestoreSummary),
}

/// Delegate that forwards every notification into a channel, for callers
/// that prefer awaiting results to implementing callbacks.
pub struct ChannelDelegate {
    sender: mpsc::UnboundedSender<Notification>,
}

impl ChannelDelegate {
    pub fn channel() -> (Arc<Self>, mpsc::UnboundedReceiver<Notification>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Arc::new(Self { sender }), receiver)
    }

    fn forward(&self, notification: Notification) {
        if self.sender.send(notification).is_err() {
            debug!("notification receiver closed");
        }
    }
}

impl PurchaseDelegate for ChannelDelegate {
    fn purchase_finished(&self, _: &PurchaseCoordinator, outcome: &PurchaseOutcome) {
        self.forward(Notification::Finished(outcome.clone()));
    }

    fn restore_finished(&self, _: &PurchaseCoordinator, summary: &RestoreSummary) {
        self.forward(Notification::Restored(summary.clone()));
    }

    fn purchase_deferred(&self, _: &PurchaseCoordinator, product: &ProductId) {
        self.forward(Notification::Deferred(product.clone()));
    }
}
