use iapflow::application::notifier::{Notification, PurchaseDelegate};
use iapflow::domain::attempt::Phase;
use iapflow::domain::outcome::{FailureReason, OutcomeStatus};
use iapflow::domain::product::ProductId;
use iapflow::domain::receipt::ReceiptVerdict;
use iapflow::error::PurchaseError;
use iapflow::domain::transaction::{PaymentFailure, Transaction, TransactionId, TransactionState};
use iapflow::infrastructure::in_memory::PaymentScript;
use std::sync::Arc;

mod common;
use common::{GEMS, Harness, PRO, eventually};

fn transient() -> ReceiptVerdict {
    ReceiptVerdict::TransientError { retry_after: None }
}

#[tokio::test]
async fn test_successful_purchase_notifies_once_and_frees_product() {
    let mut h = Harness::start().await;

    h.coordinator.purchase(PRO).await.unwrap();

    let Notification::Finished(outcome) = h.next().await else {
        panic!("expected a purchase outcome");
    };
    assert_eq!(outcome.product, ProductId::from(PRO));
    assert_eq!(outcome.status, OutcomeStatus::Succeeded { restored: false });
    let tx = outcome.transaction.clone().unwrap();
    assert_eq!(h.queue.finalize_count(&tx), 1);
    h.assert_quiet().await;

    assert!(h.coordinator.in_flight(&PRO.into()).await.is_none());
    h.coordinator.purchase(PRO).await.unwrap();
    assert!(matches!(h.next().await, Notification::Finished(o) if o.is_success()));
}

#[tokio::test]
async fn test_unknown_product_fails_fast_without_network() {
    let h = Harness::start().await;
    h.coordinator.prefetch_catalog().await.unwrap();
    let lookups = h.lookup.calls();

    let result = h.coordinator.purchase("com.app.unknown").await;
    assert!(matches!(result, Err(PurchaseError::InvalidProduct(_))));

    let result = h.coordinator.purchase("com.app.never-configured").await;
    assert!(matches!(result, Err(PurchaseError::InvalidProduct(_))));

    assert!(h.coordinator.in_flight(&"com.app.unknown".into()).await.is_none());
    assert_eq!(h.lookup.calls(), lookups);
    assert_eq!(h.queue.submissions(), 0);
    assert_eq!(h.verifier.calls(), 0);
}

#[tokio::test]
async fn test_catalog_outage_is_reported() {
    let h = Harness::start().await;
    h.lookup.set_offline(true);

    let result = h.coordinator.purchase(PRO).await;
    assert!(matches!(result, Err(PurchaseError::CatalogUnavailable(_))));
    assert_eq!(h.queue.submissions(), 0);
}

#[tokio::test]
async fn test_second_purchase_while_in_flight_is_rejected() {
    let mut h = Harness::start().await;
    h.queue.script(PRO, PaymentScript::Defer);

    let first = h.coordinator.purchase(PRO).await.unwrap();
    assert!(matches!(h.next().await, Notification::Deferred(p) if p.as_str() == PRO));

    let second = h.coordinator.purchase(PRO).await;
    assert!(matches!(second, Err(PurchaseError::AttemptInProgress(_))));
    assert_eq!(h.queue.submissions(), 1);

    // Other products are unaffected.
    h.coordinator.purchase(GEMS).await.unwrap();
    assert!(matches!(h.next().await, Notification::Finished(o) if o.product.as_str() == GEMS));

    // The first attempt still completes normally once approved.
    assert_eq!(h.coordinator.in_flight(&PRO.into()).await, Some(Phase::AwaitingTransaction));
    assert!(h.queue.resolve_deferred(&PRO.into(), true).await.unwrap());
    let Notification::Finished(outcome) = h.next().await else {
        panic!("expected a purchase outcome");
    };
    assert!(outcome.is_success());
    assert!(first.0 > 0);
}

#[tokio::test]
async fn test_transient_verdicts_are_retried() {
    let mut h = Harness::start().await;
    h.verifier.script([transient(), transient(), ReceiptVerdict::Valid]);

    h.coordinator.purchase(PRO).await.unwrap();

    let Notification::Finished(outcome) = h.next().await else {
        panic!("expected a purchase outcome");
    };
    assert!(outcome.is_success());
    assert_eq!(h.verifier.calls(), 3);
}

#[tokio::test]
async fn test_exhausted_retries_leave_transaction_unfinalized() {
    let mut h = Harness::start().await;
    h.verifier.script([transient(), transient(), transient()]);

    h.coordinator.purchase(PRO).await.unwrap();

    let Notification::Finished(outcome) = h.next().await else {
        panic!("expected a purchase outcome");
    };
    assert_eq!(
        outcome.status,
        OutcomeStatus::Failed(FailureReason::ReceiptValidationTransient { attempts: 3 })
    );
    let tx = outcome.transaction.unwrap();
    assert_eq!(h.queue.finalize_count(&tx), 0);
    assert_eq!(h.queue.pending().await.unwrap().len(), 1);

    // The product may be bought again.
    assert!(h.coordinator.in_flight(&PRO.into()).await.is_none());
}

#[tokio::test]
async fn test_invalid_receipt_is_final() {
    let mut h = Harness::start().await;
    h.verifier.script([ReceiptVerdict::Invalid]);

    h.coordinator.purchase(PRO).await.unwrap();

    let Notification::Finished(outcome) = h.next().await else {
        panic!("expected a purchase outcome");
    };
    assert_eq!(outcome.status, OutcomeStatus::Failed(FailureReason::ReceiptInvalid));
    assert_eq!(h.verifier.calls(), 1);
    assert_eq!(h.queue.finalize_count(&outcome.transaction.unwrap()), 1);
}

#[tokio::test]
async fn test_cancel_and_decline_are_failures() {
    let mut h = Harness::start().await;
    h.queue.script(PRO, PaymentScript::Cancel);
    h.queue.script(PRO, PaymentScript::Decline("insufficient funds".to_string()));

    h.coordinator.purchase(PRO).await.unwrap();
    let Notification::Finished(cancelled) = h.next().await else {
        panic!("expected a purchase outcome");
    };
    assert_eq!(cancelled.status, OutcomeStatus::Failed(FailureReason::UserCancelled));
    assert_eq!(h.queue.finalize_count(&cancelled.transaction.unwrap()), 1);

    h.coordinator.purchase(PRO).await.unwrap();
    let Notification::Finished(declined) = h.next().await else {
        panic!("expected a purchase outcome");
    };
    assert_eq!(
        declined.status,
        OutcomeStatus::Failed(FailureReason::PaymentSubmissionFailed("insufficient funds".to_string()))
    );
    assert_eq!(h.verifier.calls(), 0);
}

#[tokio::test]
async fn test_submission_error_is_delivered_through_delegate() {
    let mut h = Harness::start().await;
    h.queue.set_reject_submissions(true);

    h.coordinator.purchase(PRO).await.unwrap();

    let Notification::Finished(outcome) = h.next().await else {
        panic!("expected a purchase outcome");
    };
    assert!(matches!(
        outcome.status,
        OutcomeStatus::Failed(FailureReason::PaymentSubmissionFailed(_))
    ));
    assert!(outcome.transaction.is_none());
    assert!(h.coordinator.in_flight(&PRO.into()).await.is_none());
}

#[tokio::test]
async fn test_released_delegate_still_finalizes() {
    let mut h = Harness::start().await;
    h.queue.script(PRO, PaymentScript::Defer);
    h.coordinator.purchase(PRO).await.unwrap();
    assert!(matches!(h.next().await, Notification::Deferred(_)));

    // Drop the only strong reference before the outcome arrives.
    let silent: Arc<dyn PurchaseDelegate> = Arc::new(common::Silent);
    drop(std::mem::replace(&mut h.delegate, silent));

    h.queue.resolve_deferred(&PRO.into(), true).await.unwrap();

    let queue = h.queue.clone();
    eventually(|| queue.total_finalizations() == 1).await;
    for _ in 0..200 {
        if h.coordinator.in_flight(&PRO.into()).await.is_none() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert!(h.coordinator.in_flight(&PRO.into()).await.is_none());
    // Nothing was delivered, and the channel closed with the dropped delegate.
    assert!(h.notifications.recv().await.is_none());
}

#[tokio::test]
async fn test_redelivered_transaction_is_finalized_once() {
    let mut h = Harness::start().await;

    h.coordinator.purchase(PRO).await.unwrap();
    let Notification::Finished(outcome) = h.next().await else {
        panic!("expected a purchase outcome");
    };

    // The platform delivers the same transaction again.
    let tx = Transaction::new(
        outcome.transaction.clone().unwrap(),
        PRO.into(),
        TransactionState::Purchased,
    )
    .with_receipt(b"receipt".to_vec());
    h.queue.inject(tx).await.unwrap();

    h.assert_quiet().await;
    assert_eq!(h.queue.finalize_count(&outcome.transaction.unwrap()), 1);
}

#[tokio::test]
async fn test_failure_claimed_first_keeps_the_attempt() {
    let mut h = Harness::start().await;
    h.queue.script(PRO, PaymentScript::Defer);
    let token = h.coordinator.purchase(PRO).await.unwrap();
    assert!(matches!(h.next().await, Notification::Deferred(_)));

    // A failure and a settled transaction for the same attempt arrive back to back.
    let failed = Transaction::new(TransactionId::new("t-failed"), PRO.into(), TransactionState::Failed)
        .with_attempt(token)
        .with_failure(PaymentFailure::Cancelled);
    let settled = Transaction::new(TransactionId::new("t-settled"), PRO.into(), TransactionState::Purchased)
        .with_attempt(token)
        .with_receipt(b"receipt".to_vec());
    h.queue.inject(failed).await.unwrap();
    h.queue.inject(settled).await.unwrap();

    let mut outcomes = Vec::new();
    for _ in 0..2 {
        let Notification::Finished(outcome) = h.next().await else {
            panic!("expected a purchase outcome");
        };
        outcomes.push(outcome);
    }
    outcomes.sort_by(|a, b| a.transaction.cmp(&b.transaction));

    assert_eq!(outcomes[0].transaction, Some(TransactionId::new("t-failed")));
    assert_eq!(outcomes[0].status, OutcomeStatus::Failed(FailureReason::UserCancelled));
    assert_eq!(outcomes[1].transaction, Some(TransactionId::new("t-settled")));
    assert_eq!(outcomes[1].status, OutcomeStatus::Succeeded { restored: true });
    assert!(h.coordinator.in_flight(&PRO.into()).await.is_none());
}
