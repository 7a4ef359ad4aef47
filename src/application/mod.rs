//! Application layer orchestrating the purchase flow.
//!
//! `PurchaseCoordinator` is the entry point. It owns the attempts table and
//! serializes phase changes through it, while receipt validation for different
//! products runs concurrently on `tokio` tasks fed by the transaction queue
//! observer.

pub mod catalog;
pub mod coordinator;
pub mod handle;
pub mod notifier;
pub mod observer;
pub mod validator;
