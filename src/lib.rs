//! Purchase flow coordination for in-app purchases.
//!
//! A [`application::coordinator::PurchaseCoordinator`] takes a purchase from
//! payment submission through the platform transaction queue and receipt
//! validation to exactly one delegate notification, and replays prior
//! purchases on restore. Platform services are reached through the ports in
//! [`domain::ports`].

pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod interfaces;
pub mod logging;
