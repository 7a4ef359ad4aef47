//! Domain types of the purchase flow and the ports it talks through.

pub mod attempt;
pub mod outcome;
pub mod ports;
pub mod product;
pub mod receipt;
pub mod transaction;
