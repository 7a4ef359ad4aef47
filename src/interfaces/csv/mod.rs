//! CSV formats used by the `iapflow` binary.

pub mod catalog_reader;
pub mod outcome_writer;
pub mod script_reader;
