//! Outer surfaces of the crate.

pub mod csv;
