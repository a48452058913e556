//! Shared numeric utilities.

pub mod decimal;
pub mod stats;
