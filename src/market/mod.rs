//! Market data collaborators.
//!
//! - `traits`: the outbound contract the scanner depends on
//! - `types`: forecast and instrument specification payloads
//! - `mock`: in-memory implementation for paper runs, replays and tests

pub mod mock;
mod traits;
mod types;

pub use mock::{InstrumentSnapshot, StaticMarket};
pub use traits::MarketData;
pub use types::{InstrumentSpec, Prediction};
