//! Risk controls for candidate trades.
//!
//! - `sizing`: fractional Kelly lots, volatility targeting, ES95 reconciliation
//! - `gate`: spread, slippage, latency and quote-flicker admission control

mod gate;
mod sizing;

pub use gate::{ExecutionGate, GateFailure, GateStatus, GateVerdict, PauseAlert};
pub use sizing::{quality_score, PositionSizer, ES95_FACTOR};
