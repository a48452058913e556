//! Collaborator contracts consumed by the scanner.
//!
//! Feature extraction, model inference, the news calendar, the correlation
//! service and the instrument catalog live outside this crate. The scanner
//! only sees them through [`MarketData`].

use super::types::{InstrumentSpec, Prediction};
use crate::alpha::Features;
use crate::error::MarketDataError;
use async_trait::async_trait;

/// Outbound interface to the data and inference services.
///
/// `Ok(None)` means "no data right now" and skips the instrument quietly;
/// `Err` is a collaborator failure and is counted in the scan statistics.
#[async_trait]
pub trait MarketData: Send + Sync {
    /// Latest named features for an instrument.
    async fn features(&self, instrument: &str) -> Result<Option<Features>, MarketDataError>;

    /// Model forecast (win probability, volatility, regime).
    async fn predict(&self, instrument: &str) -> Result<Option<Prediction>, MarketDataError>;

    /// Whether a news embargo currently blocks the instrument.
    async fn embargo_active(&self, instrument: &str) -> bool;

    /// Correlation of `instrument` with the currently open book.
    async fn portfolio_correlation(
        &self,
        instrument: &str,
        open_positions: &[String],
    ) -> Result<f64, MarketDataError>;

    /// Contract specification used for lot sizing.
    async fn instrument_spec(
        &self,
        instrument: &str,
    ) -> Result<Option<InstrumentSpec>, MarketDataError>;
}
