//! Position sizing: fractional Kelly, ES95 tail-risk cap and volatility targeting.
//!
//! All functions are pure. Equity, volatility and the instrument spec are
//! passed in by the caller; nothing here holds mutable state.

use crate::alpha::Action;
use crate::config::SizingConfig;
use crate::error::SizingError;
use crate::market::InstrumentSpec;
use crate::utils::decimal::{floor_to_step, round_to_step};
use std::f64::consts::LN_2;
use tracing::trace;

/// One-sided 95% quantile of the standard normal.
pub const ES95_FACTOR: f64 = 1.645;

/// Live quality score Q*.
///
/// `clip(((p*rr - (1-p)) * (1 - h/ln2)) / vol * 100, 0, 10)`. Degenerate
/// volatility scores zero.
pub fn quality_score(p_win: f64, expected_rr: f64, vol_forecast: f64, entropy: f64) -> f64 {
    if !(vol_forecast > 0.0) || !vol_forecast.is_finite() {
        return 0.0;
    }
    let edge = p_win * expected_rr - (1.0 - p_win);
    let penalty = 1.0 - entropy / LN_2;
    let score = edge * penalty / vol_forecast * 100.0;
    if score.is_nan() {
        return 0.0;
    }
    score.clamp(0.0, 10.0)
}

/// Converts forecasts into bounded lot sizes.
#[derive(Debug, Clone)]
pub struct PositionSizer {
    config: SizingConfig,
}

impl PositionSizer {
    /// Create a new position sizer.
    pub fn new(config: SizingConfig) -> Self {
        Self { config }
    }

    pub fn max_risk_per_trade(&self) -> f64 {
        self.config.max_risk_per_trade
    }

    /// Fraction of equity to risk, in `[0, max_risk_per_trade]`.
    ///
    /// Kelly for a binary bet paying `expected_rr` on a win and losing one unit
    /// otherwise, scaled by `kelly_scale` and penalised by forecast entropy.
    pub fn kelly_fraction(&self, p_win: f64, expected_rr: f64, entropy: f64) -> f64 {
        let q = 1.0 - p_win;
        let edge = p_win * expected_rr - q;
        let variance = p_win * expected_rr.powi(2) + q - edge.powi(2);
        if !(variance > 0.0) {
            return 0.0;
        }

        let kelly = edge / variance;
        let entropy_penalty = 1.0 - entropy / LN_2;
        let fraction = self.config.kelly_scale * kelly * entropy_penalty;
        if fraction.is_nan() {
            return 0.0;
        }

        fraction.clamp(0.0, self.config.max_risk_per_trade)
    }

    /// Lots to trade for a given stop distance.
    ///
    /// `stop_distance` is in points; one point moves one lot by `tick_value`.
    /// A zero-edge or zero-risk trade sizes to zero rather than to the
    /// instrument minimum.
    pub fn size(
        &self,
        equity: f64,
        p_win: f64,
        expected_rr: f64,
        stop_distance: f64,
        spec: &InstrumentSpec,
        entropy: f64,
    ) -> Result<f64, SizingError> {
        if !equity.is_finite() || equity < 0.0 {
            return Err(SizingError::InvalidEquity(equity));
        }
        spec.validate()?;

        let fraction = self.kelly_fraction(p_win, expected_rr, entropy);
        let risk_amount = equity * fraction;
        let risk_per_lot = stop_distance * spec.tick_value;
        if !(risk_per_lot > 0.0) {
            return Ok(0.0);
        }

        let lots = Self::normalize_lots(risk_amount / risk_per_lot, spec);
        trace!(
            fraction,
            risk_amount,
            risk_per_lot,
            lots,
            "Kelly sizing"
        );
        Ok(lots)
    }

    /// Round to the nearest volume step and clip to the instrument's range.
    ///
    /// Zero (or negative) stays zero: no trade.
    pub fn normalize_lots(lots: f64, spec: &InstrumentSpec) -> f64 {
        if !(lots > 0.0) {
            return 0.0;
        }
        let stepped = round_to_step(lots, spec.volume_step);
        stepped.clamp(spec.volume_min, spec.volume_max)
    }

    /// Rescale lots towards a volatility target, never scaling up beyond
    /// `max_vol_scale_up`.
    pub fn apply_vol_target(&self, lots: f64, realized_vol: f64, target_vol: f64) -> f64 {
        if !(realized_vol > 0.0) || !realized_vol.is_finite() {
            return lots;
        }
        let scale = (target_vol / realized_vol).min(self.config.max_vol_scale_up);
        lots * scale
    }

    /// Volatility stop: below entry for buys, above for sells.
    pub fn stop_loss(entry: f64, volatility: f64, action: Action, multiplier: f64) -> f64 {
        entry - action.direction() * entry * volatility * multiplier
    }

    /// Target `rr_ratio` times the stop distance away, in the trade direction.
    pub fn take_profit(entry: f64, stop_loss: f64, action: Action, rr_ratio: f64) -> f64 {
        entry + action.direction() * (entry - stop_loss).abs() * rr_ratio
    }

    /// 95% expected shortfall of a sized position.
    pub fn tail_risk(lots: f64, stop_distance: f64) -> f64 {
        lots * stop_distance * ES95_FACTOR
    }

    /// Shrink lots until ES95 fits under `cap`.
    ///
    /// Within the cap the size is returned unchanged, so applying this twice
    /// equals applying it once. Over the cap, lots become
    /// `cap / (stop_distance * 1.645)` rounded down to the volume step and
    /// floored at `volume_min`; the caller must still check the result since
    /// the minimum lot can itself exceed the cap. Re-run whenever the stop
    /// distance or cap changes.
    pub fn reconcile_tail_risk(
        lots: f64,
        stop_distance: f64,
        cap: f64,
        spec: &InstrumentSpec,
    ) -> f64 {
        if Self::tail_risk(lots, stop_distance) <= cap {
            return lots;
        }
        if !(stop_distance > 0.0) {
            return lots;
        }

        let capped = floor_to_step(cap / (stop_distance * ES95_FACTOR), spec.volume_step);
        let reconciled = capped.max(spec.volume_min);
        trace!(lots, reconciled, cap, "Tail risk reconciled");
        reconciled
    }
}

impl Default for PositionSizer {
    fn default() -> Self {
        Self::new(SizingConfig::default())
    }
}
