//! Collaborator payload types.

use crate::error::SizingError;
use serde::{Deserialize, Serialize};

/// Model forecast for one instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Win probability in [0, 1]
    pub p_win: f64,
    /// Forecast volatility as a fraction of price (> 0)
    pub vol_forecast: f64,
    /// Market regime label (e.g. "trending", "mean_reverting", "choppy")
    pub regime: String,
}

impl Prediction {
    pub fn new(p_win: f64, vol_forecast: f64, regime: &str) -> Self {
        Self {
            p_win,
            vol_forecast,
            regime: regime.to_string(),
        }
    }

    /// Whether the forecast is usable for scoring.
    pub fn is_usable(&self) -> bool {
        self.p_win.is_finite()
            && (0.0..=1.0).contains(&self.p_win)
            && self.vol_forecast.is_finite()
            && self.vol_forecast > 0.0
            && !self.regime.is_empty()
    }
}

/// Contract specification of a tradable instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentSpec {
    /// Smallest price increment
    pub point: f64,
    /// Account-currency value of one point for one lot
    pub tick_value: f64,
    pub volume_min: f64,
    pub volume_max: f64,
    pub volume_step: f64,
}

impl InstrumentSpec {
    /// Reject specs that would make sizing meaningless.
    pub fn validate(&self) -> Result<(), SizingError> {
        let malformed = |reason: &str| SizingError::MalformedSpec(reason.to_string());

        let all_finite = [
            self.point,
            self.tick_value,
            self.volume_min,
            self.volume_max,
            self.volume_step,
        ]
        .iter()
        .all(|v| v.is_finite());

        if !all_finite {
            return Err(malformed("non-finite field"));
        }
        if self.point <= 0.0 {
            return Err(malformed("point must be positive"));
        }
        if self.tick_value <= 0.0 {
            return Err(malformed("tick_value must be positive"));
        }
        if self.volume_step <= 0.0 {
            return Err(malformed("volume_step must be positive"));
        }
        if self.volume_min < 0.0 || self.volume_min > self.volume_max {
            return Err(malformed("volume_min must be within [0, volume_max]"));
        }
        Ok(())
    }
}

impl Default for InstrumentSpec {
    fn default() -> Self {
        Self {
            point: 0.00001,
            tick_value: 1.0,
            volume_min: 0.01,
            volume_max: 100.0,
            volume_step: 0.01,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_spec_is_valid() {
        assert!(InstrumentSpec::default().validate().is_ok());
    }

    #[test]
    fn test_malformed_specs() {
        let bad_step = InstrumentSpec {
            volume_step: 0.0,
            ..InstrumentSpec::default()
        };
        assert!(matches!(
            bad_step.validate(),
            Err(SizingError::MalformedSpec(_))
        ));

        let inverted = InstrumentSpec {
            volume_min: 5.0,
            volume_max: 1.0,
            ..InstrumentSpec::default()
        };
        assert!(inverted.validate().is_err());

        let nan_tick = InstrumentSpec {
            tick_value: f64::NAN,
            ..InstrumentSpec::default()
        };
        assert!(nan_tick.validate().is_err());
    }

    #[test]
    fn test_prediction_usability() {
        assert!(Prediction::new(0.6, 0.01, "trending").is_usable());
        assert!(!Prediction::new(1.2, 0.01, "trending").is_usable());
        assert!(!Prediction::new(0.6, 0.0, "trending").is_usable());
        assert!(!Prediction::new(0.6, 0.01, "").is_usable());
    }
}
