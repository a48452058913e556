//! Built-in alpha strategies and the static catalog.

use super::{Action, Features, Signal, Strategy};
use std::sync::Arc;

/// Donchian-channel breakout: close above the 20-bar high buys, below the low sells.
#[derive(Debug, Clone)]
pub struct MomentumBreakout {
    pub expected_rr: f64,
}

impl Default for MomentumBreakout {
    fn default() -> Self {
        Self { expected_rr: 2.0 }
    }
}

impl Strategy for MomentumBreakout {
    fn id(&self) -> &str {
        "momentum_breakout"
    }

    fn evaluate(&self, features: &Features) -> Option<Signal> {
        let close = features.get("close")?;
        let high = features.get("high_20")?;
        let low = features.get("low_20")?;
        let atr = features.get("atr")?;
        if atr <= 0.0 {
            return None;
        }

        let (action, excess) = if close > high {
            (Action::Buy, close - high)
        } else if close < low {
            (Action::Sell, low - close)
        } else {
            return None;
        };

        // Half an ATR through the channel is a strong breakout
        let confidence = (0.5 + excess / atr).min(0.95);
        Signal::new(action, confidence, self.expected_rr)
    }
}

/// RSI mean reversion at the classic 30/70 bands.
#[derive(Debug, Clone)]
pub struct RsiReversion {
    pub oversold: f64,
    pub overbought: f64,
    pub expected_rr: f64,
}

impl Default for RsiReversion {
    fn default() -> Self {
        Self {
            oversold: 30.0,
            overbought: 70.0,
            expected_rr: 1.5,
        }
    }
}

impl Strategy for RsiReversion {
    fn id(&self) -> &str {
        "rsi_reversion"
    }

    fn evaluate(&self, features: &Features) -> Option<Signal> {
        let rsi = features.get("rsi_14")?;

        if rsi < self.oversold {
            let confidence = 0.5 + (self.oversold - rsi) / 60.0;
            Signal::new(Action::Buy, confidence, self.expected_rr)
        } else if rsi > self.overbought {
            let confidence = 0.5 + (rsi - self.overbought) / 60.0;
            Signal::new(Action::Sell, confidence, self.expected_rr)
        } else {
            None
        }
    }
}

/// Fast/slow EMA trend follower gated on ADX trend strength.
#[derive(Debug, Clone)]
pub struct EmaTrend {
    pub min_adx: f64,
    pub expected_rr: f64,
}

impl Default for EmaTrend {
    fn default() -> Self {
        Self {
            min_adx: 20.0,
            expected_rr: 1.8,
        }
    }
}

impl Strategy for EmaTrend {
    fn id(&self) -> &str {
        "ema_trend"
    }

    fn evaluate(&self, features: &Features) -> Option<Signal> {
        let fast = features.get("ema_fast")?;
        let slow = features.get("ema_slow")?;
        let adx = features.get("adx")?;

        // Trendless tape: stand aside explicitly
        if adx < self.min_adx {
            return Signal::new(Action::Hold, 0.0, self.expected_rr);
        }

        let confidence = (adx / 50.0).min(0.9);
        if fast > slow {
            Signal::new(Action::Buy, confidence, self.expected_rr)
        } else if fast < slow {
            Signal::new(Action::Sell, confidence, self.expected_rr)
        } else {
            None
        }
    }
}

/// Bollinger band break out of a low-width squeeze.
#[derive(Debug, Clone)]
pub struct BollingerSqueeze {
    pub max_width: f64,
    pub expected_rr: f64,
}

impl Default for BollingerSqueeze {
    fn default() -> Self {
        Self {
            max_width: 0.02,
            expected_rr: 2.5,
        }
    }
}

impl Strategy for BollingerSqueeze {
    fn id(&self) -> &str {
        "bollinger_squeeze"
    }

    fn evaluate(&self, features: &Features) -> Option<Signal> {
        let close = features.get("close")?;
        let upper = features.get("bb_upper")?;
        let lower = features.get("bb_lower")?;
        let width = features.get("bb_width")?;

        if width >= self.max_width {
            return None;
        }

        let confidence = 0.6 + (self.max_width - width) / self.max_width * 0.2;
        if close > upper {
            Signal::new(Action::Buy, confidence, self.expected_rr)
        } else if close < lower {
            Signal::new(Action::Sell, confidence, self.expected_rr)
        } else {
            None
        }
    }
}

/// Top-of-book imbalance in [-1, 1].
#[derive(Debug, Clone)]
pub struct OrderFlowImbalance {
    pub threshold: f64,
    pub expected_rr: f64,
}

impl Default for OrderFlowImbalance {
    fn default() -> Self {
        Self {
            threshold: 0.3,
            expected_rr: 1.2,
        }
    }
}

impl Strategy for OrderFlowImbalance {
    fn id(&self) -> &str {
        "order_flow_imbalance"
    }

    fn evaluate(&self, features: &Features) -> Option<Signal> {
        let imbalance = features.get("book_imbalance")?.clamp(-1.0, 1.0);

        if imbalance > self.threshold {
            Signal::new(Action::Buy, imbalance, self.expected_rr)
        } else if imbalance < -self.threshold {
            Signal::new(Action::Sell, -imbalance, self.expected_rr)
        } else {
            None
        }
    }
}

/// Fade stretches of more than `max_deviation` ATRs away from VWAP.
#[derive(Debug, Clone)]
pub struct VwapReversion {
    pub max_deviation: f64,
    pub expected_rr: f64,
}

impl Default for VwapReversion {
    fn default() -> Self {
        Self {
            max_deviation: 2.0,
            expected_rr: 1.5,
        }
    }
}

impl Strategy for VwapReversion {
    fn id(&self) -> &str {
        "vwap_reversion"
    }

    fn evaluate(&self, features: &Features) -> Option<Signal> {
        let close = features.get("close")?;
        let vwap = features.get("vwap")?;
        let atr = features.get("atr")?;
        if atr <= 0.0 {
            return None;
        }

        let deviation = (close - vwap) / atr;
        let confidence = (deviation.abs() / 4.0).min(0.9);
        if deviation > self.max_deviation {
            Signal::new(Action::Sell, confidence, self.expected_rr)
        } else if deviation < -self.max_deviation {
            Signal::new(Action::Buy, confidence, self.expected_rr)
        } else {
            None
        }
    }
}

/// Fixed registry of strategies in registration order.
#[derive(Clone)]
pub struct AlphaCatalog {
    strategies: Vec<Arc<dyn Strategy>>,
}

impl AlphaCatalog {
    /// Catalog of the built-in alphas.
    pub fn builtin() -> Self {
        Self::with_strategies(vec![
            Arc::new(MomentumBreakout::default()),
            Arc::new(RsiReversion::default()),
            Arc::new(EmaTrend::default()),
            Arc::new(BollingerSqueeze::default()),
            Arc::new(OrderFlowImbalance::default()),
            Arc::new(VwapReversion::default()),
        ])
    }

    /// Catalog of caller-supplied strategies. Later duplicates of an id are dropped.
    pub fn with_strategies(strategies: Vec<Arc<dyn Strategy>>) -> Self {
        let mut unique: Vec<Arc<dyn Strategy>> = Vec::with_capacity(strategies.len());
        for strategy in strategies {
            if unique.iter().any(|s| s.id() == strategy.id()) {
                tracing::warn!(id = strategy.id(), "Duplicate strategy id ignored");
                continue;
            }
            unique.push(strategy);
        }
        Self { strategies: unique }
    }

    /// Strategy ids in registration order.
    pub fn ids(&self) -> Vec<String> {
        self.strategies.iter().map(|s| s.id().to_string()).collect()
    }

    pub fn get(&self, id: &str) -> Option<&Arc<dyn Strategy>> {
        self.strategies.iter().find(|s| s.id() == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Strategy>> {
        self.strategies.iter()
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}

impl Default for AlphaCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl std::fmt::Debug for AlphaCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlphaCatalog")
            .field("strategies", &self.ids())
            .finish()
    }
}
