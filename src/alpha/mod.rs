//! Alpha signal generators.
//!
//! Each alpha is a pure rule mapping a feature snapshot to an optional
//! directional [`Signal`]. The [`AlphaCatalog`] is built once at startup and
//! fixes the registration order used as the ranking tie-break.

mod catalog;

pub use catalog::{
    AlphaCatalog, BollingerSqueeze, EmaTrend, MomentumBreakout, OrderFlowImbalance, RsiReversion,
    VwapReversion,
};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Trade direction emitted by an alpha.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Buy,
    Sell,
    Hold,
}

impl Action {
    /// +1 for buys, -1 for sells, 0 for hold.
    pub fn direction(&self) -> f64 {
        match self {
            Action::Buy => 1.0,
            Action::Sell => -1.0,
            Action::Hold => 0.0,
        }
    }

    pub fn is_actionable(&self) -> bool {
        !matches!(self, Action::Hold)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Buy => write!(f, "BUY"),
            Action::Sell => write!(f, "SELL"),
            Action::Hold => write!(f, "HOLD"),
        }
    }
}

/// Raw output of a strategy evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub action: Action,
    /// Strategy confidence in [0, 1]
    pub confidence: f64,
    /// Expected reward-to-risk multiple (> 0)
    pub expected_rr: f64,
}

impl Signal {
    /// Build a signal, clamping confidence into [0, 1].
    ///
    /// Returns `None` when the reward/risk multiple is not strictly positive.
    pub fn new(action: Action, confidence: f64, expected_rr: f64) -> Option<Self> {
        if !(expected_rr > 0.0) || !expected_rr.is_finite() {
            return None;
        }
        Some(Self {
            action,
            confidence: if confidence.is_finite() {
                confidence.clamp(0.0, 1.0)
            } else {
                0.0
            },
            expected_rr,
        })
    }
}

/// Named numeric features for one instrument at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Features(BTreeMap<String, f64>);

impl Features {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: &str, value: f64) -> Self {
        self.0.insert(name.to_string(), value);
        self
    }

    pub fn insert(&mut self, name: &str, value: f64) {
        self.0.insert(name.to_string(), value);
    }

    /// Finite value of a feature, if present.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied().filter(|v| v.is_finite())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, f64)> for Features {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A signal-generating alpha.
///
/// Implementations must be pure: the same features always produce the same
/// signal. They are shared across scan tasks, hence `Send + Sync`.
pub trait Strategy: Send + Sync {
    /// Stable identifier used for weighting, bandit posteriors and persistence.
    fn id(&self) -> &str;

    /// Evaluate the entry condition. `None` when it does not hold or a
    /// required feature is missing.
    fn evaluate(&self, features: &Features) -> Option<Signal>;
}
