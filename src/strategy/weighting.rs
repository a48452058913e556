//! Adaptive strategy weighting.
//!
//! Weights drift towards strategies with above-average Sharpe and away from
//! strategies correlated with the rest of the book. After each recompute
//! weights are clipped to their bounds and renormalized to sum to the
//! number of strategies, so the average weight stays at 1. Weights pinned at
//! a bound stay there while the remainder is spread over the rest.

use crate::config::WeightingConfig;
use crate::persistence::{PersistedPerformance, PersistenceManager};
use crate::utils::stats::{mean, pearson, sample_std};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Rolling performance of one strategy.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StrategyPerformance {
    pub trades: u64,
    pub wins: u64,
    pub pnl_history: VecDeque<f64>,
    pub rr_history: VecDeque<f64>,
    pub sharpe: f64,
    pub hit_rate: f64,
    pub avg_rr: f64,
}

impl StrategyPerformance {
    fn push(&mut self, pnl: f64, is_win: bool, realized_rr: f64, cap: usize) {
        self.trades += 1;
        if is_win {
            self.wins += 1;
        }

        self.pnl_history.push_back(pnl);
        self.rr_history.push_back(realized_rr);
        while self.pnl_history.len() > cap {
            self.pnl_history.pop_front();
        }
        while self.rr_history.len() > cap {
            self.rr_history.pop_front();
        }
    }

    fn refresh_metrics(&mut self, annualization: f64) {
        let pnl: Vec<f64> = self.pnl_history.iter().copied().collect();
        let rr: Vec<f64> = self.rr_history.iter().copied().collect();

        self.sharpe = sharpe_ratio(&pnl, annualization);
        self.hit_rate = if self.trades > 0 {
            self.wins as f64 / self.trades as f64
        } else {
            0.0
        };
        self.avg_rr = mean(&rr);
    }
}

/// Annualized Sharpe of a PnL series; 0 when undefined.
pub fn sharpe_ratio(pnl: &[f64], annualization: f64) -> f64 {
    if pnl.len() < 2 {
        return 0.0;
    }
    let std = sample_std(pnl);
    if std <= 0.0 || !std.is_finite() {
        return 0.0;
    }
    mean(pnl) / std * annualization.sqrt()
}

/// Rescale weights to sum to their count without leaving `[min, max]`.
///
/// Each round scales the unpinned weights towards the target sum; any weight
/// that crosses a bound is clamped and pinned. Stops once a round pins
/// nothing, which takes at most one round per weight.
fn rebalance(weights: &mut BTreeMap<String, f64>, min: f64, max: f64) {
    let target = weights.len() as f64;
    let mut pinned: BTreeSet<String> = BTreeSet::new();

    for _ in 0..=weights.len() {
        let (pinned_sum, free_sum) =
            weights
                .iter()
                .fold((0.0, 0.0), |(pinned_sum, free_sum), (id, weight)| {
                    if pinned.contains(id) {
                        (pinned_sum + weight, free_sum)
                    } else {
                        (pinned_sum, free_sum + weight)
                    }
                });
        if !(free_sum > 0.0) {
            break;
        }

        let scale = (target - pinned_sum) / free_sum;
        let mut newly_pinned = false;
        for (id, weight) in weights.iter_mut() {
            if pinned.contains(id) {
                continue;
            }
            let scaled = *weight * scale;
            let bounded = scaled.clamp(min, max);
            if bounded != scaled {
                pinned.insert(id.clone());
                newly_pinned = true;
            }
            *weight = bounded;
        }

        if !newly_pinned {
            break;
        }
    }
}

#[derive(Debug, Default)]
struct WeightState {
    weights: BTreeMap<String, f64>,
    perf: BTreeMap<String, StrategyPerformance>,
}

/// Online weight adaptation from realized trade outcomes.
pub struct AdaptiveWeighting {
    config: WeightingConfig,
    state: RwLock<WeightState>,
    store: Option<Arc<PersistenceManager>>,
}

impl AdaptiveWeighting {
    /// Create a weighting with every strategy neutral at 1.0.
    pub fn new(config: WeightingConfig) -> Self {
        Self {
            config,
            state: RwLock::new(WeightState::default()),
            store: None,
        }
    }

    /// Persist snapshots through `store`.
    pub fn with_store(mut self, store: Arc<PersistenceManager>) -> Self {
        self.store = Some(store);
        self
    }

    /// Weight multiplier for a strategy; 1.0 if unseen.
    pub fn get(&self, strategy_id: &str) -> f64 {
        self.state
            .read()
            .weights
            .get(strategy_id)
            .copied()
            .unwrap_or(1.0)
    }

    /// Append a closed trade to the strategy's rolling histories.
    pub fn record_trade(&self, strategy_id: &str, pnl: f64, is_win: bool, realized_rr: f64) {
        let mut state = self.state.write();
        state.weights.entry(strategy_id.to_string()).or_insert(1.0);

        let perf = state.perf.entry(strategy_id.to_string()).or_default();
        perf.push(pnl, is_win, realized_rr, self.config.history_cap);
        perf.refresh_metrics(self.config.annualization);

        debug!(
            strategy = strategy_id,
            pnl,
            trades = perf.trades,
            sharpe = perf.sharpe,
            hit_rate = perf.hit_rate,
            "Trade recorded"
        );
    }

    /// Move weights by relative Sharpe and a correlation penalty, then
    /// renormalize.
    ///
    /// Strategies missing from `correlations` take no penalty.
    pub fn recompute(&self, correlations: &BTreeMap<String, f64>) {
        let mut state = self.state.write();
        if state.weights.is_empty() {
            return;
        }

        let sharpes: Vec<f64> = state
            .weights
            .keys()
            .map(|id| state.perf.get(id).map_or(0.0, |p| p.sharpe))
            .collect();
        let mean_sharpe = mean(&sharpes);

        let WeightState { weights, perf } = &mut *state;
        for (id, weight) in weights.iter_mut() {
            let sharpe = perf.get(id).map_or(0.0, |p| p.sharpe);
            let correlation = correlations.get(id).copied().unwrap_or(0.0);
            let updated = *weight + self.config.eta * (sharpe - mean_sharpe)
                - self.config.lambda * correlation;
            *weight = if updated.is_finite() {
                updated.clamp(self.config.min_weight, self.config.max_weight)
            } else {
                1.0
            };
        }

        rebalance(weights, self.config.min_weight, self.config.max_weight);

        debug!(strategies = weights.len(), mean_sharpe, "Weights recomputed");
    }

    /// Mean absolute PnL correlation of each strategy with the others.
    pub fn strategy_correlations(&self) -> BTreeMap<String, f64> {
        let state = self.state.read();
        let series: Vec<(&String, Vec<f64>)> = state
            .perf
            .iter()
            .map(|(id, p)| (id, p.pnl_history.iter().copied().collect()))
            .collect();

        series
            .iter()
            .map(|(id, pnl)| {
                let others: Vec<f64> = series
                    .iter()
                    .filter(|(other, _)| other != id)
                    .map(|(_, other_pnl)| pearson(pnl, other_pnl).abs())
                    .collect();
                ((*id).clone(), mean(&others))
            })
            .collect()
    }

    /// Current weights.
    pub fn weights(&self) -> BTreeMap<String, f64> {
        self.state.read().weights.clone()
    }

    /// Current per-strategy performance.
    pub fn performance(&self) -> BTreeMap<String, StrategyPerformance> {
        self.state.read().perf.clone()
    }

    /// Write the full snapshot. Failures are logged, never raised.
    pub fn persist(&self) {
        let Some(store) = &self.store else {
            return;
        };

        let snapshot: Vec<PersistedPerformance> = {
            let state = self.state.read();
            state
                .weights
                .iter()
                .map(|(id, weight)| {
                    let perf = state.perf.get(id).cloned().unwrap_or_default();
                    PersistedPerformance {
                        strategy_id: id.clone(),
                        weight: *weight,
                        trades: perf.trades,
                        wins: perf.wins,
                        pnl_history: perf.pnl_history.into_iter().collect(),
                        rr_history: perf.rr_history.into_iter().collect(),
                        sharpe: perf.sharpe,
                    }
                })
                .collect()
        };

        if let Err(e) = store.save_performance(&snapshot) {
            warn!(error = %e, "Failed to persist strategy weights");
        }
    }

    /// Restore the snapshot. A missing snapshot leaves every strategy at 1.0.
    pub fn load(&self) -> usize {
        let Some(store) = &self.store else {
            return 0;
        };

        let rows = match store.load_performance() {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "Failed to load strategy weights, starting neutral");
                return 0;
            }
        };

        let cap = self.config.history_cap;
        let mut state = self.state.write();
        for row in &rows {
            let skip_pnl = row.pnl_history.len().saturating_sub(cap);
            let skip_rr = row.rr_history.len().saturating_sub(cap);
            let mut perf = StrategyPerformance {
                trades: row.trades,
                wins: row.wins,
                pnl_history: row.pnl_history.iter().skip(skip_pnl).copied().collect(),
                rr_history: row.rr_history.iter().skip(skip_rr).copied().collect(),
                ..StrategyPerformance::default()
            };
            perf.refresh_metrics(self.config.annualization);

            let weight = if row.weight.is_finite() && row.weight > 0.0 {
                row.weight
            } else {
                1.0
            };
            state.weights.insert(row.strategy_id.clone(), weight);
            state.perf.insert(row.strategy_id.clone(), perf);
        }

        info!(strategies = rows.len(), "Strategy weights restored");
        rows.len()
    }
}

impl Default for AdaptiveWeighting {
    fn default() -> Self {
        Self::new(WeightingConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sum_weights(w: &AdaptiveWeighting) -> f64 {
        w.weights().values().sum()
    }

    #[test]
    fn test_unseen_strategy_is_neutral() {
        let weighting = AdaptiveWeighting::default();
        assert_eq!(weighting.get("never_traded"), 1.0);
    }

    #[test]
    fn test_history_is_capped() {
        let weighting = AdaptiveWeighting::default();
        for i in 0..150 {
            weighting.record_trade("s", i as f64, true, 1.5);
        }

        let perf = &weighting.performance()["s"];
        assert_eq!(perf.trades, 150);
        assert_eq!(perf.pnl_history.len(), 100);
        assert_eq!(perf.rr_history.len(), 100);
        assert_eq!(perf.pnl_history.front().copied(), Some(50.0));
    }

    #[test]
    fn test_sharpe_edge_cases() {
        assert_eq!(sharpe_ratio(&[], 250.0), 0.0);
        assert_eq!(sharpe_ratio(&[5.0], 250.0), 0.0);
        assert_eq!(sharpe_ratio(&[2.0, 2.0, 2.0], 250.0), 0.0);

        // mean 2.5, sample std 1.2910
        let sharpe = sharpe_ratio(&[1.0, 2.0, 3.0, 4.0], 250.0);
        let expected = 2.5 / 1.290_994_448_735_805_6 * 250f64.sqrt();
        assert!((sharpe - expected).abs() < 1e-9);
    }

    #[test]
    fn test_hit_rate_and_avg_rr() {
        let weighting = AdaptiveWeighting::default();
        weighting.record_trade("s", 10.0, true, 2.0);
        weighting.record_trade("s", -5.0, false, -1.0);
        weighting.record_trade("s", 8.0, true, 1.6);
        weighting.record_trade("s", -5.0, false, -1.0);

        let perf = &weighting.performance()["s"];
        assert_eq!(perf.hit_rate, 0.5);
        assert!((perf.avg_rr - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_recompute_normalizes_to_strategy_count() {
        let weighting = AdaptiveWeighting::default();
        for (i, pnl) in [12.0, -3.0, 7.0, 9.0, -1.0, 4.0].iter().enumerate() {
            weighting.record_trade("alpha", *pnl, *pnl > 0.0, 1.5);
            weighting.record_trade("beta", -pnl * 0.5, *pnl < 0.0, 1.0);
            weighting.record_trade("gamma", (i as f64).sin(), true, 1.2);
        }

        let mut correlations = BTreeMap::new();
        correlations.insert("alpha".to_string(), 0.9);
        correlations.insert("beta".to_string(), 0.1);

        for _ in 0..25 {
            weighting.recompute(&correlations);
            assert!((sum_weights(&weighting) - 3.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_better_sharpe_gains_weight() {
        let weighting = AdaptiveWeighting::new(WeightingConfig {
            eta: 0.1,
            ..WeightingConfig::default()
        });
        for pnl in [5.0, 6.0, 5.5, 6.5] {
            weighting.record_trade("good", pnl, true, 2.0);
        }
        for pnl in [-5.0, -6.0, -5.5, -6.5] {
            weighting.record_trade("bad", pnl, false, -1.0);
        }

        weighting.recompute(&BTreeMap::new());
        assert!(weighting.get("good") > weighting.get("bad"));
    }

    #[test]
    fn test_weights_bounded_and_normalized_together() {
        let weighting = AdaptiveWeighting::new(WeightingConfig {
            eta: 10.0,
            ..WeightingConfig::default()
        });
        weighting.record_trade("good", 5.0, true, 2.0);
        weighting.record_trade("good", 6.0, true, 2.0);
        weighting.record_trade("bad", -5.0, false, -1.0);
        weighting.record_trade("bad", -6.0, false, -1.0);

        for _ in 0..400 {
            weighting.recompute(&BTreeMap::new());
            let weights = weighting.weights();
            for weight in weights.values() {
                assert!(*weight >= 0.1 && *weight <= 2.0, "weight {} out of bounds", weight);
            }
            assert!((sum_weights(&weighting) - 2.0).abs() < 1e-9);
        }

        // bad pinned at the floor, good takes the rest
        let weights = weighting.weights();
        assert!((weights["bad"] - 0.1).abs() < 1e-9);
        assert!((weights["good"] - 1.9).abs() < 1e-9);
    }

    #[test]
    fn test_rebalance_pins_ceiling_and_spreads_remainder() {
        let mut weights = BTreeMap::new();
        weights.insert("a".to_string(), 2.0);
        weights.insert("b".to_string(), 0.1);
        weights.insert("c".to_string(), 0.1);

        rebalance(&mut weights, 0.1, 2.0);

        assert!((weights["a"] - 2.0).abs() < 1e-9);
        assert!((weights["b"] - 0.5).abs() < 1e-9);
        assert!((weights["c"] - 0.5).abs() < 1e-9);
        let total: f64 = weights.values().sum();
        assert!((total - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_strategy_correlations() {
        let weighting = AdaptiveWeighting::default();
        for pnl in [1.0, 2.0, 3.0, 4.0] {
            weighting.record_trade("a", pnl, true, 1.0);
            weighting.record_trade("b", pnl * 2.0, true, 1.0);
        }

        let correlations = weighting.strategy_correlations();
        assert!((correlations["a"] - 1.0).abs() < 1e-9);
        assert!((correlations["b"] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_persist_and_restore() {
        let store = Arc::new(PersistenceManager::in_memory().unwrap());
        let weighting = AdaptiveWeighting::default().with_store(store.clone());
        for pnl in [3.0, -1.0, 2.0] {
            weighting.record_trade("momentum_breakout", pnl, pnl > 0.0, 1.5);
        }
        weighting.record_trade("vwap_reversion", -2.0, false, -1.0);
        weighting.recompute(&BTreeMap::new());
        weighting.persist();

        let restored = AdaptiveWeighting::default().with_store(store);
        assert_eq!(restored.load(), 2);
        assert!((restored.get("momentum_breakout") - weighting.get("momentum_breakout")).abs() < 1e-12);

        let perf = &restored.performance()["momentum_breakout"];
        assert_eq!(perf.trades, 3);
        assert_eq!(perf.wins, 2);
        assert_eq!(perf.pnl_history.len(), 3);
    }

    #[test]
    fn test_load_without_store_is_cold_start() {
        let weighting = AdaptiveWeighting::default();
        assert_eq!(weighting.load(), 0);
        assert!(weighting.weights().is_empty());
    }
}
