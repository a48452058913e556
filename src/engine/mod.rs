//! Decision engine: the inbound surface of the crate.
//!
//! Owns the bandit, the weighting, the execution gate and the scanner, and
//! wires them to a market data collaborator and optional persistence. A
//! service layer calls `scan` on its cadence and `record_outcome` whenever a
//! trade closes; both may run concurrently.

use crate::alpha::AlphaCatalog;
use crate::config::Config;
use crate::market::MarketData;
use crate::persistence::{OutcomeRecord, PersistenceManager};
use crate::risk::{ExecutionGate, GateStatus};
use crate::strategy::{
    pnl_reward, AdaptiveWeighting, BetaPosterior, RegimeBandit, ScanContext, ScanStats, Scanner,
    StrategyPerformance, TradingPlan,
};
use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Weight and performance of one strategy.
#[derive(Debug, Clone, Serialize)]
pub struct StrategyStats {
    pub weight: f64,
    pub performance: Option<StrategyPerformance>,
}

/// Operator-facing statistics.
#[derive(Debug, Clone, Serialize)]
pub struct CoreStats {
    pub scan: ScanStats,
    pub skip_rate: f64,
    pub strategies: BTreeMap<String, StrategyStats>,
    /// regime -> strategy -> posterior
    pub bandit: BTreeMap<String, BTreeMap<String, BetaPosterior>>,
    pub gate: GateStatus,
}

/// Scan orchestration plus online learning from trade outcomes.
pub struct DecisionEngine {
    config: Config,
    market: Arc<dyn MarketData>,
    scanner: Scanner,
    bandit: RegimeBandit,
    weighting: AdaptiveWeighting,
    gate: ExecutionGate,
    store: Option<Arc<PersistenceManager>>,
}

impl DecisionEngine {
    /// Build an engine from configuration with the built-in strategies,
    /// opening the state database if persistence is enabled.
    pub fn from_config(config: Config, market: Arc<dyn MarketData>) -> Result<Self> {
        config.validate()?;

        let store = if config.persistence.enabled {
            Some(Arc::new(PersistenceManager::new(&config.persistence.db_path)?))
        } else {
            None
        };

        Ok(Self::new(config, AlphaCatalog::builtin(), market, store))
    }

    /// Build an engine and restore any persisted learning state.
    pub fn new(
        config: Config,
        catalog: AlphaCatalog,
        market: Arc<dyn MarketData>,
        store: Option<Arc<PersistenceManager>>,
    ) -> Self {
        let mut bandit = RegimeBandit::new(config.bandit.seed);
        let mut weighting = AdaptiveWeighting::new(config.weighting.clone());
        if let Some(store) = &store {
            bandit = bandit.with_store(store.clone());
            weighting = weighting.with_store(store.clone());
        }
        bandit.load();
        weighting.load();

        let scanner = Scanner::new(
            config.scanner.clone(),
            config.sizing.clone(),
            Arc::new(catalog),
        );
        let gate = ExecutionGate::new(config.gate.clone());

        info!(
            strategies = scanner.catalog().len(),
            instruments = scanner.instruments().len(),
            persistence = store.is_some(),
            "Decision engine ready"
        );

        Self {
            config,
            market,
            scanner,
            bandit,
            weighting,
            gate,
            store,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn bandit(&self) -> &RegimeBandit {
        &self.bandit
    }

    pub fn weighting(&self) -> &AdaptiveWeighting {
        &self.weighting
    }

    pub fn gate(&self) -> &ExecutionGate {
        &self.gate
    }

    pub fn scanner(&self) -> &Scanner {
        &self.scanner
    }

    /// Ranked plans for this cycle; `open_positions` lists instruments
    /// already held.
    pub async fn scan(&self, open_positions: &[String]) -> Vec<TradingPlan> {
        let ctx = ScanContext {
            market: self.market.as_ref(),
            bandit: &self.bandit,
            weighting: &self.weighting,
            gate: &self.gate,
        };
        self.scanner.scan(&ctx, open_positions).await
    }

    /// Learn from a closed trade.
    ///
    /// The bandit is credited with the PnL as a share of `reward_scale`;
    /// weights are recomputed against current strategy correlations and both
    /// snapshots are persisted.
    pub fn record_outcome(
        &self,
        strategy_id: &str,
        regime: &str,
        pnl: f64,
        realized_rr: f64,
        is_win: bool,
    ) {
        if self.scanner.catalog().get(strategy_id).is_none() {
            warn!(strategy = strategy_id, "Outcome for unregistered strategy");
        }

        let reward = pnl_reward(pnl, self.config.bandit.reward_scale);
        let posterior = self.bandit.update(regime, strategy_id, reward);
        self.weighting
            .record_trade(strategy_id, pnl, is_win, realized_rr);
        self.refresh_weights();

        if let Some(store) = &self.store {
            let record = OutcomeRecord {
                timestamp: Utc::now(),
                strategy_id: strategy_id.to_string(),
                regime: regime.to_string(),
                pnl,
                realized_rr,
                is_win,
            };
            if let Err(e) = store.record_outcome(&record) {
                warn!(error = %e, "Failed to log trade outcome");
            }
        }

        info!(
            strategy = strategy_id,
            regime,
            pnl,
            realized_rr,
            is_win,
            reward,
            weight = self.weighting.get(strategy_id),
            alpha = posterior.alpha,
            beta = posterior.beta,
            "Trade outcome recorded"
        );
    }

    /// Recompute weights against current strategy correlations and persist.
    pub fn refresh_weights(&self) {
        let correlations = self.weighting.strategy_correlations();
        self.weighting.recompute(&correlations);
        self.weighting.persist();
    }

    pub fn get_stats(&self) -> CoreStats {
        let scan = self.scanner.stats();
        let performance = self.weighting.performance();

        let mut strategies: BTreeMap<String, StrategyStats> = self
            .scanner
            .catalog()
            .ids()
            .into_iter()
            .map(|id| {
                let stats = StrategyStats {
                    weight: self.weighting.get(&id),
                    performance: performance.get(&id).cloned(),
                };
                (id, stats)
            })
            .collect();
        for (id, perf) in performance {
            strategies.entry(id.clone()).or_insert_with(|| StrategyStats {
                weight: self.weighting.get(&id),
                performance: Some(perf),
            });
        }

        CoreStats {
            skip_rate: scan.skip_rate(),
            scan,
            strategies,
            bandit: self.bandit.by_regime(),
            gate: self.gate.status(),
        }
    }

    /// Zero the scan counters. Learned state is untouched.
    pub fn reset_stats(&self) {
        self.scanner.reset_stats();
        info!("Scan statistics reset");
    }

    pub fn is_paused(&self) -> bool {
        self.gate.is_paused().0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alpha::Features;
    use crate::market::{InstrumentSnapshot, InstrumentSpec, Prediction, StaticMarket};
    use std::collections::HashMap;

    fn breakout_snapshot() -> InstrumentSnapshot {
        let features = Features::new()
            .with("close", 100.0)
            .with("high_20", 99.0)
            .with("low_20", 95.0)
            .with("atr", 2.0);
        let spec = InstrumentSpec {
            point: 0.01,
            tick_value: 0.1,
            volume_min: 0.01,
            volume_max: 100.0,
            volume_step: 0.01,
        };
        InstrumentSnapshot::new(features, Prediction::new(0.6, 0.01, "trending"), spec)
    }

    fn engine(store: Option<Arc<PersistenceManager>>) -> DecisionEngine {
        let mut config = Config::default();
        config.scanner.instruments = vec!["XAUUSD".to_string()];
        config.bandit.seed = Some(11);

        let mut snapshots = HashMap::new();
        snapshots.insert("XAUUSD".to_string(), breakout_snapshot());
        let market = Arc::new(StaticMarket::from_snapshots(snapshots));

        DecisionEngine::new(config, AlphaCatalog::builtin(), market, store)
    }

    #[tokio::test]
    async fn test_scan_produces_breakout_plan() {
        let engine = engine(None);
        let plans = engine.scan(&[]).await;

        assert_eq!(plans.len(), 1);
        let plan = &plans[0];
        assert_eq!(plan.strategy_id, "momentum_breakout");
        assert_eq!(plan.instrument, "XAUUSD");
        assert!(plan.risk_estimate <= engine.config().scanner.max_tail_risk);

        let stats = engine.get_stats();
        assert_eq!(stats.scan.scans, 1);
        assert_eq!(stats.scan.evaluated, 6);
        assert_eq!(stats.scan.skipped, 5);
    }

    #[tokio::test]
    async fn test_record_outcome_updates_learning_state() {
        let engine = engine(None);
        engine.record_outcome("momentum_breakout", "trending", 15.0, 2.0, true);
        engine.record_outcome("ema_trend", "trending", -5.0, -1.0, false);

        let posterior = engine.bandit().posterior("trending", "momentum_breakout");
        // 15 / 10 clamps to a full win
        assert_eq!(posterior.alpha, 2.0);
        assert_eq!(posterior.beta, 1.0);

        let stats = engine.get_stats();
        assert_eq!(
            stats.strategies["momentum_breakout"]
                .performance
                .as_ref()
                .map(|p| p.trades),
            Some(1)
        );
        let total: f64 = engine.weighting().weights().values().sum();
        assert!((total - 2.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_plans_use_weight_snapshot() {
        let engine = engine(None);
        for pnl in [12.0, 15.0, 11.0] {
            engine.record_outcome("momentum_breakout", "trending", pnl, 1.8, true);
            engine.record_outcome("ema_trend", "trending", -pnl, -1.0, false);
        }
        let weights = engine.weighting().weights();

        let plans = engine.scan(&[]).await;
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].weight, weights["momentum_breakout"]);
        assert!(plans[0].weight > 1.0);
    }

    #[tokio::test]
    async fn test_larger_win_earns_more_bandit_credit() {
        let engine = engine(None);
        engine.record_outcome("ema_trend", "ranging", 1.0, 1.0, true);
        engine.record_outcome("ema_trend", "trending", 2.0, 1.0, true);

        let small = engine.bandit().posterior("ranging", "ema_trend");
        let large = engine.bandit().posterior("trending", "ema_trend");
        assert!((small.alpha - 1.1).abs() < 1e-12);
        assert!((large.alpha - 1.2).abs() < 1e-12);
        assert!(large.alpha > small.alpha);
    }

    #[tokio::test]
    async fn test_reset_stats_keeps_learning() {
        let engine = engine(None);
        engine.scan(&[]).await;
        engine.record_outcome("momentum_breakout", "trending", 10.0, 1.0, true);

        engine.reset_stats();
        let stats = engine.get_stats();
        assert_eq!(stats.scan, ScanStats::default());
        assert_eq!(stats.bandit["trending"]["momentum_breakout"].alpha, 2.0);
    }

    #[tokio::test]
    async fn test_paused_engine_returns_nothing() {
        let engine = engine(None);
        engine.gate().pause(60, "manual");

        assert!(engine.is_paused());
        assert!(engine.scan(&[]).await.is_empty());
        assert_eq!(engine.get_stats().scan.paused_scans, 1);
    }

    #[test]
    fn test_learning_state_survives_restart() {
        let store = Arc::new(PersistenceManager::in_memory().unwrap());
        {
            let engine = engine(Some(store.clone()));
            engine.record_outcome("momentum_breakout", "trending", 8.0, 1.6, true);
        }

        let restarted = engine(Some(store.clone()));
        let posterior = restarted.bandit().posterior("trending", "momentum_breakout");
        assert!((posterior.alpha - 1.8).abs() < 1e-12);
        assert!((posterior.beta - 1.2).abs() < 1e-12);
        assert_eq!(
            restarted.weighting().performance()["momentum_breakout"].trades,
            1
        );
        assert_eq!(store.outcome_count().unwrap(), 1);
    }
}
