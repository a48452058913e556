//! Regime-conditioned Thompson sampling over strategies.
//!
//! One Beta posterior per (regime, strategy). Selection draws a sample from
//! each candidate's posterior and picks the largest; updates accumulate
//! clamped rewards into alpha and their complement into beta.

use crate::error::BanditError;
use crate::persistence::{PersistedPosterior, PersistenceManager};
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Beta, Distribution};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Beta(alpha, beta) belief that a strategy wins in a regime.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BetaPosterior {
    pub alpha: f64,
    pub beta: f64,
}

impl Default for BetaPosterior {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            beta: 1.0,
        }
    }
}

impl BetaPosterior {
    /// Posterior mean.
    pub fn mean(&self) -> f64 {
        self.alpha / (self.alpha + self.beta)
    }

    fn sample(&self, rng: &mut StdRng) -> f64 {
        match Beta::new(self.alpha, self.beta) {
            Ok(dist) => dist.sample(rng),
            Err(_) => self.mean(),
        }
    }
}

/// Map a realized reward into [0, 1].
///
/// Negative rewards count as losses; rewards above one are treated as PnL
/// and scaled down by ten.
pub fn normalize_reward(reward: f64) -> f64 {
    if reward.is_nan() || reward <= 0.0 {
        0.0
    } else if reward > 1.0 {
        (reward / 10.0).min(1.0)
    } else {
        reward
    }
}

/// Reward for a closed trade: PnL as a share of `scale`, within [0, 1].
///
/// Monotone in PnL, so a larger win never earns less credit. Losses and
/// NaN score zero.
pub fn pnl_reward(pnl: f64, scale: f64) -> f64 {
    if pnl.is_nan() || !(scale > 0.0) {
        return 0.0;
    }
    (pnl / scale).clamp(0.0, 1.0)
}

type PosteriorKey = (String, String);

/// Thompson sampling bandit keyed by market regime.
pub struct RegimeBandit {
    posteriors: RwLock<BTreeMap<PosteriorKey, BetaPosterior>>,
    rng: Mutex<StdRng>,
    store: Option<Arc<PersistenceManager>>,
}

impl RegimeBandit {
    /// Create a bandit; a fixed seed makes selection reproducible.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        Self {
            posteriors: RwLock::new(BTreeMap::new()),
            rng: Mutex::new(rng),
            store: None,
        }
    }

    /// Persist posteriors through `store` after every update.
    pub fn with_store(mut self, store: Arc<PersistenceManager>) -> Self {
        self.store = Some(store);
        self
    }

    /// Restore posteriors from the store. A missing snapshot is a cold start.
    pub fn load(&self) -> usize {
        let Some(store) = &self.store else {
            return 0;
        };

        match store.load_posteriors() {
            Ok(rows) => {
                let mut posteriors = self.posteriors.write();
                for row in &rows {
                    posteriors.insert(
                        (row.regime.clone(), row.strategy_id.clone()),
                        BetaPosterior {
                            alpha: row.alpha.max(1.0),
                            beta: row.beta.max(1.0),
                        },
                    );
                }
                info!(posteriors = rows.len(), "Bandit state restored");
                rows.len()
            }
            Err(e) => {
                warn!(error = %e, "Failed to load bandit posteriors, starting cold");
                0
            }
        }
    }

    /// Pick the candidate with the largest posterior sample.
    ///
    /// Ties go to the earlier candidate.
    pub fn select(&self, regime: &str, candidates: &[String]) -> Result<String, BanditError> {
        if candidates.is_empty() {
            return Err(BanditError::NoCandidates(regime.to_string()));
        }

        let posteriors = self.posteriors.read();
        let mut rng = self.rng.lock();

        let mut best: Option<(&String, f64)> = None;
        for candidate in candidates {
            let posterior = posteriors
                .get(&(regime.to_string(), candidate.clone()))
                .copied()
                .unwrap_or_default();
            let sample = posterior.sample(&mut rng);
            if best.map_or(true, |(_, s)| sample > s) {
                best = Some((candidate, sample));
            }
        }

        let (selected, sample) = best.ok_or_else(|| BanditError::NoCandidates(regime.to_string()))?;
        debug!(regime, strategy = %selected, sample, "Bandit selection");
        Ok(selected.clone())
    }

    /// Fold a reward into the (regime, strategy) posterior.
    pub fn update(&self, regime: &str, strategy_id: &str, reward: f64) -> BetaPosterior {
        let reward = normalize_reward(reward);

        let updated = {
            let mut posteriors = self.posteriors.write();
            let posterior = posteriors
                .entry((regime.to_string(), strategy_id.to_string()))
                .or_default();
            posterior.alpha += reward;
            posterior.beta += 1.0 - reward;
            *posterior
        };

        debug!(
            regime,
            strategy = strategy_id,
            reward,
            alpha = updated.alpha,
            beta = updated.beta,
            "Bandit updated"
        );

        if let Some(store) = &self.store {
            let row = PersistedPosterior {
                regime: regime.to_string(),
                strategy_id: strategy_id.to_string(),
                alpha: updated.alpha,
                beta: updated.beta,
            };
            if let Err(e) = store.save_posterior(&row) {
                warn!(error = %e, key = %row.key(), "Failed to persist bandit posterior");
            }
        }

        updated
    }

    /// Current posterior; the neutral prior if never observed.
    pub fn posterior(&self, regime: &str, strategy_id: &str) -> BetaPosterior {
        self.posteriors
            .read()
            .get(&(regime.to_string(), strategy_id.to_string()))
            .copied()
            .unwrap_or_default()
    }

    /// Posterior means for one regime. Observability only.
    pub fn weights(&self, regime: &str) -> BTreeMap<String, f64> {
        self.posteriors
            .read()
            .iter()
            .filter(|((r, _), _)| r == regime)
            .map(|((_, s), p)| (s.clone(), p.mean()))
            .collect()
    }

    /// All posteriors grouped by regime.
    pub fn by_regime(&self) -> BTreeMap<String, BTreeMap<String, BetaPosterior>> {
        let mut grouped: BTreeMap<String, BTreeMap<String, BetaPosterior>> = BTreeMap::new();
        for ((regime, strategy), posterior) in self.posteriors.read().iter() {
            grouped
                .entry(regime.clone())
                .or_default()
                .insert(strategy.clone(), *posterior);
        }
        grouped
    }

    /// Posteriors keyed by `"{regime}:{strategy_id}"`.
    pub fn snapshot(&self) -> BTreeMap<String, BetaPosterior> {
        self.posteriors
            .read()
            .iter()
            .map(|((regime, strategy), p)| (format!("{}:{}", regime, strategy), *p))
            .collect()
    }

    /// Forget learned posteriors for one regime, or all of them.
    pub fn reset(&self, regime: Option<&str>) {
        {
            let mut posteriors = self.posteriors.write();
            match regime {
                Some(r) => posteriors.retain(|(pr, _), _| pr != r),
                None => posteriors.clear(),
            }
        }

        if let Some(store) = &self.store {
            if let Err(e) = store.clear_posteriors(regime) {
                warn!(error = %e, "Failed to clear persisted posteriors");
            }
        }
        info!(regime = regime.unwrap_or("*"), "Bandit posteriors reset");
    }
}

impl Default for RegimeBandit {
    fn default() -> Self {
        Self::new(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_select_empty_candidates_errors() {
        let bandit = RegimeBandit::new(Some(7));
        assert_eq!(
            bandit.select("trending", &[]),
            Err(BanditError::NoCandidates("trending".to_string()))
        );
    }

    #[test]
    fn test_select_returns_a_candidate() {
        let bandit = RegimeBandit::new(Some(7));
        let candidates = ids(&["a", "b", "c"]);
        for _ in 0..50 {
            let picked = bandit.select("trending", &candidates).unwrap();
            assert!(candidates.contains(&picked));
        }
    }

    #[test]
    fn test_seeded_selection_is_reproducible() {
        let candidates = ids(&["a", "b", "c", "d"]);
        let first = RegimeBandit::new(Some(42));
        let second = RegimeBandit::new(Some(42));

        let picks_a: Vec<String> = (0..20)
            .map(|_| first.select("choppy", &candidates).unwrap())
            .collect();
        let picks_b: Vec<String> = (0..20)
            .map(|_| second.select("choppy", &candidates).unwrap())
            .collect();
        assert_eq!(picks_a, picks_b);
    }

    #[test]
    fn test_strong_posterior_dominates() {
        let bandit = RegimeBandit::new(Some(1));
        for _ in 0..200 {
            bandit.update("trending", "winner", 1.0);
            bandit.update("trending", "loser", 0.0);
        }

        let candidates = ids(&["loser", "winner"]);
        let wins = (0..100)
            .filter(|_| bandit.select("trending", &candidates).unwrap() == "winner")
            .count();
        assert!(wins >= 95, "winner picked {} times", wins);
    }

    #[test]
    fn test_update_monotonic_and_adds_one() {
        let bandit = RegimeBandit::new(Some(3));
        for reward in [0.0, 0.25, 0.5, 1.0, 0.9] {
            let before = bandit.posterior("trending", "s");
            let after = bandit.update("trending", "s", reward);
            assert!(after.alpha >= before.alpha);
            assert!(after.beta >= before.beta);
            let total_before = before.alpha + before.beta;
            assert!((after.alpha + after.beta - total_before - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_reward_normalization() {
        assert_eq!(normalize_reward(-5.0), 0.0);
        assert_eq!(normalize_reward(f64::NAN), 0.0);
        assert_eq!(normalize_reward(0.4), 0.4);
        assert_eq!(normalize_reward(5.0), 0.5);
        assert_eq!(normalize_reward(50.0), 1.0);
    }

    #[test]
    fn test_pnl_reward_is_monotone() {
        assert_eq!(pnl_reward(-3.0, 10.0), 0.0);
        assert_eq!(pnl_reward(f64::NAN, 10.0), 0.0);
        assert_eq!(pnl_reward(25.0, 10.0), 1.0);

        let rewards: Vec<f64> = [0.5, 1.0, 2.0, 5.0, 9.0, 10.0, 40.0]
            .iter()
            .map(|pnl| pnl_reward(*pnl, 10.0))
            .collect();
        for pair in rewards.windows(2) {
            assert!(pair[0] <= pair[1], "{:?}", rewards);
        }
        assert!((pnl_reward(2.0, 10.0) - 0.2).abs() < 1e-12);
        assert!(pnl_reward(2.0, 10.0) > pnl_reward(1.0, 10.0));
    }

    #[test]
    fn test_regimes_are_independent() {
        let bandit = RegimeBandit::new(Some(3));
        bandit.update("trending", "s", 1.0);

        assert_eq!(bandit.posterior("trending", "s").alpha, 2.0);
        assert_eq!(bandit.posterior("choppy", "s"), BetaPosterior::default());
        assert_eq!(bandit.weights("trending").len(), 1);
        assert!(bandit.weights("choppy").is_empty());
    }

    #[test]
    fn test_weights_are_posterior_means() {
        let bandit = RegimeBandit::new(Some(3));
        bandit.update("trending", "s", 1.0);
        bandit.update("trending", "s", 1.0);
        // Beta(3, 1)
        assert!((bandit.weights("trending")["s"] - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_reset_single_regime() {
        let bandit = RegimeBandit::new(Some(3));
        bandit.update("trending", "s", 1.0);
        bandit.update("choppy", "s", 1.0);

        bandit.reset(Some("trending"));
        assert_eq!(bandit.posterior("trending", "s"), BetaPosterior::default());
        assert_eq!(bandit.posterior("choppy", "s").alpha, 2.0);

        bandit.reset(None);
        assert!(bandit.snapshot().is_empty());
    }

    #[test]
    fn test_persist_and_restore() {
        let store = Arc::new(PersistenceManager::in_memory().unwrap());
        let bandit = RegimeBandit::new(Some(3)).with_store(store.clone());
        bandit.update("trending", "ema_trend", 1.0);
        bandit.update("trending", "ema_trend", 0.0);

        let restored = RegimeBandit::new(Some(3)).with_store(store);
        assert_eq!(restored.load(), 1);
        assert_eq!(
            restored.posterior("trending", "ema_trend"),
            BetaPosterior {
                alpha: 2.0,
                beta: 2.0
            }
        );
        assert!(restored.snapshot().contains_key("trending:ema_trend"));
    }
}
