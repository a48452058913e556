//! Strategy selection and candidate generation.
//!
//! Contains the core logic for:
//! - Regime-conditioned Thompson sampling over strategies
//! - Adaptive performance weighting
//! - Market scanning and candidate ranking

mod bandit;
mod scanner;
mod weighting;

pub use bandit::{normalize_reward, pnl_reward, BetaPosterior, RegimeBandit};
pub use scanner::{ScanContext, ScanStats, Scanner, TradingPlan};
pub use weighting::{sharpe_ratio, AdaptiveWeighting, StrategyPerformance};
