//! Configuration management for the alpha scanner.
//!
//! Loads settings from an optional `alpha-scanner.toml` and `ALPHA__*`
//! environment variables. Every field has a safe default.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Scan loop and candidate filtering
    #[serde(default)]
    pub scanner: ScannerConfig,
    /// Kelly sizing parameters
    #[serde(default)]
    pub sizing: SizingConfig,
    /// Execution quality gate thresholds
    #[serde(default)]
    pub gate: GateConfig,
    /// Adaptive strategy weighting
    #[serde(default)]
    pub weighting: WeightingConfig,
    /// Thompson sampling bandit
    #[serde(default)]
    pub bandit: BanditConfig,
    /// Snapshot persistence
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Instruments to scan each cycle
    #[serde(default)]
    pub instruments: Vec<String>,
    /// Number of plans returned per scan (top-K)
    #[serde(default = "default_max_signals")]
    pub max_signals: usize,
    /// Minimum weighted quality score; 7.0-8.5 gives stricter grading
    #[serde(default = "default_min_quality_score")]
    pub min_quality_score: f64,
    /// Maximum ES95 per plan in account currency
    #[serde(default = "default_max_tail_risk")]
    pub max_tail_risk: f64,
    /// Maximum correlation with the open book
    #[serde(default = "default_max_portfolio_correlation")]
    pub max_portfolio_correlation: f64,
    /// Concurrent collaborator fetches per scan
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,
    /// Overall scan deadline in milliseconds
    #[serde(default = "default_scan_timeout_ms")]
    pub scan_timeout_ms: u64,
    /// Scan cadence in milliseconds
    #[serde(default = "default_scan_interval_ms")]
    pub scan_interval_ms: u64,
    /// Forecast entropy (nats) used for quality scoring and Kelly penalty
    #[serde(default = "default_entropy")]
    pub entropy: f64,
    /// Multiplier applied to the bandit's pick
    #[serde(default = "default_bandit_boost")]
    pub bandit_boost: f64,
    /// Account equity used for sizing
    #[serde(default = "default_equity")]
    pub equity: f64,
    /// Volatility target for lot rescaling
    #[serde(default = "default_target_vol")]
    pub target_vol: f64,
    /// Stop distance as a multiple of forecast volatility
    #[serde(default = "default_stop_multiplier")]
    pub stop_multiplier: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizingConfig {
    /// Fraction of full Kelly to bet (0.5 = half Kelly)
    #[serde(default = "default_kelly_scale")]
    pub kelly_scale: f64,
    /// Hard cap on equity risked per trade (0.01 = 1%)
    #[serde(default = "default_max_risk_per_trade")]
    pub max_risk_per_trade: f64,
    /// Largest allowed upward volatility-target rescale
    #[serde(default = "default_max_vol_scale_up")]
    pub max_vol_scale_up: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Spreads above this percentile of the window are rejected
    #[serde(default = "default_spread_percentile")]
    pub spread_percentile: f64,
    /// Samples required before the spread filter engages
    #[serde(default = "default_spread_min_samples")]
    pub spread_min_samples: usize,
    #[serde(default = "default_window")]
    pub spread_window: usize,
    /// Maximum predicted slippage in pips
    #[serde(default = "default_max_slippage")]
    pub max_slippage: f64,
    /// Latency above this is a breach
    #[serde(default = "default_max_latency_ms")]
    pub max_latency_ms: f64,
    #[serde(default = "default_latency_window")]
    pub latency_window: usize,
    /// Consecutive breaches that pause trading
    #[serde(default = "default_latency_breach_limit")]
    pub latency_breach_limit: u32,
    #[serde(default = "default_latency_pause_secs")]
    pub latency_pause_secs: i64,
    /// More quotes than this inside the window is flicker
    #[serde(default = "default_flicker_max_quotes")]
    pub flicker_max_quotes: usize,
    #[serde(default = "default_flicker_window_secs")]
    pub flicker_window_secs: i64,
    #[serde(default = "default_window")]
    pub quote_window: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightingConfig {
    /// Learning rate on Sharpe deviation
    #[serde(default = "default_eta")]
    pub eta: f64,
    /// Penalty on portfolio correlation
    #[serde(default = "default_lambda")]
    pub lambda: f64,
    #[serde(default = "default_min_weight")]
    pub min_weight: f64,
    #[serde(default = "default_max_weight")]
    pub max_weight: f64,
    /// Rolling PnL / RR history length
    #[serde(default = "default_history_cap")]
    pub history_cap: usize,
    /// Periods per year for Sharpe annualization
    #[serde(default = "default_annualization")]
    pub annualization: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BanditConfig {
    /// Fixed RNG seed for reproducible sampling
    #[serde(default)]
    pub seed: Option<u64>,
    /// Realized PnL that counts as a full win for the bandit
    #[serde(default = "default_reward_scale")]
    pub reward_scale: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default = "default_persistence_enabled")]
    pub enabled: bool,
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

// Default value functions
fn default_max_signals() -> usize {
    3
}

fn default_min_quality_score() -> f64 {
    3.0
}

fn default_max_tail_risk() -> f64 {
    10.0 // $10 ES95 per plan
}

fn default_max_portfolio_correlation() -> f64 {
    0.3
}

fn default_max_concurrent_fetches() -> usize {
    8 // Stay under the inference service rate limit
}

fn default_scan_timeout_ms() -> u64 {
    1500
}

fn default_scan_interval_ms() -> u64 {
    1000
}

fn default_entropy() -> f64 {
    0.5
}

fn default_bandit_boost() -> f64 {
    1.2
}

fn default_equity() -> f64 {
    1000.0
}

fn default_target_vol() -> f64 {
    0.01
}

fn default_stop_multiplier() -> f64 {
    0.8
}

fn default_kelly_scale() -> f64 {
    0.5 // Half Kelly
}

fn default_max_risk_per_trade() -> f64 {
    0.01 // 1% of equity
}

fn default_max_vol_scale_up() -> f64 {
    1.5
}

fn default_spread_percentile() -> f64 {
    60.0
}

fn default_spread_min_samples() -> usize {
    20
}

fn default_window() -> usize {
    100
}

fn default_max_slippage() -> f64 {
    2.0
}

fn default_max_latency_ms() -> f64 {
    400.0
}

fn default_latency_window() -> usize {
    50
}

fn default_latency_breach_limit() -> u32 {
    3
}

fn default_latency_pause_secs() -> i64 {
    60
}

fn default_flicker_max_quotes() -> usize {
    20
}

fn default_flicker_window_secs() -> i64 {
    10
}

fn default_eta() -> f64 {
    0.01
}

fn default_lambda() -> f64 {
    0.05
}

fn default_min_weight() -> f64 {
    0.1
}

fn default_max_weight() -> f64 {
    2.0
}

fn default_history_cap() -> usize {
    100
}

fn default_annualization() -> f64 {
    250.0 // Trading days
}

fn default_reward_scale() -> f64 {
    10.0
}

fn default_persistence_enabled() -> bool {
    true
}

fn default_db_path() -> String {
    "data/alpha_state.db".to_string()
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("alpha-scanner").required(false))
            .add_source(
                config::Environment::with_prefix("ALPHA")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("scanner.instruments")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.scanner.max_signals >= 1, "max_signals must be >= 1");

        anyhow::ensure!(
            self.scanner.max_tail_risk > 0.0,
            "max_tail_risk must be positive"
        );

        anyhow::ensure!(
            (0.0..=10.0).contains(&self.scanner.min_quality_score),
            "min_quality_score must be between 0 and 10"
        );

        anyhow::ensure!(
            self.scanner.entropy >= 0.0 && self.scanner.entropy <= std::f64::consts::LN_2,
            "entropy must be between 0 and ln 2"
        );

        anyhow::ensure!(
            self.scanner.equity >= 0.0 && self.scanner.equity.is_finite(),
            "equity must be a finite non-negative amount"
        );

        anyhow::ensure!(
            self.sizing.max_risk_per_trade > 0.0 && self.sizing.max_risk_per_trade <= 1.0,
            "max_risk_per_trade must be between 0 and 1"
        );

        anyhow::ensure!(
            self.weighting.min_weight > 0.0
                && self.weighting.min_weight <= self.weighting.max_weight,
            "min_weight must be > 0 and <= max_weight"
        );

        anyhow::ensure!(
            self.weighting.min_weight <= 1.0 && self.weighting.max_weight >= 1.0,
            "weight bounds must contain the neutral weight 1.0"
        );

        anyhow::ensure!(
            self.bandit.reward_scale > 0.0 && self.bandit.reward_scale.is_finite(),
            "reward_scale must be positive"
        );

        anyhow::ensure!(
            (0.0..=100.0).contains(&self.gate.spread_percentile),
            "spread_percentile must be between 0 and 100"
        );

        anyhow::ensure!(
            self.gate.latency_breach_limit >= 1,
            "latency_breach_limit must be >= 1"
        );

        Ok(())
    }
}

impl Default for BanditConfig {
    fn default() -> Self {
        Self {
            seed: None,
            reward_scale: default_reward_scale(),
        }
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            instruments: Vec::new(),
            max_signals: default_max_signals(),
            min_quality_score: default_min_quality_score(),
            max_tail_risk: default_max_tail_risk(),
            max_portfolio_correlation: default_max_portfolio_correlation(),
            max_concurrent_fetches: default_max_concurrent_fetches(),
            scan_timeout_ms: default_scan_timeout_ms(),
            scan_interval_ms: default_scan_interval_ms(),
            entropy: default_entropy(),
            bandit_boost: default_bandit_boost(),
            equity: default_equity(),
            target_vol: default_target_vol(),
            stop_multiplier: default_stop_multiplier(),
        }
    }
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            kelly_scale: default_kelly_scale(),
            max_risk_per_trade: default_max_risk_per_trade(),
            max_vol_scale_up: default_max_vol_scale_up(),
        }
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            spread_percentile: default_spread_percentile(),
            spread_min_samples: default_spread_min_samples(),
            spread_window: default_window(),
            max_slippage: default_max_slippage(),
            max_latency_ms: default_max_latency_ms(),
            latency_window: default_latency_window(),
            latency_breach_limit: default_latency_breach_limit(),
            latency_pause_secs: default_latency_pause_secs(),
            flicker_max_quotes: default_flicker_max_quotes(),
            flicker_window_secs: default_flicker_window_secs(),
            quote_window: default_window(),
        }
    }
}

impl Default for WeightingConfig {
    fn default() -> Self {
        Self {
            eta: default_eta(),
            lambda: default_lambda(),
            min_weight: default_min_weight(),
            max_weight: default_max_weight(),
            history_cap: default_history_cap(),
            annualization: default_annualization(),
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: default_persistence_enabled(),
            db_path: default_db_path(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.scanner.max_signals, 3);
        assert_eq!(config.scanner.min_quality_score, 3.0);
        assert_eq!(config.scanner.max_tail_risk, 10.0);
        assert_eq!(config.scanner.max_portfolio_correlation, 0.3);
        assert_eq!(config.sizing.kelly_scale, 0.5);
        assert_eq!(config.sizing.max_risk_per_trade, 0.01);
        assert_eq!(config.gate.max_latency_ms, 400.0);
        assert_eq!(config.gate.latency_window, 50);
        assert_eq!(config.weighting.eta, 0.01);
        assert_eq!(config.weighting.lambda, 0.05);
    }

    #[test]
    fn test_rejects_inverted_weight_bounds() {
        let mut config = Config::default();
        config.weighting.min_weight = 3.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_weight_bounds_excluding_neutral() {
        let mut config = Config::default();
        config.weighting.min_weight = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.weighting.max_weight = 0.8;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_entropy_above_ln2() {
        let mut config = Config::default();
        config.scanner.entropy = 0.8;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let raw = r#"
            [scanner]
            instruments = ["EURUSD", "XAUUSD"]
            min_quality_score = 7.5
        "#;
        let config: Config = config::Config::builder()
            .add_source(config::File::from_str(raw, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.scanner.instruments, vec!["EURUSD", "XAUUSD"]);
        assert_eq!(config.scanner.min_quality_score, 7.5);
        assert_eq!(config.scanner.max_signals, 3);
        assert_eq!(config.gate.flicker_max_quotes, 20);
    }
}
