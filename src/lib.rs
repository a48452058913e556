//! # Alpha Scanner
//!
//! Decision core of an automated trading bot: turns per-instrument features
//! and model forecasts into a small, ranked set of sized trading plans, and
//! learns from closed trades.
//!
//! ## Architecture
//!
//! - `alpha`: Strategy trait, built-in alphas and the static catalog
//! - `market`: Collaborator contracts (features, forecasts, specs) and an in-memory implementation
//! - `strategy`: Thompson sampling bandit, adaptive weighting and the scanner
//! - `risk`: Kelly position sizing and the execution quality gate
//! - `engine`: Inbound surface wiring everything together
//! - `persistence`: SQLite snapshots of learned state
//! - `config`: Configuration management and validation
//! - `utils`: Shared statistics and decimal rounding helpers

pub mod alpha;
pub mod config;
pub mod engine;
pub mod error;
pub mod market;
pub mod persistence;
pub mod risk;
pub mod strategy;
pub mod utils;

pub use config::Config;
pub use engine::DecisionEngine;
