//! In-memory market data for paper runs, replays and tests.
//!
//! Serves fixed per-instrument snapshots through [`MarketData`]. Snapshots can
//! be loaded from a JSON file keyed by instrument and swapped at runtime.

use super::traits::MarketData;
use super::types::{InstrumentSpec, Prediction};
use crate::alpha::Features;
use crate::error::MarketDataError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Everything the collaborators would report for one instrument.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstrumentSnapshot {
    #[serde(default)]
    pub features: Option<Features>,
    #[serde(default)]
    pub prediction: Option<Prediction>,
    #[serde(default)]
    pub spec: Option<InstrumentSpec>,
    /// News embargo in force
    #[serde(default)]
    pub embargo: bool,
    /// Correlation with the open book
    #[serde(default)]
    pub correlation: f64,
    /// Simulate a collaborator outage
    #[serde(default)]
    pub fail: bool,
    /// Artificial fetch latency in milliseconds
    #[serde(default)]
    pub delay_ms: u64,
}

impl InstrumentSnapshot {
    pub fn new(features: Features, prediction: Prediction, spec: InstrumentSpec) -> Self {
        Self {
            features: Some(features),
            prediction: Some(prediction),
            spec: Some(spec),
            ..Self::default()
        }
    }
}

/// Static collaborator backed by an in-memory map.
#[derive(Clone, Default)]
pub struct StaticMarket {
    snapshots: Arc<RwLock<HashMap<String, InstrumentSnapshot>>>,
    calls: Arc<AtomicU64>,
}

impl StaticMarket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshots(snapshots: HashMap<String, InstrumentSnapshot>) -> Self {
        Self {
            snapshots: Arc::new(RwLock::new(snapshots)),
            calls: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Load snapshots from a JSON object of `instrument -> snapshot`.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read market file {:?}", path.as_ref()))?;
        let snapshots: HashMap<String, InstrumentSnapshot> = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse market file {:?}", path.as_ref()))?;

        info!(
            instruments = snapshots.len(),
            "Loaded market snapshots from {:?}",
            path.as_ref()
        );
        Ok(Self::from_snapshots(snapshots))
    }

    pub async fn set_snapshot(&self, instrument: &str, snapshot: InstrumentSnapshot) {
        self.snapshots
            .write()
            .await
            .insert(instrument.to_string(), snapshot);
    }

    pub async fn set_failing(&self, instrument: &str, fail: bool) {
        if let Some(snapshot) = self.snapshots.write().await.get_mut(instrument) {
            snapshot.fail = fail;
        }
    }

    pub async fn instruments(&self) -> Vec<String> {
        let mut names: Vec<String> = self.snapshots.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Total collaborator calls served.
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    async fn snapshot(
        &self,
        source_name: &'static str,
        instrument: &str,
    ) -> Result<Option<InstrumentSnapshot>, MarketDataError> {
        self.calls.fetch_add(1, Ordering::Relaxed);

        let snapshot = self.snapshots.read().await.get(instrument).cloned();
        let Some(snapshot) = snapshot else {
            debug!(instrument, source_name, "No snapshot for instrument");
            return Ok(None);
        };

        if snapshot.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(snapshot.delay_ms)).await;
        }
        if snapshot.fail {
            return Err(MarketDataError::unavailable(
                source_name,
                instrument,
                "simulated outage",
            ));
        }
        Ok(Some(snapshot))
    }
}

#[async_trait]
impl MarketData for StaticMarket {
    async fn features(&self, instrument: &str) -> Result<Option<Features>, MarketDataError> {
        Ok(self
            .snapshot("features", instrument)
            .await?
            .and_then(|s| s.features))
    }

    async fn predict(&self, instrument: &str) -> Result<Option<Prediction>, MarketDataError> {
        Ok(self
            .snapshot("predict", instrument)
            .await?
            .and_then(|s| s.prediction))
    }

    async fn embargo_active(&self, instrument: &str) -> bool {
        self.snapshots
            .read()
            .await
            .get(instrument)
            .map(|s| s.embargo)
            .unwrap_or(false)
    }

    async fn portfolio_correlation(
        &self,
        instrument: &str,
        open_positions: &[String],
    ) -> Result<f64, MarketDataError> {
        if open_positions.is_empty() {
            return Ok(0.0);
        }
        Ok(self
            .snapshot("correlation", instrument)
            .await?
            .map(|s| s.correlation)
            .unwrap_or(0.0))
    }

    async fn instrument_spec(
        &self,
        instrument: &str,
    ) -> Result<Option<InstrumentSpec>, MarketDataError> {
        Ok(self
            .snapshot("instrument_spec", instrument)
            .await?
            .and_then(|s| s.spec))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> InstrumentSnapshot {
        InstrumentSnapshot::new(
            Features::new().with("close", 1.1),
            Prediction::new(0.6, 0.01, "trending"),
            InstrumentSpec::default(),
        )
    }

    #[tokio::test]
    async fn test_serves_snapshot() {
        let market = StaticMarket::new();
        market.set_snapshot("EURUSD", snapshot()).await;

        let features = market.features("EURUSD").await.unwrap().unwrap();
        assert_eq!(features.get("close"), Some(1.1));
        let prediction = market.predict("EURUSD").await.unwrap().unwrap();
        assert_eq!(prediction.regime, "trending");
        assert!(market.features("GBPUSD").await.unwrap().is_none());
        assert_eq!(market.call_count(), 3);
    }

    #[tokio::test]
    async fn test_simulated_outage() {
        let market = StaticMarket::new();
        market.set_snapshot("EURUSD", snapshot()).await;
        market.set_failing("EURUSD", true).await;

        assert!(market.features("EURUSD").await.is_err());
        assert!(!market.embargo_active("EURUSD").await);
    }

    #[tokio::test]
    async fn test_correlation_without_open_book_is_zero() {
        let market = StaticMarket::new();
        let mut snap = snapshot();
        snap.correlation = 0.9;
        market.set_snapshot("EURUSD", snap).await;

        assert_eq!(market.portfolio_correlation("EURUSD", &[]).await.unwrap(), 0.0);
        let open = vec!["GBPUSD".to_string()];
        assert_eq!(
            market.portfolio_correlation("EURUSD", &open).await.unwrap(),
            0.9
        );
    }

    #[test]
    fn test_snapshot_json_defaults() {
        let raw = r#"{"EURUSD": {"features": {"close": 1.1}, "embargo": true}}"#;
        let parsed: HashMap<String, InstrumentSnapshot> = serde_json::from_str(raw).unwrap();
        let snap = &parsed["EURUSD"];
        assert!(snap.embargo);
        assert!(snap.prediction.is_none());
        assert_eq!(snap.delay_ms, 0);
    }
}
