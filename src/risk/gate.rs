//! Execution quality gate.
//!
//! Admission control applied to every candidate before it leaves the scanner:
//! - Spread above its rolling percentile
//! - Predicted slippage above a pip threshold
//! - Latency circuit breaker with a global trading pause
//! - Quote flicker (too many quotes in a short window)
//!
//! Gate state is rebuilt from live observations and never persisted.

use crate::config::GateConfig;
use crate::utils::stats::{mean, percentile};
use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use tracing::{debug, info, warn};

/// Why a candidate was refused.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum GateFailure {
    Paused { reason: String },
    SpreadTooWide { spread: f64, threshold: f64 },
    Slippage { predicted: f64, max: f64 },
    Latency { latency_ms: f64, max_ms: f64 },
    QuoteFlicker { quotes: usize, window_secs: i64 },
}

impl fmt::Display for GateFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateFailure::Paused { reason } => write!(f, "trading paused: {}", reason),
            GateFailure::SpreadTooWide { spread, threshold } => {
                write!(f, "spread {:.5} above percentile threshold {:.5}", spread, threshold)
            }
            GateFailure::Slippage { predicted, max } => {
                write!(f, "predicted slippage {:.2} pips above {:.2}", predicted, max)
            }
            GateFailure::Latency { latency_ms, max_ms } => {
                write!(f, "latency {:.0}ms above {:.0}ms", latency_ms, max_ms)
            }
            GateFailure::QuoteFlicker { quotes, window_secs } => {
                write!(f, "{} quotes in the last {}s", quotes, window_secs)
            }
        }
    }
}

/// Outcome of `check_all`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GateVerdict {
    pub passed: bool,
    pub failures: Vec<GateFailure>,
}

impl GateVerdict {
    fn from_failures(failures: Vec<GateFailure>) -> Self {
        Self {
            passed: failures.is_empty(),
            failures,
        }
    }

    /// Human-readable failure reasons.
    pub fn reasons(&self) -> Vec<String> {
        self.failures.iter().map(ToString::to_string).collect()
    }
}

/// Structured alert emitted when the circuit breaker trips.
#[derive(Debug, Clone, Serialize)]
pub struct PauseAlert {
    pub alert_id: String,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
    pub expires_at: DateTime<Utc>,
    pub suggested_action: String,
}

impl PauseAlert {
    fn new(reason: &str, now: DateTime<Utc>, expires_at: DateTime<Utc>) -> Self {
        Self {
            alert_id: format!("gate-pause-{}", now.timestamp_millis()),
            timestamp: now,
            reason: reason.to_string(),
            expires_at,
            suggested_action: "Check collaborator latency and broker connectivity".to_string(),
        }
    }

    /// Emit alert as structured log.
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        warn!(target: "gate_alert", "GATE_ALERT: {}", json);
    }
}

/// Snapshot of gate state for status displays.
#[derive(Debug, Clone, Serialize)]
pub struct GateStatus {
    pub paused: bool,
    pub pause_reason: Option<String>,
    pub pause_expires_at: Option<DateTime<Utc>>,
    pub consecutive_latency_breaches: u32,
    pub avg_latency_ms: f64,
    pub tracked_instruments: usize,
}

#[derive(Debug, Clone)]
struct Pause {
    reason: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct InstrumentWindows {
    spreads: VecDeque<f64>,
    quote_times: VecDeque<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct LatencyMonitor {
    samples: VecDeque<f64>,
    consecutive_breaches: u32,
}

/// Stateful admission-control filter.
pub struct ExecutionGate {
    config: GateConfig,
    instruments: Mutex<HashMap<String, InstrumentWindows>>,
    latency: Mutex<LatencyMonitor>,
    pause: RwLock<Option<Pause>>,
}

impl ExecutionGate {
    /// Create a new execution gate.
    pub fn new(config: GateConfig) -> Self {
        Self {
            config,
            instruments: Mutex::new(HashMap::new()),
            latency: Mutex::new(LatencyMonitor::default()),
            pause: RwLock::new(None),
        }
    }

    // -------------------------------------------------------------------------
    // Spread
    // -------------------------------------------------------------------------

    /// Record a spread and check it against the rolling percentile.
    pub fn check_spread(&self, instrument: &str, spread: f64) -> bool {
        self.spread_failure(instrument, spread).is_none()
    }

    fn spread_failure(&self, instrument: &str, spread: f64) -> Option<GateFailure> {
        let mut instruments = self.instruments.lock();
        let windows = instruments.entry(instrument.to_string()).or_default();

        windows.spreads.push_back(spread);
        while windows.spreads.len() > self.config.spread_window {
            windows.spreads.pop_front();
        }

        if windows.spreads.len() < self.config.spread_min_samples {
            return None;
        }

        let samples: Vec<f64> = windows.spreads.iter().copied().collect();
        let threshold = percentile(&samples, self.config.spread_percentile)?;
        if spread > threshold {
            debug!(instrument, spread, threshold, "Spread above percentile");
            Some(GateFailure::SpreadTooWide { spread, threshold })
        } else {
            None
        }
    }

    // -------------------------------------------------------------------------
    // Slippage
    // -------------------------------------------------------------------------

    /// Predicted slippage in pips and whether it is acceptable.
    pub fn predict_slippage(
        &self,
        _instrument: &str,
        order_size: f64,
        volatility: f64,
        spread: f64,
    ) -> (f64, bool) {
        let predicted = spread * 0.5 + volatility * 100.0 * 0.3 + order_size * 0.1;
        (predicted, predicted <= self.config.max_slippage)
    }

    // -------------------------------------------------------------------------
    // Latency circuit breaker
    // -------------------------------------------------------------------------

    /// Record a round-trip latency sample.
    pub fn check_latency(&self, latency_ms: f64) -> bool {
        self.check_latency_at(latency_ms, Utc::now())
    }

    pub fn check_latency_at(&self, latency_ms: f64, now: DateTime<Utc>) -> bool {
        let breaches = {
            let mut monitor = self.latency.lock();
            monitor.samples.push_back(latency_ms);
            while monitor.samples.len() > self.config.latency_window {
                monitor.samples.pop_front();
            }

            if latency_ms <= self.config.max_latency_ms {
                monitor.consecutive_breaches = monitor.consecutive_breaches.saturating_sub(1);
                return true;
            }

            monitor.consecutive_breaches += 1;
            let breaches = monitor.consecutive_breaches;
            if breaches >= self.config.latency_breach_limit {
                monitor.consecutive_breaches = 0;
            }
            breaches
        };

        warn!(
            latency_ms,
            max_ms = self.config.max_latency_ms,
            consecutive = breaches,
            "High latency"
        );

        if breaches >= self.config.latency_breach_limit {
            let reason = format!(
                "{} consecutive latency breaches above {:.0}ms",
                breaches, self.config.max_latency_ms
            );
            self.pause_at(self.config.latency_pause_secs, &reason, now);
        }
        false
    }

    // -------------------------------------------------------------------------
    // Quote flicker
    // -------------------------------------------------------------------------

    /// Record a quote arrival and check quote frequency.
    pub fn check_quote_flicker(&self, instrument: &str) -> bool {
        self.check_quote_flicker_at(instrument, Utc::now())
    }

    pub fn check_quote_flicker_at(&self, instrument: &str, now: DateTime<Utc>) -> bool {
        self.flicker_failure(instrument, now).is_none()
    }

    fn flicker_failure(&self, instrument: &str, now: DateTime<Utc>) -> Option<GateFailure> {
        let mut instruments = self.instruments.lock();
        let windows = instruments.entry(instrument.to_string()).or_default();

        windows.quote_times.push_back(now);
        while windows.quote_times.len() > self.config.quote_window {
            windows.quote_times.pop_front();
        }

        let window_start = now - Duration::seconds(self.config.flicker_window_secs);
        let quotes = windows
            .quote_times
            .iter()
            .filter(|t| **t >= window_start)
            .count();

        if quotes > self.config.flicker_max_quotes {
            debug!(instrument, quotes, "Quote flicker");
            Some(GateFailure::QuoteFlicker {
                quotes,
                window_secs: self.config.flicker_window_secs,
            })
        } else {
            None
        }
    }

    // -------------------------------------------------------------------------
    // Global pause
    // -------------------------------------------------------------------------

    /// Pause all trading for `duration_secs`.
    pub fn pause(&self, duration_secs: i64, reason: &str) {
        self.pause_at(duration_secs, reason, Utc::now());
    }

    pub fn pause_at(&self, duration_secs: i64, reason: &str, now: DateTime<Utc>) {
        let expires_at = now + Duration::seconds(duration_secs);
        *self.pause.write() = Some(Pause {
            reason: reason.to_string(),
            expires_at,
        });
        PauseAlert::new(reason, now, expires_at).emit();
    }

    /// Lift a pause before it expires.
    pub fn resume(&self) {
        if self.pause.write().take().is_some() {
            info!("Trading pause lifted");
        }
    }

    /// Whether trading is paused, with the reason if so.
    pub fn is_paused(&self) -> (bool, Option<String>) {
        self.is_paused_at(Utc::now())
    }

    pub fn is_paused_at(&self, now: DateTime<Utc>) -> (bool, Option<String>) {
        {
            let pause = self.pause.read();
            match pause.as_ref() {
                None => return (false, None),
                Some(p) if now <= p.expires_at => return (true, Some(p.reason.clone())),
                Some(_) => {}
            }
        }

        let mut pause = self.pause.write();
        if pause.as_ref().is_some_and(|p| now > p.expires_at) {
            *pause = None;
            info!("Trading pause expired");
        }
        match pause.as_ref() {
            Some(p) => (true, Some(p.reason.clone())),
            None => (false, None),
        }
    }

    // -------------------------------------------------------------------------
    // Combined
    // -------------------------------------------------------------------------

    /// Run every check and collect all failures.
    ///
    /// A global pause short-circuits with a single failure and records nothing.
    pub fn check_all(
        &self,
        instrument: &str,
        spread: f64,
        order_size: f64,
        volatility: f64,
        latency_ms: f64,
    ) -> GateVerdict {
        self.check_all_at(instrument, spread, order_size, volatility, latency_ms, Utc::now())
    }

    pub fn check_all_at(
        &self,
        instrument: &str,
        spread: f64,
        order_size: f64,
        volatility: f64,
        latency_ms: f64,
        now: DateTime<Utc>,
    ) -> GateVerdict {
        if let (true, reason) = self.is_paused_at(now) {
            return GateVerdict::from_failures(vec![GateFailure::Paused {
                reason: reason.unwrap_or_default(),
            }]);
        }

        let mut failures = Vec::new();

        if let Some(failure) = self.spread_failure(instrument, spread) {
            failures.push(failure);
        }

        let (predicted, ok) = self.predict_slippage(instrument, order_size, volatility, spread);
        if !ok {
            failures.push(GateFailure::Slippage {
                predicted,
                max: self.config.max_slippage,
            });
        }

        if !self.check_latency_at(latency_ms, now) {
            failures.push(GateFailure::Latency {
                latency_ms,
                max_ms: self.config.max_latency_ms,
            });
        }

        if let Some(failure) = self.flicker_failure(instrument, now) {
            failures.push(failure);
        }

        GateVerdict::from_failures(failures)
    }

    /// Current gate state.
    pub fn status(&self) -> GateStatus {
        let (paused, pause_reason) = self.is_paused();
        let pause_expires_at = self.pause.read().as_ref().map(|p| p.expires_at);
        let (consecutive_latency_breaches, avg_latency_ms) = {
            let monitor = self.latency.lock();
            let samples: Vec<f64> = monitor.samples.iter().copied().collect();
            (monitor.consecutive_breaches, mean(&samples))
        };

        GateStatus {
            paused,
            pause_reason,
            pause_expires_at,
            consecutive_latency_breaches,
            avg_latency_ms,
            tracked_instruments: self.instruments.lock().len(),
        }
    }
}

impl Default for ExecutionGate {
    fn default() -> Self {
        Self::new(GateConfig::default())
    }
}
