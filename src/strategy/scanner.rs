//! Scan loop: turns collaborator data into ranked trading plans.
//!
//! A scan runs in two stages. Stage one fetches features, forecasts, specs
//! and correlations for every instrument concurrently under an overall
//! deadline. Stage two evaluates every (instrument, strategy) pair on the
//! fetched data without suspending, in instrument then registration order,
//! so identical inputs always produce identical plans.

use super::bandit::RegimeBandit;
use super::weighting::AdaptiveWeighting;
use crate::alpha::{Action, AlphaCatalog, Features, Strategy};
use crate::config::{ScannerConfig, SizingConfig};
use crate::market::{InstrumentSpec, MarketData, Prediction};
use crate::risk::{quality_score, ExecutionGate, PositionSizer};
use futures_util::stream::{self, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, trace, warn};

/// A scored, sized trade proposal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradingPlan {
    pub instrument: String,
    pub strategy_id: String,
    pub action: Action,
    pub regime: String,
    pub entry: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub lots: f64,
    pub expected_rr: f64,
    /// Strategy confidence after weight and bandit boost
    pub weighted_confidence: f64,
    /// Q* before weighting
    pub quality_score: f64,
    /// Ranking key
    pub weighted_quality_score: f64,
    pub weight: f64,
    pub bandit_pick: bool,
    /// ES95 in account currency
    pub risk_estimate: f64,
    pub raw_predictions: Prediction,
}

/// Cumulative scan counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScanStats {
    pub scans: u64,
    /// (instrument, strategy) pairs evaluated
    pub evaluated: u64,
    /// Pairs that produced no plan
    pub skipped: u64,
    pub embargoed: u64,
    pub missing_data: u64,
    pub fetch_failures: u64,
    /// Malformed inputs for a single pair (e.g. an invalid instrument spec)
    pub pair_errors: u64,
    /// Pairs whose weighted score fell below the minimum
    pub low_quality: u64,
    /// Pairs whose minimum size still broke the ES95 cap
    pub tail_risk: u64,
    /// Survivors dropped by a failing execution gate
    pub gate_rejections: u64,
    pub paused_scans: u64,
    pub timeouts: u64,
    pub candidates_emitted: u64,
    pub last_scan_ms: u64,
}

impl ScanStats {
    /// Share of evaluated pairs that were skipped.
    pub fn skip_rate(&self) -> f64 {
        if self.evaluated == 0 {
            0.0
        } else {
            self.skipped as f64 / self.evaluated as f64
        }
    }
}

/// Reasons for dropping a pair during evaluation.
#[derive(Debug, Clone, Copy)]
enum RejectReason {
    NoSignal,
    LowQuality,
    NoPrice,
    SizingError,
    ZeroSize,
    TailRisk,
    Correlated,
}

#[derive(Debug, Default)]
struct RejectCounts {
    no_signal: u64,
    low_quality: u64,
    no_price: u64,
    sizing_error: u64,
    zero_size: u64,
    tail_risk: u64,
    correlated: u64,
}

impl RejectCounts {
    fn add(&mut self, reason: RejectReason) {
        match reason {
            RejectReason::NoSignal => self.no_signal += 1,
            RejectReason::LowQuality => self.low_quality += 1,
            RejectReason::NoPrice => self.no_price += 1,
            RejectReason::SizingError => self.sizing_error += 1,
            RejectReason::ZeroSize => self.zero_size += 1,
            RejectReason::TailRisk => self.tail_risk += 1,
            RejectReason::Correlated => self.correlated += 1,
        }
    }
}

/// Everything fetched for one instrument.
struct InstrumentInputs {
    index: usize,
    instrument: String,
    features: Features,
    prediction: Prediction,
    spec: InstrumentSpec,
    correlation: f64,
    fetch_latency_ms: f64,
}

enum FetchOutcome {
    Ready(Box<InstrumentInputs>),
    Embargoed,
    MissingData,
    Failed,
}

/// Heap entry: highest score first, then earliest instrument, then earliest
/// registered strategy.
struct Ranked {
    instrument_index: usize,
    strategy_index: usize,
    plan: TradingPlan,
}

impl PartialEq for Ranked {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ranked {}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> Ordering {
        self.plan
            .weighted_quality_score
            .total_cmp(&other.plan.weighted_quality_score)
            .then_with(|| other.instrument_index.cmp(&self.instrument_index))
            .then_with(|| other.strategy_index.cmp(&self.strategy_index))
    }
}

/// Stateful collaborators a scan reads from.
pub struct ScanContext<'a> {
    pub market: &'a dyn MarketData,
    pub bandit: &'a RegimeBandit,
    pub weighting: &'a AdaptiveWeighting,
    pub gate: &'a ExecutionGate,
}

/// Scans instruments for the best trading plans.
pub struct Scanner {
    config: ScannerConfig,
    sizer: PositionSizer,
    catalog: Arc<AlphaCatalog>,
    stats: Mutex<ScanStats>,
}

impl Scanner {
    /// Create a new scanner over a strategy catalog.
    pub fn new(config: ScannerConfig, sizing: SizingConfig, catalog: Arc<AlphaCatalog>) -> Self {
        Self {
            config,
            sizer: PositionSizer::new(sizing),
            catalog,
            stats: Mutex::new(ScanStats::default()),
        }
    }

    pub fn instruments(&self) -> &[String] {
        &self.config.instruments
    }

    pub fn catalog(&self) -> &AlphaCatalog {
        &self.catalog
    }

    /// Snapshot of the cumulative counters.
    pub fn stats(&self) -> ScanStats {
        self.stats.lock().clone()
    }

    pub fn reset_stats(&self) {
        *self.stats.lock() = ScanStats::default();
    }

    /// Run one scan and return up to `max_signals` plans, best first.
    ///
    /// Never fails: collaborator errors skip the instrument and a timeout
    /// returns whatever was fetched in time.
    #[instrument(skip(self, ctx))]
    pub async fn scan(&self, ctx: &ScanContext<'_>, open_positions: &[String]) -> Vec<TradingPlan> {
        let started = Instant::now();

        if let (true, reason) = ctx.gate.is_paused() {
            let mut stats = self.stats.lock();
            stats.scans += 1;
            stats.paused_scans += 1;
            stats.last_scan_ms = started.elapsed().as_millis() as u64;
            info!(reason = %reason.unwrap_or_default(), "Trading paused, scan skipped");
            return Vec::new();
        }

        // Stage 1: concurrent fetch under the scan deadline
        let deadline = tokio::time::Instant::now()
            + std::time::Duration::from_millis(self.config.scan_timeout_ms);
        let mut fetches = stream::iter(self.config.instruments.iter().enumerate())
            .map(|(index, instrument)| self.fetch(ctx.market, index, instrument, open_positions))
            .buffer_unordered(self.config.max_concurrent_fetches.max(1));

        let mut ready: Vec<InstrumentInputs> = Vec::new();
        let mut embargoed = 0u64;
        let mut missing_data = 0u64;
        let mut fetch_failures = 0u64;
        let mut timed_out = false;

        loop {
            match tokio::time::timeout_at(deadline, fetches.next()).await {
                Ok(Some(FetchOutcome::Ready(inputs))) => ready.push(*inputs),
                Ok(Some(FetchOutcome::Embargoed)) => embargoed += 1,
                Ok(Some(FetchOutcome::MissingData)) => missing_data += 1,
                Ok(Some(FetchOutcome::Failed)) => fetch_failures += 1,
                Ok(None) => break,
                Err(_) => {
                    timed_out = true;
                    warn!(
                        timeout_ms = self.config.scan_timeout_ms,
                        fetched = ready.len(),
                        "Scan deadline reached, using partial results"
                    );
                    break;
                }
            }
        }
        drop(fetches);

        ready.sort_by_key(|inputs| inputs.index);

        // Stage 2: evaluation without suspension points, against one
        // weight snapshot for the whole scan
        let strategy_ids = self.catalog.ids();
        let weights = ctx.weighting.weights();
        let mut rejects = RejectCounts::default();
        let mut heap: BinaryHeap<Ranked> = BinaryHeap::new();
        let mut evaluated = 0u64;
        let mut gate_rejections = 0u64;

        for inputs in &ready {
            let bandit_pick = match ctx.bandit.select(&inputs.prediction.regime, &strategy_ids) {
                Ok(id) => Some(id),
                Err(e) => {
                    debug!(error = %e, "No bandit boost");
                    None
                }
            };

            let mut survivors: Vec<Ranked> = Vec::new();
            for (strategy_index, strategy) in self.catalog.iter().enumerate() {
                evaluated += 1;
                let picked = bandit_pick.as_deref() == Some(strategy.id());
                match self.evaluate_pair(&weights, inputs, strategy.as_ref(), picked) {
                    Ok(plan) => survivors.push(Ranked {
                        instrument_index: inputs.index,
                        strategy_index,
                        plan,
                    }),
                    Err(reason) => rejects.add(reason),
                }
            }

            // Every fetched quote feeds the gate's windows, candidates or not
            let order_size = survivors.iter().map(|r| r.plan.lots).fold(0.0, f64::max);
            let spread = inputs.features.get("spread").unwrap_or(0.0);
            let verdict = ctx.gate.check_all(
                &inputs.instrument,
                spread,
                order_size,
                inputs.prediction.vol_forecast,
                inputs.fetch_latency_ms,
            );

            if verdict.passed {
                heap.extend(survivors);
            } else if !survivors.is_empty() {
                gate_rejections += survivors.len() as u64;
                debug!(
                    instrument = %inputs.instrument,
                    failures = ?verdict.reasons(),
                    "Execution gate rejected instrument"
                );
            }
        }

        let admitted = heap.len() as u64;
        let mut plans = Vec::with_capacity(self.config.max_signals);
        while plans.len() < self.config.max_signals {
            match heap.pop() {
                Some(ranked) => plans.push(ranked.plan),
                None => break,
            }
        }

        let pair_errors = rejects.sizing_error;
        let skipped = evaluated - admitted;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        {
            let mut stats = self.stats.lock();
            stats.scans += 1;
            stats.evaluated += evaluated;
            stats.skipped += skipped;
            stats.embargoed += embargoed;
            stats.missing_data += missing_data;
            stats.fetch_failures += fetch_failures;
            stats.pair_errors += pair_errors;
            stats.low_quality += rejects.low_quality;
            stats.tail_risk += rejects.tail_risk;
            stats.gate_rejections += gate_rejections;
            stats.timeouts += timed_out as u64;
            stats.candidates_emitted += plans.len() as u64;
            stats.last_scan_ms = elapsed_ms;
        }

        info!(
            instruments = self.config.instruments.len(),
            fetched = ready.len(),
            evaluated,
            emitted = plans.len(),
            embargoed,
            missing_data,
            fetch_failures,
            rejected_no_signal = rejects.no_signal,
            rejected_low_quality = rejects.low_quality,
            rejected_no_price = rejects.no_price,
            rejected_sizing_error = rejects.sizing_error,
            rejected_zero_size = rejects.zero_size,
            rejected_tail_risk = rejects.tail_risk,
            rejected_correlated = rejects.correlated,
            gate_rejections,
            timed_out,
            elapsed_ms,
            "Scan complete"
        );

        plans
    }

    /// Fetch all collaborator inputs for one instrument.
    async fn fetch(
        &self,
        market: &dyn MarketData,
        index: usize,
        instrument: &str,
        open_positions: &[String],
    ) -> FetchOutcome {
        if market.embargo_active(instrument).await {
            debug!(instrument, "News embargo active");
            return FetchOutcome::Embargoed;
        }

        let started = Instant::now();
        let (features, prediction) =
            tokio::join!(market.features(instrument), market.predict(instrument));
        let fetch_latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        let (features, prediction) = match (features, prediction) {
            (Ok(Some(f)), Ok(Some(p))) => (f, p),
            (Err(e), _) | (_, Err(e)) => {
                warn!(instrument, error = %e, "Feature or prediction fetch failed");
                return FetchOutcome::Failed;
            }
            _ => {
                debug!(instrument, "Missing features or prediction");
                return FetchOutcome::MissingData;
            }
        };

        if !prediction.is_usable() {
            debug!(instrument, ?prediction, "Unusable prediction");
            return FetchOutcome::MissingData;
        }

        let spec = match market.instrument_spec(instrument).await {
            Ok(Some(spec)) => spec,
            Ok(None) => {
                debug!(instrument, "No instrument spec");
                return FetchOutcome::MissingData;
            }
            Err(e) => {
                warn!(instrument, error = %e, "Instrument spec fetch failed");
                return FetchOutcome::Failed;
            }
        };

        let correlation = if open_positions.is_empty() {
            0.0
        } else {
            match market.portfolio_correlation(instrument, open_positions).await {
                Ok(c) => c,
                Err(e) => {
                    warn!(instrument, error = %e, "Correlation fetch failed");
                    return FetchOutcome::Failed;
                }
            }
        };

        FetchOutcome::Ready(Box::new(InstrumentInputs {
            index,
            instrument: instrument.to_string(),
            features,
            prediction,
            spec,
            correlation,
            fetch_latency_ms,
        }))
    }

    /// Score and size one (instrument, strategy) pair.
    fn evaluate_pair(
        &self,
        weights: &BTreeMap<String, f64>,
        inputs: &InstrumentInputs,
        strategy: &dyn Strategy,
        bandit_pick: bool,
    ) -> Result<TradingPlan, RejectReason> {
        let strategy_id = strategy.id();
        let features = &inputs.features;
        let signal = strategy
            .evaluate(features)
            .filter(|s| s.action.is_actionable())
            .ok_or(RejectReason::NoSignal)?;

        let prediction = &inputs.prediction;
        let weight = weights.get(strategy_id).copied().unwrap_or(1.0);
        let boost = if bandit_pick { self.config.bandit_boost } else { 1.0 };

        let quality = quality_score(
            prediction.p_win,
            signal.expected_rr,
            prediction.vol_forecast,
            self.config.entropy,
        );
        let weighted_quality_score = quality * weight * boost;
        let weighted_confidence = signal.confidence * weight * boost;

        if weighted_quality_score < self.config.min_quality_score {
            trace!(
                instrument = %inputs.instrument,
                strategy = strategy_id,
                weighted_quality_score,
                "Below minimum quality"
            );
            return Err(RejectReason::LowQuality);
        }

        let entry = features
            .get("close")
            .filter(|p| *p > 0.0)
            .ok_or(RejectReason::NoPrice)?;
        let spec = &inputs.spec;

        let stop_loss = PositionSizer::stop_loss(
            entry,
            prediction.vol_forecast,
            signal.action,
            self.config.stop_multiplier,
        );
        let take_profit =
            PositionSizer::take_profit(entry, stop_loss, signal.action, signal.expected_rr);
        let stop_points = (entry - stop_loss).abs() / spec.point;

        let lots = self
            .sizer
            .size(
                self.config.equity,
                prediction.p_win,
                signal.expected_rr,
                stop_points,
                spec,
                self.config.entropy,
            )
            .map_err(|e| {
                warn!(
                    instrument = %inputs.instrument,
                    strategy = strategy_id,
                    error = %e,
                    "Sizing failed"
                );
                RejectReason::SizingError
            })?;
        let lots = self
            .sizer
            .apply_vol_target(lots, prediction.vol_forecast, self.config.target_vol);
        let mut lots = PositionSizer::normalize_lots(lots, spec);
        if lots <= 0.0 {
            return Err(RejectReason::ZeroSize);
        }

        // ES95 in account currency: stop distance valued per lot
        let stop_value = stop_points * spec.tick_value;
        let mut risk_estimate = PositionSizer::tail_risk(lots, stop_value);
        if risk_estimate > self.config.max_tail_risk {
            lots = PositionSizer::reconcile_tail_risk(
                lots,
                stop_value,
                self.config.max_tail_risk,
                spec,
            );
            risk_estimate = PositionSizer::tail_risk(lots, stop_value);
            if risk_estimate > self.config.max_tail_risk {
                trace!(
                    instrument = %inputs.instrument,
                    strategy = strategy_id,
                    risk_estimate,
                    "Tail risk over cap at minimum size"
                );
                return Err(RejectReason::TailRisk);
            }
        }

        if inputs.correlation > self.config.max_portfolio_correlation {
            trace!(
                instrument = %inputs.instrument,
                correlation = inputs.correlation,
                "Correlated with open book"
            );
            return Err(RejectReason::Correlated);
        }

        Ok(TradingPlan {
            instrument: inputs.instrument.clone(),
            strategy_id: strategy_id.to_string(),
            action: signal.action,
            regime: prediction.regime.clone(),
            entry,
            stop_loss,
            take_profit,
            lots,
            expected_rr: signal.expected_rr,
            weighted_confidence,
            quality_score: quality,
            weighted_quality_score,
            weight,
            bandit_pick,
            risk_estimate,
            raw_predictions: prediction.clone(),
        })
    }
}
