//! Alpha Scanner - Main Entry Point
//!
//! Paper-mode scan loop over an in-memory market snapshot, plus state
//! inspection commands for the learning database.

use alpha_scanner::config::Config;
use alpha_scanner::market::StaticMarket;
use alpha_scanner::persistence::PersistenceManager;
use alpha_scanner::strategy::TradingPlan;
use alpha_scanner::DecisionEngine;
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Alpha Scanner CLI
#[derive(Parser)]
#[command(name = "alpha-scanner")]
#[command(version, about = "Ranked, risk-sized trade candidates from alpha signals")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scan loop until interrupted
    Run {
        /// JSON file of instrument snapshots
        #[arg(short, long)]
        market: String,

        /// Instruments already held (comma separated)
        #[arg(short, long, value_delimiter = ',')]
        open: Vec<String>,
    },

    /// Run a single scan and print the plans as JSON
    ScanOnce {
        /// JSON file of instrument snapshots
        #[arg(short, long)]
        market: String,

        /// Instruments already held (comma separated)
        #[arg(short, long, value_delimiter = ',')]
        open: Vec<String>,
    },

    /// Show learned state from the database
    Status {
        /// Path to SQLite database
        #[arg(short, long, default_value = "data/alpha_state.db")]
        db: String,

        /// Show recent trade outcomes
        #[arg(short, long)]
        verbose: bool,
    },

    /// Clear learned state
    Reset {
        /// Path to SQLite database
        #[arg(short, long, default_value = "data/alpha_state.db")]
        db: String,

        /// Only clear bandit posteriors for this regime
        #[arg(short, long)]
        regime: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging()?;

    match cli.command {
        Commands::Run { market, open } => run(&market, &open).await,
        Commands::ScanOnce { market, open } => scan_once(&market, &open).await,
        Commands::Status { db, verbose } => show_status(&db, verbose),
        Commands::Reset { db, regime } => reset_state(&db, regime.as_deref()),
    }
}

/// Build an engine over a snapshot file. An empty instrument list scans
/// every instrument in the file.
async fn build_engine(market_path: &str) -> Result<DecisionEngine> {
    let mut config = Config::load()?;
    let market = StaticMarket::from_json_file(market_path)?;

    if config.scanner.instruments.is_empty() {
        config.scanner.instruments = market.instruments().await;
    }
    log_config(&config);

    DecisionEngine::from_config(config, Arc::new(market))
}

async fn run(market_path: &str, open_positions: &[String]) -> Result<()> {
    info!("Alpha Scanner v{} starting", env!("CARGO_PKG_VERSION"));

    let engine = build_engine(market_path).await?;
    let interval_ms = engine.config().scanner.scan_interval_ms;

    // Shutdown signal
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutdown signal received");
        shutdown_clone.store(true, Ordering::SeqCst);
    });

    let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    info!(interval_ms, "Starting scan loop");

    while !shutdown.load(Ordering::SeqCst) {
        ticker.tick().await;

        let plans = engine.scan(open_positions).await;
        for (rank, plan) in plans.iter().enumerate() {
            log_plan(rank + 1, plan);
        }

        let stats = engine.scanner().stats();
        if stats.scans % 60 == 0 {
            info!(
                scans = stats.scans,
                evaluated = stats.evaluated,
                skip_rate = %format!("{:.1}%", stats.skip_rate() * 100.0),
                fetch_failures = stats.fetch_failures,
                low_quality = stats.low_quality,
                tail_risk = stats.tail_risk,
                gate_rejections = stats.gate_rejections,
                paused_scans = stats.paused_scans,
                timeouts = stats.timeouts,
                "Scan statistics"
            );
        }
        if stats.fetch_failures > 0 && stats.candidates_emitted == 0 && stats.scans % 60 == 0 {
            warn!(
                fetch_failures = stats.fetch_failures,
                "No candidates emitted while collaborators are failing"
            );
        }
    }

    let stats = engine.get_stats();
    info!(
        "Final stats: {}",
        serde_json::to_string(&stats).unwrap_or_default()
    );
    info!("Alpha Scanner shutdown complete");
    Ok(())
}

async fn scan_once(market_path: &str, open_positions: &[String]) -> Result<()> {
    let engine = build_engine(market_path).await?;
    let plans = engine.scan(open_positions).await;

    println!("{}", serde_json::to_string_pretty(&plans)?);
    Ok(())
}

fn log_plan(rank: usize, plan: &TradingPlan) {
    info!(
        rank,
        instrument = %plan.instrument,
        strategy = %plan.strategy_id,
        action = %plan.action,
        score = %format!("{:.2}", plan.weighted_quality_score),
        lots = plan.lots,
        entry = plan.entry,
        stop_loss = plan.stop_loss,
        take_profit = plan.take_profit,
        es95 = %format!("{:.2}", plan.risk_estimate),
        bandit_pick = plan.bandit_pick,
        "Trading plan"
    );
}

/// Initialize logging to stderr and an hourly rolling file.
fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::hourly("logs", "alpha-scanner.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);

    // Leak the guard to keep it alive for the program duration
    Box::leak(Box::new(_guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("alpha_scanner=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stderr.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .init();

    Ok(())
}

/// Log configuration on startup.
fn log_config(config: &Config) {
    info!("Configuration:");
    info!("   Instruments: {}", config.scanner.instruments.join(", "));
    info!("   Max Signals: {}", config.scanner.max_signals);
    info!("   Min Quality Score: {:.1}", config.scanner.min_quality_score);
    info!("   Max Tail Risk (ES95): ${:.2}", config.scanner.max_tail_risk);
    info!(
        "   Max Risk Per Trade: {:.2}%",
        config.sizing.max_risk_per_trade * 100.0
    );
    info!("   Kelly Scale: {:.2}", config.sizing.kelly_scale);
    info!("   Equity: ${:.2}", config.scanner.equity);
    info!(
        "   Persistence: {}",
        if config.persistence.enabled {
            config.persistence.db_path.as_str()
        } else {
            "disabled"
        }
    );
}

fn show_status(db_path: &str, verbose: bool) -> Result<()> {
    use std::path::Path;

    println!("ALPHA SCANNER STATE");
    println!("===================");

    if !Path::new(db_path).exists() {
        println!("\nDatabase not found: {}", db_path);
        println!("   The scanner has not recorded any outcomes yet, or the path is incorrect.");
        return Ok(());
    }

    let persistence = PersistenceManager::new(db_path)?;

    let performance = persistence.load_performance()?;
    println!("\nStrategy Weights");
    if performance.is_empty() {
        println!("   (none, all strategies neutral at 1.0)");
    }
    for perf in &performance {
        let hit_rate = if perf.trades > 0 {
            perf.wins as f64 / perf.trades as f64 * 100.0
        } else {
            0.0
        };
        println!(
            "   ├─ {:<20} weight {:.3}  trades {:>4}  hit {:>5.1}%  sharpe {:>7.2}",
            perf.strategy_id, perf.weight, perf.trades, hit_rate, perf.sharpe
        );
    }

    let posteriors = persistence.load_posteriors()?;
    println!("\nBandit Posteriors");
    if posteriors.is_empty() {
        println!("   (none, uniform priors)");
    }
    for p in &posteriors {
        println!(
            "   ├─ {:<36} alpha {:>7.2}  beta {:>7.2}  mean {:.3}",
            p.key(),
            p.alpha,
            p.beta,
            p.alpha / (p.alpha + p.beta)
        );
    }

    println!("\nOutcomes recorded: {}", persistence.outcome_count()?);

    if verbose {
        let recent = persistence.recent_outcomes(10)?;
        if !recent.is_empty() {
            println!("\nRecent Outcomes");
            for o in &recent {
                println!(
                    "   ├─ {}  {:<20} {:<16} pnl {:>9.2}  rr {:>5.2}  {}",
                    o.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    o.strategy_id,
                    o.regime,
                    o.pnl,
                    o.realized_rr,
                    if o.is_win { "WIN" } else { "LOSS" }
                );
            }
        }
    }

    println!();
    Ok(())
}

fn reset_state(db_path: &str, regime: Option<&str>) -> Result<()> {
    let persistence = PersistenceManager::new(db_path)?;

    match regime {
        Some(regime) => {
            let cleared = persistence.clear_posteriors(Some(regime))?;
            println!("Cleared {} posteriors for regime '{}'", cleared, regime);
        }
        None => {
            persistence.clear_all()?;
            println!("Cleared all learned state in {}", db_path);
        }
    }
    Ok(())
}
