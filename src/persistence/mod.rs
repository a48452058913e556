//! SQLite persistence for learned strategy state.
//!
//! Persists the two snapshots that must survive restarts:
//! - Bandit posteriors keyed by `"{regime}:{strategy_id}"`
//! - Strategy weights with rolling performance histories
//!
//! plus an append-only log of recorded trade outcomes.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use std::path::Path;
use tracing::{debug, info, warn};

/// Persisted Beta posterior for one (regime, strategy) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedPosterior {
    pub regime: String,
    pub strategy_id: String,
    pub alpha: f64,
    pub beta: f64,
}

impl PersistedPosterior {
    /// Storage key.
    pub fn key(&self) -> String {
        posterior_key(&self.regime, &self.strategy_id)
    }
}

pub fn posterior_key(regime: &str, strategy_id: &str) -> String {
    format!("{}:{}", regime, strategy_id)
}

/// Persisted weight and performance of one strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedPerformance {
    pub strategy_id: String,
    pub weight: f64,
    pub trades: u64,
    pub wins: u64,
    pub pnl_history: Vec<f64>,
    pub rr_history: Vec<f64>,
    pub sharpe: f64,
}

/// A recorded trade outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct OutcomeRecord {
    pub timestamp: DateTime<Utc>,
    pub strategy_id: String,
    pub regime: String,
    pub pnl: f64,
    pub realized_rr: f64,
    pub is_win: bool,
}

/// SQLite-based persistence manager.
pub struct PersistenceManager {
    conn: Mutex<Connection>,
}

impl PersistenceManager {
    /// Create a new persistence manager, initializing the database if needed.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory {:?}", parent))?;
            }
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {:?}", path))?;

        let manager = Self {
            conn: Mutex::new(conn),
        };
        manager.init_schema()?;

        info!("Persistence manager initialized at {:?}", path);
        Ok(manager)
    }

    /// In-memory database for tests and dry runs.
    pub fn in_memory() -> Result<Self> {
        Self::new(":memory:")
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.lock().execute_batch(
            r#"
            -- Thompson sampling posteriors
            CREATE TABLE IF NOT EXISTS bandit_posteriors (
                key TEXT PRIMARY KEY,
                regime TEXT NOT NULL,
                strategy_id TEXT NOT NULL,
                alpha REAL NOT NULL,
                beta REAL NOT NULL,
                updated_at TEXT NOT NULL
            );

            -- Adaptive weights and rolling performance
            CREATE TABLE IF NOT EXISTS strategy_performance (
                strategy_id TEXT PRIMARY KEY,
                weight REAL NOT NULL,
                trades INTEGER NOT NULL,
                wins INTEGER NOT NULL,
                pnl_history TEXT NOT NULL,
                rr_history TEXT NOT NULL,
                sharpe REAL NOT NULL,
                updated_at TEXT NOT NULL
            );

            -- Trade outcome log
            CREATE TABLE IF NOT EXISTS trade_outcomes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                strategy_id TEXT NOT NULL,
                regime TEXT NOT NULL,
                pnl REAL NOT NULL,
                realized_rr REAL NOT NULL,
                is_win INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_outcomes_strategy ON trade_outcomes(strategy_id);
            "#,
        )?;

        debug!("Database schema initialized");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Bandit posteriors
    // -------------------------------------------------------------------------

    /// Upsert one posterior.
    pub fn save_posterior(&self, posterior: &PersistedPosterior) -> Result<()> {
        self.conn.lock().execute(
            r#"
            INSERT INTO bandit_posteriors (key, regime, strategy_id, alpha, beta, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(key) DO UPDATE SET
                alpha = ?4,
                beta = ?5,
                updated_at = ?6
            "#,
            params![
                posterior.key(),
                posterior.regime,
                posterior.strategy_id,
                posterior.alpha,
                posterior.beta,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Load every stored posterior.
    pub fn load_posteriors(&self) -> Result<Vec<PersistedPosterior>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT regime, strategy_id, alpha, beta
            FROM bandit_posteriors
            ORDER BY key
            "#,
        )?;

        let posteriors: Vec<PersistedPosterior> = stmt
            .query_map([], |row| {
                Ok(PersistedPosterior {
                    regime: row.get(0)?,
                    strategy_id: row.get(1)?,
                    alpha: row.get(2)?,
                    beta: row.get(3)?,
                })
            })?
            .filter_map(|r| skip_bad_row(r, "bandit_posteriors"))
            .collect();

        debug!(count = posteriors.len(), "Loaded bandit posteriors");
        Ok(posteriors)
    }

    /// Delete posteriors for one regime, or all of them.
    pub fn clear_posteriors(&self, regime: Option<&str>) -> Result<usize> {
        let conn = self.conn.lock();
        let deleted = match regime {
            Some(regime) => conn.execute(
                "DELETE FROM bandit_posteriors WHERE regime = ?1",
                params![regime],
            )?,
            None => conn.execute("DELETE FROM bandit_posteriors", [])?,
        };
        Ok(deleted)
    }

    // -------------------------------------------------------------------------
    // Strategy performance
    // -------------------------------------------------------------------------

    /// Replace the full weighting snapshot.
    pub fn save_performance(&self, snapshot: &[PersistedPerformance]) -> Result<()> {
        let conn = self.conn.lock();
        let tx = conn.unchecked_transaction()?;
        let now = Utc::now().to_rfc3339();

        tx.execute("DELETE FROM strategy_performance", [])?;

        for perf in snapshot {
            tx.execute(
                r#"
                INSERT INTO strategy_performance (strategy_id, weight, trades, wins,
                                                  pnl_history, rr_history, sharpe, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
                params![
                    perf.strategy_id,
                    perf.weight,
                    perf.trades as i64,
                    perf.wins as i64,
                    serde_json::to_string(&perf.pnl_history)?,
                    serde_json::to_string(&perf.rr_history)?,
                    perf.sharpe,
                    now,
                ],
            )?;
        }

        tx.commit()?;

        debug!(strategies = snapshot.len(), "Weighting snapshot saved");
        Ok(())
    }

    /// Load the weighting snapshot.
    pub fn load_performance(&self) -> Result<Vec<PersistedPerformance>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT strategy_id, weight, trades, wins, pnl_history, rr_history, sharpe
            FROM strategy_performance
            ORDER BY strategy_id
            "#,
        )?;

        let snapshot: Vec<PersistedPerformance> = stmt
            .query_map([], |row| {
                let strategy_id: String = row.get(0)?;
                let pnl_json: String = row.get(4)?;
                let rr_json: String = row.get(5)?;
                Ok(PersistedPerformance {
                    weight: row.get(1)?,
                    trades: row.get::<_, i64>(2)?.max(0) as u64,
                    wins: row.get::<_, i64>(3)?.max(0) as u64,
                    pnl_history: decode_history(&strategy_id, "pnl_history", &pnl_json),
                    rr_history: decode_history(&strategy_id, "rr_history", &rr_json),
                    sharpe: row.get(6)?,
                    strategy_id,
                })
            })?
            .filter_map(|r| skip_bad_row(r, "strategy_performance"))
            .collect();

        debug!(count = snapshot.len(), "Loaded strategy performance");
        Ok(snapshot)
    }

    // -------------------------------------------------------------------------
    // Outcome log
    // -------------------------------------------------------------------------

    /// Append a trade outcome.
    pub fn record_outcome(&self, outcome: &OutcomeRecord) -> Result<()> {
        self.conn.lock().execute(
            r#"
            INSERT INTO trade_outcomes (timestamp, strategy_id, regime, pnl, realized_rr, is_win)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                outcome.timestamp.to_rfc3339(),
                outcome.strategy_id,
                outcome.regime,
                outcome.pnl,
                outcome.realized_rr,
                outcome.is_win as i32,
            ],
        )?;
        Ok(())
    }

    /// Most recent outcomes, newest first.
    pub fn recent_outcomes(&self, limit: usize) -> Result<Vec<OutcomeRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT timestamp, strategy_id, regime, pnl, realized_rr, is_win
            FROM trade_outcomes
            ORDER BY id DESC
            LIMIT ?1
            "#,
        )?;

        let outcomes: Vec<OutcomeRecord> = stmt
            .query_map([limit as i64], |row| {
                let ts: String = row.get(0)?;
                Ok(OutcomeRecord {
                    timestamp: DateTime::parse_from_rfc3339(&ts)
                        .map(|dt| dt.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                    strategy_id: row.get(1)?,
                    regime: row.get(2)?,
                    pnl: row.get(3)?,
                    realized_rr: row.get(4)?,
                    is_win: row.get::<_, i32>(5)? != 0,
                })
            })?
            .filter_map(|r| skip_bad_row(r, "trade_outcomes"))
            .collect();

        Ok(outcomes)
    }

    /// Total recorded outcomes.
    pub fn outcome_count(&self) -> Result<u64> {
        let count: i64 =
            self.conn
                .lock()
                .query_row("SELECT COUNT(*) FROM trade_outcomes", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    /// Clear all data (for testing or reset).
    pub fn clear_all(&self) -> Result<()> {
        warn!("Clearing all persistence data");
        self.conn.lock().execute_batch(
            r#"
            DELETE FROM bandit_posteriors;
            DELETE FROM strategy_performance;
            DELETE FROM trade_outcomes;
            "#,
        )?;
        Ok(())
    }
}

/// Keep decodable rows; log and drop the rest.
fn skip_bad_row<T>(row: rusqlite::Result<T>, table: &str) -> Option<T> {
    match row {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(table, error = %e, "Skipping undecodable row");
            None
        }
    }
}

/// Decode a JSON history column; a corrupt value restarts that history empty.
fn decode_history(strategy_id: &str, column: &str, raw: &str) -> Vec<f64> {
    serde_json::from_str(raw).unwrap_or_else(|e| {
        warn!(
            strategy = strategy_id,
            column,
            error = %e,
            "Corrupt history in weighting snapshot, starting it empty"
        );
        Vec::new()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn posterior(regime: &str, strategy_id: &str, alpha: f64, beta: f64) -> PersistedPosterior {
        PersistedPosterior {
            regime: regime.to_string(),
            strategy_id: strategy_id.to_string(),
            alpha,
            beta,
        }
    }

    #[test]
    fn test_posterior_upsert() {
        let manager = PersistenceManager::in_memory().unwrap();

        manager
            .save_posterior(&posterior("trending", "ema_trend", 2.0, 1.0))
            .unwrap();
        manager
            .save_posterior(&posterior("trending", "ema_trend", 3.0, 1.5))
            .unwrap();
        manager
            .save_posterior(&posterior("choppy", "rsi_reversion", 1.0, 4.0))
            .unwrap();

        let loaded = manager.load_posteriors().unwrap();
        assert_eq!(loaded.len(), 2);
        // Ordered by key: "choppy:..." < "trending:..."
        assert_eq!(loaded[0].key(), "choppy:rsi_reversion");
        assert_eq!(loaded[1], posterior("trending", "ema_trend", 3.0, 1.5));
    }

    #[test]
    fn test_clear_posteriors_by_regime() {
        let manager = PersistenceManager::in_memory().unwrap();
        manager
            .save_posterior(&posterior("trending", "ema_trend", 2.0, 1.0))
            .unwrap();
        manager
            .save_posterior(&posterior("choppy", "ema_trend", 1.0, 2.0))
            .unwrap();

        assert_eq!(manager.clear_posteriors(Some("choppy")).unwrap(), 1);
        assert_eq!(manager.load_posteriors().unwrap().len(), 1);
        assert_eq!(manager.clear_posteriors(None).unwrap(), 1);
        assert!(manager.load_posteriors().unwrap().is_empty());
    }

    #[test]
    fn test_performance_snapshot_replaces_previous() {
        let manager = PersistenceManager::in_memory().unwrap();

        let first = vec![PersistedPerformance {
            strategy_id: "momentum_breakout".to_string(),
            weight: 1.2,
            trades: 3,
            wins: 2,
            pnl_history: vec![10.0, -5.0, 7.5],
            rr_history: vec![2.0, -1.0, 1.5],
            sharpe: 4.2,
        }];
        manager.save_performance(&first).unwrap();
        assert_eq!(manager.load_performance().unwrap(), first);

        let second = vec![PersistedPerformance {
            strategy_id: "vwap_reversion".to_string(),
            weight: 0.8,
            trades: 1,
            wins: 0,
            pnl_history: vec![-3.0],
            rr_history: vec![-1.0],
            sharpe: 0.0,
        }];
        manager.save_performance(&second).unwrap();

        let loaded = manager.load_performance().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].strategy_id, "vwap_reversion");
    }

    #[test]
    fn test_corrupt_rows_are_skipped_not_fatal() {
        let manager = PersistenceManager::in_memory().unwrap();
        manager
            .save_posterior(&posterior("trending", "ema_trend", 2.0, 1.0))
            .unwrap();
        manager
            .conn
            .lock()
            .execute(
                "INSERT INTO bandit_posteriors (key, regime, strategy_id, alpha, beta, updated_at)
                 VALUES ('trending:broken', 'trending', 'broken', 'not-a-number', 1.0, '')",
                [],
            )
            .unwrap();

        let loaded = manager.load_posteriors().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].strategy_id, "ema_trend");
    }

    #[test]
    fn test_corrupt_history_restores_empty() {
        let manager = PersistenceManager::in_memory().unwrap();
        manager
            .conn
            .lock()
            .execute(
                "INSERT INTO strategy_performance (strategy_id, weight, trades, wins,
                                                   pnl_history, rr_history, sharpe, updated_at)
                 VALUES ('rsi_reversion', 1.3, 4, 3, '[1.0, 2.0', '[1.5]', 2.0, '')",
                [],
            )
            .unwrap();

        let loaded = manager.load_performance().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].weight, 1.3);
        assert!(loaded[0].pnl_history.is_empty());
        assert_eq!(loaded[0].rr_history, vec![1.5]);
    }

    #[test]
    fn test_outcome_log() {
        let manager = PersistenceManager::in_memory().unwrap();
        for (i, pnl) in [12.0, -4.0, 6.0].iter().enumerate() {
            manager
                .record_outcome(&OutcomeRecord {
                    timestamp: Utc::now(),
                    strategy_id: format!("s{}", i),
                    regime: "trending".to_string(),
                    pnl: *pnl,
                    realized_rr: 1.0,
                    is_win: *pnl > 0.0,
                })
                .unwrap();
        }

        assert_eq!(manager.outcome_count().unwrap(), 3);
        let recent = manager.recent_outcomes(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].strategy_id, "s2");
        assert!(!recent[1].is_win);

        manager.clear_all().unwrap();
        assert_eq!(manager.outcome_count().unwrap(), 0);
    }

    #[test]
    fn test_creates_parent_directory() {
        let dir = std::env::temp_dir().join(format!("alpha-scanner-test-{}", std::process::id()));
        let path = dir.join("nested").join("state.db");

        let manager = PersistenceManager::new(&path).unwrap();
        manager
            .save_posterior(&posterior("trending", "ema_trend", 2.0, 1.0))
            .unwrap();
        drop(manager);

        let reopened = PersistenceManager::new(&path).unwrap();
        assert_eq!(reopened.load_posteriors().unwrap().len(), 1);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
