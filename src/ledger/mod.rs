//! Position Ledger
//!
//! Owns the active position set and trade history. All mutations run under a
//! single lock and are persisted synchronously; a failed write rolls the
//! in-memory change back and halts further mutation until the operator
//! clears the halt. Reservations are in-memory only and never durable, so a
//! crash while a slot is RESERVED leaves nothing to reconcile on reload.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::domain::audit::AuditLog;
use crate::domain::position::{ExitReason, Position, PositionStatus};

/// Canonical state files
pub const POSITIONS_FILE: &str = "positions.json";
pub const HISTORY_FILE: &str = "trade_history.json";
pub const DAILY_VOLUME_FILE: &str = "daily_volume.json";
pub const AUDIT_LOG_FILE: &str = "audit.log";

/// Legacy dot-file locations migrated into the canonical store exactly once
pub const LEGACY_POSITIONS_FILE: &str = ".positions.json";
pub const LEGACY_HISTORY_FILE: &str = ".trade_history.json";

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Maximum positions reached ({0})")]
    CapacityExceeded(usize),

    #[error("Duplicate position id: {0}")]
    DuplicateId(String),

    #[error("Unknown or already-consumed reservation")]
    UnknownReservation,

    #[error("Position not found: {0}")]
    NotFound(String),

    #[error("Persistence failure: {0}")]
    Persistence(String),

    #[error("Ledger halted after a persistence failure - resolve storage and clear the halt")]
    Halted,
}

/// Capacity reservation held while execution is in flight. Consumed by
/// `commit_open` or `release_reservation`; never persisted.
#[derive(Debug)]
pub struct ReservationToken {
    id: u64,
    token_mint: String,
}

impl ReservationToken {
    pub fn token_mint(&self) -> &str {
        &self.token_mint
    }
}

#[derive(Debug, Default)]
struct LedgerState {
    positions: HashMap<String, Position>,
    reservations: HashMap<u64, String>,
    history: Vec<Position>,
}

#[derive(Debug, Serialize, Deserialize)]
struct DailyVolume {
    date: String,
    volume_usd: f64,
}

/// Durable ledger of positions and trade history.
pub struct PositionLedger {
    data_dir: PathBuf,
    max_positions: usize,
    audit: AuditLog,
    state: Mutex<LedgerState>,
    halted: AtomicBool,
    next_reservation: AtomicU64,
}

impl PositionLedger {
    pub fn new(data_dir: impl Into<PathBuf>, max_positions: usize) -> Self {
        let data_dir = data_dir.into();
        let audit = AuditLog::new(data_dir.join(AUDIT_LOG_FILE));
        Self {
            data_dir,
            max_positions,
            audit,
            state: Mutex::new(LedgerState::default()),
            halted: AtomicBool::new(false),
            next_reservation: AtomicU64::new(1),
        }
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn max_positions(&self) -> usize {
        self.max_positions
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    /// Operator action after resolving a storage failure.
    pub fn clear_halt(&self) {
        self.halted.store(false, Ordering::SeqCst);
        tracing::warn!("Ledger halt cleared by operator");
    }

    fn check_halt(&self) -> Result<(), LedgerError> {
        if self.is_halted() {
            return Err(LedgerError::Halted);
        }
        Ok(())
    }

    // ==========================================================================
    // TWO-PHASE OPEN
    // ==========================================================================

    /// Reserve a capacity slot. Counts OPEN plus RESERVED against
    /// `max_positions`; no side effect on failure.
    pub async fn reserve_slot(&self, token_mint: &str) -> Result<ReservationToken, LedgerError> {
        self.check_halt()?;
        let mut state = self.state.lock().await;

        let open = state.positions.values().filter(|p| p.is_open()).count();
        if open + state.reservations.len() >= self.max_positions {
            return Err(LedgerError::CapacityExceeded(self.max_positions));
        }

        let id = self.next_reservation.fetch_add(1, Ordering::SeqCst);
        state.reservations.insert(id, token_mint.to_string());
        tracing::debug!("Reserved slot {} for {}", id, token_mint);

        Ok(ReservationToken {
            id,
            token_mint: token_mint.to_string(),
        })
    }

    /// Turn a reservation into an OPEN position and persist it. On a failed
    /// write the in-memory insert is rolled back and the ledger halts.
    pub async fn commit_open(
        &self,
        token: ReservationToken,
        position: Position,
        actor: &str,
    ) -> Result<Position, LedgerError> {
        self.check_halt()?;
        let mut state = self.state.lock().await;

        if state.reservations.remove(&token.id).is_none() {
            return Err(LedgerError::UnknownReservation);
        }
        if state.positions.contains_key(&position.id)
            || state.history.iter().any(|p| p.id == position.id)
        {
            return Err(LedgerError::DuplicateId(position.id));
        }

        let id = position.id.clone();
        state.positions.insert(id.clone(), position.clone());

        if let Err(e) = self.save_locked(&state) {
            state.positions.remove(&id);
            self.halted.store(true, Ordering::SeqCst);
            tracing::error!("Persistence failed on commit_open, halting ledger: {}", e);
            return Err(e);
        }

        self.log_audit(
            "OPEN_POSITION",
            actor,
            true,
            serde_json::json!({
                "position_id": id,
                "token": position.token_symbol,
                "token_mint": position.token_mint,
                "notional_usd": position.notional_usd,
                "entry_price": position.entry_price,
                "tp_price": position.take_profit_price,
                "sl_price": position.stop_loss_price,
                "grade": position.signal_grade,
            }),
        );

        Ok(position)
    }

    /// Drop a reservation after a failed execution. Leaves no trace in
    /// persisted state.
    pub async fn release_reservation(&self, token: ReservationToken) {
        let mut state = self.state.lock().await;
        state.reservations.remove(&token.id);
        tracing::debug!("Released reservation {} for {}", token.id, token.token_mint);
    }

    // ==========================================================================
    // CLOSE
    // ==========================================================================

    /// Close a position with realized PnL and move it to history. Idempotent:
    /// an already-terminal id returns the existing record unchanged.
    pub async fn record_close(
        &self,
        position_id: &str,
        exit_price: f64,
        reason: ExitReason,
        actor: &str,
    ) -> Result<Position, LedgerError> {
        self.check_halt()?;
        let mut state = self.state.lock().await;

        let Some(mut position) = state.positions.remove(position_id) else {
            // Idempotency: already-closed ids return the terminal record
            if let Some(existing) = state.history.iter().find(|p| p.id == position_id) {
                return Ok(existing.clone());
            }
            return Err(LedgerError::NotFound(position_id.to_string()));
        };

        let rollback = position.clone();
        if position
            .close_at(exit_price, reason, Utc::now())
            .is_err()
        {
            // Not open (defensive): keep the record where it was
            state.positions.insert(position_id.to_string(), rollback.clone());
            return Ok(rollback);
        }

        state.history.push(position.clone());

        if let Err(e) = self.save_locked(&state) {
            state.history.pop();
            state.positions.insert(position_id.to_string(), rollback);
            self.halted.store(true, Ordering::SeqCst);
            tracing::error!("Persistence failed on record_close, halting ledger: {}", e);
            return Err(e);
        }

        self.log_audit(
            "CLOSE_POSITION",
            actor,
            true,
            serde_json::json!({
                "position_id": position.id,
                "token": position.token_symbol,
                "entry_price": position.entry_price,
                "exit_price": exit_price,
                "pnl_usd": position.pnl_usd,
                "pnl_pct": position.pnl_pct,
                "reason": reason.as_str(),
            }),
        );

        tracing::info!(
            "Closed {} via {}: P&L ${:+.2} ({:+.1}%)",
            position.token_symbol,
            reason.as_str(),
            position.pnl_usd,
            position.pnl_pct
        );

        Ok(position)
    }

    // ==========================================================================
    // RECOMPUTE
    // ==========================================================================

    /// The single entry point that updates current price, unrealized PnL and
    /// the trailing stop for an open position. Returns the updated snapshot.
    pub async fn recompute(&self, position_id: &str, current_price: f64) -> Option<Position> {
        let mut state = self.state.lock().await;
        let position = state.positions.get_mut(position_id)?;
        if !position.is_open() {
            return None;
        }
        position.mark_price(current_price);
        let snapshot = position.clone();

        // Derived-state update: persist best-effort, a failed write here does
        // not change set membership so it does not halt the ledger.
        if let Err(e) = self.save_locked(&state) {
            tracing::warn!("Failed to persist recompute: {}", e);
        }

        Some(snapshot)
    }

    // ==========================================================================
    // READS
    // ==========================================================================

    pub async fn get_open_positions(&self) -> Vec<Position> {
        let state = self.state.lock().await;
        let mut open: Vec<Position> = state
            .positions
            .values()
            .filter(|p| p.is_open())
            .cloned()
            .collect();
        open.sort_by(|a, b| a.opened_at.cmp(&b.opened_at));
        open
    }

    pub async fn get_position(&self, position_id: &str) -> Option<Position> {
        let state = self.state.lock().await;
        state
            .positions
            .get(position_id)
            .cloned()
            .or_else(|| state.history.iter().find(|p| p.id == position_id).cloned())
    }

    pub async fn trade_history(&self) -> Vec<Position> {
        self.state.lock().await.history.clone()
    }

    /// OPEN + RESERVED, the count bounded by `max_positions`.
    pub async fn open_and_reserved_count(&self) -> usize {
        let state = self.state.lock().await;
        state.positions.values().filter(|p| p.is_open()).count() + state.reservations.len()
    }

    // ==========================================================================
    // PERSISTENCE
    // ==========================================================================

    fn positions_path(&self) -> PathBuf {
        self.data_dir.join(POSITIONS_FILE)
    }

    fn history_path(&self) -> PathBuf {
        self.data_dir.join(HISTORY_FILE)
    }

    fn save_locked(&self, state: &LedgerState) -> Result<(), LedgerError> {
        std::fs::create_dir_all(&self.data_dir)
            .map_err(|e| LedgerError::Persistence(e.to_string()))?;

        let positions: Vec<&Position> = state.positions.values().collect();
        let content = serde_json::to_string_pretty(&positions)
            .map_err(|e| LedgerError::Persistence(e.to_string()))?;
        std::fs::write(self.positions_path(), content)
            .map_err(|e| LedgerError::Persistence(e.to_string()))?;

        let content = serde_json::to_string_pretty(&state.history)
            .map_err(|e| LedgerError::Persistence(e.to_string()))?;
        std::fs::write(self.history_path(), content)
            .map_err(|e| LedgerError::Persistence(e.to_string()))?;

        Ok(())
    }

    /// Persist the current state outside a mutation (e.g. at shutdown).
    pub async fn save(&self) -> Result<(), LedgerError> {
        let state = self.state.lock().await;
        self.save_locked(&state)
    }

    /// Load canonical state, discarding any RESERVED record found on disk,
    /// then migrate records from legacy dot-file locations exactly once.
    pub async fn load(&self) -> Result<(), LedgerError> {
        let mut state = self.state.lock().await;

        state.positions = Self::read_positions(&self.positions_path())?
            .into_iter()
            .map(|p| (p.id.clone(), p))
            .collect();
        state.history = Self::read_position_list(&self.history_path())?;

        let migrated_any = self.migrate_legacy(&mut state)?;

        tracing::info!(
            "Ledger loaded: {} active, {} historical{}",
            state.positions.len(),
            state.history.len(),
            if migrated_any { " (legacy records migrated)" } else { "" }
        );

        Ok(())
    }

    fn read_positions(path: &Path) -> Result<Vec<Position>, LedgerError> {
        let records = Self::read_position_list(path)?;
        let (valid, discarded): (Vec<_>, Vec<_>) = records
            .into_iter()
            .partition(|p| p.status != PositionStatus::Reserved);
        for p in &discarded {
            tracing::warn!("Discarding non-durable RESERVED record {} on load", p.id);
        }
        Ok(valid)
    }

    fn read_position_list(path: &Path) -> Result<Vec<Position>, LedgerError> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content =
            std::fs::read_to_string(path).map_err(|e| LedgerError::Persistence(e.to_string()))?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&content).map_err(|e| LedgerError::Persistence(e.to_string()))
    }

    /// Pull records from the legacy dot-file store into the canonical one.
    /// Legacy files are renamed to `*.migrated` after the canonical write
    /// succeeds, so a second load cannot duplicate.
    fn migrate_legacy(&self, state: &mut LedgerState) -> Result<bool, LedgerError> {
        let legacy_positions = self.data_dir.join(LEGACY_POSITIONS_FILE);
        let legacy_history = self.data_dir.join(LEGACY_HISTORY_FILE);

        let mut migrated = 0usize;

        if legacy_positions.exists() {
            for p in Self::read_positions(&legacy_positions)? {
                if !state.positions.contains_key(&p.id)
                    && !state.history.iter().any(|h| h.id == p.id)
                {
                    state.positions.insert(p.id.clone(), p);
                    migrated += 1;
                }
            }
        }
        if legacy_history.exists() {
            for p in Self::read_position_list(&legacy_history)? {
                if !state.history.iter().any(|h| h.id == p.id)
                    && !state.positions.contains_key(&p.id)
                {
                    state.history.push(p);
                    migrated += 1;
                }
            }
        }

        if !legacy_positions.exists() && !legacy_history.exists() {
            return Ok(false);
        }

        // Persist the merged store first; only then retire the legacy files.
        self.save_locked(state)?;
        for legacy in [legacy_positions, legacy_history] {
            if legacy.exists() {
                let retired = legacy.with_extension("json.migrated");
                std::fs::rename(&legacy, &retired)
                    .map_err(|e| LedgerError::Persistence(e.to_string()))?;
            }
        }

        if migrated > 0 {
            tracing::info!("Migrated {} legacy records into the canonical store", migrated);
        }
        Ok(migrated > 0)
    }

    // ==========================================================================
    // DAILY VOLUME
    // ==========================================================================

    fn volume_path(&self) -> PathBuf {
        self.data_dir.join(DAILY_VOLUME_FILE)
    }

    /// Cumulative USD traded today (UTC); resets on date change.
    pub fn daily_volume(&self) -> f64 {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        let Ok(content) = std::fs::read_to_string(self.volume_path()) else {
            return 0.0;
        };
        match serde_json::from_str::<DailyVolume>(&content) {
            Ok(record) if record.date == today => record.volume_usd,
            _ => 0.0,
        }
    }

    pub fn add_daily_volume(&self, amount_usd: f64) -> Result<(), LedgerError> {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        let record = DailyVolume {
            date: today,
            volume_usd: self.daily_volume() + amount_usd,
        };
        std::fs::create_dir_all(&self.data_dir)
            .map_err(|e| LedgerError::Persistence(e.to_string()))?;
        let content = serde_json::to_string(&record)
            .map_err(|e| LedgerError::Persistence(e.to_string()))?;
        std::fs::write(self.volume_path(), content)
            .map_err(|e| LedgerError::Persistence(e.to_string()))
    }

    // ==========================================================================
    // AUDIT
    // ==========================================================================

    /// Audit write failures are logged but never roll back the trade itself.
    pub fn log_audit(&self, action: &str, actor: &str, success: bool, details: serde_json::Value) {
        if let Err(e) = self.audit.append(action, actor, success, details) {
            tracing::error!("Failed to write audit log: {}", e);
        }
    }
}
