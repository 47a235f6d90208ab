//! Executor state checkpoints.
//!
//! The position book, active trades, and recent closed-trade history are
//! snapshotted to a JSON file on every mutation and reloaded on startup, so
//! the exit state machine picks up where it left off after a restart.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::{Position, TradeFill, TradeOutcome};
use crate::error::Result;

/// Everything the executor needs to survive a restart.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutorState {
    pub positions: Vec<Position>,
    pub active_trades: Vec<TradeFill>,
    pub closed_trades: Vec<TradeOutcome>,
    pub day_trades_today: u32,
    pub saved_at: Option<DateTime<Utc>>,
}

/// File-backed snapshot store.
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            path: dir.as_ref().join("executor_state.json"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist a snapshot, replacing the previous one atomically.
    pub fn save(&self, state: &ExecutorState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut snapshot = state.clone();
        snapshot.saved_at = Some(Utc::now());

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&snapshot)?)?;
        fs::rename(&tmp, &self.path)?;
        debug!(
            "Checkpointed executor state: {} positions, {} closed trades",
            snapshot.positions.len(),
            snapshot.closed_trades.len()
        );
        Ok(())
    }

    /// Load the previous snapshot, if any.
    pub fn load(&self) -> Result<Option<ExecutorState>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&self.path)?;
        let state: ExecutorState = serde_json::from_slice(&bytes)?;
        info!(
            "Restored executor state: {} positions, {} active trades",
            state.positions.len(),
            state.active_trades.len()
        );
        Ok(Some(state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MarketType, OrderStatus, Side};
    use rust_decimal_macros::dec;

    fn temp_store() -> StateStore {
        let dir = std::env::temp_dir().join(format!("flotilla-test-{}", uuid::Uuid::new_v4()));
        StateStore::new(dir)
    }

    #[test]
    fn state_round_trips_through_disk() {
        let store = temp_store();
        assert!(store.load().unwrap().is_none());

        let state = ExecutorState {
            positions: vec![Position {
                symbol: "AAPL".to_string(),
                market_type: MarketType::Equity,
                side: Side::Buy,
                quantity: dec!(50),
                entry_price: dec!(100),
                current_price: dec!(102),
                entry_time: Utc::now(),
                stop_loss: Some(dec!(95)),
                take_profit: Some(dec!(105)),
                strategy: "breakout".to_string(),
            }],
            active_trades: vec![TradeFill {
                trade_id: "SIM-1".to_string(),
                symbol: "AAPL".to_string(),
                side: Side::Buy,
                quantity: dec!(50),
                fill_price: dec!(100),
                status: OrderStatus::Filled,
                timestamp: Utc::now(),
                simulated: true,
            }],
            closed_trades: vec![],
            day_trades_today: 2,
            saved_at: None,
        };

        store.save(&state).unwrap();
        let restored = store.load().unwrap().unwrap();

        assert_eq!(restored.positions.len(), 1);
        assert_eq!(restored.positions[0].symbol, "AAPL");
        assert_eq!(restored.positions[0].stop_loss, Some(dec!(95)));
        assert_eq!(restored.positions[0].take_profit, Some(dec!(105)));
        assert_eq!(restored.active_trades[0].trade_id, "SIM-1");
        assert_eq!(restored.day_trades_today, 2);
        assert!(restored.saved_at.is_some());

        let _ = std::fs::remove_dir_all(store.path().parent().unwrap());
    }
}
