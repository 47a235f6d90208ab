use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::debug;

use crate::config::RiskConfig;
use crate::domain::Position;

/// Risk events surfaced by the per-cycle limit check.
#[derive(Debug, Clone, PartialEq)]
pub enum RiskEvent {
    /// Cumulative position P&L breached the daily-loss percentage.
    /// Emitted exactly once per breach; re-arming requires an explicit
    /// trading re-enable.
    DailyLossBreached { total_pnl_pct: f64 },
}

/// Latching daily-loss gate plus position-count advisory.
pub struct RiskGate {
    /// Breach threshold in percentage points of cumulative position P&L
    loss_threshold_pct: f64,
    max_positions: usize,
    latched: bool,
}

impl RiskGate {
    pub fn new(risk: &RiskConfig) -> Self {
        Self {
            loss_threshold_pct: risk.max_daily_loss_pct.to_f64().unwrap_or(0.0) * 100.0,
            max_positions: risk.max_positions,
            latched: false,
        }
    }

    /// Sum `pnl_pct` across positions and test the daily-loss limit. The
    /// breach fires once; every later cycle with the same breached total
    /// returns `None`.
    pub fn evaluate_positions(&mut self, positions: &[Position]) -> Option<RiskEvent> {
        let total_pnl_pct: f64 = positions.iter().map(Position::pnl_pct).sum();

        if positions.len() >= self.max_positions {
            debug!("Max positions ({}) reached", self.max_positions);
        }

        if total_pnl_pct < -self.loss_threshold_pct {
            if self.latched {
                return None;
            }
            self.latched = true;
            return Some(RiskEvent::DailyLossBreached { total_pnl_pct });
        }
        None
    }

    pub fn breached(&self) -> bool {
        self.latched
    }

    /// Re-arm after an explicit external re-enable.
    pub fn reset(&mut self) {
        self.latched = false;
    }

    /// Daily loss limit in dollars for a given capital base.
    pub fn dollar_limit(risk: &RiskConfig) -> Decimal {
        risk.max_daily_loss_pct * risk.starting_capital
    }
}
