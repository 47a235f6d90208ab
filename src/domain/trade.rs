use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

use super::market::{MarketType, OrderStatus, Side};

/// Confirmed fill reported by the executor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeFill {
    pub trade_id: String,
    pub symbol: String,
    pub side: Side,
    pub quantity: Decimal,
    pub fill_price: Decimal,
    pub status: OrderStatus,
    pub timestamp: DateTime<Utc>,
    /// True when filled by the simulated broker
    #[serde(default)]
    pub simulated: bool,
}

/// Open position as tracked by the executor and mirrored by the coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub market_type: MarketType,
    pub side: Side,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub current_price: Decimal,
    pub entry_time: DateTime<Utc>,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    /// Strategy tag carried from the originating signal
    #[serde(default)]
    pub strategy: String,
}

impl Position {
    /// Unrealized P&L in percent of entry
    pub fn pnl_pct(&self) -> f64 {
        let entry = self.entry_price.to_f64().unwrap_or(0.0);
        let current = self.current_price.to_f64().unwrap_or(0.0);
        if entry <= 0.0 {
            return 0.0;
        }
        (current / entry - 1.0) * 100.0
    }
}

/// Completed-trade outcome fanned out to the learning collaborators
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeOutcome {
    pub symbol: String,
    pub market_type: MarketType,
    pub side: Side,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    /// Quantity-weighted average across partial and final exits
    pub exit_price: Decimal,
    pub pnl: Decimal,
    pub pnl_pct: f64,
    pub risk_reward_achieved: f64,
    pub hold_time_hours: f64,
    pub strategy: String,
    pub exit_reason: String,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn position(entry: Decimal, current: Decimal) -> Position {
        Position {
            symbol: "TEST".to_string(),
            market_type: MarketType::Equity,
            side: Side::Buy,
            quantity: dec!(100),
            entry_price: entry,
            current_price: current,
            entry_time: Utc::now(),
            stop_loss: None,
            take_profit: None,
            strategy: String::new(),
        }
    }

    #[test]
    fn pnl_pct_tracks_price_move() {
        assert!((position(dec!(100), dec!(105)).pnl_pct() - 5.0).abs() < 1e-9);
        assert!((position(dec!(100), dec!(95)).pnl_pct() + 5.0).abs() < 1e-9);
    }

    #[test]
    fn pnl_pct_guards_zero_entry() {
        assert_eq!(position(dec!(0), dec!(10)).pnl_pct(), 0.0);
    }
}
