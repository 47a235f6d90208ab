use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::MonitorConfig;
use crate::domain::{round_quantity, MarketType, Position, Side};

/// Exit-plan parameters for one managed position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitParams {
    /// Share of the initial quantity sold at the first target
    pub partial_pct: Decimal,
    /// Risk:reward multiple locating the first target
    pub first_target_rr: f64,
    /// Trailing distance as a fraction of the highest price
    pub trailing_pct: Decimal,
    /// Risk:reward multiple at which trailing activates
    pub trailing_start_rr: f64,
}

impl Default for ExitParams {
    fn default() -> Self {
        Self {
            partial_pct: Decimal::new(50, 2),
            first_target_rr: 1.0,
            trailing_pct: Decimal::new(2, 2),
            trailing_start_rr: 1.5,
        }
    }
}

impl From<&MonitorConfig> for ExitParams {
    fn from(cfg: &MonitorConfig) -> Self {
        Self {
            partial_pct: cfg.partial_take_profit_pct,
            first_target_rr: cfg.first_target_rr,
            trailing_pct: cfg.trailing_stop_pct,
            trailing_start_rr: cfg.trailing_start_rr,
        }
    }
}

/// One partial fill taken against a managed position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartialExit {
    pub quantity: Decimal,
    pub price: Decimal,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// What the exit plan wants to do at the current price. Decisions are pure;
/// state only advances after the corresponding broker call succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitAction {
    Hold,
    /// Full exit: price at or below the original stop before the first target
    StopLoss,
    /// Sell the configured share of the initial quantity
    PartialTarget,
    /// Exit the remainder: price fell back to the breakeven stop
    BreakevenStop,
    /// Activate the trailing stop (no broker call involved)
    StartTrailing,
    /// Exit the remainder: price at or below the trailing stop
    TrailingStop,
}

/// Snapshot published after each poll cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagedPositionStatus {
    pub symbol: String,
    pub entry: Decimal,
    pub current: Decimal,
    pub pnl_pct: f64,
    pub current_rr: f64,
    pub initial_quantity: Decimal,
    pub remaining_quantity: Decimal,
    pub first_target_hit: bool,
    pub first_target_price: Decimal,
    pub trailing_active: bool,
    pub trail_stop: Option<Decimal>,
    pub highest_price: Decimal,
    pub original_stop: Decimal,
    /// The stop currently protecting the remainder
    pub effective_stop: Decimal,
}

/// Exit-plan wrapper around one open position.
///
/// Invariants: `remaining_quantity` only decreases; `highest_price` and
/// `current_trail_stop` only increase; `first_target_hit` and
/// `trailing_active` are one-way latches for the lifetime of the wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagedPosition {
    pub position: Position,
    pub params: ExitParams,

    pub initial_quantity: Decimal,
    pub remaining_quantity: Decimal,
    pub first_target_hit: bool,
    pub trailing_active: bool,
    pub current_trail_stop: Option<Decimal>,
    pub highest_price: Decimal,

    pub first_target_price: Decimal,
    pub original_stop: Decimal,
    pub breakeven_stop: Decimal,

    pub partial_exits: Vec<PartialExit>,
    pub created_at: DateTime<Utc>,
}

impl ManagedPosition {
    pub fn new(position: Position, params: ExitParams) -> Self {
        let entry = position.entry_price;
        let original_stop = position.stop_loss.unwrap_or(Decimal::ZERO);
        let risk = entry - original_stop;

        let first_target_price = if original_stop > Decimal::ZERO && risk > Decimal::ZERO {
            entry + risk * Decimal::try_from(params.first_target_rr).unwrap_or(Decimal::ONE)
        } else {
            // No usable stop: the partial-target leg never triggers.
            Decimal::ZERO
        };
        // Tiny profit margin above entry to cover fees.
        let breakeven_stop = entry * Decimal::new(1001, 3);

        Self {
            initial_quantity: position.quantity,
            remaining_quantity: position.quantity,
            highest_price: entry,
            first_target_hit: false,
            trailing_active: false,
            current_trail_stop: None,
            first_target_price,
            original_stop,
            breakeven_stop,
            partial_exits: Vec::new(),
            created_at: Utc::now(),
            params,
            position,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.position.symbol
    }

    /// Record a new price observation: tracks the high-water mark.
    pub fn observe(&mut self, price: Decimal) {
        self.position.current_price = price;
        if price > self.highest_price {
            self.highest_price = price;
        }
    }

    /// Achieved risk:reward at the given price, based on the original risk.
    pub fn current_rr(&self, price: Decimal) -> f64 {
        let entry = self.position.entry_price.to_f64().unwrap_or(0.0);
        let stop = self.original_stop.to_f64().unwrap_or(0.0);
        let risk = entry - stop;
        if risk <= 0.0 || stop <= 0.0 {
            return 0.0;
        }
        (price.to_f64().unwrap_or(0.0) - entry) / risk
    }

    /// Quantity sold at the first target: a share of the *initial* quantity,
    /// rounded for the instrument class.
    pub fn partial_quantity(&self) -> Decimal {
        round_quantity(
            self.position.market_type,
            self.initial_quantity * self.params.partial_pct,
        )
    }

    /// Pure exit decision at the given price.
    pub fn next_action(&self, price: Decimal) -> ExitAction {
        if !self.first_target_hit {
            if self.original_stop > Decimal::ZERO && price <= self.original_stop {
                return ExitAction::StopLoss;
            }
            if self.first_target_price > self.position.entry_price
                && price >= self.first_target_price
            {
                return ExitAction::PartialTarget;
            }
            return ExitAction::Hold;
        }

        if !self.trailing_active {
            if price <= self.breakeven_stop {
                return ExitAction::BreakevenStop;
            }
            if self.current_rr(price) >= self.params.trailing_start_rr {
                return ExitAction::StartTrailing;
            }
            return ExitAction::Hold;
        }

        if let Some(trail) = self.current_trail_stop {
            if price <= trail {
                return ExitAction::TrailingStop;
            }
        }
        ExitAction::Hold
    }

    /// Apply a successful partial fill: latch the first target, shrink the
    /// remainder, and promote the stop to breakeven.
    pub fn apply_partial_fill(&mut self, quantity: Decimal, price: Decimal) {
        self.first_target_hit = true;
        self.remaining_quantity = (self.remaining_quantity - quantity).max(Decimal::ZERO);
        self.position.quantity = self.remaining_quantity;
        self.position.stop_loss = Some(self.breakeven_stop);
        self.partial_exits.push(PartialExit {
            quantity,
            price,
            reason: format!("First Target ({}:1 R:R)", self.params.first_target_rr),
            timestamp: Utc::now(),
        });
    }

    /// Activate trailing, seeding the stop below the current price.
    pub fn activate_trailing(&mut self, price: Decimal) {
        self.trailing_active = true;
        self.current_trail_stop = Some(price * (Decimal::ONE - self.params.trailing_pct));
    }

    /// Ratchet the trailing stop up from the high-water mark. Returns the new
    /// stop when it moved; the stop never relaxes.
    pub fn ratchet_trail(&mut self) -> Option<Decimal> {
        if !self.trailing_active {
            return None;
        }
        let candidate = self.highest_price * (Decimal::ONE - self.params.trailing_pct);
        match self.current_trail_stop {
            Some(current) if candidate <= current => None,
            _ => {
                self.current_trail_stop = Some(candidate);
                Some(candidate)
            }
        }
    }

    /// The stop currently protecting the remainder.
    pub fn effective_stop(&self) -> Decimal {
        if self.first_target_hit {
            self.current_trail_stop.unwrap_or(self.breakeven_stop)
        } else {
            self.original_stop
        }
    }

    pub fn status(&self) -> ManagedPositionStatus {
        let current = self.position.current_price;
        ManagedPositionStatus {
            symbol: self.position.symbol.clone(),
            entry: self.position.entry_price,
            current,
            pnl_pct: self.position.pnl_pct(),
            current_rr: self.current_rr(current),
            initial_quantity: self.initial_quantity,
            remaining_quantity: self.remaining_quantity,
            first_target_hit: self.first_target_hit,
            first_target_price: self.first_target_price,
            trailing_active: self.trailing_active,
            trail_stop: self.current_trail_stop,
            highest_price: self.highest_price,
            original_stop: self.original_stop,
            effective_stop: self.effective_stop(),
        }
    }

    /// Closed-trade record for the remainder sold at `exit_price`.
    pub fn into_closed_record(self, exit_price: Decimal, reason: &str) -> ClosedPositionRecord {
        ClosedPositionRecord {
            symbol: self.position.symbol,
            market_type: self.position.market_type,
            side: self.position.side,
            entry_price: self.position.entry_price,
            entry_time: self.position.entry_time,
            strategy: self.position.strategy,
            initial_quantity: self.initial_quantity,
            final_quantity: self.remaining_quantity,
            exit_price,
            original_stop: self.original_stop,
            reason: reason.to_string(),
            partial_exits: self.partial_exits,
            closed_at: Utc::now(),
        }
    }
}

/// Full accounting record handed to the executor when a position closes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosedPositionRecord {
    pub symbol: String,
    pub market_type: MarketType,
    pub side: Side,
    pub entry_price: Decimal,
    pub entry_time: DateTime<Utc>,
    pub strategy: String,
    pub initial_quantity: Decimal,
    /// Remainder sold in the final exit
    pub final_quantity: Decimal,
    pub exit_price: Decimal,
    pub original_stop: Decimal,
    pub reason: String,
    pub partial_exits: Vec<PartialExit>,
    pub closed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn long_position(entry: Decimal, stop: Decimal, quantity: Decimal) -> Position {
        Position {
            symbol: "TEST".to_string(),
            market_type: MarketType::Equity,
            side: Side::Buy,
            quantity,
            entry_price: entry,
            current_price: entry,
            entry_time: Utc::now(),
            stop_loss: Some(stop),
            take_profit: Some(entry + (entry - stop)),
            strategy: "breakout".to_string(),
        }
    }

    fn managed(entry: Decimal, stop: Decimal, quantity: Decimal) -> ManagedPosition {
        ManagedPosition::new(long_position(entry, stop, quantity), ExitParams::default())
    }

    #[test]
    fn plan_targets_are_derived_from_risk() {
        let m = managed(dec!(100), dec!(95), dec!(100));
        assert_eq!(m.first_target_price, dec!(105));
        assert_eq!(m.original_stop, dec!(95));
        assert_eq!(m.breakeven_stop, dec!(100.100));
        assert_eq!(m.initial_quantity, dec!(100));
        assert_eq!(m.remaining_quantity, dec!(100));
    }

    #[test]
    fn partial_quantity_uses_initial_not_remaining() {
        let mut m = managed(dec!(100), dec!(95), dec!(100));
        assert_eq!(m.partial_quantity(), dec!(50));

        // Shrink the remainder; the partial share still references the
        // initial quantity.
        m.remaining_quantity = dec!(30);
        assert_eq!(m.partial_quantity(), dec!(50));
    }

    #[test]
    fn partial_quantity_rounds_per_instrument() {
        let mut pos = long_position(dec!(100), dec!(95), dec!(25));
        let m = ManagedPosition::new(pos.clone(), ExitParams::default());
        assert_eq!(m.partial_quantity(), dec!(12)); // 12.5 truncated

        pos.market_type = MarketType::Crypto;
        let m = ManagedPosition::new(pos, ExitParams::default());
        assert_eq!(m.partial_quantity(), dec!(12.5));
    }

    #[test]
    fn stop_loss_fires_only_before_first_target() {
        let mut m = managed(dec!(100), dec!(95), dec!(100));
        assert_eq!(m.next_action(dec!(97)), ExitAction::Hold);
        assert_eq!(m.next_action(dec!(95)), ExitAction::StopLoss);
        assert_eq!(m.next_action(dec!(94)), ExitAction::StopLoss);

        m.apply_partial_fill(dec!(50), dec!(105));
        // After the first target, the original stop is superseded by the
        // breakeven stop.
        assert_eq!(m.next_action(dec!(95)), ExitAction::BreakevenStop);
    }

    #[test]
    fn first_target_latches_and_promotes_stop() {
        let mut m = managed(dec!(100), dec!(95), dec!(100));
        assert_eq!(m.next_action(dec!(105)), ExitAction::PartialTarget);

        m.apply_partial_fill(m.partial_quantity(), dec!(105));
        assert!(m.first_target_hit);
        assert_eq!(m.remaining_quantity, dec!(50));
        assert_eq!(m.position.stop_loss, Some(dec!(100.100)));
        assert_eq!(m.partial_exits.len(), 1);

        // The latch never resets: another touch of the target is not a
        // partial again.
        assert_eq!(m.next_action(dec!(106)), ExitAction::Hold);
    }

    #[test]
    fn trailing_activates_at_configured_rr() {
        let mut m = managed(dec!(100), dec!(95), dec!(100));
        m.apply_partial_fill(dec!(50), dec!(105));

        // 1.2 R:R, not yet.
        assert_eq!(m.next_action(dec!(106)), ExitAction::Hold);
        // 1.5 R:R, activate.
        assert_eq!(m.next_action(dec!(107.5)), ExitAction::StartTrailing);

        m.activate_trailing(dec!(108.5));
        assert!(m.trailing_active);
        assert_eq!(m.current_trail_stop, Some(dec!(106.330)));
    }

    #[test]
    fn trail_stop_ratchets_up_and_never_relaxes() {
        let mut m = managed(dec!(100), dec!(95), dec!(100));
        m.apply_partial_fill(dec!(50), dec!(105));
        m.observe(dec!(108.5));
        m.activate_trailing(dec!(108.5));

        m.observe(dec!(112));
        assert_eq!(m.ratchet_trail(), Some(dec!(109.76)));

        // Price falls back: the high-water mark and the stop both hold.
        m.observe(dec!(110));
        assert_eq!(m.highest_price, dec!(112));
        assert_eq!(m.ratchet_trail(), None);
        assert_eq!(m.current_trail_stop, Some(dec!(109.76)));

        assert_eq!(m.next_action(dec!(109.7)), ExitAction::TrailingStop);
        assert_eq!(m.next_action(dec!(109.77)), ExitAction::Hold);
    }

    #[test]
    fn no_usable_stop_disables_the_partial_leg() {
        let mut pos = long_position(dec!(100), dec!(95), dec!(100));
        pos.stop_loss = None;
        let m = ManagedPosition::new(pos, ExitParams::default());
        assert_eq!(m.next_action(dec!(1)), ExitAction::Hold);
        assert_eq!(m.next_action(dec!(1000)), ExitAction::Hold);
    }

    #[test]
    fn closed_record_carries_partial_trail() {
        let mut m = managed(dec!(100), dec!(95), dec!(100));
        m.apply_partial_fill(dec!(50), dec!(105));
        let record = m.into_closed_record(dec!(100.05), "Breakeven Stop Hit");

        assert_eq!(record.final_quantity, dec!(50));
        assert_eq!(record.initial_quantity, dec!(100));
        assert_eq!(record.partial_exits.len(), 1);
        assert_eq!(record.partial_exits[0].price, dec!(105));
        assert_eq!(record.reason, "Breakeven Stop Hit");
    }
}
