//! Trade execution agent.
//!
//! Owns the position book: turns approved signals into orders, hands filled
//! positions to the monitor, absorbs the monitor's exit events, and keeps the
//! book checkpointed so it survives a restart.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::agent::{Agent, AgentContext};
use crate::broker::Broker;
use crate::bus::{Envelope, Payload, Target};
use crate::config::{ExecutorConfig, MonitorConfig, RiskConfig};
use crate::domain::{
    round_quantity, MarketType, OrderStatus, OrderType, Position, Side, Signal, TradeFill,
    TradeOutcome,
};
use crate::error::Result;
use crate::monitor::{ClosedPositionRecord, ExitEvent, ExitParams, MonitorHandle};
use crate::notify::{notify_best_effort, Notifier};
use crate::persistence::{ExecutorState, StateStore};

/// Routing name of the executor agent.
pub const EXECUTOR_NAME: &str = "executor";

pub struct TradeExecutor {
    risk: RiskConfig,
    cfg: ExecutorConfig,
    default_exit_params: ExitParams,
    broker: Arc<dyn Broker>,
    notifier: Arc<dyn Notifier>,
    monitor: MonitorHandle,
    exits_rx: mpsc::Receiver<ExitEvent>,
    store: StateStore,

    pending_orders: VecDeque<Signal>,
    positions: Vec<Position>,
    active_trades: Vec<TradeFill>,
    closed_trades: Vec<TradeOutcome>,
    day_trades_today: u32,
    connected: bool,
}

impl TradeExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        risk: RiskConfig,
        cfg: ExecutorConfig,
        monitor_cfg: &MonitorConfig,
        broker: Arc<dyn Broker>,
        notifier: Arc<dyn Notifier>,
        monitor: MonitorHandle,
        exits_rx: mpsc::Receiver<ExitEvent>,
    ) -> Self {
        let store = StateStore::new(&cfg.state_dir);
        Self {
            risk,
            cfg,
            default_exit_params: ExitParams::from(monitor_cfg),
            broker,
            notifier,
            monitor,
            exits_rx,
            store,
            pending_orders: VecDeque::new(),
            positions: Vec::new(),
            active_trades: Vec::new(),
            closed_trades: Vec::new(),
            day_trades_today: 0,
            connected: false,
        }
    }

    fn persist(&self) {
        let state = ExecutorState {
            positions: self.positions.clone(),
            active_trades: self.active_trades.clone(),
            closed_trades: self.closed_trades.clone(),
            day_trades_today: self.day_trades_today,
            saved_at: None,
        };
        if let Err(e) = self.store.save(&state) {
            warn!("Failed to checkpoint executor state: {}", e);
        }
    }

    async fn send_positions_update(&self, ctx: &AgentContext) {
        ctx.send(
            Target::Coordinator,
            Payload::PositionsUpdate {
                positions: self.positions.clone(),
            },
        )
        .await;
    }

    /// Pre-trade checks. Emits `order_rejected` on a PDT violation; cap and
    /// duplicate violations are dropped with a recorded reason only.
    async fn validate_order(&mut self, order: &Signal, ctx: &AgentContext) -> bool {
        if self.positions.len() >= self.risk.max_positions {
            warn!(
                "Max positions ({}) reached, dropping {}",
                self.risk.max_positions, order.symbol
            );
            return false;
        }

        if self.positions.iter().any(|p| p.symbol == order.symbol) {
            warn!("Already have position in {}", order.symbol);
            return false;
        }

        if order.market_type == MarketType::Equity
            && self.risk.pdt_restricted
            && self.day_trades_today >= self.risk.pdt_day_trade_limit
        {
            warn!("PDT limit reached - order rejected: {}", order.symbol);
            ctx.send_with_priority(
                Target::Coordinator,
                Payload::OrderRejected {
                    symbol: order.symbol.clone(),
                    reason: "PDT limit".to_string(),
                },
                2,
            )
            .await;
            return false;
        }

        true
    }

    /// Risk-based sizing: a fixed fraction of capital at the entry price,
    /// rounded for the instrument class.
    fn position_size(&self, order: &Signal) -> Decimal {
        if order.entry_price <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let budget = self.risk.starting_capital * self.risk.max_position_pct;
        round_quantity(order.market_type, budget / order.entry_price)
    }

    fn resolve_side(order: &Signal) -> Side {
        match order.signal_type.as_str() {
            "sell" | "short" | "short_put" | "short_call" => Side::Sell,
            _ => Side::Buy,
        }
    }

    async fn execute_order(&mut self, order: Signal, ctx: &AgentContext) {
        let side = Self::resolve_side(&order);
        let quantity = self.position_size(&order);
        if quantity <= Decimal::ZERO {
            warn!("Invalid position size for {}", order.symbol);
            return;
        }

        info!(
            "Executing: {} {} {} @ ~{}",
            side, quantity, order.symbol, order.entry_price
        );

        let fill = if self.connected {
            match self
                .broker
                .place_order(
                    &order.symbol,
                    order.market_type,
                    side,
                    quantity,
                    OrderType::Market,
                )
                .await
            {
                Ok(fill) => fill,
                Err(e) => {
                    // Transient failure: drop this attempt, the coordinator
                    // will surface the opportunity again if it still ranks.
                    error!("Order execution failed for {}: {}", order.symbol, e);
                    return;
                }
            }
        } else {
            // Simulation mode: fill at the requested entry price.
            TradeFill {
                trade_id: format!("SIM-{}", Uuid::new_v4().simple()),
                symbol: order.symbol.clone(),
                side,
                quantity,
                fill_price: order.entry_price,
                status: OrderStatus::Filled,
                timestamp: Utc::now(),
                simulated: true,
            }
        };

        let position = Position {
            symbol: order.symbol.clone(),
            market_type: order.market_type,
            side,
            quantity: fill.quantity,
            entry_price: fill.fill_price,
            current_price: fill.fill_price,
            entry_time: fill.timestamp,
            stop_loss: Some(order.stop_loss),
            take_profit: Some(order.target_price),
            strategy: order.signal_type.clone(),
        };

        if order.market_type == MarketType::Equity {
            self.day_trades_today += 1;
        }

        self.positions.push(position.clone());
        self.active_trades.push(fill.clone());
        self.persist();

        notify_best_effort(
            self.notifier.as_ref(),
            &format!(
                "ENTRY: {} {} {} @ {} | stop {} | target {}",
                side, fill.quantity, fill.symbol, fill.fill_price, order.stop_loss,
                order.target_price
            ),
        )
        .await;

        ctx.send(Target::Coordinator, Payload::TradeExecuted(fill)).await;
        self.send_positions_update(ctx).await;

        // The exit plan only manages long positions; shorts keep their
        // broker-side stop.
        if side == Side::Buy {
            self.monitor
                .watch(position, Some(self.default_exit_params.clone()))
                .await;
        } else {
            debug!("Short position {} not handed to exit monitor", order.symbol);
        }
    }

    async fn apply_exit_event(&mut self, event: ExitEvent, ctx: &AgentContext) {
        match event {
            ExitEvent::Partial {
                symbol,
                quantity,
                price,
                remaining,
                new_stop,
            } => {
                info!(
                    "Partial exit applied: {} sold {} @ {} ({} remaining)",
                    symbol, quantity, price, remaining
                );
                if let Some(position) = self.positions.iter_mut().find(|p| p.symbol == symbol) {
                    position.quantity = remaining;
                    position.current_price = price;
                    position.stop_loss = Some(new_stop);
                }
                self.persist();
                self.send_positions_update(ctx).await;
            }
            ExitEvent::Closed(record) => {
                let outcome = outcome_from_record(&record);
                info!(
                    "Trade closed: {} | {} | P&L {} ({:.2}%)",
                    outcome.symbol, outcome.exit_reason, outcome.pnl, outcome.pnl_pct
                );
                self.positions.retain(|p| p.symbol != record.symbol);
                self.active_trades.retain(|t| t.symbol != record.symbol);
                self.closed_trades.push(outcome.clone());
                let overflow = self.closed_trades.len().saturating_sub(self.cfg.closed_trade_history);
                if overflow > 0 {
                    self.closed_trades.drain(..overflow);
                }
                self.persist();
                ctx.send(Target::Coordinator, Payload::TradeClosed(outcome)).await;
                self.send_positions_update(ctx).await;
            }
        }
    }

    /// Manual close request: sell the remainder at market and account for it.
    async fn close_position(&mut self, symbol: &str, ctx: &AgentContext) {
        let Some(position) = self.positions.iter().find(|p| p.symbol == symbol).cloned() else {
            warn!("No open position to close: {}", symbol);
            return;
        };

        self.monitor.unwatch(symbol).await;

        let exit_side = match position.side {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        };
        let fill = if self.connected {
            match self
                .broker
                .place_order(
                    symbol,
                    position.market_type,
                    exit_side,
                    position.quantity,
                    OrderType::Market,
                )
                .await
            {
                Ok(fill) => fill,
                Err(e) => {
                    error!("Manual close failed for {}: {}", symbol, e);
                    return;
                }
            }
        } else {
            TradeFill {
                trade_id: format!("SIM-{}", Uuid::new_v4().simple()),
                symbol: symbol.to_string(),
                side: exit_side,
                quantity: position.quantity,
                fill_price: position.current_price,
                status: OrderStatus::Filled,
                timestamp: Utc::now(),
                simulated: true,
            }
        };

        let record = ClosedPositionRecord {
            symbol: position.symbol.clone(),
            market_type: position.market_type,
            side: position.side,
            entry_price: position.entry_price,
            entry_time: position.entry_time,
            strategy: position.strategy.clone(),
            initial_quantity: position.quantity,
            final_quantity: position.quantity,
            exit_price: fill.fill_price,
            original_stop: position.stop_loss.unwrap_or(Decimal::ZERO),
            reason: "Manual Close".to_string(),
            partial_exits: Vec::new(),
            closed_at: Utc::now(),
        };
        self.apply_exit_event(ExitEvent::Closed(record), ctx).await;
    }
}

#[async_trait]
impl Agent for TradeExecutor {
    fn name(&self) -> &str {
        EXECUTOR_NAME
    }

    async fn on_start(&mut self, ctx: &AgentContext) -> Result<()> {
        self.connected = self.broker.connect().await.unwrap_or(false);
        if self.connected {
            info!("TradeExecutor connected to broker");
        } else {
            warn!("TradeExecutor running in simulation mode (broker not connected)");
        }

        // Restore the book from the last checkpoint and resume monitoring.
        if let Some(state) = self.store.load()? {
            self.positions = state.positions;
            self.active_trades = state.active_trades;
            self.closed_trades = state.closed_trades;
            self.day_trades_today = state.day_trades_today;
            for position in self.positions.iter().filter(|p| p.side == Side::Buy) {
                self.monitor
                    .watch(position.clone(), Some(self.default_exit_params.clone()))
                    .await;
            }
        }
        self.send_positions_update(ctx).await;
        Ok(())
    }

    async fn handle_message(&mut self, envelope: Envelope, ctx: &AgentContext) -> Result<()> {
        match envelope.payload {
            Payload::ExecuteTrade(signal) => {
                info!("Order queued: {}", signal.symbol);
                self.pending_orders.push_back(signal);
            }
            Payload::ClosePosition { symbol } => {
                self.close_position(&symbol, ctx).await;
            }
            Payload::GetPositions | Payload::SyncPositions => {
                self.send_positions_update(ctx).await;
            }
            other => {
                debug!("TradeExecutor ignoring {}", other.kind());
            }
        }
        Ok(())
    }

    async fn process(&mut self, ctx: &AgentContext) -> Result<()> {
        // Apply exit fills reported by the monitor first, so the book is
        // current before new orders are validated against it.
        while let Ok(event) = self.exits_rx.try_recv() {
            self.apply_exit_event(event, ctx).await;
        }

        while let Some(order) = self.pending_orders.pop_front() {
            if self.validate_order(&order, ctx).await {
                self.execute_order(order, ctx).await;
            }
        }
        Ok(())
    }

    async fn on_stop(&mut self, _ctx: &AgentContext) -> Result<()> {
        if self.connected {
            self.broker.disconnect().await?;
        }
        self.persist();
        Ok(())
    }
}

/// Closed-trade accounting: signed P&L across partial and final exits,
/// quantity-weighted exit price, realized R:R, and hold time.
pub fn outcome_from_record(record: &ClosedPositionRecord) -> TradeOutcome {
    let entry = record.entry_price;
    let direction = match record.side {
        Side::Buy => Decimal::ONE,
        Side::Sell => -Decimal::ONE,
    };

    let mut pnl = Decimal::ZERO;
    let mut exited_quantity = Decimal::ZERO;
    let mut weighted_exit = Decimal::ZERO;
    for partial in &record.partial_exits {
        pnl += (partial.price - entry) * direction * partial.quantity;
        weighted_exit += partial.price * partial.quantity;
        exited_quantity += partial.quantity;
    }
    pnl += (record.exit_price - entry) * direction * record.final_quantity;
    weighted_exit += record.exit_price * record.final_quantity;
    exited_quantity += record.final_quantity;

    let avg_exit = if exited_quantity > Decimal::ZERO {
        weighted_exit / exited_quantity
    } else {
        record.exit_price
    };

    let entry_f = entry.to_f64().unwrap_or(0.0);
    let avg_exit_f = avg_exit.to_f64().unwrap_or(0.0);
    let pnl_pct = if entry_f > 0.0 {
        (avg_exit_f / entry_f - 1.0) * 100.0 * direction.to_f64().unwrap_or(1.0)
    } else {
        0.0
    };

    let risk = (entry - record.original_stop).to_f64().unwrap_or(0.0);
    let risk_reward_achieved = if risk > 0.0 && record.original_stop > Decimal::ZERO {
        (avg_exit_f - entry_f) / risk * direction.to_f64().unwrap_or(1.0)
    } else {
        0.0
    };

    let hold_time_hours =
        (record.closed_at - record.entry_time).num_seconds().max(0) as f64 / 3600.0;

    TradeOutcome {
        symbol: record.symbol.clone(),
        market_type: record.market_type,
        side: record.side,
        quantity: exited_quantity,
        entry_price: entry,
        exit_price: avg_exit,
        pnl,
        pnl_pct,
        risk_reward_achieved,
        hold_time_hours,
        strategy: record.strategy.clone(),
        exit_reason: record.reason.clone(),
        timestamp: record.closed_at,
    }
}
