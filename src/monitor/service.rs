use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use super::position::{
    ClosedPositionRecord, ExitAction, ExitParams, ManagedPosition, ManagedPositionStatus,
};
use crate::broker::{Broker, PriceFeed};
use crate::config::MonitorConfig;
use crate::domain::{OrderType, Position, Side};
use crate::notify::{notify_best_effort, Notifier};

/// Commands accepted by the monitor task.
#[derive(Debug)]
pub enum MonitorCommand {
    /// Start managing a position; `params` falls back to the configured
    /// defaults.
    Watch {
        position: Position,
        params: Option<ExitParams>,
    },
    /// Stop managing a symbol without trading.
    Unwatch { symbol: String },
}

/// Exit fills reported to the executor, which owns trade accounting.
#[derive(Debug)]
pub enum ExitEvent {
    Partial {
        symbol: String,
        quantity: Decimal,
        price: Decimal,
        remaining: Decimal,
        new_stop: Decimal,
    },
    Closed(ClosedPositionRecord),
}

/// Handle for watching/unwatching positions and reading status snapshots.
#[derive(Clone)]
pub struct MonitorHandle {
    cmd_tx: mpsc::Sender<MonitorCommand>,
    status_rx: watch::Receiver<Vec<ManagedPositionStatus>>,
}

impl MonitorHandle {
    pub async fn watch(&self, position: Position, params: Option<ExitParams>) {
        if self
            .cmd_tx
            .send(MonitorCommand::Watch { position, params })
            .await
            .is_err()
        {
            warn!("Position monitor is gone; watch request dropped");
        }
    }

    pub async fn unwatch(&self, symbol: &str) {
        if self
            .cmd_tx
            .send(MonitorCommand::Unwatch {
                symbol: symbol.to_string(),
            })
            .await
            .is_err()
        {
            warn!("Position monitor is gone; unwatch request dropped");
        }
    }

    /// Latest per-position status, refreshed after every poll cycle.
    pub fn status(&self) -> Vec<ManagedPositionStatus> {
        self.status_rx.borrow().clone()
    }

    pub fn status_for(&self, symbol: &str) -> Option<ManagedPositionStatus> {
        self.status_rx
            .borrow()
            .iter()
            .find(|s| s.symbol == symbol)
            .cloned()
    }
}

/// Polls every managed position against the latest price and drives the
/// staged exit plan. Owns the managed-position map exclusively; the rest of
/// the system interacts through `MonitorHandle` and `ExitEvent`s.
pub struct PositionMonitor {
    positions: HashMap<String, ManagedPosition>,
    broker: Arc<dyn Broker>,
    feed: Arc<dyn PriceFeed>,
    notifier: Arc<dyn Notifier>,
    default_params: ExitParams,
    check_interval: Duration,
    cmd_rx: mpsc::Receiver<MonitorCommand>,
    cmd_open: bool,
    exits_tx: mpsc::Sender<ExitEvent>,
    status_tx: watch::Sender<Vec<ManagedPositionStatus>>,
}

impl PositionMonitor {
    /// Build the monitor plus its handle and the exit-event stream consumed
    /// by the executor.
    pub fn new(
        cfg: &MonitorConfig,
        broker: Arc<dyn Broker>,
        feed: Arc<dyn PriceFeed>,
        notifier: Arc<dyn Notifier>,
    ) -> (Self, MonitorHandle, mpsc::Receiver<ExitEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (exits_tx, exits_rx) = mpsc::channel(64);
        let (status_tx, status_rx) = watch::channel(Vec::new());

        let monitor = Self {
            positions: HashMap::new(),
            broker,
            feed,
            notifier,
            default_params: ExitParams::from(cfg),
            check_interval: Duration::from_millis(cfg.check_interval_ms),
            cmd_rx,
            cmd_open: true,
            exits_tx,
            status_tx,
        };
        (monitor, MonitorHandle { cmd_tx, status_rx }, exits_rx)
    }

    /// Run until shutdown. Poll-cycle failures are logged and retried on the
    /// next tick; they never terminate the loop.
    pub async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            "PositionMonitor started (interval {:?})",
            self.check_interval
        );
        let mut tick = tokio::time::interval(self.check_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                cmd = self.cmd_rx.recv(), if self.cmd_open => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd),
                        // Every handle dropped: no further commands can come.
                        None => self.cmd_open = false,
                    }
                }
                _ = tick.tick() => {
                    self.check_all_positions().await;
                    self.publish_status();
                }
            }
        }
        info!("PositionMonitor stopped");
    }

    fn handle_command(&mut self, cmd: MonitorCommand) {
        match cmd {
            MonitorCommand::Watch { position, params } => {
                let params = params.unwrap_or_else(|| self.default_params.clone());
                let managed = ManagedPosition::new(position, params);
                info!(
                    "Position monitored: {} | Entry: {} | Stop: {} | 1st Target: {} (sell {}%) | Then trail {}%",
                    managed.symbol(),
                    managed.position.entry_price,
                    managed.original_stop,
                    managed.first_target_price,
                    managed.params.partial_pct * Decimal::ONE_HUNDRED,
                    managed.params.trailing_pct * Decimal::ONE_HUNDRED,
                );
                self.positions
                    .insert(managed.symbol().to_string(), managed);
            }
            MonitorCommand::Unwatch { symbol } => {
                if self.positions.remove(&symbol).is_some() {
                    info!("Position removed from monitor: {}", symbol);
                }
            }
        }
    }

    async fn check_all_positions(&mut self) {
        let symbols: Vec<String> = self.positions.keys().cloned().collect();
        for symbol in symbols {
            self.check_position(&symbol).await;
        }
    }

    async fn check_position(&mut self, symbol: &str) {
        let price = match self.feed.last_price(symbol).await {
            Ok(price) => price,
            Err(e) => {
                debug!("No price for {}: {} (skipping check)", symbol, e);
                return;
            }
        };

        let broker = self.broker.clone();
        let notifier = self.notifier.clone();
        let exits_tx = self.exits_tx.clone();

        let Some(managed) = self.positions.get_mut(symbol) else {
            return;
        };
        managed.observe(price);
        if let Some(new_trail) = managed.ratchet_trail() {
            debug!("{}: trail stop updated to {}", symbol, new_trail);
        }

        let mut close_reason: Option<&'static str> = None;
        loop {
            match managed.next_action(price) {
                ExitAction::Hold => break,
                ExitAction::StartTrailing => {
                    managed.activate_trailing(price);
                    managed.ratchet_trail();
                    info!(
                        "{}: trailing stop activated at {} ({}% below {})",
                        symbol,
                        managed.effective_stop(),
                        managed.params.trailing_pct * Decimal::ONE_HUNDRED,
                        price
                    );
                    // Re-evaluate: the freshly seeded stop may already be hit
                    // when the high-water mark is above the current price.
                    continue;
                }
                ExitAction::PartialTarget => {
                    let quantity = managed.partial_quantity();
                    if quantity <= Decimal::ZERO {
                        break;
                    }
                    info!(
                        "PARTIAL EXIT: {} | Selling {} of {} @ {} | First target hit",
                        symbol, quantity, managed.remaining_quantity, price
                    );
                    match broker
                        .place_order(
                            symbol,
                            managed.position.market_type,
                            Side::Sell,
                            quantity,
                            OrderType::Market,
                        )
                        .await
                    {
                        Ok(fill) => {
                            managed.apply_partial_fill(quantity, fill.fill_price);
                            info!(
                                "{}: stop moved to breakeven {} | Remaining: {}",
                                symbol, managed.breakeven_stop, managed.remaining_quantity
                            );
                            let event = ExitEvent::Partial {
                                symbol: symbol.to_string(),
                                quantity,
                                price: fill.fill_price,
                                remaining: managed.remaining_quantity,
                                new_stop: managed.breakeven_stop,
                            };
                            if exits_tx.send(event).await.is_err() {
                                warn!("Exit-event channel closed; partial fill unreported");
                            }
                            notify_best_effort(
                                notifier.as_ref(),
                                &format!(
                                    "PARTIAL PROFIT: {} sold {} @ {} | stop -> breakeven {}",
                                    symbol, quantity, fill.fill_price, managed.breakeven_stop
                                ),
                            )
                            .await;
                        }
                        Err(e) => {
                            // No latch flip: retried on the next poll.
                            error!("Partial exit order failed for {}: {}", symbol, e);
                        }
                    }
                    break;
                }
                ExitAction::StopLoss => {
                    close_reason = Some("Stop Loss Hit");
                    break;
                }
                ExitAction::BreakevenStop => {
                    close_reason = Some("Breakeven Stop Hit");
                    break;
                }
                ExitAction::TrailingStop => {
                    close_reason = Some("Trailing Stop Hit");
                    break;
                }
            }
        }

        if let Some(reason) = close_reason {
            self.exit_remaining(symbol, price, reason).await;
        }
    }

    /// Sell the remainder and retire the position. On broker failure the
    /// position stays managed and is retried on the next poll.
    async fn exit_remaining(&mut self, symbol: &str, price: Decimal, reason: &str) {
        let Some(managed) = self.positions.get(symbol) else {
            return;
        };
        let quantity = managed.remaining_quantity;
        if quantity <= Decimal::ZERO {
            self.positions.remove(symbol);
            return;
        }

        info!(
            "EXIT REMAINING: {} | Selling {} @ {} | Reason: {}",
            symbol, quantity, price, reason
        );

        let fill = match self
            .broker
            .place_order(
                symbol,
                managed.position.market_type,
                Side::Sell,
                quantity,
                OrderType::Market,
            )
            .await
        {
            Ok(fill) => fill,
            Err(e) => {
                error!("Exit order failed for {}: {}", symbol, e);
                return;
            }
        };

        // Broker accepted: the position leaves the monitored set now.
        let Some(managed) = self.positions.remove(symbol) else {
            return;
        };
        let record = managed.into_closed_record(fill.fill_price, reason);
        notify_best_effort(
            self.notifier.as_ref(),
            &format!(
                "POSITION CLOSED: {} | Reason: {} | Final exit @ {}",
                symbol, reason, fill.fill_price
            ),
        )
        .await;
        if self.exits_tx.send(ExitEvent::Closed(record)).await.is_err() {
            warn!("Exit-event channel closed; close unreported for {}", symbol);
        }
    }

    fn publish_status(&self) {
        let statuses: Vec<ManagedPositionStatus> =
            self.positions.values().map(ManagedPosition::status).collect();
        let _ = self.status_tx.send(statuses);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{SimBroker, SimPriceFeed};
    use crate::domain::MarketType;
    use crate::notify::LogNotifier;
    use chrono::Utc;
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

    struct Rig {
        monitor: PositionMonitor,
        feed: Arc<SimPriceFeed>,
        broker: Arc<SimBroker>,
        exits_rx: mpsc::Receiver<ExitEvent>,
    }

    fn rig() -> Rig {
        let feed = SimPriceFeed::new();
        let broker = Arc::new(SimBroker::new(feed.clone()));
        let cfg = MonitorConfig::default();
        let (monitor, _handle, exits_rx) = PositionMonitor::new(
            &cfg,
            broker.clone(),
            feed.clone(),
            Arc::new(LogNotifier),
        );
        Rig {
            monitor,
            feed,
            broker,
            exits_rx,
        }
    }

    fn watch(rig: &mut Rig, position: Position) {
        rig.monitor.handle_command(MonitorCommand::Watch {
            position,
            params: None,
        });
    }

    async fn step(rig: &mut Rig, price: Decimal) {
        rig.feed.set_price("TEST", price);
        rig.monitor.check_all_positions().await;
    }

    #[tokio::test]
    async fn broker_failure_does_not_advance_state() {
        let mut rig = rig();
        watch(&mut rig, long_position(dec!(100), dec!(95), dec!(100)));

        rig.broker.set_failing(true);
        step(&mut rig, dec!(106)).await;

        // The partial fill failed: no latch, full quantity still managed.
        let managed = rig.monitor.positions.get("TEST").unwrap();
        assert!(!managed.first_target_hit);
        assert_eq!(managed.remaining_quantity, dec!(100));
        assert!(rig.exits_rx.try_recv().is_err());

        // Next poll succeeds and the partial goes through.
        rig.broker.set_failing(false);
        step(&mut rig, dec!(106)).await;
        let managed = rig.monitor.positions.get("TEST").unwrap();
        assert!(managed.first_target_hit);
        assert_eq!(managed.remaining_quantity, dec!(50));
        assert!(matches!(
            rig.exits_rx.try_recv().unwrap(),
            ExitEvent::Partial { .. }
        ));
    }

    #[tokio::test]
    async fn failed_final_exit_keeps_position_managed() {
        let mut rig = rig();
        watch(&mut rig, long_position(dec!(100), dec!(95), dec!(100)));

        rig.broker.set_failing(true);
        step(&mut rig, dec!(94)).await;
        assert!(rig.monitor.positions.contains_key("TEST"));

        rig.broker.set_failing(false);
        step(&mut rig, dec!(94)).await;
        assert!(!rig.monitor.positions.contains_key("TEST"));
        match rig.exits_rx.try_recv().unwrap() {
            ExitEvent::Closed(record) => {
                assert_eq!(record.reason, "Stop Loss Hit");
                assert_eq!(record.final_quantity, dec!(100));
            }
            other => panic!("expected Closed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn missing_price_skips_the_check() {
        let mut rig = rig();
        watch(&mut rig, long_position(dec!(100), dec!(95), dec!(100)));

        // No price published at all: nothing happens, nothing is lost.
        rig.monitor.check_all_positions().await;
        assert!(rig.monitor.positions.contains_key("TEST"));
        assert!(rig.exits_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unwatch_removes_without_trading() {
        let mut rig = rig();
        watch(&mut rig, long_position(dec!(100), dec!(95), dec!(100)));
        rig.monitor.handle_command(MonitorCommand::Unwatch {
            symbol: "TEST".to_string(),
        });
        assert!(rig.monitor.positions.is_empty());
        assert!(rig.exits_rx.try_recv().is_err());
    }
}
