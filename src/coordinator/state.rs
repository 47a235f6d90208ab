use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::pipeline::PipelineCounts;
use crate::agent::AgentSnapshot;
use crate::bus::{ControlCommand, Envelope, Payload, Router, Target};

/// Trading-side counters exposed in status snapshots.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TradingCounts {
    pub positions: usize,
    pub pending_executions: usize,
    pub executed_today: usize,
}

/// Point-in-time view of the whole system, refreshed every coordinator cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemStatus {
    pub trading_enabled: bool,
    pub auto_execute: bool,
    pub daily_pnl: Decimal,
    pub agents: Vec<AgentSnapshot>,
    pub signals: PipelineCounts,
    pub trading: TradingCounts,
    pub pending_symbols: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl Default for SystemStatus {
    fn default() -> Self {
        Self {
            trading_enabled: true,
            auto_execute: false,
            daily_pnl: Decimal::ZERO,
            agents: Vec::new(),
            signals: PipelineCounts::default(),
            trading: TradingCounts::default(),
            pending_symbols: Vec::new(),
            updated_at: Utc::now(),
        }
    }
}

/// Operator handle: control operations travel as messages through the
/// coordinator's own mailbox (keeping its state single-writer); reads come
/// from the published status snapshot.
#[derive(Clone)]
pub struct CoordinatorHandle {
    router: Router,
    status_rx: watch::Receiver<SystemStatus>,
}

impl CoordinatorHandle {
    pub fn new(router: Router, status_rx: watch::Receiver<SystemStatus>) -> Self {
        Self { router, status_rx }
    }

    pub fn status(&self) -> SystemStatus {
        self.status_rx.borrow().clone()
    }

    /// Symbols queued for manual review.
    pub fn pending_trades(&self) -> Vec<String> {
        self.status_rx.borrow().pending_symbols.clone()
    }

    async fn control(&self, command: ControlCommand) {
        self.router
            .route(Envelope::new(
                "operator",
                Target::Coordinator,
                Payload::Control(command),
            ))
            .await;
    }

    /// Approve a pending opportunity for execution.
    pub async fn approve_trade(&self, symbol: &str) {
        self.control(ControlCommand::ApproveTrade {
            symbol: symbol.to_string(),
        })
        .await;
    }

    /// Discard a pending opportunity.
    pub async fn reject_trade(&self, symbol: &str) {
        self.control(ControlCommand::RejectTrade {
            symbol: symbol.to_string(),
        })
        .await;
    }

    pub async fn set_auto_execute(&self, enabled: bool) {
        self.control(ControlCommand::SetAutoExecute { enabled }).await;
    }

    pub async fn enable_trading(&self) {
        self.control(ControlCommand::EnableTrading).await;
    }

    pub async fn disable_trading(&self) {
        self.control(ControlCommand::DisableTrading).await;
    }
}
