use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{AnalyzedSignal, Position, Prediction, Rankings, Signal, TradeFill, TradeOutcome};

/// Default message priority (1 = highest, 10 = lowest).
///
/// Priority is informational metadata for downstream consumers; delivery is
/// FIFO per mailbox and never reordered by it.
pub const DEFAULT_PRIORITY: u8 = 5;

/// Delivery target of an envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    /// A named agent's mailbox
    Agent(String),
    /// The coordinator's own mailbox
    Coordinator,
    /// Every registered agent's mailbox
    All,
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Target::Agent(name) => write!(f, "{name}"),
            Target::Coordinator => write!(f, "coordinator"),
            Target::All => write!(f, "all"),
        }
    }
}

/// Operator commands delivered through the coordinator's mailbox
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ControlCommand {
    /// Approve a pending opportunity for execution
    ApproveTrade { symbol: String },
    /// Discard a pending opportunity
    RejectTrade { symbol: String },
    SetAutoExecute { enabled: bool },
    EnableTrading,
    DisableTrading,
}

/// Typed message payload; one variant per message kind
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    // Signal pipeline
    NewSignal(Signal),
    AnalyzeSignal(Signal),
    SignalAnalyzed(AnalyzedSignal),
    Predict(AnalyzedSignal),
    MlPrediction(Prediction),
    RankOpportunity(Prediction),
    OpportunityRankings(Rankings),

    // Execution
    ExecuteTrade(Signal),
    TradeExecuted(TradeFill),
    TradeClosed(TradeOutcome),
    PositionsUpdate { positions: Vec<Position> },
    OrderRejected { symbol: String, reason: String },
    ClosePosition { symbol: String },
    GetPositions,
    SyncPositions,

    // Operator control
    Control(ControlCommand),
}

impl Payload {
    /// Wire name of the message kind, used for routing logs
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::NewSignal(_) => "new_signal",
            Payload::AnalyzeSignal(_) => "analyze_signal",
            Payload::SignalAnalyzed(_) => "signal_analyzed",
            Payload::Predict(_) => "predict",
            Payload::MlPrediction(_) => "ml_prediction",
            Payload::RankOpportunity(_) => "rank_opportunity",
            Payload::OpportunityRankings(_) => "opportunity_rankings",
            Payload::ExecuteTrade(_) => "execute_trade",
            Payload::TradeExecuted(_) => "trade_executed",
            Payload::TradeClosed(_) => "trade_closed",
            Payload::PositionsUpdate { .. } => "positions_update",
            Payload::OrderRejected { .. } => "order_rejected",
            Payload::ClosePosition { .. } => "close_position",
            Payload::GetPositions => "get_positions",
            Payload::SyncPositions => "sync_positions",
            Payload::Control(_) => "control",
        }
    }
}

/// Immutable message envelope passed between agents
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub source: String,
    pub target: Target,
    pub payload: Payload,
    pub timestamp: DateTime<Utc>,
    pub priority: u8,
}

impl Envelope {
    pub fn new(source: impl Into<String>, target: Target, payload: Payload) -> Self {
        Self {
            source: source.into(),
            target,
            payload,
            timestamp: Utc::now(),
            priority: DEFAULT_PRIORITY,
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.clamp(1, 10);
        self
    }
}
