use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use tokio::sync::{watch, RwLock};
use tracing::{debug, error, info, warn};

use super::pipeline::{SignalPipeline, SignalStage};
use super::risk::{RiskEvent, RiskGate};
use super::state::{SystemStatus, TradingCounts};
use crate::agent::{Agent, AgentContext, AgentMetrics, AgentSnapshot, AgentState};
use crate::bus::{ControlCommand, Envelope, MailboxHandle, Payload, Target};
use crate::config::AppConfig;
use crate::domain::{Position, Prediction, RankedOpportunity, Signal, TradeFill};
use crate::error::Result;
use crate::learning::OutcomeRecorder;
use crate::notify::{notify_best_effort, Notifier};

/// Routing name of the coordinator.
pub const COORDINATOR_NAME: &str = "coordinator";

/// Which registered agent plays which pipeline role.
#[derive(Debug, Clone, Default)]
pub struct PipelineRoles {
    pub analyzer: Option<String>,
    pub predictor: Option<String>,
    pub ranker: Option<String>,
    pub executor: Option<String>,
}

/// Read-only view of a hosted agent, captured at wiring time.
#[derive(Clone)]
pub struct RegisteredAgent {
    pub name: String,
    pub metrics: Arc<AgentMetrics>,
    pub state: Arc<RwLock<AgentState>>,
    pub mailbox: MailboxHandle,
}

impl RegisteredAgent {
    async fn snapshot(&self) -> AgentSnapshot {
        AgentSnapshot {
            name: self.name.clone(),
            state: *self.state.read().await,
            messages_sent: self.metrics.messages_sent(),
            messages_received: self.metrics.messages_received(),
            errors: self.metrics.errors(),
            last_active: self.metrics.last_active(),
            mailbox_dropped: self.mailbox.dropped(),
        }
    }
}

/// Master coordinator: routes the signal pipeline, evaluates executions
/// against risk limits, and fans closed-trade outcomes out to the learning
/// collaborators.
pub struct Coordinator {
    execution_threshold: f64,
    max_daily_loss: Decimal,

    roles: PipelineRoles,
    registry: HashMap<String, RegisteredAgent>,

    pipeline: SignalPipeline,
    ranked_opportunities: Vec<RankedOpportunity>,
    pending_executions: HashMap<String, RankedOpportunity>,
    executed_trades: Vec<TradeFill>,
    positions: Vec<Position>,

    trading_enabled: bool,
    auto_execute: bool,
    daily_pnl: Decimal,
    gate: RiskGate,

    recorders: Vec<Arc<dyn OutcomeRecorder>>,
    notifier: Arc<dyn Notifier>,
    status_tx: watch::Sender<SystemStatus>,
}

impl Coordinator {
    pub fn new(
        cfg: &AppConfig,
        recorders: Vec<Arc<dyn OutcomeRecorder>>,
        notifier: Arc<dyn Notifier>,
    ) -> (Self, watch::Receiver<SystemStatus>) {
        let (status_tx, status_rx) = watch::channel(SystemStatus::default());
        let coordinator = Self {
            execution_threshold: cfg.pipeline.execution_threshold,
            max_daily_loss: RiskGate::dollar_limit(&cfg.risk),
            roles: PipelineRoles::default(),
            registry: HashMap::new(),
            pipeline: SignalPipeline::new(cfg.pipeline.signal_buffer_size),
            ranked_opportunities: Vec::new(),
            pending_executions: HashMap::new(),
            executed_trades: Vec::new(),
            positions: Vec::new(),
            trading_enabled: true,
            auto_execute: cfg.pipeline.auto_execute,
            daily_pnl: Decimal::ZERO,
            gate: RiskGate::new(&cfg.risk),
            recorders,
            notifier,
            status_tx,
        };
        (coordinator, status_rx)
    }

    /// Record a hosted agent for routing and status reporting.
    pub fn register_agent(&mut self, agent: RegisteredAgent) {
        info!("Registered agent: {}", agent.name);
        self.registry.insert(agent.name.clone(), agent);
    }

    pub fn roles_mut(&mut self) -> &mut PipelineRoles {
        &mut self.roles
    }

    async fn forward_for_analysis(&mut self, signal: Signal, ctx: &AgentContext) {
        let Some(analyzer) = self.roles.analyzer.clone() else {
            debug!("No analyzer registered; {} stays unanalyzed", signal.symbol);
            return;
        };
        self.pipeline
            .set_stage(signal.id, &signal.symbol, SignalStage::Analyzing);
        ctx.send(Target::Agent(analyzer), Payload::AnalyzeSignal(signal))
            .await;
    }

    async fn forward_for_prediction(
        &mut self,
        analyzed: crate::domain::AnalyzedSignal,
        ctx: &AgentContext,
    ) {
        let id = analyzed.signal.id;
        let symbol = analyzed.signal.symbol.clone();
        match self.roles.predictor.clone() {
            Some(predictor) => {
                self.pipeline.set_stage(id, &symbol, SignalStage::Predicting);
                ctx.send(Target::Agent(predictor), Payload::Predict(analyzed))
                    .await;
            }
            None => {
                // Graceful degradation: skip ML and rank on analysis alone.
                self.forward_for_ranking(Prediction::passthrough(analyzed), ctx)
                    .await;
            }
        }
    }

    async fn forward_for_ranking(&mut self, prediction: Prediction, ctx: &AgentContext) {
        let Some(ranker) = self.roles.ranker.clone() else {
            debug!(
                "No ranker registered; dropping {}",
                prediction.analyzed.signal.symbol
            );
            return;
        };
        let id = prediction.analyzed.signal.id;
        let symbol = prediction.analyzed.signal.symbol.clone();
        self.pipeline.set_stage(id, &symbol, SignalStage::Ranking);
        ctx.send(Target::Agent(ranker), Payload::RankOpportunity(prediction))
            .await;
    }

    async fn execute_trade(&mut self, signal: Signal, ctx: &AgentContext) {
        let Some(executor) = self.roles.executor.clone() else {
            error!("No executor registered; cannot execute {}", signal.symbol);
            return;
        };
        ctx.send(Target::Agent(executor), Payload::ExecuteTrade(signal))
            .await;
    }

    /// Periodic execution evaluation: the top-ranked opportunity only.
    async fn evaluate_executions(&mut self, ctx: &AgentContext) {
        let Some(top) = self.ranked_opportunities.first().cloned() else {
            return;
        };

        // Skip symbols already held.
        if self.positions.iter().any(|p| p.symbol == top.symbol) {
            return;
        }

        if top.composite_score < self.execution_threshold {
            return;
        }

        if self.daily_pnl < -self.max_daily_loss {
            warn!("Daily loss limit reached - trading paused");
            self.trading_enabled = false;
            return;
        }

        if self.auto_execute {
            self.execute_trade(top.signal, ctx).await;
        } else if !self.pending_executions.contains_key(&top.symbol) {
            info!(
                "Opportunity queued for review: {} (score: {:.2})",
                top.symbol, top.composite_score
            );
            notify_best_effort(
                self.notifier.as_ref(),
                &format!(
                    "Opportunity pending approval: {} (score {:.2}, R:R {:.1})",
                    top.symbol, top.composite_score, top.risk_reward
                ),
            )
            .await;
            self.pending_executions.insert(top.symbol.clone(), top);
        }
    }

    /// Per-cycle risk limits over the mirrored position book.
    async fn check_risk_limits(&mut self) {
        if let Some(RiskEvent::DailyLossBreached { total_pnl_pct }) =
            self.gate.evaluate_positions(&self.positions)
        {
            warn!(
                "Max daily loss reached ({:.2}% across positions) - disabling trading",
                total_pnl_pct
            );
            self.trading_enabled = false;
            notify_best_effort(
                self.notifier.as_ref(),
                &format!(
                    "Trading disabled: cumulative position P&L {total_pnl_pct:.2}% breached the daily loss limit"
                ),
            )
            .await;
        }
    }

    /// Unconditional fan-out of a closed trade to every learning
    /// collaborator; one failure never starves the rest.
    async fn fan_out_outcome(&self, outcome: &crate::domain::TradeOutcome) {
        for recorder in &self.recorders {
            if let Err(e) = recorder.record(outcome).await {
                warn!("Learner {} failed to record outcome: {}", recorder.name(), e);
            }
        }
    }

    async fn handle_control(&mut self, command: ControlCommand, ctx: &AgentContext) {
        match command {
            ControlCommand::ApproveTrade { symbol } => {
                match self.pending_executions.remove(&symbol) {
                    Some(opportunity) => {
                        info!("Trade approved: {}", symbol);
                        self.execute_trade(opportunity.signal, ctx).await;
                    }
                    None => warn!("No pending execution to approve for {}", symbol),
                }
            }
            ControlCommand::RejectTrade { symbol } => {
                if self.pending_executions.remove(&symbol).is_some() {
                    info!("Trade rejected: {}", symbol);
                }
            }
            ControlCommand::SetAutoExecute { enabled } => {
                self.auto_execute = enabled;
                info!(
                    "Auto-execute {}",
                    if enabled { "enabled" } else { "disabled" }
                );
            }
            ControlCommand::EnableTrading => {
                self.trading_enabled = true;
                self.gate.reset();
                info!("Trading enabled");
            }
            ControlCommand::DisableTrading => {
                self.trading_enabled = false;
                info!("Trading disabled");
            }
        }
    }

    async fn publish_status(&self) {
        let mut agents = Vec::with_capacity(self.registry.len());
        for agent in self.registry.values() {
            agents.push(agent.snapshot().await);
        }
        agents.sort_by(|a, b| a.name.cmp(&b.name));

        let status = SystemStatus {
            trading_enabled: self.trading_enabled,
            auto_execute: self.auto_execute,
            daily_pnl: self.daily_pnl,
            agents,
            signals: self.pipeline.counts(),
            trading: TradingCounts {
                positions: self.positions.len(),
                pending_executions: self.pending_executions.len(),
                executed_today: self.executed_trades.len(),
            },
            pending_symbols: self.pending_executions.keys().cloned().collect(),
            updated_at: Utc::now(),
        };
        let _ = self.status_tx.send(status);
    }
}

#[async_trait]
impl Agent for Coordinator {
    fn name(&self) -> &str {
        COORDINATOR_NAME
    }

    async fn handle_message(&mut self, envelope: Envelope, ctx: &AgentContext) -> Result<()> {
        debug!(
            "Coordinator received {} from {}",
            envelope.payload.kind(),
            envelope.source
        );

        match envelope.payload {
            Payload::NewSignal(signal) => {
                self.pipeline.record_raw(signal.clone());
                self.forward_for_analysis(signal, ctx).await;
            }
            Payload::SignalAnalyzed(analyzed) => {
                if !analyzed.validated {
                    // Failed validation: dropped silently, stage retired.
                    self.pipeline.complete(analyzed.signal.id);
                    debug!("Signal {} failed validation", analyzed.signal.symbol);
                    return Ok(());
                }
                self.pipeline.record_analyzed(analyzed.clone());
                self.forward_for_prediction(analyzed, ctx).await;
            }
            Payload::MlPrediction(prediction) => {
                self.forward_for_ranking(prediction, ctx).await;
            }
            Payload::OpportunityRankings(rankings) => {
                for opportunity in &rankings.rankings {
                    self.pipeline.complete(opportunity.signal.id);
                }
                self.ranked_opportunities = rankings.rankings;
                info!(
                    "Received {} ranked opportunities",
                    self.ranked_opportunities.len()
                );
            }
            Payload::TradeExecuted(fill) => {
                info!("Trade executed: {} - {}", fill.symbol, fill.side);
                self.executed_trades.push(fill);
            }
            Payload::TradeClosed(outcome) => {
                self.daily_pnl += outcome.pnl;
                self.fan_out_outcome(&outcome).await;
                info!("Trade recorded for learning: {}", outcome.symbol);
            }
            Payload::PositionsUpdate { positions } => {
                self.positions = positions;
            }
            Payload::OrderRejected { symbol, reason } => {
                warn!("Order rejected: {} - {}", symbol, reason);
            }
            Payload::Control(command) => {
                self.handle_control(command, ctx).await;
            }
            other => {
                debug!("Coordinator ignoring {}", other.kind());
            }
        }
        Ok(())
    }

    async fn process(&mut self, ctx: &AgentContext) -> Result<()> {
        self.pipeline.prune_stale(Duration::minutes(10));

        if self.trading_enabled && !self.ranked_opportunities.is_empty() {
            self.evaluate_executions(ctx).await;
        }

        self.check_risk_limits().await;
        self.publish_status().await;
        Ok(())
    }
}
