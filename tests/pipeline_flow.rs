//! End-to-end pipeline flow: scanner → analyzer → ranker → executor →
//! monitor → closed-trade fan-out, through real hosted agents.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

use flotilla::agent::AgentContext;
use flotilla::config::AppConfig;
use flotilla::domain::{
    AnalyzedSignal, MarketType, RankedOpportunity, Rankings, Signal, TradeOutcome,
};
use flotilla::error::Result;
use flotilla::{
    Agent, Envelope, OutcomeRecorder, Payload, SimBroker, SimPriceFeed, SystemBuilder, Target,
};

fn fast_config() -> AppConfig {
    let mut cfg = AppConfig::default_config();
    cfg.bus.tick_interval_ms = 10;
    cfg.bus.pause_interval_ms = 10;
    cfg.bus.error_backoff_ms = 20;
    cfg.pipeline.cycle_interval_ms = 10;
    cfg.monitor.check_interval_ms = 20;
    cfg.executor.state_dir = std::env::temp_dir()
        .join(format!("flotilla-it-{}", Uuid::new_v4()))
        .to_string_lossy()
        .into_owned();
    cfg
}

fn test_signal() -> Signal {
    Signal {
        id: Uuid::new_v4(),
        symbol: "AAPL".to_string(),
        market_type: MarketType::Equity,
        signal_type: "breakout".to_string(),
        confidence: 0.9,
        entry_price: dec!(100),
        target_price: dec!(105),
        stop_loss: dec!(95),
        risk_reward_ratio: 1.0,
        source: "scanner".to_string(),
        metadata: Default::default(),
    }
}

/// Emits one signal on its first processing cycle, then idles.
struct OneShotScanner {
    sent: bool,
}

#[async_trait]
impl Agent for OneShotScanner {
    fn name(&self) -> &str {
        "scanner"
    }

    async fn handle_message(&mut self, _envelope: Envelope, _ctx: &AgentContext) -> Result<()> {
        Ok(())
    }

    async fn process(&mut self, ctx: &AgentContext) -> Result<()> {
        if !self.sent {
            self.sent = true;
            ctx.send(Target::Coordinator, Payload::NewSignal(test_signal()))
                .await;
        }
        Ok(())
    }
}

/// Validates everything it sees unchanged.
struct PassingAnalyzer;

#[async_trait]
impl Agent for PassingAnalyzer {
    fn name(&self) -> &str {
        "analyzer"
    }

    async fn handle_message(&mut self, envelope: Envelope, ctx: &AgentContext) -> Result<()> {
        if let Payload::AnalyzeSignal(signal) = envelope.payload {
            let adjusted_confidence = signal.confidence;
            ctx.send(
                Target::Coordinator,
                Payload::SignalAnalyzed(AnalyzedSignal {
                    signal,
                    validated: true,
                    ta_scores: Default::default(),
                    adjusted_confidence,
                }),
            )
            .await;
        }
        Ok(())
    }

    async fn process(&mut self, _ctx: &AgentContext) -> Result<()> {
        Ok(())
    }
}

/// Ranks every prediction at a fixed composite score.
struct FixedScoreRanker {
    score: f64,
}

#[async_trait]
impl Agent for FixedScoreRanker {
    fn name(&self) -> &str {
        "ranker"
    }

    async fn handle_message(&mut self, envelope: Envelope, ctx: &AgentContext) -> Result<()> {
        if let Payload::RankOpportunity(prediction) = envelope.payload {
            let signal = prediction.analyzed.signal;
            ctx.send(
                Target::Coordinator,
                Payload::OpportunityRankings(Rankings {
                    rankings: vec![RankedOpportunity {
                        rank: 1,
                        symbol: signal.symbol.clone(),
                        composite_score: self.score,
                        risk_reward: signal.risk_reward_ratio,
                        confidence: prediction.ml_adjusted_confidence,
                        reasoning: "fixed-score test ranker".to_string(),
                        signal,
                    }],
                    generated_at: Utc::now(),
                }),
            )
            .await;
        }
        Ok(())
    }

    async fn process(&mut self, _ctx: &AgentContext) -> Result<()> {
        Ok(())
    }
}

struct CountingRecorder {
    outcomes: AtomicU64,
    last_pnl_cents: AtomicU64,
}

#[async_trait]
impl OutcomeRecorder for CountingRecorder {
    fn name(&self) -> &str {
        "counting"
    }

    async fn record(&self, outcome: &TradeOutcome) -> Result<()> {
        self.outcomes.fetch_add(1, Ordering::SeqCst);
        let cents = (outcome.pnl.abs() * Decimal::ONE_HUNDRED)
            .round()
            .to_u64()
            .unwrap_or(0);
        self.last_pnl_cents.store(cents, Ordering::SeqCst);
        Ok(())
    }
}

async fn wait_for<F: Fn() -> bool>(condition: F, what: &str) {
    for _ in 0..300 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn auto_execute_flow_opens_and_closes_a_position() {
    let mut cfg = fast_config();
    cfg.pipeline.auto_execute = true;
    // $50 daily-loss limit: the single stop-out (-$60) trips the gate, so
    // the still-ranked opportunity cannot re-execute after the close.
    cfg.risk.max_daily_loss_pct = dec!(0.005);

    let feed = SimPriceFeed::new();
    feed.set_price("AAPL", dec!(100));
    let broker = Arc::new(SimBroker::new(feed.clone()));
    let recorder = Arc::new(CountingRecorder {
        outcomes: AtomicU64::new(0),
        last_pnl_cents: AtomicU64::new(0),
    });

    let mut system = SystemBuilder::new(cfg, broker, feed.clone())
        .with_recorders(vec![recorder.clone()])
        .add_scanner(Box::new(OneShotScanner { sent: false }))
        .with_analyzer(Box::new(PassingAnalyzer))
        .with_ranker(Box::new(FixedScoreRanker { score: 0.9 }))
        .build()
        .await;
    system.start_all().await;
    let handle = system.handle().clone();

    // The signal flows scanner → analyzer → (no predictor) → ranker →
    // auto-execute → executor, and a position appears.
    wait_for(
        || handle.status().trading.positions == 1,
        "position to open",
    )
    .await;
    wait_for(
        || handle.status().trading.executed_today == 1,
        "trade_executed to arrive",
    )
    .await;

    // Price through the stop: the monitor closes it and the outcome fans out.
    feed.set_price("AAPL", dec!(94));
    wait_for(
        || handle.status().trading.positions == 0,
        "position to close",
    )
    .await;
    wait_for(
        || recorder.outcomes.load(Ordering::SeqCst) == 1,
        "outcome fan-out",
    )
    .await;

    // 10 shares (10% of 10k at 100) filled at 100, stopped at 94: -60.
    assert_eq!(recorder.last_pnl_cents.load(Ordering::SeqCst), 6000);
    wait_for(
        || handle.status().daily_pnl == dec!(-60),
        "daily P&L to absorb the loss",
    )
    .await;

    // The loss breached the daily limit: trading is forced off and the
    // opportunity (still top-ranked) never re-executes.
    wait_for(
        || !handle.status().trading_enabled,
        "daily-loss gate to disable trading",
    )
    .await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(handle.status().trading.positions, 0);
    assert_eq!(recorder.outcomes.load(Ordering::SeqCst), 1);

    system.stop_all().await;
}

#[tokio::test]
async fn manual_flow_queues_until_approved() {
    let cfg = fast_config(); // auto_execute = false

    let feed = SimPriceFeed::new();
    feed.set_price("AAPL", dec!(100));
    let broker = Arc::new(SimBroker::new(feed.clone()));

    let mut system = SystemBuilder::new(cfg, broker, feed.clone())
        .add_scanner(Box::new(OneShotScanner { sent: false }))
        .with_analyzer(Box::new(PassingAnalyzer))
        .with_ranker(Box::new(FixedScoreRanker { score: 0.9 }))
        .build()
        .await;
    system.start_all().await;
    let handle = system.handle().clone();

    wait_for(
        || handle.pending_trades().contains(&"AAPL".to_string()),
        "opportunity to queue for review",
    )
    .await;
    assert_eq!(handle.status().trading.positions, 0);

    // The same top opportunity is not re-queued on later cycles.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(handle.status().trading.pending_executions, 1);

    handle.approve_trade("AAPL").await;
    wait_for(
        || handle.status().trading.positions == 1,
        "approved trade to execute",
    )
    .await;
    assert!(handle.pending_trades().is_empty());

    system.stop_all().await;
}

#[tokio::test]
async fn rejected_opportunity_never_executes() {
    let cfg = fast_config();

    let feed = SimPriceFeed::new();
    feed.set_price("AAPL", dec!(100));
    let broker = Arc::new(SimBroker::new(feed.clone()));

    let mut system = SystemBuilder::new(cfg, broker, feed.clone())
        .add_scanner(Box::new(OneShotScanner { sent: false }))
        .with_analyzer(Box::new(PassingAnalyzer))
        .with_ranker(Box::new(FixedScoreRanker { score: 0.9 }))
        .build()
        .await;
    system.start_all().await;
    let handle = system.handle().clone();

    wait_for(
        || handle.status().trading.pending_executions == 1,
        "opportunity to queue",
    )
    .await;

    handle.reject_trade("AAPL").await;

    // A rejected opportunity never reaches the executor. (While it stays
    // top-ranked it may re-queue for review on a later cycle; what matters
    // is that no trade happens without approval.)
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(handle.status().trading.positions, 0);
    assert_eq!(handle.status().trading.executed_today, 0);

    system.stop_all().await;
}

#[tokio::test]
async fn below_threshold_opportunities_never_queue() {
    let cfg = fast_config();

    let feed = SimPriceFeed::new();
    feed.set_price("AAPL", dec!(100));
    let broker = Arc::new(SimBroker::new(feed.clone()));

    let mut system = SystemBuilder::new(cfg, broker, feed.clone())
        .add_scanner(Box::new(OneShotScanner { sent: false }))
        .with_analyzer(Box::new(PassingAnalyzer))
        .with_ranker(Box::new(FixedScoreRanker { score: 0.4 }))
        .build()
        .await;
    system.start_all().await;
    let handle = system.handle().clone();

    // The ranking arrives but sits below the execution threshold.
    wait_for(
        || handle.status().signals.raw == 1,
        "signal to enter the pipeline",
    )
    .await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(handle.status().trading.pending_executions, 0);
    assert_eq!(handle.status().trading.positions, 0);

    system.stop_all().await;
}
