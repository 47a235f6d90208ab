//! Learning collaborators fed from closed-trade outcomes.
//!
//! The coordinator fans every `trade_closed` payload out to each recorder
//! independently; a failure in one recorder never starves the others. All
//! instances are constructed explicitly and injected at startup.

use std::collections::HashMap;

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::{MarketType, Side, TradeOutcome};
use crate::error::Result;

/// One learning subsystem consuming closed-trade outcomes.
#[async_trait]
pub trait OutcomeRecorder: Send + Sync {
    fn name(&self) -> &str;

    async fn record(&self, outcome: &TradeOutcome) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BucketStats {
    pub trades: u64,
    pub wins: u64,
    pub total_pnl: f64,
    pub total_pnl_pct: f64,
}

impl BucketStats {
    fn absorb(&mut self, outcome: &TradeOutcome) {
        self.trades += 1;
        if outcome.pnl > Decimal::ZERO {
            self.wins += 1;
        }
        self.total_pnl += outcome.pnl.to_f64().unwrap_or(0.0);
        self.total_pnl_pct += outcome.pnl_pct;
    }

    pub fn win_rate(&self) -> f64 {
        if self.trades == 0 {
            return 0.0;
        }
        self.wins as f64 / self.trades as f64
    }
}

/// Learns per-market allocation weights from realized P&L.
#[derive(Default)]
pub struct MarketWeightLearner {
    stats: Mutex<HashMap<MarketType, BucketStats>>,
}

impl MarketWeightLearner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Relative weight for a market: win rate shaded by average P&L%.
    pub async fn weight(&self, market_type: MarketType) -> f64 {
        let stats = self.stats.lock().await;
        match stats.get(&market_type) {
            Some(s) if s.trades > 0 => {
                let avg_pnl_pct = s.total_pnl_pct / s.trades as f64;
                (s.win_rate() + avg_pnl_pct / 100.0).max(0.0)
            }
            _ => 0.5,
        }
    }

    pub async fn snapshot(&self) -> HashMap<MarketType, BucketStats> {
        self.stats.lock().await.clone()
    }
}

#[async_trait]
impl OutcomeRecorder for MarketWeightLearner {
    fn name(&self) -> &str {
        "market_weights"
    }

    async fn record(&self, outcome: &TradeOutcome) -> Result<()> {
        let mut stats = self.stats.lock().await;
        stats.entry(outcome.market_type).or_default().absorb(outcome);
        debug!(
            "Market weight sample: {} {} trades",
            outcome.market_type,
            stats[&outcome.market_type].trades
        );
        Ok(())
    }
}

/// Tracks hit rates per edge component (market/direction bucket).
#[derive(Default)]
pub struct EdgeComponentLearner {
    stats: Mutex<HashMap<(MarketType, Side), BucketStats>>,
}

impl EdgeComponentLearner {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn hit_rate(&self, market_type: MarketType, side: Side) -> Option<f64> {
        let stats = self.stats.lock().await;
        stats.get(&(market_type, side)).map(BucketStats::win_rate)
    }
}

#[async_trait]
impl OutcomeRecorder for EdgeComponentLearner {
    fn name(&self) -> &str {
        "edge_components"
    }

    async fn record(&self, outcome: &TradeOutcome) -> Result<()> {
        let mut stats = self.stats.lock().await;
        stats
            .entry((outcome.market_type, outcome.side))
            .or_default()
            .absorb(outcome);
        Ok(())
    }
}

/// Learns which strategy/exit-reason pairings recur.
#[derive(Default)]
pub struct PatternLearner {
    stats: Mutex<HashMap<(String, String), BucketStats>>,
}

impl PatternLearner {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> HashMap<(String, String), BucketStats> {
        self.stats.lock().await.clone()
    }
}

#[async_trait]
impl OutcomeRecorder for PatternLearner {
    fn name(&self) -> &str {
        "patterns"
    }

    async fn record(&self, outcome: &TradeOutcome) -> Result<()> {
        let mut stats = self.stats.lock().await;
        stats
            .entry((outcome.strategy.clone(), outcome.exit_reason.clone()))
            .or_default()
            .absorb(outcome);
        Ok(())
    }
}

/// Tracks realized risk:reward against the 1.0 break-even line per strategy.
#[derive(Default)]
pub struct ModelAccuracyTracker {
    stats: Mutex<HashMap<String, AccuracyStats>>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AccuracyStats {
    pub samples: u64,
    pub profitable: u64,
    pub total_rr_achieved: f64,
}

impl ModelAccuracyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn accuracy(&self, strategy: &str) -> Option<f64> {
        let stats = self.stats.lock().await;
        stats.get(strategy).map(|s| {
            if s.samples == 0 {
                0.0
            } else {
                s.profitable as f64 / s.samples as f64
            }
        })
    }
}

#[async_trait]
impl OutcomeRecorder for ModelAccuracyTracker {
    fn name(&self) -> &str {
        "model_accuracy"
    }

    async fn record(&self, outcome: &TradeOutcome) -> Result<()> {
        let mut stats = self.stats.lock().await;
        let entry = stats.entry(outcome.strategy.clone()).or_default();
        entry.samples += 1;
        if outcome.pnl > Decimal::ZERO {
            entry.profitable += 1;
        }
        entry.total_rr_achieved += outcome.risk_reward_achieved;
        Ok(())
    }
}

/// The default set of four learning collaborators.
pub fn default_recorders() -> Vec<std::sync::Arc<dyn OutcomeRecorder>> {
    vec![
        std::sync::Arc::new(MarketWeightLearner::new()),
        std::sync::Arc::new(EdgeComponentLearner::new()),
        std::sync::Arc::new(PatternLearner::new()),
        std::sync::Arc::new(ModelAccuracyTracker::new()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn outcome(pnl: Decimal, market_type: MarketType) -> TradeOutcome {
        TradeOutcome {
            symbol: "TEST".to_string(),
            market_type,
            side: Side::Buy,
            quantity: dec!(100),
            entry_price: dec!(100),
            exit_price: dec!(105),
            pnl,
            pnl_pct: 5.0,
            risk_reward_achieved: 1.0,
            hold_time_hours: 2.0,
            strategy: "breakout".to_string(),
            exit_reason: "Trailing Stop Hit".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn market_weights_reflect_outcomes() {
        let learner = MarketWeightLearner::new();
        assert_eq!(learner.weight(MarketType::Equity).await, 0.5);

        learner.record(&outcome(dec!(50), MarketType::Equity)).await.unwrap();
        learner.record(&outcome(dec!(-20), MarketType::Equity)).await.unwrap();

        let weight = learner.weight(MarketType::Equity).await;
        assert!(weight > 0.5, "winning market should outrank the prior");
        // Untouched markets keep the neutral prior.
        assert_eq!(learner.weight(MarketType::Crypto).await, 0.5);
    }

    #[tokio::test]
    async fn edge_components_track_direction_hit_rates() {
        let learner = EdgeComponentLearner::new();
        assert_eq!(learner.hit_rate(MarketType::Equity, Side::Buy).await, None);

        learner.record(&outcome(dec!(30), MarketType::Equity)).await.unwrap();
        learner.record(&outcome(dec!(-10), MarketType::Equity)).await.unwrap();

        assert_eq!(
            learner.hit_rate(MarketType::Equity, Side::Buy).await,
            Some(0.5)
        );
        assert_eq!(learner.hit_rate(MarketType::Equity, Side::Sell).await, None);
    }

    #[tokio::test]
    async fn pattern_learner_buckets_by_strategy_and_reason() {
        let learner = PatternLearner::new();
        learner.record(&outcome(dec!(10), MarketType::Equity)).await.unwrap();
        learner.record(&outcome(dec!(10), MarketType::Equity)).await.unwrap();

        let snapshot = learner.snapshot().await;
        let key = ("breakout".to_string(), "Trailing Stop Hit".to_string());
        assert_eq!(snapshot[&key].trades, 2);
        assert_eq!(snapshot[&key].wins, 2);
    }

    #[tokio::test]
    async fn accuracy_counts_profitable_samples() {
        let tracker = ModelAccuracyTracker::new();
        tracker.record(&outcome(dec!(10), MarketType::Equity)).await.unwrap();
        tracker.record(&outcome(dec!(-10), MarketType::Equity)).await.unwrap();
        assert_eq!(tracker.accuracy("breakout").await, Some(0.5));
        assert_eq!(tracker.accuracy("unknown").await, None);
    }
}
