use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{AnalyzedSignal, Signal};

/// Explicit stage of one in-flight signal.
///
/// The pipeline's position is tracked here instead of being implied by the
/// most recent message type, so it is inspectable without replaying history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalStage {
    /// Seen from a scanner, forwarded for analysis
    Analyzing,
    /// Validated, forwarded for ML prediction
    Predicting,
    /// Forwarded for ranking (directly after analysis when no predictor is
    /// registered)
    Ranking,
}

#[derive(Debug, Clone)]
struct StageEntry {
    stage: SignalStage,
    symbol: String,
    updated_at: DateTime<Utc>,
}

/// Counts exposed in status snapshots.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PipelineCounts {
    pub raw: usize,
    pub analyzed: usize,
    pub in_flight: usize,
}

/// Recent-signal buffers plus the per-signal stage map.
pub struct SignalPipeline {
    buffer_cap: usize,
    raw: Vec<Signal>,
    analyzed: Vec<AnalyzedSignal>,
    in_flight: HashMap<Uuid, StageEntry>,
}

impl SignalPipeline {
    pub fn new(buffer_cap: usize) -> Self {
        Self {
            buffer_cap: buffer_cap.max(2),
            raw: Vec::new(),
            analyzed: Vec::new(),
            in_flight: HashMap::new(),
        }
    }

    /// Keep a bounded window of recent signals: when a buffer exceeds the
    /// cap it is truncated to the most recent half.
    fn truncate<T>(buffer: &mut Vec<T>, cap: usize) {
        if buffer.len() > cap {
            let keep = cap / 2;
            buffer.drain(..buffer.len() - keep);
        }
    }

    pub fn record_raw(&mut self, signal: Signal) {
        self.raw.push(signal);
        Self::truncate(&mut self.raw, self.buffer_cap);
    }

    pub fn record_analyzed(&mut self, analyzed: AnalyzedSignal) {
        self.analyzed.push(analyzed);
        Self::truncate(&mut self.analyzed, self.buffer_cap);
    }

    pub fn set_stage(&mut self, id: Uuid, symbol: &str, stage: SignalStage) {
        self.in_flight.insert(
            id,
            StageEntry {
                stage,
                symbol: symbol.to_string(),
                updated_at: Utc::now(),
            },
        );
    }

    pub fn stage_of(&self, id: Uuid) -> Option<SignalStage> {
        self.in_flight.get(&id).map(|entry| entry.stage)
    }

    /// A signal leaves the stage map when it reaches the rankings or is
    /// dropped by validation.
    pub fn complete(&mut self, id: Uuid) {
        self.in_flight.remove(&id);
    }

    /// Drop stage entries that never completed (lost downstream).
    pub fn prune_stale(&mut self, max_age: Duration) {
        let cutoff = Utc::now() - max_age;
        self.in_flight.retain(|_, entry| entry.updated_at > cutoff);
    }

    pub fn counts(&self) -> PipelineCounts {
        PipelineCounts {
            raw: self.raw.len(),
            analyzed: self.analyzed.len(),
            in_flight: self.in_flight.len(),
        }
    }

    pub fn in_flight_symbols(&self) -> Vec<String> {
        self.in_flight
            .values()
            .map(|entry| entry.symbol.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MarketType;
    use rust_decimal_macros::dec;

    fn signal(symbol: &str) -> Signal {
        Signal {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            market_type: MarketType::Equity,
            signal_type: "breakout".to_string(),
            confidence: 0.8,
            entry_price: dec!(100),
            target_price: dec!(105),
            stop_loss: dec!(95),
            risk_reward_ratio: 1.0,
            source: "scanner".to_string(),
            metadata: Default::default(),
        }
    }

    #[test]
    fn raw_buffer_truncates_to_recent_half() {
        let mut pipeline = SignalPipeline::new(100);
        for i in 0..101 {
            pipeline.record_raw(signal(&format!("S{i}")));
        }
        let counts = pipeline.counts();
        assert_eq!(counts.raw, 50);
    }

    #[test]
    fn stages_progress_and_complete() {
        let mut pipeline = SignalPipeline::new(100);
        let s = signal("AAPL");
        let id = s.id;

        pipeline.record_raw(s);
        pipeline.set_stage(id, "AAPL", SignalStage::Analyzing);
        assert_eq!(pipeline.stage_of(id), Some(SignalStage::Analyzing));

        pipeline.set_stage(id, "AAPL", SignalStage::Predicting);
        assert_eq!(pipeline.stage_of(id), Some(SignalStage::Predicting));

        pipeline.set_stage(id, "AAPL", SignalStage::Ranking);
        pipeline.complete(id);
        assert_eq!(pipeline.stage_of(id), None);
        assert_eq!(pipeline.counts().in_flight, 0);
    }

    #[test]
    fn stale_entries_are_pruned() {
        let mut pipeline = SignalPipeline::new(100);
        let id = Uuid::new_v4();
        pipeline.set_stage(id, "AAPL", SignalStage::Analyzing);

        pipeline.prune_stale(Duration::minutes(10));
        assert_eq!(pipeline.counts().in_flight, 1);

        pipeline.prune_stale(Duration::zero() - Duration::seconds(1));
        assert_eq!(pipeline.counts().in_flight, 0);
    }
}
