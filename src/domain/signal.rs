use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::market::MarketType;

/// Raw trading signal produced by a scanner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    /// Assigned by the coordinator on first sight; scanners may leave it nil
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub symbol: String,
    pub market_type: MarketType,
    /// e.g. "breakout", "momentum", "short"
    pub signal_type: String,
    /// Scanner confidence in [0, 1]
    pub confidence: f64,
    pub entry_price: Decimal,
    pub target_price: Decimal,
    pub stop_loss: Decimal,
    pub risk_reward_ratio: f64,
    /// Name of the scanner that produced the signal
    pub source: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Signal enriched by the technical analyzer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzedSignal {
    #[serde(flatten)]
    pub signal: Signal,
    /// False means the signal failed validation and is dropped
    pub validated: bool,
    /// Per-indicator scores in [0, 1]
    #[serde(default)]
    pub ta_scores: HashMap<String, f64>,
    pub adjusted_confidence: f64,
}

/// Analyzed signal enriched by the ML predictor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    #[serde(flatten)]
    pub analyzed: AnalyzedSignal,
    /// Per-model predicted move or probability
    #[serde(default)]
    pub ml_predictions: HashMap<String, f64>,
    pub ml_adjusted_confidence: f64,
}

/// One entry of an `opportunity_rankings` message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedOpportunity {
    pub rank: usize,
    pub symbol: String,
    pub composite_score: f64,
    pub risk_reward: f64,
    pub confidence: f64,
    pub reasoning: String,
    pub signal: Signal,
}

/// Wholesale replacement set of ranked opportunities
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rankings {
    pub rankings: Vec<RankedOpportunity>,
    pub generated_at: DateTime<Utc>,
}

impl Prediction {
    /// Wrap an analyzed signal without model input, for the degraded path
    /// when no predictor is registered.
    pub fn passthrough(analyzed: AnalyzedSignal) -> Self {
        let ml_adjusted_confidence = analyzed.adjusted_confidence;
        Self {
            analyzed,
            ml_predictions: HashMap::new(),
            ml_adjusted_confidence,
        }
    }
}
