//! Coordinator: routing hub, signal pipeline, and risk gating.

pub mod pipeline;
pub mod risk;
pub mod state;

mod coordinator;

pub use coordinator::{Coordinator, PipelineRoles, RegisteredAgent, COORDINATOR_NAME};
pub use pipeline::{PipelineCounts, SignalPipeline, SignalStage};
pub use risk::{RiskEvent, RiskGate};
pub use state::{CoordinatorHandle, SystemStatus, TradingCounts};
