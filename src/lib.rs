pub mod agent;
pub mod broker;
pub mod bus;
pub mod config;
pub mod coordinator;
pub mod domain;
pub mod error;
pub mod executor;
pub mod learning;
pub mod monitor;
pub mod notify;
pub mod persistence;
pub mod system;

pub use agent::{Agent, AgentContext, AgentHost, AgentSnapshot, AgentState};
pub use broker::{Broker, PriceFeed, SimBroker, SimPriceFeed};
pub use bus::{ControlCommand, Envelope, Payload, Router, Target};
pub use config::AppConfig;
pub use coordinator::{Coordinator, CoordinatorHandle, SystemStatus, COORDINATOR_NAME};
pub use error::{FlotillaError, Result};
pub use executor::{TradeExecutor, EXECUTOR_NAME};
pub use learning::{
    default_recorders, EdgeComponentLearner, MarketWeightLearner, ModelAccuracyTracker,
    OutcomeRecorder, PatternLearner,
};
pub use monitor::{ExitParams, ManagedPosition, MonitorHandle, PositionMonitor};
pub use notify::{LogNotifier, Notifier};
pub use system::{SystemBuilder, TradingSystem};
