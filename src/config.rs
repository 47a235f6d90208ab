use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub risk: RiskConfig,
    pub pipeline: PipelineConfig,
    pub executor: ExecutorConfig,
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RiskConfig {
    /// Account capital used for sizing and loss limits (USD)
    pub starting_capital: Decimal,
    /// Maximum fraction of capital per position (e.g., 0.10 = 10%)
    pub max_position_pct: Decimal,
    /// Maximum concurrent positions
    pub max_positions: usize,
    /// Daily loss limit as a fraction of capital (e.g., 0.03 = 3%)
    pub max_daily_loss_pct: Decimal,
    /// Enforce the pattern-day-trader limit on equity day trades
    #[serde(default)]
    pub pdt_restricted: bool,
    /// Day trades allowed per day under PDT restriction
    #[serde(default = "default_pdt_limit")]
    pub pdt_day_trade_limit: u32,
}

fn default_pdt_limit() -> u32 {
    3
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Minimum composite score before an opportunity is executable
    pub execution_threshold: f64,
    /// Execute approved opportunities without manual review
    #[serde(default)]
    pub auto_execute: bool,
    /// Coordinator cycle interval in milliseconds
    #[serde(default = "default_cycle_interval")]
    pub cycle_interval_ms: u64,
    /// Recent-signal buffer capacity; truncated to half when exceeded
    #[serde(default = "default_signal_buffer")]
    pub signal_buffer_size: usize,
}

fn default_cycle_interval() -> u64 {
    1000
}

fn default_signal_buffer() -> usize {
    100
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorConfig {
    /// Directory for the executor state checkpoint
    #[serde(default = "default_state_dir")]
    pub state_dir: String,
    /// Closed trades retained in the checkpoint
    #[serde(default = "default_history_limit")]
    pub closed_trade_history: usize,
}

fn default_state_dir() -> String {
    "state".to_string()
}

fn default_history_limit() -> usize {
    200
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Poll interval for exit checks in milliseconds
    #[serde(default = "default_check_interval")]
    pub check_interval_ms: u64,
    /// Fraction of the initial quantity sold at the first target
    #[serde(default = "default_partial_pct")]
    pub partial_take_profit_pct: Decimal,
    /// Risk:reward multiple at which the first target sits
    #[serde(default = "default_first_target_rr")]
    pub first_target_rr: f64,
    /// Trailing stop distance as a fraction of the highest price
    #[serde(default = "default_trailing_pct")]
    pub trailing_stop_pct: Decimal,
    /// Risk:reward multiple at which trailing activates
    #[serde(default = "default_trailing_start_rr")]
    pub trailing_start_rr: f64,
}

fn default_check_interval() -> u64 {
    5000
}

fn default_partial_pct() -> Decimal {
    Decimal::new(50, 2) // 0.50
}

fn default_first_target_rr() -> f64 {
    1.0
}

fn default_trailing_pct() -> Decimal {
    Decimal::new(2, 2) // 0.02
}

fn default_trailing_start_rr() -> f64 {
    1.5
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: default_check_interval(),
            partial_take_profit_pct: default_partial_pct(),
            first_target_rr: default_first_target_rr(),
            trailing_stop_pct: default_trailing_pct(),
            trailing_start_rr: default_trailing_start_rr(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BusConfig {
    /// Mailbox capacity per agent; overflow drops the newest envelope
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,
    /// Agent tick interval in milliseconds
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
    /// Sleep while paused in milliseconds
    #[serde(default = "default_pause_interval")]
    pub pause_interval_ms: u64,
    /// Backoff after an agent cycle fault in milliseconds
    #[serde(default = "default_error_backoff")]
    pub error_backoff_ms: u64,
}

fn default_mailbox_capacity() -> usize {
    256
}

fn default_tick_interval() -> u64 {
    100
}

fn default_pause_interval() -> u64 {
    500
}

fn default_error_backoff() -> u64 {
    5000
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: default_mailbox_capacity(),
            tick_interval_ms: default_tick_interval(),
            pause_interval_ms: default_pause_interval(),
            error_backoff_ms: default_error_backoff(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
    /// Optional directory for rolling log files
    #[serde(default)]
    pub file_dir: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            file_dir: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("pipeline.cycle_interval_ms", 1000)?
            .set_default("monitor.check_interval_ms", 5000)?
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            .add_source(
                File::from(config_dir.join(
                    std::env::var("FLOTILLA_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (FLOTILLA_RISK__MAX_POSITIONS, etc.)
            .add_source(
                Environment::with_prefix("FLOTILLA")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Create a default configuration for CLI and test usage
    pub fn default_config() -> Self {
        use rust_decimal_macros::dec;

        Self {
            risk: RiskConfig {
                starting_capital: dec!(10000),
                max_position_pct: dec!(0.10),
                max_positions: 5,
                max_daily_loss_pct: dec!(0.03),
                pdt_restricted: false,
                pdt_day_trade_limit: 3,
            },
            pipeline: PipelineConfig {
                execution_threshold: 0.6,
                auto_execute: false,
                cycle_interval_ms: 1000,
                signal_buffer_size: 100,
            },
            executor: ExecutorConfig {
                state_dir: "state".to_string(),
                closed_trade_history: 200,
            },
            monitor: MonitorConfig::default(),
            bus: BusConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.risk.starting_capital <= Decimal::ZERO {
            errors.push("starting_capital must be positive".to_string());
        }

        if self.risk.max_position_pct <= Decimal::ZERO || self.risk.max_position_pct > Decimal::ONE
        {
            errors.push("max_position_pct must be in (0, 1]".to_string());
        }

        if self.risk.max_daily_loss_pct <= Decimal::ZERO
            || self.risk.max_daily_loss_pct >= Decimal::ONE
        {
            errors.push("max_daily_loss_pct must be between 0 and 1".to_string());
        }

        if self.risk.max_positions == 0 {
            errors.push("max_positions must be at least 1".to_string());
        }

        if !(0.0..=1.0).contains(&self.pipeline.execution_threshold) {
            errors.push("execution_threshold must be between 0 and 1".to_string());
        }

        if self.monitor.partial_take_profit_pct <= Decimal::ZERO
            || self.monitor.partial_take_profit_pct >= Decimal::ONE
        {
            errors.push("partial_take_profit_pct must be between 0 and 1".to_string());
        }

        if self.monitor.trailing_stop_pct <= Decimal::ZERO
            || self.monitor.trailing_stop_pct >= Decimal::ONE
        {
            errors.push("trailing_stop_pct must be between 0 and 1".to_string());
        }

        if self.monitor.trailing_start_rr < self.monitor.first_target_rr {
            errors.push(
                "trailing_start_rr must not be below first_target_rr".to_string(),
            );
        }

        if self.bus.mailbox_capacity == 0 {
            errors.push("mailbox_capacity must be at least 1".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        let cfg = AppConfig::default_config();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn bad_risk_params_are_rejected() {
        let mut cfg = AppConfig::default_config();
        cfg.risk.max_position_pct = Decimal::ZERO;
        cfg.risk.max_positions = 0;
        let errs = cfg.validate().unwrap_err();
        assert_eq!(errs.len(), 2);
    }

    #[test]
    fn trailing_must_start_at_or_after_first_target() {
        let mut cfg = AppConfig::default_config();
        cfg.monitor.first_target_rr = 2.0;
        cfg.monitor.trailing_start_rr = 1.5;
        assert!(cfg.validate().is_err());
    }
}
