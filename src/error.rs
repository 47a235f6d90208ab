use thiserror::Error;

/// Main error type for the orchestrator
#[derive(Error, Debug)]
pub enum FlotillaError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Market data errors
    #[error("Price unavailable for symbol: {0}")]
    PriceUnavailable(String),

    // Order execution errors
    #[error("Order submission failed: {0}")]
    OrderSubmission(String),

    #[error("Order rejected: {0}")]
    OrderRejected(String),

    #[error("Broker not connected")]
    BrokerDisconnected,

    // Agent lifecycle errors
    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Invalid state transition: from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Mailbox closed for agent: {0}")]
    MailboxClosed(String),

    // Risk management errors
    #[error("Risk limit exceeded: {0}")]
    RiskLimitExceeded(String),

    #[error("Daily loss limit reached: {0}")]
    DailyLossLimit(String),

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // Notification errors
    #[error("Notification failed: {0}")]
    Notification(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Operation cancelled")]
    Cancelled,
}

/// Result type alias for FlotillaError
pub type Result<T> = std::result::Result<T, FlotillaError>;
