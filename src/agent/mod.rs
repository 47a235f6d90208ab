//! Agent capability trait, lifecycle state, and the hosting runtime.

pub mod runtime;

pub use runtime::{AgentHost, RuntimeConfig};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bus::{Envelope, Payload, Router, Target, DEFAULT_PRIORITY};
use crate::error::Result;

/// Agent lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentState {
    Idle,
    Running,
    Paused,
    Error,
    Stopped,
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentState::Idle => write!(f, "idle"),
            AgentState::Running => write!(f, "running"),
            AgentState::Paused => write!(f, "paused"),
            AgentState::Error => write!(f, "error"),
            AgentState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Per-agent counters, shared between the run loop and status readers
#[derive(Debug, Default)]
pub struct AgentMetrics {
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    errors: AtomicU64,
    /// Millisecond unix timestamp of the last completed cycle; 0 = never
    last_active_ms: AtomicU64,
}

impl AgentMetrics {
    pub fn record_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn touch(&self) {
        self.last_active_ms
            .store(Utc::now().timestamp_millis() as u64, Ordering::Relaxed);
    }

    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }

    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn last_active(&self) -> Option<DateTime<Utc>> {
        let ms = self.last_active_ms.load(Ordering::Relaxed);
        if ms == 0 {
            return None;
        }
        DateTime::from_timestamp_millis(ms as i64)
    }
}

/// Point-in-time view of one agent, for status reporting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub name: String,
    pub state: AgentState,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub errors: u64,
    pub last_active: Option<DateTime<Utc>>,
    pub mailbox_dropped: u64,
}

/// Handle an agent uses to send messages; attributes the source name and
/// counts outbound traffic.
#[derive(Clone)]
pub struct AgentContext {
    name: Arc<str>,
    router: Router,
    metrics: Arc<AgentMetrics>,
}

impl AgentContext {
    pub fn new(name: &str, router: Router, metrics: Arc<AgentMetrics>) -> Self {
        Self {
            name: Arc::from(name),
            router,
            metrics,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Send a message at the default priority.
    pub async fn send(&self, target: Target, payload: Payload) {
        self.send_with_priority(target, payload, DEFAULT_PRIORITY)
            .await;
    }

    /// Send a message with an explicit priority (metadata only).
    pub async fn send_with_priority(&self, target: Target, payload: Payload, priority: u8) {
        let envelope =
            Envelope::new(self.name.to_string(), target, payload).with_priority(priority);
        self.metrics.record_sent();
        self.router.route(envelope).await;
    }
}

/// Capability interface implemented by every concrete agent.
///
/// `handle_message` runs once per drained envelope; `process` runs once per
/// cycle after the mailbox is empty. Errors from either are contained by the
/// host: the agent enters `Error`, backs off, and recovers. It never
/// terminates itself.
#[async_trait]
pub trait Agent: Send + 'static {
    fn name(&self) -> &str;

    /// One-time hook before the first cycle (broker connect, state reload).
    async fn on_start(&mut self, _ctx: &AgentContext) -> Result<()> {
        Ok(())
    }

    async fn handle_message(&mut self, envelope: Envelope, ctx: &AgentContext) -> Result<()>;

    async fn process(&mut self, ctx: &AgentContext) -> Result<()>;

    /// One-time hook after the final cycle (broker disconnect, flush).
    async fn on_stop(&mut self, _ctx: &AgentContext) -> Result<()> {
        Ok(())
    }
}
