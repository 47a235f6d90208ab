use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::{Agent, AgentContext, AgentMetrics, AgentSnapshot, AgentState};
use crate::bus::{mailbox, Mailbox, MailboxHandle, Router};
use crate::config::BusConfig;

/// Timing knobs for a hosted agent's run loop
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub tick_interval: Duration,
    pub pause_interval: Duration,
    pub error_backoff: Duration,
    pub mailbox_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(100),
            pause_interval: Duration::from_millis(500),
            error_backoff: Duration::from_secs(5),
            mailbox_capacity: 256,
        }
    }
}

impl From<&BusConfig> for RuntimeConfig {
    fn from(cfg: &BusConfig) -> Self {
        Self {
            tick_interval: Duration::from_millis(cfg.tick_interval_ms),
            pause_interval: Duration::from_millis(cfg.pause_interval_ms),
            error_backoff: Duration::from_millis(cfg.error_backoff_ms),
            mailbox_capacity: cfg.mailbox_capacity,
        }
    }
}

/// Hosts one agent on its own tokio task: drain-then-process cycles,
/// idempotent start, awaited-cancellation stop, and error-backoff recovery.
pub struct AgentHost {
    name: String,
    agent: Option<Box<dyn Agent>>,
    inbox: Option<Mailbox>,
    handle: MailboxHandle,
    state: Arc<RwLock<AgentState>>,
    metrics: Arc<AgentMetrics>,
    ctx: AgentContext,
    cfg: RuntimeConfig,
    shutdown: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl AgentHost {
    pub fn new(agent: Box<dyn Agent>, router: Router, cfg: RuntimeConfig) -> Self {
        let name = agent.name().to_string();
        let (handle, inbox) = mailbox(&name, cfg.mailbox_capacity);
        let metrics = Arc::new(AgentMetrics::default());
        let ctx = AgentContext::new(&name, router, metrics.clone());
        info!("Agent [{}] initialized", name);
        Self {
            name,
            agent: Some(agent),
            inbox: Some(inbox),
            handle,
            state: Arc::new(RwLock::new(AgentState::Idle)),
            metrics,
            ctx,
            cfg,
            shutdown: None,
            task: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sending half of this agent's mailbox, for router registration.
    pub fn mailbox_handle(&self) -> MailboxHandle {
        self.handle.clone()
    }

    pub fn metrics(&self) -> Arc<AgentMetrics> {
        self.metrics.clone()
    }

    /// Shared state cell, readable by status consumers.
    pub fn state_cell(&self) -> Arc<RwLock<AgentState>> {
        self.state.clone()
    }

    pub async fn state(&self) -> AgentState {
        *self.state.read().await
    }

    pub async fn snapshot(&self) -> AgentSnapshot {
        AgentSnapshot {
            name: self.name.clone(),
            state: *self.state.read().await,
            messages_sent: self.metrics.messages_sent(),
            messages_received: self.metrics.messages_received(),
            errors: self.metrics.errors(),
            last_active: self.metrics.last_active(),
            mailbox_dropped: self.handle.dropped(),
        }
    }

    /// Start the run loop. Idempotent: a second call on a live agent warns
    /// and returns without spawning another loop.
    pub async fn start(&mut self) {
        if self.task.as_ref().is_some_and(|task| !task.is_finished()) {
            warn!("Agent [{}] already running", self.name);
            return;
        }

        let (agent, inbox) = match (self.agent.take(), self.inbox.take()) {
            (Some(agent), Some(inbox)) => (agent, inbox),
            _ => {
                warn!("Agent [{}] cannot start after stop", self.name);
                return;
            }
        };

        *self.state.write().await = AgentState::Running;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.shutdown = Some(shutdown_tx);
        self.task = Some(tokio::spawn(run_loop(
            agent,
            inbox,
            shutdown_rx,
            self.state.clone(),
            self.metrics.clone(),
            self.ctx.clone(),
            self.cfg.clone(),
        )));
        info!("Agent [{}] started", self.name);
    }

    /// Stop the agent, awaiting run-loop termination. After this resolves no
    /// further `process()`/`handle_message()` call is made.
    pub async fn stop(&mut self) {
        *self.state.write().await = AgentState::Stopped;
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(true);
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        // A fault handler racing the shutdown may have flipped the state to
        // Error; the terminal state wins once the loop has unwound.
        *self.state.write().await = AgentState::Stopped;
        info!("Agent [{}] stopped", self.name);
    }

    /// Pause processing; only effective from `Running`.
    pub async fn pause(&mut self) {
        let mut state = self.state.write().await;
        if *state == AgentState::Running {
            *state = AgentState::Paused;
            info!("Agent [{}] paused", self.name);
        }
    }

    /// Resume processing; a no-op from any state but `Paused`.
    pub async fn resume(&mut self) {
        let mut state = self.state.write().await;
        if *state == AgentState::Paused {
            *state = AgentState::Running;
            info!("Agent [{}] resumed", self.name);
        }
    }
}

async fn run_loop(
    mut agent: Box<dyn Agent>,
    mut inbox: Mailbox,
    mut shutdown_rx: watch::Receiver<bool>,
    state: Arc<RwLock<AgentState>>,
    metrics: Arc<AgentMetrics>,
    ctx: AgentContext,
    cfg: RuntimeConfig,
) {
    let name = agent.name().to_string();

    if let Err(e) = agent.on_start(&ctx).await {
        warn!("Agent [{}] start hook failed: {}", name, e);
    }

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let current = *state.read().await;
        match current {
            AgentState::Running => {
                let mut fault = None;

                // Drain the mailbox completely, then run one processing step.
                while let Some(envelope) = inbox.pop() {
                    metrics.record_received();
                    if let Err(e) = agent.handle_message(envelope, &ctx).await {
                        fault = Some(e);
                        break;
                    }
                }
                if fault.is_none() {
                    if let Err(e) = agent.process(&ctx).await {
                        fault = Some(e);
                    }
                }

                match fault {
                    None => metrics.touch(),
                    Some(e) => {
                        error!("Agent [{}] error: {}", name, e);
                        metrics.record_error();
                        *state.write().await = AgentState::Error;
                        if sleep_or_shutdown(cfg.error_backoff, &mut shutdown_rx).await {
                            break;
                        }
                        // Recover unless stop or pause intervened meanwhile.
                        let mut st = state.write().await;
                        if *st == AgentState::Error {
                            *st = AgentState::Running;
                        }
                    }
                }
            }
            AgentState::Paused => {
                if sleep_or_shutdown(cfg.pause_interval, &mut shutdown_rx).await {
                    break;
                }
            }
            AgentState::Idle | AgentState::Error | AgentState::Stopped => {}
        }

        if sleep_or_shutdown(cfg.tick_interval, &mut shutdown_rx).await {
            break;
        }
    }

    if let Err(e) = agent.on_stop(&ctx).await {
        warn!("Agent [{}] stop hook failed: {}", name, e);
    }
}

/// Sleep for `duration`, waking early on shutdown. Returns true when the
/// loop should exit.
async fn sleep_or_shutdown(duration: Duration, shutdown_rx: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        changed = shutdown_rx.changed() => changed.is_err() || *shutdown_rx.borrow(),
    }
}
