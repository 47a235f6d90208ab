//! System bootstrap: wires the router, coordinator, executor, monitor, and
//! any externally supplied pipeline agents, and drives lifecycle fan-out.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::agent::{Agent, AgentHost, AgentSnapshot, RuntimeConfig};
use crate::broker::{Broker, PriceFeed};
use crate::bus::Router;
use crate::config::AppConfig;
use crate::coordinator::{Coordinator, CoordinatorHandle, RegisteredAgent, COORDINATOR_NAME};
use crate::executor::{TradeExecutor, EXECUTOR_NAME};
use crate::learning::{default_recorders, OutcomeRecorder};
use crate::monitor::{MonitorHandle, PositionMonitor};
use crate::notify::{LogNotifier, Notifier};

/// Assembles a `TradingSystem` from its collaborators.
///
/// Scanners, the analyzer, the predictor, and the ranker are external
/// collaborators: supply any agent implementation for them. The executor and
/// coordinator are built in.
pub struct SystemBuilder {
    config: AppConfig,
    broker: Arc<dyn Broker>,
    feed: Arc<dyn PriceFeed>,
    notifier: Arc<dyn Notifier>,
    recorders: Vec<Arc<dyn OutcomeRecorder>>,
    scanners: Vec<Box<dyn Agent>>,
    analyzer: Option<Box<dyn Agent>>,
    predictor: Option<Box<dyn Agent>>,
    ranker: Option<Box<dyn Agent>>,
}

impl SystemBuilder {
    pub fn new(config: AppConfig, broker: Arc<dyn Broker>, feed: Arc<dyn PriceFeed>) -> Self {
        Self {
            config,
            broker,
            feed,
            notifier: Arc::new(LogNotifier),
            recorders: default_recorders(),
            scanners: Vec::new(),
            analyzer: None,
            predictor: None,
            ranker: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_recorders(mut self, recorders: Vec<Arc<dyn OutcomeRecorder>>) -> Self {
        self.recorders = recorders;
        self
    }

    pub fn add_scanner(mut self, scanner: Box<dyn Agent>) -> Self {
        self.scanners.push(scanner);
        self
    }

    pub fn with_analyzer(mut self, analyzer: Box<dyn Agent>) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    pub fn with_predictor(mut self, predictor: Box<dyn Agent>) -> Self {
        self.predictor = Some(predictor);
        self
    }

    pub fn with_ranker(mut self, ranker: Box<dyn Agent>) -> Self {
        self.ranker = Some(ranker);
        self
    }

    pub async fn build(self) -> TradingSystem {
        let router = Router::new();
        let runtime_cfg = RuntimeConfig::from(&self.config.bus);

        // Monitor task plus its command/exit plumbing.
        let (monitor, monitor_handle, exits_rx) = PositionMonitor::new(
            &self.config.monitor,
            self.broker.clone(),
            self.feed.clone(),
            self.notifier.clone(),
        );
        let (monitor_shutdown, monitor_shutdown_rx) = watch::channel(false);
        let monitor_task = tokio::spawn(monitor.run(monitor_shutdown_rx));

        let executor = TradeExecutor::new(
            self.config.risk.clone(),
            self.config.executor.clone(),
            &self.config.monitor,
            self.broker.clone(),
            self.notifier.clone(),
            monitor_handle.clone(),
            exits_rx,
        );

        let (mut coordinator, status_rx) =
            Coordinator::new(&self.config, self.recorders, self.notifier.clone());

        let mut hosts: Vec<AgentHost> = Vec::new();

        let executor_host =
            host_and_register(Box::new(executor), &router, &runtime_cfg, &mut coordinator);
        coordinator.roles_mut().executor = Some(EXECUTOR_NAME.to_string());
        hosts.push(executor_host);

        for scanner in self.scanners {
            hosts.push(host_and_register(scanner, &router, &runtime_cfg, &mut coordinator));
        }
        if let Some(analyzer) = self.analyzer {
            let host = host_and_register(analyzer, &router, &runtime_cfg, &mut coordinator);
            coordinator.roles_mut().analyzer = Some(host.name().to_string());
            hosts.push(host);
        }
        if let Some(predictor) = self.predictor {
            let host = host_and_register(predictor, &router, &runtime_cfg, &mut coordinator);
            coordinator.roles_mut().predictor = Some(host.name().to_string());
            hosts.push(host);
        }
        if let Some(ranker) = self.ranker {
            let host = host_and_register(ranker, &router, &runtime_cfg, &mut coordinator);
            coordinator.roles_mut().ranker = Some(host.name().to_string());
            hosts.push(host);
        }

        for host in &hosts {
            router.register(host.mailbox_handle()).await;
        }

        let coordinator_host = AgentHost::new(Box::new(coordinator), router.clone(), runtime_cfg);
        router.set_coordinator(coordinator_host.mailbox_handle()).await;

        let handle = CoordinatorHandle::new(router.clone(), status_rx);

        TradingSystem {
            router,
            handle,
            monitor_handle,
            hosts,
            coordinator_host,
            monitor_task: Some(monitor_task),
            monitor_shutdown,
        }
    }
}

fn host_and_register(
    agent: Box<dyn Agent>,
    router: &Router,
    runtime_cfg: &RuntimeConfig,
    coordinator: &mut Coordinator,
) -> AgentHost {
    let host = AgentHost::new(agent, router.clone(), runtime_cfg.clone());
    coordinator.register_agent(RegisteredAgent {
        name: host.name().to_string(),
        metrics: host.metrics(),
        state: host.state_cell(),
        mailbox: host.mailbox_handle(),
    });
    host
}

/// The assembled process: hosted agents, the coordinator, and the monitor.
pub struct TradingSystem {
    router: Router,
    handle: CoordinatorHandle,
    monitor_handle: MonitorHandle,
    hosts: Vec<AgentHost>,
    coordinator_host: AgentHost,
    monitor_task: Option<JoinHandle<()>>,
    monitor_shutdown: watch::Sender<bool>,
}

impl TradingSystem {
    pub fn handle(&self) -> &CoordinatorHandle {
        &self.handle
    }

    pub fn monitor(&self) -> &MonitorHandle {
        &self.monitor_handle
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Start every registered agent, then the coordinator.
    pub async fn start_all(&mut self) {
        for host in &mut self.hosts {
            host.start().await;
        }
        self.coordinator_host.start().await;
        info!("Trading system started ({} agents)", self.hosts.len() + 1);
    }

    /// Stop the coordinator first, then the agents, then the monitor. After
    /// this resolves no agent callback fires again.
    pub async fn stop_all(&mut self) {
        self.coordinator_host.stop().await;
        for host in &mut self.hosts {
            host.stop().await;
        }
        let _ = self.monitor_shutdown.send(true);
        if let Some(task) = self.monitor_task.take() {
            let _ = task.await;
        }
        info!("Trading system stopped");
    }

    pub async fn pause_agent(&mut self, name: &str) {
        if name == COORDINATOR_NAME {
            self.coordinator_host.pause().await;
            return;
        }
        if let Some(host) = self.hosts.iter_mut().find(|h| h.name() == name) {
            host.pause().await;
        }
    }

    pub async fn resume_agent(&mut self, name: &str) {
        if name == COORDINATOR_NAME {
            self.coordinator_host.resume().await;
            return;
        }
        if let Some(host) = self.hosts.iter_mut().find(|h| h.name() == name) {
            host.resume().await;
        }
    }

    /// Live snapshots of every host, coordinator included.
    pub async fn agent_snapshots(&self) -> Vec<AgentSnapshot> {
        let mut snapshots = Vec::with_capacity(self.hosts.len() + 1);
        snapshots.push(self.coordinator_host.snapshot().await);
        for host in &self.hosts {
            snapshots.push(host.snapshot().await);
        }
        snapshots
    }
}
