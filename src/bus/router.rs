use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::envelope::{Envelope, Target};
use super::mailbox::MailboxHandle;

/// Explicit message router keyed by agent name.
///
/// The coordinator's mailbox is held separately from the agent registry so
/// that `Target::All` fans out to every registered agent without echoing
/// back into the coordinator.
#[derive(Clone, Default)]
pub struct Router {
    inner: Arc<RouterInner>,
}

#[derive(Default)]
struct RouterInner {
    coordinator: RwLock<Option<MailboxHandle>>,
    agents: RwLock<HashMap<String, MailboxHandle>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the coordinator's mailbox.
    pub async fn set_coordinator(&self, handle: MailboxHandle) {
        *self.inner.coordinator.write().await = Some(handle);
    }

    /// Register an agent's mailbox under its unique name.
    pub async fn register(&self, handle: MailboxHandle) {
        let name = handle.owner().to_string();
        debug!("Router registered agent: {}", name);
        self.inner.agents.write().await.insert(name, handle);
    }

    /// Remove an agent from the registry.
    pub async fn unregister(&self, name: &str) {
        self.inner.agents.write().await.remove(name);
        debug!("Router unregistered agent: {}", name);
    }

    /// Route an envelope to its target mailbox(es).
    ///
    /// Unknown targets are dropped with a warning; the sender never sees an
    /// error.
    pub async fn route(&self, envelope: Envelope) {
        match &envelope.target {
            Target::Coordinator => {
                if let Some(coordinator) = self.inner.coordinator.read().await.as_ref() {
                    coordinator.deliver(envelope);
                } else {
                    warn!(
                        "No coordinator registered, dropping {} from {}",
                        envelope.payload.kind(),
                        envelope.source
                    );
                }
            }
            Target::All => {
                let agents = self.inner.agents.read().await;
                for handle in agents.values() {
                    handle.deliver(envelope.clone());
                }
            }
            Target::Agent(name) => {
                let agents = self.inner.agents.read().await;
                match agents.get(name) {
                    Some(handle) => {
                        handle.deliver(envelope);
                    }
                    None => {
                        warn!(
                            "Unknown target agent: {} (dropping {} from {})",
                            name,
                            envelope.payload.kind(),
                            envelope.source
                        );
                    }
                }
            }
        }
    }

    /// Names of all registered agents.
    pub async fn registered(&self) -> Vec<String> {
        self.inner.agents.read().await.keys().cloned().collect()
    }

    /// Whether an agent name is currently routable.
    pub async fn is_registered(&self, name: &str) -> bool {
        self.inner.agents.read().await.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::envelope::Payload;
    use crate::bus::mailbox::mailbox;

    fn envelope(target: Target) -> Envelope {
        Envelope::new("tester", target, Payload::GetPositions)
    }

    #[tokio::test]
    async fn routes_by_name_and_drops_unknown() {
        let router = Router::new();
        let (handle, mut inbox) = mailbox("alpha", 8);
        router.register(handle).await;

        router.route(envelope(Target::Agent("alpha".to_string()))).await;
        router.route(envelope(Target::Agent("ghost".to_string()))).await;

        assert!(inbox.pop().is_some());
        assert!(inbox.pop().is_none());
    }

    #[tokio::test]
    async fn all_reaches_every_agent_but_not_coordinator() {
        let router = Router::new();
        let (coord_handle, mut coord_inbox) = mailbox("coordinator", 8);
        router.set_coordinator(coord_handle).await;

        let (a, mut inbox_a) = mailbox("alpha", 8);
        let (b, mut inbox_b) = mailbox("beta", 8);
        router.register(a).await;
        router.register(b).await;

        router.route(envelope(Target::All)).await;

        assert!(inbox_a.pop().is_some());
        assert!(inbox_b.pop().is_some());
        assert!(coord_inbox.pop().is_none());
    }

    #[tokio::test]
    async fn coordinator_target_reaches_coordinator_mailbox() {
        let router = Router::new();
        let (coord_handle, mut coord_inbox) = mailbox("coordinator", 8);
        router.set_coordinator(coord_handle).await;

        router.route(envelope(Target::Coordinator)).await;
        assert!(coord_inbox.pop().is_some());

        // Without a coordinator the envelope is dropped, not an error.
        let bare = Router::new();
        bare.route(envelope(Target::Coordinator)).await;
    }
}
