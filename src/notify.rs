//! Outbound notification seam.
//!
//! Notifications are best-effort everywhere: call sites log failures and
//! continue, they never let a notifier error stop a trading loop.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::Result;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: &str) -> Result<()>;
}

/// Default notifier: emits through the log stream.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, message: &str) -> Result<()> {
        info!("[notify] {}", message);
        Ok(())
    }
}

/// Fire-and-forget helper used by trading components.
pub async fn notify_best_effort(notifier: &dyn Notifier, message: &str) {
    if let Err(e) = notifier.send(message).await {
        warn!("Notification failed: {}", e);
    }
}
