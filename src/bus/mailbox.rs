use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::warn;

use super::envelope::Envelope;

/// Sending half of an agent mailbox.
///
/// Mailboxes are bounded; when a mailbox is full the newest envelope is
/// dropped with a warning and counted, so a stalled consumer degrades
/// visibly instead of growing without bound.
#[derive(Debug, Clone)]
pub struct MailboxHandle {
    owner: Arc<str>,
    tx: mpsc::Sender<Envelope>,
    dropped: Arc<AtomicU64>,
}

impl MailboxHandle {
    /// Deliver an envelope, returning whether it was accepted.
    pub fn deliver(&self, envelope: Envelope) -> bool {
        match self.tx.try_send(envelope) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(envelope)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    "Mailbox [{}] full, dropping {} from {} ({} dropped so far)",
                    self.owner,
                    envelope.payload.kind(),
                    envelope.source,
                    dropped
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(envelope)) => {
                warn!(
                    "Mailbox [{}] closed, dropping {} from {}",
                    self.owner,
                    envelope.payload.kind(),
                    envelope.source
                );
                false
            }
        }
    }

    /// Envelopes dropped because the mailbox was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }
}

/// Receiving half of an agent mailbox; owned exclusively by the run loop.
#[derive(Debug)]
pub struct Mailbox {
    rx: mpsc::Receiver<Envelope>,
}

impl Mailbox {
    /// Non-blocking pop; `None` when the mailbox is currently empty.
    pub fn pop(&mut self) -> Option<Envelope> {
        self.rx.try_recv().ok()
    }
}

/// Create a bounded mailbox pair for the named agent.
pub fn mailbox(owner: &str, capacity: usize) -> (MailboxHandle, Mailbox) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        MailboxHandle {
            owner: Arc::from(owner),
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        },
        Mailbox { rx },
    )
}
