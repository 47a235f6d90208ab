//! Message bus: envelopes, bounded FIFO mailboxes, and the name-keyed router.

pub mod envelope;
pub mod mailbox;
pub mod router;

pub use envelope::{ControlCommand, Envelope, Payload, Target, DEFAULT_PRIORITY};
pub use mailbox::{mailbox, Mailbox, MailboxHandle};
pub use router::Router;
