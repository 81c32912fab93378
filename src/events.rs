//! Session events and the listener interface that receives them.
//!
//! Every observable thing a session does is reported as one
//! [`SessionEvent`] variant, delivered synchronously to the session's
//! [`EventListener`] after the frame that caused it has been handled.

use tokio::sync::mpsc::UnboundedSender;

use crate::message::PmMessage;
use crate::presence::Contact;

/// Event emitted by a PM session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Login acknowledged; the session is active.
    Connected,

    /// The connection closed, for whatever reason.
    Disconnected,

    /// The server forced the session off because the account logged in
    /// elsewhere (`kickingoff`).
    KickedOff,

    /// The server rejected the login token (`DENIED`).
    Denied,

    /// The server signalled rate limiting (`toofast`); sends are suppressed
    /// for the silence window.
    TooFast,

    /// A user message was suppressed by the anti-flood guard.
    ///
    /// The message is not queued and will never be sent.
    Throttled {
        /// Intended recipient.
        target: String,
        /// Message body as passed by the caller.
        message: String,
    },

    /// The server refused a message for being too long.
    MessageLengthExceeded,

    /// A message arrived (live or from the offline queue).
    Message(PmMessage),

    /// Premium status changed.
    PremiumChanged(bool),

    /// The contact list was (re)loaded.
    ContactsLoaded(Vec<Contact>),

    /// A contact's presence changed.
    ContactStatus(Contact),

    /// The server confirmed a new contact.
    ContactAdded(String),

    /// The server confirmed a contact removal.
    ContactRemoved(String),

    /// The block list was received.
    BlockList(Vec<String>),

    /// A user was blocked.
    Blocked(String),

    /// A user was unblocked.
    Unblocked(String),
}

/// Receives session events.
///
/// Called from the session's serve task while it holds no locks; an
/// implementation must not block for long.
pub trait EventListener: Send + Sync {
    /// Handle one event.
    fn handle(&self, event: &SessionEvent);
}

/// Listener that logs every event at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingListener;

impl EventListener for LoggingListener {
    fn handle(&self, event: &SessionEvent) {
        match event {
            SessionEvent::Message(msg) => {
                log::info!("[Session] <{}> {}", msg.sender, msg.body);
            }
            SessionEvent::ContactsLoaded(contacts) => {
                log::debug!("[Session] {} contacts loaded", contacts.len());
            }
            other => log::debug!("[Session] Event: {:?}", other),
        }
    }
}

/// Listener that forwards events into a channel.
#[derive(Debug, Clone)]
pub struct ChannelListener {
    tx: UnboundedSender<SessionEvent>,
}

impl ChannelListener {
    /// Forward events to `tx`.
    #[must_use]
    pub fn new(tx: UnboundedSender<SessionEvent>) -> Self {
        Self { tx }
    }
}

impl EventListener for ChannelListener {
    fn handle(&self, event: &SessionEvent) {
        if self.tx.send(event.clone()).is_err() {
            log::trace!("[Session] Event receiver dropped, discarding {:?}", event);
        }
    }
}

impl<F> EventListener for F
where
    F: Fn(&SessionEvent) + Send + Sync,
{
    fn handle(&self, event: &SessionEvent) {
        self(event);
    }
}
