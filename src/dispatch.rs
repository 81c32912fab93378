//! Inbound command routing.
//!
//! A [`Dispatcher`] owns an explicit `action -> handler` table built when the
//! session is constructed. Each inbound frame is split on `:` into an action
//! and its arguments and routed to the matching handler.
//!
//! Handlers never touch the transport directly. They push outbound commands
//! and listener events into an [`Outbox`], which the caller flushes after the
//! handler returns. That keeps handler code synchronous and lets the session
//! hold its state lock for exactly one frame.
//!
//! Failures are contained here: an empty, non-UTF-8, unknown or malformed
//! frame is logged and leaves the dispatcher ready for the next one. A
//! handler that panics is treated as a failed frame; whatever it pushed into
//! the outbox is discarded.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};

use crate::constants::FIELD_SEPARATOR;
use crate::error::ProtocolError;

/// Handler signature: session state, outbox, arguments after the action.
pub type Handler<S, E> = fn(&mut S, &mut Outbox<E>, &[&str]) -> Result<(), ProtocolError>;

/// Side effects produced while handling one frame.
#[derive(Debug)]
pub struct Outbox<E> {
    commands: Vec<Vec<String>>,
    events: Vec<E>,
    close: bool,
}

impl<E> Outbox<E> {
    /// Empty outbox.
    #[must_use]
    pub fn new() -> Self {
        Self {
            commands: Vec::new(),
            events: Vec::new(),
            close: false,
        }
    }

    /// Queue an outbound command.
    pub fn send<I, T>(&mut self, fields: I)
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.commands.push(fields.into_iter().map(Into::into).collect());
    }

    /// Queue a listener event.
    pub fn emit(&mut self, event: E) {
        self.events.push(event);
    }

    /// Ask the caller to close the connection after flushing.
    pub fn close(&mut self) {
        self.close = true;
    }

    /// True if [`Outbox::close`] was called.
    #[must_use]
    pub fn should_close(&self) -> bool {
        self.close
    }

    /// Take the queued commands and events, leaving the outbox empty.
    pub fn drain(&mut self) -> (Vec<Vec<String>>, Vec<E>) {
        (
            std::mem::take(&mut self.commands),
            std::mem::take(&mut self.events),
        )
    }

    /// Queued commands.
    #[must_use]
    pub fn commands(&self) -> &[Vec<String>] {
        &self.commands
    }

    /// Queued events.
    #[must_use]
    pub fn events(&self) -> &[E] {
        &self.events
    }
}

impl<E> Default for Outbox<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// What happened to one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Zero-length frame.
    Empty,
    /// Bytes were not valid UTF-8.
    Malformed,
    /// A handler ran and returned `Ok`.
    Handled(String),
    /// No handler is registered for this action.
    Unknown(String),
    /// The handler returned an error; it was logged.
    Failed(String),
}

/// Routes frames to handlers by action name.
pub struct Dispatcher<S, E> {
    name: &'static str,
    handlers: HashMap<&'static str, Handler<S, E>>,
}

impl<S, E> Dispatcher<S, E> {
    /// Empty table. `name` prefixes log lines (e.g. `"PM"`).
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            handlers: HashMap::new(),
        }
    }

    /// Register `handler` for `action`, replacing any previous one.
    pub fn register(&mut self, action: &'static str, handler: Handler<S, E>) -> &mut Self {
        if self.handlers.insert(action, handler).is_some() {
            log::warn!("[Dispatch] {}: handler for {action:?} replaced", self.name);
        }
        self
    }

    /// True if a handler exists for `action`.
    #[must_use]
    pub fn handles(&self, action: &str) -> bool {
        self.handlers.contains_key(action)
    }

    /// Number of registered actions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// True if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Route one raw frame.
    pub fn dispatch(&self, state: &mut S, out: &mut Outbox<E>, raw: &[u8]) -> DispatchOutcome {
        if raw.is_empty() {
            return DispatchOutcome::Empty;
        }

        let Ok(text) = std::str::from_utf8(raw) else {
            log::warn!(
                "[Dispatch] {}: dropping non-UTF-8 frame ({} bytes)",
                self.name,
                raw.len()
            );
            return DispatchOutcome::Malformed;
        };
        log::debug!("[Dispatch] {}  IN {}", self.name, truncate(text, 200));

        let mut parts = text.split(FIELD_SEPARATOR);
        let action = parts.next().unwrap_or_default();
        let args: Vec<&str> = parts.collect();

        let Some(handler) = self.handlers.get(action) else {
            log::debug!("[Dispatch] {}: unhandled action {action:?}", self.name);
            return DispatchOutcome::Unknown(action.to_string());
        };

        let (commands, events) = (out.commands.len(), out.events.len());
        match panic::catch_unwind(AssertUnwindSafe(|| handler(state, out, &args))) {
            Ok(Ok(())) => DispatchOutcome::Handled(action.to_string()),
            Ok(Err(e)) => {
                log::error!("[Dispatch] {}: handler {action:?} failed: {e}", self.name);
                DispatchOutcome::Failed(action.to_string())
            }
            Err(_) => {
                log::error!("[Dispatch] {}: handler {action:?} panicked", self.name);
                out.commands.truncate(commands);
                out.events.truncate(events);
                DispatchOutcome::Failed(action.to_string())
            }
        }
    }
}

impl<S, E> std::fmt::Debug for Dispatcher<S, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut actions: Vec<_> = self.handlers.keys().collect();
        actions.sort();
        f.debug_struct("Dispatcher")
            .field("name", &self.name)
            .field("actions", &actions)
            .finish()
    }
}

/// Cut `s` to at most `max` bytes on a char boundary.
fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
