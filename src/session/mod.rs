//! PM session lifecycle.
//!
//! A [`PmSession`] composes a [`Transport`], the PM handler table, an
//! [`EventListener`] and a [`TaskScheduler`] handle, and drives the
//! connection through these states:
//!
//! ```text
//! Idle -> Connecting -> Authenticating -> Active -> Disconnecting
//!      -> (Reconnecting -> Connecting | Terminated)
//! ```
//!
//! While connected, one serve task consumes inbound frames strictly in
//! arrival order. Each frame is dispatched with the session state locked,
//! then the queued commands are written and the queued events delivered to
//! the listener with no lock held.
//!
//! [`PmSession`] is a cheap handle; clones drive the same session.

mod handlers;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::watch;

use crate::chunk::styled_chunks;
use crate::config::Config;
use crate::constants::{LOGIN_TIMEOUT, PROTOCOL_VERSION};
use crate::dispatch::{Dispatcher, Outbox};
use crate::error::SessionError;
use crate::events::{EventListener, SessionEvent};
use crate::message::PmMessage;
use crate::presence::Contact;
use crate::scheduler::{TaskId, TaskScheduler};
use crate::token::TokenService;
use crate::transport::Transport;

use handlers::{pm_dispatcher, PmState};

/// Name used in session errors and logs.
const SESSION_NAME: &str = "pm";

/// Observable lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// No connection and none in progress.
    Idle,
    /// Fetching a token and opening the transport.
    Connecting,
    /// Login sent, waiting for the server to acknowledge it.
    Authenticating,
    /// Logged in and serving frames.
    Active,
    /// The connection is being torn down.
    Disconnecting,
    /// Waiting out the backoff before the next connection attempt.
    Reconnecting,
    /// Closed on request; `listen` will not reconnect.
    Terminated,
}

/// Result of [`PmSession::send_message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The message was written as this many `msg` commands.
    Sent {
        /// Number of chunks written.
        chunks: usize,
    },
    /// The anti-flood window is open; nothing was sent.
    Throttled,
}

/// Handle to a PM session.
#[derive(Clone)]
pub struct PmSession {
    shared: Arc<Shared>,
}

struct Shared {
    config: Config,
    tokens: Arc<dyn TokenService>,
    listener: Arc<dyn EventListener>,
    scheduler: TaskScheduler,
    dispatcher: Dispatcher<PmState, SessionEvent>,
    state: tokio::sync::Mutex<PmState>,
    transport: Mutex<Option<Transport>>,
    reconnect: AtomicBool,
    status: watch::Sender<SessionStatus>,
    session_id: String,
    /// Tasks registered through this session; cancelled on disconnect.
    tasks: Mutex<Vec<TaskId>>,
}

impl std::fmt::Debug for PmSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PmSession")
            .field("server", &self.shared.config.server)
            .field("port", &self.shared.config.port)
            .field("session_id", &self.shared.session_id)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl PmSession {
    /// Build a session. Nothing connects until [`Self::connect`] or
    /// [`Self::listen`] is called.
    pub fn new(
        config: Config,
        tokens: Arc<dyn TokenService>,
        listener: Arc<dyn EventListener>,
        scheduler: TaskScheduler,
    ) -> Self {
        let (status, _) = watch::channel(SessionStatus::Idle);

        Self {
            shared: Arc::new(Shared {
                config,
                tokens,
                listener,
                scheduler,
                dispatcher: pm_dispatcher(),
                state: tokio::sync::Mutex::new(PmState::default()),
                transport: Mutex::new(None),
                reconnect: AtomicBool::new(false),
                status,
                session_id: generate_session_id(),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    // ─── Lifecycle ──────────────────────────────────────────────────────────

    /// Log in and wait for the server's acknowledgement.
    pub async fn connect(&self, username: &str, password: &str) -> Result<(), SessionError> {
        if lock(&self.shared.transport).is_some() {
            return Err(SessionError::AlreadyConnected(SESSION_NAME.to_string()));
        }
        self.shared.status.send_replace(SessionStatus::Connecting);

        let result = self.open(username, password).await;
        if result.is_err() {
            self.transition(SessionStatus::Idle);
        }
        result
    }

    async fn open(&self, username: &str, password: &str) -> Result<(), SessionError> {
        let token = self.token(username, password).await?;
        let config = &self.shared.config;

        let (transport, frames) = Transport::connect(&config.server, config.port, config.tls).await?;
        let occupied = {
            let mut slot = lock(&self.shared.transport);
            let occupied = slot.is_some();
            if !occupied {
                *slot = Some(transport.clone());
            }
            occupied
        };
        if occupied {
            transport.disconnect().await;
            return Err(SessionError::AlreadyConnected(SESSION_NAME.to_string()));
        }
        self.shared.state.lock().await.begin_connection();

        let mut status_rx = self.shared.status.subscribe();
        self.shared.status.send_replace(SessionStatus::Authenticating);
        tokio::spawn(serve(Arc::clone(&self.shared), transport.clone(), frames));

        log::info!("[Session] Logging in as {username}");
        if let Err(e) = transport
            .send(&["tlogin", token.as_str(), PROTOCOL_VERSION, self.shared.session_id.as_str()])
            .await
        {
            self.teardown(&transport).await;
            return Err(e);
        }

        let waited = tokio::time::timeout(LOGIN_TIMEOUT, async {
            status_rx
                .wait_for(|s| *s != SessionStatus::Authenticating)
                .await
                .map(|status| *status)
        })
        .await;

        match waited {
            Ok(Ok(SessionStatus::Active)) => {
                log::info!("[Session] Logged in as {username}");
                Ok(())
            }
            Ok(_) => {
                self.teardown(&transport).await;
                if self.shared.state.lock().await.forced_off {
                    Err(SessionError::Auth(format!("server rejected login for {username}")))
                } else {
                    Err(SessionError::Connection(
                        "connection closed before login was acknowledged".to_string(),
                    ))
                }
            }
            Err(_) => {
                log::warn!("[Session] No login acknowledgement within {LOGIN_TIMEOUT:?}");
                self.teardown(&transport).await;
                Err(SessionError::Timeout(LOGIN_TIMEOUT))
            }
        }
    }

    async fn token(&self, username: &str, password: &str) -> Result<String, SessionError> {
        if let Some(token) = self.shared.state.lock().await.token.clone() {
            return Ok(token);
        }

        let token = self
            .shared
            .tokens
            .fetch_token(username, password)
            .await
            .map_err(|e| SessionError::Auth(format!("token service failed: {e:#}")))?
            .ok_or_else(|| SessionError::Auth(format!("no token issued for {username}")))?;

        self.shared.state.lock().await.token = Some(token.clone());
        Ok(token)
    }

    /// Connect and serve until the connection dies; with `reconnect` set,
    /// keep reconnecting after a fixed backoff until [`Self::disconnect`].
    ///
    /// With `reconnect` unset, connection failures are returned and a clean
    /// close returns `Ok`.
    pub async fn listen(&self, username: &str, password: &str, reconnect: bool) -> Result<(), SessionError> {
        self.shared.reconnect.store(reconnect, Ordering::SeqCst);
        let delay = self.shared.config.reconnect_delay();

        loop {
            match self.connect(username, password).await {
                Ok(()) => self.wait_closed().await,
                Err(e @ SessionError::AlreadyConnected(_)) => return Err(e),
                Err(e) if !self.reconnect_enabled() => return Err(e),
                Err(e) => log::warn!("[Session] Connect failed: {e}"),
            }

            if !self.reconnect_enabled() {
                return Ok(());
            }

            self.transition(SessionStatus::Reconnecting);
            log::info!("[Session] Reconnecting in {delay:?}");
            tokio::time::sleep(delay).await;

            if !self.reconnect_enabled() {
                return Ok(());
            }
        }
    }

    /// Stop reconnecting, cancel this session's tasks and close the
    /// connection. Safe to call when not connected.
    pub async fn disconnect(&self) {
        self.shared.reconnect.store(false, Ordering::SeqCst);
        self.shared.status.send_replace(SessionStatus::Disconnecting);

        for id in lock(&self.shared.tasks).drain(..) {
            self.shared.scheduler.cancel(id);
        }

        let transport = lock(&self.shared.transport).take();
        if let Some(transport) = transport {
            transport.disconnect().await;
        }
        self.shared.status.send_replace(SessionStatus::Terminated);
        log::info!("[Session] Terminated");
    }

    async fn wait_closed(&self) {
        let mut rx = self.shared.status.subscribe();
        let _ = rx
            .wait_for(|s| matches!(s, SessionStatus::Idle | SessionStatus::Terminated))
            .await;
    }

    async fn teardown(&self, transport: &Transport) {
        release(&self.shared, transport);
        transport.disconnect().await;
    }

    /// Move to `to` unless the session was terminated.
    fn transition(&self, to: SessionStatus) {
        self.shared.status.send_if_modified(|s| {
            if *s == SessionStatus::Terminated || *s == to {
                return false;
            }
            *s = to;
            true
        });
    }

    fn reconnect_enabled(&self) -> bool {
        self.shared.reconnect.load(Ordering::SeqCst)
    }

    // ─── Outbound operations ────────────────────────────────────────────────

    fn live_transport(&self) -> Result<Transport, SessionError> {
        lock(&self.shared.transport)
            .clone()
            .ok_or_else(|| SessionError::NotConnected(SESSION_NAME.to_string()))
    }

    async fn send_command(&self, fields: &[&str]) -> Result<(), SessionError> {
        self.live_transport()?.send(fields).await
    }

    /// Send a message to `target`, cut into chunks and styled.
    ///
    /// While the anti-flood window is open nothing is sent, a
    /// [`SessionEvent::Throttled`] event is emitted and
    /// [`SendOutcome::Throttled`] returned.
    pub async fn send_message(&self, target: &str, message: &str) -> Result<SendOutcome, SessionError> {
        let transport = self.live_transport()?;

        let silenced = self
            .shared
            .state
            .lock()
            .await
            .guard
            .is_silenced(tokio::time::Instant::now());
        if silenced {
            log::debug!("[Session] Message to {target} suppressed by flood guard");
            self.shared.listener.handle(&SessionEvent::Throttled {
                target: target.to_string(),
                message: message.to_string(),
            });
            return Ok(SendOutcome::Throttled);
        }

        let config = &self.shared.config;
        let chunks = styled_chunks(message, config.chunk_len(), &config.style);
        let target = target.to_lowercase();
        for chunk in &chunks {
            transport.send(&["msg", target.as_str(), chunk.as_str()]).await?;
        }
        Ok(SendOutcome::Sent { chunks: chunks.len() })
    }

    /// Block `user`. Returns `false` if already blocked.
    pub async fn block(&self, user: &str) -> Result<bool, SessionError> {
        let transport = self.live_transport()?;
        let user = user.to_lowercase();
        if self.shared.state.lock().await.is_blocked(&user) {
            return Ok(false);
        }

        transport.send(&["block", user.as_str(), user.as_str(), "S"]).await?;
        self.shared.state.lock().await.blocked.push(user.clone());
        self.shared.listener.handle(&SessionEvent::Blocked(user));
        Ok(true)
    }

    /// Unblock `user`. Returns `false` if `user` was not blocked.
    pub async fn unblock(&self, user: &str) -> Result<bool, SessionError> {
        let transport = self.live_transport()?;
        let user = user.to_lowercase();
        if !self.shared.state.lock().await.is_blocked(&user) {
            return Ok(false);
        }

        transport.send(&["unblock", user.as_str()]).await?;
        self.shared
            .state
            .lock()
            .await
            .blocked
            .retain(|b| !b.eq_ignore_ascii_case(&user));
        self.shared.listener.handle(&SessionEvent::Unblocked(user));
        Ok(true)
    }

    /// Request `name` be added to the contact list. Returns `false` if it
    /// already is a contact. The server confirms with `wladd`.
    pub async fn add_friend(&self, name: &str) -> Result<bool, SessionError> {
        let transport = self.live_transport()?;
        if self.shared.state.lock().await.contacts.contains(name) {
            return Ok(false);
        }
        transport.send(&["wladd", name.to_lowercase().as_str()]).await?;
        Ok(true)
    }

    /// Request `name` be removed from the contact list. Returns `false` if
    /// it is not a contact. The server confirms with `wldelete`.
    pub async fn unfriend(&self, name: &str) -> Result<bool, SessionError> {
        let transport = self.live_transport()?;
        let Some(contact) = self.shared.state.lock().await.contacts.get(name).cloned() else {
            return Ok(false);
        };
        transport.send(&["wldelete", contact.name.as_str()]).await?;
        Ok(true)
    }

    /// Turn the message background on.
    pub async fn enable_bg(&self) -> Result<(), SessionError> {
        self.send_command(&["msgbg", "1"]).await
    }

    /// Turn the message background off.
    pub async fn disable_bg(&self) -> Result<(), SessionError> {
        self.send_command(&["msgbg", "0"]).await
    }

    // ─── Session-scoped tasks ───────────────────────────────────────────────

    /// Run `callback` once after `delay`; cancelled by [`Self::disconnect`].
    pub fn set_timeout<F, Fut>(&self, label: impl Into<String>, delay: Duration, callback: F) -> TaskId
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let id = self.shared.scheduler.set_timeout(label, delay, callback);
        self.track_task(id);
        id
    }

    /// Run `callback` every `period`; cancelled by [`Self::disconnect`].
    pub fn set_interval<F, Fut>(&self, label: impl Into<String>, period: Duration, callback: F) -> TaskId
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let id = self.shared.scheduler.set_interval(label, period, callback);
        self.track_task(id);
        id
    }

    fn track_task(&self, id: TaskId) {
        let scheduler = &self.shared.scheduler;
        let mut tasks = lock(&self.shared.tasks);
        tasks.retain(|t| scheduler.contains(*t));
        tasks.push(id);
    }

    // ─── Queries ────────────────────────────────────────────────────────────

    /// Current contacts, in name order.
    pub async fn friends(&self) -> Vec<Contact> {
        self.shared.state.lock().await.contacts.iter().cloned().collect()
    }

    /// Look up one contact (case-insensitive).
    pub async fn get_friend(&self, name: &str) -> Option<Contact> {
        self.shared.state.lock().await.contacts.get(name).cloned()
    }

    /// Blocked user names.
    pub async fn blocked(&self) -> Vec<String> {
        self.shared.state.lock().await.blocked.clone()
    }

    /// Message history, oldest first.
    pub async fn history(&self) -> Vec<PmMessage> {
        self.shared.state.lock().await.history.to_vec()
    }

    /// True if the account has premium.
    pub async fn premium(&self) -> bool {
        self.shared.state.lock().await.premium
    }

    /// Server clock minus local clock, in seconds.
    pub async fn correction(&self) -> f64 {
        self.shared.state.lock().await.correction
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        *self.shared.status.borrow()
    }

    /// Receiver that observes every lifecycle transition.
    #[must_use]
    pub fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.shared.status.subscribe()
    }

    /// True while a transport is live.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        lock(&self.shared.transport)
            .as_ref()
            .is_some_and(Transport::is_connected)
    }

    /// Random 16-digit id sent with the login.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.shared.session_id
    }

    /// Scheduler this session registers its tasks with.
    #[must_use]
    pub fn scheduler(&self) -> &TaskScheduler {
        &self.shared.scheduler
    }
}

/// Serve loop: dispatch frames in order until the transport closes.
async fn serve(shared: Arc<Shared>, transport: Transport, mut frames: UnboundedReceiver<Vec<u8>>) {
    while let Some(frame) = frames.recv().await {
        let mut out = Outbox::new();
        {
            let mut state = shared.state.lock().await;
            shared.dispatcher.dispatch(&mut state, &mut out, &frame);
        }

        let (commands, events) = out.drain();
        for command in &commands {
            if let Err(e) = transport.send(command.as_slice()).await {
                log::warn!("[Session] Failed to send {}: {e}", command.first().map_or("", String::as_str));
            }
        }

        for event in &events {
            match event {
                SessionEvent::Connected => {
                    shared.status.send_if_modified(|s| {
                        if *s != SessionStatus::Authenticating {
                            return false;
                        }
                        *s = SessionStatus::Active;
                        true
                    });
                }
                SessionEvent::KickedOff | SessionEvent::Denied => {
                    shared.status.send_if_modified(|s| {
                        if *s == SessionStatus::Terminated {
                            return false;
                        }
                        *s = SessionStatus::Disconnecting;
                        true
                    });
                }
                _ => {}
            }
            shared.listener.handle(event);
        }

        if out.should_close() {
            break;
        }
    }

    // Only the owner of the slot reports the state change; a newer
    // connection may already be logging in.
    let owned = release(&shared, &transport);
    transport.disconnect().await;
    if owned {
        shared.status.send_if_modified(|s| {
            if *s == SessionStatus::Terminated {
                return false;
            }
            *s = SessionStatus::Idle;
            true
        });
    }
    shared.listener.handle(&SessionEvent::Disconnected);
    log::debug!("[Session] Serve loop for {} finished", transport.peer());
}

/// Clear the transport slot if it still holds `transport`.
/// Clear the transport slot if it still holds `transport`.
fn release(shared: &Shared, transport: &Transport) -> bool {
    let mut slot = lock(&shared.transport);
    let owned = slot.as_ref().is_some_and(|t| t.same_connection(transport));
    if owned {
        *slot = None;
    }
    owned
}

fn generate_session_id() -> String {
    rand::rng()
        .random_range(1_000_000_000_000_000_u64..10_000_000_000_000_000)
        .to_string()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ChannelListener;
    use crate::token::StaticTokenService;

    fn session() -> PmSession {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        PmSession::new(
            Config::default(),
            Arc::new(StaticTokenService::new("tok")),
            Arc::new(ChannelListener::new(tx)),
            TaskScheduler::new(),
        )
    }

    #[test]
    fn test_session_id_is_sixteen_digits() {
        for _ in 0..100 {
            let id = generate_session_id();
            assert_eq!(id.len(), 16);
            assert!(id.chars().all(|c| c.is_ascii_digit()));
            assert!(!id.starts_with('0'));
        }
    }

    #[tokio::test]
    async fn test_new_session_is_idle() {
        let pm = session();
        assert_eq!(pm.status(), SessionStatus::Idle);
        assert!(!pm.is_connected());
        assert!(pm.friends().await.is_empty());
        assert!(pm.history().await.is_empty());
    }

    #[tokio::test]
    async fn test_operations_require_connection() {
        let pm = session();
        assert!(matches!(
            pm.send_message("bob", "hi").await,
            Err(SessionError::NotConnected(_))
        ));
        assert!(matches!(pm.block("bob").await, Err(SessionError::NotConnected(_))));
        assert!(matches!(pm.enable_bg().await, Err(SessionError::NotConnected(_))));
    }

    #[tokio::test]
    async fn test_disconnect_when_idle_terminates() {
        let pm = session();
        pm.disconnect().await;
        pm.disconnect().await;
        assert_eq!(pm.status(), SessionStatus::Terminated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_session_tasks() {
        let pm = session();
        let id = pm.set_interval("refresh", Duration::from_secs(1), || async { Ok(()) });
        assert!(pm.scheduler().contains(id));
        pm.disconnect().await;
        assert!(!pm.scheduler().contains(id));
    }

    #[tokio::test]
    async fn test_rejected_token_is_auth_error() {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let pm = PmSession::new(
            Config::default(),
            Arc::new(StaticTokenService::rejecting()),
            Arc::new(ChannelListener::new(tx)),
            TaskScheduler::new(),
        );
        let err = pm.connect("alice", "pw").await.unwrap_err();
        assert!(matches!(err, SessionError::Auth(_)));
        assert_eq!(pm.status(), SessionStatus::Idle);
    }
}
