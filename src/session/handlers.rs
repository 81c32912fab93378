//! PM command handlers and the state they operate on.
//!
//! One function per inbound action, registered in [`pm_dispatcher`].
//! Handlers run with the session state locked and report side effects
//! through the [`Outbox`]; they never await.

use chrono::Utc;
use tokio::time::Instant;

use crate::dispatch::{Dispatcher, Outbox};
use crate::error::ProtocolError;
use crate::events::SessionEvent;
use crate::flood::AntiFloodGuard;
use crate::history::History;
use crate::message::PmMessage;
use crate::presence::PresenceTracker;

type Out = Outbox<SessionEvent>;
type HandlerResult = Result<(), ProtocolError>;

/// Mutable state of one PM session.
#[derive(Debug, Default)]
pub(crate) struct PmState {
    pub(crate) contacts: PresenceTracker,
    pub(crate) blocked: Vec<String>,
    pub(crate) premium: bool,
    /// Server clock minus local clock, in seconds.
    pub(crate) correction: f64,
    pub(crate) history: History<PmMessage>,
    pub(crate) guard: AntiFloodGuard,
    /// Cached login token; cleared when the server forces us off.
    pub(crate) token: Option<String>,
    /// Login acknowledged on the current connection.
    pub(crate) authenticated: bool,
    /// The server ended the current connection (`kickingoff`/`DENIED`).
    pub(crate) forced_off: bool,
}

impl PmState {
    /// Reset per-connection flags before a new login.
    pub(crate) fn begin_connection(&mut self) {
        self.authenticated = false;
        self.forced_off = false;
    }

    pub(crate) fn is_blocked(&self, name: &str) -> bool {
        self.blocked.iter().any(|b| b.eq_ignore_ascii_case(name))
    }
}

/// Handler table for the PM connection.
pub(crate) fn pm_dispatcher() -> Dispatcher<PmState, SessionEvent> {
    let mut d = Dispatcher::new("PM");
    d.register("seller_name", on_seller_name)
        .register("OK", on_ok)
        .register("premium", on_premium)
        .register("time", on_time)
        .register("kickingoff", on_kickingoff)
        .register("DENIED", on_denied)
        .register("toofast", on_toofast)
        .register("msglexceeded", on_msglexceeded)
        .register("msg", on_msg)
        .register("msgoff", on_msgoff)
        .register("wl", on_wl)
        .register("wlapp", ignore)
        .register("wlonline", ignore)
        .register("wloffline", ignore)
        .register("track", on_track)
        .register("idleupdate", on_idleupdate)
        .register("status", on_status)
        .register("block_list", on_block_list)
        .register("wladd", on_wladd)
        .register("wldelete", on_wldelete);
    d
}

fn acknowledge(state: &mut PmState, out: &mut Out) {
    if !state.authenticated {
        state.authenticated = true;
        out.emit(SessionEvent::Connected);
    }
}

fn on_seller_name(state: &mut PmState, out: &mut Out, _args: &[&str]) -> HandlerResult {
    acknowledge(state, out);
    Ok(())
}

fn on_ok(state: &mut PmState, out: &mut Out, _args: &[&str]) -> HandlerResult {
    state.contacts.clear();
    state.blocked.clear();
    out.send(["getpremium"]);
    out.send(["wl"]);
    out.send(["getblock"]);
    acknowledge(state, out);
    Ok(())
}

fn on_premium(state: &mut PmState, out: &mut Out, args: &[&str]) -> HandlerResult {
    state.premium = args.first() == Some(&"210");
    if state.premium {
        out.send(["msgbg", "1"]);
    }
    out.emit(SessionEvent::PremiumChanged(state.premium));
    Ok(())
}

fn on_time(state: &mut PmState, _out: &mut Out, args: &[&str]) -> HandlerResult {
    ProtocolError::require("time", args, 1)?;
    let server: f64 = args[0]
        .parse()
        .map_err(|_| ProtocolError::invalid("time", args[0]))?;
    let local = Utc::now().timestamp_micros() as f64 / 1e6;
    state.correction = server - local;
    Ok(())
}

fn force_off(state: &mut PmState, out: &mut Out, event: SessionEvent) {
    state.token = None;
    state.forced_off = true;
    out.emit(event);
    out.close();
}

fn on_kickingoff(state: &mut PmState, out: &mut Out, _args: &[&str]) -> HandlerResult {
    log::warn!("[Session] Kicked off: the account logged in elsewhere");
    force_off(state, out, SessionEvent::KickedOff);
    Ok(())
}

fn on_denied(state: &mut PmState, out: &mut Out, _args: &[&str]) -> HandlerResult {
    log::warn!("[Session] Login denied");
    force_off(state, out, SessionEvent::Denied);
    Ok(())
}

fn on_toofast(state: &mut PmState, out: &mut Out, _args: &[&str]) -> HandlerResult {
    state.guard.trigger(Instant::now());
    out.emit(SessionEvent::TooFast);
    Ok(())
}

fn on_msglexceeded(_state: &mut PmState, out: &mut Out, _args: &[&str]) -> HandlerResult {
    out.emit(SessionEvent::MessageLengthExceeded);
    Ok(())
}

fn record_message(state: &mut PmState, out: &mut Out, args: &[&str], offline: bool) -> HandlerResult {
    let message = PmMessage::parse(args, offline)?;
    state.history.push(message.clone());
    out.emit(SessionEvent::Message(message));
    Ok(())
}

fn on_msg(state: &mut PmState, out: &mut Out, args: &[&str]) -> HandlerResult {
    record_message(state, out, args, false)
}

fn on_msgoff(state: &mut PmState, out: &mut Out, args: &[&str]) -> HandlerResult {
    record_message(state, out, args, true)
}

fn ignore(_state: &mut PmState, _out: &mut Out, _args: &[&str]) -> HandlerResult {
    Ok(())
}

fn on_wl(state: &mut PmState, out: &mut Out, args: &[&str]) -> HandlerResult {
    for name in state.contacts.load(args, Utc::now()) {
        out.send(["track".to_string(), name]);
    }
    out.emit(SessionEvent::ContactsLoaded(state.contacts.iter().cloned().collect()));
    Ok(())
}

fn on_track(state: &mut PmState, out: &mut Out, args: &[&str]) -> HandlerResult {
    if let Some(contact) = state.contacts.track(args, Utc::now())? {
        out.emit(SessionEvent::ContactStatus(contact.clone()));
    }
    Ok(())
}

fn on_idleupdate(state: &mut PmState, out: &mut Out, args: &[&str]) -> HandlerResult {
    if let Some(contact) = state.contacts.idle_update(args, Utc::now())? {
        out.emit(SessionEvent::ContactStatus(contact.clone()));
    }
    Ok(())
}

fn on_status(state: &mut PmState, out: &mut Out, args: &[&str]) -> HandlerResult {
    if let Some(contact) = state.contacts.status(args)? {
        out.emit(SessionEvent::ContactStatus(contact.clone()));
    }
    Ok(())
}

fn on_block_list(state: &mut PmState, out: &mut Out, args: &[&str]) -> HandlerResult {
    state.blocked = args
        .iter()
        .filter(|name| !name.is_empty())
        .map(|name| name.to_lowercase())
        .collect();
    out.emit(SessionEvent::BlockList(state.blocked.clone()));
    Ok(())
}

fn on_wladd(state: &mut PmState, out: &mut Out, args: &[&str]) -> HandlerResult {
    if let Some(name) = state.contacts.confirm_add(args)? {
        out.send(["wl"]);
        out.send(["track", name.as_str()]);
        out.emit(SessionEvent::ContactAdded(name));
    }
    Ok(())
}

fn on_wldelete(state: &mut PmState, out: &mut Out, args: &[&str]) -> HandlerResult {
    if let Some(contact) = state.contacts.confirm_remove(args)? {
        out.emit(SessionEvent::ContactRemoved(contact.name));
    }
    Ok(())
}
