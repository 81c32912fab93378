//! Chatline - client engine for the line-framed Chatango PM protocol.
//!
//! The crate keeps one persistent TCP (optionally TLS) connection per
//! session and handles connection lifecycle, command framing, dispatch,
//! keepalive, reconnection, presence tracking, anti-flood throttling and
//! message chunking.
//!
//! # Architecture
//!
//! Components, leaf first:
//!
//! - **TaskScheduler** - one-shot and repeating tasks on a lazy polling loop
//! - **Transport** - socket, framing, read loop, keepalive
//! - **Dispatcher** - explicit `action -> handler` table with failure isolation
//! - **PresenceTracker** - contact list and status state machine
//! - **AntiFloodGuard** - silence window after the server's rate-limit signal
//! - **Chunker** - splits and styles outbound messages
//! - **PmSession** - connect -> authenticate -> serve -> reconnect/terminate
//!
//! # Modules
//!
//! - [`session`] - PM session lifecycle and operations
//! - [`transport`] - socket and wire codec
//! - [`config`] - configuration loading/saving
//! - [`token`] - login token service

// Library modules
pub mod client;
pub mod session;
pub mod transport;

pub mod chunk;
pub mod config;
pub mod constants;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod flood;
pub mod history;
pub mod markup;
pub mod message;
pub mod presence;
pub mod scheduler;
pub mod token;

// Re-export commonly used types
pub use client::Client;
pub use config::Config;
pub use error::{ProtocolError, SessionError};
pub use events::{ChannelListener, EventListener, LoggingListener, SessionEvent};
pub use message::PmMessage;
pub use presence::{Contact, ContactStatus};
pub use scheduler::{TaskId, TaskScheduler};
pub use session::{PmSession, SendOutcome, SessionStatus};
pub use token::{HttpTokenService, StaticTokenService, TokenService};
