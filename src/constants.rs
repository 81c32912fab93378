//! Protocol-wide constants for chatline.
//!
//! This module centralizes the magic numbers of the wire protocol and the
//! session engine so that timings and limits are discoverable in one place.
//!
//! # Categories
//!
//! - **Framing**: separators and terminators
//! - **Timings**: keepalive, reconnect backoff, login wait, scheduler tick
//! - **Limits**: message length, history size, read buffer

use std::time::Duration;

// ============================================================================
// Framing
// ============================================================================

/// Separator between the fields of one command.
pub const FIELD_SEPARATOR: char = ':';

/// Terminator for every frame except the first one sent on a connection.
pub const FRAME_TERMINATOR: &str = "\r\n\0";

/// Terminator for the very first frame sent on a fresh connection.
///
/// The server expects a bare null byte once, then the full terminator.
pub const FIRST_FRAME_TERMINATOR: &str = "\0";

/// Protocol version sent with `tlogin`.
pub const PROTOCOL_VERSION: &str = "2";

// ============================================================================
// Server
// ============================================================================

/// Default PM server host.
pub const DEFAULT_PM_SERVER: &str = "c1.chatango.com";

/// Default PM server port.
pub const DEFAULT_PM_PORT: u16 = 443;

/// Login endpoint used by the HTTP token service.
pub const DEFAULT_LOGIN_URL: &str = "http://chatango.com/login";

/// Cookie that carries the session token in the login response.
pub const AUTH_COOKIE_NAME: &str = "auth.chatango.com";

// ============================================================================
// Timings
// ============================================================================

/// Interval between keepalive frames on an open connection.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(90);

/// Fixed delay between `listen` reconnection attempts.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Bound on the wait for the server to acknowledge `tlogin`.
pub const LOGIN_TIMEOUT: Duration = Duration::from_secs(6);

/// Length of the silence window after a `toofast` signal.
pub const FLOOD_SILENCE: Duration = Duration::from_secs(12);

/// Scheduler polling interval.
pub const SCHEDULER_TICK: Duration = Duration::from_millis(10);

/// Idle yield between socket reads.
pub const RECV_IDLE_YIELD: Duration = Duration::from_micros(100);

/// HTTP request timeout for the login exchange.
pub const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Limits
// ============================================================================

/// Maximum characters of message body per outbound `msg` command.
pub const MAX_MESSAGE_LEN: usize = 11_600;

/// Maximum number of messages kept in a session's history.
pub const HISTORY_CAPACITY: usize = 10_000;

/// Size of a single socket read.
pub const READ_BUFFER_SIZE: usize = 2048;

/// Largest inbound frame the decoder will buffer while waiting for its
/// terminator.
pub const MAX_FRAME_SIZE: usize = 16 * MAX_MESSAGE_LEN;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminators_end_with_null() {
        assert!(FRAME_TERMINATOR.ends_with('\0'));
        assert_eq!(FIRST_FRAME_TERMINATOR, "\0");
    }

    #[test]
    fn test_timings_are_ordered() {
        // The scheduler must tick far more often than any protocol timer fires
        assert!(SCHEDULER_TICK < RECONNECT_DELAY);
        assert!(RECONNECT_DELAY < LOGIN_TIMEOUT);
        assert!(LOGIN_TIMEOUT < FLOOD_SILENCE);
        assert!(FLOOD_SILENCE < KEEPALIVE_INTERVAL);
    }

    #[test]
    fn test_limits_are_positive() {
        assert!(MAX_MESSAGE_LEN > 0);
        assert!(HISTORY_CAPACITY > 0);
        assert!(READ_BUFFER_SIZE > 0);
        assert!(MAX_FRAME_SIZE > MAX_MESSAGE_LEN);
    }
}
