//! Inbound private message.

use chrono::{DateTime, Utc};

use crate::constants::FIELD_SEPARATOR;
use crate::error::ProtocolError;
use crate::markup::clean_message;
use crate::presence::parse_timestamp;

/// One message received on the PM connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PmMessage {
    /// Lower-cased sender name.
    pub sender: String,
    /// Plain text with markup removed.
    pub body: String,
    /// Body exactly as received.
    pub raw: String,
    /// Sender name colour from the markup, empty if absent.
    pub name_color: String,
    /// Font spec from the markup, empty if absent.
    pub font: String,
    /// Server timestamp.
    pub time: DateTime<Utc>,
    /// True if delivered from the offline queue (`msgoff`).
    pub offline: bool,
}

impl PmMessage {
    /// Parse `msg`/`msgoff` arguments:
    /// `[sender, alias, _, unix_time, _, body...]`.
    ///
    /// The body may itself contain `:`, so everything from the sixth field on
    /// is joined back together.
    pub fn parse(args: &[&str], offline: bool) -> Result<Self, ProtocolError> {
        let action = if offline { "msgoff" } else { "msg" };
        ProtocolError::require(action, args, 6)?;

        let raw = args[5..].join(&FIELD_SEPARATOR.to_string());
        let clean = clean_message(&raw);

        Ok(Self {
            sender: args[0].to_lowercase(),
            body: clean.text,
            raw,
            name_color: clean.name_color,
            font: clean.font,
            time: parse_timestamp(action, args[3])?,
            offline,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rejoins_body() {
        let args = ["Alice", "", "0", "1690000000", "0", "<n0a0/>ratio", " 16", "9"];
        let msg = PmMessage::parse(&args, false).unwrap();
        assert_eq!(msg.sender, "alice");
        assert_eq!(msg.raw, "<n0a0/>ratio: 16:9");
        assert_eq!(msg.body, "ratio: 16:9");
        assert_eq!(msg.name_color, "0a0");
        assert_eq!(msg.time.timestamp(), 1_690_000_000);
        assert!(!msg.offline);
    }

    #[test]
    fn test_parse_offline_flag() {
        let msg = PmMessage::parse(&["bob", "", "0", "1.5", "0", "hey"], true).unwrap();
        assert!(msg.offline);
        assert_eq!(msg.body, "hey");
    }

    #[test]
    fn test_parse_requires_body_field() {
        let err = PmMessage::parse(&["bob", "", "0", "1"], false).unwrap_err();
        assert!(matches!(err, ProtocolError::MissingArguments { action: "msg", .. }));
        assert!(PmMessage::parse(&["bob", "", "0", "soon", "0", "x"], true).is_err());
    }
}
