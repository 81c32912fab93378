//! Contact list and presence state machine.
//!
//! The tracker is rebuilt from the bulk `wl` listing and then kept current
//! by narrow `track`, `idleupdate` and `status` frames. Contacts are keyed
//! by lower-cased name, so lookups are case-insensitive and a name can only
//! appear once.
//!
//! Every method that derives a timestamp from idle minutes takes `now`
//! explicitly; the session passes the wall clock.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeDelta, Utc};

use crate::error::ProtocolError;

/// Presence status of a contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContactStatus {
    /// Not connected.
    #[default]
    Offline,
    /// Connected from a regular client.
    Online,
    /// Connected from the mobile app.
    App,
}

impl ContactStatus {
    /// Parse a wire status token.
    #[must_use]
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "offline" | "off" => Some(Self::Offline),
            "online" | "on" => Some(Self::Online),
            "app" => Some(Self::App),
            _ => None,
        }
    }

    /// Wire token for this status.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Online => "online",
            Self::App => "app",
        }
    }
}

impl std::fmt::Display for ContactStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the contact list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    /// Lower-cased contact name.
    pub name: String,
    /// Current status.
    pub status: ContactStatus,
    /// Whether the contact is idle.
    pub idle: bool,
    /// Last time the contact was seen active.
    pub last_active: DateTime<Utc>,
}

impl Contact {
    /// New offline contact, last seen at the epoch.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_lowercase(),
            status: ContactStatus::Offline,
            idle: false,
            last_active: DateTime::UNIX_EPOCH,
        }
    }
}

/// Contact map plus the rules for applying presence frames to it.
#[derive(Debug, Clone, Default)]
pub struct PresenceTracker {
    contacts: BTreeMap<String, Contact>,
}

impl PresenceTracker {
    /// Empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the whole contact set from `wl` arguments.
    ///
    /// Arguments come in groups of `[name, last_seen, status, idle_minutes]`.
    /// A trailing partial group is ignored, as is any group whose numbers do
    /// not parse. Returns the names that need a `track` subscription.
    pub fn load(&mut self, args: &[&str], now: DateTime<Utc>) -> Vec<String> {
        self.contacts.clear();

        for group in args.chunks_exact(4) {
            let [name, last_seen, status, idle] = [group[0], group[1], group[2], group[3]];
            match Self::parse_listing(name, last_seen, status, idle, now) {
                Ok(contact) => {
                    self.contacts.insert(contact.name.clone(), contact);
                }
                Err(e) => log::warn!("[Presence] Skipping contact {name}: {e}"),
            }
        }

        self.contacts.keys().cloned().collect()
    }

    fn parse_listing(
        name: &str,
        last_seen: &str,
        status: &str,
        idle: &str,
        now: DateTime<Utc>,
    ) -> Result<Contact, ProtocolError> {
        let last_seen = if last_seen.eq_ignore_ascii_case("none") {
            DateTime::UNIX_EPOCH
        } else {
            parse_timestamp("wl", last_seen)?
        };
        let idle_minutes = parse_minutes("wl", idle)?;

        let mut contact = Contact::new(name);
        contact.status = ContactStatus::from_token(status).unwrap_or_default();
        if contact.status == ContactStatus::Online {
            contact.last_active = minutes_before("wl", idle, now)?;
            contact.idle = idle_minutes > 0;
        } else {
            contact.last_active = last_seen;
        }
        Ok(contact)
    }

    /// Apply a `track` frame: `[name, minutes_or_time, status]`.
    ///
    /// Unknown contacts are ignored.
    pub fn track(&mut self, args: &[&str], now: DateTime<Utc>) -> Result<Option<&Contact>, ProtocolError> {
        ProtocolError::require("track", args, 3)?;
        let status = ContactStatus::from_token(args[2])
            .ok_or_else(|| ProtocolError::invalid("track", args[2]))?;

        let Some(contact) = self.contacts.get_mut(&args[0].to_lowercase()) else {
            return Ok(None);
        };

        let last_active = match status {
            ContactStatus::Online => minutes_before("track", args[1], now)?,
            ContactStatus::Offline => parse_timestamp("track", args[1])?,
            ContactStatus::App => contact.last_active,
        };
        contact.last_active = last_active;
        contact.idle = false;
        contact.status = status;
        Ok(Some(contact))
    }

    /// Apply an `idleupdate` frame: `[name, flag]`. Flag `0` means idle.
    pub fn idle_update(&mut self, args: &[&str], now: DateTime<Utc>) -> Result<Option<&Contact>, ProtocolError> {
        ProtocolError::require("idleupdate", args, 2)?;
        let Some(contact) = self.contacts.get_mut(&args[0].to_lowercase()) else {
            return Ok(None);
        };
        contact.last_active = now;
        contact.idle = args[1] == "0";
        Ok(Some(contact))
    }

    /// Apply a `status` frame: `[name, time, status]`.
    pub fn status(&mut self, args: &[&str]) -> Result<Option<&Contact>, ProtocolError> {
        ProtocolError::require("status", args, 3)?;
        let status = ContactStatus::from_token(args[2])
            .ok_or_else(|| ProtocolError::invalid("status", args[2]))?;
        let last_active = parse_timestamp("status", args[1])?;

        let Some(contact) = self.contacts.get_mut(&args[0].to_lowercase()) else {
            return Ok(None);
        };
        contact.status = status;
        contact.last_active = last_active;
        contact.idle = false;
        Ok(Some(contact))
    }

    /// Apply a `wladd` confirmation: `[name, result]`.
    ///
    /// Returns the lower-cased name when a new contact was inserted; the
    /// caller then reloads the list and subscribes to tracking. An `invalid`
    /// result or an already-known contact changes nothing.
    pub fn confirm_add(&mut self, args: &[&str]) -> Result<Option<String>, ProtocolError> {
        ProtocolError::require("wladd", args, 2)?;
        if args[1] == "invalid" {
            return Ok(None);
        }
        let key = args[0].to_lowercase();
        if self.contacts.contains_key(&key) {
            return Ok(None);
        }
        self.contacts.insert(key.clone(), Contact::new(&key));
        Ok(Some(key))
    }

    /// Apply a `wldelete` confirmation: `[name, result]`.
    ///
    /// Only a `deleted` result removes the contact.
    pub fn confirm_remove(&mut self, args: &[&str]) -> Result<Option<Contact>, ProtocolError> {
        ProtocolError::require("wldelete", args, 2)?;
        if args[1] != "deleted" {
            return Ok(None);
        }
        Ok(self.contacts.remove(&args[0].to_lowercase()))
    }

    /// Look up a contact by name (case-insensitive).
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Contact> {
        self.contacts.get(&name.to_lowercase())
    }

    /// True if `name` is a contact.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.contacts.contains_key(&name.to_lowercase())
    }

    /// All contact names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.contacts.keys().cloned().collect()
    }

    /// Iterate contacts in name order.
    pub fn iter(&self) -> impl Iterator<Item = &Contact> {
        self.contacts.values()
    }

    /// Number of contacts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    /// True if there are no contacts.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    /// Drop every contact.
    pub fn clear(&mut self) {
        self.contacts.clear();
    }
}

/// Parse a unix timestamp in (possibly fractional) seconds.
pub(crate) fn parse_timestamp(action: &'static str, value: &str) -> Result<DateTime<Utc>, ProtocolError> {
    let secs: f64 = value
        .parse()
        .map_err(|_| ProtocolError::invalid(action, value))?;
    if !secs.is_finite() {
        return Err(ProtocolError::invalid(action, value));
    }
    let whole = secs.floor();
    let nanos = ((secs - whole) * 1e9) as u32;
    DateTime::from_timestamp(whole as i64, nanos).ok_or_else(|| ProtocolError::invalid(action, value))
}

fn parse_minutes(action: &'static str, value: &str) -> Result<i64, ProtocolError> {
    value
        .parse()
        .map_err(|_| ProtocolError::invalid(action, value))
}

/// `now` minus `value` minutes; out-of-range counts are a protocol error.
fn minutes_before(action: &'static str, value: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>, ProtocolError> {
    TimeDelta::try_minutes(parse_minutes(action, value)?)
        .and_then(|delta| now.checked_sub_signed(delta))
        .ok_or_else(|| ProtocolError::invalid(action, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn loaded(args: &[&str]) -> PresenceTracker {
        let mut tracker = PresenceTracker::new();
        tracker.load(args, now());
        tracker
    }

    #[test]
    fn test_load_online_contact_with_no_last_seen() {
        let tracker = loaded(&["alice", "None", "online", "0"]);
        let alice = tracker.get("alice").unwrap();
        assert_eq!(alice.status, ContactStatus::Online);
        assert!(!alice.idle);
        assert_eq!(alice.last_active, now());
    }

    #[test]
    fn test_load_maps_status_tokens() {
        let mut tracker = PresenceTracker::new();
        let to_track = tracker.load(
            &[
                "Bob", "1600000000", "off", "0",
                "carol", "None", "on", "5",
                "dave", "1650000000.5", "app", "0",
                "trailing", "None",
            ],
            now(),
        );
        assert_eq!(to_track, vec!["bob", "carol", "dave"]);

        let bob = tracker.get("BOB").unwrap();
        assert_eq!(bob.status, ContactStatus::Offline);
        assert_eq!(bob.last_active.timestamp(), 1_600_000_000);

        let carol = tracker.get("carol").unwrap();
        assert_eq!(carol.status, ContactStatus::Online);
        assert!(carol.idle);
        assert_eq!(carol.last_active, now() - Duration::minutes(5));

        let dave = tracker.get("dave").unwrap();
        assert_eq!(dave.status, ContactStatus::App);
        assert_eq!(dave.last_active.timestamp_subsec_millis(), 500);
    }

    #[test]
    fn test_load_replaces_previous_set() {
        let mut tracker = loaded(&["alice", "None", "online", "0"]);
        tracker.load(&["bob", "None", "offline", "0"], now());
        assert!(!tracker.contains("alice"));
        assert_eq!(tracker.names(), vec!["bob"]);
    }

    #[test]
    fn test_load_skips_unparseable_group() {
        let tracker = loaded(&["alice", "yesterday", "online", "0", "bob", "None", "on", "0"]);
        assert_eq!(tracker.names(), vec!["bob"]);
    }

    #[test]
    fn test_track_online_sets_last_active_from_minutes() {
        let mut tracker = loaded(&["alice", "None", "online", "0"]);
        let later = now() + Duration::seconds(30);
        let alice = tracker.track(&["alice", "5", "online"], later).unwrap().unwrap();
        assert_eq!(alice.last_active, later - Duration::seconds(300));
        assert_eq!(alice.status, ContactStatus::Online);
    }

    #[test]
    fn test_track_offline_uses_literal_timestamp() {
        let mut tracker = loaded(&["alice", "None", "online", "0"]);
        let alice = tracker.track(&["alice", "1690000000", "offline"], now()).unwrap().unwrap();
        assert_eq!(alice.status, ContactStatus::Offline);
        assert_eq!(alice.last_active.timestamp(), 1_690_000_000);
    }

    #[test]
    fn test_track_zero_minute_app() {
        let mut tracker = loaded(&["alice", "None", "online", "0"]);
        let alice = tracker.track(&["alice", "0", "app"], now()).unwrap().unwrap();
        assert_eq!(alice.status, ContactStatus::App);
    }

    #[test]
    fn test_track_unknown_contact_is_ignored() {
        let mut tracker = loaded(&["alice", "None", "online", "0"]);
        assert!(tracker.track(&["zed", "1", "online"], now()).unwrap().is_none());
        assert!(tracker.track(&["alice", "1"], now()).is_err());
        assert!(tracker.track(&["alice", "1", "away"], now()).is_err());
    }

    #[test]
    fn test_out_of_range_minutes_are_rejected() {
        let mut tracker = loaded(&["alice", "None", "online", "0"]);
        let before = tracker.get("alice").unwrap().clone();
        assert!(tracker.track(&["alice", "999999999999999999", "online"], now()).is_err());
        assert_eq!(tracker.get("alice").unwrap().last_active, before.last_active);

        let to_track = tracker.load(&["alice", "None", "online", "999999999999999999", "bob", "None", "on", "1"], now());
        assert_eq!(to_track, vec!["bob"]);
    }

    #[test]
    fn test_idle_update() {
        let mut tracker = loaded(&["alice", "None", "online", "3"]);
        let alice = tracker.idle_update(&["Alice", "0"], now()).unwrap().unwrap();
        assert!(alice.idle);
        assert_eq!(alice.last_active, now());
        let alice = tracker.idle_update(&["alice", "1"], now()).unwrap().unwrap();
        assert!(!alice.idle);
    }

    #[test]
    fn test_status_frame() {
        let mut tracker = loaded(&["alice", "None", "online", "0"]);
        let alice = tracker.status(&["alice", "1690000000", "offline"]).unwrap().unwrap();
        assert_eq!(alice.status, ContactStatus::Offline);
        assert_eq!(alice.last_active.timestamp(), 1_690_000_000);
    }

    #[test]
    fn test_invalid_add_is_noop() {
        let mut tracker = loaded(&["alice", "None", "online", "0"]);
        assert_eq!(tracker.confirm_add(&["ghost", "invalid"]).unwrap(), None);
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_add_then_confirmed_remove_restores_set() {
        let mut tracker = loaded(&["alice", "None", "online", "0", "bob", "None", "off", "0"]);
        let before: Vec<Contact> = tracker.iter().cloned().collect();

        for name in ["Carol", "dave", "e-v-e"] {
            let added = tracker.confirm_add(&[name, "valid"]).unwrap();
            assert_eq!(added, Some(name.to_lowercase()));
            assert!(tracker.contains(name));

            // Unconfirmed removal does nothing
            assert!(tracker.confirm_remove(&[name, "error"]).unwrap().is_none());
            assert!(tracker.contains(name));

            assert!(tracker.confirm_remove(&[name, "deleted"]).unwrap().is_some());
            let after: Vec<Contact> = tracker.iter().cloned().collect();
            assert_eq!(after, before);
        }
    }

    #[test]
    fn test_duplicate_add_keeps_single_entry() {
        let mut tracker = loaded(&["alice", "None", "online", "0"]);
        assert_eq!(tracker.confirm_add(&["ALICE", "valid"]).unwrap(), None);
        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.get("alice").unwrap().status, ContactStatus::Online);
    }

    #[test]
    fn test_parse_timestamp_rejects_garbage() {
        assert!(parse_timestamp("time", "abc").is_err());
        assert!(parse_timestamp("time", "NaN").is_err());
        assert_eq!(parse_timestamp("time", "10.25").unwrap().timestamp_subsec_millis(), 250);
    }
}
