//! User management and tracking

use crate::client::Client;
use crate::extension_registry::Extensible;
use crate::numeric::{format_numeric, format_raw, NumericReply};
use crate::xline::XLineSubject;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use tracing::warn;
use uuid::Uuid;

/// Unique user identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// User information and state
#[derive(Debug)]
pub struct User {
    /// Unique user ID
    pub id: UserId,
    /// Nickname
    pub nick: String,
    /// Username (ident)
    pub username: String,
    /// Real name
    pub realname: String,
    /// Displayed hostname
    pub host: String,
    /// Textual IP address
    pub ip: String,
    /// Server the user is connected to
    pub server: String,
    /// Connection time
    pub connected_at: DateTime<Utc>,
    /// User modes
    pub modes: HashSet<char>,
    /// Channels the user is in, by casefolded name
    pub channels: HashSet<String>,
    /// Whether registration completed
    pub registered: bool,
    /// Operator type, when opered
    pub oper_type: Option<String>,
    /// Module data attached to this user
    pub ext: Extensible,
    /// Write handle, present for local users only
    pub client: Option<Client>,
}

impl User {
    /// Create a new, unregistered user
    pub fn new(host: String, ip: String, server: String, client: Option<Client>) -> Self {
        Self {
            id: UserId::new(),
            nick: "*".to_string(),
            username: "unknown".to_string(),
            realname: String::new(),
            host,
            ip,
            server,
            connected_at: Utc::now(),
            modes: HashSet::new(),
            channels: HashSet::new(),
            registered: false,
            oper_type: None,
            ext: Extensible::new(),
            client,
        }
    }

    /// Whether the user is connected to this server
    pub fn is_local(&self) -> bool {
        self.client.is_some()
    }

    /// `nick!user@host`
    pub fn mask(&self) -> String {
        format!("{}!{}@{}", self.nick, self.username, self.host)
    }

    /// `nick!user@ip`, used for ban checks
    pub fn ip_mask(&self) -> String {
        format!("{}!{}@{}", self.nick, self.username, self.ip)
    }

    pub fn is_operator(&self) -> bool {
        self.oper_type.is_some()
    }

    pub fn has_mode(&self, mode: char) -> bool {
        self.modes.contains(&mode)
    }

    /// Set a mode flag, returning false if it was already set
    pub fn add_mode(&mut self, mode: char) -> bool {
        self.modes.insert(mode)
    }

    /// Clear a mode flag, returning false if it was not set
    pub fn remove_mode(&mut self, mode: char) -> bool {
        self.modes.remove(&mode)
    }

    /// Mode flags as `+abc`
    pub fn modes_string(&self) -> String {
        let sorted: BTreeSet<char> = self.modes.iter().copied().collect();
        let mut modes = String::from("+");
        modes.extend(sorted);
        modes
    }

    pub fn is_in_channel(&self, key: &str) -> bool {
        self.channels.contains(key)
    }

    /// What X-lines are matched against
    pub fn xline_subject(&self) -> XLineSubject<'_> {
        XLineSubject {
            nick: &self.nick,
            ident: &self.username,
            host: &self.host,
            ip: &self.ip,
        }
    }

    /// Queue a raw line. Remote users have no local link and ignore writes.
    pub fn write_line(&self, line: impl Into<String>) {
        if let Some(client) = &self.client {
            if let Err(e) = client.send_line(line) {
                warn!("Dropping line for {}: {}", self.nick, e);
            }
        }
    }

    /// Send a numeric from this user's server
    pub fn write_numeric(&self, numeric: NumericReply, params: &[&str]) {
        self.write_line(numeric.format(&self.server, &self.nick, params));
    }

    /// Send a numeric the core has no name for
    pub fn write_numeric_code(&self, code: u16, params: &[&str]) {
        self.write_line(format_numeric(&self.server, code, &self.nick, params));
    }

    /// Send a numeric whose text is already laid out
    pub fn write_numeric_raw(&self, code: u16, text: &str) {
        self.write_line(format_raw(&self.server, code, &self.nick, text));
    }

    /// Server notice to this user
    pub fn write_notice(&self, text: &str) {
        self.write_line(format!(":{} NOTICE {} :{}", self.server, self.nick, text));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_modes() {
        let mut user = User::new("host".into(), "1.2.3.4".into(), "irc.test".into(), None);
        assert!(user.add_mode('w'));
        assert!(!user.add_mode('w'));
        user.add_mode('i');
        assert_eq!(user.modes_string(), "+iw");
        assert!(user.remove_mode('w'));
        assert!(!user.remove_mode('w'));
    }

    #[test]
    fn test_write_numeric_goes_to_client() {
        let (client, mut rx) = Client::channel("1.2.3.4:5000");
        let mut user = User::new("host".into(), "1.2.3.4".into(), "irc.test".into(), Some(client));
        user.nick = "alice".into();
        user.write_numeric(NumericReply::ErrNoSuchNick, &["bob", "No such nick/channel"]);
        assert_eq!(
            rx.try_recv().unwrap(),
            ":irc.test 401 alice bob :No such nick/channel"
        );
    }
}
