//! Channel state: members with prefix ranks, mode flags, parameters and lists

use crate::client::Client;
use crate::extension_registry::Extensible;
use crate::user::{User, UserId};
use crate::utils::string::{irc_eq, irc_to_lower, wildcard_match};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::warn;

/// Rank of a voiced member
pub const VOICE_VALUE: u32 = 10000;
/// Rank of a halfop
pub const HALFOP_VALUE: u32 = 20000;
/// Rank of a channel operator
pub const OP_VALUE: u32 = 30000;

/// An entry of a list mode such as bans
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    pub mask: String,
    pub set_by: String,
    pub set_at: i64,
}

/// Channel member
#[derive(Debug, Clone)]
pub struct ChannelMember {
    pub user_id: UserId,
    /// Current nick, kept in step with NICK changes
    pub nick: String,
    /// Write handle for local members
    pub client: Option<Client>,
    /// Prefix modes held, with their ranks
    ranks: Vec<(char, u32)>,
}

impl ChannelMember {
    pub fn new(user: &User) -> Self {
        Self {
            user_id: user.id,
            nick: user.nick.clone(),
            client: user.client.clone(),
            ranks: Vec::new(),
        }
    }

    /// Grant a prefix mode; false if already held
    pub fn grant(&mut self, mode: char, rank: u32) -> bool {
        if self.has(mode) {
            return false;
        }
        self.ranks.push((mode, rank));
        self.ranks.sort_by(|a, b| b.1.cmp(&a.1));
        true
    }

    /// Revoke a prefix mode; false if not held
    pub fn revoke(&mut self, mode: char) -> bool {
        let before = self.ranks.len();
        self.ranks.retain(|(m, _)| *m != mode);
        self.ranks.len() != before
    }

    pub fn has(&self, mode: char) -> bool {
        self.ranks.iter().any(|(m, _)| *m == mode)
    }

    /// Highest rank held, 0 for none
    pub fn rank(&self) -> u32 {
        self.ranks.first().map(|(_, r)| *r).unwrap_or(0)
    }

    /// Prefix modes held, highest rank first
    pub fn prefix_modes(&self) -> impl Iterator<Item = char> + '_ {
        self.ranks.iter().map(|(m, _)| *m)
    }

    pub fn is_operator(&self) -> bool {
        self.rank() >= OP_VALUE
    }
}

/// Channel information and state
#[derive(Debug)]
pub struct Channel {
    /// Channel name as created
    pub name: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Channel topic
    pub topic: Option<String>,
    /// Set flag and parameter modes
    modes: BTreeSet<char>,
    /// Parameters of parameter modes
    params: BTreeMap<char, String>,
    /// Entries of list modes
    lists: BTreeMap<char, Vec<ListEntry>>,
    /// Channel members
    pub members: HashMap<UserId, ChannelMember>,
    /// Module data attached to this channel
    pub ext: Extensible,
}

impl Channel {
    /// Create a new channel
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            created_at: Utc::now(),
            topic: None,
            modes: BTreeSet::new(),
            params: BTreeMap::new(),
            lists: BTreeMap::new(),
            members: HashMap::new(),
            ext: Extensible::new(),
        }
    }

    /// Casefolded name used as the lookup key
    pub fn key(&self) -> String {
        irc_to_lower(&self.name)
    }

    pub fn has_mode(&self, mode: char) -> bool {
        self.modes.contains(&mode)
    }

    /// Set a flag mode; false if already set
    pub fn set_mode(&mut self, mode: char) -> bool {
        self.modes.insert(mode)
    }

    /// Clear a flag or parameter mode; false if not set
    pub fn unset_mode(&mut self, mode: char) -> bool {
        self.params.remove(&mode);
        self.modes.remove(&mode)
    }

    pub fn param(&self, mode: char) -> Option<&str> {
        self.params.get(&mode).map(String::as_str)
    }

    /// Set a parameter mode; false if it already had this exact value
    pub fn set_param(&mut self, mode: char, value: &str) -> bool {
        self.modes.insert(mode);
        match self.params.get(&mode) {
            Some(current) if current == value => false,
            _ => {
                self.params.insert(mode, value.to_string());
                true
            }
        }
    }

    pub fn list(&self, mode: char) -> &[ListEntry] {
        self.lists.get(&mode).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Add a list entry; false if an equal mask is already listed
    pub fn add_list_entry(&mut self, mode: char, entry: ListEntry) -> bool {
        let list = self.lists.entry(mode).or_default();
        if list.iter().any(|e| irc_eq(&e.mask, &entry.mask)) {
            return false;
        }
        list.push(entry);
        true
    }

    pub fn remove_list_entry(&mut self, mode: char, mask: &str) -> Option<ListEntry> {
        let list = self.lists.get_mut(&mode)?;
        let pos = list.iter().position(|e| irc_eq(&e.mask, mask))?;
        let entry = list.remove(pos);
        if list.is_empty() {
            self.lists.remove(&mode);
        }
        Some(entry)
    }

    /// Whether `user` matches any entry of the ban list
    pub fn is_banned(&self, user: &User) -> bool {
        let mask = user.mask();
        let ip_mask = user.ip_mask();
        self.list('b')
            .iter()
            .any(|ban| wildcard_match(&ban.mask, &mask) || wildcard_match(&ban.mask, &ip_mask))
    }

    /// Flag modes and visible parameters, e.g. `("+lnt", ["10"])`
    pub fn modes_string(&self, show_key: bool) -> (String, Vec<String>) {
        let mut letters = String::from("+");
        let mut params = Vec::new();
        for mode in &self.modes {
            letters.push(*mode);
            if let Some(value) = self.params.get(mode) {
                if *mode == 'k' && !show_key {
                    params.push("<key>".to_string());
                } else {
                    params.push(value.clone());
                }
            }
        }
        (letters, params)
    }

    pub fn add_member(&mut self, user: &User) -> &mut ChannelMember {
        self.members
            .entry(user.id)
            .or_insert_with(|| ChannelMember::new(user))
    }

    pub fn remove_member(&mut self, id: UserId) -> Option<ChannelMember> {
        self.members.remove(&id)
    }

    pub fn is_member(&self, id: UserId) -> bool {
        self.members.contains_key(&id)
    }

    pub fn member(&self, id: UserId) -> Option<&ChannelMember> {
        self.members.get(&id)
    }

    pub fn member_mut(&mut self, id: UserId) -> Option<&mut ChannelMember> {
        self.members.get_mut(&id)
    }

    pub fn member_by_nick(&self, nick: &str) -> Option<&ChannelMember> {
        self.members.values().find(|m| irc_eq(&m.nick, nick))
    }

    /// Rank of `id` in this channel, 0 when not a member
    pub fn rank_of(&self, id: UserId) -> u32 {
        self.members.get(&id).map(|m| m.rank()).unwrap_or(0)
    }

    /// Send a line to every local member except `except`
    pub fn write_all(&self, line: &str, except: Option<UserId>) {
        for member in self.members.values() {
            if Some(member.user_id) == except {
                continue;
            }
            if let Some(client) = &member.client {
                if let Err(e) = client.send_line(line) {
                    warn!("Dropping line for {} in {}: {}", member.nick, self.name, e);
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(nick: &str) -> User {
        let mut user = User::new("host.example".into(), "10.0.0.1".into(), "irc.test".into(), None);
        user.nick = nick.to_string();
        user.username = "ident".to_string();
        user
    }

    #[test]
    fn test_member_ranks() {
        let alice = user("alice");
        let mut channel = Channel::new("#Rust");
        let member = channel.add_member(&alice);
        assert!(member.grant('v', VOICE_VALUE));
        assert!(member.grant('o', OP_VALUE));
        assert!(!member.grant('o', OP_VALUE));
        assert_eq!(member.rank(), OP_VALUE);
        assert_eq!(member.prefix_modes().collect::<String>(), "ov");
        assert!(member.revoke('o'));
        assert_eq!(channel.rank_of(alice.id), VOICE_VALUE);
        assert_eq!(channel.key(), "#rust");
    }

    #[test]
    fn test_params_and_flags() {
        let mut channel = Channel::new("#test");
        assert!(channel.set_mode('n'));
        assert!(!channel.set_mode('n'));
        assert!(channel.set_param('l', "10"));
        assert!(!channel.set_param('l', "10"));
        assert!(channel.set_param('k', "secret"));
        assert_eq!(
            channel.modes_string(false),
            ("+kln".to_string(), vec!["<key>".to_string(), "10".to_string()])
        );
        assert!(channel.unset_mode('l'));
        assert_eq!(channel.param('l'), None);
    }

    #[test]
    fn test_ban_list_matching() {
        let bob = user("bob");
        let mut channel = Channel::new("#test");
        let entry = ListEntry {
            mask: "*!*@10.0.0.*".to_string(),
            set_by: "alice".to_string(),
            set_at: 0,
        };
        assert!(channel.add_list_entry('b', entry.clone()));
        assert!(!channel.add_list_entry('b', entry));
        assert!(channel.is_banned(&bob));
        assert!(channel.remove_list_entry('b', "*!*@10.0.0.*").is_some());
        assert!(!channel.is_banned(&bob));
        assert!(channel.list('b').is_empty());
    }
}
