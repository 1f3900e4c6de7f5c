//! Live users and channels

use crate::channel::Channel;
use crate::extension_registry::SlotRegistry;
use crate::user::{User, UserId};
use crate::utils::string::irc_to_lower;
use crate::xline::XLineSubject;
use rustc_hash::FxHashMap;
use std::collections::HashMap;

/// Everything the server knows about its network view
pub struct ServerState {
    /// This server's name
    pub name: String,
    pub users: HashMap<UserId, User>,
    /// Casefolded nick to user
    pub nicks: FxHashMap<String, UserId>,
    /// Casefolded channel name to channel
    pub channels: HashMap<String, Channel>,
    /// Extension slots attached to users and channels
    pub slots: SlotRegistry,
}

impl ServerState {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            users: HashMap::new(),
            nicks: FxHashMap::default(),
            channels: HashMap::new(),
            slots: SlotRegistry::new(),
        }
    }

    pub fn find_nick(&self, nick: &str) -> Option<UserId> {
        self.nicks.get(&irc_to_lower(nick)).copied()
    }

    pub fn user(&self, id: UserId) -> Option<&User> {
        self.users.get(&id)
    }

    pub fn user_mut(&mut self, id: UserId) -> Option<&mut User> {
        self.users.get_mut(&id)
    }

    pub fn user_by_nick(&self, nick: &str) -> Option<&User> {
        self.find_nick(nick).and_then(|id| self.users.get(&id))
    }

    pub fn channel(&self, name: &str) -> Option<&Channel> {
        self.channels.get(&irc_to_lower(name))
    }

    pub fn channel_mut(&mut self, name: &str) -> Option<&mut Channel> {
        self.channels.get_mut(&irc_to_lower(name))
    }

    /// Point `nick` at `id`, dropping `old` from the index
    pub fn rename(&mut self, id: UserId, old: &str, nick: &str) {
        let old_key = irc_to_lower(old);
        if self.nicks.get(&old_key) == Some(&id) {
            self.nicks.remove(&old_key);
        }
        self.nicks.insert(irc_to_lower(nick), id);
    }

    /// Local connections, registered or not, with what X-lines match against
    pub fn local_subjects(&self) -> impl Iterator<Item = (UserId, XLineSubject<'_>)> {
        self.users
            .values()
            .filter(|u| u.is_local())
            .map(|u| (u.id, u.xline_subject()))
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nick_index_is_case_insensitive() {
        let mut state = ServerState::new("irc.test");
        let mut user = User::new("h".into(), "1.1.1.1".into(), "irc.test".into(), None);
        user.nick = "Alice[1]".into();
        let id = user.id;
        state.users.insert(id, user);
        state.rename(id, "*", "Alice[1]");

        assert_eq!(state.find_nick("alice{1}"), Some(id));
        state.rename(id, "Alice[1]", "Bob");
        assert_eq!(state.find_nick("ALICE[1]"), None);
        assert_eq!(state.user_by_nick("bob").map(|u| u.id), Some(id));
    }
}
