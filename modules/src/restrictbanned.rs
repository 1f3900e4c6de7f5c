//! Restricts local users who are banned in a channel
//!
//! A banned member below voice may not message the channel, change its topic, or
//! change nickname while still joined.

use modircd_core::{
    Capability, CapabilitySet, Channel, HookResult, Module, ServerState, User, Version, VersionFlags, VOICE_VALUE,
};
use tracing::debug;

#[derive(Debug, Default)]
pub struct RestrictBannedModule;

impl RestrictBannedModule {
    pub fn new() -> Self {
        Self
    }

    fn check(user: &User, channel: &Channel, action: &str) -> HookResult {
        if !user.is_local() {
            return HookResult::Default;
        }
        if channel.rank_of(user.id) < VOICE_VALUE && channel.is_banned(user) {
            debug!("{} may not {} in {}", user.nick, action, channel.name);
            user.write_notice(&format!(
                "*** You may not {}, as you are banned on channel {}",
                action, channel.name
            ));
            return HookResult::Deny;
        }
        HookResult::Default
    }
}

impl Module for RestrictBannedModule {
    fn name(&self) -> &str {
        "restrictbanned"
    }

    fn version(&self) -> Version {
        Version::new(1, 1, 0, 1, VersionFlags::VENDOR)
    }

    fn description(&self) -> &str {
        "Restricts banned users in a channel from speaking or changing nick"
    }

    fn implements(&self) -> CapabilitySet {
        CapabilitySet::of(&[Capability::PreCommand, Capability::UserPreNick])
    }

    fn on_user_pre_nick(&mut self, user: &User, state: &ServerState, _new_nick: &str) -> HookResult {
        for key in &user.channels {
            if let Some(channel) = state.channel(key) {
                if Self::check(user, channel, "change your nickname") == HookResult::Deny {
                    return HookResult::Deny;
                }
            }
        }
        HookResult::Default
    }

    fn on_pre_command(&mut self, user: &User, state: &ServerState, command: &str, params: &[String]) -> HookResult {
        let action = match command {
            "PRIVMSG" | "NOTICE" => "message the channel",
            "TOPIC" if params.len() > 1 => "change the topic",
            _ => return HookResult::Default,
        };
        let Some(target) = params.first() else {
            return HookResult::Default;
        };
        match state.channel(target) {
            Some(channel) => Self::check(user, channel, action),
            None => HookResult::Default,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::{connect, connect_from, drain, params, server};

    const LOAD: &str = "[modules]\nload = [\"restrictbanned\"]\n";

    fn refused(lines: &[String], action: &str) -> bool {
        lines.iter().any(|l| {
            l.contains(&format!("*** You may not {}, as you are banned on channel #c", action))
        })
    }

    #[test]
    fn test_banned_member_cannot_speak_or_renick() {
        let mut server = server(LOAD);
        let (op, _op_rx) = connect(&mut server, "op");
        let (bob, mut bob_rx) = connect_from(&mut server, "bob", "10.0.0.9", "bad.example.com");
        server.join_channel(op, "#c", None);
        server.join_channel(bob, "#c", None);
        server.handle_command(op, "MODE", &params(&["#c", "+b", "*!*@bad.example.com"]));
        drain(&mut bob_rx);

        server.handle_command(bob, "PRIVMSG", &params(&["#c", "hello"]));
        let lines = drain(&mut bob_rx);
        assert!(refused(&lines, "message the channel"));
        assert!(!lines.iter().any(|l| l.contains(" 421 ")));

        server.handle_command(bob, "TOPIC", &params(&["#C", "new topic"]));
        assert!(refused(&drain(&mut bob_rx), "change the topic"));

        server.handle_command(bob, "NICK", &params(&["bobby"]));
        assert!(refused(&drain(&mut bob_rx), "change your nickname"));
        assert_eq!(server.user(bob).unwrap().nick, "bob");
    }

    #[test]
    fn test_voice_and_unbanned_users_pass() {
        let mut server = server(LOAD);
        let (op, _op_rx) = connect(&mut server, "op");
        let (bob, mut bob_rx) = connect_from(&mut server, "bob", "10.0.0.9", "bad.example.com");
        let (carol, mut carol_rx) = connect_from(&mut server, "carol", "10.0.0.10", "good.example.com");
        server.join_channel(op, "#c", None);
        server.join_channel(bob, "#c", None);
        server.join_channel(carol, "#c", None);
        server.handle_command(op, "MODE", &params(&["#c", "+vb", "bob", "*!*@bad.example.com"]));
        drain(&mut bob_rx);
        drain(&mut carol_rx);

        // reading the topic is never restricted
        server.handle_command(bob, "TOPIC", &params(&["#c"]));
        assert!(!refused(&drain(&mut bob_rx), "change the topic"));

        server.handle_command(bob, "NICK", &params(&["bobby"]));
        assert!(!refused(&drain(&mut bob_rx), "change your nickname"));
        assert_eq!(server.user(bob).unwrap().nick, "bobby");

        server.handle_command(carol, "PRIVMSG", &params(&["#c", "hi"]));
        assert!(!refused(&drain(&mut carol_rx), "message the channel"));
    }
}
