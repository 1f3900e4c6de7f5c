//! Shows a user's modes in WHOIS to operators

use modircd_core::{Capability, CapabilitySet, Module, NumericLine, User, Version, VersionFlags};

const RPL_WHOISMODES: u16 = 379;

pub struct WhoisModesModule;

impl WhoisModesModule {
    pub fn new() -> Self {
        Self
    }
}

impl Default for WhoisModesModule {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for WhoisModesModule {
    fn name(&self) -> &str {
        "whoismodes"
    }

    fn version(&self) -> Version {
        Version::new(1, 1, 0, 0, VersionFlags::NONE)
    }

    fn description(&self) -> &str {
        "Shows user modes in WHOIS to IRC operators"
    }

    fn implements(&self) -> CapabilitySet {
        CapabilitySet::of(&[Capability::Whois])
    }

    fn on_whois(&mut self, source: &User, dest: &User) -> Vec<NumericLine> {
        if !source.is_operator() {
            return Vec::new();
        }
        vec![NumericLine::new(
            RPL_WHOISMODES,
            format!("{} :is using modes {}", dest.nick, dest.modes_string()),
        )]
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::{connect, drain, params, server};

    #[test]
    fn test_only_opers_see_modes() {
        let mut server = server("[modules]\nload = [\"whoismodes\"]\n");
        let (target, _target_rx) = connect(&mut server, "bob");
        let (user, mut user_rx) = connect(&mut server, "alice");
        let (oper, mut oper_rx) = connect(&mut server, "oper");
        server.set_oper(oper, "NetAdmin");
        server.handle_command(target, "MODE", &params(&["bob", "+iw"]));

        drain(&mut user_rx);
        server.handle_command(user, "WHOIS", &params(&["bob"]));
        assert!(!drain(&mut user_rx).iter().any(|l| l.contains(" 379 ")));

        drain(&mut oper_rx);
        server.handle_command(oper, "WHOIS", &params(&["bob"]));
        assert!(drain(&mut oper_rx).contains(&":irc.test 379 oper bob :is using modes +iw".to_string()));
    }
}
