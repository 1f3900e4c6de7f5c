//! Hidden channel list (`+p` user mode)
//!
//! Users with `+p` keep their channel list out of WHOIS, except for themselves and operators.

use modircd_core::{
    Capability, CapabilitySet, HookResult, ModeAction, ModeHandler, ModeSource, ModeTarget, ModeType, Module,
    ModuleContext, NumericReply, Result, User, Version, VersionFlags,
};

struct HideChansMode;

impl ModeHandler for HideChansMode {
    fn mode_char(&self) -> char {
        'p'
    }

    fn mode_type(&self) -> ModeType {
        ModeType::User
    }

    fn on_mode_change(
        &self,
        source: &ModeSource,
        target: ModeTarget<'_>,
        _parameter: &mut String,
        adding: bool,
    ) -> ModeAction {
        let ModeTarget::User(user) = target else {
            return ModeAction::Deny;
        };
        // only the user themselves, or the server stripping the mode
        if source.user.is_some_and(|id| id != user.id) {
            return ModeAction::Deny;
        }
        let changed = if adding {
            user.add_mode('p')
        } else {
            user.remove_mode('p')
        };
        if changed {
            ModeAction::Allow
        } else {
            ModeAction::Deny
        }
    }
}

pub struct HideChansModule;

impl HideChansModule {
    pub fn new() -> Self {
        Self
    }
}

impl Default for HideChansModule {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for HideChansModule {
    fn name(&self) -> &str {
        "hidechans"
    }

    fn version(&self) -> Version {
        Version::new(1, 1, 0, 0, VersionFlags::COMMON | VersionFlags::VENDOR)
    }

    fn description(&self) -> &str {
        "Provides user mode +p to hide channels from WHOIS"
    }

    fn implements(&self) -> CapabilitySet {
        CapabilitySet::of(&[Capability::WhoisLine])
    }

    fn init(&mut self, ctx: &mut ModuleContext<'_>) -> Result<()> {
        ctx.add_mode(Box::new(HideChansMode))
    }

    fn on_whois_line(&mut self, source: &User, dest: &User, numeric: u16, _text: &str) -> HookResult {
        let hidden = source.id != dest.id
            && !source.is_operator()
            && numeric == NumericReply::RplWhoisChannels.numeric_code()
            && dest.has_mode('p');
        if hidden {
            HookResult::Deny
        } else {
            HookResult::Default
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::{connect, drain, params, server};

    fn has_channels(lines: &[String]) -> bool {
        lines.iter().any(|l| l.starts_with(":irc.test 319 "))
    }

    #[test]
    fn test_channels_hidden_from_others() {
        let mut server = server("[modules]\nload = [\"hidechans\"]\n");
        let (shy, _shy_rx) = connect(&mut server, "shy");
        let (viewer, mut viewer_rx) = connect(&mut server, "alice");
        let (oper, mut oper_rx) = connect(&mut server, "oper");
        server.set_oper(oper, "NetAdmin");

        server.join_channel(shy, "#secret", None);
        server.handle_command(shy, "MODE", &params(&["shy", "+p"]));
        assert!(server.user(shy).unwrap().has_mode('p'));

        drain(&mut viewer_rx);
        server.handle_command(viewer, "WHOIS", &params(&["shy"]));
        let lines = drain(&mut viewer_rx);
        assert!(!has_channels(&lines));
        assert!(lines.iter().any(|l| l.starts_with(":irc.test 318 alice shy")));

        drain(&mut oper_rx);
        server.handle_command(oper, "WHOIS", &params(&["shy"]));
        assert!(has_channels(&drain(&mut oper_rx)));
    }

    #[test]
    fn test_self_whois_still_lists_channels() {
        let mut server = server("[modules]\nload = [\"hidechans\"]\n");
        let (shy, mut shy_rx) = connect(&mut server, "shy");
        server.join_channel(shy, "#secret", None);
        server.handle_command(shy, "MODE", &params(&["shy", "+p"]));
        drain(&mut shy_rx);

        server.handle_command(shy, "WHOIS", &params(&["shy"]));
        assert!(has_channels(&drain(&mut shy_rx)));
    }
}
